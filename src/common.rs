use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::constants::LOG_TRUNCATE_CHARS;

pub fn delete_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed deleting {}", path.display()))?;
    }
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }
    Ok(())
}

/// Sibling path a writer fills before renaming into place.
pub fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or("output.parquet");
    path.with_file_name(format!("{file_name}.tmp"))
}

pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(LOG_TRUNCATE_CHARS) {
        None => trimmed.to_string(),
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
    }
}

pub fn mebibytes(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_for_log_keeps_short_text() {
        assert_eq!(truncate_for_log("  short message \n"), "short message");
    }

    #[test]
    fn truncate_for_log_cuts_on_char_boundary() {
        let long = "é".repeat(LOG_TRUNCATE_CHARS + 10);
        let out = truncate_for_log(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), LOG_TRUNCATE_CHARS + 3);
    }

    #[test]
    fn tmp_path_sits_next_to_target() {
        let tmp = tmp_path_for(Path::new("/data/out/rates.parquet"));
        assert_eq!(tmp, PathBuf::from("/data/out/rates.parquet.tmp"));
    }
}
