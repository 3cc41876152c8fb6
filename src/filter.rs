use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::error::{ExtractError, ExtractResult};

/// Immutable set of admitted values (billing codes or tax ids).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Whitelist {
    values: HashSet<String>,
    origin: Option<PathBuf>,
}

impl Whitelist {
    /// Reads one value per line; blank lines are ignored and values trimmed.
    pub fn load(path: &Path) -> ExtractResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ExtractError::Whitelist {
            path: path.to_path_buf(),
            source,
        })?;
        let whitelist = Self {
            values: parse_lines(&text),
            origin: Some(path.to_path_buf()),
        };
        info!(
            "Loaded {} whitelist values from {}",
            whitelist.len(),
            path.display()
        );
        Ok(whitelist)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value.trim())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

impl<S: Into<String>> FromIterator<S> for Whitelist {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|value| value.into().trim().to_string())
                .filter(|value| !value.is_empty())
                .collect(),
            origin: None,
        }
    }
}

fn parse_lines(text: &str) -> HashSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Admission predicates applied to each record before it reaches a batch
/// buffer. An unconfigured whitelist admits everything.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    codes: Option<Whitelist>,
    tins: Option<Whitelist>,
}

impl FilterEngine {
    pub fn new(codes: Option<Whitelist>, tins: Option<Whitelist>) -> Self {
        Self { codes, tins }
    }

    /// Loads whichever whitelist files are given. Fails before any
    /// extraction work if a file cannot be read.
    pub fn from_paths(codes: Option<&Path>, tins: Option<&Path>) -> ExtractResult<Self> {
        Ok(Self {
            codes: codes.map(Whitelist::load).transpose()?,
            tins: tins.map(Whitelist::load).transpose()?,
        })
    }

    pub fn code_admitted(&self, code: &str) -> bool {
        self.codes.as_ref().is_none_or(|codes| codes.contains(code))
    }

    pub fn provider_admitted(&self, tin_value: &str) -> bool {
        self.tins.as_ref().is_none_or(|tins| tins.contains(tin_value))
    }

    pub fn filters_codes(&self) -> bool {
        self.codes.is_some()
    }

    pub fn filters_providers(&self) -> bool {
        self.tins.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn no_whitelist_admits_everything() {
        let filter = FilterEngine::default();
        assert!(filter.code_admitted("99213"));
        assert!(filter.code_admitted(""));
        assert!(filter.provider_admitted("123456789"));
        assert!(!filter.filters_codes());
    }

    #[test]
    fn code_whitelist_is_membership() {
        let filter = FilterEngine::new(Some(["99213"].into_iter().collect()), None);
        assert!(filter.code_admitted("99213"));
        assert!(filter.code_admitted(" 99213 "));
        assert!(!filter.code_admitted("99214"));
        assert!(filter.provider_admitted("anything"));
    }

    #[test]
    fn empty_whitelist_admits_nothing() {
        let filter = FilterEngine::new(None, Some(Whitelist::default()));
        assert!(!filter.provider_admitted("123456789"));
        assert!(!filter.provider_admitted(""));
    }

    #[test]
    fn loads_one_value_per_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "99213\n\n  99214  \r\n0001U").unwrap();

        let whitelist = Whitelist::load(file.path()).unwrap();
        assert_eq!(whitelist.len(), 3);
        assert!(whitelist.contains("99214"));
        assert!(whitelist.contains("0001U"));
        assert_eq!(whitelist.origin(), Some(file.path()));
    }

    #[test]
    fn missing_file_fails_fast_with_its_path() {
        let err = FilterEngine::from_paths(Some(Path::new("/no/such/cpt_codes.txt")), None).unwrap_err();
        assert!(matches!(err, ExtractError::Whitelist { .. }));
        assert!(err.to_string().contains("/no/such/cpt_codes.txt"));
    }
}
