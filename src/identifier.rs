//! Deterministic provider-group ids for documents that embed provider
//! groups inside each rate instead of listing them once.
//!
//! Canonical form (scheme `v1`):
//!
//! ```text
//! mrf-group-v1|<npi>,<npi>,...|<tin type>|<tin value>
//! ```
//!
//! NPIs are trimmed, blank entries dropped, then sorted byte-wise and
//! de-duplicated. The tin type is trimmed and ASCII-lowercased; the tin
//! value is trimmed. The SHA-256 digest of that text is read as a big-endian
//! `u64` from its first eight bytes with the sign bit cleared, so ids are
//! always non-negative `i64` values that fit the Parquet `INT64` column.
//!
//! The canonical form is part of the output contract: changing any rule
//! above changes every synthesized id and needs a new scheme tag.

use sha2::{Digest, Sha256};

pub const SYNTHESIS_SCHEME: &str = "mrf-group-v1";

/// Sorted, de-duplicated, trimmed NPI list.
pub fn canonical_npis<S: AsRef<str>>(npis: &[S]) -> Vec<String> {
    let mut out: Vec<String> = npis
        .iter()
        .map(|npi| npi.as_ref().trim())
        .filter(|npi| !npi.is_empty())
        .map(str::to_string)
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

pub fn canonical_form<S: AsRef<str>>(npis: &[S], tin_type: &str, tin_value: &str) -> String {
    format!(
        "{SYNTHESIS_SCHEME}|{}|{}|{}",
        canonical_npis(npis).join(","),
        tin_type.trim().to_ascii_lowercase(),
        tin_value.trim()
    )
}

pub fn synthesize_group_id<S: AsRef<str>>(npis: &[S], tin_type: &str, tin_value: &str) -> i64 {
    let digest = Sha256::digest(canonical_form(npis, tin_type, tin_value).as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) & (i64::MAX as u64)) as i64
}
