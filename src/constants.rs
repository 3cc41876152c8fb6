pub const DEFAULT_PROVIDER_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_RATE_BATCH_SIZE: usize = 20_000;

/// Decoded bytes the schema detector may read before giving up.
pub const PREFIX_SCAN_MAX_BYTES: u64 = 256 * 1024 * 1024;
/// Top-level keys the schema detector may examine before giving up.
pub const PREFIX_SCAN_MAX_KEYS: usize = 1024;

/// Nesting levels one built value may have; deeper input is rejected as corrupt.
pub const MAX_VALUE_DEPTH: usize = 128;

pub const KEY_PROVIDER_REFERENCES: &str = "provider_references";
pub const KEY_IN_NETWORK: &str = "in_network";

pub const LOG_TRUNCATE_CHARS: usize = 300;
pub const PROGRESS_TICK_ITEMS: u64 = 100;
