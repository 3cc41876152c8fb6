use serde::Serialize;
use std::{fmt, io::Read, path::Path};
use tracing::{debug, info};

use crate::{
    constants::{KEY_IN_NETWORK, KEY_PROVIDER_REFERENCES, PREFIX_SCAN_MAX_BYTES, PREFIX_SCAN_MAX_KEYS},
    error::{ExtractError, ExtractResult},
    model::FileMetadata,
    source::{CountingReader, open_input},
    tokens::TokenStream,
};

/// Which of the two publisher layouts a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// Provider groups listed once under `provider_references`, rates point
    /// at them by integer id.
    Referenced,
    /// Provider groups embedded in every negotiated-rate group.
    Inline,
}

impl fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Referenced => f.write_str("referenced"),
            Self::Inline => f.write_str("inline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub mode: SchemaMode,
    pub metadata: FileMetadata,
    pub keys_scanned: usize,
}

/// How far the detector may read before declaring the document unrecognized.
#[derive(Debug, Clone, Copy)]
pub struct ScanBounds {
    pub max_bytes: u64,
    pub max_keys: usize,
}

impl Default for ScanBounds {
    fn default() -> Self {
        Self {
            max_bytes: PREFIX_SCAN_MAX_BYTES,
            max_keys: PREFIX_SCAN_MAX_KEYS,
        }
    }
}

pub fn detect_schema<R: Read>(reader: R) -> ExtractResult<Detection> {
    detect_schema_within(reader, ScanBounds::default())
}

/// Walks top-level keys until the first of `provider_references` or
/// `in_network`. Header scalars met on the way are captured; any other value
/// is skipped without being built.
pub fn detect_schema_within<R: Read>(reader: R, bounds: ScanBounds) -> ExtractResult<Detection> {
    let (reader, bytes) = CountingReader::new(reader);
    let mut tokens = TokenStream::new(reader);
    tokens.begin_root()?;

    let mut metadata = FileMetadata::default();
    let mut keys_scanned = 0usize;

    while let Some(key) = tokens.next_key()? {
        keys_scanned += 1;
        let mode = match key.as_str() {
            KEY_PROVIDER_REFERENCES => Some(SchemaMode::Referenced),
            KEY_IN_NETWORK => Some(SchemaMode::Inline),
            _ => None,
        };
        if let Some(mode) = mode {
            debug!(%mode, keys_scanned, bytes = bytes.get(), "schema decided");
            return Ok(Detection {
                mode,
                metadata,
                keys_scanned,
            });
        }

        let within = || bytes.get() <= bounds.max_bytes;
        let completed = if FileMetadata::is_header_key(&key) {
            let value = tokens.read_value()?;
            metadata.absorb(&key, &value);
            true
        } else {
            tokens.skip_value_while(within)?
        };

        if !completed || keys_scanned >= bounds.max_keys || !within() {
            return Err(ExtractError::UnrecognizedSchema(format!(
                "no {KEY_PROVIDER_REFERENCES} or {KEY_IN_NETWORK} within the first {keys_scanned} keys ({} bytes)",
                bytes.get()
            )));
        }
    }

    Err(ExtractError::UnrecognizedSchema(format!(
        "document has neither {KEY_PROVIDER_REFERENCES} nor {KEY_IN_NETWORK}"
    )))
}

pub fn detect_path(path: &Path) -> ExtractResult<Detection> {
    let (reader, _) = open_input(path)?;
    let detection = detect_schema(reader)?;
    info!(
        "Detected {} schema in {} (entity: {})",
        detection.mode,
        path.display(),
        detection
            .metadata
            .reporting_entity_name
            .as_deref()
            .unwrap_or("unknown")
    );
    Ok(detection)
}
