use std::path::PathBuf;

use thiserror::Error;

pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Run-aborting failures. Per-entry problems never become one of these
/// unless the malformed-entry threshold is crossed.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON stream error: {0}")]
    Json(String),

    #[error("not a recognized schema: {0}")]
    UnrecognizedSchema(String),

    #[error("{count} malformed entries exceeded the limit of {limit}")]
    TooManyMalformed { count: u64, limit: u64 },

    #[error("failed reading whitelist {}: {source}", path.display())]
    Whitelist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Output(#[from] anyhow::Error),
}

impl From<json_event_parser::JsonParseError> for ExtractError {
    fn from(err: json_event_parser::JsonParseError) -> Self {
        Self::Json(err.to_string())
    }
}
