//! Streaming extraction of price-transparency machine-readable files into
//! two join-consistent Parquet tables (providers and negotiated rates).

pub mod common;
pub mod constants;
pub mod error;
pub mod filter;
pub mod identifier;
pub mod model;
pub mod parquet_writer;
pub mod providers;
pub mod rates;
pub mod run;
pub mod schema;
pub mod source;
pub mod strategy;
pub mod tables;
pub mod tokens;

pub use error::{ExtractError, ExtractResult};
pub use run::{ExtractionConfig, Limits, OutputPaths, RunReport, RunState, StopReason, run_extraction};
pub use schema::{Detection, SchemaMode, detect_path};
