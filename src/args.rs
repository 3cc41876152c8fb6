use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mrf_extract::constants::{DEFAULT_PROVIDER_BATCH_SIZE, DEFAULT_RATE_BATCH_SIZE};

#[derive(Debug, Parser)]
#[command(name = "mrf_extract")]
#[command(about = "Stream price-transparency MRF JSON into provider and rate Parquet tables", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract providers and negotiated rates from one MRF file (.json or .json.gz).
    Extract(ExtractArgs),
    /// Print the detected schema mode and header metadata as JSON.
    Detect(DetectArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Local MRF document, optionally gzip-compressed.
    pub input: PathBuf,

    /// Directory the providers and rates Parquet files are written to.
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Suffix appended to output file names (providers_<prefix>.parquet).
    #[arg(long)]
    pub output_prefix: Option<String>,

    /// Provider rows buffered per Parquet row group.
    #[arg(long, default_value_t = DEFAULT_PROVIDER_BATCH_SIZE)]
    pub provider_batch_size: usize,

    /// Rate rows buffered per Parquet row group.
    #[arg(long, default_value_t = DEFAULT_RATE_BATCH_SIZE)]
    pub rate_batch_size: usize,

    /// Billing code whitelist, one code per line.
    #[arg(long)]
    pub cpt_whitelist: Option<PathBuf>,

    /// Tax id whitelist, one id per line.
    #[arg(long)]
    pub tin_whitelist: Option<PathBuf>,

    /// Stop after this many in_network items.
    #[arg(long)]
    pub max_items: Option<u64>,

    /// Stop after this many minutes of extraction.
    #[arg(long)]
    pub max_time: Option<u64>,

    /// Read at most this many provider references.
    #[arg(long)]
    pub max_provider_references: Option<u64>,

    /// Fail the run once more than this many malformed entries were skipped.
    #[arg(long)]
    pub max_malformed: Option<u64>,

    /// Plan name stamped on rate rows when the file names none. Repeatable.
    #[arg(long)]
    pub plan_name: Vec<String>,

    /// Plan id stamped on rate rows when the file names none. Repeatable.
    #[arg(long)]
    pub plan_id: Vec<String>,

    /// Plan id type (e.g. EIN, HIOS) stamped when the file names none. Repeatable.
    #[arg(long)]
    pub plan_id_type: Vec<String>,

    /// Plan market type (group, individual) stamped when the file names none. Repeatable.
    #[arg(long)]
    pub plan_market_type: Vec<String>,

    /// Network identifier written on every row.
    #[arg(long)]
    pub network_id: Option<String>,

    /// Hide the progress spinner.
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DetectArgs {
    /// Local MRF document, optionally gzip-compressed.
    pub input: PathBuf,
}
