mod args;

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{fs, time::Duration};

use args::{Args, Command, DetectArgs, ExtractArgs};
use mrf_extract::{
    ExtractionConfig, Limits, OutputPaths, detect_path, filter::FilterEngine, model::PlanMetadata,
    run_extraction,
};

fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

fn extraction_config(args: &ExtractArgs) -> Result<ExtractionConfig> {
    let filter = FilterEngine::from_paths(args.cpt_whitelist.as_deref(), args.tin_whitelist.as_deref())
        .context("Failed loading whitelists")?;

    Ok(ExtractionConfig {
        provider_batch_size: args.provider_batch_size,
        rate_batch_size: args.rate_batch_size,
        filter,
        limits: Limits {
            max_items: args.max_items,
            max_duration: args.max_time.map(minutes_to_duration),
            max_provider_references: args.max_provider_references,
            max_malformed: args.max_malformed,
        },
        plan: PlanMetadata {
            plan_name: args.plan_name.clone(),
            plan_id: args.plan_id.clone(),
            plan_id_type: args.plan_id_type.clone(),
            plan_market_type: args.plan_market_type.clone(),
        },
        network_id: args.network_id.clone(),
        show_progress: !args.no_progress,
    })
}

fn extract(args: ExtractArgs) -> Result<()> {
    let config = extraction_config(&args)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed creating {}", args.output_dir.display()))?;
    let outputs = OutputPaths::in_dir(&args.output_dir, args.output_prefix.as_deref());

    let report = run_extraction(&args.input, &outputs, &config);
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed serializing run report")?
    );

    if !report.success {
        bail!(
            "extraction of {} failed: {}",
            args.input.display(),
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn detect(args: DetectArgs) -> Result<()> {
    let detection = detect_path(&args.input)
        .with_context(|| format!("Failed detecting schema of {}", args.input.display()))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&detection).context("Failed serializing detection")?
    );
    Ok(())
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.cmd {
        Command::Extract(cmd) => extract(cmd).context("extract failed"),
        Command::Detect(cmd) => detect(cmd).context("detect failed"),
    }
}
