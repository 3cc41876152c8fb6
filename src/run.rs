use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    common::{mebibytes, truncate_for_log},
    constants::{DEFAULT_PROVIDER_BATCH_SIZE, DEFAULT_RATE_BATCH_SIZE, PROGRESS_TICK_ITEMS},
    error::{ExtractError, ExtractResult},
    filter::FilterEngine,
    model::{PlanMetadata, ProviderRow, RateRow, RowStamp},
    parquet_writer::{BatchedTableWriter, TableSummary},
    schema::{SchemaMode, detect_path},
    source::{ByteCounter, open_input},
    strategy::{InlineStrategy, ModeStrategy, ReferencedStrategy},
    tables::{PROVIDERS_TABLE, RATES_TABLE},
    tokens::TokenStream,
};

/// Malformed entries logged individually before the log goes quiet.
const MALFORMED_WARN_LIMIT: u64 = 20;

#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// `in_network` items to process before stopping.
    pub max_items: Option<u64>,
    pub max_duration: Option<Duration>,
    /// Provider references to read; the rest of that section is skipped.
    pub max_provider_references: Option<u64>,
    /// Malformed entries tolerated before the run fails.
    pub max_malformed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub provider_batch_size: usize,
    pub rate_batch_size: usize,
    pub filter: FilterEngine,
    pub limits: Limits,
    pub plan: PlanMetadata,
    pub network_id: Option<String>,
    pub show_progress: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider_batch_size: DEFAULT_PROVIDER_BATCH_SIZE,
            rate_batch_size: DEFAULT_RATE_BATCH_SIZE,
            filter: FilterEngine::default(),
            limits: Limits::default(),
            plan: PlanMetadata::default(),
            network_id: None,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub providers: PathBuf,
    pub rates: PathBuf,
}

impl OutputPaths {
    pub fn in_dir(dir: &Path, prefix: Option<&str>) -> Self {
        let name = |table: &str| match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{table}_{prefix}.parquet"),
            None => format!("{table}.parquet"),
        };
        Self {
            providers: dir.join(name(PROVIDERS_TABLE)),
            rates: dir.join(name(RATES_TABLE)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Detecting,
    Extracting,
    Flushing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Extracting => "extracting",
            Self::Flushing => "flushing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a run finished before the end of its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ItemLimit,
    TimeLimit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Counters {
    pub provider_references_seen: u64,
    pub provider_references_skipped: u64,
    pub remote_provider_references: u64,
    pub duplicate_provider_references: u64,
    pub provider_groups_admitted: u64,
    pub provider_groups_rejected: u64,
    pub in_network_items_seen: u64,
    pub items_rejected_by_code: u64,
    pub rate_groups_seen: u64,
    pub references_dropped: u64,
    pub malformed_entries: u64,
    pub provider_rows: u64,
    pub rate_rows: u64,
    pub bytes_read: u64,
}

/// Per-run mutable state: lifecycle, counters, limits and progress display.
/// Owned by exactly one run, so concurrent runs share nothing.
pub struct RunContext {
    state: RunState,
    started: Instant,
    limits: Limits,
    bytes: ByteCounter,
    progress: ProgressBar,
    pub counters: Counters,
}

impl RunContext {
    pub fn new(limits: Limits, show_progress: bool) -> Self {
        let progress = if show_progress {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} {prefix:.bold} [{elapsed_precise}] {msg}",
            ) {
                bar.set_style(style);
            }
            bar.set_prefix("MRF");
            bar.enable_steady_tick(Duration::from_millis(250));
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            state: RunState::Idle,
            started: Instant::now(),
            limits,
            bytes: ByteCounter::default(),
            progress,
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn transition(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn attach_bytes(&mut self, bytes: ByteCounter) {
        self.bytes = bytes;
    }

    /// Item and wall-clock limits, checked between extraction steps.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self
            .limits
            .max_items
            .is_some_and(|max| self.counters.in_network_items_seen >= max)
        {
            return Some(StopReason::ItemLimit);
        }
        if self.limits.max_duration.is_some_and(|max| self.elapsed() >= max) {
            return Some(StopReason::TimeLimit);
        }
        None
    }

    pub fn provider_cap_reached(&self) -> bool {
        self.limits
            .max_provider_references
            .is_some_and(|max| self.counters.provider_references_seen >= max)
    }

    /// Counts a skipped entry. Fails the run once the configured threshold is
    /// exceeded.
    pub fn record_malformed(&mut self, what: &str, detail: &str) -> ExtractResult<()> {
        self.counters.malformed_entries += 1;
        let count = self.counters.malformed_entries;
        if count <= MALFORMED_WARN_LIMIT {
            warn!("Skipping malformed {what}: {}", truncate_for_log(detail));
        } else if count == MALFORMED_WARN_LIMIT + 1 {
            warn!("Further malformed entries are counted without logging");
        }
        match self.limits.max_malformed {
            Some(limit) if count > limit => Err(ExtractError::TooManyMalformed { count, limit }),
            _ => Ok(()),
        }
    }

    pub fn tick(&mut self) {
        let seen = self.counters.in_network_items_seen + self.counters.provider_references_seen;
        if seen % PROGRESS_TICK_ITEMS == 0 {
            self.progress.set_message(format!(
                "{} refs, {} items, {} provider rows, {} rate rows, {} MiB read",
                self.counters.provider_references_seen,
                self.counters.in_network_items_seen,
                self.counters.provider_rows,
                self.counters.rate_rows,
                mebibytes(self.bytes.get())
            ));
        }
    }

    fn settle(&mut self) {
        self.counters.bytes_read = self.bytes.get();
        self.progress.finish_and_clear();
    }
}

/// Everything an extraction pass touches while walking one document.
pub struct Session<'a> {
    pub ctx: RunContext,
    pub filter: &'a FilterEngine,
    pub stamp: RowStamp,
    pub providers: BatchedTableWriter<ProviderRow>,
    pub rates: BatchedTableWriter<RateRow>,
}

/// Result of one run, returned to the caller for aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub success: bool,
    pub state: RunState,
    pub mode: Option<SchemaMode>,
    pub elapsed_seconds: f64,
    pub provider_rows: u64,
    pub rate_rows: u64,
    pub stop_reason: Option<StopReason>,
    pub counters: Counters,
    pub providers: Option<TableSummary>,
    pub rates: Option<TableSummary>,
    pub error: Option<String>,
}

/// Detects the schema of `input`, streams it once more through the matching
/// strategy and writes both tables. Never panics or returns early on a
/// fatal error: the report carries the failure and whatever was flushed.
pub fn run_extraction(input: &Path, outputs: &OutputPaths, config: &ExtractionConfig) -> RunReport {
    let mut ctx = RunContext::new(config.limits.clone(), config.show_progress);
    info!("Extracting {}", input.display());

    ctx.transition(RunState::Detecting);
    let detection = match detect_path(input) {
        Ok(detection) => detection,
        Err(err) => return failed_report(input, ctx, None, None, None, &err),
    };
    let mode = detection.mode;

    let providers = match BatchedTableWriter::try_new(&outputs.providers, config.provider_batch_size) {
        Ok(writer) => writer,
        Err(err) => return failed_report(input, ctx, Some(mode), None, None, &ExtractError::from(err)),
    };
    let rates = match BatchedTableWriter::try_new(&outputs.rates, config.rate_batch_size) {
        Ok(writer) => writer,
        Err(err) => {
            let _ = providers.abort();
            return failed_report(input, ctx, Some(mode), None, None, &ExtractError::from(err));
        }
    };

    let mut session = Session {
        ctx,
        filter: &config.filter,
        stamp: RowStamp::new(detection.metadata, &config.plan, config.network_id.clone()),
        providers,
        rates,
    };

    session.ctx.transition(RunState::Extracting);
    let outcome = match mode {
        SchemaMode::Referenced => stream_document(input, &mut ReferencedStrategy::default(), &mut session),
        SchemaMode::Inline => stream_document(input, &mut InlineStrategy::default(), &mut session),
    };

    let Session {
        mut ctx,
        providers,
        rates,
        ..
    } = session;

    // Fatal or not, everything admitted so far is sealed into the outputs.
    ctx.transition(RunState::Flushing);
    let (providers, rates) = match (providers.finish(), rates.finish()) {
        (Ok(providers), Ok(rates)) => (Some(providers), Some(rates)),
        (Err(err), _) | (_, Err(err)) => {
            return failed_report(input, ctx, Some(mode), None, None, &ExtractError::from(err));
        }
    };

    match outcome {
        Ok(stop_reason) => {
            if let Some(reason) = stop_reason {
                info!("Stopped early: {reason:?}");
            }
            ctx.transition(RunState::Done);
            ctx.settle();
            let report = RunReport {
                input: input.to_path_buf(),
                success: true,
                state: ctx.state(),
                mode: Some(mode),
                elapsed_seconds: ctx.elapsed().as_secs_f64(),
                provider_rows: providers.as_ref().map_or(0, |t| t.rows_written),
                rate_rows: rates.as_ref().map_or(0, |t| t.rows_written),
                stop_reason,
                counters: ctx.counters,
                providers,
                rates,
                error: None,
            };
            info!(
                "Finished {} in {:.1}s: {} provider rows, {} rate rows",
                input.display(),
                report.elapsed_seconds,
                report.provider_rows,
                report.rate_rows
            );
            report
        }
        Err(err) => failed_report(input, ctx, Some(mode), providers, rates, &err),
    }
}

/// Second forward pass: reopen the input and let the strategy walk it.
fn stream_document<S: ModeStrategy>(
    input: &Path,
    strategy: &mut S,
    session: &mut Session<'_>,
) -> ExtractResult<Option<StopReason>> {
    let (reader, bytes) = open_input(input)?;
    session.ctx.attach_bytes(bytes);
    let mut tokens = TokenStream::new(reader);
    let flow = strategy.extract(&mut tokens, session)?;
    Ok(flow.break_value())
}

fn failed_report(
    input: &Path,
    mut ctx: RunContext,
    mode: Option<SchemaMode>,
    providers: Option<TableSummary>,
    rates: Option<TableSummary>,
    err: &ExtractError,
) -> RunReport {
    ctx.transition(RunState::Failed);
    ctx.settle();
    let message = truncate_for_log(&format!("{err:#}"));
    error!("Extraction of {} failed: {message}", input.display());
    RunReport {
        input: input.to_path_buf(),
        success: false,
        state: ctx.state(),
        mode,
        elapsed_seconds: ctx.elapsed().as_secs_f64(),
        provider_rows: providers.as_ref().map_or(0, |t| t.rows_written),
        rate_rows: rates.as_ref().map_or(0, |t| t.rows_written),
        stop_reason: None,
        counters: ctx.counters,
        providers,
        rates,
        error: Some(message),
    }
}
