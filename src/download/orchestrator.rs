use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::Config,
    download::{schema::parse_product_csv, target::DownloadTarget},
    error::TickforgeResult,
    storage::{TickStore, paths},
    vendor::{client::VendorClient, rate_limit::TokenBucket},
};

/// Terminal state of one download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    /// Fetched, parsed and stored.
    Uploaded { path: String, rows: usize },

    /// The vendor has no data (404) or the file parsed to zero usable rows.
    Empty,

    /// Retries exhausted or the upload failed; the run continues.
    Failed { error: String },
}

/// Outcome of one orchestrator run.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub processed: usize,
    pub failed: usize,
    pub empty: usize,
    pub uploaded_paths: Vec<String>,
    pub per_target_status: Vec<(String, TargetStatus)>,
    pub elapsed: Duration,

    /// Completed targets per second over the whole run.
    pub throughput: f64,
}

impl DownloadReport {
    pub fn total(&self) -> usize {
        self.processed + self.failed + self.empty
    }
}

/// C2: drives fetch → decompress → parse → upload for a set of targets under
/// a host-concurrency semaphore and a global token-bucket budget.
///
/// Targets are processed in batches to bound memory; within a batch all
/// targets run concurrently, gated by the two limits. The HTTP client,
/// object-store handle, semaphore and rate limiter are process-wide and
/// shared across every task; only the limiter's counters mutate after
/// construction.
pub struct DownloadOrchestrator {
    client: Arc<VendorClient>,
    store: TickStore,
    semaphore: Arc<Semaphore>,
    rate_limiter: Arc<TokenBucket>,
    batch_size: usize,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(client: Arc<VendorClient>, store: TickStore, config: &Config) -> Self {
        Self {
            client,
            store,
            semaphore: Arc::new(Semaphore::new(config.vendor.max_concurrent)),
            rate_limiter: Arc::new(TokenBucket::per_day(config.vendor.rate_limit_per_vm)),
            batch_size: config.service.batch_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// A token for cooperative shutdown: cancel it and the orchestrator
    /// finishes in-flight work but starts no further batches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Downloads every target, honoring both gates. No ordering across
    /// targets; per target the fetch → decompress → parse → upload chain is
    /// strictly sequential.
    #[tracing::instrument(skip_all, fields(targets = targets.len()))]
    pub async fn download(&self, targets: Vec<DownloadTarget>) -> TickforgeResult<DownloadReport> {
        let started = Instant::now();
        let total = targets.len();
        let mut report = DownloadReport::default();

        if total == 0 {
            info!("No download targets");
            return Ok(report);
        }

        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::with_template(
                "{bar:40.cyan/blue} {pos}/{len} ({per_sec}, eta {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut batch_index = 0usize;
        for batch in targets.chunks(self.batch_size) {
            if self.cancel.is_cancelled() {
                warn!(
                    completed = report.total(),
                    remaining = total - report.total(),
                    "Cancellation requested; not starting further batches"
                );
                break;
            }
            batch_index += 1;

            let outcomes = join_all(batch.iter().map(|target| self.process(target))).await;
            for (target, status) in batch.iter().zip(outcomes) {
                let label = format!("{}/{}", target.instrument_key, target.product);
                match &status {
                    TargetStatus::Uploaded { path, .. } => {
                        report.processed += 1;
                        report.uploaded_paths.push(path.clone());
                    }
                    TargetStatus::Empty => report.empty += 1,
                    TargetStatus::Failed { error } => {
                        warn!(key = %label, error = %error, "Target failed");
                        report.failed += 1;
                    }
                }
                report.per_target_status.push((label, status));
                progress.inc(1);
            }

            let done = report.total();
            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
            let eta_secs = if rate > 0.0 {
                (total - done) as f64 / rate
            } else {
                0.0
            };
            info!(
                batch = batch_index,
                done,
                total,
                failed = report.failed,
                rate = format!("{rate:.1}/s"),
                eta_min = format!("{:.1}", eta_secs / 60.0),
                "Batch completed"
            );
        }

        progress.finish_and_clear();
        report.elapsed = started.elapsed();
        report.throughput = if report.elapsed.as_secs_f64() > 0.0 {
            report.total() as f64 / report.elapsed.as_secs_f64()
        } else {
            0.0
        };

        info!(
            processed = report.processed,
            empty = report.empty,
            failed = report.failed,
            elapsed_s = report.elapsed.as_secs(),
            "Download run completed"
        );
        Ok(report)
    }

    /// One target, strictly sequential: admission (semaphore), budget
    /// (token), fetch, parse, upload. The permit spans the whole critical
    /// section so uploads count against host concurrency too.
    async fn process(&self, target: &DownloadTarget) -> TargetStatus {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return TargetStatus::Failed {
                    error: "semaphore closed".to_string(),
                };
            }
        };
        self.rate_limiter.acquire().await;

        let fetched = self
            .client
            .fetch_tick_file(
                &target.vendor_exchange,
                target.product,
                target.date,
                &target.vendor_symbol,
            )
            .await;

        let bytes = match fetched {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return TargetStatus::Empty,
            Err(e) => {
                return TargetStatus::Failed {
                    error: e.to_string(),
                };
            }
        };

        // Parse failures on a complete response are recorded as zero rows,
        // never retried.
        let mut frame = match parse_product_csv(bytes, target.product) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    key = target.instrument_key,
                    product = %target.product,
                    error = %e,
                    "Tick file failed to parse"
                );
                return TargetStatus::Empty;
            }
        };
        if frame.height() == 0 {
            return TargetStatus::Empty;
        }

        let rows = frame.height();
        let path = paths::tick_data(target.date, target.product, &target.instrument_key);
        match self.store.put_frame(&path, &mut frame).await {
            Ok(()) => TargetStatus::Uploaded { path, rows },
            Err(e) => TargetStatus::Failed {
                error: e.to_string(),
            },
        }
    }
}
