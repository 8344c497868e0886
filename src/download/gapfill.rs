use std::{collections::HashMap, str::FromStr, sync::Arc};

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::{
    catalog::{definition::frame_to_definitions, venue::Product},
    download::{
        orchestrator::DownloadOrchestrator,
        target::{DownloadTarget, filter_shard},
    },
    error::{CatalogError, TickforgeResult},
    storage::{TickStore, paths},
};

/// Outcome of one gap-fill run.
#[derive(Debug, Default)]
pub struct GapFillReport {
    pub total_days: usize,
    pub days_with_reports: usize,
    pub hydrated_targets: usize,

    /// Report rows that could not be joined back to the catalog.
    pub skipped_rows: usize,

    pub processed: usize,
    pub failed: usize,
    pub empty: usize,
}

/// C4: turns missing-data reports back into download targets and drives the
/// orchestrator over exactly those gaps.
pub struct GapDownloader {
    store: TickStore,
    orchestrator: Arc<DownloadOrchestrator>,
    sharding: Option<(u32, u32)>,
}

impl GapDownloader {
    pub fn new(
        store: TickStore,
        orchestrator: Arc<DownloadOrchestrator>,
        sharding: Option<(u32, u32)>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            sharding,
        }
    }

    /// Back-fills every date in `[start, end]`. A date without a report has
    /// no known gaps and is skipped; report rows whose catalog entries have
    /// become unreadable are logged and skipped individually.
    #[tracing::instrument(skip(self))]
    pub async fn backfill(&self, start: NaiveDate, end: NaiveDate) -> TickforgeResult<GapFillReport> {
        let mut report = GapFillReport::default();

        let mut date = start;
        while date <= end {
            report.total_days += 1;
            self.backfill_date(date, &mut report).await?;
            date += Duration::days(1);
        }

        info!(
            days = report.total_days,
            with_reports = report.days_with_reports,
            targets = report.hydrated_targets,
            processed = report.processed,
            failed = report.failed,
            "Gap fill completed"
        );
        Ok(report)
    }

    async fn backfill_date(
        &self,
        date: NaiveDate,
        report: &mut GapFillReport,
    ) -> TickforgeResult<()> {
        let report_path = paths::missing_report(date);
        if !self.store.exists(&report_path).await? {
            info!(%date, "No missing-data report; nothing to back-fill");
            return Ok(());
        }
        report.days_with_reports += 1;

        let missing_frame = self.store.get_frame(&report_path).await?;
        let rows = decode_missing_rows(&missing_frame)?;
        if rows.is_empty() {
            return Ok(());
        }

        // Re-hydrate vendor identifiers by joining back to the day's catalog.
        let catalog = self
            .store
            .get_frame_with_fallbacks(&paths::catalog_read_candidates(date))
            .await?;
        let Some((catalog_frame, catalog_path)) = catalog else {
            warn!(%date, rows = rows.len(), "Catalog unreadable; skipping every report row");
            report.skipped_rows += rows.len();
            return Ok(());
        };
        let (definitions, decode_failures) = frame_to_definitions(&catalog_frame)?;
        if !decode_failures.is_empty() {
            warn!(
                %date,
                path = catalog_path,
                failures = decode_failures.len(),
                "Some catalog rows failed to decode"
            );
        }
        let by_key: HashMap<String, _> = definitions
            .iter()
            .map(|def| (def.key.to_string(), def))
            .collect();

        let mut targets = Vec::with_capacity(rows.len());
        for (instrument_key, product) in rows {
            let Some(definition) = by_key.get(&instrument_key) else {
                warn!(%date, key = instrument_key, "Report row has no catalog entry; skipping");
                report.skipped_rows += 1;
                continue;
            };
            targets.push(DownloadTarget {
                instrument_key,
                vendor_exchange: definition.vendor_exchange.clone(),
                vendor_symbol: definition.vendor_symbol.clone(),
                product,
                date,
            });
        }

        if let Some((index, total)) = self.sharding {
            targets = filter_shard(targets, index, total)?;
        }
        if targets.is_empty() {
            return Ok(());
        }

        report.hydrated_targets += targets.len();
        info!(%date, targets = targets.len(), "Back-filling missing targets");

        let outcome = self.orchestrator.download(targets).await?;
        report.processed += outcome.processed;
        report.failed += outcome.failed;
        report.empty += outcome.empty;
        Ok(())
    }
}

/// Decodes `(instrument_key, product)` pairs from a missing-data report
/// frame. Rows with an unknown product are dropped with a warning.
fn decode_missing_rows(frame: &polars::prelude::DataFrame) -> TickforgeResult<Vec<(String, Product)>> {
    let keys = frame
        .column("instrument_key")
        .and_then(|c| c.str())
        .map_err(|e| CatalogError::DataFrame(e.to_string()))?;
    let products = frame
        .column("product")
        .and_then(|c| c.str())
        .map_err(|e| CatalogError::DataFrame(e.to_string()))?;

    let mut rows = Vec::with_capacity(frame.height());
    for i in 0..frame.height() {
        let key = keys.get(i).unwrap_or_default();
        let product_str = products.get(i).unwrap_or_default();
        match Product::from_str(product_str) {
            Ok(product) => rows.push((key.to_string(), product)),
            Err(_) => warn!(key, product = product_str, "Unknown product in report row"),
        }
    }
    Ok(rows)
}
