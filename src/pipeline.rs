use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{info, warn};

use crate::{
    catalog::{
        definition::frame_to_definitions,
        generator::{CatalogWriteReport, InstrumentGenerator},
        venue::{InstrumentType, Product, Venue},
    },
    config::Config,
    download::{
        gapfill::{GapDownloader, GapFillReport},
        orchestrator::{DownloadOrchestrator, DownloadReport},
        target::{filter_shard, targets_from_definitions},
    },
    error::TickforgeResult,
    storage::{TickStore, paths},
    validator::missing::{MissingDataDetector, MissingDataSummary, MissingFilters},
    vendor::client::VendorClient,
};

/// Catalog-only existence check: which days in the range lack a per-day
/// instruments file.
#[derive(Debug, Default)]
pub struct GapCheckReport {
    pub total_days: usize,
    pub days_with_catalog: usize,
    pub missing_days: Vec<NaiveDate>,
}

impl GapCheckReport {
    pub fn coverage_percentage(&self) -> f64 {
        if self.total_days == 0 {
            return 100.0;
        }
        self.days_with_catalog as f64 / self.total_days as f64 * 100.0
    }
}

/// Selection applied to catalog rows before deriving download targets.
#[derive(Debug, Clone, Default)]
pub struct DownloadSelection {
    pub venues: Option<Vec<Venue>>,
    pub instrument_types: Option<Vec<InstrumentType>>,
    pub products: Option<Vec<Product>>,
    pub max_instruments: Option<usize>,
}

/// The wiring for every mode: one config, one store handle, one vendor
/// client and one orchestrator, constructed at start and shared for the
/// whole run.
pub struct Pipeline {
    config: Config,
    store: TickStore,
    client: Arc<VendorClient>,
    orchestrator: Arc<DownloadOrchestrator>,
}

impl Pipeline {
    pub fn new(config: Config, store: TickStore) -> TickforgeResult<Self> {
        let client = Arc::new(VendorClient::new(&config.vendor)?);
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            Arc::clone(&client),
            store.clone(),
            &config,
        ));
        Ok(Self {
            config,
            store,
            client,
            orchestrator,
        })
    }

    pub fn store(&self) -> &TickStore {
        &self.store
    }

    /// `instruments` mode: C1 over the range.
    pub async fn run_instruments(
        &self,
        exchanges: Option<Vec<Venue>>,
        start: NaiveDate,
        end: NaiveDate,
        max_workers: usize,
    ) -> TickforgeResult<CatalogWriteReport> {
        let exchanges = exchanges.unwrap_or_else(Venue::default_exchanges);
        let generator = InstrumentGenerator::new(
            Arc::clone(&self.client),
            self.store.clone(),
            max_workers,
        );
        generator.generate(&exchanges, start, end).await
    }

    /// Full-download path: catalog-derived targets for every date in range.
    pub async fn run_download(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        selection: &DownloadSelection,
    ) -> TickforgeResult<DownloadReport> {
        let mut combined = DownloadReport::default();

        let mut date = start;
        while date <= end {
            let targets = self.targets_for_date(date, selection).await?;
            if targets.is_empty() {
                warn!(%date, "No download targets for date");
            } else {
                let report = self.orchestrator.download(targets).await?;
                combined.processed += report.processed;
                combined.failed += report.failed;
                combined.empty += report.empty;
                combined.uploaded_paths.extend(report.uploaded_paths);
                combined.per_target_status.extend(report.per_target_status);
                combined.elapsed += report.elapsed;
            }
            date += Duration::days(1);
        }

        combined.throughput = if combined.elapsed.as_secs_f64() > 0.0 {
            combined.total() as f64 / combined.elapsed.as_secs_f64()
        } else {
            0.0
        };
        Ok(combined)
    }

    async fn targets_for_date(
        &self,
        date: NaiveDate,
        selection: &DownloadSelection,
    ) -> TickforgeResult<Vec<crate::download::target::DownloadTarget>> {
        let Some((frame, path)) = self
            .store
            .get_frame_with_fallbacks(&paths::catalog_read_candidates(date))
            .await?
        else {
            warn!(%date, "No catalog for date");
            return Ok(Vec::new());
        };
        info!(%date, path, "Deriving download targets from catalog");

        let (mut definitions, failures) = frame_to_definitions(&frame)?;
        if !failures.is_empty() {
            warn!(%date, count = failures.len(), "Catalog rows failed to decode");
        }

        definitions.retain(|def| {
            def.available_in_range(date, date)
                && selection
                    .venues
                    .as_ref()
                    .is_none_or(|venues| venues.contains(&def.venue()))
                && selection
                    .instrument_types
                    .as_ref()
                    .is_none_or(|types| types.contains(&def.instrument_type()))
        });

        let mut targets = targets_from_definitions(
            &definitions,
            date,
            selection.products.as_deref(),
            selection.max_instruments,
        );
        if let Some((index, total)) = self.config.sharding.as_pair() {
            targets = filter_shard(targets, index, total)?;
        }
        Ok(targets)
    }

    /// `download` mode: C4, gaps only.
    pub async fn run_gapfill(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TickforgeResult<GapFillReport> {
        let downloader = GapDownloader::new(
            self.store.clone(),
            Arc::clone(&self.orchestrator),
            self.config.sharding.as_pair(),
        );
        downloader.backfill(start, end).await
    }

    /// `validate` mode: C3.
    pub async fn run_validate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        filters: &MissingFilters,
    ) -> TickforgeResult<MissingDataSummary> {
        MissingDataDetector::new(self.store.clone())
            .detect(start, end, filters)
            .await
    }

    /// `check-gaps` mode: a light catalog-only existence sweep.
    pub async fn run_check_gaps(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TickforgeResult<GapCheckReport> {
        let mut report = GapCheckReport::default();

        let mut date = start;
        while date <= end {
            report.total_days += 1;
            if self.store.exists(&paths::daily_catalog(date)).await? {
                report.days_with_catalog += 1;
            } else {
                warn!(%date, "Missing instrument definitions");
                report.missing_days.push(date);
            }
            date += Duration::days(1);
        }

        info!(
            days = report.total_days,
            covered = report.days_with_catalog,
            coverage = format!("{:.1}%", report.coverage_percentage()),
            "Catalog gap check completed"
        );
        Ok(report)
    }

    /// `full-pipeline` mode: C1, then C2 over catalog-derived targets, then
    /// C3. Each stage's report is returned; stage errors inside C1/C2 are
    /// already captured per item and do not abort later stages.
    pub async fn run_full_pipeline(
        &self,
        exchanges: Option<Vec<Venue>>,
        start: NaiveDate,
        end: NaiveDate,
        selection: &DownloadSelection,
        max_workers: usize,
    ) -> TickforgeResult<(CatalogWriteReport, DownloadReport, MissingDataSummary)> {
        info!("Step 1: generating instrument definitions");
        let catalog = self
            .run_instruments(exchanges, start, end, max_workers)
            .await?;

        info!("Step 2: downloading tick data");
        let download = self.run_download(start, end, selection).await?;

        info!("Step 3: validating data completeness");
        let filters = MissingFilters {
            venues: selection.venues.clone(),
            instrument_types: selection.instrument_types.clone(),
            products: selection.products.clone(),
        };
        let validation = self.run_validate(start, end, &filters).await?;

        Ok((catalog, download, validation))
    }
}
