use std::{
    collections::{BTreeMap, HashSet},
    str::FromStr,
};

use chrono::{Duration, NaiveDate};
use itertools::Itertools;
use polars::prelude::*;
use tracing::{info, warn};

use crate::{
    catalog::{
        definition::frame_to_definitions,
        venue::{InstrumentType, Product, Venue},
    },
    error::{CatalogError, SystemError, TickforgeResult},
    storage::{TickStore, paths},
};

/// Optional inclusion filters, applied symmetrically to the expected and the
/// available side so restriction never breaks `available ⊆ expected`.
#[derive(Debug, Clone, Default)]
pub struct MissingFilters {
    pub venues: Option<Vec<Venue>>,
    pub instrument_types: Option<Vec<InstrumentType>>,
    pub products: Option<Vec<Product>>,
}

impl MissingFilters {
    fn admits(&self, venue: Venue, instrument_type: InstrumentType, product: Product) -> bool {
        if let Some(venues) = &self.venues
            && !venues.contains(&venue)
        {
            return false;
        }
        if let Some(types) = &self.instrument_types
            && !types.contains(&instrument_type)
        {
            return false;
        }
        if let Some(products) = &self.products
            && !products.contains(&product)
        {
            return false;
        }
        true
    }

    fn venues_label(&self) -> String {
        label(self.venues.as_ref().map(|v| v.iter().join(",")))
    }

    fn types_label(&self) -> String {
        label(self.instrument_types.as_ref().map(|v| v.iter().join(",")))
    }

    fn products_label(&self) -> String {
        label(self.products.as_ref().map(|v| v.iter().join(",")))
    }
}

fn label(joined: Option<String>) -> String {
    joined.unwrap_or_else(|| "all".to_string())
}

/// One expected-but-absent tick file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MissingEntry {
    pub date: NaiveDate,
    pub instrument_key: String,
    pub product: Product,
}

/// Aggregate statistics for one detection run.
#[derive(Debug, Default)]
pub struct MissingDataSummary {
    pub total_days: usize,
    pub days_checked: usize,
    pub days_with_missing: usize,
    pub total_expected: usize,
    pub total_missing: usize,
    pub by_product: BTreeMap<String, usize>,
    pub by_instrument: BTreeMap<String, usize>,
    pub report_paths: Vec<String>,
    pub entries: Vec<MissingEntry>,
}

impl MissingDataSummary {
    /// Share of expected files present, in percent. 100 when nothing was
    /// expected.
    pub fn coverage_percentage(&self) -> f64 {
        if self.total_expected == 0 {
            return 100.0;
        }
        (self.total_expected - self.total_missing) as f64 / self.total_expected as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.total_missing == 0
    }
}

/// C3: compares the catalog's expectations against the tick-data inventory
/// and writes one queryable report per day with gaps.
pub struct MissingDataDetector {
    store: TickStore,
}

impl MissingDataDetector {
    pub fn new(store: TickStore) -> Self {
        Self { store }
    }

    /// Detects missing `(date, instrument, product)` tuples over the range.
    /// Re-running on unchanged inputs produces bit-identical reports: rows
    /// are sorted and the generation stamp derives from the report date.
    #[tracing::instrument(skip(self, filters))]
    pub async fn detect(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        filters: &MissingFilters,
    ) -> TickforgeResult<MissingDataSummary> {
        let mut summary = MissingDataSummary::default();

        let mut date = start;
        while date <= end {
            summary.total_days += 1;
            self.detect_date(date, filters, &mut summary).await?;
            date += Duration::days(1);
        }

        info!(
            days = summary.days_checked,
            expected = summary.total_expected,
            missing = summary.total_missing,
            coverage = format!("{:.1}%", summary.coverage_percentage()),
            "Missing-data detection completed"
        );
        Ok(summary)
    }

    async fn detect_date(
        &self,
        date: NaiveDate,
        filters: &MissingFilters,
        summary: &mut MissingDataSummary,
    ) -> TickforgeResult<()> {
        let Some((expected, expected_universe)) = self.expected_for_date(date, filters).await?
        else {
            warn!(%date, "No catalog for date; skipping");
            return Ok(());
        };
        summary.days_checked += 1;
        summary.total_expected += expected.len();

        let available = self
            .available_for_date(date, filters, &expected, &expected_universe)
            .await?;

        let missing: Vec<MissingEntry> = expected
            .iter()
            .filter(|pair| !available.contains(*pair))
            .map(|(key, product)| MissingEntry {
                date,
                instrument_key: key.clone(),
                product: *product,
            })
            .sorted()
            .collect();

        let report_path = paths::missing_report(date);
        if missing.is_empty() {
            // Keep the report store consistent with the inventory: a day
            // with no gaps must not advertise stale ones.
            if self.store.exists(&report_path).await? {
                self.store.delete(&report_path).await?;
                info!(%date, "Removed stale missing-data report");
            }
            return Ok(());
        }

        info!(%date, missing = missing.len(), "Writing missing-data report");
        let mut frame = missing_entries_to_frame(&missing, date, filters)?;
        self.store.put_frame(&report_path, &mut frame).await?;

        summary.days_with_missing += 1;
        summary.total_missing += missing.len();
        summary.report_paths.push(report_path);
        for entry in &missing {
            *summary
                .by_product
                .entry(entry.product.to_string())
                .or_default() += 1;
            *summary
                .by_instrument
                .entry(entry.instrument_key.clone())
                .or_default() += 1;
        }
        summary.entries.extend(missing);
        Ok(())
    }

    /// The expected set for one date: catalog rows (with legacy-layout
    /// fallbacks) exploded over their product lists. Returns both the
    /// filtered set and the unfiltered universe, plus `None` when no catalog
    /// exists for the date.
    async fn expected_for_date(
        &self,
        date: NaiveDate,
        filters: &MissingFilters,
    ) -> TickforgeResult<Option<(HashSet<(String, Product)>, HashSet<(String, Product)>)>> {
        let Some((frame, path)) = self
            .store
            .get_frame_with_fallbacks(&paths::catalog_read_candidates(date))
            .await?
        else {
            return Ok(None);
        };
        info!(%date, path, "Loaded catalog");

        let (definitions, failures) = frame_to_definitions(&frame)?;
        if !failures.is_empty() {
            warn!(%date, count = failures.len(), "Catalog rows failed to decode");
        }

        let mut filtered = HashSet::new();
        let mut universe = HashSet::new();
        for definition in &definitions {
            if !definition.available_in_range(date, date) {
                continue;
            }
            for product in &definition.data_types {
                let pair = (definition.key.to_string(), *product);
                universe.insert(pair.clone());
                if filters.admits(definition.venue(), definition.instrument_type(), *product) {
                    filtered.insert(pair);
                }
            }
        }
        Ok(Some((filtered, universe)))
    }

    /// The available set for one date, from the object-store inventory.
    /// Filters are applied symmetrically; a filtered-available pair missing
    /// from the filtered-expected set while present in the expected universe
    /// means the restriction broke containment — a fatal invariant
    /// violation. Paths that are not catalog-known at all are strays and are
    /// only logged.
    async fn available_for_date(
        &self,
        date: NaiveDate,
        filters: &MissingFilters,
        expected: &HashSet<(String, Product)>,
        expected_universe: &HashSet<(String, Product)>,
    ) -> TickforgeResult<HashSet<(String, Product)>> {
        let prefix = paths::tick_data_day_prefix(date);
        let mut available = HashSet::new();

        for path in self.store.list(&prefix).await? {
            let Some((product_str, instrument_key)) = paths::parse_tick_path(&path) else {
                continue;
            };
            let Ok(product) = Product::from_str(&product_str) else {
                warn!(path, "Unknown product directory in tick store");
                continue;
            };
            let Some((venue, instrument_type)) = key_components(&instrument_key) else {
                warn!(path, "Unparseable instrument key in tick store");
                continue;
            };
            if !filters.admits(venue, instrument_type, product) {
                continue;
            }

            let pair = (instrument_key, product);
            if !expected.contains(&pair) {
                if expected_universe.contains(&pair) {
                    return Err(SystemError::InvariantViolation(format!(
                        "filtering admitted available {}/{} but excluded it from expected",
                        pair.0, pair.1
                    ))
                    .into());
                }
                warn!(key = pair.0, product = %pair.1, "Tick file not in catalog; ignoring");
                continue;
            }
            available.insert(pair);
        }

        Ok(available)
    }
}

fn key_components(instrument_key: &str) -> Option<(Venue, InstrumentType)> {
    let mut parts = instrument_key.splitn(3, ':');
    let venue = Venue::from_str(parts.next()?).ok()?;
    let instrument_type = InstrumentType::from_str(parts.next()?).ok()?;
    Some((venue, instrument_type))
}

/// Report rows, already sorted. `generated_at` derives from the report date
/// so identical inputs produce identical bytes.
fn missing_entries_to_frame(
    entries: &[MissingEntry],
    date: NaiveDate,
    filters: &MissingFilters,
) -> Result<DataFrame, CatalogError> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let generated_at = format!("{date_str}T00:00:00+00:00");
    let n = entries.len();

    DataFrame::new(vec![
        Column::new(
            "date".into(),
            entries.iter().map(|_| date_str.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "instrument_key".into(),
            entries
                .iter()
                .map(|e| e.instrument_key.clone())
                .collect::<Vec<_>>(),
        ),
        Column::new(
            "product".into(),
            entries.iter().map(|e| e.product.to_string()).collect::<Vec<_>>(),
        ),
        Column::new("status".into(), vec!["missing".to_string(); n]),
        Column::new("report_date".into(), vec![date_str.clone(); n]),
        Column::new("venues_filter".into(), vec![filters.venues_label(); n]),
        Column::new("types_filter".into(), vec![filters.types_label(); n]),
        Column::new("products_filter".into(), vec![filters.products_label(); n]),
        Column::new("generated_at".into(), vec![generated_at; n]),
    ])
    .map_err(|e| CatalogError::DataFrame(e.to_string()))
}

/// Renders detail rows as CSV, for `--output` / `--verbose`.
pub fn entries_to_csv(entries: &[MissingEntry]) -> String {
    let mut out = String::from("date,instrument_key,product,status\n");
    for entry in entries {
        out.push_str(&format!(
            "{},{},{},missing\n",
            entry.date.format("%Y-%m-%d"),
            entry.instrument_key,
            entry.product
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_admit_everything_by_default() {
        let filters = MissingFilters::default();
        assert!(filters.admits(Venue::Binance, InstrumentType::SpotPair, Product::Trades));
        assert_eq!(filters.venues_label(), "all");
    }

    #[test]
    fn product_filter_is_exact() {
        let filters = MissingFilters {
            products: Some(vec![Product::BookSnapshot5]),
            ..MissingFilters::default()
        };
        assert!(filters.admits(Venue::Binance, InstrumentType::SpotPair, Product::BookSnapshot5));
        assert!(!filters.admits(Venue::Binance, InstrumentType::SpotPair, Product::Trades));
    }

    #[test]
    fn report_frame_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2023, 5, 23).unwrap();
        let entries = vec![
            MissingEntry {
                date,
                instrument_key: "BINANCE:SPOT_PAIR:BTC-USDT".to_string(),
                product: Product::Trades,
            },
            MissingEntry {
                date,
                instrument_key: "BINANCE:SPOT_PAIR:ETH-USDT".to_string(),
                product: Product::BookSnapshot5,
            },
        ];
        let filters = MissingFilters::default();

        let a = missing_entries_to_frame(&entries, date, &filters).unwrap();
        let b = missing_entries_to_frame(&entries, date, &filters).unwrap();
        assert_eq!(a, b);

        let generated = a.column("generated_at").unwrap().str().unwrap();
        assert_eq!(generated.get(0), Some("2023-05-23T00:00:00+00:00"));
    }

    #[test]
    fn key_components_decode_or_reject() {
        assert_eq!(
            key_components("BINANCE:SPOT_PAIR:BTC-USDT"),
            Some((Venue::Binance, InstrumentType::SpotPair))
        );
        assert_eq!(key_components("garbage"), None);
        assert_eq!(key_components("NOWHERE:SPOT_PAIR:X-Y"), None);
    }

    #[test]
    fn coverage_handles_empty_expectation() {
        let summary = MissingDataSummary::default();
        assert_eq!(summary.coverage_percentage(), 100.0);
        assert!(summary.is_complete());
    }

    #[test]
    fn csv_export_shape() {
        let date = NaiveDate::from_ymd_opt(2023, 5, 23).unwrap();
        let entries = vec![MissingEntry {
            date,
            instrument_key: "BINANCE:SPOT_PAIR:BTC-USDT".to_string(),
            product: Product::Trades,
        }];
        let csv = entries_to_csv(&entries);
        assert_eq!(
            csv,
            "date,instrument_key,product,status\n2023-05-23,BINANCE:SPOT_PAIR:BTC-USDT,trades,missing\n"
        );
    }
}
