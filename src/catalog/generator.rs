use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use futures::{StreamExt, stream};
use tracing::{error, info, warn};

use crate::{
    catalog::{
        definition::{InstrumentDefinition, definitions_to_frame, far_future},
        instrument_key::InstrumentKey,
        symbol_parser::{SymbolKind, parse_expiry, parse_symbol},
        venue::{SymbolType, Venue},
    },
    error::{CatalogError, TickforgeResult},
    storage::{TickStore, paths},
    vendor::client::{VendorClient, VendorSymbol},
};

/// Synthetic catalog ids that aggregate whole channels rather than naming a
/// single instrument. `OPTIONS` survives only on Deribit, where it is the
/// options-chain aggregate channel.
const AGGREGATE_IDS: [&str; 4] = ["SPOT", "PERPETUALS", "FUTURES", "COMBOS"];

/// Leveraged-token tickers are never ingested.
const LEVERAGED_TOKENS: [&str; 8] = [
    "BTCUP", "BTCDOWN", "ETHUP", "ETHDOWN", "BNBUP", "BNBDOWN", "ADAUP", "ADADOWN",
];

// ================================================================================================
// Stats & Report
// ================================================================================================

/// Per-exchange symbol-processing counters for one date.
#[derive(Debug, Clone, Default)]
pub struct ParseStats {
    pub total_symbols: usize,
    pub skipped_aggregate: usize,
    pub skipped_date_range: usize,
    pub skipped_filters: usize,
    pub failed_parsing: usize,
    pub generated: usize,
    pub failures: Vec<String>,
}

impl ParseStats {
    pub fn merge(&mut self, other: &ParseStats) {
        self.total_symbols += other.total_symbols;
        self.skipped_aggregate += other.skipped_aggregate;
        self.skipped_date_range += other.skipped_date_range;
        self.skipped_filters += other.skipped_filters;
        self.failed_parsing += other.failed_parsing;
        self.generated += other.generated;
        self.failures.extend(other.failures.iter().cloned());
    }
}

/// Outcome of one catalog-generation run.
#[derive(Debug, Default)]
pub struct CatalogWriteReport {
    pub total_days: usize,
    pub processed_days: usize,
    pub total_instruments: usize,
    pub stats: ParseStats,

    /// Per-day catalog files written, in date order.
    pub daily_paths: Vec<String>,

    /// The aggregate file, when its best-effort write succeeded.
    pub aggregate_path: Option<String>,

    /// Exchange-level failures; none of these abort the run.
    pub errors: Vec<String>,
}

// ================================================================================================
// Generator
// ================================================================================================

/// C1: queries the vendor's per-exchange catalogs and writes per-day
/// instrument definition files plus a range aggregate.
pub struct InstrumentGenerator {
    client: Arc<VendorClient>,
    store: TickStore,
    max_workers: usize,
}

impl InstrumentGenerator {
    pub fn new(client: Arc<VendorClient>, store: TickStore, max_workers: usize) -> Self {
        Self {
            client,
            store,
            max_workers: max_workers.max(1),
        }
    }

    /// Generates catalogs for every date in `[start, end]`. One file per
    /// non-empty day; per-day files are the system of record, the aggregate
    /// is a best-effort convenience view.
    #[tracing::instrument(skip(self, exchanges), fields(exchanges = exchanges.len()))]
    pub async fn generate(
        &self,
        exchanges: &[Venue],
        start: NaiveDate,
        end: NaiveDate,
    ) -> TickforgeResult<CatalogWriteReport> {
        let mut report = CatalogWriteReport::default();
        let mut all_definitions: Vec<InstrumentDefinition> = Vec::new();

        let mut date = start;
        while date <= end {
            report.total_days += 1;
            let daily = self.generate_for_date(exchanges, date, &mut report).await;

            if daily.is_empty() {
                warn!(%date, "No instruments generated for date");
            } else {
                let path = paths::daily_catalog(date);
                let mut frame = definitions_to_frame(&daily)?;
                self.store.put_frame(&path, &mut frame).await?;
                info!(%date, count = daily.len(), path, "Wrote daily catalog");

                report.processed_days += 1;
                report.total_instruments += daily.len();
                report.daily_paths.push(path);
                all_definitions.extend(daily);
            }

            date += Duration::days(1);
        }

        self.write_aggregate(&all_definitions, start, end, &mut report)
            .await;

        info!(
            days = report.processed_days,
            instruments = report.total_instruments,
            parse_failures = report.stats.failed_parsing,
            errors = report.errors.len(),
            "Catalog generation completed"
        );
        Ok(report)
    }

    /// One date: every exchange fetched and parsed concurrently (bounded),
    /// results combined and sorted by instrument key. Exchange failures are
    /// recorded and do not block sibling exchanges.
    async fn generate_for_date(
        &self,
        exchanges: &[Venue],
        date: NaiveDate,
        report: &mut CatalogWriteReport,
    ) -> Vec<InstrumentDefinition> {
        let results: Vec<(Venue, TickforgeResult<(Vec<InstrumentDefinition>, ParseStats)>)> =
            stream::iter(exchanges.iter().copied())
                .map(|venue| {
                    let client = Arc::clone(&self.client);
                    async move {
                        let result = client.exchange_catalog(venue.vendor_id()).await.map(
                            |catalog| {
                                build_definitions(venue, &catalog.available_symbols, date, date)
                            },
                        );
                        (venue, result)
                    }
                })
                .buffer_unordered(self.max_workers)
                .collect()
                .await;

        let mut daily = Vec::new();
        for (venue, result) in results {
            match result {
                Ok((definitions, stats)) => {
                    info!(
                        %venue,
                        %date,
                        generated = stats.generated,
                        failed = stats.failed_parsing,
                        "Processed exchange symbols"
                    );
                    report.stats.merge(&stats);
                    daily.extend(definitions);
                }
                Err(e) => {
                    error!(%venue, %date, error = %e, "Exchange catalog fetch failed");
                    report.errors.push(format!("{venue} {date}: {e}"));
                }
            }
        }

        // Deterministic output: one ordering for identical vendor input.
        daily.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        daily
    }

    /// Rebuilds the aggregate file from the daily files already in the
    /// store, for ranges whose best-effort aggregate write failed. Days
    /// without a daily file are skipped with a warning.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_aggregate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> TickforgeResult<Option<String>> {
        let mut combined: Option<polars::prelude::DataFrame> = None;
        let mut loaded_days = 0usize;

        let mut date = start;
        while date <= end {
            let daily_path = paths::daily_catalog(date);
            match self.store.get_frame_with_fallbacks(&[daily_path]).await? {
                Some((frame, path)) => {
                    info!(%date, rows = frame.height(), path, "Loaded daily catalog");
                    loaded_days += 1;
                    combined = Some(match combined {
                        None => frame,
                        Some(mut acc) => {
                            acc.vstack_mut(&frame)
                                .map_err(|e| CatalogError::DataFrame(e.to_string()))?;
                            acc
                        }
                    });
                }
                None => warn!(%date, "No daily catalog to fold into aggregate"),
            }
            date += Duration::days(1);
        }

        let Some(mut frame) = combined else {
            warn!("No daily catalogs found in range; aggregate not written");
            return Ok(None);
        };

        let path = paths::aggregate_catalog(start, end);
        self.store.put_frame(&path, &mut frame).await?;
        info!(days = loaded_days, rows = frame.height(), path, "Regenerated aggregate catalog");
        Ok(Some(path))
    }

    async fn write_aggregate(
        &self,
        definitions: &[InstrumentDefinition],
        start: NaiveDate,
        end: NaiveDate,
        report: &mut CatalogWriteReport,
    ) {
        if definitions.is_empty() {
            return;
        }
        let path = paths::aggregate_catalog(start, end);
        let result = async {
            let mut frame = definitions_to_frame(definitions)?;
            self.store.put_frame(&path, &mut frame).await
        }
        .await;

        match result {
            Ok(()) => {
                info!(path, rows = definitions.len(), "Wrote aggregate catalog");
                report.aggregate_path = Some(path);
            }
            Err(e) => {
                // Daily files remain valid; the aggregate is a convenience.
                error!(path, error = %e, "Aggregate catalog write failed");
                report.errors.push(format!("aggregate: {e}"));
            }
        }
    }
}

// ================================================================================================
// Symbol → Definition
// ================================================================================================

/// Parses one exchange's symbol list into definitions for the date range.
/// Pure: all vendor I/O happens before this point.
pub fn build_definitions(
    venue: Venue,
    symbols: &[VendorSymbol],
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> (Vec<InstrumentDefinition>, ParseStats) {
    let mut stats = ParseStats {
        total_symbols: symbols.len(),
        ..ParseStats::default()
    };
    // Keyed map so duplicate vendor entries collapse deterministically.
    let mut definitions: BTreeMap<String, InstrumentDefinition> = BTreeMap::new();

    for symbol in symbols {
        match build_one(venue, symbol, range_start, range_end) {
            Outcome::Generated(definition) => {
                stats.generated += 1;
                definitions.insert(definition.key.to_string(), definition);
            }
            Outcome::SkippedAggregate => stats.skipped_aggregate += 1,
            Outcome::SkippedDateRange => stats.skipped_date_range += 1,
            Outcome::SkippedFilter => stats.skipped_filters += 1,
            Outcome::SkippedSilently => {}
            Outcome::Failed(msg) => {
                stats.failed_parsing += 1;
                stats.failures.push(msg);
            }
        }
    }

    (definitions.into_values().collect(), stats)
}

enum Outcome {
    Generated(InstrumentDefinition),
    SkippedAggregate,
    SkippedDateRange,
    SkippedFilter,
    /// Combos are expected to be unparseable; they vanish without a trace.
    SkippedSilently,
    Failed(String),
}

fn build_one(
    venue: Venue,
    symbol: &VendorSymbol,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> Outcome {
    let id = symbol.id.as_str();

    if AGGREGATE_IDS.contains(&id) {
        return Outcome::SkippedAggregate;
    }
    if id == "OPTIONS" && venue != Venue::Deribit {
        return Outcome::SkippedAggregate;
    }

    let symbol_type: SymbolType = match symbol.symbol_type.parse() {
        Ok(t) => t,
        Err(_) => {
            return Outcome::Failed(format!(
                "Unknown symbol type '{}' for {id}",
                symbol.symbol_type
            ));
        }
    };
    let is_combo = symbol_type == SymbolType::Combo;

    let mut available_from = match parse_vendor_timestamp(&symbol.available_since) {
        Ok(ts) => ts,
        Err(_) if is_combo => return Outcome::SkippedSilently,
        Err(e) => return Outcome::Failed(format!("Failed to parse dates for {id}: {e}")),
    };

    // Resolve the availability end: the vendor field when present, a
    // far-future sentinel for non-expiring instruments, otherwise the expiry
    // encoded in the symbol name.
    let name_expiry = parse_expiry(venue, id);
    let (mut available_to, to_from_symbol) = match &symbol.available_to {
        Some(raw) => match parse_vendor_timestamp(raw) {
            Ok(ts) => (ts, false),
            Err(_) if is_combo => return Outcome::SkippedSilently,
            Err(e) => return Outcome::Failed(format!("Failed to parse dates for {id}: {e}")),
        },
        None if !symbol_type.is_expiring() => (far_future(), false),
        None => match name_expiry {
            Some(date) => (midnight(date), true),
            None if is_combo => return Outcome::SkippedSilently,
            None => {
                return Outcome::Failed(format!(
                    "Missing expiry date for {id} ({symbol_type})"
                ));
            }
        },
    };

    // Crypto settlement shift, fixed venue set, only when the vendor stamp
    // sits at midnight. A vendor-reported end is next-day midnight (−16h);
    // a symbol-derived end is the settlement day itself (+8h). Both land on
    // settlement-day 08:00 UTC.
    let expiring = symbol_type.is_expiring();
    if venue.has_settlement_shift() && expiring {
        if available_from.hour() == 0 {
            available_from += Duration::hours(8);
        }
        if available_to.hour() == 0 {
            available_to += if to_from_symbol {
                Duration::hours(8)
            } else {
                Duration::hours(-16)
            };
        }
    }

    if available_from.date_naive() > range_end {
        return Outcome::SkippedDateRange;
    }
    if available_to.date_naive() < range_start {
        return Outcome::SkippedDateRange;
    }

    // Combos that made it this far are still composites; drop them.
    if is_combo {
        return Outcome::SkippedFilter;
    }

    if LEVERAGED_TOKENS.iter().any(|token| id.contains(token)) {
        return Outcome::SkippedFilter;
    }

    let settlement_date = if expiring {
        Some(if venue.has_settlement_shift() {
            available_to.date_naive()
        } else {
            name_expiry.unwrap_or_else(|| available_to.date_naive())
        })
    } else {
        None
    };

    let parsed = match parse_symbol(venue, id, symbol_type, settlement_date) {
        Ok(parsed) => parsed,
        Err(e) => return Outcome::Failed(format!("Failed to parse symbol {id}: {e}")),
    };

    if !venue.quote_whitelist().contains(&parsed.quote.as_str()) {
        return Outcome::SkippedFilter;
    }

    let key = match key_for(venue, &parsed, id) {
        Ok(key) => key,
        Err(e) => return Outcome::Failed(format!("Failed to build key for {id}: {e}")),
    };

    let expiry = settlement_date.map(InstrumentDefinition::settlement_at);
    let underlying = match key.instrument_type {
        crate::catalog::venue::InstrumentType::Future
        | crate::catalog::venue::InstrumentType::Option => Some(key.underlying()),
        _ => None,
    };

    Outcome::Generated(InstrumentDefinition {
        data_types: key.instrument_type.products().to_vec(),
        base_asset: parsed.base.clone(),
        quote_asset: parsed.quote.clone(),
        settle_asset: parsed.settle.clone(),
        exchange_raw_symbol: id.to_string(),
        vendor_symbol: id.to_string(),
        vendor_exchange: venue.vendor_id().to_string(),
        inverse: parsed.settle != parsed.quote,
        expiry,
        strike: match &parsed.kind {
            SymbolKind::Option { strike, .. } => strike.clone(),
            _ => None,
        },
        option_type: match &parsed.kind {
            SymbolKind::Option { kind, .. } => *kind,
            _ => None,
        },
        underlying,
        available_from,
        available_to,
        key,
    })
}

fn key_for(
    venue: Venue,
    parsed: &crate::catalog::symbol_parser::ParsedSymbol,
    id: &str,
) -> Result<InstrumentKey, CatalogError> {
    match &parsed.kind {
        SymbolKind::SpotPair => Ok(InstrumentKey::spot(venue, &parsed.base, &parsed.quote)),
        SymbolKind::Perp => Ok(InstrumentKey::perp(venue, &parsed.base, &parsed.quote)),
        SymbolKind::Future { expiry } => Ok(InstrumentKey::future(
            venue,
            &parsed.base,
            &parsed.quote,
            *expiry,
        )),
        SymbolKind::Option {
            expiry,
            strike,
            kind,
        } => {
            // A strikeless option cannot produce a round-trippable key.
            let (strike, kind) = match (strike, kind) {
                (Some(strike), Some(kind)) => (strike, *kind),
                _ => {
                    return Err(CatalogError::InvalidKey(format!(
                        "option {id} lacks strike or option type"
                    )));
                }
            };
            Ok(InstrumentKey::option(
                venue,
                &parsed.base,
                &parsed.quote,
                *expiry,
                strike,
                kind,
            ))
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

/// Vendor timestamps are ISO-8601, usually with a trailing `Z`; naive stamps
/// are taken as UTC.
fn parse_vendor_timestamp(raw: &str) -> Result<DateTime<Utc>, CatalogError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<chrono::NaiveDateTime>()
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| CatalogError::InvalidTimestamp {
            value: raw.to_string(),
            msg: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::venue::{InstrumentType, OptionKind};

    fn symbol(id: &str, symbol_type: &str, since: &str, to: Option<&str>) -> VendorSymbol {
        VendorSymbol {
            id: id.to_string(),
            symbol_type: symbol_type.to_string(),
            available_since: since.to_string(),
            available_to: to.map(str::to_string),
        }
    }

    fn may_2023() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2023, 5, 23).unwrap(),
            NaiveDate::from_ymd_opt(2023, 5, 23).unwrap(),
        )
    }

    #[test]
    fn spot_symbol_generates_definition_with_sentinel() {
        let (start, end) = may_2023();
        let symbols = [symbol("BTCUSDT", "spot", "2019-01-01T00:00:00.000Z", None)];
        let (defs, stats) = build_definitions(Venue::Binance, &symbols, start, end);

        assert_eq!(stats.generated, 1);
        let def = &defs[0];
        assert_eq!(def.key.to_string(), "BINANCE:SPOT_PAIR:BTC-USDT");
        assert_eq!(def.available_to, far_future());
        assert_eq!(def.data_types, InstrumentType::SpotPair.products().to_vec());
        assert!(!def.inverse);
        assert!(def.underlying.is_none());
    }

    #[test]
    fn aggregate_ids_are_skipped() {
        let (start, end) = may_2023();
        let symbols = [
            symbol("SPOT", "spot", "2019-01-01T00:00:00Z", None),
            symbol("PERPETUALS", "perpetual", "2019-01-01T00:00:00Z", None),
            symbol("FUTURES", "future", "2019-01-01T00:00:00Z", None),
            symbol("COMBOS", "combo", "2019-01-01T00:00:00Z", None),
        ];
        let (defs, stats) = build_definitions(Venue::Binance, &symbols, start, end);
        assert!(defs.is_empty());
        assert_eq!(stats.skipped_aggregate, 4);
        assert_eq!(stats.failed_parsing, 0);
    }

    #[test]
    fn options_aggregate_survives_only_on_deribit_filter() {
        let (start, end) = may_2023();
        let symbols = [symbol("OPTIONS", "option", "2019-01-01T00:00:00Z", None)];

        let (_, stats) = build_definitions(Venue::Binance, &symbols, start, end);
        assert_eq!(stats.skipped_aggregate, 1);

        // On Deribit it passes the aggregate filter and is rejected later
        // for having no parseable expiry.
        let (_, stats) = build_definitions(Venue::Deribit, &symbols, start, end);
        assert_eq!(stats.skipped_aggregate, 0);
        assert_eq!(stats.failed_parsing, 1);
    }

    #[test]
    fn quote_whitelist_filters_by_venue() {
        let (start, end) = may_2023();
        let symbols = [
            symbol("BTCUSDT", "spot", "2019-01-01T00:00:00Z", None),
            symbol("BTCEUR", "spot", "2019-01-01T00:00:00Z", None),
        ];
        let (defs, stats) = build_definitions(Venue::Binance, &symbols, start, end);
        assert_eq!(defs.len(), 1);
        assert_eq!(stats.skipped_filters, 1);
    }

    #[test]
    fn upbit_only_keeps_krw() {
        let (start, end) = may_2023();
        let symbols = [
            symbol("BTC-KRW", "spot", "2019-01-01T00:00:00Z", None),
            symbol("BTC-USDT", "spot", "2019-01-01T00:00:00Z", None),
        ];
        let (defs, stats) = build_definitions(Venue::Upbit, &symbols, start, end);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].key.to_string(), "UPBIT:SPOT_PAIR:BTC-KRW");
        assert_eq!(stats.skipped_filters, 1);
    }

    #[test]
    fn leveraged_tokens_are_excluded() {
        let (start, end) = may_2023();
        let symbols = [
            symbol("BTCUPUSDT", "spot", "2019-01-01T00:00:00Z", None),
            symbol("ETHDOWNUSDT", "spot", "2019-01-01T00:00:00Z", None),
        ];
        let (defs, stats) = build_definitions(Venue::Binance, &symbols, start, end);
        assert!(defs.is_empty());
        assert_eq!(stats.skipped_filters, 2);
    }

    #[test]
    fn out_of_range_symbols_are_skipped() {
        let (start, end) = may_2023();
        let symbols = [
            // Listed after the window.
            symbol("ETHUSDT", "spot", "2024-01-01T00:00:00Z", None),
            // Delisted before the window.
            symbol(
                "BTCUSDT_230331",
                "future",
                "2023-01-01T00:00:00Z",
                Some("2023-04-01T00:00:00Z"),
            ),
        ];
        let (defs, stats) = build_definitions(Venue::BinanceFutures, &symbols, start, end);
        assert!(defs.is_empty());
        assert_eq!(stats.skipped_date_range, 2);
    }

    #[test]
    fn settlement_shift_applies_to_vendor_window() {
        let (start, end) = may_2023();
        let symbols = [symbol(
            "BTCUSDT_231229",
            "future",
            "2023-03-31T00:00:00Z",
            Some("2023-12-30T00:00:00Z"),
        )];
        let (defs, _) = build_definitions(Venue::BinanceFutures, &symbols, start, end);
        let def = &defs[0];

        assert_eq!(
            def.available_from,
            Utc.with_ymd_and_hms(2023, 3, 31, 8, 0, 0).unwrap()
        );
        // Next-day midnight becomes settlement-day 08:00.
        assert_eq!(
            def.available_to,
            Utc.with_ymd_and_hms(2023, 12, 29, 8, 0, 0).unwrap()
        );
        assert_eq!(
            def.expiry,
            Some(Utc.with_ymd_and_hms(2023, 12, 29, 8, 0, 0).unwrap())
        );
        assert_eq!(def.key.to_string(), "BINANCE-FUTURES:FUTURE:BTC-USDT-231229");
    }

    #[test]
    fn already_shifted_stamps_are_not_shifted_twice() {
        let (start, end) = may_2023();
        let symbols = [symbol(
            "BTCUSDT_231229",
            "future",
            "2023-03-31T08:00:00Z",
            Some("2023-12-29T08:00:00Z"),
        )];
        let (defs, _) = build_definitions(Venue::BinanceFutures, &symbols, start, end);
        let def = &defs[0];
        assert_eq!(
            def.available_from,
            Utc.with_ymd_and_hms(2023, 3, 31, 8, 0, 0).unwrap()
        );
        assert_eq!(
            def.available_to,
            Utc.with_ymd_and_hms(2023, 12, 29, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn expiry_from_symbol_name_when_vendor_omits_available_to() {
        let (start, end) = (
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
        );
        let symbols = [symbol(
            "BTC-7NOV25-50000-C",
            "option",
            "2025-10-01T00:00:00Z",
            None,
        )];
        let (defs, stats) = build_definitions(Venue::Deribit, &symbols, start, end);

        assert_eq!(stats.generated, 1);
        let def = &defs[0];
        // Boundary case: single-digit day, normalized to 08:00 UTC.
        assert_eq!(
            def.expiry,
            Some(Utc.with_ymd_and_hms(2025, 11, 7, 8, 0, 0).unwrap())
        );
        assert_eq!(
            def.available_to,
            Utc.with_ymd_and_hms(2025, 11, 7, 8, 0, 0).unwrap()
        );
        assert_eq!(
            def.key.to_string(),
            "DERIBIT:OPTION:BTC-USD-251107-50000-CALL"
        );
        assert_eq!(def.option_type, Some(OptionKind::Call));
        assert!(def.inverse);
        assert_eq!(def.underlying.as_deref(), Some("BTC-USD"));
    }

    #[test]
    fn expiryless_option_is_rejected_and_counted() {
        let (start, end) = may_2023();
        let symbols = [symbol("BTC-MYSTERY-C", "option", "2023-01-01T00:00:00Z", None)];
        let (defs, stats) = build_definitions(Venue::Deribit, &symbols, start, end);
        assert!(defs.is_empty());
        assert_eq!(stats.failed_parsing, 1);
        assert!(stats.failures[0].contains("BTC-MYSTERY-C"));
    }

    #[test]
    fn combo_symbols_are_silently_skipped() {
        let (start, end) = may_2023();
        let symbols = [symbol("BTC-FS-28MAR25_PERP", "combo", "2023-01-01T00:00:00Z", None)];
        let (defs, stats) = build_definitions(Venue::Deribit, &symbols, start, end);
        assert!(defs.is_empty());
        // Not a parse failure: combos are expected to be unparseable.
        assert_eq!(stats.failed_parsing, 0);
        assert!(stats.failures.is_empty());
    }

    #[test]
    fn output_is_sorted_and_deduplicated() {
        let (start, end) = may_2023();
        let symbols = [
            symbol("ETHUSDT", "spot", "2019-01-01T00:00:00Z", None),
            symbol("BTCUSDT", "spot", "2019-01-01T00:00:00Z", None),
            symbol("BTCUSDT", "spot", "2019-01-01T00:00:00Z", None),
        ];
        let (defs, _) = build_definitions(Venue::Binance, &symbols, start, end);
        let keys: Vec<String> = defs.iter().map(|d| d.key.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "BINANCE:SPOT_PAIR:BTC-USDT".to_string(),
                "BINANCE:SPOT_PAIR:ETH-USDT".to_string(),
            ]
        );
    }

    #[test]
    fn bybit_quarterly_window_resolves_before_quote_filter_drops_it() {
        let (start, end) = (
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        );
        // The month code resolves to 2025-12-31, so the symbol is not a
        // parse failure; it is dropped by the USDT quote whitelist because
        // the contract is USD-quoted.
        let symbols = [symbol("BTCUSDZ25", "future", "2025-01-01T00:00:00Z", None)];
        let (defs, stats) = build_definitions(Venue::Bybit, &symbols, start, end);
        assert!(defs.is_empty());
        assert_eq!(stats.failed_parsing, 0, "failures: {:?}", stats.failures);
        assert_eq!(stats.skipped_filters, 1);
    }

    #[test]
    fn deribit_future_builds_canonical_key() {
        let (start, end) = may_2023();
        let symbols = [symbol(
            "BTC-29DEC23",
            "future",
            "2023-03-01T00:00:00Z",
            Some("2023-12-30T00:00:00Z"),
        )];
        let (defs, stats) = build_definitions(Venue::Deribit, &symbols, start, end);

        assert_eq!(stats.generated, 1, "failures: {:?}", stats.failures);
        let def = &defs[0];
        assert_eq!(def.key.to_string(), "DERIBIT:FUTURE:BTC-USD-231229");
        assert_eq!(def.base_asset, "BTC");
        assert_eq!(def.quote_asset, "USD");
        assert_eq!(def.settle_asset, "BTC");
        assert!(def.inverse);
        assert_eq!(def.underlying.as_deref(), Some("BTC-USD"));
        assert_eq!(
            def.data_types,
            crate::catalog::venue::InstrumentType::Future.products().to_vec()
        );
        // The vendor symbol regenerates from the key.
        assert_eq!(def.key.vendor_symbol(), "BTC-29DEC23");
    }

    #[test]
    fn deribit_perp_is_usd_quoted_and_coin_margined() {
        let (start, end) = may_2023();
        let symbols = [symbol("BTC-PERPETUAL", "perpetual", "2019-01-01T00:00:00Z", None)];
        let (defs, stats) = build_definitions(Venue::Deribit, &symbols, start, end);

        assert_eq!(stats.generated, 1);
        let def = &defs[0];
        assert_eq!(def.key.to_string(), "DERIBIT:PERP:BTC-USD");
        assert!(def.inverse);
        // Perpetuals do not expire: sentinel window, no expiry field.
        assert_eq!(def.available_to, far_future());
        assert!(def.expiry.is_none());
    }

    #[test]
    fn put_option_normalizes_to_put() {
        let (start, end) = may_2023();
        let symbols = [symbol(
            "BTC-29DEC23-50000-P",
            "option",
            "2023-03-01T00:00:00Z",
            Some("2023-12-30T00:00:00Z"),
        )];
        let (defs, _) = build_definitions(Venue::Deribit, &symbols, start, end);
        assert_eq!(
            defs[0].key.to_string(),
            "DERIBIT:OPTION:BTC-USD-231229-50000-PUT"
        );
        assert_eq!(defs[0].option_type, Some(OptionKind::Put));
        assert_eq!(defs[0].strike.as_deref(), Some("50000"));
    }

    #[test]
    fn generated_rows_round_trip_through_their_keys() {
        use std::str::FromStr;
        let (start, end) = may_2023();
        let symbols = [
            symbol("BTCUSDT", "spot", "2019-01-01T00:00:00Z", None),
            symbol(
                "BTCUSDT_231229",
                "future",
                "2023-03-31T00:00:00Z",
                Some("2023-12-30T00:00:00Z"),
            ),
        ];
        let (defs, _) = build_definitions(Venue::BinanceFutures, &symbols, start, end);

        for def in &defs {
            let reparsed = InstrumentKey::from_str(&def.key.to_string()).unwrap();
            assert_eq!(reparsed.venue, def.venue());
            assert_eq!(reparsed.instrument_type, def.instrument_type());
            assert_eq!(reparsed.base, def.base_asset);
            assert_eq!(reparsed.quote, def.quote_asset);
        }
    }

    #[test]
    fn vendor_timestamps_with_and_without_zone() {
        assert_eq!(
            parse_vendor_timestamp("2023-05-23T00:00:00.000Z").unwrap(),
            Utc.with_ymd_and_hms(2023, 5, 23, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_vendor_timestamp("2023-05-23T06:30:00").unwrap(),
            Utc.with_ymd_and_hms(2023, 5, 23, 6, 30, 0).unwrap()
        );
        assert!(parse_vendor_timestamp("not-a-date").is_err());
    }
}
