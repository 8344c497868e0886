use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    catalog::{
        instrument_key::InstrumentKey,
        venue::{InstrumentType, OptionKind, Product, Venue},
    },
    error::CatalogError,
};

/// Sentinel for instruments that never expire (spot, perpetuals without a
/// vendor-reported delisting date).
pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0).unwrap()
}

/// Crypto derivatives settle at 08:00 UTC.
pub const SETTLEMENT_HOUR: u32 = 8;

/// One catalog row: a tradeable instrument at a venue, its availability
/// window at the vendor, and the tick-data products archived for it.
///
/// Generated anew per run from the vendor catalog and never mutated in
/// place; rows are valid forever once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    pub key: InstrumentKey,
    pub available_from: DateTime<Utc>,
    pub available_to: DateTime<Utc>,
    pub data_types: Vec<Product>,
    pub base_asset: String,
    pub quote_asset: String,
    pub settle_asset: String,

    /// Original vendor symbol, unchanged.
    pub exchange_raw_symbol: String,

    /// Identifiers the vendor expects in tick-download URLs.
    pub vendor_symbol: String,
    pub vendor_exchange: String,

    /// Coin-margined: settlement asset differs from the quote asset.
    pub inverse: bool,

    pub expiry: Option<DateTime<Utc>>,
    pub strike: Option<String>,
    pub option_type: Option<OptionKind>,
    pub underlying: Option<String>,
}

impl InstrumentDefinition {
    pub fn venue(&self) -> Venue {
        self.key.venue
    }

    pub fn instrument_type(&self) -> InstrumentType {
        self.key.instrument_type
    }

    /// True when the availability window intersects `[start, end]` (dates
    /// compared at day granularity, inclusive on both ends).
    pub fn available_in_range(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.available_from.date_naive() <= end && self.available_to.date_naive() >= start
    }

    /// Settlement timestamp for an expiring instrument: the expiry date at
    /// 08:00 UTC.
    pub fn settlement_at(expiry: NaiveDate) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &expiry
                .and_hms_opt(SETTLEMENT_HOUR, 0, 0)
                .expect("08:00:00 is a valid time"),
        )
    }
}

// ================================================================================================
// Frame codecs
// ================================================================================================

const FRAME_COLUMNS: [&str; 17] = [
    "instrument_key",
    "venue",
    "instrument_type",
    "available_from",
    "available_to",
    "data_types",
    "base_asset",
    "quote_asset",
    "settle_asset",
    "exchange_raw_symbol",
    "vendor_symbol",
    "vendor_exchange",
    "inverse",
    "expiry",
    "strike",
    "option_type",
    "underlying",
];

/// Encodes definitions as the catalog's columnar layout. Timestamps are
/// RFC 3339 strings, optional fields empty strings, `data_types`
/// comma-joined — the shape downstream consumers and external query engines
/// read.
pub fn definitions_to_frame(
    definitions: &[InstrumentDefinition],
) -> Result<DataFrame, CatalogError> {
    let mut keys = Vec::with_capacity(definitions.len());
    let mut venues = Vec::with_capacity(definitions.len());
    let mut types = Vec::with_capacity(definitions.len());
    let mut from = Vec::with_capacity(definitions.len());
    let mut to = Vec::with_capacity(definitions.len());
    let mut data_types = Vec::with_capacity(definitions.len());
    let mut base = Vec::with_capacity(definitions.len());
    let mut quote = Vec::with_capacity(definitions.len());
    let mut settle = Vec::with_capacity(definitions.len());
    let mut raw_symbol = Vec::with_capacity(definitions.len());
    let mut vendor_symbol = Vec::with_capacity(definitions.len());
    let mut vendor_exchange = Vec::with_capacity(definitions.len());
    let mut inverse = Vec::with_capacity(definitions.len());
    let mut expiry = Vec::with_capacity(definitions.len());
    let mut strike = Vec::with_capacity(definitions.len());
    let mut option_type = Vec::with_capacity(definitions.len());
    let mut underlying = Vec::with_capacity(definitions.len());

    for def in definitions {
        keys.push(def.key.to_string());
        venues.push(def.venue().to_string());
        types.push(def.instrument_type().to_string());
        from.push(def.available_from.to_rfc3339());
        to.push(def.available_to.to_rfc3339());
        data_types.push(Product::join_list(&def.data_types));
        base.push(def.base_asset.clone());
        quote.push(def.quote_asset.clone());
        settle.push(def.settle_asset.clone());
        raw_symbol.push(def.exchange_raw_symbol.clone());
        vendor_symbol.push(def.vendor_symbol.clone());
        vendor_exchange.push(def.vendor_exchange.clone());
        inverse.push(def.inverse);
        expiry.push(def.expiry.map(|e| e.to_rfc3339()).unwrap_or_default());
        strike.push(def.strike.clone().unwrap_or_default());
        option_type.push(
            def.option_type
                .map(|k| k.to_string())
                .unwrap_or_default(),
        );
        underlying.push(def.underlying.clone().unwrap_or_default());
    }

    DataFrame::new(vec![
        Column::new("instrument_key".into(), keys),
        Column::new("venue".into(), venues),
        Column::new("instrument_type".into(), types),
        Column::new("available_from".into(), from),
        Column::new("available_to".into(), to),
        Column::new("data_types".into(), data_types),
        Column::new("base_asset".into(), base),
        Column::new("quote_asset".into(), quote),
        Column::new("settle_asset".into(), settle),
        Column::new("exchange_raw_symbol".into(), raw_symbol),
        Column::new("vendor_symbol".into(), vendor_symbol),
        Column::new("vendor_exchange".into(), vendor_exchange),
        Column::new("inverse".into(), inverse),
        Column::new("expiry".into(), expiry),
        Column::new("strike".into(), strike),
        Column::new("option_type".into(), option_type),
        Column::new("underlying".into(), underlying),
    ])
    .map_err(|e| CatalogError::DataFrame(e.to_string()))
}

/// Decodes a catalog frame back into definitions. Rows that fail to decode
/// are returned in the error list rather than aborting the batch.
pub fn frame_to_definitions(
    frame: &DataFrame,
) -> Result<(Vec<InstrumentDefinition>, Vec<CatalogError>), CatalogError> {
    let keys = str_col(frame, "instrument_key")?;
    let from = str_col(frame, "available_from")?;
    let to = str_col(frame, "available_to")?;
    let data_types = str_col(frame, "data_types")?;
    let base = str_col(frame, "base_asset")?;
    let quote = str_col(frame, "quote_asset")?;
    let settle = str_col(frame, "settle_asset")?;
    let raw_symbol = str_col(frame, "exchange_raw_symbol")?;
    let vendor_symbol = str_col(frame, "vendor_symbol")?;
    let vendor_exchange = str_col(frame, "vendor_exchange")?;
    let expiry = str_col(frame, "expiry")?;
    let strike = str_col(frame, "strike")?;
    let option_type = str_col(frame, "option_type")?;
    let underlying = str_col(frame, "underlying")?;
    let inverse = frame
        .column("inverse")
        .and_then(|c| c.bool())
        .map_err(|e| CatalogError::DataFrame(e.to_string()))?;

    let mut definitions = Vec::with_capacity(frame.height());
    let mut failures = Vec::new();

    for i in 0..frame.height() {
        let decode = || -> Result<InstrumentDefinition, CatalogError> {
            let key_str = keys.get(i).unwrap_or_default();
            let key = InstrumentKey::from_str(key_str)?;
            let available_from = parse_rfc3339(from.get(i).unwrap_or_default())?;
            let available_to = parse_rfc3339(to.get(i).unwrap_or_default())?;

            let expiry_str = expiry.get(i).unwrap_or_default();
            let expiry = if expiry_str.is_empty() {
                None
            } else {
                Some(parse_rfc3339(expiry_str)?)
            };

            let strike = non_empty(strike.get(i));
            let option_type = match option_type.get(i).filter(|s| !s.is_empty()) {
                Some(s) => Some(OptionKind::from_str(s)?),
                None => None,
            };

            Ok(InstrumentDefinition {
                key,
                available_from,
                available_to,
                data_types: Product::split_list(data_types.get(i).unwrap_or_default()),
                base_asset: base.get(i).unwrap_or_default().to_string(),
                quote_asset: quote.get(i).unwrap_or_default().to_string(),
                settle_asset: settle.get(i).unwrap_or_default().to_string(),
                exchange_raw_symbol: raw_symbol.get(i).unwrap_or_default().to_string(),
                vendor_symbol: vendor_symbol.get(i).unwrap_or_default().to_string(),
                vendor_exchange: vendor_exchange.get(i).unwrap_or_default().to_string(),
                inverse: inverse.get(i).unwrap_or(false),
                expiry,
                strike,
                option_type,
                underlying: non_empty(underlying.get(i)),
            })
        };

        match decode() {
            Ok(def) => definitions.push(def),
            Err(e) => failures.push(e),
        }
    }

    Ok((definitions, failures))
}

/// True when the frame carries every column the catalog codec expects.
pub fn has_catalog_columns(frame: &DataFrame) -> bool {
    FRAME_COLUMNS
        .iter()
        .all(|name| frame.column(name).is_ok())
}

fn str_col<'a>(frame: &'a DataFrame, name: &str) -> Result<&'a StringChunked, CatalogError> {
    frame
        .column(name)
        .and_then(|c| c.str())
        .map_err(|e| CatalogError::DataFrame(e.to_string()))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CatalogError::InvalidTimestamp {
            value: s.to_string(),
            msg: e.to_string(),
        })
}
