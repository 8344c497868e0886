use chrono::NaiveDate;

use crate::catalog::venue::Product;

// The path grammar is the one contract every component shares; it lives here
// and nothing else formats object paths.

/// `catalog/by_date/day-{YYYY-MM-DD}/instruments.parquet`
pub fn daily_catalog(date: NaiveDate) -> String {
    format!("catalog/by_date/day-{}/instruments.parquet", date.format("%Y-%m-%d"))
}

/// Read-side fallbacks for older catalog layouts, tried in order after the
/// current per-day path.
pub fn catalog_read_candidates(date: NaiveDate) -> Vec<String> {
    vec![
        daily_catalog(date),
        format!("catalog/instruments_{}.parquet", date.format("%Y%m%d")),
        format!("catalog/{}_enhanced.parquet", date.format("%Y-%m-%d")),
    ]
}

/// `catalog/aggregate/instruments_{YYYYMMDD}_{YYYYMMDD}.parquet`
pub fn aggregate_catalog(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "catalog/aggregate/instruments_{}_{}.parquet",
        start.format("%Y%m%d"),
        end.format("%Y%m%d")
    )
}

/// `raw_tick_data/by_date/day-{date}/data_type-{product}/{instrument_key}.parquet`
pub fn tick_data(date: NaiveDate, product: Product, instrument_key: &str) -> String {
    format!(
        "{}data_type-{product}/{instrument_key}.parquet",
        tick_data_day_prefix(date)
    )
}

/// The per-day prefix under which every product directory for `date` lives.
pub fn tick_data_day_prefix(date: NaiveDate) -> String {
    format!("raw_tick_data/by_date/day-{}/", date.format("%Y-%m-%d"))
}

pub fn tick_data_product_prefix(date: NaiveDate, product: Product) -> String {
    format!("{}data_type-{product}/", tick_data_day_prefix(date))
}

/// `missing_data_reports/by_date/day-{date}/missing_data.parquet`
pub fn missing_report(date: NaiveDate) -> String {
    format!(
        "missing_data_reports/by_date/day-{}/missing_data.parquet",
        date.format("%Y-%m-%d")
    )
}

/// Decodes `(product, instrument_key)` from a tick-data object path of the
/// form `…/data_type-{product}/{instrument_key}.parquet`. Paths that do not
/// follow the grammar yield `None`.
pub fn parse_tick_path(path: &str) -> Option<(String, String)> {
    let mut segments = path.rsplit('/');
    let file = segments.next()?;
    let product_dir = segments.next()?;

    let instrument_key = file.strip_suffix(".parquet")?;
    let product = product_dir.strip_prefix("data_type-")?;
    if instrument_key.is_empty() || product.is_empty() {
        return None;
    }
    Some((product.to_string(), instrument_key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 23).unwrap()
    }

    #[test]
    fn daily_catalog_layout() {
        assert_eq!(
            daily_catalog(date()),
            "catalog/by_date/day-2023-05-23/instruments.parquet"
        );
    }

    #[test]
    fn fallbacks_cover_legacy_layouts_in_order() {
        let candidates = catalog_read_candidates(date());
        assert_eq!(
            candidates,
            vec![
                "catalog/by_date/day-2023-05-23/instruments.parquet".to_string(),
                "catalog/instruments_20230523.parquet".to_string(),
                "catalog/2023-05-23_enhanced.parquet".to_string(),
            ]
        );
    }

    #[test]
    fn aggregate_uses_compact_dates() {
        let end = NaiveDate::from_ymd_opt(2023, 5, 25).unwrap();
        assert_eq!(
            aggregate_catalog(date(), end),
            "catalog/aggregate/instruments_20230523_20230525.parquet"
        );
    }

    #[test]
    fn tick_path_round_trips() {
        let path = tick_data(date(), Product::Trades, "BINANCE:SPOT_PAIR:BTC-USDT");
        assert_eq!(
            path,
            "raw_tick_data/by_date/day-2023-05-23/data_type-trades/BINANCE:SPOT_PAIR:BTC-USDT.parquet"
        );
        assert_eq!(
            parse_tick_path(&path),
            Some(("trades".to_string(), "BINANCE:SPOT_PAIR:BTC-USDT".to_string()))
        );
    }

    #[test]
    fn foreign_paths_are_ignored() {
        assert_eq!(parse_tick_path("raw_tick_data/by_date/day-2023-05-23/readme.txt"), None);
        assert_eq!(parse_tick_path("data_type-trades/.parquet"), None);
        assert_eq!(parse_tick_path("x/no_marker/KEY.parquet"), None);
    }
}
