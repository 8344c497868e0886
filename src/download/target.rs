use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    catalog::{definition::InstrumentDefinition, venue::Product},
    error::{SystemError, TickforgeResult},
};

/// One unit of download work: fetch `{vendor_exchange, vendor_symbol,
/// product, date}` from the vendor archive and store it under
/// `instrument_key`. Ephemeral; lives only within a single orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTarget {
    pub instrument_key: String,
    pub vendor_exchange: String,
    pub vendor_symbol: String,
    pub product: Product,
    pub date: NaiveDate,
}

/// Explodes catalog rows into targets: one per `(instrument, product)` pair,
/// optionally restricted to the requested products and capped at
/// `max_instruments` catalog rows.
pub fn targets_from_definitions(
    definitions: &[InstrumentDefinition],
    date: NaiveDate,
    products: Option<&[Product]>,
    max_instruments: Option<usize>,
) -> Vec<DownloadTarget> {
    let limit = max_instruments.unwrap_or(usize::MAX);
    let mut targets = Vec::new();

    for definition in definitions.iter().take(limit) {
        for product in &definition.data_types {
            if let Some(wanted) = products
                && !wanted.contains(product)
            {
                continue;
            }
            targets.push(DownloadTarget {
                instrument_key: definition.key.to_string(),
                vendor_exchange: definition.vendor_exchange.clone(),
                vendor_symbol: definition.vendor_symbol.clone(),
                product: *product,
                date,
            });
        }
    }

    targets
}

/// Stable shard assignment: the first eight little-endian bytes of
/// `blake3(instrument_key)` reduced modulo the shard count. Identical across
/// processes, platforms and runs, so distributed workers partition the work
/// space without coordination.
pub fn shard_of(instrument_key: &str, total_shards: u32) -> u32 {
    let hash = blake3::hash(instrument_key.as_bytes());
    let word = u64::from_le_bytes(hash.as_bytes()[..8].try_into().expect("hash is 32 bytes"));
    (word % total_shards as u64) as u32
}

/// Keeps only the targets owned by `shard_index`.
pub fn filter_shard(
    targets: Vec<DownloadTarget>,
    shard_index: u32,
    total_shards: u32,
) -> TickforgeResult<Vec<DownloadTarget>> {
    if total_shards == 0 || shard_index >= total_shards {
        return Err(SystemError::InvalidShard {
            index: shard_index,
            total: total_shards,
        }
        .into());
    }

    let before = targets.len();
    let sharded: Vec<_> = targets
        .into_iter()
        .filter(|t| shard_of(&t.instrument_key, total_shards) == shard_index)
        .collect();
    info!(
        shard_index,
        total_shards,
        kept = sharded.len(),
        dropped = before - sharded.len(),
        "Applied sharding"
    );
    Ok(sharded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{instrument_key::InstrumentKey, venue::Venue};
    use chrono::{TimeZone, Utc};

    fn definition(key: InstrumentKey) -> InstrumentDefinition {
        InstrumentDefinition {
            data_types: key.instrument_type.products().to_vec(),
            base_asset: key.base.clone(),
            quote_asset: key.quote.clone(),
            settle_asset: key.quote.clone(),
            exchange_raw_symbol: key.vendor_symbol(),
            vendor_symbol: key.vendor_symbol(),
            vendor_exchange: key.venue.vendor_id().to_string(),
            inverse: false,
            expiry: None,
            strike: None,
            option_type: None,
            underlying: None,
            available_from: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            available_to: Utc.with_ymd_and_hms(2099, 12, 31, 0, 0, 0).unwrap(),
            key,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 23).unwrap()
    }

    #[test]
    fn spot_definition_explodes_into_two_targets() {
        let defs = [definition(InstrumentKey::spot(Venue::Binance, "BTC", "USDT"))];
        let targets = targets_from_definitions(&defs, date(), None, None);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].product, Product::Trades);
        assert_eq!(targets[1].product, Product::BookSnapshot5);
        assert_eq!(targets[0].vendor_symbol, "BTCUSDT");
        assert_eq!(targets[0].vendor_exchange, "binance");
    }

    #[test]
    fn product_filter_narrows_targets() {
        let defs = [definition(InstrumentKey::perp(Venue::OkxSwap, "BTC", "USDT"))];
        let targets =
            targets_from_definitions(&defs, date(), Some(&[Product::Trades]), None);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].product, Product::Trades);
    }

    #[test]
    fn max_instruments_caps_rows_not_targets() {
        let defs = [
            definition(InstrumentKey::spot(Venue::Binance, "BTC", "USDT")),
            definition(InstrumentKey::spot(Venue::Binance, "ETH", "USDT")),
            definition(InstrumentKey::spot(Venue::Binance, "SOL", "USDT")),
        ];
        let targets = targets_from_definitions(&defs, date(), None, Some(2));
        // Two instruments, two products each.
        assert_eq!(targets.len(), 4);
    }

    #[test]
    fn shards_partition_the_target_set() {
        let keys: Vec<String> = (0..200)
            .map(|i| format!("BINANCE:SPOT_PAIR:COIN{i}-USDT"))
            .collect();
        let targets: Vec<DownloadTarget> = keys
            .iter()
            .map(|key| DownloadTarget {
                instrument_key: key.clone(),
                vendor_exchange: "binance".to_string(),
                vendor_symbol: "X".to_string(),
                product: Product::Trades,
                date: date(),
            })
            .collect();

        let total = 4;
        let mut union = Vec::new();
        for index in 0..total {
            let shard = filter_shard(targets.clone(), index, total).unwrap();
            union.extend(shard);
        }

        // Union covers everything exactly once.
        assert_eq!(union.len(), targets.len());
        let mut union_keys: Vec<_> = union.iter().map(|t| t.instrument_key.clone()).collect();
        union_keys.sort();
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(union_keys, expected);
    }

    #[test]
    fn shard_assignment_is_deterministic() {
        let key = "DERIBIT:OPTION:BTC-USD-231229-50000-CALL";
        let first = shard_of(key, 30);
        for _ in 0..10 {
            assert_eq!(shard_of(key, 30), first);
        }
    }

    #[test]
    fn invalid_shard_config_is_rejected() {
        assert!(filter_shard(Vec::new(), 4, 4).is_err());
        assert!(filter_shard(Vec::new(), 0, 0).is_err());
    }
}
