#![allow(dead_code)]

use std::io::Write;

use chrono::NaiveDate;
use flate2::{Compression, write::GzEncoder};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, path_regex},
};

use tickforge::config::{
    Config, GcsConfig, OutputConfig, ServiceConfig, ShardingConfig, VendorConfig,
};

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A config wired to the mock vendor; the GCS block is inert because tests
/// inject an in-memory store.
pub fn test_config(base_url: &str) -> Config {
    Config {
        vendor: VendorConfig {
            api_key: "TD.test-key".to_string(),
            base_url: base_url.to_string(),
            timeout: 10,
            max_retries: 3,
            max_concurrent: 8,
            max_parallel_uploads: 4,
            rate_limit_per_vm: 1_000_000,
        },
        gcs: GcsConfig {
            project_id: "test".to_string(),
            credentials_path: "/dev/null".to_string(),
            bucket: "test-bucket".to_string(),
            region: "test-region".to_string(),
        },
        service: ServiceConfig::default(),
        sharding: ShardingConfig::default(),
        output: OutputConfig::default(),
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub const TRADES_CSV: &str = "\
exchange,symbol,timestamp,local_timestamp,id,side,price,amount
binance,BTCUSDT,1684800000000000,1684800000100000,1,buy,26850.5,0.25
binance,BTCUSDT,1684800001000000,1684800001100000,2,sell,26851.0,0.5
";

pub const BOOK_CSV: &str = "\
exchange,symbol,timestamp,local_timestamp,bids[0].price,bids[0].amount,asks[0].price,asks[0].amount
binance,BTCUSDT,1684800000000000,1684800000100000,26850.0,1.5,26850.5,2.0
";

/// Mounts a Binance catalog with the given spot symbols, serves gzipped
/// trades and plain book snapshots for every symbol, and 404s the rest.
pub async fn mount_binance_vendor(server: &MockServer, symbols: &[&str]) {
    let available: Vec<_> = symbols
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "type": "spot",
                "availableSince": "2019-01-01T00:00:00.000Z",
            })
        })
        .collect();

    Mock::given(method("GET"))
        .and(path("/v1/exchanges/binance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "availableSymbols": available,
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/binance/trades/\d{4}/\d{2}/\d{2}/.+\.csv\.gz$"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_bytes(gzip(TRADES_CSV.as_bytes())),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(
            r"^/v1/binance/book_snapshot_5/\d{4}/\d{2}/\d{2}/.+\.csv\.gz$",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(BOOK_CSV.as_bytes()))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}
