mod common;

use tickforge::{
    Pipeline, TickStore,
    catalog::venue::{Product, Venue},
    paths,
    pipeline::DownloadSelection,
    validator::missing::MissingFilters,
};
use wiremock::MockServer;

use common::{day, mount_binance_vendor, test_config};

/// Spec scenario: delete one expected tick file, re-detect (exactly one
/// row), back-fill (file restored), re-detect (clean again).
#[tokio::test]
async fn delete_detect_backfill_detect_round_trip() {
    let server = MockServer::start().await;
    mount_binance_vendor(&server, &["BTCUSDT", "ETHUSDT"]).await;

    let store = TickStore::in_memory();
    let pipeline = Pipeline::new(test_config(&server.uri()), store.clone()).unwrap();
    let date = day(2023, 5, 23);

    let (_, download, validation) = pipeline
        .run_full_pipeline(
            Some(vec![Venue::Binance]),
            date,
            date,
            &DownloadSelection::default(),
            2,
        )
        .await
        .unwrap();
    assert_eq!(download.processed, 4);
    assert_eq!(validation.total_missing, 0);

    // Knock out one expected file.
    let victim = paths::tick_data(date, Product::Trades, "BINANCE:SPOT_PAIR:BTC-USDT");
    store.delete(&victim).await.unwrap();

    // Detection finds exactly that gap and writes a report.
    let summary = pipeline
        .run_validate(date, date, &MissingFilters::default())
        .await
        .unwrap();
    assert_eq!(summary.total_missing, 1);
    assert_eq!(summary.entries.len(), 1);
    assert_eq!(summary.entries[0].instrument_key, "BINANCE:SPOT_PAIR:BTC-USDT");
    assert_eq!(summary.entries[0].product, Product::Trades);
    assert!(store.exists(&paths::missing_report(date)).await.unwrap());

    // The gap downloader restores exactly the listed target.
    let gapfill = pipeline.run_gapfill(date, date).await.unwrap();
    assert_eq!(gapfill.hydrated_targets, 1);
    assert_eq!(gapfill.processed, 1);
    assert_eq!(gapfill.failed, 0);
    assert!(store.exists(&victim).await.unwrap());

    // Clean again, and the stale report is gone.
    let summary = pipeline
        .run_validate(date, date, &MissingFilters::default())
        .await
        .unwrap();
    assert_eq!(summary.total_missing, 0);
    assert!(!store.exists(&paths::missing_report(date)).await.unwrap());
}

/// A date without a report is not an error for the gap downloader.
#[tokio::test]
async fn gapfill_skips_dates_without_reports() {
    let server = MockServer::start().await;
    mount_binance_vendor(&server, &["BTCUSDT"]).await;

    let store = TickStore::in_memory();
    let pipeline = Pipeline::new(test_config(&server.uri()), store).unwrap();

    let report = pipeline
        .run_gapfill(day(2023, 5, 23), day(2023, 5, 25))
        .await
        .unwrap();
    assert_eq!(report.total_days, 3);
    assert_eq!(report.days_with_reports, 0);
    assert_eq!(report.hydrated_targets, 0);
}

/// Detection filters narrow the expectation symmetrically: filtering by
/// product only reports gaps for that product.
#[tokio::test]
async fn product_filter_narrows_detection() {
    let server = MockServer::start().await;
    mount_binance_vendor(&server, &["BTCUSDT"]).await;

    let store = TickStore::in_memory();
    let pipeline = Pipeline::new(test_config(&server.uri()), store.clone()).unwrap();
    let date = day(2023, 5, 23);

    pipeline
        .run_full_pipeline(
            Some(vec![Venue::Binance]),
            date,
            date,
            &DownloadSelection::default(),
            2,
        )
        .await
        .unwrap();

    // Remove both files; filter detection to trades only.
    store
        .delete(&paths::tick_data(date, Product::Trades, "BINANCE:SPOT_PAIR:BTC-USDT"))
        .await
        .unwrap();
    store
        .delete(&paths::tick_data(
            date,
            Product::BookSnapshot5,
            "BINANCE:SPOT_PAIR:BTC-USDT",
        ))
        .await
        .unwrap();

    let filters = MissingFilters {
        products: Some(vec![Product::Trades]),
        ..MissingFilters::default()
    };
    let summary = pipeline.run_validate(date, date, &filters).await.unwrap();
    assert_eq!(summary.total_missing, 1);
    assert_eq!(summary.entries[0].product, Product::Trades);
}

/// The catalog-only gap check reports days without instrument definitions.
#[tokio::test]
async fn check_gaps_spots_catalogless_days() {
    let server = MockServer::start().await;
    mount_binance_vendor(&server, &["BTCUSDT"]).await;

    let store = TickStore::in_memory();
    let pipeline = Pipeline::new(test_config(&server.uri()), store).unwrap();

    // Generate a catalog for the 23rd only.
    pipeline
        .run_instruments(Some(vec![Venue::Binance]), day(2023, 5, 23), day(2023, 5, 23), 2)
        .await
        .unwrap();

    let report = pipeline
        .run_check_gaps(day(2023, 5, 23), day(2023, 5, 25))
        .await
        .unwrap();
    assert_eq!(report.total_days, 3);
    assert_eq!(report.days_with_catalog, 1);
    assert_eq!(report.missing_days, vec![day(2023, 5, 24), day(2023, 5, 25)]);
}
