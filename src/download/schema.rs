use std::io::Cursor;

use bytes::Bytes;
use polars::prelude::*;
use tracing::warn;

use crate::{catalog::venue::Product, error::CatalogError};

/// Static column typing per product. The table drives both CSV coercion and
/// the parquet layout; nothing is inferred at runtime.
pub fn column_types(product: Product) -> Vec<(&'static str, DataType)> {
    match product {
        Product::Trades | Product::Liquidations => vec![
            ("timestamp", DataType::Int64),
            ("local_timestamp", DataType::Int64),
            ("price", DataType::Float64),
            ("amount", DataType::Float64),
            ("side", DataType::String),
            ("id", DataType::String),
        ],
        Product::BookSnapshot5 => {
            let mut columns = vec![
                ("timestamp", DataType::Int64),
                ("local_timestamp", DataType::Int64),
            ];
            columns.extend(BOOK_LEVEL_COLUMNS.iter().map(|name| (*name, DataType::Float64)));
            columns
        }
        Product::DerivativeTicker => vec![
            ("timestamp", DataType::Int64),
            ("funding_timestamp", DataType::Int64),
            ("funding_rate", DataType::Float64),
            ("predicted_funding_rate", DataType::Float64),
            ("open_interest", DataType::Float64),
            ("last_price", DataType::Float64),
            ("index_price", DataType::Float64),
            ("mark_price", DataType::Float64),
        ],
        Product::OptionsChain => {
            let mut columns = vec![
                ("timestamp", DataType::Int64),
                ("local_timestamp", DataType::Int64),
                ("expiration", DataType::Int64),
            ];
            columns.extend(
                [
                    "strike_price",
                    "open_interest",
                    "last_price",
                    "bid_price",
                    "bid_amount",
                    "bid_iv",
                    "ask_price",
                    "ask_amount",
                    "ask_iv",
                    "mark_price",
                    "mark_iv",
                    "underlying_price",
                    "delta",
                    "gamma",
                    "vega",
                    "theta",
                    "rho",
                ]
                .map(|name| (name, DataType::Float64)),
            );
            columns.push(("type", DataType::String));
            columns.push(("underlying_index", DataType::String));
            columns
        }
    }
}

/// Five bid and five ask levels.
const BOOK_LEVEL_COLUMNS: [&str; 20] = [
    "bids[0].price",
    "bids[0].amount",
    "bids[1].price",
    "bids[1].amount",
    "bids[2].price",
    "bids[2].amount",
    "bids[3].price",
    "bids[3].amount",
    "bids[4].price",
    "bids[4].amount",
    "asks[0].price",
    "asks[0].amount",
    "asks[1].price",
    "asks[1].amount",
    "asks[2].price",
    "asks[2].amount",
    "asks[3].price",
    "asks[3].amount",
    "asks[4].price",
    "asks[4].amount",
];

/// Parses a decompressed daily CSV into the product's typed frame.
///
/// Everything is read as text first, then cast column by column from the
/// static table: non-numeric cells in numeric columns become nulls, ragged
/// rows are truncated with a warning, and a malformed row never fails the
/// file. The redundant `exchange`/`symbol` columns are dropped — the output
/// path already encodes both.
pub fn parse_product_csv(data: Bytes, product: Product) -> Result<DataFrame, CatalogError> {
    let parse_options = CsvParseOptions::default().with_truncate_ragged_lines(true);
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .with_parse_options(parse_options)
        .into_reader_with_file_handle(Cursor::new(data))
        .finish()
        .map_err(|e| CatalogError::DataFrame(e.to_string()))?;

    coerce_frame(frame, product)
}

/// Applies the static schema to a raw text frame.
pub fn coerce_frame(mut frame: DataFrame, product: Product) -> Result<DataFrame, CatalogError> {
    for redundant in ["exchange", "symbol"] {
        if frame.column(redundant).is_ok() {
            frame = frame
                .drop(redundant)
                .map_err(|e| CatalogError::DataFrame(e.to_string()))?;
        }
    }

    for (name, dtype) in column_types(product) {
        let Ok(column) = frame.column(name) else {
            continue;
        };
        // Non-strict cast: unparseable cells become nulls instead of errors.
        let cast = column
            .cast(&dtype)
            .map_err(|e| CatalogError::DataFrame(e.to_string()))?;
        let nulls_before = column.null_count();
        let nulls_after = cast.null_count();
        if nulls_after > nulls_before {
            warn!(
                column = name,
                coerced = nulls_after - nulls_before,
                %product,
                "Non-numeric values coerced to null"
            );
        }
        frame
            .replace(name, cast.as_materialized_series().clone())
            .map_err(|e| CatalogError::DataFrame(e.to_string()))?;
    }

    Ok(frame)
}
