use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::CatalogError;

// ================================================================================================
// Venue
// ================================================================================================

/// A single exchange endpoint at the vendor. Venues with separate endpoints
/// (e.g. Binance spot vs. Binance futures) are distinct venues even when they
/// belong to the same company.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    IntoStaticStr,
)]
pub enum Venue {
    #[strum(serialize = "BINANCE")]
    Binance,

    #[strum(serialize = "BINANCE-FUTURES")]
    BinanceFutures,

    #[strum(serialize = "BYBIT")]
    Bybit,

    #[strum(serialize = "BYBIT-SPOT")]
    BybitSpot,

    #[strum(serialize = "DERIBIT")]
    Deribit,

    #[strum(serialize = "OKX")]
    Okx,

    #[strum(serialize = "OKX-FUTURES")]
    OkxFutures,

    #[strum(serialize = "OKX-SWAP")]
    OkxSwap,

    #[strum(serialize = "UPBIT")]
    Upbit,
}

impl Venue {
    /// The lowercase exchange id the vendor expects in URLs. The vendor still
    /// spells OKX as `okex`.
    pub fn vendor_id(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::BinanceFutures => "binance-futures",
            Venue::Bybit => "bybit",
            Venue::BybitSpot => "bybit-spot",
            Venue::Deribit => "deribit",
            Venue::Okx => "okex",
            Venue::OkxFutures => "okex-futures",
            Venue::OkxSwap => "okex-swap",
            Venue::Upbit => "upbit",
        }
    }

    pub fn from_vendor_id(id: &str) -> Result<Self, CatalogError> {
        match id {
            "binance" => Ok(Venue::Binance),
            "binance-futures" => Ok(Venue::BinanceFutures),
            "bybit" => Ok(Venue::Bybit),
            "bybit-spot" => Ok(Venue::BybitSpot),
            "deribit" => Ok(Venue::Deribit),
            "okex" => Ok(Venue::Okx),
            "okex-futures" => Ok(Venue::OkxFutures),
            "okex-swap" => Ok(Venue::OkxSwap),
            "upbit" => Ok(Venue::Upbit),
            other => Err(CatalogError::UnknownVenue(other.to_string())),
        }
    }

    /// Venues whose symbols carry assets as dash-separated segments rather
    /// than concatenated with a quote suffix.
    pub fn is_dash_separated(&self) -> bool {
        matches!(self, Venue::Deribit | Venue::Upbit)
    }

    /// Venues whose future/option availability windows shift from vendor
    /// midnight to the 08:00 UTC settlement convention. Fixed set; do not
    /// generalize.
    pub fn has_settlement_shift(&self) -> bool {
        matches!(
            self,
            Venue::Deribit
                | Venue::BinanceFutures
                | Venue::OkxFutures
                | Venue::OkxSwap
                | Venue::Bybit
        )
    }

    /// Quote currencies accepted into the catalog for this venue.
    pub fn quote_whitelist(&self) -> &'static [&'static str] {
        match self {
            Venue::Upbit => &["KRW"],
            Venue::Deribit => &["USD", "USDT", "USDC"],
            _ => &["USDT"],
        }
    }

    /// The default set of exchanges a catalog run covers.
    pub fn default_exchanges() -> Vec<Venue> {
        vec![
            Venue::Binance,
            Venue::BinanceFutures,
            Venue::Deribit,
            Venue::Bybit,
            Venue::BybitSpot,
            Venue::Okx,
            Venue::OkxFutures,
            Venue::OkxSwap,
            Venue::Upbit,
        ]
    }
}

// ================================================================================================
// Symbol & Instrument Types
// ================================================================================================

/// The symbol-type string as reported by the vendor catalog.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum SymbolType {
    Spot,
    Perpetual,
    Future,
    Option,
    /// Deribit-specific composite instruments. Mapped to options but skipped
    /// silently during catalog generation.
    Combo,
}

impl SymbolType {
    pub fn canonical(&self) -> InstrumentType {
        match self {
            SymbolType::Spot => InstrumentType::SpotPair,
            SymbolType::Perpetual => InstrumentType::Perp,
            SymbolType::Future => InstrumentType::Future,
            SymbolType::Option | SymbolType::Combo => InstrumentType::Option,
        }
    }

    pub fn is_derivative(&self) -> bool {
        matches!(
            self,
            SymbolType::Perpetual | SymbolType::Future | SymbolType::Option | SymbolType::Combo
        )
    }

    /// Futures and options expire; spot and perpetuals do not.
    pub fn is_expiring(&self) -> bool {
        matches!(self, SymbolType::Future | SymbolType::Option | SymbolType::Combo)
    }
}

/// Canonical instrument type, the second component of every instrument key.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    IntoStaticStr,
)]
pub enum InstrumentType {
    #[strum(serialize = "SPOT_PAIR")]
    SpotPair,

    #[strum(serialize = "PERP")]
    Perp,

    #[strum(serialize = "FUTURE")]
    Future,

    #[strum(serialize = "OPTION")]
    Option,
}

impl InstrumentType {
    /// Products the vendor archives for this instrument type. Deterministic;
    /// drives both the download plan and the missing-data expectation.
    pub fn products(&self) -> &'static [Product] {
        match self {
            InstrumentType::SpotPair => &[Product::Trades, Product::BookSnapshot5],
            InstrumentType::Perp | InstrumentType::Future => &[
                Product::Trades,
                Product::BookSnapshot5,
                Product::DerivativeTicker,
                Product::Liquidations,
            ],
            InstrumentType::Option => &[
                Product::Trades,
                Product::BookSnapshot5,
                Product::OptionsChain,
                Product::Liquidations,
                Product::DerivativeTicker,
            ],
        }
    }

    pub fn is_derivative(&self) -> bool {
        !matches!(self, InstrumentType::SpotPair)
    }
}

// ================================================================================================
// Product
// ================================================================================================

/// A category of tick data the vendor archives per instrument per day.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    EnumIter,
    Display,
    IntoStaticStr,
)]
pub enum Product {
    #[strum(serialize = "trades")]
    Trades,

    #[strum(serialize = "book_snapshot_5")]
    BookSnapshot5,

    #[strum(serialize = "derivative_ticker")]
    DerivativeTicker,

    #[strum(serialize = "liquidations")]
    Liquidations,

    #[strum(serialize = "options_chain")]
    OptionsChain,
}

impl Product {
    /// Splits a comma-joined `data_types` field into products, matching each
    /// entry exactly. `book_snapshot` never matches `book_snapshot_5`.
    pub fn split_list(joined: &str) -> Vec<Product> {
        joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| Product::from_str(s).ok())
            .collect()
    }

    pub fn join_list(products: &[Product]) -> String {
        products
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ================================================================================================
// Option Kind
// ================================================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
pub enum OptionKind {
    #[strum(serialize = "CALL")]
    Call,

    #[strum(serialize = "PUT")]
    Put,
}

impl OptionKind {
    /// Decodes the single-letter form found in vendor symbols.
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "C" => Some(OptionKind::Call),
            "P" => Some(OptionKind::Put),
            _ => None,
        }
    }

    pub fn letter(&self) -> &'static str {
        match self {
            OptionKind::Call => "C",
            OptionKind::Put => "P",
        }
    }
}
