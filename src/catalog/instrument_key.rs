use std::{fmt, str::FromStr};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::venue::{InstrumentType, OptionKind, Venue},
    error::CatalogError,
};

/// The canonical identifier of a tradeable instrument:
/// `VENUE:TYPE:BASE-QUOTE[-YYMMDD[-STRIKE-CALL|PUT]]`, all uppercase, with
/// `-` as the only separator inside the symbol portion.
///
/// The rendered form is deterministic and `FromStr` inverts `Display`
/// exactly, so keys can be used as object-store file names and parsed back
/// without loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub venue: Venue,
    pub instrument_type: InstrumentType,
    pub base: String,
    pub quote: String,

    /// Expiry date, present for futures and options.
    pub expiry: Option<NaiveDate>,

    /// Decimal strike rendered as a string (`"50000"`, `"1.14"`), options only.
    pub strike: Option<String>,

    pub option_kind: Option<OptionKind>,
}

impl InstrumentKey {
    pub fn spot(venue: Venue, base: &str, quote: &str) -> Self {
        Self::new(venue, InstrumentType::SpotPair, base, quote)
    }

    pub fn perp(venue: Venue, base: &str, quote: &str) -> Self {
        Self::new(venue, InstrumentType::Perp, base, quote)
    }

    pub fn future(venue: Venue, base: &str, quote: &str, expiry: NaiveDate) -> Self {
        Self {
            expiry: Some(expiry),
            ..Self::new(venue, InstrumentType::Future, base, quote)
        }
    }

    pub fn option(
        venue: Venue,
        base: &str,
        quote: &str,
        expiry: NaiveDate,
        strike: &str,
        kind: OptionKind,
    ) -> Self {
        Self {
            expiry: Some(expiry),
            strike: Some(strike.to_string()),
            option_kind: Some(kind),
            ..Self::new(venue, InstrumentType::Option, base, quote)
        }
    }

    fn new(venue: Venue, instrument_type: InstrumentType, base: &str, quote: &str) -> Self {
        Self {
            venue,
            instrument_type,
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
            expiry: None,
            strike: None,
            option_kind: None,
        }
    }

    /// The symbol portion after `VENUE:TYPE:`.
    pub fn symbol(&self) -> String {
        let mut s = format!("{}-{}", self.base, self.quote);
        if let Some(expiry) = self.expiry {
            s.push_str(&format!("-{}", expiry.format("%y%m%d")));
        }
        if let (Some(strike), Some(kind)) = (&self.strike, self.option_kind) {
            s.push_str(&format!("-{strike}-{kind}"));
        }
        s
    }

    /// `BASE-QUOTE`, the underlying of a derivative.
    pub fn underlying(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// Reconstructs the symbol the vendor expects in tick-download URLs.
    ///
    /// Deribit keeps its native dash grammar (`BTC-29DEC23-50000-C`,
    /// `BTC-PERPETUAL`); suffix venues concatenate base and quote, with the
    /// expiry decoration appended in the venue's own format.
    pub fn vendor_symbol(&self) -> String {
        match self.venue {
            Venue::Deribit => self.deribit_symbol(),
            _ => {
                let pair = format!("{}{}", self.base, self.quote);
                match (self.venue, self.expiry) {
                    (Venue::BinanceFutures, Some(expiry)) => {
                        format!("{pair}_{}", expiry.format("%y%m%d"))
                    }
                    (Venue::Okx | Venue::OkxFutures, Some(expiry)) => {
                        format!("{}-{}-{}", self.base, self.quote, expiry.format("%y%m%d"))
                    }
                    (Venue::Bybit, Some(expiry)) => {
                        format!("{}-{}", self.base, format_deribit_date(expiry))
                    }
                    _ => pair,
                }
            }
        }
    }

    fn deribit_symbol(&self) -> String {
        match self.instrument_type {
            InstrumentType::Perp => format!("{}-PERPETUAL", self.base),
            InstrumentType::Future => match self.expiry {
                Some(expiry) => format!("{}-{}", self.base, format_deribit_date(expiry)),
                None => self.base.clone(),
            },
            InstrumentType::Option => match (self.expiry, &self.strike, self.option_kind) {
                (Some(expiry), Some(strike), Some(kind)) => format!(
                    "{}-{}-{}-{}",
                    self.base,
                    format_deribit_date(expiry),
                    strike.replace('.', "d"),
                    kind.letter()
                ),
                _ => self.base.clone(),
            },
            InstrumentType::SpotPair => format!("{}_{}", self.base, self.quote),
        }
    }
}

/// Deribit date grammar: `29DEC23`, single-digit days without a leading zero
/// (`7NOV25`).
fn format_deribit_date(date: NaiveDate) -> String {
    const MONTHS: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    format!(
        "{}{}{:02}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year() % 100
    )
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.venue, self.instrument_type, self.symbol())
    }
}

impl FromStr for InstrumentKey {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CatalogError::InvalidKey(s.to_string());

        let mut components = s.splitn(3, ':');
        let venue: Venue = components
            .next()
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let instrument_type: InstrumentType = components
            .next()
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let symbol = components.next().ok_or_else(invalid)?;

        let parts: Vec<&str> = symbol.split('-').collect();
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        let base = parts[0].to_string();
        let quote = parts[1].to_string();

        match instrument_type {
            InstrumentType::SpotPair | InstrumentType::Perp => {
                if parts.len() != 2 {
                    return Err(invalid());
                }
                Ok(InstrumentKey {
                    venue,
                    instrument_type,
                    base,
                    quote,
                    expiry: None,
                    strike: None,
                    option_kind: None,
                })
            }
            InstrumentType::Future => {
                if parts.len() != 3 {
                    return Err(invalid());
                }
                Ok(InstrumentKey {
                    venue,
                    instrument_type,
                    base,
                    quote,
                    expiry: Some(parse_yymmdd(parts[2]).ok_or_else(invalid)?),
                    strike: None,
                    option_kind: None,
                })
            }
            InstrumentType::Option => {
                if parts.len() != 5 {
                    return Err(invalid());
                }
                let expiry = parse_yymmdd(parts[2]).ok_or_else(invalid)?;
                let strike = parts[3].to_string();
                if strike.parse::<f64>().is_err() {
                    return Err(invalid());
                }
                let option_kind: OptionKind = parts[4].parse().map_err(|_| invalid())?;
                Ok(InstrumentKey {
                    venue,
                    instrument_type,
                    base,
                    quote,
                    expiry: Some(expiry),
                    strike: Some(strike),
                    option_kind: Some(option_kind),
                })
            }
        }
    }
}

pub(crate) fn parse_yymmdd(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = 2000 + s[0..2].parse::<i32>().ok()?;
    let month = s[2..4].parse::<u32>().ok()?;
    let day = s[4..6].parse::<u32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_key_round_trips() {
        let key = InstrumentKey::spot(Venue::Binance, "BTC", "USDT");
        assert_eq!(key.to_string(), "BINANCE:SPOT_PAIR:BTC-USDT");
        assert_eq!(key.to_string().parse::<InstrumentKey>().unwrap(), key);
    }

    #[test]
    fn future_key_round_trips() {
        let expiry = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
        let key = InstrumentKey::future(Venue::BinanceFutures, "BTC", "USDT", expiry);
        assert_eq!(key.to_string(), "BINANCE-FUTURES:FUTURE:BTC-USDT-231229");
        assert_eq!(key.to_string().parse::<InstrumentKey>().unwrap(), key);
    }

    #[test]
    fn option_key_round_trips() {
        let expiry = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
        let key =
            InstrumentKey::option(Venue::Deribit, "BTC", "USD", expiry, "50000", OptionKind::Call);
        assert_eq!(key.to_string(), "DERIBIT:OPTION:BTC-USD-231229-50000-CALL");
        assert_eq!(key.to_string().parse::<InstrumentKey>().unwrap(), key);
    }

    #[test]
    fn deribit_option_key_maps_to_vendor_symbol() {
        let key: InstrumentKey = "DERIBIT:OPTION:BTC-USD-231229-50000-CALL".parse().unwrap();
        assert_eq!(key.vendor_symbol(), "BTC-29DEC23-50000-C");
    }

    #[test]
    fn deribit_single_digit_day_has_no_leading_zero() {
        let expiry = NaiveDate::from_ymd_opt(2025, 11, 7).unwrap();
        let key =
            InstrumentKey::option(Venue::Deribit, "BTC", "USD", expiry, "50000", OptionKind::Call);
        assert_eq!(key.vendor_symbol(), "BTC-7NOV25-50000-C");
    }

    #[test]
    fn deribit_decimal_strike_uses_d_notation() {
        let expiry = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
        let key =
            InstrumentKey::option(Venue::Deribit, "XRP", "USD", expiry, "1.14", OptionKind::Put);
        assert_eq!(key.vendor_symbol(), "XRP-29DEC23-1d14-P");
    }

    #[test]
    fn deribit_perp_vendor_symbol() {
        let key = InstrumentKey::perp(Venue::Deribit, "BTC", "USD");
        assert_eq!(key.vendor_symbol(), "BTC-PERPETUAL");
    }

    #[test]
    fn suffix_venue_vendor_symbols() {
        let key = InstrumentKey::spot(Venue::Binance, "ETH", "USDT");
        assert_eq!(key.vendor_symbol(), "ETHUSDT");

        let expiry = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
        let key = InstrumentKey::future(Venue::BinanceFutures, "BTC", "USDT", expiry);
        assert_eq!(key.vendor_symbol(), "BTCUSDT_231229");

        let key = InstrumentKey::future(Venue::OkxFutures, "BTC", "USDT", expiry);
        assert_eq!(key.vendor_symbol(), "BTC-USDT-231229");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for bad in [
            "BINANCE:SPOT_PAIR",
            "NOWHERE:SPOT_PAIR:BTC-USDT",
            "BINANCE:WIDGET:BTC-USDT",
            "BINANCE:SPOT_PAIR:BTCUSDT",
            "BINANCE-FUTURES:FUTURE:BTC-USDT",
            "BINANCE-FUTURES:FUTURE:BTC-USDT-99",
            "DERIBIT:OPTION:BTC-USD-231229-50000",
            "DERIBIT:OPTION:BTC-USD-231229-strike-CALL",
            "DERIBIT:OPTION:BTC-USD-231340-50000-CALL",
        ] {
            assert!(bad.parse::<InstrumentKey>().is_err(), "accepted: {bad}");
        }
    }

    #[test]
    fn no_underscore_in_symbol_portion() {
        let key = InstrumentKey::spot(Venue::Upbit, "BTC", "KRW");
        assert!(!key.symbol().contains('_'));
    }
}
