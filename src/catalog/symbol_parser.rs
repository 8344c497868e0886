use std::sync::LazyLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;

use crate::{
    catalog::venue::{OptionKind, SymbolType, Venue},
    error::CatalogError,
};

// ================================================================================================
// Symbol Kind
// ================================================================================================

/// Structural classification of a vendor symbol after parsing. A tagged
/// variant rather than a hierarchy: every downstream consumer matches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
    SpotPair,
    Perp,
    Future {
        expiry: NaiveDate,
    },
    Option {
        expiry: NaiveDate,
        strike: Option<String>,
        kind: Option<OptionKind>,
    },
}

impl SymbolKind {
    pub fn expiry(&self) -> Option<NaiveDate> {
        match self {
            SymbolKind::Future { expiry } => Some(*expiry),
            SymbolKind::Option { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }
}

/// The fully parsed form of one vendor symbol: asset triple plus structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbol {
    pub base: String,
    pub quote: String,
    pub settle: String,
    pub kind: SymbolKind,
}

// ================================================================================================
// Expiry grammars
// ================================================================================================

/// How a captured expiry fragment decodes into a date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpiryGrammar {
    /// `231229` — two-digit year, month, day.
    Yymmdd,
    /// `29DEC23` or `7NOV25` — day (one or two digits), month name, year.
    DayMonYy,
    /// `Z25` — futures month code plus two-digit year, resolving to the last
    /// day of the coded month.
    MonthCodeYy,
}

struct ExpiryPattern {
    regex: Regex,
    grammar: ExpiryGrammar,
}

impl ExpiryPattern {
    fn new(pattern: &str, grammar: ExpiryGrammar) -> Self {
        Self {
            // Tables are static; the patterns are known-good literals.
            regex: Regex::new(pattern).unwrap(),
            grammar,
        }
    }
}

/// The per-venue parsing table: expiry patterns in match order, plus option
/// strike and type patterns where the venue encodes them in symbol names.
struct PatternTable {
    expiry: Vec<ExpiryPattern>,
    strike: Option<Regex>,
    option_kind: Option<Regex>,
}

static DERIBIT_TABLE: LazyLock<PatternTable> = LazyLock::new(|| PatternTable {
    expiry: vec![
        // Single-digit day first so `7NOV25` is not shadowed.
        ExpiryPattern::new(r"-(\d[A-Z]{3}\d{2})-", ExpiryGrammar::DayMonYy),
        ExpiryPattern::new(r"-(\d{2}[A-Z]{3}\d{2})-", ExpiryGrammar::DayMonYy),
        ExpiryPattern::new(r"-(\d{2}[A-Z]{3}\d{2})$", ExpiryGrammar::DayMonYy),
        ExpiryPattern::new(r"-(\d{6})$", ExpiryGrammar::Yymmdd),
        ExpiryPattern::new(r"([FGHJKMNQUVXZ])(\d{2})$", ExpiryGrammar::MonthCodeYy),
        // Infix YYMMDD last: six-digit strikes would shadow it otherwise.
        ExpiryPattern::new(r"-(\d{6})-", ExpiryGrammar::Yymmdd),
    ],
    strike: Some(Regex::new(r"-(\d+d?\d*)-").unwrap()),
    option_kind: Some(Regex::new(r"-(C|P)$").unwrap()),
});

static BINANCE_FUTURES_TABLE: LazyLock<PatternTable> = LazyLock::new(|| PatternTable {
    expiry: vec![ExpiryPattern::new(r"_(\d{6})$", ExpiryGrammar::Yymmdd)],
    strike: None,
    option_kind: None,
});

static BYBIT_TABLE: LazyLock<PatternTable> = LazyLock::new(|| PatternTable {
    expiry: vec![
        ExpiryPattern::new(r"([FGHJKMNQUVXZ])(\d{2})$", ExpiryGrammar::MonthCodeYy),
        ExpiryPattern::new(r"-(\d{2}[A-Z]{3}\d{2})$", ExpiryGrammar::DayMonYy),
    ],
    strike: None,
    option_kind: None,
});

static OKX_TABLE: LazyLock<PatternTable> = LazyLock::new(|| PatternTable {
    expiry: vec![ExpiryPattern::new(r"-(\d{6})$", ExpiryGrammar::Yymmdd)],
    strike: None,
    option_kind: None,
});

fn pattern_table(venue: Venue) -> Option<&'static PatternTable> {
    match venue {
        Venue::Deribit => Some(&DERIBIT_TABLE),
        Venue::BinanceFutures => Some(&BINANCE_FUTURES_TABLE),
        Venue::Bybit => Some(&BYBIT_TABLE),
        Venue::Okx | Venue::OkxFutures => Some(&OKX_TABLE),
        _ => None,
    }
}

// ================================================================================================
// Expiry decoding
// ================================================================================================

fn month_from_name(name: &str) -> Option<u32> {
    const NAMES: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    NAMES.iter().position(|m| *m == name).map(|i| i as u32 + 1)
}

/// Futures month codes, January through December.
fn month_from_code(code: &str) -> Option<u32> {
    const CODES: [&str; 12] = ["F", "G", "H", "J", "K", "M", "N", "Q", "U", "V", "X", "Z"];
    CODES.iter().position(|c| *c == code).map(|i| i as u32 + 1)
}

fn decode_yymmdd(fragment: &str) -> Option<NaiveDate> {
    super::instrument_key::parse_yymmdd(fragment)
}

/// Decodes `29DEC23` and `7NOV25` alike: everything before the trailing five
/// characters is the day.
fn decode_day_mon_yy(fragment: &str) -> Option<NaiveDate> {
    if fragment.len() < 6 {
        return None;
    }
    let (day_str, rest) = fragment.split_at(fragment.len() - 5);
    let day: u32 = day_str.parse().ok()?;
    let month = month_from_name(&rest[..3])?;
    let year = 2000 + rest[3..].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(first_of_next - Duration::days(1))
}

/// Tries every pattern in the venue's table, in order; the first one that
/// both matches and decodes wins.
pub fn parse_expiry(venue: Venue, symbol: &str) -> Option<NaiveDate> {
    let table = pattern_table(venue)?;
    for pattern in &table.expiry {
        let Some(captures) = pattern.regex.captures(symbol) else {
            continue;
        };
        let decoded = match pattern.grammar {
            ExpiryGrammar::Yymmdd => decode_yymmdd(&captures[1]),
            ExpiryGrammar::DayMonYy => decode_day_mon_yy(&captures[1]),
            ExpiryGrammar::MonthCodeYy => {
                let month = month_from_code(&captures[1])?;
                let year = 2000 + captures[2].parse::<i32>().ok()?;
                last_day_of_month(year, month)
            }
        };
        if decoded.is_some() {
            return decoded;
        }
    }
    None
}

/// Option strike from the symbol name, with the venue's `d`-as-decimal-point
/// notation normalized (`1d14` → `1.14`).
pub fn parse_strike(venue: Venue, symbol: &str) -> Option<String> {
    let table = pattern_table(venue)?;
    let regex = table.strike.as_ref()?;
    // The expiry fragment also sits between dashes, so scan all candidates
    // and keep the first that is not a date.
    for captures in regex.captures_iter(symbol) {
        let raw = &captures[1];
        if raw.len() == 6 && decode_yymmdd(raw).is_some() {
            continue;
        }
        return Some(raw.replace('d', "."));
    }
    None
}

pub fn parse_option_kind(venue: Venue, symbol: &str) -> Option<OptionKind> {
    let table = pattern_table(venue)?;
    let regex = table.option_kind.as_ref()?;
    let captures = regex.captures(symbol)?;
    OptionKind::from_letter(&captures[1])
}

// ================================================================================================
// Asset extraction
// ================================================================================================

/// Known quote suffixes, tried in listed order so `USDT` wins over `USD`.
const QUOTE_SUFFIXES: [&str; 14] = [
    "USDT", "USDC", "BUSD", "USD", "DAI", "GBP", "TUSD", "EUR", "TRY", "BRL", "JPY", "KRW",
    "CNY", "HKD",
];

static BASE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]*([A-Za-z]+)").unwrap());

/// Removes the first recognized quote suffix from a concatenated pair and
/// returns `(rest, quote)`. Falls back to `USD` when nothing matches.
fn strip_quote_suffix(symbol: &str) -> (String, String) {
    let upper = symbol.to_uppercase();
    for suffix in QUOTE_SUFFIXES {
        if upper.contains(suffix) {
            return (upper.replace(suffix, ""), suffix.to_string());
        }
    }
    (upper, "USD".to_string())
}

fn base_from_prefix(rest: &str) -> Option<String> {
    let head = rest.split('-').next()?;
    let captures = BASE_RE.captures(head)?;
    Some(captures[1].to_uppercase())
}

/// Extracts `(base, quote, settle)` from a vendor symbol.
///
/// Two families: dash-separated venues split on `-` (Deribit derivatives are
/// USD-quoted and coin-margined unless the leading segment names a linear
/// pair), suffix venues strip the longest known quote code. A hyphenated
/// symbol with no digits is a plain currency pair on any venue.
pub fn extract_assets(
    venue: Venue,
    symbol: &str,
    symbol_type: SymbolType,
) -> Result<(String, String, String), CatalogError> {
    let unparseable = || CatalogError::UnparseableAssets(symbol.to_string());

    if venue == Venue::Upbit {
        let parts: Vec<&str> = symbol.split('-').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(unparseable());
        }
        let base = parts[0].to_uppercase();
        let quote = parts[1].to_uppercase();
        return Ok((base, quote.clone(), quote));
    }

    if venue == Venue::Deribit && symbol_type.is_derivative() {
        let Some(head) = symbol.split('-').next().filter(|h| *h != symbol) else {
            return Err(unparseable());
        };
        // Linear contracts name the pair in the leading segment (BTC_USDC);
        // inverse contracts are USD-quoted and coin-margined.
        return Ok(match head.split_once('_') {
            Some((base, quote)) => {
                let quote = quote.to_uppercase();
                (base.to_uppercase(), quote.clone(), quote)
            }
            None => {
                let base = head.to_uppercase();
                (base.clone(), "USD".to_string(), base)
            }
        });
    }

    // Fiat-style pairs carry an explicit dash and no digits (USDT-TRY).
    if symbol.contains('-') && !symbol.bytes().any(|b| b.is_ascii_digit()) {
        let parts: Vec<&str> = symbol.split('-').collect();
        if parts.len() == 2 && parts.iter().all(|p| !p.is_empty()) {
            let base = parts[0].to_uppercase();
            let quote = parts[1].to_uppercase();
            return Ok((base, quote.clone(), quote));
        }
    }

    let (rest, quote) = strip_quote_suffix(symbol);
    let base = base_from_prefix(&rest).ok_or_else(unparseable)?;
    let settle = if quote == "USD" { base.clone() } else { quote.clone() };
    Ok((base, quote, settle))
}

// ================================================================================================
// Full parse
// ================================================================================================

/// Parses one vendor symbol into assets plus structure.
///
/// `fallback_expiry` supplies the expiry when the vendor reported an
/// `availableTo` but the symbol name carries no date of its own; futures and
/// options with neither are rejected.
pub fn parse_symbol(
    venue: Venue,
    symbol: &str,
    symbol_type: SymbolType,
    fallback_expiry: Option<NaiveDate>,
) -> Result<ParsedSymbol, CatalogError> {
    let (base, quote, settle) = extract_assets(venue, symbol, symbol_type)?;

    let kind = match symbol_type {
        SymbolType::Spot => SymbolKind::SpotPair,
        SymbolType::Perpetual => SymbolKind::Perp,
        SymbolType::Future => {
            let expiry = parse_expiry(venue, symbol).or(fallback_expiry).ok_or(
                CatalogError::MissingExpiry {
                    symbol: symbol.to_string(),
                    symbol_type: symbol_type.to_string(),
                },
            )?;
            SymbolKind::Future { expiry }
        }
        SymbolType::Option | SymbolType::Combo => {
            let expiry = parse_expiry(venue, symbol).or(fallback_expiry).ok_or(
                CatalogError::MissingExpiry {
                    symbol: symbol.to_string(),
                    symbol_type: symbol_type.to_string(),
                },
            )?;
            SymbolKind::Option {
                expiry,
                strike: parse_strike(venue, symbol),
                kind: parse_option_kind(venue, symbol),
            }
        }
    };

    Ok(ParsedSymbol {
        base,
        quote,
        settle,
        kind,
    })
}
