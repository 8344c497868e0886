use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

pub type TickforgeResult<T> = Result<T, TickforgeError>;

#[derive(Debug, Error)]
pub enum TickforgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors raised while loading or validating configuration. Always fatal at
/// startup, before any I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required option: {0}")]
    MissingOption(String),

    #[error("Invalid value for '{option}': {msg}")]
    InvalidValue { option: String, msg: String },

    #[error("Malformed vendor API key (expected 'TD.' prefix)")]
    MalformedApiKey,

    #[error("Credentials file not found: {0}")]
    CredentialsNotFound(String),

    #[error("Failed to read config file '{path}': {msg}")]
    Unreadable { path: String, msg: String },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors related to instrument catalogs: symbol parsing, key round-trips,
/// and definition assembly. Per-symbol failures are counted, not raised.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unknown venue: '{0}'")]
    UnknownVenue(String),

    #[error("Unknown symbol type: '{0}'")]
    UnknownSymbolType(String),

    #[error("Unknown product: '{0}'")]
    UnknownProduct(String),

    #[error("Invalid instrument key: '{0}'")]
    InvalidKey(String),

    #[error("Missing expiry for {symbol} ({symbol_type})")]
    MissingExpiry { symbol: String, symbol_type: String },

    #[error("Cannot extract assets from symbol: '{0}'")]
    UnparseableAssets(String),

    #[error("Invalid availability timestamp '{value}': {msg}")]
    InvalidTimestamp { value: String, msg: String },

    #[error("Failed to parse integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("Failed to parse float: {0}")]
    ParseFloat(#[from] ParseFloatError),

    #[error("Failed to parse enum: {0}")]
    ParseEnum(#[from] strum::ParseError),

    #[error("Data frame error: {0}")]
    DataFrame(String),
}

/// Errors related to the vendor HTTP API.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Rate limited (HTTP 429), retry-after: {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("No data for target (HTTP 404): {0}")]
    NotFound(String),

    #[error("Failed to decompress response: {0}")]
    Decompress(String),

    #[error("Malformed catalog response: {0}")]
    MalformedResponse(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Errors related to object storage and columnar file I/O.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to build object store: {0}")]
    StoreBuild(String),

    #[error("Failed to build object path '{0}'")]
    PathBuild(String),

    #[error("Failed to write object '{path}': {msg}")]
    WriteFailed { path: String, msg: String },

    #[error("Failed to read object '{path}': {msg}")]
    ReadFailed { path: String, msg: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Failed to list prefix '{prefix}': {msg}")]
    ListFailed { prefix: String, msg: String },

    #[error("Failed to encode parquet: {0}")]
    ParquetEncode(String),

    #[error("Failed to decode parquet '{path}': {msg}")]
    ParquetDecode { path: String, msg: String },

    #[error("IO operation failed")]
    Io(#[from] std::io::Error),
}

/// Errors related to internal invariants and bugs.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid shard configuration: index {index} of {total}")]
    InvalidShard { index: u32, total: u32 },

    #[error("System error: {0}")]
    Generic(String),
}

impl TransportError {
    /// True for failures worth another attempt: timeouts, connect errors,
    /// rate limits, and server-side statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connection(_) | TransportError::Timeout(_) => true,
            TransportError::RateLimited { .. } => true,
            TransportError::Status { status, .. } => *status >= 500 || *status == 408,
            _ => false,
        }
    }
}
