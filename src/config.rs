use std::{env, path::Path};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;

use crate::error::{ConfigError, TickforgeResult};

// ================================================================================================
// Vendor API
// ================================================================================================

/// Connection settings for the upstream market-data vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorConfig {
    /// Bearer token. Must carry the vendor's `TD.` prefix.
    pub api_key: String,

    /// Base URL for both the catalog and the dataset endpoints.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Total per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Attempts for transient failures (network, 5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Host semaphore capacity: tasks admitted into the fetch/upload
    /// critical section at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: usize,

    /// Token-bucket capacity over a one-day refill horizon.
    #[serde(default = "default_rate_limit_per_vm")]
    pub rate_limit_per_vm: u64,
}

fn default_base_url() -> String {
    "https://datasets.tardis.dev".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_concurrent() -> usize {
    50
}
fn default_max_parallel_uploads() -> usize {
    20
}
fn default_rate_limit_per_vm() -> u64 {
    1_000_000
}

impl VendorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingOption("api_key".to_string()));
        }
        if !self.api_key.starts_with("TD.") {
            return Err(ConfigError::MalformedApiKey);
        }
        if self.timeout == 0 {
            return Err(invalid("timeout", "must be positive"));
        }
        if self.max_concurrent == 0 {
            return Err(invalid("max_concurrent", "must be positive"));
        }
        if self.max_parallel_uploads == 0 {
            return Err(invalid("max_parallel_uploads", "must be positive"));
        }
        if self.rate_limit_per_vm == 0 {
            return Err(invalid("rate_limit_per_vm", "must be positive"));
        }
        Ok(())
    }
}

// ================================================================================================
// Object Store
// ================================================================================================

/// Google Cloud Storage settings. The bucket holds every durable artifact;
/// all object paths are relative to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    pub project_id: String,
    pub credentials_path: String,
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "asia-northeast1-c".to_string()
}

impl GcsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::MissingOption("project_id".to_string()));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::MissingOption("bucket".to_string()));
        }
        if self.credentials_path.is_empty() {
            return Err(ConfigError::MissingOption("credentials_path".to_string()));
        }
        if !Path::new(&self.credentials_path).exists() {
            return Err(ConfigError::CredentialsNotFound(
                self.credentials_path.clone(),
            ));
        }
        Ok(())
    }
}

// ================================================================================================
// Service
// ================================================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum LogDestination {
    #[default]
    Local,
    Gcp,
    Both,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_destination: LogDestination,

    /// Targets processed per batch; bounds in-flight memory.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub memory_efficient: bool,

    #[serde(default = "default_enable_caching")]
    pub enable_caching: bool,

    /// Cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
}

fn default_batch_size() -> usize {
    100
}
fn default_enable_caching() -> bool {
    true
}
fn default_cache_ttl() -> u64 {
    3600
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_destination: LogDestination::default(),
            batch_size: default_batch_size(),
            memory_efficient: false,
            enable_caching: default_enable_caching(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

impl ServiceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        if self.cache_ttl == 0 {
            return Err(invalid("cache_ttl", "must be positive"));
        }
        Ok(())
    }
}

// ================================================================================================
// Sharding
// ================================================================================================

/// Work-space partitioning for distributed runs. `None` means unsharded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ShardingConfig {
    pub shard_index: Option<u32>,
    pub total_shards: Option<u32>,

    #[serde(default)]
    pub instruments_per_shard: Option<usize>,
}

impl ShardingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.shard_index, self.total_shards) {
            (None, None) => Ok(()),
            (Some(index), Some(total)) => {
                if total == 0 {
                    return Err(invalid("total_shards", "must be positive"));
                }
                if index >= total {
                    return Err(invalid(
                        "shard_index",
                        &format!("{index} out of range for {total} shards"),
                    ));
                }
                Ok(())
            }
            _ => Err(invalid(
                "shard_index/total_shards",
                "must be set together",
            )),
        }
    }

    pub fn as_pair(&self) -> Option<(u32, u32)> {
        self.shard_index.zip(self.total_shards)
    }
}

// ================================================================================================
// Output
// ================================================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    #[default]
    Parquet,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum Compression {
    #[default]
    Snappy,
    Gzip,
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub default_format: OutputFormat,

    #[serde(default)]
    pub compression: Compression,
}

// ================================================================================================
// Root
// ================================================================================================

/// The closed set of recognized options. Loaded once, validated eagerly,
/// then treated as frozen for the life of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub vendor: VendorConfig,
    pub gcs: GcsConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub sharding: ShardingConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from an optional YAML file, then applies
    /// environment overrides, then validates. Fails before any I/O happens.
    pub fn load(config_file: Option<&Path>) -> TickforgeResult<Self> {
        let mut config = match config_file {
            Some(path) => {
                let raw =
                    std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
                        path: path.display().to_string(),
                        msg: e.to_string(),
                    })?;
                let config: Config = serde_yaml::from_str(&raw).map_err(ConfigError::Parse)?;
                info!(path = %path.display(), "Loaded configuration file");
                config
            }
            None => Self::from_env_only()?,
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration purely from environment variables.
    fn from_env_only() -> Result<Self, ConfigError> {
        let api_key = env::var("VENDOR_API_KEY")
            .map_err(|_| ConfigError::MissingOption("VENDOR_API_KEY".to_string()))?;
        let project_id = env::var("GCP_PROJECT_ID")
            .map_err(|_| ConfigError::MissingOption("GCP_PROJECT_ID".to_string()))?;
        let credentials_path = env::var("GCP_CREDENTIALS_PATH")
            .map_err(|_| ConfigError::MissingOption("GCP_CREDENTIALS_PATH".to_string()))?;
        let bucket = env::var("GCS_BUCKET")
            .map_err(|_| ConfigError::MissingOption("GCS_BUCKET".to_string()))?;

        Ok(Config {
            vendor: VendorConfig {
                api_key,
                base_url: default_base_url(),
                timeout: default_timeout(),
                max_retries: default_max_retries(),
                max_concurrent: default_max_concurrent(),
                max_parallel_uploads: default_max_parallel_uploads(),
                rate_limit_per_vm: default_rate_limit_per_vm(),
            },
            gcs: GcsConfig {
                project_id,
                credentials_path,
                bucket,
                region: default_region(),
            },
            service: ServiceConfig::default(),
            sharding: ShardingConfig::default(),
            output: OutputConfig::default(),
        })
    }

    /// Environment variables win over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("VENDOR_API_KEY") {
            self.vendor.api_key = v;
        }
        if let Ok(v) = env::var("VENDOR_BASE_URL") {
            self.vendor.base_url = v;
        }
        if let Ok(v) = env::var("VENDOR_TIMEOUT")
            && let Ok(n) = v.parse()
        {
            self.vendor.timeout = n;
        }
        if let Ok(v) = env::var("VENDOR_MAX_RETRIES")
            && let Ok(n) = v.parse()
        {
            self.vendor.max_retries = n;
        }
        if let Ok(v) = env::var("MAX_CONCURRENT_REQUESTS")
            && let Ok(n) = v.parse()
        {
            self.vendor.max_concurrent = n;
        }
        if let Ok(v) = env::var("MAX_PARALLEL_UPLOADS")
            && let Ok(n) = v.parse()
        {
            self.vendor.max_parallel_uploads = n;
        }
        if let Ok(v) = env::var("RATE_LIMIT_PER_VM")
            && let Ok(n) = v.parse()
        {
            self.vendor.rate_limit_per_vm = n;
        }
        if let Ok(v) = env::var("GCP_PROJECT_ID") {
            self.gcs.project_id = v;
        }
        if let Ok(v) = env::var("GCP_CREDENTIALS_PATH") {
            self.gcs.credentials_path = v;
        }
        if let Ok(v) = env::var("GCS_BUCKET") {
            self.gcs.bucket = v;
        }
        if let Ok(v) = env::var("GCS_REGION") {
            self.gcs.region = v;
        }
        if let Ok(v) = env::var("LOG_LEVEL")
            && let Ok(level) = v.parse()
        {
            self.service.log_level = level;
        }
        if let Ok(v) = env::var("LOG_DESTINATION")
            && let Ok(dest) = v.parse()
        {
            self.service.log_destination = dest;
        }
        if let Ok(v) = env::var("BATCH_SIZE")
            && let Ok(n) = v.parse()
        {
            self.service.batch_size = n;
        }
        if let Ok(v) = env::var("SHARD_INDEX")
            && let Ok(n) = v.parse()
        {
            self.sharding.shard_index = Some(n);
        }
        if let Ok(v) = env::var("TOTAL_SHARDS")
            && let Ok(n) = v.parse()
        {
            self.sharding.total_shards = Some(n);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vendor.validate()?;
        self.gcs.validate()?;
        self.service.validate()?;
        self.sharding.validate()?;
        Ok(())
    }
}

fn invalid(option: &str, msg: &str) -> ConfigError {
    ConfigError::InvalidValue {
        option: option.to_string(),
        msg: msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_vendor() -> VendorConfig {
        VendorConfig {
            api_key: "TD.test-key".to_string(),
            base_url: default_base_url(),
            timeout: 30,
            max_retries: 3,
            max_concurrent: 20,
            max_parallel_uploads: 10,
            rate_limit_per_vm: 1_000_000,
        }
    }

    #[test]
    fn api_key_prefix_is_enforced() {
        let mut vendor = valid_vendor();
        assert!(vendor.validate().is_ok());

        vendor.api_key = "sk-not-a-vendor-key".to_string();
        assert!(matches!(
            vendor.validate(),
            Err(ConfigError::MalformedApiKey)
        ));
    }

    #[test]
    fn shard_index_must_fit_total() {
        let sharding = ShardingConfig {
            shard_index: Some(4),
            total_shards: Some(4),
            instruments_per_shard: None,
        };
        assert!(sharding.validate().is_err());

        let sharding = ShardingConfig {
            shard_index: Some(3),
            total_shards: Some(4),
            instruments_per_shard: None,
        };
        assert!(sharding.validate().is_ok());
    }

    #[test]
    fn sharding_fields_must_come_together() {
        let sharding = ShardingConfig {
            shard_index: Some(0),
            total_shards: None,
            instruments_per_shard: None,
        };
        assert!(sharding.validate().is_err());
    }

    #[test]
    fn yaml_round_trip_with_defaults() {
        let yaml = r#"
vendor:
  api_key: "TD.abc"
gcs:
  project_id: "p"
  credentials_path: "/dev/null"
  bucket: "b"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.vendor.timeout, 30);
        assert_eq!(config.service.batch_size, 100);
        assert_eq!(config.output.compression, Compression::Snappy);
        assert_eq!(config.output.default_format, OutputFormat::Parquet);
        assert!(config.sharding.as_pair().is_none());
    }
}
