//! Configuration module for CloudSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::quirks::{ListVersion, QuirkOverrides, MAX_UPLOAD_PARTS, MIN_CHUNK_SIZE};

const MIB: u64 = 1024 * 1024;

/// Largest part the protocol accepts, and so the largest single-part upload cutoff.
pub const MAX_UPLOAD_CUTOFF: u64 = 5 * 1024 * MIB;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for CloudSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub transfer: TransferConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Connection and provider settings for the S3-compatible remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Provider identity used to resolve quirks, e.g. `AWS`, `Minio`, `Ceph`.
    pub provider: String,
    /// Region requests are signed for.
    pub region: String,
    /// Custom endpoint URL. When set, region redirects cannot be followed.
    pub endpoint: Option<String>,
    /// Location constraint sent when creating buckets.
    pub location_constraint: Option<String>,
    /// Canned ACL applied to objects.
    pub acl: Option<String>,
    /// Canned ACL applied to new buckets.
    pub bucket_acl: Option<String>,
    /// Storage class applied to objects.
    pub storage_class: Option<String>,
    /// Put the bucket in the URL path instead of the host name.
    pub force_path_style: bool,
    /// Assume buckets exist and never try to create them.
    pub no_check_bucket: bool,
    /// Listing version override (1 or 2).
    pub list_version: Option<u8>,
    /// Whether to ask for URL-encoded listings.
    pub list_url_encode: Option<bool>,
    /// Whether multipart ETags can be verified.
    pub use_multipart_etag: Option<bool>,
    /// Whether `BucketAlreadyExists` means another owner.
    pub use_already_exists: Option<bool>,
    /// Whether the provider accepts multipart uploads.
    pub use_multipart_uploads: Option<bool>,
}

/// Chunking and concurrency settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Part size for multipart uploads, in bytes.
    pub chunk_size: u64,
    /// Objects at or above this size (in bytes) are uploaded in parts.
    pub upload_cutoff: u64,
    /// Objects at or above this size (in bytes) are copied in parts.
    pub copy_cutoff: u64,
    /// Parts uploaded or copied at the same time for one object.
    pub upload_concurrency: usize,
    /// Part-count ceiling, further limited by the provider.
    pub max_upload_parts: u32,
    /// Keep uploaded parts when a multipart upload fails.
    pub leave_parts_on_error: bool,
    /// Skip Content-MD5 headers and ETag verification.
    pub disable_checksum: bool,
}

/// Retry/backoff settings for every remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Backoff floor in milliseconds.
    pub min_sleep_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_sleep_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `pretty` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cloudsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cloudsync")
            .join("config.yaml")
    }

    /// Quirk overrides derived from the explicit remote and transfer settings.
    pub fn quirk_overrides(&self) -> QuirkOverrides {
        QuirkOverrides {
            list_version: self.remote.list_version.and_then(ListVersion::from_number),
            list_url_encode: self.remote.list_url_encode,
            use_multipart_etag: self.remote.use_multipart_etag,
            use_already_exists: self.remote.use_already_exists,
            use_multipart_uploads: self.remote.use_multipart_uploads,
            force_path_style: self.remote.force_path_style,
            max_upload_parts: self.transfer.max_upload_parts,
        }
    }
}

impl RetryConfig {
    /// Backoff floor as a [`Duration`].
    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    /// Backoff ceiling as a [`Duration`].
    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: "AWS".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            location_constraint: None,
            acl: None,
            bucket_acl: None,
            storage_class: None,
            force_path_style: true,
            no_check_bucket: false,
            list_version: None,
            list_url_encode: None,
            use_multipart_etag: None,
            use_already_exists: None,
            use_multipart_uploads: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: MIN_CHUNK_SIZE,
            upload_cutoff: 200 * MIB,
            copy_cutoff: 4768 * MIB,
            upload_concurrency: 4,
            max_upload_parts: MAX_UPLOAD_PARTS,
            leave_parts_on_error: false,
            disable_checksum: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_sleep_ms: 10,
            max_sleep_ms: 2000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"transfer.chunk_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["pretty", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            });
        };

        // --- remote ---
        if self.remote.provider.trim().is_empty() {
            push("remote.provider", "must not be empty".into());
        }
        if self.remote.region.trim().is_empty() {
            push("remote.region", "must not be empty".into());
        }
        if let Some(v) = self.remote.list_version {
            if ListVersion::from_number(v).is_none() {
                push("remote.list_version", format!("must be 1 or 2, got {v}"));
            }
        }

        // --- transfer ---
        let t = &self.transfer;
        if t.chunk_size < MIN_CHUNK_SIZE {
            push(
                "transfer.chunk_size",
                format!("must be at least {MIN_CHUNK_SIZE} bytes"),
            );
        }
        if t.upload_cutoff > MAX_UPLOAD_CUTOFF {
            push(
                "transfer.upload_cutoff",
                format!("must be at most {MAX_UPLOAD_CUTOFF} bytes"),
            );
        }
        if t.copy_cutoff < MIN_CHUNK_SIZE {
            push(
                "transfer.copy_cutoff",
                format!("must be at least {MIN_CHUNK_SIZE} bytes"),
            );
        }
        if t.upload_concurrency == 0 {
            push("transfer.upload_concurrency", "must be greater than 0".into());
        }
        if t.max_upload_parts == 0 || t.max_upload_parts > MAX_UPLOAD_PARTS {
            push(
                "transfer.max_upload_parts",
                format!("must be between 1 and {MAX_UPLOAD_PARTS}"),
            );
        }

        // --- retry ---
        if self.retry.max_attempts == 0 {
            push("retry.max_attempts", "must be greater than 0".into());
        }
        if self.retry.min_sleep_ms > self.retry.max_sleep_ms {
            push(
                "retry.min_sleep_ms",
                "must not exceed retry.max_sleep_ms".into(),
            );
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            push(
                "logging.level",
                format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            push(
                "logging.format",
                format!(
                    "invalid format '{}', expected one of: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            );
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder starting from [`Config::default`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- remote ---

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.config.remote.provider = provider.into();
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.remote.region = region.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.remote.endpoint = Some(endpoint.into());
        self
    }

    pub fn location_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.config.remote.location_constraint = Some(constraint.into());
        self
    }

    pub fn bucket_acl(mut self, acl: impl Into<String>) -> Self {
        self.config.remote.bucket_acl = Some(acl.into());
        self
    }

    pub fn acl(mut self, acl: impl Into<String>) -> Self {
        self.config.remote.acl = Some(acl.into());
        self
    }

    pub fn storage_class(mut self, class: impl Into<String>) -> Self {
        self.config.remote.storage_class = Some(class.into());
        self
    }

    pub fn force_path_style(mut self, enabled: bool) -> Self {
        self.config.remote.force_path_style = enabled;
        self
    }

    pub fn no_check_bucket(mut self, enabled: bool) -> Self {
        self.config.remote.no_check_bucket = enabled;
        self
    }

    pub fn use_multipart_etag(mut self, enabled: bool) -> Self {
        self.config.remote.use_multipart_etag = Some(enabled);
        self
    }

    // --- transfer ---

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.config.transfer.chunk_size = bytes;
        self
    }

    pub fn upload_cutoff(mut self, bytes: u64) -> Self {
        self.config.transfer.upload_cutoff = bytes;
        self
    }

    pub fn copy_cutoff(mut self, bytes: u64) -> Self {
        self.config.transfer.copy_cutoff = bytes;
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.transfer.upload_concurrency = n;
        self
    }

    pub fn max_upload_parts(mut self, n: u32) -> Self {
        self.config.transfer.max_upload_parts = n;
        self
    }

    pub fn leave_parts_on_error(mut self, enabled: bool) -> Self {
        self.config.transfer.leave_parts_on_error = enabled;
        self
    }

    pub fn disable_checksum(mut self, disabled: bool) -> Self {
        self.config.transfer.disable_checksum = disabled;
        self
    }

    // --- retry ---

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n;
        self
    }

    pub fn min_sleep_ms(mut self, ms: u64) -> Self {
        self.config.retry.min_sleep_ms = ms;
        self
    }

    pub fn max_sleep_ms(mut self, ms: u64) -> Self {
        self.config.retry.max_sleep_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
