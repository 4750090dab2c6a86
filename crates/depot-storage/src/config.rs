//! Credentials and tuning knobs for the object-storage client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

const MIB: u64 = 1024 * 1024;

/// Access credentials and addressing for one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CosCredentials {
    /// Access key id.
    pub secret_id: String,
    /// Secret access key used for request signing.
    pub secret_key: String,
    /// Region the bucket lives in.
    pub region: String,
    /// Bucket name.
    pub bucket: String,
    /// Explicit host, overriding the `{bucket}.cos.{region}.myqcloud.com` default.
    pub endpoint: Option<String>,
    /// URL scheme, `https` unless talking to a local emulator.
    pub scheme: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for CosCredentials {
    fn default() -> Self {
        Self {
            secret_id: String::new(),
            secret_key: String::new(),
            region: String::new(),
            bucket: String::new(),
            endpoint: None,
            scheme: "https".to_string(),
            timeout_secs: 60,
        }
    }
}

impl CosCredentials {
    /// Host header value for requests against this bucket.
    pub fn host(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("{}.cos.{}.myqcloud.com", self.bucket, self.region),
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Upload sizing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Files strictly larger than this are uploaded in parts.
    pub multipart_upload_threshold: u64,
    /// Floor for the computed part size.
    pub minimum_upload_part_size: u64,
    /// Ceiling on the number of parts of one upload.
    pub max_upload_parts: u64,
    /// Validity window of a request signature.
    pub sign_expire_secs: u64,
    /// Attempt ceiling for part uploads and for the complete call.
    pub max_attempts: u32,
    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,
    /// Exponential growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            multipart_upload_threshold: 10 * MIB,
            minimum_upload_part_size: 10 * MIB,
            max_upload_parts: 10_000,
            sign_expire_secs: 3600,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ClientConfig {
    /// Retry settings derived from this config.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
        }
    }
}

/// On-disk form: both sections in one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket credentials.
    pub credentials: CosCredentials,
    /// Client tuning.
    pub client: ClientConfig,
}

impl StorageConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }
}
