//! Replication settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReplError, ReplResult};

/// Build version reported to remote clusters.
pub const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Replication run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Local build version, compared against each remote's version.
    pub version: String,
    /// Name recorded as the local side of every record detail.
    pub local_cluster_name: String,
    /// Page size when listing packages of a whole repository.
    pub package_page_size: usize,
    /// Page size when listing every version of a package.
    pub version_page_size: usize,
    /// Cap on the persisted error reason; unbounded when `None`.
    pub max_error_reason_len: Option<usize>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            local_cluster_name: "local".to_string(),
            package_page_size: 1000,
            version_page_size: 1000,
            max_error_reason_len: None,
        }
    }
}

impl ReplicationConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: Self = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would stall pagination.
    pub fn validate(&self) -> ReplResult<()> {
        if self.package_page_size == 0 {
            return Err(ReplError::Config {
                msg: "package_page_size must be positive".to_string(),
            });
        }
        if self.version_page_size == 0 {
            return Err(ReplError::Config {
                msg: "version_page_size must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_defaults() {
        let config = ReplicationConfig::default();
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.package_page_size, 1000);
        assert_eq!(config.version_page_size, 1000);
        assert!(config.max_error_reason_len.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "local_cluster_name = \"center\"\npackage_page_size = 50").unwrap();

        let config = ReplicationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.local_cluster_name, "center");
        assert_eq!(config.package_page_size, 50);
        assert_eq!(config.version_page_size, 1000);
    }

    #[test]
    fn test_from_json() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"version": "1.2.3", "max_error_reason_len": 256}}"#).unwrap();

        let config = ReplicationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.version, "1.2.3");
        assert_eq!(config.max_error_reason_len, Some(256));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "version_page_size = 0").unwrap();
        assert!(ReplicationConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_unknown_extension() {
        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(ReplicationConfig::from_file(file.path()).is_err());
    }
}
