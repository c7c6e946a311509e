//! Cache configuration, loadable from JSON.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level cache settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Extension of sidecar metadata files, without the dot
    pub meta_extension: String,
    /// Worker threads of the async loader
    pub loader_threads: usize,
    /// Hold the resource lock while the upload hook runs
    pub lock_during_upload: bool,
    pub scheduler: SchedulerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            meta_extension: "meta".to_string(),
            loader_threads: 2,
            lock_during_upload: true,
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Scheduler pass settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cap on upload hook calls per pass; `None` is unlimited
    pub max_uploads_per_tick: Option<usize>,
    /// Retry dependency-deferred resources once at the end of a pass
    pub retry_deferred: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_uploads_per_tick: None,
            retry_deferred: true,
        }
    }
}

impl CacheConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CacheError::ConfigError(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CacheError::SerializationError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let ext = self.meta_extension.trim_start_matches('.');
        if ext.is_empty() {
            return Err(CacheError::ConfigError("meta_extension must not be empty".into()));
        }
        if self.loader_threads == 0 {
            return Err(CacheError::ConfigError("loader_threads must be at least 1".into()));
        }
        if self.scheduler.max_uploads_per_tick == Some(0) {
            return Err(CacheError::ConfigError(
                "max_uploads_per_tick must be positive or absent".into(),
            ));
        }
        Ok(())
    }

    /// Sidecar extension without a leading dot
    pub fn meta_extension(&self) -> &str {
        self.meta_extension.trim_start_matches('.')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.meta_extension(), "meta");
        assert_eq!(config.loader_threads, 2);
        assert!(config.lock_during_upload);
        assert_eq!(config.scheduler.max_uploads_per_tick, None);
        assert!(config.scheduler.retry_deferred);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config =
            CacheConfig::from_json_str(r#"{ "meta_extension": ".tos", "scheduler": { "max_uploads_per_tick": 4 } }"#)
                .unwrap();
        assert_eq!(config.meta_extension(), "tos");
        assert_eq!(config.loader_threads, 2);
        assert_eq!(config.scheduler.max_uploads_per_tick, Some(4));
        assert!(config.scheduler.retry_deferred);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            CacheConfig::from_json_str(r#"{ "loader_threads": 0 }"#),
            Err(CacheError::ConfigError(_))
        ));
        assert!(matches!(
            CacheConfig::from_json_str(r#"{ "meta_extension": "" }"#),
            Err(CacheError::ConfigError(_))
        ));
        assert!(matches!(
            CacheConfig::from_json_str("not json"),
            Err(CacheError::ConfigError(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = CacheConfig::default();
        config.lock_during_upload = false;
        let text = config.to_json_string().unwrap();
        assert_eq!(CacheConfig::from_json_str(&text).unwrap(), config);
    }
}
