use crate::error::{Result, StoreError};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Tunable constants for the LSM path, plus the data root. Defaults mirror
/// the small values spec.md suggests for testability (a flush after a
/// handful of records, compaction once a handful of SSTs pile up).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_root: PathBuf,
    pub memtable_limit: usize,
    pub compaction_threshold: usize,
    pub maintenance_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./.docustore_data"),
            memtable_limit: 128,
            compaction_threshold: 4,
            maintenance_interval: Duration::from_secs(10),
        }
    }
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.memtable_limit == 0 {
            return Err(StoreError::InvalidConfig(
                "memtable_limit must be at least 1".to_string(),
            ));
        }
        if self.compaction_threshold < 2 {
            return Err(StoreError::InvalidConfig(
                "compaction_threshold must be at least 2".to_string(),
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(StoreError::InvalidConfig(
                "maintenance_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Reads `DATA_ROOT`, `MEMTABLE_LIMIT`, `COMPACTION_THRESHOLD`, and
    /// `MAINTENANCE_INTERVAL_SECS` with fallbacks to the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let data_root = env::var("DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_root);

        let memtable_limit = env::var("MEMTABLE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.memtable_limit);

        let compaction_threshold = env::var("COMPACTION_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.compaction_threshold);

        let maintenance_interval = env::var("MAINTENANCE_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.maintenance_interval);

        Self {
            data_root,
            memtable_limit,
            compaction_threshold,
            maintenance_interval,
        }
    }
}

#[derive(Default)]
pub struct StoreConfigBuilder {
    data_root: Option<PathBuf>,
    memtable_limit: Option<usize>,
    compaction_threshold: Option<usize>,
    maintenance_interval: Option<Duration>,
}

impl StoreConfigBuilder {
    pub fn data_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_root = Some(path.into());
        self
    }

    pub fn memtable_limit(mut self, limit: usize) -> Self {
        self.memtable_limit = Some(limit);
        self
    }

    pub fn compaction_threshold(mut self, threshold: usize) -> Self {
        self.compaction_threshold = Some(threshold);
        self
    }

    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<StoreConfig> {
        let defaults = StoreConfig::default();
        let config = StoreConfig {
            data_root: self.data_root.unwrap_or(defaults.data_root),
            memtable_limit: self.memtable_limit.unwrap_or(defaults.memtable_limit),
            compaction_threshold: self
                .compaction_threshold
                .unwrap_or(defaults.compaction_threshold),
            maintenance_interval: self
                .maintenance_interval
                .unwrap_or(defaults.maintenance_interval),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_memtable_limit() {
        let result = StoreConfig::builder().memtable_limit(0).build();
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_small_compaction_threshold() {
        let result = StoreConfig::builder().compaction_threshold(1).build();
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn builder_applies_overrides() {
        let config = StoreConfig::builder()
            .data_root("/tmp/x")
            .memtable_limit(16)
            .compaction_threshold(3)
            .build()
            .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/x"));
        assert_eq!(config.memtable_limit, 16);
        assert_eq!(config.compaction_threshold, 3);
    }
}
