use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Interval between two expiry sweeps of legacy fence transactions
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Timeout assumed for legacy records that carry none (v0 fences, group checkpoints)
pub const DEFAULT_LEGACY_FENCE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum snapshot size accepted on write and on restore
pub const DEFAULT_MAX_SNAPSHOT_SIZE: usize = 64 * 1024 * 1024; // 64 MB

/// Configuration for the group transaction tracker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// How often the expiry sweeper scans for abandoned legacy transactions
    #[serde(with = "crate::serde_utils::duration")]
    pub sweep_interval: Duration,

    /// Transaction timeout used for legacy records without one
    #[serde(with = "crate::serde_utils::duration")]
    pub legacy_fence_timeout: Duration,

    /// Extra margin past `begin_timestamp + timeout` before a legacy entry expires
    #[serde(with = "crate::serde_utils::duration")]
    pub expiry_grace: Duration,

    /// Directory for local snapshot files
    pub snapshot_dir: PathBuf,

    /// Number of local snapshot files retained
    pub snapshots_to_keep: usize,

    /// Upper bound for an encoded snapshot in bytes
    pub max_snapshot_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            legacy_fence_timeout: DEFAULT_LEGACY_FENCE_TIMEOUT,
            expiry_grace: Duration::ZERO,
            snapshot_dir: PathBuf::from("./data/group-tx-snapshots"),
            snapshots_to_keep: 3,
            max_snapshot_size: DEFAULT_MAX_SNAPSHOT_SIZE,
        }
    }
}

impl TrackerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the timeout assumed for legacy fences
    pub fn with_legacy_fence_timeout(mut self, timeout: Duration) -> Self {
        self.legacy_fence_timeout = timeout;
        self
    }

    /// Set the expiry grace margin
    pub fn with_expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }

    /// Set the snapshot directory
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    /// Set how many local snapshots are kept on disk
    pub fn with_snapshots_to_keep(mut self, keep: usize) -> Self {
        self.snapshots_to_keep = keep;
        self
    }

    /// Set the maximum snapshot size
    pub fn with_max_snapshot_size(mut self, max: usize) -> Self {
        self.max_snapshot_size = max;
        self
    }

    /// Reject settings the tracker cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }
        if self.snapshots_to_keep == 0 {
            return Err(TrackerError::InvalidConfig(
                "snapshots_to_keep must be at least 1".to_string(),
            ));
        }
        if self.max_snapshot_size == 0 {
            return Err(TrackerError::InvalidConfig(
                "max_snapshot_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.legacy_fence_timeout, Duration::from_secs(60));
        assert_eq!(config.expiry_grace, Duration::ZERO);
        assert_eq!(config.snapshots_to_keep, 3);
        assert_eq!(config.max_snapshot_size, 64 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = TrackerConfig::new()
            .with_sweep_interval(Duration::from_secs(5))
            .with_legacy_fence_timeout(Duration::from_secs(10))
            .with_expiry_grace(Duration::from_secs(1))
            .with_snapshot_dir("/var/lib/rivven/group-tx")
            .with_snapshots_to_keep(5)
            .with_max_snapshot_size(1024);

        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.legacy_fence_timeout, Duration::from_secs(10));
        assert_eq!(config.expiry_grace, Duration::from_secs(1));
        assert_eq!(config.snapshot_dir, PathBuf::from("/var/lib/rivven/group-tx"));
        assert_eq!(config.snapshots_to_keep, 5);
        assert_eq!(config.max_snapshot_size, 1024);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_interval = TrackerConfig::new().with_sweep_interval(Duration::ZERO);
        assert!(matches!(
            zero_interval.validate(),
            Err(TrackerError::InvalidConfig(_))
        ));

        let zero_keep = TrackerConfig::new().with_snapshots_to_keep(0);
        assert!(zero_keep.validate().is_err());

        let zero_size = TrackerConfig::new().with_max_snapshot_size(0);
        assert!(zero_size.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let config = TrackerConfig::new().with_expiry_grace(Duration::from_millis(250));
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: TrackerConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrackerConfig = serde_json::from_str(r#"{"sweep_interval": 1000}"#).unwrap();
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.snapshots_to_keep, 3);
    }
}
