//! Tuning configuration for the index maintainer.

use serde::{Deserialize, Serialize};

/// Operational thresholds driving flush and fusion decisions.
///
/// All limits are injected rather than hardcoded; the defaults suit a
/// mid-size index and every field can be overridden from deserialized
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintainerConfig {
    /// Memory segment footprint above which a flush is needed.
    pub flush_threshold_bytes: usize,

    /// Memory segment footprint above which the flush is urgent.
    pub urgent_flush_bytes: usize,

    /// Disk segment count above which a fusion is needed.
    pub max_disk_segments: usize,

    /// Disk segment count above which the fusion is urgent.
    pub urgent_disk_segments: usize,

    /// Total disk usage above which the fusion is urgent.
    pub urgent_disk_bytes: u64,

    /// Maximum number of segments fused in one pass.
    pub fusion_batch_size: usize,
}

impl Default for MaintainerConfig {
    fn default() -> Self {
        MaintainerConfig {
            flush_threshold_bytes: 16 * 1024 * 1024,
            urgent_flush_bytes: 64 * 1024 * 1024,
            max_disk_segments: 8,
            urgent_disk_segments: 16,
            urgent_disk_bytes: 4 * 1024 * 1024 * 1024,
            fusion_batch_size: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_ordered() {
        let config = MaintainerConfig::default();
        assert!(config.flush_threshold_bytes < config.urgent_flush_bytes);
        assert!(config.max_disk_segments < config.urgent_disk_segments);
        assert!(config.fusion_batch_size >= 2);
    }

    #[test]
    fn test_partial_overrides_from_json() {
        let config: MaintainerConfig =
            serde_json::from_str(r#"{"flush_threshold_bytes": 1024}"#).unwrap();
        assert_eq!(config.flush_threshold_bytes, 1024);
        assert_eq!(
            config.max_disk_segments,
            MaintainerConfig::default().max_disk_segments
        );
    }
}
