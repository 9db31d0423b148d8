//! Image Pipeline Configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ReuseMode;

/// Image pipeline configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Memory cache capacity (KiB)
    pub memory_cache_kb: usize,

    /// Coalescing window for batched delivery (ms)
    pub flush_delay_ms: u64,

    /// Bound of each decode queue
    pub decode_queue_capacity: usize,

    /// Threads consuming the load queue
    pub decode_workers: usize,

    /// Reuse pool compatibility tier
    pub reuse_mode: ReuseMode,

    /// Free buffers the reuse pool keeps alive
    pub pool_max_retained: usize,

    /// Sleep each frame's delay during animation playback
    pub frame_pacing: bool,

    /// Root directory for bundled resources
    pub resource_dir: Option<PathBuf>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            memory_cache_kb: 32 * 1024, // 32MB
            flush_delay_ms: 100,
            decode_queue_capacity: 64,
            decode_workers: 1,
            reuse_mode: ReuseMode::ByteBudget,
            pool_max_retained: 8,
            frame_pacing: true,
            resource_dir: None,
        }
    }
}

impl ImageConfig {
    /// Parse from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn with_memory_cache_kb(mut self, kb: usize) -> Self {
        self.memory_cache_kb = kb;
        self
    }

    pub fn with_flush_delay_ms(mut self, ms: u64) -> Self {
        self.flush_delay_ms = ms;
        self
    }

    pub fn with_decode_queue_capacity(mut self, capacity: usize) -> Self {
        self.decode_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers.max(1);
        self
    }

    pub fn with_reuse_mode(mut self, mode: ReuseMode) -> Self {
        self.reuse_mode = mode;
        self
    }

    pub fn with_pool_max_retained(mut self, count: usize) -> Self {
        self.pool_max_retained = count;
        self
    }

    pub fn with_frame_pacing(mut self, pacing: bool) -> Self {
        self.frame_pacing = pacing;
        self
    }

    pub fn with_resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ImageConfig::default();
        assert_eq!(config.memory_cache_kb, 32768);
        assert_eq!(config.flush_delay(), Duration::from_millis(100));
        assert_eq!(config.decode_workers, 1);
        assert_eq!(config.reuse_mode, ReuseMode::ByteBudget);
        assert!(config.frame_pacing);
    }

    #[test]
    fn test_partial_json() {
        let config = ImageConfig::from_json(
            r#"{"memory_cache_kb": 512, "reuse_mode": "exact_dimensions", "resource_dir": "/assets"}"#,
        )
        .unwrap();
        assert_eq!(config.memory_cache_kb, 512);
        assert_eq!(config.reuse_mode, ReuseMode::ExactDimensions);
        assert_eq!(config.resource_dir, Some(PathBuf::from("/assets")));
        assert_eq!(config.flush_delay_ms, 100);
    }

    #[test]
    fn test_rejects_bad_json() {
        assert!(ImageConfig::from_json(r#"{"reuse_mode": "sometimes"}"#).is_err());
    }

    #[test]
    fn test_builders_clamp() {
        let config = ImageConfig::default().with_decode_workers(0).with_decode_queue_capacity(0);
        assert_eq!(config.decode_workers, 1);
        assert_eq!(config.decode_queue_capacity, 1);
    }
}
