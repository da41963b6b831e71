//! Engine configuration.

use crate::error::{Error, Result};
use sema_spatial::CurveKind;
use sema_vector::Metric;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base directory for all durable state (atoms.log, anchors/, index/)
    pub data_dir: PathBuf,

    /// Default metric for auto-routed KNN
    pub metric: Metric,

    /// Maximum accepted payload size in bytes (default: 1 MiB)
    pub max_payload_bytes: usize,

    /// Corpus size at which KNN switches from exact scan to the hybrid
    /// coarse-filter path (default: 10_000)
    pub brute_force_threshold: usize,

    /// Phase-1 candidate over-fetch as a multiple of k (default: 10).
    /// Trades recall for latency; the documented recall floor assumes >= 10.
    pub over_fetch_factor: usize,

    /// Space-filling curve for locality keys
    pub curve: CurveKind,

    /// Bounding-region half-extent for projected coordinates
    pub region: f64,

    /// Staged index mutations accumulated before a generation publish
    /// (default: 1 = publish on every mutation)
    pub publish_threshold: usize,

    /// Embedding call behavior
    pub embed: EmbedConfig,

    /// Background maintenance loop behavior
    pub maintenance: MaintenanceConfig,

    /// Voronoi partition table parameters
    pub partitions: PartitionConfig,
}

/// External embedder call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Per-call timeout in milliseconds (default: 5_000)
    pub timeout_ms: u64,

    /// Total attempts before an ingestion event is dead-lettered
    /// (default: 5, including the inline attempt)
    pub max_attempts: u32,

    /// Base backoff between retries in milliseconds (default: 50);
    /// doubles per attempt up to `backoff_cap_ms`
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds (default: 5_000)
    pub backoff_cap_ms: u64,

    /// Pending-retry queue bound; overflow dead-letters immediately
    /// (default: 1_024)
    pub queue_depth: usize,
}

/// Background maintenance loop policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Loop interval in milliseconds (default: 500)
    pub interval_ms: u64,

    /// Max atoms reprojected per loop iteration (default: 256)
    pub reproject_batch: usize,
}

/// Voronoi partition table parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Number of k-means cells (default: 16)
    pub cells: usize,

    /// Seed for deterministic centroid initialization
    pub seed: u64,

    /// Default boundary margin for including adjacent cells (default: 0.0)
    pub boundary_margin: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            metric: Metric::Cosine,
            max_payload_bytes: 1024 * 1024,
            brute_force_threshold: 10_000,
            over_fetch_factor: 10,
            curve: CurveKind::Morton,
            region: 1024.0,
            publish_threshold: 1,
            embed: EmbedConfig::default(),
            maintenance: MaintenanceConfig::default(),
            partitions: PartitionConfig::default(),
        }
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_attempts: 5,
            backoff_base_ms: 50,
            backoff_cap_ms: 5_000,
            queue_depth: 1_024,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            reproject_batch: 256,
        }
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            cells: 16,
            seed: 42,
            boundary_margin: 0.0,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            return Err(Error::Config("max_payload_bytes must be > 0".to_string()));
        }

        if self.over_fetch_factor == 0 {
            return Err(Error::Config("over_fetch_factor must be > 0".to_string()));
        }

        if self.region <= 0.0 || !self.region.is_finite() {
            return Err(Error::Config("region must be positive and finite".to_string()));
        }

        if self.publish_threshold == 0 {
            return Err(Error::Config("publish_threshold must be > 0".to_string()));
        }

        if self.embed.max_attempts == 0 {
            return Err(Error::Config("embed.max_attempts must be > 0".to_string()));
        }

        if self.embed.queue_depth == 0 {
            return Err(Error::Config("embed.queue_depth must be > 0".to_string()));
        }

        if self.embed.backoff_cap_ms < self.embed.backoff_base_ms {
            return Err(Error::Config(format!(
                "embed.backoff_cap_ms ({}) must be >= backoff_base_ms ({})",
                self.embed.backoff_cap_ms, self.embed.backoff_base_ms
            )));
        }

        if self.maintenance.reproject_batch == 0 {
            return Err(Error::Config("maintenance.reproject_batch must be > 0".to_string()));
        }

        if self.partitions.cells == 0 {
            return Err(Error::Config("partitions.cells must be > 0".to_string()));
        }

        Ok(())
    }

    /// Backoff delay for the given attempt number (1-based).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let shifted = self
            .embed
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16));
        shifted.min(self.embed.backoff_cap_ms)
    }
}
