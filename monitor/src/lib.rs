use std::time::Duration;

use procs::MemoryCondition;
use serde::{Deserialize, Serialize};

pub mod sources;

pub use sources::SystemMemoryMonitor;

/// Interface for sampling the system-wide free-memory metric.
///
/// Implementations must be cheap to call and should not allocate per sample.
/// Returns `None` when the underlying source is unavailable; callers treat
/// that as "condition unchanged" and keep polling.
pub trait MemoryMonitor {
    /// Returns an estimate of the memory still available to the browser
    /// before the system is critically low, in megabytes.
    fn available_mb(&mut self) -> Option<u64>;
}

/// Thresholds mapping the free-memory metric to a memory condition.
///
/// Rationale:
/// - Warning starts below 512 MiB of headroom, roughly the working set of a
///   couple of heavyweight renderers. Backgrounded work gets throttled here.
/// - Critical starts below 128 MiB, where the next large allocation is likely
///   to land in reclaim or OOM territory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    /// Below this many free megabytes the condition is `Warning`.
    pub warning_mb: u64,
    /// Below this many free megabytes the condition is `Critical`.
    pub critical_mb: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning_mb: 512,
            critical_mb: 128,
        }
    }
}

impl MemoryThresholds {
    /// Classifies a sampled free-memory metric into a condition.
    pub fn classify(&self, available_mb: u64) -> MemoryCondition {
        if available_mb <= self.critical_mb {
            MemoryCondition::Critical
        } else if available_mb <= self.warning_mb {
            MemoryCondition::Warning
        } else {
            MemoryCondition::Normal
        }
    }
}

/// Polling configuration for periodic condition evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Cadence of the periodic condition poll.
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_free_memory_into_conditions() {
        let thresholds = MemoryThresholds {
            warning_mb: 512,
            critical_mb: 128,
        };

        assert_eq!(thresholds.classify(4096), MemoryCondition::Normal);
        assert_eq!(thresholds.classify(513), MemoryCondition::Normal);
        assert_eq!(thresholds.classify(512), MemoryCondition::Warning);
        assert_eq!(thresholds.classify(129), MemoryCondition::Warning);
        assert_eq!(thresholds.classify(128), MemoryCondition::Critical);
        assert_eq!(thresholds.classify(0), MemoryCondition::Critical);
    }
}
