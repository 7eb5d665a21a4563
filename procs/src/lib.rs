use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a renderer process.
///
/// Ids are assigned by the process launcher when a renderer is spawned and
/// stay fixed for the lifetime of that process. The coordinator never mints
/// or reuses them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderProcessId(u64);

impl RenderProcessId {
    /// Creates a new `RenderProcessId` from a raw numeric value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RenderProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global classification of system memory pressure.
///
/// There is exactly one condition per browser instance, owned by the
/// coordinator. Ordered by severity: `Critical` compares greatest.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCondition {
    Normal,
    Warning,
    Critical,
}

impl Default for MemoryCondition {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for MemoryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Target operating mode assigned to a process by the coordinator.
///
/// `Unknown` is the sentinel for "not tracked"; it is never a valid target
/// state and is rejected by every state-setting path.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryState {
    Unknown,
    Normal,
    Throttled,
    Suspended,
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Normal => "normal",
            Self::Throttled => "throttled",
            Self::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_order_by_severity() {
        assert!(MemoryCondition::Normal < MemoryCondition::Warning);
        assert!(MemoryCondition::Warning < MemoryCondition::Critical);
    }

    #[test]
    fn wire_tags_are_stable() {
        // Children on the far side of the channel match on these exact tags.
        let tag = serde_json::to_string(&MemoryState::Throttled).unwrap();
        assert_eq!(tag, "\"throttled\"");
        let tag = serde_json::to_string(&MemoryCondition::Critical).unwrap();
        assert_eq!(tag, "\"critical\"");
    }

    #[test]
    fn ids_display_as_raw_values() {
        assert_eq!(RenderProcessId::new(42).to_string(), "42");
    }
}
