use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::MemoryMonitor;

/// Default monitor backed by Linux memory accounting.
///
/// Prefers the cgroup v2 limit/current pair when the browser runs inside a
/// bounded cgroup, and falls back to system-wide `MemAvailable` otherwise.
/// Every source fails open: an unreadable or unlimited source yields `None`
/// and the next source, or the next poll, gets its turn.
#[derive(Debug)]
pub struct SystemMemoryMonitor {
    cgroup: Option<CgroupV2Monitor>,
}

impl SystemMemoryMonitor {
    pub fn new() -> Self {
        Self {
            cgroup: CgroupV2Monitor::discover(),
        }
    }
}

impl Default for SystemMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMonitor for SystemMemoryMonitor {
    fn available_mb(&mut self) -> Option<u64> {
        if let Some(cgroup) = self.cgroup.as_ref() {
            if let Some(mb) = cgroup.available_mb() {
                return Some(mb);
            }
        }

        let sampled = meminfo_available_mb(Path::new("/proc/meminfo"));
        if sampled.is_none() {
            debug!("no memory source available, skipping sample");
        }
        sampled
    }
}

#[derive(Debug)]
struct CgroupV2Monitor {
    memory_max: PathBuf,
    memory_current: PathBuf,
}

impl CgroupV2Monitor {
    fn discover() -> Option<Self> {
        let contents = fs::read_to_string("/proc/self/cgroup").ok()?;
        let relative = cgroup_v2_relative_path(&contents)?;
        let root = Path::new("/sys/fs/cgroup").join(relative);
        Some(Self {
            memory_max: root.join("memory.max"),
            memory_current: root.join("memory.current"),
        })
    }

    fn available_mb(&self) -> Option<u64> {
        let limit = read_cgroup_bytes(&self.memory_max)?;
        let current = read_cgroup_bytes(&self.memory_current)?;
        Some(limit.saturating_sub(current) / (1024 * 1024))
    }
}

fn cgroup_v2_relative_path(contents: &str) -> Option<String> {
    for line in contents.lines() {
        if let Some(path) = line.strip_prefix("0::") {
            return Some(path.trim_start_matches('/').to_string());
        }
    }
    None
}

fn read_cgroup_bytes(path: &Path) -> Option<u64> {
    let contents = fs::read_to_string(path).ok()?;
    parse_cgroup_bytes(&contents)
}

/// Parses a cgroup v2 byte-count file. The literal `max` means "no limit",
/// which is useless for headroom math, so it reads as absent.
fn parse_cgroup_bytes(contents: &str) -> Option<u64> {
    let value = contents.trim();
    if value == "max" {
        return None;
    }
    value.parse().ok()
}

fn meminfo_available_mb(path: &Path) -> Option<u64> {
    let contents = fs::read_to_string(path).ok()?;
    parse_meminfo_available_kb(&contents).map(|kb| kb / 1024)
}

/// Extracts the `MemAvailable` figure (in KiB) from `/proc/meminfo` contents.
fn parse_meminfo_available_kb(contents: &str) -> Option<u64> {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            return rest.split_whitespace().next()?.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo_available() {
        let contents = "MemTotal:       16315612 kB\n\
                        MemFree:          318644 kB\n\
                        MemAvailable:    8231424 kB\n\
                        Buffers:          614072 kB\n";
        assert_eq!(parse_meminfo_available_kb(contents), Some(8_231_424));
    }

    #[test]
    fn meminfo_without_available_line_reads_as_absent() {
        let contents = "MemTotal:       16315612 kB\nMemFree:   318644 kB\n";
        assert_eq!(parse_meminfo_available_kb(contents), None);
    }

    #[test]
    fn cgroup_limit_values_parse() {
        assert_eq!(parse_cgroup_bytes("536870912\n"), Some(536_870_912));
        assert_eq!(parse_cgroup_bytes("max\n"), None);
        assert_eq!(parse_cgroup_bytes("garbage"), None);
    }

    #[test]
    fn cgroup_path_comes_from_the_v2_entry() {
        let contents = "1:name=systemd:/ignored\n0::/user.slice/session.scope\n";
        assert_eq!(
            cgroup_v2_relative_path(contents).as_deref(),
            Some("user.slice/session.scope")
        );
        assert_eq!(cgroup_v2_relative_path("1:cpu:/\n"), None);
    }
}
