//! Instance registry scanner
//!
//! Each running orchestrator writes one JSON descriptor into the registry
//! directory at startup. The scanner lists them, drops records whose process
//! is gone (deleting the file) and orders the rest newest first.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use seneca_protocol::InstanceDescriptor;
use seneca_utils::registry_dir;

/// OS process existence check
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessProbe;

#[cfg(unix)]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        // pid 0 addresses our own process group, never an instance
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }

        // Signal 0 performs the permission and existence checks only
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // EPERM: the process exists but belongs to another user
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(not(unix))]
impl ProcessProbe for OsProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        pid != 0
    }
}

/// Source of candidate instances
pub trait Discover: Send + Sync {
    /// Live instances, most recently started first
    fn discover(&self) -> Vec<InstanceDescriptor>;
}

/// Scans a registry directory for live orchestrator instances
#[derive(Clone)]
pub struct RegistryScanner {
    dir: PathBuf,
    probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for RegistryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryScanner").field("dir", &self.dir).finish()
    }
}

impl RegistryScanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_probe(dir, Arc::new(OsProcessProbe))
    }

    /// Scanner over the per-user registry location
    pub fn with_default_dir() -> Self {
        Self::new(registry_dir())
    }

    pub fn with_probe(dir: impl Into<PathBuf>, probe: Arc<dyn ProcessProbe>) -> Self {
        Self {
            dir: dir.into(),
            probe,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn descriptor_files(&self) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Registry not readable");
                return Vec::new();
            }
        };

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect()
    }

    fn read_descriptor(path: &Path) -> Option<InstanceDescriptor> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable descriptor");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed descriptor");
                None
            }
        }
    }

    /// Delete a stale descriptor. A file already removed by another scanner is fine.
    fn remove_stale(path: &Path, descriptor: &InstanceDescriptor) {
        match std::fs::remove_file(path) {
            Ok(()) => info!(
                instance_id = %descriptor.instance_id,
                pid = descriptor.process_id,
                "Removed stale descriptor"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove stale descriptor"
            ),
        }
    }
}

fn newest_first(a: &InstanceDescriptor, b: &InstanceDescriptor) -> Ordering {
    b.started_at
        .cmp(&a.started_at)
        .then_with(|| a.instance_id.cmp(&b.instance_id))
}

impl Discover for RegistryScanner {
    fn discover(&self) -> Vec<InstanceDescriptor> {
        let mut live = Vec::new();

        for path in self.descriptor_files() {
            let Some(descriptor) = Self::read_descriptor(&path) else {
                continue;
            };

            if self.probe.is_alive(descriptor.process_id) {
                live.push(descriptor);
            } else {
                Self::remove_stale(&path, &descriptor);
            }
        }

        live.sort_by(newest_first);
        debug!(dir = %self.dir.display(), count = live.len(), "Registry scan complete");
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct FixedProbe(HashSet<u32>);

    impl ProcessProbe for FixedProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn scanner(dir: &TempDir, live: &[u32]) -> RegistryScanner {
        RegistryScanner::with_probe(
            dir.path(),
            Arc::new(FixedProbe(live.iter().copied().collect())),
        )
    }

    fn write_descriptor(dir: &TempDir, id: &str, pid: u32, started_at: &str) -> PathBuf {
        let path = dir.path().join(format!("{}.json", id));
        let body = serde_json::json!({
            "instance_id": id,
            "pid": pid,
            "mcp_command": "python -m marcus_mcp.server",
            "started_at": started_at,
        });
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    #[test]
    fn test_dead_descriptors_removed() {
        let dir = TempDir::new().unwrap();
        write_descriptor(&dir, "marcus_a", 100, "2025-06-01T10:00:00Z");
        let dead_1 = write_descriptor(&dir, "marcus_b", 200, "2025-06-01T11:00:00Z");
        write_descriptor(&dir, "marcus_c", 300, "2025-06-01T12:00:00Z");
        let dead_2 = write_descriptor(&dir, "marcus_d", 400, "2025-06-01T13:00:00Z");

        let found = scanner(&dir, &[100, 300]).discover();

        let ids: Vec<&str> = found.iter().map(|d| d.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["marcus_c", "marcus_a"]);
        assert!(!dead_1.exists());
        assert!(!dead_2.exists());
    }

    #[test]
    fn test_same_start_time_ordered_by_id() {
        let dir = TempDir::new().unwrap();
        write_descriptor(&dir, "zeta", 1, "2025-06-01T10:00:00Z");
        write_descriptor(&dir, "alpha", 2, "2025-06-01T10:00:00Z");
        write_descriptor(&dir, "mid", 3, "2025-06-01T10:00:00Z");

        let found = scanner(&dir, &[1, 2, 3]).discover();
        let ids: Vec<&str> = found.iter().map(|d| d.instance_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_single_dead_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = write_descriptor(&dir, "marcus_gone", 4242, "2025-06-01T10:00:00Z");

        assert!(scanner(&dir, &[]).discover().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_and_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(scanner(&dir, &[]).discover().is_empty());

        let missing = RegistryScanner::new(dir.path().join("does-not-exist"));
        assert!(missing.discover().is_empty());
    }

    #[test]
    fn test_malformed_skipped_not_deleted() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("broken.json");
        std::fs::write(&bad, "{ not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        write_descriptor(&dir, "marcus_ok", 7, "2025-06-01T10:00:00");

        let found = scanner(&dir, &[7]).discover();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance_id, "marcus_ok");
        assert!(bad.exists());
    }

    #[test]
    fn test_stale_file_already_gone() {
        let dir = TempDir::new().unwrap();
        let path = write_descriptor(&dir, "marcus_x", 9, "2025-06-01T10:00:00Z");
        let descriptor = RegistryScanner::read_descriptor(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        // Must not panic or error
        RegistryScanner::remove_stale(&path, &descriptor);
    }

    #[cfg(unix)]
    #[test]
    fn test_os_probe() {
        let probe = OsProcessProbe;
        assert!(probe.is_alive(std::process::id()));
        assert!(!probe.is_alive(0));
        assert!(!probe.is_alive(u32::MAX));
    }
}
