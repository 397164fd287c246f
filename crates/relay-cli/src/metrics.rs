//! Host snapshot written when the hub starts, so operators can see what each
//! machine in the fleet offers.

use relay_core::{RelayError, RelayResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use sysinfo::System;

/// What this machine is.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    /// Operating system name.
    pub system: String,
    /// Operating system version.
    pub version: String,
    /// CPU architecture.
    pub machine: String,
    /// CPU brand string.
    pub processor: String,
    /// Host name.
    pub hostname: String,
    /// Total memory in GiB, two decimals.
    pub total_virtual_memory: f64,
    /// Logical CPUs.
    pub cpu_count: usize,
}

impl NodeMetrics {
    /// Snapshot the current host.
    pub fn collect() -> Self {
        let sys = System::new_all();
        let gib = sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        Self {
            system: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            version: System::os_version().unwrap_or_default(),
            machine: std::env::consts::ARCH.to_string(),
            processor: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_default(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            total_virtual_memory: (gib * 100.0).round() / 100.0,
            cpu_count: sys.cpus().len(),
        }
    }

    /// Write this snapshot to `path` as pretty JSON keyed by host name.
    ///
    /// The parent directory must already exist.
    pub fn write(&self, path: &Path) -> RelayResult<()> {
        let snapshot = BTreeMap::from([(self.hostname.as_str(), self)]);
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json).map_err(|e| {
            RelayError::Config(format!(
                "Failed to write node metrics '{}': {e}",
                path.display()
            ))
        })
    }
}

/// Collect and write the snapshot; failure is only worth a warning.
pub fn record(path: &Path) {
    let metrics = NodeMetrics::collect();
    match metrics.write(path) {
        Ok(()) => tracing::info!(
            path = %path.display(),
            hostname = %metrics.hostname,
            cpu_count = metrics.cpu_count,
            "Node metrics written"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not update node metrics, directory may not exist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_describes_this_host() {
        let metrics = NodeMetrics::collect();
        assert!(metrics.cpu_count >= 1);
        assert!(!metrics.machine.is_empty());
        assert!(!metrics.hostname.is_empty());
        assert!(metrics.total_virtual_memory >= 0.0);
    }

    #[test]
    fn test_snapshot_is_keyed_by_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_metrics.json");
        let metrics = NodeMetrics {
            system: "Linux".into(),
            version: "6.1".into(),
            machine: "x86_64".into(),
            processor: "Test CPU".into(),
            hostname: "node-a".into(),
            total_virtual_memory: 15.52,
            cpu_count: 8,
        };

        metrics.write(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["node-a"]["cpu_count"], 8);
        assert_eq!(written["node-a"]["system"], "Linux");
        assert_eq!(written["node-a"]["total_virtual_memory"], 15.52);
    }

    #[test]
    fn test_missing_directory_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("node_metrics.json");
        let err = NodeMetrics::collect().write(&path).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        record(&path);
        assert!(!path.exists());
    }
}
