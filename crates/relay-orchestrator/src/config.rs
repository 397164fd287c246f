use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Hub settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// The hub's bus name.
    #[serde(default = "default_hub_name")]
    pub name: String,
    /// Address the bus server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the bus server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Attach requests beyond this many coordinators are dropped.
    #[serde(default = "default_max_coordinators")]
    pub max_coordinators: usize,
    /// Capacity of the global task queue.
    #[serde(default = "default_hub_queue_capacity")]
    pub queue_capacity: usize,
    /// Coordinators `relay serve` attaches at startup.
    #[serde(default)]
    pub attach_on_start: usize,
}

fn default_hub_name() -> String {
    "hub".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_max_coordinators() -> usize {
    4
}

fn default_hub_queue_capacity() -> usize {
    1024
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            name: default_hub_name(),
            host: default_host(),
            port: default_port(),
            max_coordinators: default_max_coordinators(),
            queue_capacity: default_hub_queue_capacity(),
            attach_on_start: 0,
        }
    }
}

/// Coordinator settings, shared by every coordinator the hub launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Executor pool size.
    #[serde(default = "default_executors")]
    pub executors: usize,
    /// Capacity of the local executor queue.
    #[serde(default = "default_local_queue_capacity")]
    pub queue_capacity: usize,
    /// Heartbeat period; 0 disables heartbeats.
    #[serde(default)]
    pub heartbeat_interval_ms: u64,
}

fn default_executors() -> usize {
    2
}

fn default_local_queue_capacity() -> usize {
    256
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            executors: default_executors(),
            queue_capacity: default_local_queue_capacity(),
            heartbeat_interval_ms: 0,
        }
    }
}

impl CoordinatorConfig {
    /// Heartbeat period, or `None` when heartbeats are off.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Bounded wait for one pull from the local queue.
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,
    /// Where file-producing actions write.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_pull_timeout_ms() -> u64 {
    1000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pull_timeout_ms: default_pull_timeout_ms(),
            output_dir: default_output_dir(),
        }
    }
}

impl ExecutorConfig {
    /// Bounded wait for one local-queue pull.
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sections_use_defaults() {
        let hub: HubConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(hub, HubConfig::default());
        assert_eq!(hub.max_coordinators, 4);

        let coordinator: CoordinatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(coordinator.executors, 2);
        assert!(coordinator.heartbeat_interval().is_none());

        let executor: ExecutorConfig = serde_json::from_str(r#"{"pull_timeout_ms": 50}"#).unwrap();
        assert_eq!(executor.pull_timeout(), Duration::from_millis(50));
        assert_eq!(executor.output_dir, PathBuf::from("output"));
    }
}
