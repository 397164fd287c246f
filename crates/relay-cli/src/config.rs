//! `relay.toml`: every section optional, every field defaulted.

use relay_automation::{AutomationConfig, BrowserConfig};
use relay_core::{RelayError, RelayResult, ReloadableConfig};
use relay_decision::DecisionConfig;
use relay_orchestrator::{CoordinatorConfig, ExecutorConfig, HubConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level structure of `relay.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Hub name, address and limits.
    #[serde(default)]
    pub hub: HubConfig,
    /// Settings for every coordinator.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Settings for every executor.
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Decision endpoint for planning, decomposition and generation.
    #[serde(default)]
    pub decision: DecisionConfig,
    /// WebDriver settings.
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Where lifecycle events are reported.
    #[serde(default)]
    pub status: StatusConfig,
    /// Log every inbound envelope at `info`.
    #[serde(default)]
    pub debug: bool,
    /// Where `relay serve` writes the host snapshot.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("config/node_metrics.json")
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            coordinator: CoordinatorConfig::default(),
            executor: ExecutorConfig::default(),
            decision: DecisionConfig::default(),
            browser: BrowserConfig::default(),
            status: StatusConfig::default(),
            debug: false,
            metrics_path: default_metrics_path(),
        }
    }
}

/// Where lifecycle events go. Both Discord fields are needed to use Discord.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    /// Bot token used for the `Authorization` header.
    #[serde(default)]
    pub discord_bot_token: Option<String>,
    /// Channel events are posted to.
    #[serde(default)]
    pub discord_channel_id: Option<String>,
}

impl StatusConfig {
    /// Token and channel, when both are set.
    pub fn discord(&self) -> Option<(&str, &str)> {
        match (&self.discord_bot_token, &self.discord_channel_id) {
            (Some(token), Some(channel)) if !token.is_empty() && !channel.is_empty() => {
                Some((token.as_str(), channel.as_str()))
            }
            _ => None,
        }
    }
}

impl RelayConfig {
    /// Parse a config from TOML text.
    pub fn parse(text: &str) -> RelayResult<Self> {
        toml::from_str(text).map_err(|e| RelayError::Config(format!("invalid config: {e}")))
    }

    /// Read and parse `path`.
    pub fn load(path: &Path) -> RelayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config '{}': {e}",
                path.display()
            ))
        })?;
        toml::from_str(&content).map_err(|e| {
            RelayError::Config(format!(
                "Failed to parse config '{}': {e}",
                path.display()
            ))
        })
    }

    /// Settings for every executor's workbench. Generation uses the decision
    /// endpoint.
    pub fn automation(&self) -> AutomationConfig {
        AutomationConfig {
            output_dir: self.executor.output_dir.clone(),
            browser: self.browser.clone(),
            generator: Some(self.decision.clone()),
        }
    }

    /// The part of this config running tiers can adopt without a restart.
    pub fn reloadable(&self) -> ReloadableConfig {
        ReloadableConfig {
            debug: Some(self.debug),
            pull_timeout_ms: Some(self.executor.pull_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = RelayConfig::parse("").unwrap();
        assert_eq!(config.hub.port, 8765);
        assert_eq!(config.hub.attach_on_start, 0);
        assert_eq!(config.coordinator.executors, 2);
        assert_eq!(config.executor.pull_timeout_ms, 1000);
        assert_eq!(config.decision, DecisionConfig::default());
        assert!(config.status.discord().is_none());
        assert!(!config.debug);
        assert_eq!(config.metrics_path, PathBuf::from("config/node_metrics.json"));
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = RelayConfig::parse(
            r#"
debug = true
metrics_path = "/var/lib/relay/node_metrics.json"

[hub]
name = "node-1"
port = 9000
max_coordinators = 8
attach_on_start = 2

[coordinator]
executors = 5
heartbeat_interval_ms = 1500

[executor]
pull_timeout_ms = 250
output_dir = "/tmp/relay-out"

[decision]
endpoint = "http://10.0.0.5:1234/"
model_id = "mistral"

[status]
discord_bot_token = "token"
discord_channel_id = "123"
"#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(
            config.metrics_path,
            PathBuf::from("/var/lib/relay/node_metrics.json")
        );
        assert_eq!(config.hub.name, "node-1");
        assert_eq!(config.hub.host, "127.0.0.1");
        assert_eq!(config.hub.max_coordinators, 8);
        assert_eq!(config.coordinator.executors, 5);
        assert_eq!(config.coordinator.queue_capacity, 256);
        assert_eq!(config.decision.base_url(), "http://10.0.0.5:1234");
        assert_eq!(config.status.discord(), Some(("token", "123")));

        let automation = config.automation();
        assert_eq!(automation.output_dir, PathBuf::from("/tmp/relay-out"));
        assert_eq!(automation.generator.unwrap().model_id, "mistral");

        let reloadable = config.reloadable();
        assert_eq!(reloadable.debug, Some(true));
        assert_eq!(reloadable.pull_timeout_ms, Some(250));
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "[hub\nname = ").unwrap();
        let err = RelayConfig::load(tmp.path()).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config"), "unexpected error: {err}");

        let err = RelayConfig::load(Path::new("/nonexistent/relay.toml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Failed to read config"), "unexpected error: {err}");
    }

    #[test]
    fn test_half_configured_discord_is_ignored() {
        let config = RelayConfig::parse("[status]\ndiscord_bot_token = \"t\"\n").unwrap();
        assert!(config.status.discord().is_none());
    }
}
