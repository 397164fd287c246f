use crate::browser::{Browser, BrowserConfig};
use crate::{Automation, AutomationFactory};
use async_trait::async_trait;
use relay_core::{RelayError, RelayResult};
use relay_decision::{ChatClient, DecisionConfig, Role};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_WRITE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Settings shared by every executor's workbench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Where `write`, `generate` and `capture` put their files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Browser used by `navigate` and `capture`.
    #[serde(default)]
    pub browser: BrowserConfig,
    /// Endpoint used by `generate`; generation fails when unset.
    #[serde(default)]
    pub generator: Option<DecisionConfig>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            browser: BrowserConfig::default(),
            generator: None,
        }
    }
}

/// The automation collaborator one executor drives: a browser plus an
/// output directory, and optionally a content generator.
pub struct Workbench {
    output_dir: PathBuf,
    browser: Arc<dyn Browser>,
    generator: Option<ChatClient>,
}

impl Workbench {
    /// Create a workbench writing under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, browser: Arc<dyn Browser>) -> Self {
        Self {
            output_dir: output_dir.into(),
            browser,
            generator: None,
        }
    }

    /// Use `client` for `generate`.
    pub fn with_generator(mut self, client: ChatClient) -> Self {
        self.generator = Some(client);
        self
    }

    /// Directory files are written to.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Resolve `filename` inside the output directory.
    ///
    /// Absolute paths and `..` components are rejected.
    fn resolve(&self, filename: &str) -> RelayResult<PathBuf> {
        let relative = Path::new(filename);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if filename.trim().is_empty() || escapes {
            return Err(RelayError::Automation(format!(
                "refusing to write '{filename}' outside the output directory"
            )));
        }
        Ok(self.output_dir.join(relative))
    }

    async fn store(&self, path: &Path, bytes: &[u8]) -> RelayResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RelayError::Automation(format!(
                    "Failed to create directory '{}': {e}",
                    parent.display()
                ))
            })?;
        }
        tokio::fs::write(path, bytes).await.map_err(|e| {
            RelayError::Automation(format!("Failed to write '{}': {e}", path.display()))
        })
    }
}

#[async_trait]
impl Automation for Workbench {
    async fn navigate(&self, url: &str) -> RelayResult<()> {
        self.browser.goto(url).await
    }

    async fn capture(&self) -> RelayResult<PathBuf> {
        let png = self.browser.screenshot().await?;
        let filename = format!(
            "capture_{}_{}.png",
            chrono::Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.output_dir.join(filename);
        self.store(&path, &png).await?;
        info!(path = %path.display(), "Capture saved");
        Ok(path)
    }

    async fn write(&self, content: &str, filename: &str) -> RelayResult<PathBuf> {
        if content.len() > MAX_WRITE_SIZE {
            return Err(RelayError::Automation(format!(
                "Content too large: {} bytes (max: {MAX_WRITE_SIZE} bytes)",
                content.len()
            )));
        }
        let path = self.resolve(filename)?;
        self.store(&path, content.as_bytes()).await?;
        info!(path = %path.display(), bytes = content.len(), "File written");
        Ok(path)
    }

    async fn generate(&self, description: &str) -> RelayResult<String> {
        let client = self.generator.as_ref().ok_or_else(|| {
            RelayError::Automation("cannot generate: no generator endpoint configured".to_string())
        })?;
        let content = client
            .complete(&Role::Generator.framing(), description)
            .await
            .map_err(|e| RelayError::Automation(format!("generation failed: {e}")))?;
        debug!(chars = content.len(), "Content generated");
        Ok(strip_code_fence(&content).to_string())
    }
}

/// Models often wrap file contents in a markdown fence despite being told not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.split_once('\n').map_or("", |(_, body)| body);
            body.trim_end().strip_suffix("```").unwrap_or(body).trim_end()
        }
        None => text,
    }
}

/// Builds one [`Workbench`] per executor from an [`AutomationConfig`].
#[derive(Debug, Clone, Default)]
pub struct WorkbenchFactory {
    config: AutomationConfig,
}

impl WorkbenchFactory {
    /// Create a factory from `config`.
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }
}

impl AutomationFactory for WorkbenchFactory {
    fn build(&self, executor: &str) -> Arc<dyn Automation> {
        #[cfg(feature = "browser")]
        let browser: Arc<dyn Browser> = Arc::new(crate::browser::WebDriverBrowser::new(
            self.config.browser.clone(),
        ));
        #[cfg(not(feature = "browser"))]
        let browser: Arc<dyn Browser> = Arc::new(crate::browser::NoBrowser);

        debug!(executor, output_dir = %self.config.output_dir.display(), "Building workbench");
        let mut bench = Workbench::new(self.config.output_dir.clone(), browser);
        if let Some(generator) = &self.config.generator {
            bench = bench.with_generator(ChatClient::new(generator.clone()));
        }
        Arc::new(bench)
    }
}
