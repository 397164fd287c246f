//! Browser half of the automation collaborator.
//!
//! Real browser control needs the `browser` feature (fantoccini plus a running
//! WebDriver server). Without it executors get [`NoBrowser`], which fails
//! navigate and capture actions cleanly.

use async_trait::async_trait;
use relay_core::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};

#[cfg(feature = "browser")]
use {
    std::time::Duration,
    tracing::{debug, info},
};

/// WebDriver connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver server URL (default: "http://localhost:4444").
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Run the browser in headless mode (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Timeout in seconds for each browser operation (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_headless() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The browser primitives an executor needs.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Load `url` in the current session.
    async fn goto(&self, url: &str) -> RelayResult<()>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> RelayResult<Vec<u8>>;
}

/// Stand-in used when no WebDriver is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBrowser;

#[async_trait]
impl Browser for NoBrowser {
    async fn goto(&self, url: &str) -> RelayResult<()> {
        Err(RelayError::Automation(format!(
            "cannot navigate to '{url}': no browser configured (build with the 'browser' feature)"
        )))
    }

    async fn screenshot(&self) -> RelayResult<Vec<u8>> {
        Err(RelayError::Automation(
            "cannot capture: no browser configured (build with the 'browser' feature)".to_string(),
        ))
    }
}

/// One WebDriver session, opened lazily on first use.
#[cfg(feature = "browser")]
pub struct WebDriverBrowser {
    config: BrowserConfig,
    client: tokio::sync::Mutex<Option<fantoccini::Client>>,
}

#[cfg(feature = "browser")]
impl WebDriverBrowser {
    /// Create a browser; the WebDriver session opens on first use.
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            client: tokio::sync::Mutex::new(None),
        }
    }

    async fn ensure_client(
        &self,
    ) -> RelayResult<tokio::sync::MutexGuard<'_, Option<fantoccini::Client>>> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            use fantoccini::ClientBuilder;

            let mut caps = serde_json::Map::new();
            if self.config.headless {
                let args = serde_json::json!(["--headless", "--disable-gpu", "--no-sandbox"]);
                caps.insert(
                    "goog:chromeOptions".to_string(),
                    serde_json::json!({ "args": args }),
                );
                caps.insert(
                    "moz:firefoxOptions".to_string(),
                    serde_json::json!({ "args": ["-headless"] }),
                );
            }

            let client = ClientBuilder::native()
                .capabilities(caps)
                .connect(&self.config.webdriver_url)
                .await
                .map_err(|e| {
                    RelayError::Automation(format!(
                        "Failed to connect to WebDriver at {}: {e}",
                        self.config.webdriver_url
                    ))
                })?;
            info!(webdriver_url = %self.config.webdriver_url, "Browser session opened");
            *guard = Some(client);
        }
        Ok(guard)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl Browser for WebDriverBrowser {
    async fn goto(&self, url: &str) -> RelayResult<()> {
        let guard = self.ensure_client().await?;
        let client = guard
            .as_ref()
            .ok_or_else(|| RelayError::Automation("browser session missing".to_string()))?;
        tokio::time::timeout(self.timeout(), client.goto(url))
            .await
            .map_err(|_| RelayError::Automation(format!("navigation to '{url}' timed out")))?
            .map_err(|e| RelayError::Automation(format!("navigation to '{url}' failed: {e}")))?;
        debug!(url, "Navigated");
        Ok(())
    }

    async fn screenshot(&self) -> RelayResult<Vec<u8>> {
        let guard = self.ensure_client().await?;
        let client = guard
            .as_ref()
            .ok_or_else(|| RelayError::Automation("browser session missing".to_string()))?;
        tokio::time::timeout(self.timeout(), client.screenshot())
            .await
            .map_err(|_| RelayError::Automation("screenshot timed out".to_string()))?
            .map_err(|e| RelayError::Automation(format!("screenshot failed: {e}")))
    }
}
