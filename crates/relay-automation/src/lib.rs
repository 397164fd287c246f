//! Automation collaborator for relay executors.
//!
//! An executor dispatches each atomic action to an [`Automation`]:
//! `navigate` and `capture` go to a [`Browser`], `write` and `generate`
//! produce files in the executor's output directory.

/// Browser trait and the WebDriver implementation.
pub mod browser;
/// File-producing automation for executors.
pub mod workbench;

pub use browser::{Browser, BrowserConfig, NoBrowser};
#[cfg(feature = "browser")]
pub use browser::WebDriverBrowser;
pub use workbench::{AutomationConfig, Workbench, WorkbenchFactory};

use async_trait::async_trait;
use relay_core::RelayResult;
use std::path::PathBuf;
use std::sync::Arc;

/// The primitives an executor runs atomic actions against.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Point the browser at `url`.
    async fn navigate(&self, url: &str) -> RelayResult<()>;
    /// Screenshot the current page; returns where the image was stored.
    async fn capture(&self) -> RelayResult<PathBuf>;
    /// Write `content` to `filename` under the output directory.
    async fn write(&self, content: &str, filename: &str) -> RelayResult<PathBuf>;
    /// Produce content from a description.
    async fn generate(&self, description: &str) -> RelayResult<String>;
}

/// Gives every executor its own automation collaborator.
pub trait AutomationFactory: Send + Sync {
    /// Build the collaborator for the executor named `executor`.
    fn build(&self, executor: &str) -> Arc<dyn Automation>;
}
