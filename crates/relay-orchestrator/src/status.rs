//! Lifecycle notifications for humans watching the fleet.
//!
//! Reports are fire-and-forget: tiers hand events to [`notify`], which runs the
//! reporter on its own task so a slow chat API never stalls a message loop.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Something worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// The hub started serving.
    HubOnline {
        /// Hub name.
        hub: String,
    },
    /// The hub launched a coordinator.
    CoordinatorAttached {
        /// Coordinator name.
        coordinator: String,
    },
    /// A coordinator finished its startup handshake.
    CoordinatorReady {
        /// Coordinator name.
        coordinator: String,
        /// Executors that reported ready.
        executors: usize,
    },
    /// A coordinator turned an item into actions.
    ItemDecomposed {
        /// Coordinator name.
        coordinator: String,
        /// Number of actions produced.
        actions: usize,
    },
    /// Every executor of a coordinator went idle.
    CoordinatorDrained {
        /// Coordinator name.
        coordinator: String,
    },
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::HubOnline { hub } => write!(f, "Hub {hub} is online"),
            StatusEvent::CoordinatorAttached { coordinator } => {
                write!(f, "Coordinator {coordinator} attached")
            }
            StatusEvent::CoordinatorReady {
                coordinator,
                executors,
            } => write!(f, "Coordinator {coordinator} ready with {executors} executors"),
            StatusEvent::ItemDecomposed {
                coordinator,
                actions,
            } => write!(f, "Coordinator {coordinator} decomposed an item into {actions} actions"),
            StatusEvent::CoordinatorDrained { coordinator } => {
                write!(f, "Coordinator {coordinator} finished its work")
            }
        }
    }
}

/// Receives lifecycle events. Failures are the reporter's own business.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Deliver one event.
    async fn report(&self, event: StatusEvent);
}

/// Hand `event` to `reporter` without waiting for it.
pub fn notify(reporter: &Arc<dyn StatusReporter>, event: StatusEvent) {
    let reporter = Arc::clone(reporter);
    tokio::spawn(async move { reporter.report(event).await });
}

/// Writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

#[async_trait]
impl StatusReporter for TracingReporter {
    async fn report(&self, event: StatusEvent) {
        info!(status = %event, "Status");
    }
}

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    content: &'a str,
}

/// Posts events to a Discord channel through the REST API.
pub struct DiscordReporter {
    bot_token: String,
    channel_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl DiscordReporter {
    /// Post to `channel_id` as the bot owning `bot_token`.
    pub fn new(bot_token: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            channel_id: channel_id.into(),
            api_base: DISCORD_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn post(&self, content: &str) -> Result<(), String> {
        let url = format!("{}/channels/{}/messages", self.api_base, self.channel_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&CreateMessageRequest { content })
            .send()
            .await
            .map_err(|e| format!("Discord send error: {e}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(format!("Discord create message failed ({status}): {body}"));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for DiscordReporter {
    async fn report(&self, event: StatusEvent) {
        if let Err(e) = self.post(&event.to_string()).await {
            warn!(error = %e, "Status report dropped");
        }
    }
}
