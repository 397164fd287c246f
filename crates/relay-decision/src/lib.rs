//! Decision collaborator for the relay orchestrator.
//!
//! A [`DecisionCollaborator`] maps an objective to an ordered [`ActionSet`].
//! [`HttpDecision`] asks an OpenAI-compatible model; [`PassthroughDecision`]
//! reads items that already carry their actions.

/// OpenAI-compatible chat client.
pub mod client;
/// Decision endpoint settings.
pub mod config;
/// Action-list parsing.
pub mod parser;
/// Role framings sent as system prompts.
pub mod role;

pub use client::ChatClient;
pub use config::DecisionConfig;
pub use parser::{interpret_item, parse_action_set};
pub use role::Role;

use async_trait::async_trait;
use relay_core::{ActionSet, RelayResult, TaskItem};

/// Something that turns an objective into actions.
#[async_trait]
pub trait DecisionCollaborator: Send + Sync {
    /// Decide the actions for `objective` under `role`.
    async fn decide(&self, role: Role, objective: &TaskItem) -> RelayResult<ActionSet>;
}

/// Asks a chat model and parses its `item.instruction_set` answer.
pub struct HttpDecision {
    client: ChatClient,
}

impl HttpDecision {
    /// Create a collaborator talking to `config.endpoint`.
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            client: ChatClient::new(config),
        }
    }
}

#[async_trait]
impl DecisionCollaborator for HttpDecision {
    async fn decide(&self, role: Role, objective: &TaskItem) -> RelayResult<ActionSet> {
        let text = self
            .client
            .complete(&role.framing(), &objective.objective())
            .await?;
        parse_action_set(&text)
    }
}

/// Treats every item as an already-formed action list.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecision;

#[async_trait]
impl DecisionCollaborator for PassthroughDecision {
    async fn decide(&self, _role: Role, objective: &TaskItem) -> RelayResult<ActionSet> {
        interpret_item(objective.payload())
    }
}
