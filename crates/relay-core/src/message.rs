//! Wire envelope and the message catalog.
//!
//! On the wire every message is `{type, origin, target, data}`. In memory the
//! `type`/`data` pair becomes one [`Message`] variant, so each tier dispatches
//! with an exhaustive `match` instead of comparing strings. The only place a
//! `type` string is inspected is [`Message::from_parts`].

use crate::action::{ActionSet, CompletionReport, TaskItem};
use crate::error::{RelayError, RelayResult};
use crate::identity::Target;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// A named remote call carried by `function_invoke`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "function_to_invoke",
    content = "params",
    rename_all = "snake_case"
)]
pub enum Invocation {
    /// Ask the hub to start a new coordinator.
    AttachCoordinator {
        /// Whether the coordinator decomposes items through the decision collaborator.
        #[serde(default = "default_true")]
        uses_decision_collaborator: bool,
        /// Decision endpoint override for this coordinator.
        #[serde(default)]
        endpoint: Option<String>,
        /// Stable id for the coordinator; generated when absent.
        #[serde(default)]
        id: Option<Uuid>,
    },
    /// Push a ready action set onto a coordinator's local queue.
    PutQueue {
        /// Units are fragmented exactly like a decomposed item.
        item: ActionSet,
    },
    /// Decompose an ad-hoc prompt on a coordinator.
    Instruct {
        /// Objective text handed to the decision collaborator.
        prompt: String,
    },
}

fn default_true() -> bool {
    true
}

/// The hot-reloadable subset of the configuration, broadcast by `update_config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadableConfig {
    /// Promote envelope logging from `debug` to `info`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    /// New bounded wait for executor pulls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_timeout_ms: Option<u64>,
}

/// Every message kind the tiers exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `function_invoke`
    FunctionInvoke(Invocation),
    /// `agent_ready`: a coordinator finished its startup handshake.
    AgentReady,
    /// `agent_dequeue_success`: a coordinator decomposed an item.
    AgentDequeueSuccess,
    /// `agent_complete`: all of a coordinator's executors are idle.
    AgentComplete,
    /// `agent_dequeue`: the hub tells a coordinator to pull one item.
    AgentDequeue,
    /// `worker_ready`: an executor connected.
    WorkerReady,
    /// `worker_complete`: an executor finished one pull.
    WorkerComplete {
        /// `None` when the pull found the queue empty.
        result: Option<CompletionReport>,
    },
    /// `worker_dequeue`: a coordinator tells an executor to pull one unit.
    WorkerDequeue,
    /// `node_add_queue_item`: push an item onto the global queue.
    NodeAddQueueItem {
        /// The item to enqueue.
        item: TaskItem,
    },
    /// `new_instruction`: plan an objective into queue items.
    NewInstruction {
        /// Free-text objective.
        objective: String,
    },
    /// `update_config`
    UpdateConfig(ReloadableConfig),
    /// `heartbeat`
    Heartbeat,
    /// `ping`
    Ping,
}

#[derive(Serialize, Deserialize)]
struct WorkerCompleteData {
    #[serde(default)]
    result: Option<CompletionReport>,
}

#[derive(Serialize, Deserialize)]
struct QueueItemData {
    item: TaskItem,
}

#[derive(Serialize, Deserialize)]
struct InstructionData {
    #[serde(alias = "instruction")]
    objective: String,
}

impl Message {
    /// The wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::FunctionInvoke(_) => "function_invoke",
            Message::AgentReady => "agent_ready",
            Message::AgentDequeueSuccess => "agent_dequeue_success",
            Message::AgentComplete => "agent_complete",
            Message::AgentDequeue => "agent_dequeue",
            Message::WorkerReady => "worker_ready",
            Message::WorkerComplete { .. } => "worker_complete",
            Message::WorkerDequeue => "worker_dequeue",
            Message::NodeAddQueueItem { .. } => "node_add_queue_item",
            Message::NewInstruction { .. } => "new_instruction",
            Message::UpdateConfig(_) => "update_config",
            Message::Heartbeat => "heartbeat",
            Message::Ping => "ping",
        }
    }

    /// Build a message from its wire `type` and `data`.
    pub fn from_parts(kind: &str, data: Value) -> RelayResult<Self> {
        let data = if data.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            data
        };
        let message = match kind {
            "function_invoke" => Message::FunctionInvoke(payload(kind, data)?),
            "agent_ready" => Message::AgentReady,
            "agent_dequeue_success" => Message::AgentDequeueSuccess,
            "agent_complete" => Message::AgentComplete,
            "agent_dequeue" => Message::AgentDequeue,
            "worker_ready" => Message::WorkerReady,
            "worker_complete" => {
                let data: WorkerCompleteData = payload(kind, data)?;
                Message::WorkerComplete {
                    result: data.result,
                }
            }
            "worker_dequeue" => Message::WorkerDequeue,
            "node_add_queue_item" => {
                let data: QueueItemData = payload(kind, data)?;
                if data.item.payload().is_null() {
                    return Err(RelayError::Protocol(format!("'{kind}' carries no item")));
                }
                Message::NodeAddQueueItem { item: data.item }
            }
            "new_instruction" => {
                let data: InstructionData = payload(kind, data)?;
                Message::NewInstruction {
                    objective: data.objective,
                }
            }
            "update_config" => Message::UpdateConfig(payload(kind, data)?),
            "heartbeat" => Message::Heartbeat,
            "ping" => Message::Ping,
            other => {
                return Err(RelayError::Protocol(format!(
                    "unknown message type '{other}'"
                )))
            }
        };
        Ok(message)
    }

    /// The wire `data` object of this message.
    pub fn data(&self) -> RelayResult<Value> {
        let data = match self {
            Message::FunctionInvoke(invocation) => serde_json::to_value(invocation)?,
            Message::WorkerComplete { result } => serde_json::to_value(WorkerCompleteData {
                result: result.clone(),
            })?,
            Message::NodeAddQueueItem { item } => {
                serde_json::to_value(QueueItemData { item: item.clone() })?
            }
            Message::NewInstruction { objective } => serde_json::to_value(InstructionData {
                objective: objective.clone(),
            })?,
            Message::UpdateConfig(config) => serde_json::to_value(config)?,
            Message::AgentReady
            | Message::AgentDequeueSuccess
            | Message::AgentComplete
            | Message::AgentDequeue
            | Message::WorkerReady
            | Message::WorkerDequeue
            | Message::Heartbeat
            | Message::Ping => Value::Object(serde_json::Map::new()),
        };
        Ok(data)
    }
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> RelayResult<T> {
    serde_json::from_value(data)
        .map_err(|e| RelayError::Protocol(format!("malformed '{kind}' payload: {e}")))
}

/// One message on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Name of the sending participant.
    pub origin: String,
    /// Who should act on this envelope.
    pub target: Target,
    /// The typed payload.
    pub message: Message,
}

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    origin: String,
    target: Target,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    /// Create an envelope.
    pub fn new(origin: impl Into<String>, target: impl Into<Target>, message: Message) -> Self {
        Self {
            origin: origin.into(),
            target: target.into(),
            message,
        }
    }

    /// Shorthand for `self.message.kind()`.
    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }

    /// Parse a wire frame.
    pub fn from_json(raw: &str) -> RelayResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(raw)
            .map_err(|e| RelayError::Protocol(format!("invalid envelope: {e}")))?;
        raw.into_envelope()
    }

    /// Render as a wire frame.
    pub fn to_json(&self) -> RelayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl RawEnvelope {
    fn into_envelope(self) -> RelayResult<Envelope> {
        Ok(Envelope {
            message: Message::from_parts(&self.kind, self.data)?,
            origin: self.origin,
            target: self.target,
        })
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self.message.data().map_err(serde::ser::Error::custom)?;
        RawEnvelope {
            kind: self.message.kind().to_string(),
            origin: self.origin.clone(),
            target: self.target.clone(),
            data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEnvelope::deserialize(deserializer)?;
        raw.into_envelope().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionOutcome, AtomicAction};
    use serde_json::json;

    #[test]
    fn test_notification_accepts_missing_or_empty_data() {
        let a = Envelope::from_json(r#"{"type":"agent_ready","origin":"c1","target":"node"}"#)
            .unwrap();
        let b = Envelope::from_json(
            r#"{"type":"agent_ready","origin":"c1","target":"node","data":{}}"#,
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.message, Message::AgentReady);
        assert_eq!(a.target, Target::named("node"));
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = Envelope::from_json(r#"{"type":"reboot","origin":"x","target":"any"}"#)
            .unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
        assert!(err.to_string().contains("reboot"));
    }

    #[test]
    fn test_attach_coordinator_wire_shape() {
        let envelope = Envelope::new(
            "cli",
            Target::AnyHub,
            Message::FunctionInvoke(Invocation::AttachCoordinator {
                uses_decision_collaborator: false,
                endpoint: None,
                id: None,
            }),
        );
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "function_invoke");
        assert_eq!(value["target"], "any_node");
        assert_eq!(value["data"]["function_to_invoke"], "attach_coordinator");
        assert_eq!(value["data"]["params"]["uses_decision_collaborator"], false);
    }

    #[test]
    fn test_attach_defaults_to_decision_collaborator() {
        let raw = json!({
            "type": "function_invoke",
            "origin": "cli",
            "target": "node",
            "data": {"function_to_invoke": "attach_coordinator", "params": {}}
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(
            envelope.message,
            Message::FunctionInvoke(Invocation::AttachCoordinator {
                uses_decision_collaborator: true,
                endpoint: None,
                id: None,
            })
        );
    }

    #[test]
    fn test_new_instruction_accepts_instruction_key() {
        let envelope = Envelope::from_json(
            r#"{"type":"new_instruction","origin":"cli","target":"node","data":{"instruction":"X"}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.message,
            Message::NewInstruction {
                objective: "X".into()
            }
        );
    }

    #[test]
    fn test_worker_complete_carries_report() {
        let set = ActionSet::single(AtomicAction::navigate("https://example.com"));
        let report = CompletionReport::new(set, vec![ActionOutcome::failed("offline")]);
        let envelope = Envelope::new(
            "exec-1",
            "coord-1",
            Message::WorkerComplete {
                result: Some(report.clone()),
            },
        );
        let value: Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["data"]["result"]["first_failure"], 0);
        assert_eq!(value["data"]["result"]["actions"][0]["operation"], "navigate");
        let back: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(
            back.message,
            Message::WorkerComplete {
                result: Some(report)
            }
        );
    }

    #[test]
    fn test_malformed_payload_names_kind() {
        let err = Envelope::from_json(
            r#"{"type":"node_add_queue_item","origin":"cli","target":"node","data":{}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("node_add_queue_item"));
    }

    #[test]
    fn test_update_config_partial() {
        let envelope = Envelope::from_json(
            r#"{"type":"update_config","origin":"node","target":"any","data":{"debug":true}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.message,
            Message::UpdateConfig(ReloadableConfig {
                debug: Some(true),
                pull_timeout_ms: None,
            })
        );
        assert_eq!(envelope.target, Target::Any);
    }
}
