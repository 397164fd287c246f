use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The kind of work an [`AtomicAction`] asks an executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Point the browser at a URL.
    #[serde(alias = "goto")]
    Navigate,
    /// Screenshot the current page.
    #[serde(alias = "screenshot")]
    Capture,
    /// Write literal content to a file.
    Write,
    /// Generate content from a description and write it to a file.
    #[serde(alias = "generate_code")]
    Generate,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Navigate => write!(f, "navigate"),
            Operation::Capture => write!(f, "capture"),
            Operation::Write => write!(f, "write"),
            Operation::Generate => write!(f, "generate"),
        }
    }
}

/// One `{operation, action}` pair as produced by the decision collaborator.
///
/// `action` stays raw JSON until execution; [`AtomicAction::step`] interprets it.
/// A malformed `action` is an execution failure of that one action, not a
/// protocol error for the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicAction {
    /// What to do.
    pub operation: Operation,
    /// Operation arguments as sent on the wire.
    #[serde(default)]
    pub action: Value,
}

/// An [`AtomicAction`] with its arguments checked and extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Load `url`.
    Navigate {
        /// Page to open.
        url: String,
    },
    /// Screenshot the current page.
    Capture,
    /// Write `content` to `filename`.
    Write {
        /// File body.
        content: String,
        /// Name under the output directory.
        filename: String,
    },
    /// Generate content from `description` and write it to `filename`.
    Generate {
        /// What to generate.
        description: String,
        /// Name under the output directory.
        filename: String,
    },
}

impl AtomicAction {
    /// Build an action from an operation and its raw arguments.
    pub fn new(operation: Operation, action: Value) -> Self {
        Self { operation, action }
    }

    /// A navigate action.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(Operation::Navigate, Value::String(url.into()))
    }

    /// A capture action.
    pub fn capture() -> Self {
        Self::new(Operation::Capture, Value::Null)
    }

    /// A write action for `filename`.
    pub fn write(content: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::new(
            Operation::Write,
            serde_json::json!({ "content": content.into(), "filename": filename.into() }),
        )
    }

    /// A generate action for `filename`.
    pub fn generate(description: impl Into<String>, filename: impl Into<String>) -> Self {
        Self::new(
            Operation::Generate,
            serde_json::json!({ "description": description.into(), "filename": filename.into() }),
        )
    }

    /// Interpret the raw `action` payload for this operation.
    pub fn step(&self) -> RelayResult<Step> {
        match self.operation {
            Operation::Navigate => {
                let url = match &self.action {
                    Value::String(url) => url.clone(),
                    other => string_field(other, "url")?,
                };
                if url.trim().is_empty() {
                    return Err(RelayError::Automation("navigate: empty url".to_string()));
                }
                Ok(Step::Navigate { url })
            }
            Operation::Capture => Ok(Step::Capture),
            Operation::Write => Ok(Step::Write {
                content: string_field(&self.action, "content")?,
                filename: file_name(&self.action)?,
            }),
            Operation::Generate => {
                // Older planners put the description under `content`.
                let description = string_field(&self.action, "description")
                    .or_else(|_| string_field(&self.action, "content"))?;
                Ok(Step::Generate {
                    description,
                    filename: file_name(&self.action)?,
                })
            }
        }
    }
}

fn string_field(action: &Value, key: &str) -> RelayResult<String> {
    action[key]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RelayError::Automation(format!("action is missing string field '{key}'")))
}

/// `filename` plus the optional `extension`, joined with a single dot.
fn file_name(action: &Value) -> RelayResult<String> {
    let stem = string_field(action, "filename")?;
    if stem.trim().is_empty() {
        return Err(RelayError::Automation("action has an empty filename".to_string()));
    }
    match action["extension"].as_str() {
        Some(ext) if !ext.is_empty() => {
            let ext = ext.trim_start_matches('.');
            Ok(format!("{stem}.{ext}"))
        }
        _ => Ok(stem),
    }
}

/// Ordered atomic actions derived from one task item.
///
/// Executed strictly in order by one executor and never interleaved with
/// another set on that executor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet(Vec<AtomicAction>);

impl ActionSet {
    /// Wrap an ordered list of actions.
    pub fn new(actions: Vec<AtomicAction>) -> Self {
        Self(actions)
    }

    /// A set holding one action.
    pub fn single(action: AtomicAction) -> Self {
        Self(vec![action])
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no actions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The actions, in execution order.
    pub fn actions(&self) -> &[AtomicAction] {
        &self.0
    }

    /// Iterate the actions in order.
    pub fn iter(&self) -> std::slice::Iter<'_, AtomicAction> {
        self.0.iter()
    }

    /// Consume the set into its actions.
    pub fn into_actions(self) -> Vec<AtomicAction> {
        self.0
    }

    /// Split into one-action sets so every executor consumes uniform units.
    pub fn fragment(self) -> Vec<ActionSet> {
        self.0.into_iter().map(ActionSet::single).collect()
    }
}

impl FromIterator<AtomicAction> for ActionSet {
    fn from_iter<I: IntoIterator<Item = AtomicAction>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ActionSet {
    type Item = &'a AtomicAction;
    type IntoIter = std::slice::Iter<'a, AtomicAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An opaque payload in the global queue, delivered to exactly one coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskItem(Value);

impl TaskItem {
    /// Wrap an arbitrary JSON payload.
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// The raw payload.
    pub fn payload(&self) -> &Value {
        &self.0
    }

    /// The text handed to the decision collaborator as the objective.
    pub fn objective(&self) -> String {
        match &self.0 {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

impl From<&str> for TaskItem {
    fn from(text: &str) -> Self {
        Self(Value::String(text.to_string()))
    }
}

impl From<AtomicAction> for TaskItem {
    fn from(action: AtomicAction) -> Self {
        // Infallible: AtomicAction is plain data.
        Self(serde_json::to_value(action).unwrap_or(Value::Null))
    }
}

/// Result of running one atomic action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The action ran; `detail` names any artifact it produced.
    Done {
        /// Artifact path or other detail.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The action failed with `error`.
    Failed {
        /// What went wrong.
        error: String,
    },
}

impl ActionOutcome {
    /// A successful outcome.
    pub fn done(detail: Option<String>) -> Self {
        ActionOutcome::Done { detail }
    }

    /// A failed outcome.
    pub fn failed(error: impl Into<String>) -> Self {
        ActionOutcome::Failed {
            error: error.into(),
        }
    }

    /// Whether this outcome is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }
}

/// What an executor reports after running an action set.
///
/// Sent whether or not individual actions failed; `first_failure` carries the
/// index of the earliest failed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// The set that was executed.
    pub actions: ActionSet,
    /// One outcome per action, same order.
    pub outcomes: Vec<ActionOutcome>,
    /// Index of the earliest failed action.
    pub first_failure: Option<usize>,
}

impl CompletionReport {
    /// Build a report, deriving `first_failure` from `outcomes`.
    pub fn new(actions: ActionSet, outcomes: Vec<ActionOutcome>) -> Self {
        let first_failure = outcomes.iter().position(ActionOutcome::is_failure);
        Self {
            actions,
            outcomes,
            first_failure,
        }
    }

    /// Whether every action succeeded.
    pub fn is_success(&self) -> bool {
        self.first_failure.is_none()
    }
}
