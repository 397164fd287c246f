use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The tier a participant occupies in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// The root process that owns the global queue and routes messages.
    Hub,
    /// A mid-tier process that decomposes items for its executor pool.
    Coordinator,
    /// A leaf process that runs atomic actions.
    Executor,
    /// Anything else on the bus (CLI submitters, dashboards).
    External,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hub => write!(f, "hub"),
            Tier::Coordinator => write!(f, "coordinator"),
            Tier::Executor => write!(f, "executor"),
            Tier::External => write!(f, "external"),
        }
    }
}

/// The `target` field of an envelope: a concrete participant name or a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    /// Every participant (`any`).
    Any,
    /// Every coordinator (`any_agent`, also accepts `any_coordinator`).
    AnyCoordinator,
    /// The hub (`any_node`, also accepts `any_hub`).
    AnyHub,
    /// Exactly one participant, by name.
    Named(String),
}

impl Target {
    /// Target a single participant by name.
    pub fn named(name: impl Into<String>) -> Self {
        Target::Named(name.into())
    }

    /// The wire spelling of this target.
    pub fn as_str(&self) -> &str {
        match self {
            Target::Any => "any",
            Target::AnyCoordinator => "any_agent",
            Target::AnyHub => "any_node",
            Target::Named(name) => name,
        }
    }
}

impl From<String> for Target {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "any" => Target::Any,
            "any_agent" | "any_coordinator" => Target::AnyCoordinator,
            "any_node" | "any_hub" => Target::AnyHub,
            _ => Target::Named(raw),
        }
    }
}

impl From<&str> for Target {
    fn from(raw: &str) -> Self {
        Target::from(raw.to_string())
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        match target {
            Target::Named(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a participant is on the bus. Every inbound envelope is filtered against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    name: String,
    tier: Tier,
}

impl Identity {
    /// Create an identity with an explicit tier.
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            tier,
        }
    }

    /// Identity of the hub.
    pub fn hub(name: impl Into<String>) -> Self {
        Self::new(name, Tier::Hub)
    }

    /// Identity of a coordinator.
    pub fn coordinator(name: impl Into<String>) -> Self {
        Self::new(name, Tier::Coordinator)
    }

    /// Identity of an executor.
    pub fn executor(name: impl Into<String>) -> Self {
        Self::new(name, Tier::Executor)
    }

    /// Identity of an outside submitter such as the CLI.
    pub fn external(name: impl Into<String>) -> Self {
        Self::new(name, Tier::External)
    }

    /// The participant name used as `origin` and matched against `target`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The participant's tier.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// A target addressing exactly this participant.
    pub fn target(&self) -> Target {
        Target::Named(self.name.clone())
    }

    /// Whether an envelope addressed to `target` is meant for this participant.
    pub fn accepts(&self, target: &Target) -> bool {
        match target {
            Target::Named(name) => *name == self.name,
            Target::Any => true,
            Target::AnyCoordinator => self.tier == Tier::Coordinator,
            Target::AnyHub => self.tier == Tier::Hub,
        }
    }

    /// Whether the hub dispatches `target` locally instead of flooding it.
    ///
    /// Only the hub's own name and the hub wildcard qualify; `any` is flooded.
    pub fn is_hub_scoped(&self, target: &Target) -> bool {
        if self.tier != Tier::Hub {
            return false;
        }
        match target {
            Target::Named(name) => *name == self.name,
            Target::AnyHub => true,
            Target::Any | Target::AnyCoordinator => false,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Bus name for the coordinator attached under `id`.
pub fn coordinator_name(id: Uuid) -> String {
    format!("Coordinator-{}", id.simple())
}

/// Bus name for an executor owned by `coordinator`.
pub fn executor_name(coordinator: &str, id: Uuid) -> String {
    format!("{coordinator}_Executor-{}", id.simple())
}
