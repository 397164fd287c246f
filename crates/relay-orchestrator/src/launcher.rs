use crate::config::{CoordinatorConfig, ExecutorConfig};
use crate::coordinator::{Coordinator, CoordinatorSetup};
use crate::status::StatusReporter;
use relay_automation::AutomationFactory;
use relay_bus::Connector;
use relay_core::{RelayError, RelayResult, TaskItem, WorkQueue};
use relay_decision::{DecisionCollaborator, DecisionConfig, HttpDecision, PassthroughDecision};
use std::sync::Arc;
use tracing::{error, info};

/// What the hub hands over when it attaches a coordinator.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Bus name for the new coordinator.
    pub name: String,
    /// Hub the coordinator reports to.
    pub hub: String,
    /// Decompose through the model, or take items as action lists.
    pub uses_decision_collaborator: bool,
    /// Decision endpoint override.
    pub endpoint: Option<String>,
    /// The global queue the coordinator pulls from.
    pub queue: WorkQueue<TaskItem>,
}

/// Starts coordinators on the hub's behalf.
pub trait CoordinatorLauncher: Send + Sync {
    /// Start the coordinator described by `request`.
    fn launch(&self, request: LaunchRequest) -> RelayResult<()>;
}

/// Picks the decision collaborator for a new coordinator.
pub trait DecisionFactory: Send + Sync {
    /// Collaborator for one coordinator, optionally with its own endpoint.
    fn build(&self, uses_decision_collaborator: bool, endpoint: Option<&str>)
        -> Arc<dyn DecisionCollaborator>;
}

/// Model-backed decisions from a base config; pass-through when the
/// coordinator opts out.
#[derive(Debug, Clone, Default)]
pub struct HttpDecisionFactory {
    config: DecisionConfig,
}

impl HttpDecisionFactory {
    /// Factory whose collaborators start from `config`.
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }
}

impl DecisionFactory for HttpDecisionFactory {
    fn build(
        &self,
        uses_decision_collaborator: bool,
        endpoint: Option<&str>,
    ) -> Arc<dyn DecisionCollaborator> {
        if !uses_decision_collaborator {
            return Arc::new(PassthroughDecision);
        }
        let config = match endpoint {
            Some(endpoint) => self.config.with_endpoint(endpoint),
            None => self.config.clone(),
        };
        Arc::new(HttpDecision::new(config))
    }
}

/// Runs each coordinator as a task on the current tokio runtime, connected
/// through `connector`.
pub struct TaskLauncher {
    /// How launched coordinators reach the bus.
    pub connector: Arc<dyn Connector>,
    /// Picks each coordinator's decision collaborator.
    pub decisions: Arc<dyn DecisionFactory>,
    /// Builds executor automation.
    pub automation: Arc<dyn AutomationFactory>,
    /// Settings for every launched coordinator.
    pub coordinator: CoordinatorConfig,
    /// Settings for every executor.
    pub executor: ExecutorConfig,
    /// Initial debug flag.
    pub debug: bool,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn StatusReporter>,
}

impl CoordinatorLauncher for TaskLauncher {
    fn launch(&self, request: LaunchRequest) -> RelayResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RelayError::Orchestrator(format!("no runtime to launch on: {e}")))?;

        let coordinator = Coordinator::new(CoordinatorSetup {
            name: request.name.clone(),
            hub: request.hub,
            config: self.coordinator.clone(),
            executor: self.executor.clone(),
            debug: self.debug,
            inbound: request.queue,
            connector: Arc::clone(&self.connector),
            decision: self
                .decisions
                .build(request.uses_decision_collaborator, request.endpoint.as_deref()),
            automation: Arc::clone(&self.automation),
            reporter: Arc::clone(&self.reporter),
        });

        let name = request.name;
        info!(coordinator = %name, "Launching coordinator");
        runtime.spawn(async move {
            if let Err(e) = coordinator.run().await {
                error!(coordinator = %name, error = %e, "Coordinator failed");
            }
        });
        Ok(())
    }
}
