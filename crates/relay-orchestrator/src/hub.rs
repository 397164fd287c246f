//! Root tier: owns the global task queue and the coordinator directory, and
//! decides when each coordinator may dequeue.
//!
//! Every directory change goes through one transition function. Planning calls to
//! the decision collaborator run as background jobs whose results come back
//! through the same loop as bus messages.

use crate::config::HubConfig;
use crate::launcher::{CoordinatorLauncher, LaunchRequest};
use crate::log_inbound;
use crate::status::{notify, StatusEvent, StatusReporter};
use relay_bus::{BusReceiver, BusSender};
use relay_core::{
    coordinator_name, ActionSet, Directory, Envelope, Identity, Invocation, Message, RelayError,
    RelayResult, TaskItem, Target, WorkQueue,
};
use relay_decision::{DecisionCollaborator, Role};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A coordinator as the hub sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the hub to say there is work.
    Receiving,
    /// Told to pull from the global queue.
    Dequeuing,
}

enum HubEvent {
    Planned {
        objective: String,
        result: RelayResult<ActionSet>,
    },
}

/// The hub's collaborators.
pub struct HubParts {
    /// The hub's half of its bus connection.
    pub sender: BusSender,
    /// Starts coordinators for `attach_coordinator`.
    pub launcher: Arc<dyn CoordinatorLauncher>,
    /// Plans `new_instruction` objectives.
    pub planner: Arc<dyn DecisionCollaborator>,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn StatusReporter>,
}

/// The root tier. One per machine.
pub struct Hub {
    identity: Identity,
    config: HubConfig,
    debug: bool,
    sender: BusSender,
    queue: WorkQueue<TaskItem>,
    coordinators: Directory<CoordinatorState>,
    /// Coordinators this hub launched; only these count against `max_coordinators`.
    attached: HashSet<String>,
    launcher: Arc<dyn CoordinatorLauncher>,
    planner: Arc<dyn DecisionCollaborator>,
    reporter: Arc<dyn StatusReporter>,
    events_tx: mpsc::UnboundedSender<HubEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<HubEvent>>,
}

impl Hub {
    /// Create a hub with an empty queue and directory.
    pub fn new(config: HubConfig, debug: bool, parts: HubParts) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            identity: Identity::hub(config.name.clone()),
            queue: WorkQueue::new(config.queue_capacity),
            config,
            debug,
            sender: parts.sender,
            coordinators: Directory::new(),
            attached: HashSet::new(),
            launcher: parts.launcher,
            planner: parts.planner,
            reporter: parts.reporter,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// The hub's bus name.
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// A handle on the global queue.
    pub fn queue(&self) -> WorkQueue<TaskItem> {
        self.queue.clone()
    }

    /// How the hub currently sees `name`.
    pub fn coordinator_state(&self, name: &str) -> Option<CoordinatorState> {
        self.coordinators.get(name)
    }

    /// The coordinator directory.
    pub fn coordinators(&self) -> &Directory<CoordinatorState> {
        &self.coordinators
    }

    /// Serve hub-scoped envelopes until the bus connection ends.
    pub async fn run(mut self, mut receiver: BusReceiver) -> RelayResult<()> {
        let mut events = self
            .events_rx
            .take()
            .ok_or_else(|| RelayError::Orchestrator("hub event channel already taken".into()))?;

        info!(hub = %self.identity, max_coordinators = self.config.max_coordinators, "Hub online");
        notify(
            &self.reporter,
            StatusEvent::HubOnline {
                hub: self.name().to_string(),
            },
        );

        loop {
            tokio::select! {
                incoming = receiver.recv() => match incoming {
                    Some(envelope) => self.handle(envelope),
                    None => break,
                },
                Some(event) = events.recv() => self.on_event(event),
            }
        }
        warn!(hub = %self.identity, "Bus connection closed, hub stopping");
        Ok(())
    }

    /// Wait for one background planning job and apply its result.
    ///
    /// Returns false when no job result can arrive any more. Only meaningful
    /// when the hub is driven by hand instead of through [`Hub::run`].
    pub async fn settle(&mut self) -> bool {
        let event = match self.events_rx.as_mut() {
            Some(events) => events.recv().await,
            None => None,
        };
        match event {
            Some(event) => {
                self.on_event(event);
                true
            }
            None => false,
        }
    }

    /// Dispatch one hub-scoped envelope.
    pub fn handle(&mut self, envelope: Envelope) {
        log_inbound(&self.identity, self.debug, &envelope);
        let origin = envelope.origin;
        match envelope.message {
            Message::FunctionInvoke(Invocation::AttachCoordinator {
                uses_decision_collaborator,
                endpoint,
                id,
            }) => self.attach(uses_decision_collaborator, endpoint, id),
            Message::FunctionInvoke(other) => {
                debug!(hub = %self.identity, origin = %origin, call = ?other, "Call is not served by the hub");
            }
            Message::NewInstruction { objective } => self.plan(objective),
            Message::NodeAddQueueItem { item } => self.enqueue(item),
            Message::AgentReady | Message::AgentDequeueSuccess => self.dequeue(&origin),
            Message::AgentComplete => self.agent_complete(&origin),
            Message::Heartbeat => {
                if self.coordinators.touch(&origin) {
                    debug!(hub = %self.identity, coordinator = %origin, "Heartbeat");
                } else {
                    debug!(hub = %self.identity, origin = %origin, "Heartbeat from unknown participant");
                }
            }
            Message::UpdateConfig(update) => {
                if let Some(debug) = update.debug {
                    self.debug = debug;
                    info!(hub = %self.identity, debug = self.debug, "Configuration updated");
                }
            }
            Message::Ping => info!(hub = %self.identity, origin = %origin, "Ping"),
            Message::AgentDequeue
            | Message::WorkerReady
            | Message::WorkerComplete { .. }
            | Message::WorkerDequeue => {
                debug!(hub = %self.identity, origin = %origin, "Ignoring message for another tier");
            }
        }
    }

    fn attach(&mut self, uses_decision_collaborator: bool, endpoint: Option<String>, id: Option<Uuid>) {
        if self.attached.len() >= self.config.max_coordinators {
            warn!(
                hub = %self.identity,
                max_coordinators = self.config.max_coordinators,
                "Coordinator limit reached, attach request dropped"
            );
            return;
        }
        let name = coordinator_name(id.unwrap_or_else(Uuid::new_v4));
        if self.coordinators.contains(&name) {
            warn!(hub = %self.identity, coordinator = %name, "Coordinator already attached");
            return;
        }

        self.coordinators.insert(name.clone(), CoordinatorState::Receiving);
        let request = LaunchRequest {
            name: name.clone(),
            hub: self.name().to_string(),
            uses_decision_collaborator,
            endpoint,
            queue: self.queue.clone(),
        };
        match self.launcher.launch(request) {
            Ok(()) => {
                self.attached.insert(name.clone());
                info!(hub = %self.identity, coordinator = %name, uses_decision_collaborator, "Coordinator attached");
                notify(&self.reporter, StatusEvent::CoordinatorAttached { coordinator: name });
            }
            Err(e) => {
                warn!(hub = %self.identity, coordinator = %name, error = %e, "Coordinator launch failed");
                self.coordinators.remove(&name);
            }
        }
    }

    fn plan(&self, objective: String) {
        info!(hub = %self.identity, objective = %objective, "Planning instruction");
        let planner = Arc::clone(&self.planner);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = planner
                .decide(Role::Planner, &TaskItem::from(objective.as_str()))
                .await;
            if events.send(HubEvent::Planned { objective, result }).is_err() {
                debug!("Hub gone, plan discarded");
            }
        });
    }

    fn on_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Planned { objective, result } => match result {
                Ok(set) => {
                    info!(hub = %self.identity, objective = %objective, items = set.len(), "Instruction planned");
                    let mut queued = 0;
                    for action in set.into_actions() {
                        match self.queue.push(TaskItem::from(action)) {
                            Ok(()) => queued += 1,
                            Err(e) => warn!(hub = %self.identity, error = %e, "Item dropped"),
                        }
                    }
                    if queued > 0 {
                        self.wake_receiving();
                    }
                }
                Err(e) => {
                    warn!(hub = %self.identity, objective = %objective, error = %e, "Planning failed, instruction dropped");
                }
            },
        }
    }

    fn enqueue(&mut self, item: TaskItem) {
        match self.queue.push(item) {
            Ok(()) => {
                debug!(hub = %self.identity, depth = self.queue.len(), "Item queued");
                self.wake_receiving();
            }
            Err(e) => warn!(hub = %self.identity, error = %e, "Item dropped"),
        }
    }

    fn wake_receiving(&mut self) {
        for name in self.coordinators.names_in(CoordinatorState::Receiving) {
            self.dequeue(&name);
        }
    }

    /// Flip `coordinator` to Dequeuing and tell it to pull.
    fn dequeue(&mut self, coordinator: &str) {
        self.register(coordinator);
        self.transition(coordinator, CoordinatorState::Dequeuing);
        self.send(coordinator, Message::AgentDequeue);
    }

    fn agent_complete(&mut self, coordinator: &str) {
        self.register(coordinator);
        self.transition(coordinator, CoordinatorState::Receiving);
        if !self.queue.is_empty() {
            self.dequeue(coordinator);
        }
    }

    /// Coordinators self-report, so one the hub never attached is adopted on
    /// first contact. Adopted coordinators do not use up attach slots.
    fn register(&mut self, coordinator: &str) {
        if !self.coordinators.contains(coordinator) {
            info!(hub = %self.identity, coordinator, "Registering coordinator on first contact");
            self.coordinators
                .insert(coordinator, CoordinatorState::Receiving);
        }
    }

    fn transition(&mut self, coordinator: &str, to: CoordinatorState) {
        match self.coordinators.transition(coordinator, to) {
            Ok(from) if from != to => {
                debug!(hub = %self.identity, coordinator, ?from, ?to, "Coordinator transition");
            }
            Ok(_) => {}
            Err(e) => warn!(hub = %self.identity, error = %e, "Transition failed"),
        }
    }

    fn send(&self, coordinator: &str, message: Message) {
        let envelope = Envelope::new(self.name(), Target::named(coordinator), message);
        if let Err(e) = self.sender.send(envelope) {
            warn!(hub = %self.identity, coordinator, error = %e, "Failed to send");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TracingReporter;
    use async_trait::async_trait;
    use relay_core::AtomicAction;
    use std::sync::Mutex;

    /// Returns one navigate action per objective, or fails for "unplannable".
    struct OneStepPlanner;

    #[async_trait]
    impl DecisionCollaborator for OneStepPlanner {
        async fn decide(&self, role: Role, objective: &TaskItem) -> RelayResult<ActionSet> {
            assert_eq!(role, Role::Planner);
            if objective.objective() == "unplannable" {
                return Err(RelayError::Decision("no instruction_set".into()));
            }
            Ok(ActionSet::single(AtomicAction::navigate(format!(
                "https://example.com/{}",
                objective.objective()
            ))))
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<String>>,
        fail: bool,
    }

    impl CoordinatorLauncher for RecordingLauncher {
        fn launch(&self, request: LaunchRequest) -> RelayResult<()> {
            if self.fail {
                return Err(RelayError::Orchestrator("spawn failed".into()));
            }
            self.launched.lock().unwrap().push(request.name);
            Ok(())
        }
    }

    fn hub_with(
        launcher: Arc<RecordingLauncher>,
        max_coordinators: usize,
    ) -> (Hub, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Hub::new(
            HubConfig {
                max_coordinators,
                ..HubConfig::default()
            },
            false,
            HubParts {
                sender: BusSender::from_channel(tx),
                launcher,
                planner: Arc::new(OneStepPlanner),
                reporter: Arc::new(TracingReporter),
            },
        );
        (hub, rx)
    }

    fn from(origin: &str, message: Message) -> Envelope {
        Envelope::new(origin, Target::named("hub"), message)
    }

    fn attach(id: Uuid) -> Envelope {
        from(
            "cli",
            Message::FunctionInvoke(Invocation::AttachCoordinator {
                uses_decision_collaborator: true,
                endpoint: None,
                id: Some(id),
            }),
        )
    }

    #[tokio::test]
    async fn test_instruction_wakes_receiving_coordinator() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (mut hub, mut out) = hub_with(launcher.clone(), 4);
        let id = Uuid::new_v4();
        let name = coordinator_name(id);

        hub.handle(attach(id));
        assert_eq!(*launcher.launched.lock().unwrap(), vec![name.clone()]);
        assert_eq!(hub.coordinator_state(&name), Some(CoordinatorState::Receiving));

        hub.handle(from(
            "cli",
            Message::NewInstruction {
                objective: "X".into(),
            },
        ));
        assert!(hub.settle().await);

        assert_eq!(hub.queue().len(), 1);
        assert_eq!(hub.coordinator_state(&name), Some(CoordinatorState::Dequeuing));
        let sent = out.recv().await.unwrap();
        assert_eq!(sent.target, Target::named(name.as_str()));
        assert_eq!(sent.message, Message::AgentDequeue);
    }

    #[tokio::test]
    async fn test_failed_planning_is_dropped() {
        let (mut hub, mut out) = hub_with(Arc::new(RecordingLauncher::default()), 4);
        hub.handle(attach(Uuid::new_v4()));
        hub.handle(from(
            "cli",
            Message::NewInstruction {
                objective: "unplannable".into(),
            },
        ));
        assert!(hub.settle().await);
        assert!(hub.queue().is_empty());
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_agent_complete_redequeues_only_with_work() {
        let (mut hub, mut out) = hub_with(Arc::new(RecordingLauncher::default()), 4);

        hub.handle(from("Coordinator-a", Message::AgentReady));
        assert_eq!(
            hub.coordinator_state("Coordinator-a"),
            Some(CoordinatorState::Dequeuing)
        );
        assert_eq!(out.recv().await.unwrap().message, Message::AgentDequeue);

        hub.handle(from("Coordinator-a", Message::AgentComplete));
        assert_eq!(
            hub.coordinator_state("Coordinator-a"),
            Some(CoordinatorState::Receiving)
        );
        assert!(out.try_recv().is_err());

        hub.queue().push(TaskItem::from("more")).unwrap();
        hub.handle(from("Coordinator-a", Message::AgentComplete));
        assert_eq!(
            hub.coordinator_state("Coordinator-a"),
            Some(CoordinatorState::Dequeuing)
        );
        assert_eq!(out.recv().await.unwrap().message, Message::AgentDequeue);
    }

    #[tokio::test]
    async fn test_queue_item_wakes_only_receiving() {
        let (mut hub, mut out) = hub_with(Arc::new(RecordingLauncher::default()), 4);
        hub.handle(from("Coordinator-a", Message::AgentReady));
        hub.handle(from("Coordinator-b", Message::AgentReady));
        hub.handle(from("Coordinator-b", Message::AgentComplete));
        while out.try_recv().is_ok() {}

        hub.handle(from(
            "cli",
            Message::NodeAddQueueItem {
                item: TaskItem::from("job"),
            },
        ));

        let woken = out.recv().await.unwrap();
        assert_eq!(woken.target, Target::named("Coordinator-b"));
        assert!(out.try_recv().is_err());
        assert_eq!(hub.coordinators().count_in(CoordinatorState::Dequeuing), 2);
    }

    #[tokio::test]
    async fn test_attach_limit_and_launch_failure() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (mut hub, _out) = hub_with(launcher.clone(), 1);
        hub.handle(attach(Uuid::new_v4()));
        hub.handle(attach(Uuid::new_v4()));
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
        assert_eq!(hub.coordinators().len(), 1);

        let failing = Arc::new(RecordingLauncher {
            fail: true,
            ..RecordingLauncher::default()
        });
        let (mut hub, _out) = hub_with(failing, 4);
        hub.handle(attach(Uuid::new_v4()));
        assert!(hub.coordinators().is_empty());
    }

    #[tokio::test]
    async fn test_adopted_coordinators_leave_attach_slots_free() {
        let launcher = Arc::new(RecordingLauncher::default());
        let (mut hub, _out) = hub_with(launcher.clone(), 1);
        hub.handle(from("Coordinator-a", Message::AgentReady));
        hub.handle(from("Coordinator-b", Message::AgentReady));
        assert_eq!(hub.coordinators().len(), 2);

        hub.handle(attach(Uuid::new_v4()));
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
        assert_eq!(hub.coordinators().len(), 3);

        hub.handle(attach(Uuid::new_v4()));
        assert_eq!(launcher.launched.lock().unwrap().len(), 1);
    }

    /// Plans after a short delay and counts finished calls.
    struct SlowPlanner(Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait]
    impl DecisionCollaborator for SlowPlanner {
        async fn decide(&self, _role: Role, objective: &TaskItem) -> RelayResult<ActionSet> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(ActionSet::single(AtomicAction::navigate(objective.objective())))
        }
    }

    #[tokio::test]
    async fn test_plan_finishing_after_hub_drop_is_discarded() {
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut hub = Hub::new(
            HubConfig::default(),
            false,
            HubParts {
                sender: BusSender::from_channel(tx),
                launcher: Arc::new(RecordingLauncher::default()),
                planner: Arc::new(SlowPlanner(Arc::clone(&done))),
                reporter: Arc::new(TracingReporter),
            },
        );
        let queue = hub.queue();
        hub.handle(from(
            "cli",
            Message::NewInstruction {
                objective: "late".into(),
            },
        ));
        drop(hub);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while done.load(std::sync::atomic::Ordering::SeqCst) == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_last_seen() {
        let (mut hub, _out) = hub_with(Arc::new(RecordingLauncher::default()), 4);
        hub.handle(from("Coordinator-a", Message::AgentReady));
        let before = hub.coordinators().last_seen("Coordinator-a").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        hub.handle(from("Coordinator-a", Message::Heartbeat));
        assert!(hub.coordinators().last_seen("Coordinator-a").unwrap() > before);
    }
}
