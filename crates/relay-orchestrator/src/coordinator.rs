//! Mid tier: owns an executor pool and a local queue, turns one task item at a
//! time into single-action units for its executors.
//!
//! The message loop never blocks on the global queue or the decision
//! collaborator. Pulls and decompositions run as background jobs and hand
//! their result back to the loop, which is the only place the executor
//! directory changes.

use crate::config::{CoordinatorConfig, ExecutorConfig};
use crate::executor::Executor;
use crate::log_inbound;
use crate::status::{notify, StatusEvent, StatusReporter};
use relay_automation::AutomationFactory;
use relay_bus::{BusReceiver, BusSender, Connector};
use relay_core::{
    executor_name, ActionSet, CompletionReport, Directory, Envelope, Identity, Invocation,
    Message, RelayError, RelayResult, TaskItem, Target, WorkQueue,
};
use relay_decision::{DecisionCollaborator, Role};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An executor as its coordinator last heard of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorView {
    /// Reported `worker_ready`, not yet released to work.
    Ready,
    /// Has no pull outstanding.
    Idle,
    /// Was sent `worker_dequeue` and has not completed yet.
    Dequeue,
}

/// Everything a coordinator needs to start.
pub struct CoordinatorSetup {
    /// Bus name of the coordinator.
    pub name: String,
    /// Name of the hub to report to.
    pub hub: String,
    /// Pool size, queue capacity and heartbeat.
    pub config: CoordinatorConfig,
    /// Settings for every executor in the pool.
    pub executor: ExecutorConfig,
    /// Log inbound envelopes at `info`.
    pub debug: bool,
    /// The hub's global queue.
    pub inbound: WorkQueue<TaskItem>,
    /// Used for the coordinator and its executors.
    pub connector: Arc<dyn Connector>,
    /// Decomposes items into action sets.
    pub decision: Arc<dyn DecisionCollaborator>,
    /// Builds each executor's automation.
    pub automation: Arc<dyn AutomationFactory>,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn StatusReporter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Pulled from the global queue after `agent_dequeue`.
    Dequeued,
    /// Came in through `instruct`.
    Instructed,
}

enum Event {
    Decomposed {
        source: Source,
        result: RelayResult<ActionSet>,
    },
}

/// One coordinator and, once running, its executor pool.
pub struct Coordinator {
    identity: Identity,
    hub: String,
    config: CoordinatorConfig,
    executor: ExecutorConfig,
    debug: bool,
    inbound: WorkQueue<TaskItem>,
    local: WorkQueue<ActionSet>,
    executors: Directory<ExecutorView>,
    connector: Arc<dyn Connector>,
    decision: Arc<dyn DecisionCollaborator>,
    automation: Arc<dyn AutomationFactory>,
    reporter: Arc<dyn StatusReporter>,
    pulling: bool,
    pull_job: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Coordinator {
    /// Create a coordinator; nothing runs until [`Coordinator::run`].
    pub fn new(setup: CoordinatorSetup) -> Self {
        let local = WorkQueue::new(setup.config.queue_capacity);
        Self {
            identity: Identity::coordinator(setup.name),
            hub: setup.hub,
            config: setup.config,
            executor: setup.executor,
            debug: setup.debug,
            inbound: setup.inbound,
            local,
            executors: Directory::new(),
            connector: setup.connector,
            decision: setup.decision,
            automation: setup.automation,
            reporter: setup.reporter,
            pulling: false,
            pull_job: None,
            workers: Vec::new(),
        }
    }

    /// The coordinator's bus name.
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Connect, bring up the executor pool, announce readiness, then serve
    /// messages until the bus connection ends.
    ///
    /// Startup order matters: the coordinator is connected before any
    /// executor so no `worker_ready` is missed, and it only tells the hub it is
    /// ready once every executor has reported in.
    pub async fn run(mut self) -> RelayResult<()> {
        let connection = self.connector.connect(self.identity.clone()).await?;
        let (sender, mut receiver) = connection.split();

        let result = match self.spawn_executors().await {
            Ok(spawned) => self.serve(&sender, &mut receiver, spawned).await,
            Err(e) => Err(e),
        };

        if let Some(job) = self.pull_job.take() {
            job.abort();
        }
        for worker in self.workers.drain(..) {
            worker.abort();
        }
        result
    }

    async fn serve(
        &mut self,
        sender: &BusSender,
        receiver: &mut BusReceiver,
        spawned: HashSet<String>,
    ) -> RelayResult<()> {
        self.await_executors(receiver, spawned).await?;

        let names = self.executors.names();
        for name in &names {
            self.transition(name, ExecutorView::Idle);
        }
        for name in &names {
            self.release(sender, name);
        }
        self.send_hub(sender, Message::AgentReady);
        info!(coordinator = %self.identity, executors = names.len(), "Coordinator ready");
        notify(
            &self.reporter,
            StatusEvent::CoordinatorReady {
                coordinator: self.name().to_string(),
                executors: names.len(),
            },
        );

        let heartbeat = self.spawn_heartbeat(sender);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        loop {
            tokio::select! {
                incoming = receiver.recv() => match incoming {
                    Some(envelope) => self.handle(sender, envelope, &events_tx),
                    None => break,
                },
                Some(event) = events_rx.recv() => self.on_event(sender, event),
            }
        }

        if let Some(heartbeat) = heartbeat {
            heartbeat.abort();
        }
        warn!(coordinator = %self.identity, "Bus connection closed, coordinator stopping");
        Ok(())
    }

    /// Start the executor pool. An executor that cannot connect is skipped;
    /// the coordinator only fails when none comes up.
    async fn spawn_executors(&mut self) -> RelayResult<HashSet<String>> {
        let mut spawned = HashSet::new();
        for _ in 0..self.config.executors {
            let name = executor_name(self.name(), Uuid::new_v4());
            let connection = match self
                .connector
                .connect(Identity::executor(name.clone()))
                .await
            {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(coordinator = %self.identity, executor = %name, error = %e, "Executor failed to connect, skipping");
                    continue;
                }
            };
            let executor = Executor::new(
                name.clone(),
                self.name(),
                self.local.clone(),
                self.automation.build(&name),
                self.executor.pull_timeout(),
                self.debug,
            );
            let task_name = name.clone();
            self.workers.push(tokio::spawn(async move {
                if let Err(e) = executor.run(connection).await {
                    error!(executor = %task_name, error = %e, "Executor failed");
                }
            }));
            debug!(coordinator = %self.identity, executor = %name, "Executor spawned");
            spawned.insert(name);
        }
        if spawned.is_empty() {
            return Err(RelayError::Orchestrator(format!(
                "none of {} executors could connect",
                self.config.executors
            )));
        }
        info!(coordinator = %self.identity, spawned = spawned.len(), requested = self.config.executors, "Executors spawned");
        Ok(spawned)
    }

    /// Block until every spawned executor has sent `worker_ready`.
    async fn await_executors(
        &mut self,
        receiver: &mut BusReceiver,
        mut pending: HashSet<String>,
    ) -> RelayResult<()> {
        while !pending.is_empty() {
            let envelope = receiver.recv().await.ok_or_else(|| {
                RelayError::Bus(format!(
                    "bus closed while {} executors were starting",
                    pending.len()
                ))
            })?;
            match envelope.message {
                Message::WorkerReady if pending.remove(&envelope.origin) => {
                    self.executors.insert(envelope.origin.clone(), ExecutorView::Ready);
                    debug!(coordinator = %self.identity, executor = %envelope.origin, remaining = pending.len(), "Executor reported ready");
                }
                other => {
                    debug!(coordinator = %self.identity, origin = %envelope.origin, kind = other.kind(), "Dropped during startup");
                }
            }
        }
        Ok(())
    }

    fn spawn_heartbeat(&self, sender: &BusSender) -> Option<JoinHandle<()>> {
        let period = self.config.heartbeat_interval()?;
        let sender = sender.clone();
        let origin = self.name().to_string();
        let hub = self.hub.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = Envelope::new(origin.as_str(), Target::named(hub.as_str()), Message::Heartbeat);
                if sender.send(beat).is_err() {
                    break;
                }
            }
        }))
    }

    fn handle(
        &mut self,
        sender: &BusSender,
        envelope: Envelope,
        events: &mpsc::UnboundedSender<Event>,
    ) {
        log_inbound(&self.identity, self.debug, &envelope);
        let origin = envelope.origin;
        match envelope.message {
            Message::AgentDequeue => self.dequeue(events),
            Message::WorkerComplete { result } => self.worker_complete(sender, &origin, result),
            Message::WorkerReady => self.worker_ready(sender, &origin),
            Message::FunctionInvoke(Invocation::PutQueue { item }) => {
                info!(coordinator = %self.identity, actions = item.len(), "put_queue");
                self.distribute(sender, item);
            }
            Message::FunctionInvoke(Invocation::Instruct { prompt }) => {
                self.spawn_decompose(TaskItem::from(prompt.as_str()), Source::Instructed, events);
            }
            Message::UpdateConfig(update) => {
                if let Some(debug) = update.debug {
                    self.debug = debug;
                    info!(coordinator = %self.identity, debug = self.debug, "Configuration updated");
                }
            }
            Message::Ping => info!(coordinator = %self.identity, origin = %origin, "Ping"),
            other => {
                debug!(coordinator = %self.identity, kind = other.kind(), "Ignoring message");
            }
        }
    }

    /// Pull one item from the global queue and decompose it, unless a pull
    /// is already outstanding.
    fn dequeue(&mut self, events: &mpsc::UnboundedSender<Event>) {
        if self.pulling {
            debug!(coordinator = %self.identity, "Dequeue already in progress");
            return;
        }
        self.pulling = true;

        let inbound = self.inbound.clone();
        let decision = Arc::clone(&self.decision);
        let events = events.clone();
        let name = self.name().to_string();
        self.pull_job = Some(tokio::spawn(async move {
            let Some(item) = inbound.pull().await else {
                warn!(coordinator = %name, "Global queue closed");
                return;
            };
            debug!(coordinator = %name, objective = %item.objective(), "Item dequeued");
            let result = decision.decide(Role::Decomposer, &item).await;
            let event = Event::Decomposed {
                source: Source::Dequeued,
                result,
            };
            if events.send(event).is_err() {
                debug!(coordinator = %name, "Coordinator gone, decomposition discarded");
            }
        }));
    }

    fn spawn_decompose(
        &self,
        item: TaskItem,
        source: Source,
        events: &mpsc::UnboundedSender<Event>,
    ) {
        let decision = Arc::clone(&self.decision);
        let events = events.clone();
        let name = self.name().to_string();
        tokio::spawn(async move {
            let result = decision.decide(Role::Decomposer, &item).await;
            if events.send(Event::Decomposed { source, result }).is_err() {
                debug!(coordinator = %name, "Coordinator gone, decomposition discarded");
            }
        });
    }

    fn on_event(&mut self, sender: &BusSender, event: Event) {
        match event {
            Event::Decomposed { source, result } => {
                if source == Source::Dequeued {
                    self.pulling = false;
                }
                match result {
                    Ok(set) => {
                        let actions = set.len();
                        self.distribute(sender, set);
                        if source == Source::Dequeued {
                            self.send_hub(sender, Message::AgentDequeueSuccess);
                        }
                        notify(
                            &self.reporter,
                            StatusEvent::ItemDecomposed {
                                coordinator: self.name().to_string(),
                                actions,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(coordinator = %self.identity, error = %e, "Decomposition failed, item dropped");
                        if source == Source::Dequeued && self.executors.all_in(ExecutorView::Idle) {
                            self.send_hub(sender, Message::AgentComplete);
                        }
                    }
                }
            }
        }
    }

    /// Fragment `set` onto the local queue and wake every idle executor.
    fn distribute(&mut self, sender: &BusSender, set: ActionSet) {
        for unit in set.fragment() {
            if let Err(e) = self.local.push(unit) {
                warn!(coordinator = %self.identity, error = %e, "Unit dropped");
            }
        }
        for name in self.executors.names_in(ExecutorView::Idle) {
            self.release(sender, &name);
        }
    }

    fn worker_complete(
        &mut self,
        sender: &BusSender,
        executor: &str,
        result: Option<CompletionReport>,
    ) {
        if !self.executors.contains(executor) {
            debug!(coordinator = %self.identity, executor, "Completion from unknown executor");
            return;
        }
        if let Some(report) = &result {
            if let Some(index) = report.first_failure {
                warn!(coordinator = %self.identity, executor, index, "Unit finished with a failed action");
            }
        }

        let was_drained = self.executors.all_in(ExecutorView::Idle);
        if self.local.is_empty() {
            self.transition(executor, ExecutorView::Idle);
        } else {
            self.release(sender, executor);
        }

        if !was_drained && self.executors.all_in(ExecutorView::Idle) {
            info!(coordinator = %self.identity, "All executors idle");
            self.send_hub(sender, Message::AgentComplete);
            notify(
                &self.reporter,
                StatusEvent::CoordinatorDrained {
                    coordinator: self.name().to_string(),
                },
            );
        }
    }

    fn worker_ready(&mut self, sender: &BusSender, executor: &str) {
        if self.executors.contains(executor) {
            self.release(sender, executor);
        } else {
            debug!(coordinator = %self.identity, executor, "Ready from unknown executor");
        }
    }

    /// Flip `executor` to `Dequeue` and tell it to pull.
    fn release(&mut self, sender: &BusSender, executor: &str) {
        self.transition(executor, ExecutorView::Dequeue);
        let envelope = Envelope::new(self.name(), Target::named(executor), Message::WorkerDequeue);
        if let Err(e) = sender.send(envelope) {
            warn!(coordinator = %self.identity, executor, error = %e, "Failed to send dequeue");
        }
    }

    fn transition(&mut self, executor: &str, to: ExecutorView) {
        match self.executors.transition(executor, to) {
            Ok(from) if from != to => {
                debug!(coordinator = %self.identity, executor, ?from, ?to, "Executor transition");
            }
            Ok(_) => {}
            Err(e) => warn!(coordinator = %self.identity, error = %e, "Transition failed"),
        }
    }

    fn send_hub(&self, sender: &BusSender, message: Message) {
        let envelope = Envelope::new(self.name(), Target::named(self.hub.as_str()), message);
        if let Err(e) = sender.send(envelope) {
            warn!(coordinator = %self.identity, error = %e, "Failed to reach hub");
        }
    }
}
