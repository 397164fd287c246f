//! Leaf tier: drains single units from the coordinator's local queue and runs
//! their actions against an automation collaborator.

use crate::log_inbound;
use relay_automation::Automation;
use relay_bus::{BusConnection, BusSender};
use relay_core::{
    ActionOutcome, ActionSet, CompletionReport, Envelope, Identity, Message, RelayResult, Step,
    Target, WorkQueue,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// What an executor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// Created, not yet announced to the coordinator.
    Starting,
    /// Announced and waiting for `worker_dequeue`.
    Idle,
    /// Got `worker_dequeue`, about to pull.
    Ready,
    /// Waiting on the local queue.
    Dequeuing,
    /// Between actions of a set.
    Transitioning,
    /// Running a `navigate` action.
    Navigating,
    /// Running a `capture` action.
    Capturing,
    /// Running a `write` action.
    Writing,
    /// Running a `generate` action.
    Generating,
    /// The bus connection ended. Terminal.
    Stopping,
}

/// One executor: a bus identity, a handle on its coordinator's local queue
/// and the automation collaborator it runs actions against.
pub struct Executor {
    identity: Identity,
    coordinator: String,
    queue: WorkQueue<ActionSet>,
    automation: Arc<dyn Automation>,
    pull_timeout: Duration,
    debug: bool,
    state: Arc<watch::Sender<ExecutorState>>,
}

impl Executor {
    /// Create an executor pulling from `queue`.
    pub fn new(
        name: impl Into<String>,
        coordinator: impl Into<String>,
        queue: WorkQueue<ActionSet>,
        automation: Arc<dyn Automation>,
        pull_timeout: Duration,
        debug: bool,
    ) -> Self {
        let (state, _) = watch::channel(ExecutorState::Starting);
        Self {
            identity: Identity::executor(name),
            coordinator: coordinator.into(),
            queue,
            automation,
            pull_timeout,
            debug,
            state: Arc::new(state),
        }
    }

    /// The executor's bus name.
    pub fn name(&self) -> &str {
        self.identity.name()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> ExecutorState {
        *self.state.borrow()
    }

    /// Announce readiness to the coordinator and serve dequeue instructions
    /// until the bus connection ends.
    ///
    /// A `worker_dequeue` that arrives while a pull is running is folded into
    /// that pull; every pull ends with exactly one `worker_complete`.
    pub async fn run(mut self, connection: BusConnection) -> RelayResult<()> {
        let (sender, mut receiver) = connection.split();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Option<CompletionReport>>();
        let mut pulling = false;

        self.send(&sender, Message::WorkerReady);
        self.state.send_replace(ExecutorState::Idle);
        info!(executor = %self.identity, coordinator = %self.coordinator, "Executor ready");

        loop {
            tokio::select! {
                incoming = receiver.recv() => {
                    let Some(envelope) = incoming else { break };
                    log_inbound(&self.identity, self.debug, &envelope);
                    match envelope.message {
                        Message::WorkerDequeue if pulling => {
                            debug!(executor = %self.identity, "Dequeue already in progress");
                        }
                        Message::WorkerDequeue => {
                            pulling = true;
                            self.spawn_pull(done_tx.clone());
                        }
                        Message::UpdateConfig(update) => {
                            if let Some(debug) = update.debug {
                                self.debug = debug;
                            }
                            if let Some(ms) = update.pull_timeout_ms {
                                self.pull_timeout = Duration::from_millis(ms);
                            }
                            info!(executor = %self.identity, debug = self.debug, pull_timeout_ms = self.pull_timeout.as_millis() as u64, "Configuration updated");
                        }
                        Message::Ping => info!(executor = %self.identity, origin = %envelope.origin, "Ping"),
                        other => debug!(executor = %self.identity, kind = other.kind(), "Ignoring message"),
                    }
                }
                Some(result) = done_rx.recv() => {
                    pulling = false;
                    self.state.send_replace(ExecutorState::Idle);
                    self.send(&sender, Message::WorkerComplete { result });
                }
            }
        }

        self.state.send_replace(ExecutorState::Stopping);
        warn!(executor = %self.identity, "Bus connection closed, executor stopping");
        Ok(())
    }

    fn spawn_pull(&self, done: mpsc::UnboundedSender<Option<CompletionReport>>) {
        let queue = self.queue.clone();
        let automation = Arc::clone(&self.automation);
        let state = Arc::clone(&self.state);
        let wait = self.pull_timeout;
        let name = self.identity.name().to_string();

        tokio::spawn(async move {
            state.send_replace(ExecutorState::Ready);
            state.send_replace(ExecutorState::Dequeuing);
            let result = match queue.pull_timeout(wait).await {
                Some(set) => Some(execute_set(&name, set, automation.as_ref(), &state).await),
                None => {
                    debug!(executor = %name, "Local queue empty");
                    None
                }
            };
            if done.send(result).is_err() {
                debug!(executor = %name, "Executor gone, result discarded");
            }
        });
    }

    fn send(&self, sender: &BusSender, message: Message) {
        let envelope = Envelope::new(
            self.identity.name(),
            Target::named(&self.coordinator),
            message,
        );
        if let Err(e) = sender.send(envelope) {
            warn!(executor = %self.identity, error = %e, "Failed to send");
        }
    }
}

/// Run every action of `set` in order. A failed action is recorded and the
/// rest still run.
pub async fn execute_set(
    executor: &str,
    set: ActionSet,
    automation: &dyn Automation,
    state: &watch::Sender<ExecutorState>,
) -> CompletionReport {
    let mut outcomes = Vec::with_capacity(set.len());
    for (index, action) in set.iter().enumerate() {
        state.send_replace(ExecutorState::Transitioning);
        let outcome = match action.step() {
            Ok(step) => execute_step(step, automation, state).await,
            Err(e) => Err(e),
        };
        outcomes.push(match outcome {
            Ok(detail) => {
                debug!(executor, index, operation = %action.operation, "Action done");
                ActionOutcome::done(detail)
            }
            Err(e) => {
                warn!(executor, index, operation = %action.operation, error = %e, "Action failed");
                ActionOutcome::failed(e.to_string())
            }
        });
    }
    let report = CompletionReport::new(set, outcomes);
    info!(
        executor,
        actions = report.actions.len(),
        first_failure = ?report.first_failure,
        "Action set executed"
    );
    report
}

async fn execute_step(
    step: Step,
    automation: &dyn Automation,
    state: &watch::Sender<ExecutorState>,
) -> RelayResult<Option<String>> {
    match step {
        Step::Navigate { url } => {
            state.send_replace(ExecutorState::Navigating);
            automation.navigate(&url).await?;
            Ok(Some(url))
        }
        Step::Capture => {
            state.send_replace(ExecutorState::Capturing);
            let path = automation.capture().await?;
            Ok(Some(path.display().to_string()))
        }
        Step::Write { content, filename } => {
            state.send_replace(ExecutorState::Writing);
            let path = automation.write(&content, &filename).await?;
            Ok(Some(path.display().to_string()))
        }
        Step::Generate {
            description,
            filename,
        } => {
            state.send_replace(ExecutorState::Generating);
            let content = automation.generate(&description).await?;
            let path = automation.write(&content, &filename).await?;
            Ok(Some(path.display().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_bus::BusReceiver;
    use relay_core::{AtomicAction, RelayError};
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records calls; navigation to any URL containing "fail" errors.
    #[derive(Default)]
    struct ScriptedAutomation {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Automation for ScriptedAutomation {
        async fn navigate(&self, url: &str) -> RelayResult<()> {
            self.calls.lock().unwrap().push(format!("navigate {url}"));
            if url.contains("fail") {
                return Err(RelayError::Automation(format!("cannot reach {url}")));
            }
            Ok(())
        }

        async fn capture(&self) -> RelayResult<PathBuf> {
            self.calls.lock().unwrap().push("capture".into());
            Ok(PathBuf::from("shot.png"))
        }

        async fn write(&self, content: &str, filename: &str) -> RelayResult<PathBuf> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("write {filename} {content}"));
            Ok(PathBuf::from(filename))
        }

        async fn generate(&self, description: &str) -> RelayResult<String> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("generate {description}"));
            Ok(format!("// {description}"))
        }
    }

    fn numbered_set(n: usize) -> ActionSet {
        (0..n)
            .map(|i| AtomicAction::write(format!("line {i}"), format!("f{i}.txt")))
            .collect()
    }

    #[tokio::test]
    async fn test_report_lists_every_action_in_order() {
        for n in [1, 5, 50] {
            let automation = ScriptedAutomation::default();
            let (state, _) = watch::channel(ExecutorState::Idle);
            let set = numbered_set(n);
            let report = execute_set("e", set.clone(), &automation, &state).await;

            assert_eq!(report.actions, set);
            assert_eq!(report.outcomes.len(), n);
            assert!(report.is_success());
            assert_eq!(automation.calls.lock().unwrap().len(), n);
            assert_eq!(
                automation.calls.lock().unwrap()[n - 1],
                format!("write f{} line {}", n - 1, n - 1)
            );
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_halt_the_set() {
        let automation = ScriptedAutomation::default();
        let (state, _) = watch::channel(ExecutorState::Idle);
        let set = ActionSet::new(vec![
            AtomicAction::navigate("https://fail.example"),
            AtomicAction::capture(),
            AtomicAction::new(relay_core::Operation::Write, serde_json::json!({})),
            AtomicAction::generate("a greeting", "hello.rs"),
        ]);

        let report = execute_set("e", set, &automation, &state).await;

        assert_eq!(report.first_failure, Some(0));
        assert!(report.outcomes[0].is_failure());
        assert!(!report.outcomes[1].is_failure());
        assert!(report.outcomes[2].is_failure());
        assert!(!report.outcomes[3].is_failure());
        assert_eq!(
            *automation.calls.lock().unwrap(),
            vec![
                "navigate https://fail.example",
                "capture",
                "generate a greeting",
                "write hello.rs // a greeting",
            ]
        );
        assert_eq!(*state.borrow(), ExecutorState::Generating);
    }

    struct Harness {
        to_executor: mpsc::UnboundedSender<Envelope>,
        from_executor: mpsc::UnboundedReceiver<Envelope>,
    }

    fn start(queue: WorkQueue<ActionSet>) -> (Harness, watch::Receiver<ExecutorState>) {
        let executor = Executor::new(
            "c_Executor-1",
            "c",
            queue,
            Arc::new(ScriptedAutomation::default()),
            Duration::from_millis(20),
            false,
        );
        let states = executor.subscribe();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let connection = BusConnection {
            sender: BusSender::from_channel(out_tx),
            receiver: BusReceiver::new(Identity::executor("c_Executor-1"), in_rx),
        };
        tokio::spawn(executor.run(connection));
        (
            Harness {
                to_executor: in_tx,
                from_executor: out_rx,
            },
            states,
        )
    }

    fn dequeue() -> Envelope {
        Envelope::new("c", Target::named("c_Executor-1"), Message::WorkerDequeue)
    }

    #[tokio::test]
    async fn test_one_pull_per_dequeue() {
        let queue = WorkQueue::new(8);
        queue.push(numbered_set(2)).unwrap();
        queue.push(numbered_set(1)).unwrap();
        let (mut h, states) = start(queue.clone());

        let ready = h.from_executor.recv().await.unwrap();
        assert_eq!(ready.message, Message::WorkerReady);
        assert_eq!(ready.target, Target::named("c"));

        h.to_executor.send(dequeue()).unwrap();
        let Message::WorkerComplete { result } = h.from_executor.recv().await.unwrap().message
        else {
            panic!("expected worker_complete");
        };
        assert_eq!(result.unwrap().actions.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(*states.borrow(), ExecutorState::Idle);
    }

    #[tokio::test]
    async fn test_empty_pull_still_completes() {
        let (mut h, _states) = start(WorkQueue::new(1));
        h.from_executor.recv().await.unwrap();

        h.to_executor.send(dequeue()).unwrap();
        let complete = h.from_executor.recv().await.unwrap();
        assert_eq!(complete.message, Message::WorkerComplete { result: None });
    }

    #[tokio::test]
    async fn test_ignores_other_executors_messages() {
        let queue = WorkQueue::new(1);
        queue.push(numbered_set(1)).unwrap();
        let (mut h, _states) = start(queue.clone());
        h.from_executor.recv().await.unwrap();

        h.to_executor
            .send(Envelope::new("c", Target::named("c_Executor-2"), Message::WorkerDequeue))
            .unwrap();
        h.to_executor
            .send(Envelope::new("hub", Target::Any, Message::Ping))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);
        assert!(h.from_executor.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stops_when_bus_closes() {
        let (h, mut states) = start(WorkQueue::new(1));
        drop(h.to_executor);
        while *states.borrow_and_update() != ExecutorState::Stopping {
            states.changed().await.unwrap();
        }
    }
}
