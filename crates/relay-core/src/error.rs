use thiserror::Error;

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

/// Top-level error type shared by every relay crate.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The bus connection could not be opened, or was dropped.
    #[error("Bus error: {0}")]
    Bus(String),

    /// An envelope did not match the message catalog.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The decision collaborator was unreachable or answered with an unusable shape.
    #[error("Decision error: {0}")]
    Decision(String),

    /// An atomic action failed inside the automation collaborator.
    #[error("Automation error: {0}")]
    Automation(String),

    /// A task queue rejected a push or was closed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Configuration could not be read or was invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A tier refused an operation (pool limits, unknown participants).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
