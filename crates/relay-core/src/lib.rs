//! Core types and error definitions for the relay orchestrator.
//!
//! This crate provides the types every tier shares: the bus envelope and its
//! message catalog, participant identities and wildcard targets, task items
//! and atomic actions, the bounded work queue and the parent-side directory.
//!
//! # Main types
//!
//! - [`RelayError`]: Unified error enum for all relay subsystems.
//! - [`RelayResult`]: Convenience alias for `Result<T, RelayError>`.
//! - [`Envelope`]: One `{type, origin, target, data}` message on the bus.
//! - [`Message`]: The typed message catalog.
//! - [`Identity`] / [`Target`]: Who a participant is and who a message is for.
//! - [`ActionSet`]: Ordered atomic actions derived from one [`TaskItem`].
//! - [`WorkQueue`]: Bounded FIFO with exactly-once delivery to pullers.
//! - [`Directory`]: A parent's view of its children's states.

/// Task items, atomic actions, action sets and completion reports.
pub mod action;
/// Parent-side directory of child states.
pub mod directory;
/// Error type and result alias.
pub mod error;
/// Participant identities and wildcard targets.
pub mod identity;
/// Envelope and message catalog.
pub mod message;
/// Bounded work queue.
pub mod queue;

pub use action::{
    ActionOutcome, ActionSet, AtomicAction, CompletionReport, Operation, Step, TaskItem,
};
pub use directory::{Directory, DirectoryEntry};
pub use error::{RelayError, RelayResult};
pub use identity::{coordinator_name, executor_name, Identity, Target, Tier};
pub use message::{Envelope, Invocation, Message, ReloadableConfig};
pub use queue::WorkQueue;
