//! The three tiers of the relay orchestrator.
//!
//! A [`Hub`] owns the global task queue and decides when coordinators may
//! dequeue. Each [`Coordinator`] decomposes one task item at a time into
//! single-action units and feeds its [`Executor`] pool, which runs them
//! against an automation collaborator. Tiers talk only through bus envelopes.
//!
//! # Main types
//!
//! - [`Hub`]: Root tier: global queue, coordinator directory, attach handling.
//! - [`Coordinator`]: Mid tier: executor pool, local queue, decomposition.
//! - [`Executor`]: Leaf tier: runs action sets and reports completion.
//! - [`TaskLauncher`]: Starts coordinators as tasks for the hub.
//! - [`StatusReporter`]: Lifecycle notifications (log or Discord).

/// Tier settings.
pub mod config;
/// Mid tier.
pub mod coordinator;
/// Leaf tier.
pub mod executor;
/// Root tier.
pub mod hub;
/// Starting coordinators on attach.
pub mod launcher;
/// Lifecycle status reporting.
pub mod status;

pub use config::{CoordinatorConfig, ExecutorConfig, HubConfig};
pub use coordinator::{Coordinator, CoordinatorSetup, ExecutorView};
pub use executor::{execute_set, Executor, ExecutorState};
pub use hub::{CoordinatorState, Hub, HubParts};
pub use launcher::{
    CoordinatorLauncher, DecisionFactory, HttpDecisionFactory, LaunchRequest, TaskLauncher,
};
pub use status::{DiscordReporter, StatusEvent, StatusReporter, TracingReporter};

use relay_core::{Envelope, Identity};

/// Inbound envelopes go to `debug`, or to `info` while the debug flag is on.
pub(crate) fn log_inbound(participant: &Identity, debug: bool, envelope: &Envelope) {
    if debug {
        tracing::info!(
            participant = %participant,
            origin = %envelope.origin,
            kind = envelope.kind(),
            "Received"
        );
    } else {
        tracing::debug!(
            participant = %participant,
            origin = %envelope.origin,
            kind = envelope.kind(),
            "Received"
        );
    }
}
