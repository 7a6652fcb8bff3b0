//! # Semflow Core
//!
//! Core primitives of the semantic workflow execution runtime: the
//! [`action::Action`] document model, the [`substitution`] engine, the
//! [`scheduler`] dependency resolver, and the externally-facing
//! [`process_state::ProcessState`]/[`event::Event`]/[`job::Job`] records.
//!
//! ## Architecture
//!
//! ```text
//! workflow instance -> scheduler picks ready Action -> substitute variables
//!   -> enqueue Job -> worker dequeues -> handler dispatches via transport
//!   -> result written back -> scheduler advances -> Event emitted
//! ```

pub mod action;
pub mod config;
pub mod event;
pub mod job;
pub mod process_state;
pub mod reliability;
pub mod repository;
pub mod scheduler;
pub mod substitution;
pub mod workflow;

pub mod prelude {
    pub use crate::action::{Action, ActionError, ActionStatus};
    pub use crate::config::RuntimeConfig;
    pub use crate::event::{Event, EventKind};
    pub use crate::job::Job;
    pub use crate::process_state::{ProcessState, ProcessStateError, ProcessStateValue};
    pub use crate::reliability::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
    pub use crate::repository::{ActionRepository, EventRepository, ProcessStateStore, RepositoryError};
    pub use crate::scheduler::{evaluate_workflow, ready_actions, WorkflowTerminalStatus};
    pub use crate::substitution::{substitute, ActionResultResolver, MapResolver, Resolver, ResolverChain, SubstitutionError};
    pub use crate::workflow::Workflow;
}
