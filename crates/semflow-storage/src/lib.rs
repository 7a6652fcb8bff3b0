//! In-memory reference implementations of the abstract storage contracts
//! defined in `semflow_core::repository`. Concrete production backends
//! (document store, key-value store, graph store, relational store, ...)
//! are external collaborators out of scope for this crate (spec §1).

pub mod action_repository;
pub mod event_repository;
pub mod process_state_store;

pub use action_repository::InMemoryActionRepository;
pub use event_repository::InMemoryEventRepository;
pub use process_state_store::InMemoryProcessStateStore;
