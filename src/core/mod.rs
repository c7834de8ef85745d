//! Core orchestration logic.
//!
//! This module contains:
//! - EventStore: Append-only per-instance history
//! - RetryPolicy: Attempt budgets and backoff
//! - DispatchRegistry: Workflow kind to activity bindings
//! - ActivityExecutor / BillingReporter: The two workflow steps
//! - Orchestrator: Main execution engine

pub mod billing;
pub mod event_store;
pub mod executor;
pub mod orchestrator;
pub mod registry;
pub mod retry;

// Re-export commonly used types
pub use billing::{BillingReporter, DEFAULT_BILLING_TIMEOUT, DEFAULT_METER_NAME};
pub use event_store::{generate_idempotency_key, hash_input, EventStore, InstanceLock};
pub use executor::ActivityExecutor;
pub use orchestrator::{Orchestrator, WorkflowHandle};
pub use registry::{Binding, DispatchRegistry, DEFAULT_ACTIVITY_TIMEOUT};
pub use retry::{RetryDecision, RetryPolicy, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
