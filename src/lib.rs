//! extractor-workflows - Durable, billed workflow orchestration
//!
//! Runs the analytics activities of the log extraction service as durable
//! workflows and reports the resulting usage to the billing meter.
//!
//! # Architecture
//!
//! Every workflow instance is event-sourced:
//! - Each step transition is recorded as an immutable event
//! - Instance state is derived by replaying events
//! - An interrupted instance resumes at its next unexecuted step, so a
//!   committed activity is never re-run and billing is never sent twice
//!
//! # Modules
//!
//! - `adapters`: External systems (extractor service, Stripe, org directory, Slack)
//! - `core`: Orchestration logic (EventStore, RetryPolicy, DispatchRegistry, Orchestrator)
//! - `domain`: Data structures (WorkflowKind, WorkflowRequest, Event, Instance)
//! - `error`: Error taxonomy shared by every step
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a workflow and wait for it
//! extractor-workflows submit --kind run_recipe_on_task --payload recipe.json \
//!     --org-id o1 --project-id p1
//!
//! # Check instance status
//! extractor-workflows status <instance-id>
//!
//! # Resume every interrupted instance
//! extractor-workflows worker
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, WorkflowHandle};
pub use domain::{Event, EventType, Instance, WorkflowKind, WorkflowOutcome, WorkflowRequest};
pub use error::{ErrorKind, WorkflowError};
