//! Domain types for the workflow orchestrator.
//!
//! This module contains the core data structures:
//! - Kinds: The closed set of workflows and activities
//! - Requests: Typed submissions with their billing identity
//! - Events: Immutable records of state changes
//! - Instance: Workflow execution state and outcome
//! - Billing: Usage reports

pub mod billing;
pub mod events;
pub mod instance;
pub mod kind;
pub mod request;

// Re-export commonly used types
pub use billing::{BillingEvent, BillingOutcome};
pub use events::{Event, EventType, StepStatus, STEP_ACTIVITY, STEP_BILLING};
pub use instance::{Instance, Submission, WorkflowOutcome};
pub use kind::{ActivityId, Connector, WorkflowKind};
pub use request::{LogEvent, Message, PayloadKind, TimeRange, WorkflowPayload, WorkflowRequest};
