//! Event types for the durable workflow history.
//!
//! All state changes of a workflow instance are recorded as immutable
//! events in an append-only log. Replaying them rebuilds the instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, WorkflowError};

/// Name of the step that runs the unit of work
pub const STEP_ACTIVITY: &str = "activity";

/// Name of the step that reports usage to the billing ledger
pub const STEP_BILLING: &str = "billing";

/// A single event in the append-only history of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The workflow instance this event belongs to
    pub instance_id: Uuid,

    /// Step name (`activity` or `billing`), if the event is step-scoped
    pub step_id: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Idempotency key format: "{instance_id}:{step}:{input_hash}"
    pub idempotency_key: String,

    /// Human-readable summary (NO secrets)
    pub payload_summary: String,

    /// Current status of the step/instance
    pub status: StepStatus,

    /// Attempt number (1-indexed) for step events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,

    /// Time taken in milliseconds (for finished attempts)
    pub duration_ms: Option<u64>,

    /// Error class if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Error message if failed
    pub error: Option<String>,

    /// Structured data needed for replay (request, job counts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        instance_id: Uuid,
        step_id: Option<String>,
        event_type: EventType,
        idempotency_key: String,
        payload_summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            instance_id,
            step_id,
            event_type,
            idempotency_key,
            payload_summary,
            status,
            attempt: None,
            duration_ms: None,
            error_kind: None,
            error: None,
            data: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with a plain error message
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    /// Create an event with a classified error
    pub fn with_workflow_error(mut self, error: &WorkflowError) -> Self {
        self.error_kind = Some(error.kind());
        self.error = Some(error.to_string());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Types of events that can occur during workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Instance accepted; data holds kind and request
    WorkflowSubmitted,

    /// Instance reached `Completed` or `CompletedWithBillingAnomaly`
    WorkflowCompleted,

    /// Instance failed terminally
    WorkflowFailed,

    /// Instance cancelled before its activity committed
    WorkflowCancelled,

    /// An activity attempt has started
    ActivityStarted,

    /// An activity attempt failed and will be retried
    ActivityRetrying,

    /// The activity committed; data holds `nb_job_results`
    ActivityCompleted,

    /// The activity failed permanently
    ActivityFailed,

    /// A billing report is about to be sent
    BillingStarted,

    /// A billing attempt failed and will be retried
    BillingRetrying,

    /// The ledger acknowledged the usage report
    BillingReported,

    /// Billing was skipped (no customer identity)
    BillingSkipped,

    /// Billing failed after its own retry budget
    BillingFailed,
}

impl EventType {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowCancelled
        )
    }
}

/// Status of a step or instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    Pending,

    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed (with error)
    Failed,

    /// Skipped (no billing identity, or cancelled)
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(STEP_ACTIVITY.to_string()),
            EventType::ActivityStarted,
            "test-key".to_string(),
            "Starting run_recipe_on_task".to_string(),
            StepStatus::Running,
        )
        .with_attempt(1);

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::ActivityStarted);
        assert_eq!(parsed.status, StepStatus::Running);
        assert_eq!(parsed.attempt, Some(1));
        assert!(!json.contains("error_kind"));
    }

    #[test]
    fn test_event_with_workflow_error() {
        let event = Event::new(
            Uuid::new_v4(),
            Some(STEP_ACTIVITY.to_string()),
            EventType::ActivityFailed,
            "test-key".to_string(),
            "Failed".to_string(),
            StepStatus::Failed,
        )
        .with_duration(1500)
        .with_workflow_error(&WorkflowError::TransientExternal("Connection timeout".to_string()));

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error_kind, Some(ErrorKind::TransientExternal));
        assert_eq!(
            event.error.as_deref(),
            Some("Transient external error: Connection timeout")
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(EventType::WorkflowCompleted.is_terminal());
        assert!(EventType::WorkflowCancelled.is_terminal());
        assert!(!EventType::BillingReported.is_terminal());
        assert!(!EventType::ActivityCompleted.is_terminal());
    }
}
