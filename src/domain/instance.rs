//! Workflow instance state and reconstruction from history.
//!
//! An Instance represents a single execution of a workflow kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StepStatus};
use super::kind::WorkflowKind;
use super::request::WorkflowRequest;
use crate::error::ErrorKind;

/// What the submitter of a workflow eventually observes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum WorkflowOutcome {
    /// Activity succeeded and billing (if any) was acknowledged
    Completed { nb_job_results: u64 },

    /// Activity succeeded but billing was skipped or failed
    CompletedWithBillingAnomaly { nb_job_results: u64, reason: String },

    /// Activity never succeeded
    Failed { kind: ErrorKind, reason: String },

    /// Cancelled before the activity committed
    Cancelled,
}

impl WorkflowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::CompletedWithBillingAnomaly { .. }
        )
    }
}

/// Submission record stored in the `WorkflowSubmitted` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub kind: WorkflowKind,
    pub request: WorkflowRequest,
}

/// A workflow instance, as rebuilt from its history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Unique identifier for this instance
    pub id: Uuid,

    /// Kind and request, once the submission has been replayed
    pub submission: Option<Submission>,

    /// Why the recorded submission could not be read back
    pub submission_error: Option<String>,

    /// When the instance was submitted
    pub submitted_at: DateTime<Utc>,

    /// When the instance reached a terminal outcome
    pub completed_at: Option<DateTime<Utc>>,

    pub activity_status: StepStatus,

    /// Number of activity attempts started so far
    pub activity_attempts: u32,

    /// The last activity attempt started but never reported back
    pub activity_in_flight: bool,

    /// Billable units recorded when the activity committed
    pub nb_job_results: Option<u64>,

    pub billing_status: StepStatus,

    /// Number of billing attempts started so far
    pub billing_attempts: u32,

    /// The last billing attempt started but never reported back
    pub billing_in_flight: bool,

    /// Why billing did not go through, if it didn't
    pub billing_anomaly: Option<String>,

    /// Last classified activity error
    pub last_error: Option<(ErrorKind, String)>,

    /// Terminal outcome, if reached
    pub outcome: Option<WorkflowOutcome>,
}

impl Instance {
    /// Reconstruct instance state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut instance = Self {
            id: first_event.instance_id,
            submission: None,
            submission_error: None,
            submitted_at: first_event.timestamp,
            completed_at: None,
            activity_status: StepStatus::Pending,
            activity_attempts: 0,
            activity_in_flight: false,
            nb_job_results: None,
            billing_status: StepStatus::Pending,
            billing_attempts: 0,
            billing_in_flight: false,
            billing_anomaly: None,
            last_error: None,
            outcome: None,
        };

        for event in events {
            instance.apply_event(event);
        }

        Some(instance)
    }

    /// Apply a single event to update instance state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::WorkflowSubmitted => {
                self.submitted_at = event.timestamp;
                match event.data.clone().map(serde_json::from_value::<Submission>) {
                    Some(Ok(submission)) => {
                        self.submission = Some(submission);
                        self.submission_error = None;
                    }
                    Some(Err(e)) => {
                        self.submission = None;
                        self.submission_error = Some(format!("unreadable submission: {}", e));
                    }
                    None => {
                        self.submission = None;
                        self.submission_error = Some("submission has no data".to_string());
                    }
                }
            }
            EventType::ActivityStarted => {
                self.activity_status = StepStatus::Running;
                self.activity_in_flight = true;
                self.activity_attempts = self
                    .activity_attempts
                    .max(event.attempt.unwrap_or(self.activity_attempts + 1));
            }
            EventType::ActivityRetrying => {
                self.activity_status = StepStatus::Running;
                self.activity_in_flight = false;
                self.last_error = error_of(event);
            }
            EventType::ActivityCompleted => {
                self.activity_status = StepStatus::Completed;
                self.activity_in_flight = false;
                self.nb_job_results = Some(
                    event
                        .data
                        .as_ref()
                        .and_then(|d| d.get("nb_job_results"))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                );
            }
            EventType::ActivityFailed => {
                self.activity_status = StepStatus::Failed;
                self.activity_in_flight = false;
                self.last_error = error_of(event);
            }
            EventType::BillingStarted => {
                self.billing_status = StepStatus::Running;
                self.billing_in_flight = true;
                self.billing_attempts = self
                    .billing_attempts
                    .max(event.attempt.unwrap_or(self.billing_attempts + 1));
            }
            EventType::BillingRetrying => {
                self.billing_in_flight = false;
            }
            EventType::BillingReported => {
                self.billing_status = StepStatus::Completed;
                self.billing_in_flight = false;
            }
            EventType::BillingSkipped => {
                self.billing_status = StepStatus::Skipped;
                self.billing_in_flight = false;
                self.billing_anomaly = Some(
                    event
                        .error
                        .clone()
                        .unwrap_or_else(|| event.payload_summary.clone()),
                );
            }
            EventType::BillingFailed => {
                self.billing_status = StepStatus::Failed;
                self.billing_in_flight = false;
                self.billing_anomaly = Some(event.error.clone().unwrap_or_default());
            }
            EventType::WorkflowCompleted | EventType::WorkflowFailed => {
                self.outcome = event
                    .data
                    .clone()
                    .and_then(|d| serde_json::from_value(d).ok());
            }
            EventType::WorkflowCancelled => {
                self.outcome = Some(WorkflowOutcome::Cancelled);
            }
        }

        if event.event_type.is_terminal() {
            self.completed_at = Some(event.timestamp);
        }
    }

    pub fn kind(&self) -> Option<WorkflowKind> {
        self.submission.as_ref().map(|s| s.kind)
    }

    /// The activity step has committed
    pub fn is_activity_committed(&self) -> bool {
        self.activity_status == StepStatus::Completed
    }

    /// The billing step reached a recorded end (reported, skipped or failed)
    pub fn is_billing_settled(&self) -> bool {
        matches!(
            self.billing_status,
            StepStatus::Completed | StepStatus::Skipped | StepStatus::Failed
        )
    }

    /// Check if the instance has reached a terminal outcome
    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}

fn error_of(event: &Event) -> Option<(ErrorKind, String)> {
    let kind = event.error_kind?;
    Some((kind, event.error.clone().unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{STEP_ACTIVITY, STEP_BILLING};
    use crate::domain::request::{LogEvent, WorkflowPayload};

    fn submitted(instance_id: Uuid) -> Event {
        let submission = Submission {
            kind: WorkflowKind::ProcessLogForTasks,
            request: WorkflowRequest::new(
                "o1",
                "p1",
                None,
                WorkflowPayload::LogForTasks {
                    logs_to_process: vec![LogEvent::new("hello")],
                    extra_logs_to_save: vec![],
                },
            ),
        };
        Event::new(
            instance_id,
            None,
            EventType::WorkflowSubmitted,
            format!("{}:submit", instance_id),
            "submitted".to_string(),
            StepStatus::Pending,
        )
        .with_data(serde_json::to_value(submission).unwrap())
    }

    #[test]
    fn test_instance_from_events() {
        let id = Uuid::new_v4();
        let outcome = WorkflowOutcome::Completed { nb_job_results: 3 };

        let events = vec![
            submitted(id),
            Event::new(
                id,
                Some(STEP_ACTIVITY.to_string()),
                EventType::ActivityStarted,
                format!("{}:activity:abc", id),
                "attempt 1".to_string(),
                StepStatus::Running,
            )
            .with_attempt(1),
            Event::new(
                id,
                Some(STEP_ACTIVITY.to_string()),
                EventType::ActivityCompleted,
                format!("{}:activity:abc", id),
                "done".to_string(),
                StepStatus::Completed,
            )
            .with_data(serde_json::json!({ "nb_job_results": 3 })),
            Event::new(
                id,
                Some(STEP_BILLING.to_string()),
                EventType::BillingReported,
                format!("{}:billing:def", id),
                "billed".to_string(),
                StepStatus::Completed,
            ),
            Event::new(
                id,
                None,
                EventType::WorkflowCompleted,
                format!("{}:complete", id),
                "completed".to_string(),
                StepStatus::Completed,
            )
            .with_data(serde_json::to_value(&outcome).unwrap()),
        ];

        let instance = Instance::from_events(&events).unwrap();

        assert_eq!(instance.id, id);
        assert_eq!(instance.kind(), Some(WorkflowKind::ProcessLogForTasks));
        assert_eq!(instance.activity_attempts, 1);
        assert_eq!(instance.nb_job_results, Some(3));
        assert!(instance.is_activity_committed());
        assert!(instance.is_billing_settled());
        assert_eq!(instance.outcome, Some(outcome));
    }

    #[test]
    fn test_activity_committed_billing_pending() {
        let id = Uuid::new_v4();
        let events = vec![
            submitted(id),
            Event::new(
                id,
                Some(STEP_ACTIVITY.to_string()),
                EventType::ActivityCompleted,
                format!("{}:activity:abc", id),
                "done".to_string(),
                StepStatus::Completed,
            )
            .with_data(serde_json::json!({ "nb_job_results": 7 })),
            Event::new(
                id,
                Some(STEP_BILLING.to_string()),
                EventType::BillingStarted,
                format!("{}:billing:def", id),
                "billing".to_string(),
                StepStatus::Running,
            )
            .with_attempt(1),
        ];

        let instance = Instance::from_events(&events).unwrap();
        assert!(instance.is_activity_committed());
        assert!(!instance.is_billing_settled());
        assert_eq!(instance.billing_attempts, 1);
        assert!(instance.billing_in_flight);
        assert!(!instance.activity_in_flight);
        assert!(!instance.is_finished());
    }

    #[test]
    fn test_unreadable_submission_is_reported() {
        let id = Uuid::new_v4();
        let event = Event::new(
            id,
            None,
            EventType::WorkflowSubmitted,
            format!("{}:submit", id),
            "submitted".to_string(),
            StepStatus::Pending,
        )
        .with_data(serde_json::json!({ "kind": "not_a_workflow", "request": {} }));

        let instance = Instance::from_events(&[event]).unwrap();
        assert!(instance.submission.is_none());
        assert!(instance
            .submission_error
            .as_deref()
            .unwrap()
            .starts_with("unreadable submission"));
        assert!(!instance.is_finished());

        let bare = Event::new(
            id,
            None,
            EventType::WorkflowSubmitted,
            format!("{}:submit", id),
            "submitted".to_string(),
            StepStatus::Pending,
        );
        let instance = Instance::from_events(&[bare]).unwrap();
        assert_eq!(
            instance.submission_error.as_deref(),
            Some("submission has no data")
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = WorkflowOutcome::Failed {
            kind: ErrorKind::Validation,
            reason: "org_id is required".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains(r#""status":"failed""#));
        assert!(!outcome.is_success());
    }
}
