//! Typed workflow requests.
//!
//! Every request carries the billing identity (`org_id`, `project_id`,
//! optional `customer_id`) plus a kind-specific payload. Missing identity
//! fields deserialize as empty strings so they surface as a validation
//! failure of the workflow rather than a parse error at submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// A request submitted for one workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default)]
    pub org_id: String,

    #[serde(default)]
    pub project_id: String,

    /// Billing customer; resolved from org metadata when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    #[serde(flatten)]
    pub payload: WorkflowPayload,
}

impl WorkflowRequest {
    pub fn new(
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        customer_id: Option<String>,
        payload: WorkflowPayload,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            project_id: project_id.into(),
            customer_id,
            payload,
        }
    }

    /// Check the request against the schema a binding expects
    pub fn validate(&self, schema: PayloadKind) -> Result<(), WorkflowError> {
        if self.org_id.trim().is_empty() {
            return Err(WorkflowError::Validation("org_id is required".to_string()));
        }
        if self.project_id.trim().is_empty() {
            return Err(WorkflowError::Validation("project_id is required".to_string()));
        }
        if let Some(customer_id) = &self.customer_id {
            if customer_id.trim().is_empty() {
                return Err(WorkflowError::Validation(
                    "customer_id must not be blank when given".to_string(),
                ));
            }
        }

        let actual = self.payload.kind();
        if actual != schema {
            return Err(WorkflowError::Validation(format!(
                "expected a {:?} payload, got {:?}",
                schema, actual
            )));
        }

        self.payload.validate()
    }
}

/// Discriminant of [`WorkflowPayload`], used as the request schema of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Langsmith,
    Langfuse,
    OpenTelemetry,
    RecipeOnTask,
    MainPipelineOnMessages,
    LogsForMessages,
    LogForTasks,
}

/// Kind-specific part of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowPayload {
    Langsmith {
        langsmith_api_key: String,
        langsmith_project_name: String,
        #[serde(default)]
        current_usage: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_usage: Option<u64>,
    },

    Langfuse {
        langfuse_secret_key: String,
        langfuse_public_key: String,
        #[serde(default)]
        current_usage: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_usage: Option<u64>,
    },

    OpenTelemetry {
        open_telemetry_data: serde_json::Value,
    },

    RecipeOnTask {
        recipe_id: String,
        task_ids: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time_range: Option<TimeRange>,
    },

    MainPipelineOnMessages {
        messages: Vec<Message>,
    },

    LogsForMessages {
        logs_to_process: Vec<LogEvent>,
        #[serde(default)]
        extra_logs_to_save: Vec<LogEvent>,
    },

    LogForTasks {
        logs_to_process: Vec<LogEvent>,
        #[serde(default)]
        extra_logs_to_save: Vec<LogEvent>,
    },
}

impl WorkflowPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Langsmith { .. } => PayloadKind::Langsmith,
            Self::Langfuse { .. } => PayloadKind::Langfuse,
            Self::OpenTelemetry { .. } => PayloadKind::OpenTelemetry,
            Self::RecipeOnTask { .. } => PayloadKind::RecipeOnTask,
            Self::MainPipelineOnMessages { .. } => PayloadKind::MainPipelineOnMessages,
            Self::LogsForMessages { .. } => PayloadKind::LogsForMessages,
            Self::LogForTasks { .. } => PayloadKind::LogForTasks,
        }
    }

    fn validate(&self) -> Result<(), WorkflowError> {
        match self {
            Self::Langsmith {
                langsmith_api_key,
                langsmith_project_name,
                ..
            } => {
                require("langsmith_api_key", langsmith_api_key)?;
                require("langsmith_project_name", langsmith_project_name)
            }
            Self::Langfuse {
                langfuse_secret_key,
                langfuse_public_key,
                ..
            } => {
                require("langfuse_secret_key", langfuse_secret_key)?;
                require("langfuse_public_key", langfuse_public_key)
            }
            Self::OpenTelemetry { open_telemetry_data } => {
                if open_telemetry_data.is_null() {
                    return Err(WorkflowError::Validation(
                        "open_telemetry_data is required".to_string(),
                    ));
                }
                Ok(())
            }
            Self::RecipeOnTask {
                recipe_id,
                task_ids,
                time_range,
            } => {
                require("recipe_id", recipe_id)?;
                if task_ids.is_empty() {
                    return Err(WorkflowError::Validation(
                        "task_ids must contain at least one task".to_string(),
                    ));
                }
                if task_ids.iter().any(|id| id.trim().is_empty()) {
                    return Err(WorkflowError::Validation(
                        "task_ids must not contain blank ids".to_string(),
                    ));
                }
                match time_range {
                    Some(range) => range.validate(),
                    None => Ok(()),
                }
            }
            Self::MainPipelineOnMessages { messages } => {
                if messages.is_empty() {
                    return Err(WorkflowError::Validation("messages is empty".to_string()));
                }
                Ok(())
            }
            Self::LogsForMessages {
                logs_to_process, ..
            }
            | Self::LogForTasks {
                logs_to_process, ..
            } => {
                if logs_to_process.is_empty() {
                    return Err(WorkflowError::Validation(
                        "logs_to_process is empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn require(field: &str, value: &str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        return Err(WorkflowError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Inclusive time window used to filter tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    fn validate(&self) -> Result<(), WorkflowError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(WorkflowError::Validation(format!(
                    "time_range start {} is after end {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

/// A chat message handed to the main pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A raw log event sent by a client SDK
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LogEvent {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: None,
            session_id: None,
            task_id: None,
            created_at: None,
            metadata: None,
        }
    }
}
