//! Workflow kinds and the activities they dispatch to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Third-party tracing platforms we can pull data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    Langsmith,
    Langfuse,
}

/// Closed set of workflow kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "connector")]
pub enum WorkflowKind {
    ExtractConnectorData(Connector),
    StoreTelemetryData,
    RunRecipeOnTask,
    RunMainPipelineOnMessages,
    ProcessLogsForMessages,
    ProcessLogForTasks,
}

impl WorkflowKind {
    /// Every declared kind; the registry self-check walks this list
    pub const ALL: [WorkflowKind; 7] = [
        WorkflowKind::ExtractConnectorData(Connector::Langsmith),
        WorkflowKind::ExtractConnectorData(Connector::Langfuse),
        WorkflowKind::StoreTelemetryData,
        WorkflowKind::RunRecipeOnTask,
        WorkflowKind::RunMainPipelineOnMessages,
        WorkflowKind::ProcessLogsForMessages,
        WorkflowKind::ProcessLogForTasks,
    ];

    /// Durable workflow name, stable across releases
    pub fn workflow_name(&self) -> &'static str {
        match self {
            Self::ExtractConnectorData(Connector::Langsmith) => "extract_langsmith_data_workflow",
            Self::ExtractConnectorData(Connector::Langfuse) => "extract_langfuse_data_workflow",
            Self::StoreTelemetryData => "store_open_telemetry_data_workflow",
            Self::RunRecipeOnTask => "run_recipe_on_task_workflow",
            Self::RunMainPipelineOnMessages => "run_main_pipeline_on_messages_workflow",
            Self::ProcessLogsForMessages => "run_process_logs_for_messages_workflow",
            Self::ProcessLogForTasks => "run_process_log_for_tasks_workflow",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.workflow_name())
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    /// Accepts the durable workflow name with or without the `_workflow` suffix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_end_matches("_workflow");
        Self::ALL
            .into_iter()
            .find(|k| k.workflow_name().trim_end_matches("_workflow") == wanted)
            .ok_or_else(|| format!("Unknown workflow kind: {}", s))
    }
}

/// Identity of the unit of work a workflow runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityId {
    ExtractLangsmithData,
    ExtractLangfuseData,
    StoreOpenTelemetryData,
    RunRecipeOnTask,
    RunMainPipelineOnMessages,
    RunProcessLogsForMessages,
    RunProcessLogForTasks,
}

impl ActivityId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtractLangsmithData => "extract_langsmith_data",
            Self::ExtractLangfuseData => "extract_langfuse_data",
            Self::StoreOpenTelemetryData => "store_open_telemetry_data",
            Self::RunRecipeOnTask => "run_recipe_on_task",
            Self::RunMainPipelineOnMessages => "run_main_pipeline_on_messages",
            Self::RunProcessLogsForMessages => "run_process_logs_for_messages",
            Self::RunProcessLogForTasks => "run_process_log_for_tasks",
        }
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
