//! Dispatch registry: workflow kind -> binding.
//!
//! Built once at startup and read-only afterwards. Every declared
//! [`WorkflowKind`] must have a binding; `self_check` enforces it before
//! any instance is accepted.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::domain::{ActivityId, Connector, PayloadKind, WorkflowKind};
use crate::error::WorkflowError;

use super::retry::RetryPolicy;

/// Default per-attempt bound for heavy pipeline activities (15 min)
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Everything the orchestrator needs to run one workflow kind
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub kind: WorkflowKind,

    /// Unit of work to execute
    pub activity: ActivityId,

    /// Payload shape the request must have
    pub schema: PayloadKind,

    /// Whether completion is reported to the billing ledger
    pub bill: bool,

    /// Attempt budget of the activity step (first try included)
    pub max_retries: u32,

    /// Per-attempt wall-clock bound
    pub timeout: Duration,

    /// Retry behaviour of the activity step
    pub retry_policy: RetryPolicy,
}

/// Static mapping from workflow kind to binding
#[derive(Debug, Clone, Default)]
pub struct DispatchRegistry {
    bindings: HashMap<WorkflowKind, Binding>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production table, using `timeout` per activity attempt and
    /// `max_backoff` as the retry delay cap
    pub fn standard(timeout: Duration, max_backoff: Duration) -> Result<Self, WorkflowError> {
        let mut registry = Self::new();

        registry.register(
            WorkflowKind::ExtractConnectorData(Connector::Langsmith),
            ActivityId::ExtractLangsmithData,
            PayloadKind::Langsmith,
            true,
            1,
        )?;
        registry.register(
            WorkflowKind::ExtractConnectorData(Connector::Langfuse),
            ActivityId::ExtractLangfuseData,
            PayloadKind::Langfuse,
            true,
            1,
        )?;
        registry.register(
            WorkflowKind::StoreTelemetryData,
            ActivityId::StoreOpenTelemetryData,
            PayloadKind::OpenTelemetry,
            false,
            1,
        )?;
        registry.register(
            WorkflowKind::RunRecipeOnTask,
            ActivityId::RunRecipeOnTask,
            PayloadKind::RecipeOnTask,
            true,
            1,
        )?;
        registry.register(
            WorkflowKind::RunMainPipelineOnMessages,
            ActivityId::RunMainPipelineOnMessages,
            PayloadKind::MainPipelineOnMessages,
            true,
            1,
        )?;
        registry.register(
            WorkflowKind::ProcessLogsForMessages,
            ActivityId::RunProcessLogsForMessages,
            PayloadKind::LogsForMessages,
            true,
            1,
        )?;
        registry.register(
            WorkflowKind::ProcessLogForTasks,
            ActivityId::RunProcessLogForTasks,
            PayloadKind::LogForTasks,
            true,
            2,
        )?;

        for binding in registry.bindings.values_mut() {
            binding.timeout = timeout;
            binding.retry_policy = binding
                .retry_policy
                .clone()
                .with_backoff(binding.retry_policy.initial_backoff, max_backoff);
        }

        registry.self_check()?;
        Ok(registry)
    }

    /// Bind a kind. Registering the same kind twice is a configuration error.
    pub fn register(
        &mut self,
        kind: WorkflowKind,
        activity: ActivityId,
        schema: PayloadKind,
        bill: bool,
        max_retries: u32,
    ) -> Result<(), WorkflowError> {
        if self.bindings.contains_key(&kind) {
            return Err(WorkflowError::Configuration(format!(
                "workflow kind {} registered twice",
                kind
            )));
        }
        if max_retries == 0 {
            return Err(WorkflowError::Configuration(format!(
                "workflow kind {} needs at least one attempt",
                kind
            )));
        }

        debug!(%kind, %activity, bill, max_retries, "Registered workflow binding");

        self.bindings.insert(
            kind,
            Binding {
                kind,
                activity,
                schema,
                bill,
                max_retries,
                timeout: DEFAULT_ACTIVITY_TIMEOUT,
                retry_policy: RetryPolicy::with_max_attempts(max_retries),
            },
        );
        Ok(())
    }

    /// Replace the retry policy of a bound kind (its attempt budget included)
    pub fn set_retry_policy(
        &mut self,
        kind: WorkflowKind,
        policy: RetryPolicy,
    ) -> Result<(), WorkflowError> {
        let binding = self.bindings.get_mut(&kind).ok_or_else(|| unbound(kind))?;
        binding.max_retries = policy.max_attempts;
        binding.retry_policy = policy;
        Ok(())
    }

    pub fn resolve(&self, kind: WorkflowKind) -> Result<&Binding, WorkflowError> {
        self.bindings.get(&kind).ok_or_else(|| unbound(kind))
    }

    /// Verify every declared kind has a binding
    pub fn self_check(&self) -> Result<(), WorkflowError> {
        let missing: Vec<String> = WorkflowKind::ALL
            .iter()
            .filter(|k| !self.bindings.contains_key(k))
            .map(|k| k.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(WorkflowError::Configuration(format!(
                "no binding for workflow kind(s): {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// All bindings, in declaration order of [`WorkflowKind::ALL`]
    pub fn bindings(&self) -> Vec<&Binding> {
        WorkflowKind::ALL
            .iter()
            .filter_map(|k| self.bindings.get(k))
            .collect()
    }
}

fn unbound(kind: WorkflowKind) -> WorkflowError {
    WorkflowError::Configuration(format!("no binding for workflow kind {}", kind))
}
