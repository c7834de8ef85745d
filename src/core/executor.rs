//! Activity executor: one bounded attempt of one unit of work.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::adapters::{Activity, ActivityOutput};
use crate::domain::{ActivityId, WorkflowRequest};
use crate::error::WorkflowError;

/// Runs single activity attempts under a wall-clock bound.
///
/// Holds no per-invocation state; every call is independent.
#[derive(Clone)]
pub struct ActivityExecutor {
    activity: Arc<dyn Activity>,
}

impl ActivityExecutor {
    pub fn new(activity: Arc<dyn Activity>) -> Self {
        Self { activity }
    }

    /// Name of the adapter activities run on
    pub fn adapter_name(&self) -> &str {
        self.activity.name()
    }

    /// Execute one attempt. Exceeding `attempt_timeout` is a transient failure.
    pub async fn execute(
        &self,
        activity: ActivityId,
        request: &WorkflowRequest,
        attempt_timeout: Duration,
    ) -> Result<ActivityOutput, WorkflowError> {
        debug!(%activity, adapter = self.activity.name(), "Executing activity attempt");

        match timeout(attempt_timeout, self.activity.execute(activity, request)).await {
            Ok(result) => result,
            Err(_) => Err(WorkflowError::TransientExternal(format!(
                "{} timed out after {:?}",
                activity, attempt_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::domain::{LogEvent, WorkflowPayload};

    struct SlowActivity;

    #[async_trait]
    impl Activity for SlowActivity {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(
            &self,
            _activity: ActivityId,
            _request: &WorkflowRequest,
        ) -> Result<ActivityOutput, WorkflowError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ActivityOutput::new(1))
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FixedActivity(u64);

    #[async_trait]
    impl Activity for FixedActivity {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn execute(
            &self,
            _activity: ActivityId,
            _request: &WorkflowRequest,
        ) -> Result<ActivityOutput, WorkflowError> {
            Ok(ActivityOutput::new(self.0))
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn request() -> WorkflowRequest {
        WorkflowRequest::new(
            "o1",
            "p1",
            None,
            WorkflowPayload::LogForTasks {
                logs_to_process: vec![LogEvent::new("hi")],
                extra_logs_to_save: vec![],
            },
        )
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let executor = ActivityExecutor::new(Arc::new(SlowActivity));
        let err = executor
            .execute(
                ActivityId::RunProcessLogForTasks,
                &request(),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::TransientExternal(_)));
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let executor = ActivityExecutor::new(Arc::new(FixedActivity(5)));
        let output = executor
            .execute(
                ActivityId::RunProcessLogForTasks,
                &request(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(output.nb_job_results, 5);
        assert_eq!(executor.adapter_name(), "fixed");
    }
}
