//! Durable workflow orchestrator.
//!
//! Sequences "run activity" then "report billing" for every workflow
//! instance, recording each transition in the instance's event history.
//! Replaying that history resumes an instance at its next unexecuted step:
//! a committed activity is never re-run, and a settled billing step is
//! never re-sent.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::AlertSink;
use crate::domain::{
    BillingOutcome, Event, EventType, Instance, StepStatus, Submission, WorkflowKind,
    WorkflowOutcome, WorkflowRequest, STEP_ACTIVITY, STEP_BILLING,
};
use crate::error::{ErrorKind, WorkflowError};

use super::billing::BillingReporter;
use super::event_store::{generate_idempotency_key, EventStore};
use super::executor::ActivityExecutor;
use super::registry::{Binding, DispatchRegistry};
use super::retry::RetryDecision;

/// Handle on a submitted workflow instance
pub struct WorkflowHandle {
    instance_id: Uuid,
    kind: WorkflowKind,
    cancel: CancellationToken,
    task: JoinHandle<Result<WorkflowOutcome>>,
}

impl WorkflowHandle {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    /// Request cancellation.
    ///
    /// Honoured before an activity attempt or during a retry backoff. Once
    /// the activity has committed the instance runs billing to completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// How the activity step ended
enum ActivityStep {
    Committed(u64),
    Failed(WorkflowError),
    Cancelled,
}

/// Main workflow orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<DispatchRegistry>,
    executor: ActivityExecutor,
    billing: Arc<BillingReporter>,
    alerts: Option<Arc<dyn AlertSink>>,
    instances_dir: PathBuf,
}

impl Orchestrator {
    /// Create an orchestrator storing instance histories under `instances_dir`.
    ///
    /// Fails if the registry does not bind every workflow kind.
    pub fn new(
        registry: DispatchRegistry,
        executor: ActivityExecutor,
        billing: BillingReporter,
        instances_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        registry
            .self_check()
            .context("Dispatch registry self-check failed")?;

        Ok(Self {
            registry: Arc::new(registry),
            executor,
            billing: Arc::new(billing),
            alerts: None,
            instances_dir: instances_dir.into(),
        })
    }

    /// Notify `alerts` of terminal failures
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Durably accept a workflow instance and start executing it
    #[instrument(skip(self, kind, request), fields(kind = %kind))]
    pub async fn submit(&self, kind: WorkflowKind, request: WorkflowRequest) -> Result<WorkflowHandle> {
        let instance_id = self.record_submission(kind, request).await?;

        let cancel = CancellationToken::new();
        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.drive(instance_id, token).await });

        Ok(WorkflowHandle {
            instance_id,
            kind,
            cancel,
            task,
        })
    }

    /// Durably accept a workflow instance without executing it.
    ///
    /// The instance stays pending until `resume` or `resume_pending` picks
    /// it up, so the caller may exit right away.
    #[instrument(skip(self, kind, request), fields(kind = %kind))]
    pub async fn enqueue(&self, kind: WorkflowKind, request: WorkflowRequest) -> Result<Uuid> {
        self.record_submission(kind, request).await
    }

    async fn record_submission(&self, kind: WorkflowKind, request: WorkflowRequest) -> Result<Uuid> {
        let instance_id = Uuid::new_v4();
        let store = EventStore::open(&self.instances_dir, instance_id).await?;

        let submission = Submission { kind, request };
        let event = Event::new(
            instance_id,
            None,
            EventType::WorkflowSubmitted,
            format!("{}:submit", instance_id),
            format!(
                "Workflow '{}' submitted for org {} project {}",
                kind, submission.request.org_id, submission.request.project_id
            ),
            StepStatus::Pending,
        )
        .with_data(serde_json::to_value(&submission).context("Failed to serialize submission")?);
        store.append(&event).await?;

        info!(%instance_id, "Workflow submitted");
        Ok(instance_id)
    }

    /// Wait for a submitted instance to reach its terminal outcome
    pub async fn await_result(&self, handle: WorkflowHandle) -> Result<WorkflowOutcome> {
        handle
            .task
            .await
            .with_context(|| format!("Workflow task for {} aborted", handle.instance_id))?
    }

    /// Submit and wait
    pub async fn run(&self, kind: WorkflowKind, request: WorkflowRequest) -> Result<WorkflowOutcome> {
        let handle = self.submit(kind, request).await?;
        self.await_result(handle).await
    }

    /// Resume an instance from its history
    #[instrument(skip(self))]
    pub async fn resume(&self, instance_id: Uuid) -> Result<WorkflowOutcome> {
        info!("Resuming workflow instance");
        self.drive(instance_id, CancellationToken::new()).await
    }

    /// Resume every instance that has not reached a terminal outcome
    pub async fn resume_pending(&self) -> Result<Vec<(Uuid, Result<WorkflowOutcome>)>> {
        let mut set = JoinSet::new();

        for instance_id in EventStore::list_instances(&self.instances_dir).await? {
            let instance = match self.status(instance_id).await {
                Ok(instance) => instance,
                Err(e) => {
                    warn!(%instance_id, error = %e, "Skipping unreadable instance");
                    continue;
                }
            };
            if instance.is_finished() {
                continue;
            }

            let this = self.clone();
            set.spawn(async move { (instance_id, this.resume(instance_id).await) });
        }

        let mut resumed = Vec::new();
        while let Some(joined) = set.join_next().await {
            resumed.push(joined.context("Resume task aborted")?);
        }

        info!(count = resumed.len(), "Resumed pending workflow instances");
        Ok(resumed)
    }

    /// Advance one instance to a terminal outcome
    async fn drive(&self, instance_id: Uuid, cancel: CancellationToken) -> Result<WorkflowOutcome> {
        let store = EventStore::open_existing(&self.instances_dir, instance_id).await?;
        let _owner = store.acquire()?;

        let events = store.replay().await?;
        let mut instance = Instance::from_events(&events)
            .with_context(|| format!("No history for workflow instance {}", instance_id))?;

        if let Some(outcome) = instance.outcome.clone() {
            debug!(%instance_id, "Instance already finished");
            return Ok(outcome);
        }

        // A submission that cannot be read back can never run
        let Some(submission) = instance.submission.clone() else {
            let reason = instance
                .submission_error
                .clone()
                .unwrap_or_else(|| "submission could not be read".to_string());
            return self
                .record_failure(&store, &mut instance, ErrorKind::Validation, reason)
                .await;
        };
        let binding = self.registry.resolve(submission.kind)?.clone();
        let request = submission.request;

        // A malformed request never reaches the activity
        if let Err(e) = request.validate(binding.schema) {
            return self.fail(&store, &mut instance, e).await;
        }

        let nb_job_results = if instance.is_activity_committed() {
            let n = instance.nb_job_results.unwrap_or(0);
            info!(%instance_id, nb_job_results = n, "Activity already committed, skipping");
            n
        } else if instance.activity_status == StepStatus::Failed {
            let (kind, reason) = instance.last_error.clone().unwrap_or((
                ErrorKind::TransientExternal,
                "activity failed".to_string(),
            ));
            return self
                .record_failure(&store, &mut instance, kind, reason)
                .await;
        } else {
            match self
                .run_activity(&store, &mut instance, &binding, &request, &cancel)
                .await?
            {
                ActivityStep::Committed(n) => n,
                ActivityStep::Failed(e) => return self.fail(&store, &mut instance, e).await,
                ActivityStep::Cancelled => return self.cancelled(&store, &mut instance).await,
            }
        };

        let anomaly = if !binding.bill {
            None
        } else if instance.is_billing_settled() {
            instance.billing_anomaly.clone()
        } else {
            self.run_billing(&store, &mut instance, &request, nb_job_results)
                .await?
        };

        self.complete(&store, &mut instance, &binding, nb_job_results, anomaly)
            .await
    }

    /// Run the activity step under the binding's retry policy
    async fn run_activity(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        binding: &Binding,
        request: &WorkflowRequest,
        cancel: &CancellationToken,
    ) -> Result<ActivityStep> {
        let request_json = serde_json::to_string(request).context("Failed to serialize request")?;
        let idem_key = generate_idempotency_key(instance.id, STEP_ACTIVITY, &request_json);
        let policy = &binding.retry_policy;
        let mut attempt = instance.activity_attempts;

        // An attempt that started but never reported back counts as a
        // transient failure of that attempt
        if instance.activity_in_flight {
            let e = WorkflowError::TransientExternal(format!(
                "attempt {} was interrupted before reporting a result",
                attempt
            ));
            match policy.decide(attempt, &e) {
                RetryDecision::Retry { .. } => {
                    self.record_activity_retry(store, instance, binding, &idem_key, attempt, &e, 0)
                        .await?;
                }
                RetryDecision::GiveUp { reason } => {
                    self.record_activity_failure(store, instance, binding, &idem_key, attempt, &e, &reason, 0)
                        .await?;
                    return Ok(ActivityStep::Failed(e));
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(ActivityStep::Cancelled);
            }

            attempt += 1;
            let attempt_start = Instant::now();

            let start_event = Event::new(
                instance.id,
                Some(STEP_ACTIVITY.to_string()),
                EventType::ActivityStarted,
                idem_key.clone(),
                format!("Activity '{}' attempt {}", binding.activity, attempt),
                StepStatus::Running,
            )
            .with_attempt(attempt);
            store.append(&start_event).await?;
            instance.apply_event(&start_event);

            info!(
                instance_id = %instance.id,
                activity = %binding.activity,
                adapter = self.executor.adapter_name(),
                attempt,
                "Activity started"
            );

            let result = self
                .executor
                .execute(binding.activity, request, binding.timeout)
                .await;

            let duration_ms = attempt_start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    let complete_event = Event::new(
                        instance.id,
                        Some(STEP_ACTIVITY.to_string()),
                        EventType::ActivityCompleted,
                        idem_key,
                        format!(
                            "Activity '{}' completed in {}ms with {} job result(s)",
                            binding.activity, duration_ms, output.nb_job_results
                        ),
                        StepStatus::Completed,
                    )
                    .with_attempt(attempt)
                    .with_duration(duration_ms)
                    .with_data(serde_json::json!({ "nb_job_results": output.nb_job_results }));
                    store.append(&complete_event).await?;
                    instance.apply_event(&complete_event);

                    info!(
                        instance_id = %instance.id,
                        activity = %binding.activity,
                        attempt,
                        nb_job_results = output.nb_job_results,
                        duration_ms,
                        "Activity completed"
                    );

                    return Ok(ActivityStep::Committed(output.nb_job_results));
                }
                Err(e) => match policy.decide(attempt, &e) {
                    RetryDecision::Retry { after } => {
                        self.record_activity_retry(
                            store,
                            instance,
                            binding,
                            &idem_key,
                            attempt,
                            &e,
                            duration_ms,
                        )
                        .await?;

                        warn!(
                            instance_id = %instance.id,
                            activity = %binding.activity,
                            attempt,
                            delay_ms = after.as_millis() as u64,
                            error = %e,
                            "Activity failed, retrying"
                        );

                        tokio::select! {
                            _ = tokio::time::sleep(after) => {}
                            _ = cancel.cancelled() => return Ok(ActivityStep::Cancelled),
                        }
                    }
                    RetryDecision::GiveUp { reason } => {
                        self.record_activity_failure(
                            store,
                            instance,
                            binding,
                            &idem_key,
                            attempt,
                            &e,
                            &reason,
                            duration_ms,
                        )
                        .await?;
                        return Ok(ActivityStep::Failed(e));
                    }
                },
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_activity_retry(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        binding: &Binding,
        idem_key: &str,
        attempt: u32,
        error: &WorkflowError,
        duration_ms: u64,
    ) -> Result<()> {
        let retry_event = Event::new(
            instance.id,
            Some(STEP_ACTIVITY.to_string()),
            EventType::ActivityRetrying,
            format!("{}:retry:{}", idem_key, attempt),
            format!(
                "Activity '{}' attempt {} failed, retrying",
                binding.activity, attempt
            ),
            StepStatus::Running,
        )
        .with_attempt(attempt)
        .with_duration(duration_ms)
        .with_workflow_error(error);
        store.append(&retry_event).await?;
        instance.apply_event(&retry_event);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_activity_failure(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        binding: &Binding,
        idem_key: &str,
        attempt: u32,
        error: &WorkflowError,
        reason: &str,
        duration_ms: u64,
    ) -> Result<()> {
        let fail_event = Event::new(
            instance.id,
            Some(STEP_ACTIVITY.to_string()),
            EventType::ActivityFailed,
            idem_key.to_string(),
            format!(
                "Activity '{}' failed after {} attempt(s): {}",
                binding.activity, attempt, reason
            ),
            StepStatus::Failed,
        )
        .with_attempt(attempt)
        .with_duration(duration_ms)
        .with_workflow_error(error);
        store.append(&fail_event).await?;
        instance.apply_event(&fail_event);

        error!(
            instance_id = %instance.id,
            activity = %binding.activity,
            attempt,
            error = %error,
            "Activity failed permanently"
        );
        Ok(())
    }

    /// Report usage for a committed activity.
    ///
    /// Returns the anomaly if billing did not go through. Billing errors are
    /// recorded and logged but never fail the workflow.
    async fn run_billing(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        request: &WorkflowRequest,
        nb_job_results: u64,
    ) -> Result<Option<String>> {
        let idem_key = generate_idempotency_key(
            instance.id,
            STEP_BILLING,
            &nb_job_results.to_string(),
        );
        let event = self.billing.event_for(
            &request.org_id,
            request.customer_id.as_deref(),
            nb_job_results,
        );
        let policy = self.billing.retry_policy();

        // An interrupted report is re-sent under the same identifier and
        // attempt number
        let mut attempt = if instance.billing_in_flight {
            instance.billing_attempts.saturating_sub(1)
        } else {
            instance.billing_attempts
        };

        loop {
            attempt += 1;

            let start_event = Event::new(
                instance.id,
                Some(STEP_BILLING.to_string()),
                EventType::BillingStarted,
                idem_key.clone(),
                format!(
                    "Reporting {} unit(s) on meter '{}' for org {}",
                    nb_job_results, event.meter_name, event.org_id
                ),
                StepStatus::Running,
            )
            .with_attempt(attempt);
            store.append(&start_event).await?;
            instance.apply_event(&start_event);

            match self.billing.report(&event, &idem_key).await {
                Ok(BillingOutcome::Ack { customer_id }) => {
                    let reported = Event::new(
                        instance.id,
                        Some(STEP_BILLING.to_string()),
                        EventType::BillingReported,
                        idem_key,
                        format!(
                            "Reported {} unit(s) for customer {}",
                            nb_job_results, customer_id
                        ),
                        StepStatus::Completed,
                    )
                    .with_attempt(attempt)
                    .with_data(serde_json::json!({
                        "customer_id": customer_id,
                        "nb_units": nb_job_results,
                    }));
                    store.append(&reported).await?;
                    instance.apply_event(&reported);
                    return Ok(None);
                }
                Ok(BillingOutcome::Skipped { reason }) => {
                    let skipped = Event::new(
                        instance.id,
                        Some(STEP_BILLING.to_string()),
                        EventType::BillingSkipped,
                        idem_key,
                        format!("Billing skipped for org {}", event.org_id),
                        StepStatus::Skipped,
                    )
                    .with_attempt(attempt)
                    .with_error(reason.clone());
                    store.append(&skipped).await?;
                    instance.apply_event(&skipped);
                    return Ok(Some(reason));
                }
                Err(e) => match policy.decide(attempt, &e) {
                    RetryDecision::Retry { after } => {
                        let retry_event = Event::new(
                            instance.id,
                            Some(STEP_BILLING.to_string()),
                            EventType::BillingRetrying,
                            format!("{}:retry:{}", idem_key, attempt),
                            format!("Billing attempt {} failed, retrying", attempt),
                            StepStatus::Running,
                        )
                        .with_attempt(attempt)
                        .with_workflow_error(&e);
                        store.append(&retry_event).await?;
                        instance.apply_event(&retry_event);

                        warn!(
                            instance_id = %instance.id,
                            attempt,
                            delay_ms = after.as_millis() as u64,
                            error = %e,
                            "Billing failed, retrying"
                        );

                        tokio::time::sleep(after).await;
                    }
                    RetryDecision::GiveUp { reason } => {
                        let failed = Event::new(
                            instance.id,
                            Some(STEP_BILLING.to_string()),
                            EventType::BillingFailed,
                            idem_key,
                            format!("Billing failed after {} attempt(s)", attempt),
                            StepStatus::Failed,
                        )
                        .with_attempt(attempt)
                        .with_workflow_error(&e);
                        store.append(&failed).await?;
                        instance.apply_event(&failed);

                        error!(
                            instance_id = %instance.id,
                            org_id = %event.org_id,
                            nb_units = nb_job_results,
                            error = %e,
                            "Billing failed; activity result kept"
                        );
                        return Ok(Some(reason));
                    }
                },
            }
        }
    }

    /// Fail an instance with a classified error
    async fn fail(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        error: WorkflowError,
    ) -> Result<WorkflowOutcome> {
        self.record_failure(store, instance, error.kind(), error.to_string())
            .await
    }

    async fn record_failure(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        kind: ErrorKind,
        reason: String,
    ) -> Result<WorkflowOutcome> {
        let workflow = instance
            .kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        error!(instance_id = %instance.id, %workflow, %kind, %reason, "Workflow failed");

        let outcome = WorkflowOutcome::Failed {
            kind,
            reason: reason.clone(),
        };

        let mut event = Event::new(
            instance.id,
            None,
            EventType::WorkflowFailed,
            format!("{}:complete", instance.id),
            format!("Workflow '{}' failed: {}", workflow, reason),
            StepStatus::Failed,
        )
        .with_error(reason.clone())
        .with_data(serde_json::to_value(&outcome).context("Failed to serialize outcome")?);
        event.error_kind = Some(kind);
        store.append(&event).await?;
        instance.apply_event(&event);

        if let Some(alerts) = &self.alerts {
            let message = format!(
                "Workflow {} ({}) failed for org {}: {}",
                workflow,
                instance.id,
                instance
                    .submission
                    .as_ref()
                    .map(|s| s.request.org_id.as_str())
                    .unwrap_or("unknown"),
                reason
            );
            if let Err(e) = alerts.notify(&message).await {
                warn!(instance_id = %instance.id, error = %e, "Failed to deliver failure alert");
            }
        }

        Ok(outcome)
    }

    async fn cancelled(&self, store: &EventStore, instance: &mut Instance) -> Result<WorkflowOutcome> {
        info!(instance_id = %instance.id, "Workflow cancelled");

        let event = Event::new(
            instance.id,
            None,
            EventType::WorkflowCancelled,
            format!("{}:complete", instance.id),
            "Workflow cancelled before its activity committed".to_string(),
            StepStatus::Skipped,
        );
        store.append(&event).await?;
        instance.apply_event(&event);

        Ok(WorkflowOutcome::Cancelled)
    }

    /// Complete a successful instance
    async fn complete(
        &self,
        store: &EventStore,
        instance: &mut Instance,
        binding: &Binding,
        nb_job_results: u64,
        anomaly: Option<String>,
    ) -> Result<WorkflowOutcome> {
        let outcome = match anomaly {
            Some(reason) => {
                warn!(instance_id = %instance.id, %reason, "Workflow completed with billing anomaly");
                WorkflowOutcome::CompletedWithBillingAnomaly {
                    nb_job_results,
                    reason,
                }
            }
            None => {
                info!(instance_id = %instance.id, nb_job_results, "Workflow completed successfully");
                WorkflowOutcome::Completed { nb_job_results }
            }
        };

        let event = Event::new(
            instance.id,
            None,
            EventType::WorkflowCompleted,
            format!("{}:complete", instance.id),
            format!("Workflow '{}' completed", binding.kind),
            StepStatus::Completed,
        )
        .with_data(serde_json::to_value(&outcome).context("Failed to serialize outcome")?);
        store.append(&event).await?;
        instance.apply_event(&event);

        Ok(outcome)
    }

    /// Get status of an instance by ID
    pub async fn status(&self, instance_id: Uuid) -> Result<Instance> {
        let store = EventStore::open_existing(&self.instances_dir, instance_id).await?;
        let events = store.replay().await?;

        Instance::from_events(&events)
            .with_context(|| format!("Workflow instance {} not found", instance_id))
    }

    /// List recent instances, most recent first
    pub async fn list_instances(&self, limit: usize) -> Result<Vec<Instance>> {
        let ids = EventStore::list_instances(&self.instances_dir).await?;
        let mut instances = Vec::new();

        for instance_id in ids {
            if let Ok(instance) = self.status(instance_id).await {
                instances.push(instance);
            }
        }

        instances.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        instances.truncate(limit);

        Ok(instances)
    }
}
