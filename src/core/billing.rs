//! Billing reporter: usage of completed work to the metering ledger.
//!
//! Reports are keyed by an idempotency identifier derived from the instance
//! and step, so a replayed billing step does not count twice on the ledger.
//! Missing customer identity fails open: the report is skipped and logged
//! as an anomaly instead of blocking the workflow.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::adapters::{CustomerDirectory, MeterClient};
use crate::domain::{BillingEvent, BillingOutcome};
use crate::error::WorkflowError;

use super::retry::RetryPolicy;

/// Meter that usage is reported on unless configured otherwise
pub const DEFAULT_METER_NAME: &str = "phospho_usage_based_meter";

/// Default per-attempt bound for a billing report (1 min)
pub const DEFAULT_BILLING_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends usage reports for completed activities
pub struct BillingReporter {
    meter: Arc<dyn MeterClient>,
    directory: Option<Arc<dyn CustomerDirectory>>,
    meter_name: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl BillingReporter {
    pub fn new(meter: Arc<dyn MeterClient>) -> Self {
        Self {
            meter,
            directory: None,
            meter_name: DEFAULT_METER_NAME.to_string(),
            timeout: DEFAULT_BILLING_TIMEOUT,
            retry_policy: RetryPolicy::with_max_attempts(3),
        }
    }

    /// Resolve missing customer ids through `directory`
    pub fn with_directory(mut self, directory: Arc<dyn CustomerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_meter_name(mut self, meter_name: impl Into<String>) -> Self {
        self.meter_name = meter_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Retry budget of the billing step
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Build the billing event for a completed unit of work
    pub fn event_for(&self, org_id: &str, customer_id: Option<&str>, nb_units: u64) -> BillingEvent {
        BillingEvent {
            org_id: org_id.to_string(),
            customer_id: customer_id.map(str::to_string),
            nb_units,
            meter_name: self.meter_name.clone(),
        }
    }

    /// Report one billing event, attempt-bounded by the billing timeout.
    ///
    /// Errors are only returned for the meter call itself; identity problems
    /// come back as [`BillingOutcome::Skipped`].
    pub async fn report(
        &self,
        event: &BillingEvent,
        idempotency_key: &str,
    ) -> Result<BillingOutcome, WorkflowError> {
        let customer_id = match self.resolve_customer(event).await {
            Ok(Some(customer_id)) => customer_id,
            Ok(None) => {
                let reason = format!("Organization {} has no billing customer id", event.org_id);
                error!(org_id = %event.org_id, nb_units = event.nb_units, "{}", reason);
                return Ok(BillingOutcome::Skipped { reason });
            }
            Err(e) => {
                let reason = format!(
                    "Customer lookup for organization {} failed: {}",
                    event.org_id,
                    e.message()
                );
                error!(org_id = %event.org_id, nb_units = event.nb_units, error = %e, "Skipping billing");
                return Ok(BillingOutcome::Skipped { reason });
            }
        };

        let record = self.meter.record(
            &event.meter_name,
            &customer_id,
            event.nb_units,
            idempotency_key,
        );

        match timeout(self.timeout, record).await {
            Ok(Ok(())) => {
                info!(
                    org_id = %event.org_id,
                    customer_id = %customer_id,
                    nb_units = event.nb_units,
                    meter = %event.meter_name,
                    "Usage reported"
                );
                Ok(BillingOutcome::Ack { customer_id })
            }
            Ok(Err(e)) => {
                warn!(org_id = %event.org_id, error = %e, "Usage report failed");
                Err(e)
            }
            Err(_) => Err(WorkflowError::TransientExternal(format!(
                "billing report timed out after {:?}",
                self.timeout
            ))),
        }
    }

    async fn resolve_customer(&self, event: &BillingEvent) -> Result<Option<String>, WorkflowError> {
        if let Some(customer_id) = &event.customer_id {
            return Ok(Some(customer_id.clone()));
        }

        match &self.directory {
            Some(directory) => match timeout(self.timeout, directory.customer_id(&event.org_id)).await {
                Ok(result) => result,
                Err(_) => Err(WorkflowError::BillingLookup(format!(
                    "org lookup timed out after {:?}",
                    self.timeout
                ))),
            },
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingMeter {
        calls: Mutex<Vec<(String, String, u64, String)>>,
    }

    #[async_trait]
    impl MeterClient for RecordingMeter {
        async fn record(
            &self,
            meter_name: &str,
            customer_id: &str,
            value: u64,
            identifier: &str,
        ) -> Result<(), WorkflowError> {
            self.calls.lock().unwrap().push((
                meter_name.to_string(),
                customer_id.to_string(),
                value,
                identifier.to_string(),
            ));
            Ok(())
        }
    }

    struct FixedDirectory(Result<Option<String>, WorkflowError>);

    #[async_trait]
    impl CustomerDirectory for FixedDirectory {
        async fn customer_id(&self, _org_id: &str) -> Result<Option<String>, WorkflowError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_report_with_known_customer() {
        let meter = Arc::new(RecordingMeter::default());
        let reporter = BillingReporter::new(meter.clone());

        let event = reporter.event_for("o1", Some("c1"), 2);
        let outcome = reporter.report(&event, "key-1").await.unwrap();

        assert_eq!(
            outcome,
            BillingOutcome::Ack {
                customer_id: "c1".to_string()
            }
        );
        let calls = meter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (
                DEFAULT_METER_NAME.to_string(),
                "c1".to_string(),
                2,
                "key-1".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_customer_resolved_from_directory() {
        let meter = Arc::new(RecordingMeter::default());
        let reporter = BillingReporter::new(meter.clone())
            .with_directory(Arc::new(FixedDirectory(Ok(Some("cus_9".to_string())))));

        let event = reporter.event_for("o1", None, 4);
        let outcome = reporter.report(&event, "key").await.unwrap();

        assert!(matches!(outcome, BillingOutcome::Ack { ref customer_id } if customer_id == "cus_9"));
        assert_eq!(meter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_customer_is_skipped() {
        let meter = Arc::new(RecordingMeter::default());
        let reporter = BillingReporter::new(meter.clone())
            .with_directory(Arc::new(FixedDirectory(Ok(None))));

        let event = reporter.event_for("o1", None, 4);
        let outcome = reporter.report(&event, "key").await.unwrap();

        assert!(matches!(outcome, BillingOutcome::Skipped { .. }));
        assert!(meter.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_open() {
        let meter = Arc::new(RecordingMeter::default());
        let reporter = BillingReporter::new(meter.clone()).with_directory(Arc::new(
            FixedDirectory(Err(WorkflowError::BillingLookup("auth down".to_string()))),
        ));

        let event = reporter.event_for("o1", None, 4);
        match reporter.report(&event, "key").await.unwrap() {
            BillingOutcome::Skipped { reason } => assert!(reason.contains("auth down")),
            other => panic!("expected Skipped, got {:?}", other),
        }
        assert!(meter.calls.lock().unwrap().is_empty());
    }
}
