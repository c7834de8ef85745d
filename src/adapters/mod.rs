//! Adapter interfaces for external systems.
//!
//! Adapters are thin I/O wrappers: the extractor service that runs the
//! analytics activities, the usage meter, the organisation directory used
//! to find billing customers, and the operational alert channel.

pub mod directory;
pub mod extractor;
pub mod slack;
pub mod stripe;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{ActivityId, WorkflowRequest};
use crate::error::WorkflowError;

pub use directory::OrgDirectory;
pub use extractor::ExtractorClient;
pub use slack::SlackNotifier;
pub use stripe::StripeMeter;

/// Successful result of one activity invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOutput {
    /// Billable unit count reported by the activity
    pub nb_job_results: u64,

    /// Kind-specific response body
    pub payload: serde_json::Value,
}

impl ActivityOutput {
    pub fn new(nb_job_results: u64) -> Self {
        Self {
            nb_job_results,
            payload: serde_json::Value::Null,
        }
    }

    /// Build from a JSON response; a missing `nb_job_results` counts as 0
    pub fn from_json(payload: serde_json::Value) -> Self {
        let nb_job_results = payload
            .get("nb_job_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Self {
            nb_job_results,
            payload,
        }
    }
}

/// Runs units of work on behalf of workflows
#[async_trait]
pub trait Activity: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Execute one attempt of `activity` for `request`
    async fn execute(
        &self,
        activity: ActivityId,
        request: &WorkflowRequest,
    ) -> Result<ActivityOutput, WorkflowError>;

    async fn health_check(&self) -> Result<()>;
}

/// Usage ledger that accepts metered billing events
#[async_trait]
pub trait MeterClient: Send + Sync {
    /// Record `value` units on `meter_name` for a customer.
    ///
    /// `identifier` is stable across replays of the same billing step so the
    /// ledger can drop duplicates.
    async fn record(
        &self,
        meter_name: &str,
        customer_id: &str,
        value: u64,
        identifier: &str,
    ) -> Result<(), WorkflowError>;
}

/// Resolves the billing customer of an organisation
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn customer_id(&self, org_id: &str) -> Result<Option<String>, WorkflowError>;
}

/// Operational alert channel for terminal failures
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}
