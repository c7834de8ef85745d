//! Extractor service client for pipeline activities.
//!
//! Endpoint: POST {base_url}/v1/pipelines/...
//! Auth: Bearer token

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{Activity, ActivityOutput};
use crate::domain::{ActivityId, WorkflowRequest};
use crate::error::WorkflowError;

/// HTTP client for the extractor service
pub struct ExtractorClient {
    base_url: String,
    secret_key: String,
    client: reqwest::Client,
}

impl ExtractorClient {
    /// Create a new client sharing `client`'s connection pool
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            client,
        }
    }

    /// Path of the endpoint serving `activity`
    pub fn endpoint(activity: ActivityId) -> &'static str {
        match activity {
            ActivityId::ExtractLangsmithData => "/v1/pipelines/langsmith",
            ActivityId::ExtractLangfuseData => "/v1/pipelines/langfuse",
            ActivityId::StoreOpenTelemetryData => "/v1/pipelines/opentelemetry",
            ActivityId::RunRecipeOnTask => "/v1/pipelines/recipes",
            ActivityId::RunMainPipelineOnMessages => "/v1/pipelines/main/messages",
            ActivityId::RunProcessLogsForMessages => "/v1/pipelines/log/messages",
            ActivityId::RunProcessLogForTasks => "/v1/pipelines/log/tasks",
        }
    }
}

#[async_trait]
impl Activity for ExtractorClient {
    fn name(&self) -> &str {
        "extractor"
    }

    async fn execute(
        &self,
        activity: ActivityId,
        request: &WorkflowRequest,
    ) -> Result<ActivityOutput, WorkflowError> {
        let url = format!("{}{}", self.base_url, Self::endpoint(activity));

        debug!(%activity, %url, org_id = %request.org_id, "Calling extractor");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await
            .map_err(|e| WorkflowError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkflowError::from_status(status.as_u16(), &text));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| WorkflowError::PermanentExternal(format!("malformed extractor response: {}", e)))?;

        Ok(ActivityOutput::from_json(body))
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/v1/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Extractor server is not reachable at {}", self.base_url))?;

        if !response.status().is_success() {
            anyhow::bail!("Extractor health check failed: {}", response.status());
        }

        Ok(())
    }
}
