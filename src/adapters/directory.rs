//! Organisation directory lookup for billing customers.
//!
//! Endpoint: GET {auth_url}/api/backend/v1/org/{org_id}
//! Auth: Bearer API key
//!
//! The Stripe customer id lives in the organisation metadata under
//! `customer_id`.

use async_trait::async_trait;
use serde::Deserialize;

use super::CustomerDirectory;
use crate::error::WorkflowError;

/// HTTP client for the auth provider's organisation API
pub struct OrgDirectory {
    auth_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OrgResponse {
    #[serde(default)]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl OrgDirectory {
    pub fn new(auth_url: impl Into<String>, api_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }
}

#[async_trait]
impl CustomerDirectory for OrgDirectory {
    async fn customer_id(&self, org_id: &str) -> Result<Option<String>, WorkflowError> {
        let url = format!("{}/api/backend/v1/org/{}", self.auth_url, org_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| WorkflowError::BillingLookup(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorkflowError::BillingLookup(format!(
                "org lookup for {} failed ({}): {}",
                org_id,
                status,
                text.trim()
            )));
        }

        let org: OrgResponse = response
            .json()
            .await
            .map_err(|e| WorkflowError::BillingLookup(format!("malformed org response: {}", e)))?;

        Ok(org
            .metadata
            .and_then(|m| m.get("customer_id").and_then(|v| v.as_str()).map(str::to_string))
            .filter(|id| !id.trim().is_empty()))
    }
}
