//! Stripe billing meter client.
//!
//! Endpoint: POST {api_url}/v1/billing/meter_events (form encoded)
//! Auth: Bearer secret key

use async_trait::async_trait;
use tracing::debug;

use super::MeterClient;
use crate::error::WorkflowError;

/// Default Stripe API base URL
pub const STRIPE_API_URL: &str = "https://api.stripe.com";

/// Reports usage as Stripe meter events
pub struct StripeMeter {
    api_url: String,
    secret_key: String,
    client: reqwest::Client,
}

impl StripeMeter {
    pub fn new(api_url: impl Into<String>, secret_key: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            client,
        }
    }

    /// Build the form fields of a meter event
    fn form(meter_name: &str, customer_id: &str, value: u64, identifier: &str) -> Vec<(&'static str, String)> {
        vec![
            ("event_name", meter_name.to_string()),
            ("payload[value]", value.to_string()),
            ("payload[stripe_customer_id]", customer_id.to_string()),
            ("identifier", identifier.to_string()),
        ]
    }
}

#[async_trait]
impl MeterClient for StripeMeter {
    async fn record(
        &self,
        meter_name: &str,
        customer_id: &str,
        value: u64,
        identifier: &str,
    ) -> Result<(), WorkflowError> {
        let url = format!("{}/v1/billing/meter_events", self.api_url);

        debug!(meter_name, customer_id, value, identifier, "Sending meter event");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", identifier)
            .form(&Self::form(meter_name, customer_id, value, identifier))
            .send()
            .await
            .map_err(|e| WorkflowError::from_transport(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(WorkflowError::from_status(status.as_u16(), &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_event_form() {
        let form = StripeMeter::form("phospho_usage_based_meter", "cus_123", 2, "id:billing:abc");
        assert_eq!(form[0], ("event_name", "phospho_usage_based_meter".to_string()));
        assert_eq!(form[1], ("payload[value]", "2".to_string()));
        assert_eq!(form[2], ("payload[stripe_customer_id]", "cus_123".to_string()));
        assert_eq!(form[3], ("identifier", "id:billing:abc".to_string()));
    }
}
