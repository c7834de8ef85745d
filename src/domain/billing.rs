//! Billing records handed to the usage ledger.

use serde::{Deserialize, Serialize};

/// One usage report for a completed unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub org_id: String,

    /// Billing customer; resolved from org metadata when absent
    pub customer_id: Option<String>,

    /// Billable unit count (`nb_job_results` of the activity)
    pub nb_units: u64,

    pub meter_name: String,
}

/// Result of a billing report that did not error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BillingOutcome {
    /// The ledger accepted the report for this customer
    Ack { customer_id: String },

    /// No report was sent; the reason is an anomaly worth looking at
    Skipped { reason: String },
}
