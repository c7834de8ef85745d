//! Command-line interface for extractor-workflows.
//!
//! Operator commands for submitting workflows, checking status,
//! listing instances, resuming interrupted instances and running a
//! recovery worker.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::Activity;
use crate::config::{load_config, ResolvedConfig, ServiceClients};
use crate::core::DispatchRegistry;
use crate::domain::{Instance, StepStatus, WorkflowKind, WorkflowOutcome, WorkflowPayload, WorkflowRequest};

/// extractor-workflows - Durable, billed workflow orchestration
#[derive(Parser, Debug)]
#[command(name = "extractor-workflows")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a workflow and wait for its outcome
    Submit {
        /// Workflow kind (e.g. run_recipe_on_task_workflow)
        #[arg(short, long)]
        kind: String,

        /// JSON payload file with a "type" field ("-" reads stdin)
        #[arg(short, long)]
        payload: PathBuf,

        #[arg(long)]
        org_id: String,

        #[arg(long)]
        project_id: String,

        /// Billing customer; looked up from the org when absent
        #[arg(long)]
        customer_id: Option<String>,

        /// Only record the instance; `worker` or `resume` executes it
        #[arg(long)]
        detach: bool,
    },

    /// Check the status of an instance
    Status {
        /// Instance ID (UUID)
        instance_id: String,
    },

    /// List recent instances
    Instances {
        /// Maximum number of instances to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Resume an interrupted instance
    Resume {
        /// Instance ID to resume
        instance_id: String,
    },

    /// Resume every unfinished instance
    Worker,

    /// Verify every workflow kind is bound and the extractor is reachable
    Check,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = load_config()?;

        match self.command {
            Commands::Submit {
                kind,
                payload,
                org_id,
                project_id,
                customer_id,
                detach,
            } => {
                submit(&config, &kind, payload, org_id, project_id, customer_id, detach).await
            }
            Commands::Status { instance_id } => show_status(&config, &instance_id).await,
            Commands::Instances { limit } => list_instances(&config, limit).await,
            Commands::Resume { instance_id } => resume_instance(&config, &instance_id).await,
            Commands::Worker => run_worker(&config).await,
            Commands::Check => check(&config).await,
            Commands::Config => {
                show_config(&config);
                Ok(())
            }
        }
    }
}

/// Submit a workflow instance
async fn submit(
    config: &ResolvedConfig,
    kind: &str,
    payload_path: PathBuf,
    org_id: String,
    project_id: String,
    customer_id: Option<String>,
    detach: bool,
) -> Result<()> {
    let kind: WorkflowKind = kind.parse().map_err(anyhow::Error::msg)?;

    let raw = if payload_path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read payload from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(&payload_path)
            .with_context(|| format!("Failed to read payload file: {}", payload_path.display()))?
    };
    let payload: WorkflowPayload =
        serde_json::from_str(&raw).context("Payload is not a valid workflow payload")?;

    let request = WorkflowRequest::new(org_id, project_id, customer_id, payload);

    let clients = ServiceClients::from_config(config)?;
    let orchestrator = clients.orchestrator;

    // A detached submission only records the instance; this process exits
    // before any activity attempt starts
    if detach {
        let instance_id = orchestrator.enqueue(kind, request).await?;
        eprintln!(
            "[Instance {} queued: {}; run `extractor-workflows worker` to execute it]",
            instance_id, kind
        );
        println!("{}", instance_id);
        return Ok(());
    }

    let handle = orchestrator.submit(kind, request).await?;
    let instance_id = handle.instance_id();
    eprintln!("[Instance {} submitted: {}]", instance_id, kind);

    let outcome = orchestrator.await_result(handle).await?;
    report_outcome(instance_id, &outcome);
    Ok(())
}

/// Print an outcome; exits non-zero on failure
fn report_outcome(instance_id: Uuid, outcome: &WorkflowOutcome) {
    match outcome {
        WorkflowOutcome::Completed { nb_job_results } => {
            println!("{}", nb_job_results);
            eprintln!("[Instance {} completed successfully]", instance_id);
        }
        WorkflowOutcome::CompletedWithBillingAnomaly {
            nb_job_results,
            reason,
        } => {
            println!("{}", nb_job_results);
            eprintln!(
                "[Instance {} completed; billing not reported: {}]",
                instance_id, reason
            );
        }
        WorkflowOutcome::Failed { kind, reason } => {
            eprintln!("[Instance {} failed ({}): {}]", instance_id, kind, reason);
            std::process::exit(1);
        }
        WorkflowOutcome::Cancelled => {
            eprintln!("[Instance {} cancelled]", instance_id);
            std::process::exit(1);
        }
    }
}

fn parse_instance_id(instance_id: &str) -> Result<Uuid> {
    Uuid::parse_str(instance_id).with_context(|| format!("Invalid instance ID: {}", instance_id))
}

/// Show the status of an instance
async fn show_status(config: &ResolvedConfig, instance_id: &str) -> Result<()> {
    let instance_id = parse_instance_id(instance_id)?;
    let clients = ServiceClients::from_config(config)?;
    let instance = clients.orchestrator.status(instance_id).await?;

    println!("Instance ID: {}", instance.id);
    if let Some(kind) = instance.kind() {
        println!("Workflow: {}", kind);
    }
    if let Some(submission) = &instance.submission {
        println!("Org: {}", submission.request.org_id);
        println!("Project: {}", submission.request.project_id);
    }
    println!("State: {}", state_label(&instance));
    println!("Submitted: {}", instance.submitted_at);
    if let Some(completed) = instance.completed_at {
        println!("Completed: {}", completed);
    }
    println!(
        "Activity: {:?} ({} attempt(s))",
        instance.activity_status, instance.activity_attempts
    );
    if let Some(n) = instance.nb_job_results {
        println!("Job results: {}", n);
    }
    if instance.billing_status != StepStatus::Pending {
        println!(
            "Billing: {:?} ({} attempt(s))",
            instance.billing_status, instance.billing_attempts
        );
    }
    if let Some(anomaly) = &instance.billing_anomaly {
        println!("Billing anomaly: {}", anomaly);
    }
    if let Some((kind, message)) = &instance.last_error {
        println!("Last error ({}): {}", kind, message);
    }

    Ok(())
}

fn state_label(instance: &Instance) -> &'static str {
    match &instance.outcome {
        None => "running",
        Some(WorkflowOutcome::Completed { .. }) => "completed",
        Some(WorkflowOutcome::CompletedWithBillingAnomaly { .. }) => "completed-unbilled",
        Some(WorkflowOutcome::Failed { .. }) => "failed",
        Some(WorkflowOutcome::Cancelled) => "cancelled",
    }
}

/// List recent instances
async fn list_instances(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let clients = ServiceClients::from_config(config)?;
    let instances = clients.orchestrator.list_instances(limit).await?;

    if instances.is_empty() {
        println!("No instances found");
        return Ok(());
    }

    println!("{:<38} {:<40} {:<20}", "INSTANCE ID", "WORKFLOW", "STATE");
    println!("{}", "-".repeat(98));

    for instance in instances {
        let kind = instance
            .kind()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("{:<38} {:<40} {:<20}", instance.id, kind, state_label(&instance));
    }

    Ok(())
}

/// Resume an interrupted instance
async fn resume_instance(config: &ResolvedConfig, instance_id: &str) -> Result<()> {
    let instance_id = parse_instance_id(instance_id)?;
    let clients = ServiceClients::from_config(config)?;
    let outcome = clients.orchestrator.resume(instance_id).await?;
    report_outcome(instance_id, &outcome);
    Ok(())
}

/// Resume all unfinished instances once
async fn run_worker(config: &ResolvedConfig) -> Result<()> {
    let clients = ServiceClients::from_config(config)?;
    let resumed = clients.orchestrator.resume_pending().await?;

    if resumed.is_empty() {
        println!("No unfinished instances");
        return Ok(());
    }

    for (instance_id, result) in resumed {
        match result {
            Ok(outcome) => println!("{:<38} {:?}", instance_id, outcome),
            Err(e) => println!("{:<38} error: {:#}", instance_id, e),
        }
    }

    Ok(())
}

/// Registry self-check plus extractor reachability
async fn check(config: &ResolvedConfig) -> Result<()> {
    let registry = DispatchRegistry::standard(config.activity_timeout, config.max_backoff)?;
    println!("Registry: {} workflow kind(s) bound", registry.bindings().len());
    for binding in registry.bindings() {
        println!(
            "  {:<40} -> {:<32} bill={} max_retries={}",
            binding.kind.workflow_name(),
            binding.activity,
            binding.bill,
            binding.max_retries
        );
    }

    let clients = ServiceClients::from_config(config)?;
    match clients.extractor.health_check().await {
        Ok(()) => println!("Extractor: reachable at {}", config.extractor_url),
        Err(e) => anyhow::bail!("Extractor at {} is unreachable: {:#}", config.extractor_url, e),
    }

    Ok(())
}

/// Show resolved configuration (debug)
fn show_config(config: &ResolvedConfig) {
    println!("Extractor workflows configuration");
    println!("=================================");
    println!();

    if let Some(ref config_file) = config.config_file {
        println!("Config file: {}", config_file.display());
    } else {
        println!("Config file: (none - using defaults)");
    }
    println!();

    println!("Environment: {}", config.environment);
    println!("Home: {}", config.home.display());
    println!("Instances: {}", config.instances_dir().display());
    println!();

    println!("Extractor URL: {}", config.extractor_url);
    println!("Activity timeout: {:?}", config.activity_timeout);
    println!("Auth URL: {}", config.auth_url);
    println!("Meter: {}", config.meter_name);
    println!(
        "Billing: {} attempt(s), {:?} timeout",
        config.billing_max_attempts, config.billing_timeout
    );
    println!(
        "Backoff: {:?} initial, {:?} max",
        config.initial_backoff, config.max_backoff
    );
    println!("Secrets: {:?}", config.secrets);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "extractor-workflows",
            "submit",
            "--kind",
            "run_recipe_on_task_workflow",
            "--payload",
            "payload.json",
            "--org-id",
            "o1",
            "--project-id",
            "p1",
            "--customer-id",
            "c1",
        ])
        .unwrap();

        match cli.command {
            Commands::Submit {
                kind,
                org_id,
                customer_id,
                detach,
                ..
            } => {
                assert_eq!(kind, "run_recipe_on_task_workflow");
                assert_eq!(org_id, "o1");
                assert_eq!(customer_id.as_deref(), Some("c1"));
                assert!(!detach);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_detached_submit() {
        let cli = Cli::try_parse_from([
            "extractor-workflows",
            "submit",
            "-k",
            "process_log_for_tasks",
            "-p",
            "-",
            "--org-id",
            "o1",
            "--project-id",
            "p1",
            "--detach",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Commands::Submit {
                detach: true,
                customer_id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_instances_default_limit() {
        let cli = Cli::try_parse_from(["extractor-workflows", "instances"]).unwrap();
        assert!(matches!(cli.command, Commands::Instances { limit: 10 }));
    }
}
