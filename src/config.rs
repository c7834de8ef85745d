//! Configuration for the workflow service.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (EXTRACTOR_HOME, EXTRACTOR_URL, ENVIRONMENT, ...)
//! 2. Config file (.extractor/config.yaml)
//! 3. Defaults (~/.extractor)
//!
//! Config file discovery:
//! - Searches current directory and parents for .extractor/config.yaml
//! - `paths.home` is relative to the .extractor/ directory
//!
//! Secrets (API keys, webhook URL) are only ever read from the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::adapters::{ExtractorClient, OrgDirectory, SlackNotifier, StripeMeter};
use crate::core::{
    ActivityExecutor, BillingReporter, DispatchRegistry, Orchestrator, RetryPolicy,
    DEFAULT_ACTIVITY_TIMEOUT, DEFAULT_BILLING_TIMEOUT, DEFAULT_INITIAL_BACKOFF,
    DEFAULT_MAX_BACKOFF, DEFAULT_METER_NAME,
};

const DEFAULT_EXTRACTOR_URL: &str = "http://localhost:7605";
const DEFAULT_AUTH_URL: &str = "https://auth.phospho.ai";
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_BILLING_MAX_ATTEMPTS: u32 = 3;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .extractor/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractorConfig {
    pub url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BillingConfig {
    pub meter_name: Option<String>,
    pub api_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_seconds: Option<u64>,
}

/// Credentials read from the environment
#[derive(Clone, Default)]
pub struct Secrets {
    pub extractor_secret_key: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub propelauth_api_key: Option<String>,
    pub slack_url: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |s: &Option<String>| if s.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("extractor_secret_key", &mask(&self.extractor_secret_key))
            .field("stripe_secret_key", &mask(&self.stripe_secret_key))
            .field("propelauth_api_key", &mask(&self.propelauth_api_key))
            .field("slack_url", &mask(&self.slack_url))
            .finish()
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory; instance histories live under `instances/`
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Deployment environment; alerts are only sent in `production`
    pub environment: String,
    pub extractor_url: String,
    pub activity_timeout: Duration,
    pub auth_url: String,
    pub meter_name: String,
    pub stripe_api_url: String,
    pub billing_max_attempts: u32,
    pub billing_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub secrets: Secrets,
}

impl ResolvedConfig {
    /// Directory holding one subdirectory per workflow instance
    pub fn instances_dir(&self) -> PathBuf {
        self.home.join("instances")
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Defaults rooted at `home`, with no config file and no secrets
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        resolve(home.into(), None, ConfigFile::default(), |_| None)
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(".extractor").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge file values, environment and defaults
fn resolve(
    default_home: PathBuf,
    config_file: Option<PathBuf>,
    file: ConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let home = if let Some(env_home) = env("EXTRACTOR_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(config_path)) = (&file.paths.home, &config_file) {
        let extractor_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(extractor_dir, home_path)
    } else {
        default_home
    };

    let secrets = Secrets {
        extractor_secret_key: env("EXTRACTOR_SECRET_KEY"),
        stripe_secret_key: env("STRIPE_SECRET_KEY"),
        propelauth_api_key: env("PROPELAUTH_API_KEY"),
        slack_url: env("SLACK_URL"),
    };

    ResolvedConfig {
        home,
        config_file,
        environment: env("ENVIRONMENT")
            .or(file.environment)
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string()),
        extractor_url: env("EXTRACTOR_URL")
            .or(file.extractor.url)
            .unwrap_or_else(|| DEFAULT_EXTRACTOR_URL.to_string()),
        activity_timeout: file
            .extractor
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT),
        auth_url: env("PROPELAUTH_URL")
            .or(file.auth.url)
            .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
        meter_name: file
            .billing
            .meter_name
            .unwrap_or_else(|| DEFAULT_METER_NAME.to_string()),
        stripe_api_url: file
            .billing
            .api_url
            .unwrap_or_else(|| crate::adapters::stripe::STRIPE_API_URL.to_string()),
        billing_max_attempts: file
            .billing
            .max_attempts
            .unwrap_or(DEFAULT_BILLING_MAX_ATTEMPTS),
        billing_timeout: file
            .billing
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BILLING_TIMEOUT),
        initial_backoff: file
            .retry
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INITIAL_BACKOFF),
        max_backoff: file
            .retry
            .max_backoff_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MAX_BACKOFF),
        secrets,
    }
}

/// Load configuration from all sources, searching for a config file from
/// the current directory upwards
pub fn load_config() -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    load_config_from(&cwd)
}

/// Load configuration, searching for a config file from `start` upwards
pub fn load_config_from(start: &Path) -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".extractor");

    let config_file = find_config_file(start);
    let file = match &config_file {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let config = resolve(default_home, config_file, file, |key| std::env::var(key).ok());
    debug!(?config, "Configuration resolved");
    Ok(config)
}

/// External clients and the orchestrator built from one resolved config.
///
/// All HTTP adapters share one connection pool.
pub struct ServiceClients {
    pub http: reqwest::Client,
    pub extractor: Arc<ExtractorClient>,
    pub orchestrator: Orchestrator,
}

impl ServiceClients {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("extractor-workflows/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let extractor_key = config
            .secrets
            .extractor_secret_key
            .clone()
            .context("EXTRACTOR_SECRET_KEY is not set")?;
        let extractor = Arc::new(ExtractorClient::new(
            config.extractor_url.clone(),
            extractor_key,
            http.clone(),
        ));

        let stripe_key = config
            .secrets
            .stripe_secret_key
            .clone()
            .context("STRIPE_SECRET_KEY is not set")?;
        let meter = Arc::new(StripeMeter::new(
            config.stripe_api_url.clone(),
            stripe_key,
            http.clone(),
        ));

        let mut billing = BillingReporter::new(meter)
            .with_meter_name(config.meter_name.clone())
            .with_timeout(config.billing_timeout)
            .with_retry_policy(
                RetryPolicy::with_max_attempts(config.billing_max_attempts)
                    .with_backoff(config.initial_backoff, config.max_backoff),
            );
        match &config.secrets.propelauth_api_key {
            Some(api_key) => {
                billing = billing.with_directory(Arc::new(OrgDirectory::new(
                    config.auth_url.clone(),
                    api_key.clone(),
                    http.clone(),
                )));
            }
            None => info!("PROPELAUTH_API_KEY not set; requests without customer_id skip billing"),
        }

        let registry = DispatchRegistry::standard(config.activity_timeout, config.max_backoff)?;
        let executor = ActivityExecutor::new(extractor.clone());

        let mut orchestrator = Orchestrator::new(registry, executor, billing, config.instances_dir())?;
        if config.is_production() {
            if let Some(slack_url) = &config.secrets.slack_url {
                orchestrator = orchestrator
                    .with_alerts(Arc::new(SlackNotifier::new(slack_url.clone(), http.clone())));
            }
        }

        Ok(Self {
            http,
            extractor,
            orchestrator,
        })
    }
}
