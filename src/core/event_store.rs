//! Append-only event store with file-based persistence.
//!
//! Each workflow instance gets its own directory holding `events.jsonl`
//! (newline-delimited JSON, flushed on every append) and a `lock` file that
//! the worker advancing the instance holds exclusively.

use std::fs::OpenOptions as StdOpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::Event;

/// File-based event store using JSONL format
pub struct EventStore {
    /// Directory containing the instance
    instance_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,
}

impl EventStore {
    /// Create or open the event store of an instance under `base_dir`
    pub async fn open(base_dir: &Path, instance_id: Uuid) -> Result<Self> {
        let instance_dir = base_dir.join(instance_id.to_string());

        fs::create_dir_all(&instance_dir).await.with_context(|| {
            format!(
                "Failed to create instance directory: {}",
                instance_dir.display()
            )
        })?;

        let events_path = instance_dir.join("events.jsonl");

        Ok(Self {
            instance_dir,
            events_path,
        })
    }

    /// Open the store of an instance that must already exist
    pub async fn open_existing(base_dir: &Path, instance_id: Uuid) -> Result<Self> {
        let instance_dir = base_dir.join(instance_id.to_string());
        if !instance_dir.is_dir() {
            anyhow::bail!("Workflow instance {} not found", instance_id);
        }
        Self::open(base_dir, instance_id).await
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the instance directory
    pub fn instance_dir(&self) -> &Path {
        &self.instance_dir
    }

    /// Take exclusive ownership of the instance.
    ///
    /// Fails immediately if another worker holds it. Ownership is released
    /// when the returned guard is dropped.
    pub fn acquire(&self) -> Result<InstanceLock> {
        let lock_path = self.instance_dir.join("lock");
        let file = StdOpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!(
                "Workflow instance is owned by another worker: {}",
                self.instance_dir.display()
            )
        })?;

        Ok(InstanceLock { file })
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open events file: {}",
                    self.events_path.display()
                )
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;
        file.sync_data().await.context("Failed to sync events file")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// List all instance IDs in the base directory
    pub async fn list_instances(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut instances = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        instances.push(uuid);
                    }
                }
            }
        }

        Ok(instances)
    }
}

/// Exclusive ownership of one instance; released on drop
#[derive(Debug)]
pub struct InstanceLock {
    file: std::fs::File,
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Generate an idempotency key for a step
pub fn generate_idempotency_key(instance_id: Uuid, step_name: &str, input: &str) -> String {
    let input_hash = hash_input(input);
    format!("{}:{}:{}", instance_id, step_name, input_hash)
}

/// Hash input content (first 16 chars of SHA256)
pub fn hash_input(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
