//! Which chunks have already been committed to the graph.
//!
//! The tracker keeps an in-memory set mirrored by a durable ledger. Marks are
//! written to the ledger before the in-memory set learns about them, so a
//! crash can only ever cause a chunk to be processed twice, never skipped.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable key store of processed chunk ids.
#[async_trait]
pub trait ProgressLedger: Send + Sync {
    /// Must be durable by the time it returns.
    async fn create(&self, chunk_id: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<String>>;

    async fn delete_all(&self) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerEntry {
    chunk_id: String,
    processed_at: DateTime<Utc>,
}

/// JSON-lines ledger, one `{chunk_id, processed_at}` object per line.
pub struct FileLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressLedger for FileLedger {
    async fn create(&self, chunk_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_parent().await?;

        let entry = LedgerEntry {
            chunk_id: chunk_id.to_string(),
            processed_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open ledger {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("Failed to append to ledger")?;
        file.sync_all().await.context("Failed to sync ledger")?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read ledger {}", self.path.display()));
            }
        };

        let mut ids = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(line) {
                Ok(entry) => ids.push(entry.chunk_id),
                Err(e) => warn!(line = number + 1, error = %e, "Skipping unreadable ledger line"),
            }
        }
        Ok(ids)
    }

    async fn delete_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_parent().await?;
        tokio::fs::write(&self.path, b"")
            .await
            .with_context(|| format!("Failed to truncate ledger {}", self.path.display()))?;
        Ok(())
    }
}

/// In-process ledger for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryLedger {
    ids: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory ledger is rejecting writes");
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressLedger for MemoryLedger {
    async fn create(&self, chunk_id: &str) -> Result<()> {
        self.check_writable()?;
        self.ids.lock().await.push(chunk_id.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.ids.lock().await.clone())
    }

    async fn delete_all(&self) -> Result<()> {
        self.check_writable()?;
        self.ids.lock().await.clear();
        Ok(())
    }
}

pub struct ProgressTracker {
    ledger: Arc<dyn ProgressLedger>,
    processed: HashSet<String>,
}

impl ProgressTracker {
    /// Read the ledger once into memory.
    pub async fn load(ledger: Arc<dyn ProgressLedger>) -> Result<Self> {
        let processed: HashSet<String> = ledger
            .list()
            .await
            .context("Failed to load progress ledger")?
            .into_iter()
            .collect();

        info!(processed = processed.len(), "Loaded progress ledger");
        Ok(Self { ledger, processed })
    }

    pub fn is_processed(&self, chunk_id: &str) -> bool {
        self.processed.contains(chunk_id)
    }

    /// No-op when already marked.
    pub async fn mark(&mut self, chunk_id: &str) -> Result<()> {
        if self.is_processed(chunk_id) {
            return Ok(());
        }

        self.ledger
            .create(chunk_id)
            .await
            .with_context(|| format!("Failed to record chunk {}", chunk_id))?;
        self.processed.insert(chunk_id.to_string());

        debug!(chunk_id, "Marked chunk processed");
        Ok(())
    }

    /// Clear the ledger, then the in-memory set.
    pub async fn reset(&mut self) -> Result<()> {
        self.ledger
            .delete_all()
            .await
            .context("Failed to clear progress ledger")?;
        self.processed.clear();

        info!("Progress reset");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}
