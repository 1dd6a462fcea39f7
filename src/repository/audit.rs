//! File-backed audit trail.
//!
//! Write-intent operations and storage failures are recorded as one
//! timestamped line each. The sink is fire-and-forget: an unwritable log
//! file degrades to a warning, never to a failed request.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::repository::AuditSink;

/// Appends audit lines to a configured file.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn record(&self, message: &str, actor: Option<&str>) {
        let line = format!(
            "{} - {} -> {}\n",
            Utc::now().to_rfc3339(),
            actor.unwrap_or(""),
            message
        );
        if let Err(err) = self.append(&line).await {
            tracing::warn!(error = %err, path = %self.path.display(), "audit log write failed");
        }
    }
}
