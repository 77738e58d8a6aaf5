//! Append-only record of card generation attempts, one JSON object per line.
//!
//! Writes are best effort: failures are logged and swallowed so a broken log
//! file can never change what a caller receives.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptEvent {
    DuplicateRetry,
    Accepted,
    Exhausted,
    BackendError,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub event: AttemptEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AttemptRecord {
    pub fn new(subject: &str, event: AttemptEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            subject: subject.to_string(),
            event,
            attempt: None,
            topic: None,
            detail: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationLog {
    path: Option<PathBuf>,
}

impl GenerationLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub async fn record(&self, record: AttemptRecord) {
        let Some(path) = &self.path else {
            return;
        };

        if let Err(e) = append_line(path, &record).await {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to write generation diagnostic record"
            );
        }
    }
}

async fn append_line(path: &Path, record: &AttemptRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
