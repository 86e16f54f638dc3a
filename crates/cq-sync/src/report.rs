use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

use crate::cursor::WalkStatus;
use crate::JobKind;

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_fetched: usize,
    pub items_seen: usize,
    /// Items persisted from summary fields only.
    pub details_missing: usize,
    /// Items dropped for lacking a natural key.
    pub items_skipped: usize,
    pub records_upserted: usize,
    pub sponsorships_upserted: usize,
    /// Members whose sponsorship lists were never walked (no URLs).
    pub members_skipped: usize,
    /// Walks that stopped before reading their listing to the end.
    pub incomplete_walks: usize,
    pub walk_status: Option<WalkStatus>,
}

impl SyncRunSummary {
    pub fn start(job: JobKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job,
            started_at: Utc::now(),
            finished_at: None,
            pages_fetched: 0,
            items_seen: 0,
            details_missing: 0,
            items_skipped: 0,
            records_upserted: 0,
            sponsorships_upserted: 0,
            members_skipped: 0,
            incomplete_walks: 0,
            walk_status: None,
        }
    }

    pub fn record_walk(&mut self, status: WalkStatus) {
        if !status.is_complete() {
            self.incomplete_walks += 1;
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Write `<dir>/<run_id>/summary.json`.
pub async fn write_run_report(dir: &Path, summary: &SyncRunSummary) -> Result<PathBuf> {
    let run_dir = dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let path = run_dir.join("summary.json");
    let bytes = serde_json::to_vec_pretty(summary).context("serializing run summary")?;
    fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
