use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::formats::{HistoryRecord, HistoryStatus};

/// Works whose most recent records are this many failures in a row are
/// skipped.
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &HistoryRecord) -> anyhow::Result<()>;
    /// Records for one work, oldest first.
    async fn records_for(&self, source: &str, work_id: &str) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// Appends one JSON object per line to `<base_dir>/history.jsonl`.
#[derive(Debug, Clone)]
pub struct LocalFsHistoryStore {
    base_dir: PathBuf,
}

impl LocalFsHistoryStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.base_dir.join("history.jsonl")
    }
}

#[async_trait]
impl HistoryStore for LocalFsHistoryStore {
    async fn append(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        fs::create_dir_all(&self.base_dir)
            .await
            .with_context(|| format!("create history dir: {}", self.base_dir.display()))?;

        let mut line = serde_json::to_vec(record).context("serialize history record")?;
        line.push(b'\n');

        let path = self.path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("open history: {}", path.display()))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("append history: {}", path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flush history: {}", path.display()))?;
        Ok(())
    }

    async fn records_for(&self, source: &str, work_id: &str) -> anyhow::Result<Vec<HistoryRecord>> {
        let records = read_jsonl(&self.path()).await?;
        Ok(records
            .into_iter()
            .filter(|record| record.source == source && record.work_id == work_id)
            .collect())
    }
}

async fn read_jsonl(path: &Path) -> anyhow::Result<Vec<HistoryRecord>> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read history: {}", path.display())),
    };

    let mut records = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(path = %path.display(), line = idx + 1, error = %err, "skipping unreadable history line");
            }
        }
    }
    Ok(records)
}

/// Failures at the end of `records` since the last success.
pub fn consecutive_failures(records: &[HistoryRecord]) -> usize {
    records
        .iter()
        .rev()
        .take_while(|record| record.status == HistoryStatus::Failed)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_round_trip_through_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsHistoryStore::new(dir.path());

        assert!(store.records_for("demo", "1").await.unwrap().is_empty());

        store
            .append(&HistoryRecord::failure("demo", "1", "timeout"))
            .await
            .unwrap();
        store
            .append(&HistoryRecord::failure("other", "1", "timeout"))
            .await
            .unwrap();
        store
            .append(&HistoryRecord::failure("demo", "2", "timeout"))
            .await
            .unwrap();

        let records = store.records_for("demo", "1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error.as_deref(), Some("timeout"));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn unreadable_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsHistoryStore::new(dir.path());
        store
            .append(&HistoryRecord::failure("demo", "1", "boom"))
            .await
            .unwrap();
        let mut raw = std::fs::read_to_string(store.path()).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(store.path(), raw).unwrap();

        assert_eq!(store.records_for("demo", "1").await.unwrap().len(), 1);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let failure = HistoryRecord::failure("demo", "1", "boom");
        let success = HistoryRecord {
            status: HistoryStatus::Success,
            error: None,
            ..failure.clone()
        };
        assert_eq!(consecutive_failures(&[]), 0);
        assert_eq!(
            consecutive_failures(&[failure.clone(), success.clone(), failure.clone()]),
            1
        );
        assert_eq!(
            consecutive_failures(&[success, failure.clone(), failure.clone(), failure]),
            3
        );
    }
}
