use crate::memory::LinkIndex;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tinylink_core::{
    DeletionOutcome, DeletionTicket, Repository, Result, SaveOutcome, StorageError, UserLink,
};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// One line of the journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: u64,
    pub user_id: String,
    pub url: String,
}

/// File-backed implementation of the [`Repository`] contract.
///
/// State lives in memory exactly like [`InMemoryRepository`](crate::InMemoryRepository);
/// every change is also appended to a newline-delimited JSON journal, which is
/// replayed on [`open`](Self::open). The journal is never compacted.
///
/// A save holds the write lock across the journal append, so save latency is
/// bound by disk I/O. If the append fails the in-memory change is reverted and
/// the save is reported as failed.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    index: RwLock<LinkIndex>,
    journal: Mutex<Option<File>>,
}

impl FileRepository {
    /// Opens (or creates) the journal at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        let (index, file) = replay(&path, file).await?;
        info!(path = %path.display(), links = index.len(), "Replayed link journal");

        Ok(Self {
            path,
            index: RwLock::new(index),
            journal: Mutex::new(Some(file)),
        })
    }

    /// Returns the journal location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &JournalRecord) -> std::result::Result<(), StorageError> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| StorageError::InvalidData(format!("cannot encode journal record: {e}")))?;
        line.push(b'\n');

        let mut journal = self.journal.lock().await;
        let file = journal.as_mut().ok_or(StorageError::Closed)?;
        let start = file
            .metadata()
            .await
            .map_err(|e| io_error(&self.path, e))?
            .len();

        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // a partial write would glue the next record onto this one
            if let Err(cut) = file.set_len(start).await {
                error!(path = %self.path.display(), error = %cut, "Could not cut torn journal record");
            }
            return Err(io_error(&self.path, e));
        }
        Ok(())
    }
}

async fn replay(path: &Path, file: File) -> Result<(LinkIndex, File)> {
    let mut index = LinkIndex::default();
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    let mut line_no = 0usize;
    let mut offset = 0u64;
    let mut torn_at = None;

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| io_error(path, e))?;
        if read == 0 {
            break;
        }
        line_no += 1;
        let line_start = offset;
        offset += read as u64;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: JournalRecord = match serde_json::from_str(trimmed) {
            Ok(record) => record,
            // an unterminated last line is a write that never completed
            Err(e) if !line.ends_with('\n') => {
                warn!(path = %path.display(), line = line_no, error = %e, "Dropping torn journal record");
                torn_at = Some(line_start);
                break;
            }
            Err(e) => {
                return Err(
                    StorageError::InvalidData(format!("{}:{line_no}: {e}", path.display())).into(),
                )
            }
        };
        index
            .restore(record.id, &record.url, &record.user_id)
            .map_err(|e| StorageError::InvalidData(format!("{}:{line_no}: {e}", path.display())))?;
    }

    let file = reader.into_inner();
    if let Some(len) = torn_at {
        file.set_len(len).await.map_err(|e| io_error(path, e))?;
    }
    Ok((index, file))
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Unavailable(format!("{}: {err}", path.display()))
}

#[async_trait]
impl Repository for FileRepository {
    async fn resolve(&self, code: &str) -> Result<String> {
        self.index.read().await.resolve(code)
    }

    async fn save(&self, original_url: &str, user_id: &str) -> Result<SaveOutcome> {
        let mut index = self.index.write().await;
        let insertion = index.insert(original_url, user_id);

        if insertion.changed() {
            let record = JournalRecord {
                id: insertion.id(),
                user_id: user_id.to_string(),
                url: original_url.to_string(),
            };
            if let Err(e) = self.append(&record).await {
                index.revert(insertion, original_url, user_id);
                warn!(id = record.id, error = %e, "Journal append failed, save rolled back");
                return Err(e.into());
            }
            debug!(id = record.id, "Appended journal record");
        }

        Ok(insertion.outcome())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<UserLink>> {
        self.index.read().await.list_by_user(user_id)
    }

    fn request_deletion(&self, user_id: &str, codes: Vec<String>) -> DeletionTicket {
        debug!(user_id, count = codes.len(), "Deletion is not supported by the file backend");
        DeletionTicket::resolved(DeletionOutcome::Unsupported)
    }

    async fn health_check(&self) -> Result<()> {
        let journal = self.journal.lock().await;
        let file = journal.as_ref().ok_or(StorageError::Closed)?;
        file.metadata().await.map_err(|e| io_error(&self.path, e))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut file) = self.journal.lock().await.take() else {
            return Ok(());
        };
        file.flush().await.map_err(|e| io_error(&self.path, e))?;
        info!(path = %self.path.display(), "Closed link journal");
        Ok(())
    }
}
