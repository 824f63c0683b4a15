//! ==============================================================================
//! file.rs - json lines reading store
//! ==============================================================================
//!
//! layout:
//!     one reading per line, in append order:
//!
//! ```text
//!     {"temperature":25.5,"moisture":40.0,"ph":6.8,"timestamp":"2024-05-01T12:00:00Z"}
//! ```
//!
//! durability:
//!     a reading is acknowledged only after its full line (newline included)
//!     is written and, with `fsync` on, synced. a line without its newline was
//!     therefore never acknowledged; on open it is treated as a torn write and
//!     truncated. a failed or cancelled write is rolled back to the last good
//!     length before the next append. once the line is on disk nothing awaits
//!     before the index insert, so a synced line is never left out of the
//!     running index.
//!
//! index:
//!     every reading is also kept in memory, sorted by timestamp, so history
//!     queries never touch the disk. the index is updated while the writer
//!     lock is still held, which makes readings visible in durable order.
//!
//! ==============================================================================

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{insert_sorted, select, ReadingQuery, ReadingStore};
use crate::domain::{Reading, StoreId};
use crate::error::StorageError;

pub struct JsonlStore {
    path: PathBuf,
    fsync: bool,
    writer: Mutex<Writer>,
    index: RwLock<Vec<Reading>>,
}

struct Writer {
    file: File,
    /// length of the file up to the last acknowledged line
    len: u64,
    /// set while a write is in flight; still set on entry means the previous
    /// append failed or was cancelled half way
    dirty: bool,
    next_id: u64,
}

impl Writer {
    async fn write_line(&mut self, line: &[u8], fsync: bool) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        if fsync {
            self.file.sync_data().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        self.file.set_len(self.len).await.map_err(|e| {
            StorageError::Unavailable(format!("failed to roll back partial write: {}", e))
        })?;
        self.dirty = false;
        Ok(())
    }
}

impl JsonlStore {
    /// open (or create) the store at `path` and rebuild the index
    pub async fn open(path: impl AsRef<Path>, fsync: bool) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        let (readings, good_len) = decode(&contents)?;

        if good_len < contents.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = contents.len() - good_len,
                "truncating torn trailing record"
            );
            file.set_len(good_len as u64).await?;
        }

        tracing::info!(path = %path.display(), readings = readings.len(), "reading store opened");

        let next_id = readings.len() as u64;
        Ok(Self {
            path,
            fsync,
            writer: Mutex::new(Writer {
                file,
                len: good_len as u64,
                dirty: false,
                next_id,
            }),
            index: RwLock::new(readings),
        })
    }

    fn readings(&self) -> RwLockReadGuard<'_, Vec<Reading>> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn readings_mut(&self) -> RwLockWriteGuard<'_, Vec<Reading>> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// parse complete lines; returns the readings (timestamp-sorted) and the byte
/// length covered by complete lines
fn decode(contents: &[u8]) -> Result<(Vec<Reading>, usize), StorageError> {
    let good_len = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);

    let mut readings = Vec::new();
    for (n, line) in contents[..good_len].split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let reading: Reading = serde_json::from_slice(line).map_err(|e| StorageError::Corrupt {
            line: n + 1,
            reason: e.to_string(),
        })?;
        insert_sorted(&mut readings, reading);
    }

    Ok((readings, good_len))
}

#[async_trait]
impl ReadingStore for JsonlStore {
    async fn append(&self, reading: Reading) -> Result<StoreId, StorageError> {
        let mut line = serde_json::to_vec(&reading)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        if writer.dirty {
            writer.rollback().await?;
        }

        writer.dirty = true;
        if let Err(e) = writer.write_line(&line, self.fsync).await {
            tracing::error!(path = %self.path.display(), error = %e, "append failed");
            if let Err(rollback) = writer.rollback().await {
                tracing::error!(error = %rollback, "store left dirty");
            }
            return Err(e.into());
        }
        // no await from here on: disk, counters and index move together
        writer.dirty = false;
        writer.len += line.len() as u64;

        let id = StoreId(writer.next_id);
        writer.next_id += 1;

        insert_sorted(&mut self.readings_mut(), reading);
        drop(writer);
        Ok(id)
    }

    async fn query(&self, query: ReadingQuery) -> Result<Vec<Reading>, StorageError> {
        Ok(select(&self.readings(), &query))
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.readings().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::with_timeout;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    fn reading_at(secs: i64, ph: f64) -> Reading {
        Reading {
            temperature: 22.0,
            moisture: 41.0,
            ph,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_readings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        {
            let store = JsonlStore::open(&path, true).await.unwrap();
            store.append(reading_at(100, 6.0)).await.unwrap();
            store.append(reading_at(200, 6.5)).await.unwrap();
        }

        let store = JsonlStore::open(&path, true).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        let all = store.query(ReadingQuery::default()).await.unwrap();
        assert_eq!(all, vec![reading_at(100, 6.0), reading_at(200, 6.5)]);

        // ids continue after the existing records
        assert_eq!(store.append(reading_at(300, 7.0)).await.unwrap(), StoreId(2));
    }

    #[tokio::test]
    async fn test_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("readings.jsonl");

        let store = JsonlStore::open(&path, false).await.unwrap();
        store.append(reading_at(1, 7.0)).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_torn_trailing_line_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let good = serde_json::to_string(&reading_at(10, 6.1)).unwrap();
        std::fs::write(&path, format!("{}\n{{\"temperature\":2", good)).unwrap();

        let store = JsonlStore::open(&path, true).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);

        store.append(reading_at(20, 6.2)).await.unwrap();
        drop(store);

        let store = JsonlStore::open(&path, true).await.unwrap();
        let all = store.query(ReadingQuery::default()).await.unwrap();
        assert_eq!(all, vec![reading_at(10, 6.1), reading_at(20, 6.2)]);
    }

    #[tokio::test]
    async fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let good = serde_json::to_string(&reading_at(10, 6.1)).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n{}\n", good, good)).unwrap();

        match JsonlStore::open(&path, true).await {
            Err(StorageError::Corrupt { line, .. }) => assert_eq!(line, 2),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("corrupt store opened"),
        }
    }

    #[tokio::test]
    async fn test_index_sorted_when_clock_steps_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let store = JsonlStore::open(&path, false).await.unwrap();
        store.append(reading_at(50, 6.0)).await.unwrap();
        store.append(reading_at(40, 6.1)).await.unwrap();
        drop(store);

        let store = JsonlStore::open(&path, false).await.unwrap();
        let secs: Vec<i64> = store
            .query(ReadingQuery::default())
            .await
            .unwrap()
            .iter()
            .map(|r| r.timestamp.timestamp())
            .collect();
        assert_eq!(secs, vec![40, 50]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_index_does_not_split_disk_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let store = Arc::new(JsonlStore::open(&path, true).await.unwrap());

        // a history reader holds the index while the append is timed
        let reader = store.clone();
        let (busy_tx, busy_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _busy = reader.index.read().unwrap();
            busy_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(200));
        });
        busy_rx.recv().unwrap();

        let result = with_timeout(
            Some(Duration::from_millis(50)),
            store.append(reading_at(10, 6.4)),
        )
        .await;
        holder.join().unwrap();

        let running = store.len().await.unwrap();
        drop(store);
        let reopened = JsonlStore::open(&path, true).await.unwrap().len().await.unwrap();

        assert_eq!(running, reopened);
        assert_eq!(result.is_ok(), running == 1);
    }

    #[tokio::test]
    async fn test_cancelled_append_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let store = JsonlStore::open(&path, true).await.unwrap();
        store.append(reading_at(1, 6.0)).await.unwrap();

        // gives up as soon as the write has to wait on the disk
        let cancelled = tokio::time::timeout(Duration::ZERO, store.append(reading_at(2, 6.1))).await;
        store.append(reading_at(3, 6.2)).await.unwrap();

        let running = store.query(ReadingQuery::default()).await.unwrap();
        drop(store);
        let reopened = JsonlStore::open(&path, true)
            .await
            .unwrap()
            .query(ReadingQuery::default())
            .await
            .unwrap();

        assert_eq!(running, reopened);
        if cancelled.is_err() {
            assert_eq!(running, vec![reading_at(1, 6.0), reading_at(3, 6.2)]);
        }
    }
}
