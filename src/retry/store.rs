//! File-backed retry queue for a single endpoint.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const RECORD_PREFIX: &str = "msg";
const RECORD_SUFFIX: &str = ".txt";
const TEMP_MARKER: char = '.';

/// Give up on naming a record after this many collisions.
const MAX_NAME_ATTEMPTS: u32 = 1_000;

/// Upper bound of the random wait after a name collision.
const COLLISION_BACKOFF_MAX_MS: u64 = 25;

/// Failure to durably persist a payload for redelivery.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("retry store I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("retry path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no free record name in {} after {attempts} attempts", .dir.display())]
    NameExhausted { dir: PathBuf, attempts: u32 },
}

impl PersistError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Outcome of a single pass over a retry store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records delivered during this pass
    pub delivered: usize,
    /// Records whose delivery failed again
    pub failed: usize,
    /// Records still present after the pass
    pub remaining: usize,
}

/// Durable queue of pending payloads backed by one directory.
///
/// Every record is a single file named `msg<millis>.txt`. Writers claim a
/// hidden `.msg<millis>.txt` name exclusively, write and sync the payload,
/// then rename it into place, so a concurrent drain never sees a partial
/// record.
#[derive(Debug, Clone)]
pub struct RetryStore {
    dir: PathBuf,
}

impl RetryStore {
    /// Open a store, creating its directory when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();

        if let Err(source) = std::fs::create_dir_all(&dir) {
            if dir.exists() && !dir.is_dir() {
                return Err(PersistError::NotADirectory(dir));
            }
            return Err(PersistError::io(&dir, source));
        }

        let meta = std::fs::metadata(&dir).map_err(|e| PersistError::io(&dir, e))?;
        if !meta.is_dir() {
            return Err(PersistError::NotADirectory(dir));
        }

        debug!(dir = %dir.display(), "retry store opened");
        Ok(Self { dir })
    }

    /// Directory holding this store's records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a payload for later redelivery.
    ///
    /// Returns the path of the new record.
    pub async fn enqueue(&self, payload: &str) -> Result<PathBuf, PersistError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let ts = Utc::now().timestamp_millis().max(0) as u64;
            let temp_path = self.dir.join(temp_name(ts));
            let record_path = self.dir.join(record_name(ts));

            let file = match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    collision_backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(PersistError::io(&temp_path, e)),
            };

            // The temp name is ours; the final name may still belong to an
            // earlier record from the same millisecond.
            match fs::try_exists(&record_path).await {
                Ok(false) => {}
                Ok(true) => {
                    drop(file);
                    let _ = fs::remove_file(&temp_path).await;
                    collision_backoff(attempt).await;
                    continue;
                }
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(PersistError::io(&record_path, e));
                }
            }

            if let Err(e) = write_record(file, &temp_path, &record_path, payload).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(PersistError::io(&record_path, e));
            }

            info!(
                record = %record_path.display(),
                bytes = payload.len(),
                "payload persisted for retry"
            );
            return Ok(record_path);
        }

        Err(PersistError::NameExhausted {
            dir: self.dir.clone(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Names of all pending records, oldest first.
    pub async fn pending(&self) -> Result<Vec<String>, PersistError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PersistError::io(&self.dir, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistError::io(&self.dir, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(ts) = parse_record_name(&name) {
                records.push((ts, name));
            }
        }

        records.sort();
        Ok(records.into_iter().map(|(_, name)| name).collect())
    }

    /// Number of pending records.
    pub async fn len(&self) -> Result<usize, PersistError> {
        Ok(self.pending().await?.len())
    }

    /// Whether the store holds no pending records.
    pub async fn is_empty(&self) -> Result<bool, PersistError> {
        Ok(self.len().await? == 0)
    }

    /// Attempt redelivery of every pending record, oldest first.
    ///
    /// A record is deleted after `deliver` succeeds and left in place when it
    /// fails. Records removed by a concurrent drain are skipped.
    pub async fn drain_once<F, Fut, E>(&self, mut deliver: F) -> Result<DrainReport, PersistError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let names = self.pending().await?;
        let mut report = DrainReport::default();

        for name in names {
            let path = self.dir.join(&name);

            let payload = match fs::read_to_string(&path).await {
                Ok(payload) => payload,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(record = %name, "record already redelivered");
                    continue;
                }
                Err(e) => {
                    warn!(record = %name, error = %e, "unable to read retry record");
                    report.remaining += 1;
                    continue;
                }
            };

            if payload.trim().is_empty() {
                warn!(record = %name, "skipping empty retry record");
                report.remaining += 1;
                continue;
            }

            if let Err(e) = deliver(payload).await {
                debug!(record = %name, error = %e, "redelivery failed");
                report.failed += 1;
                report.remaining += 1;
                continue;
            }

            report.delivered += 1;
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        record = %name,
                        error = %e,
                        "delivered record could not be removed and will be sent again"
                    );
                    report.remaining += 1;
                }
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            info!(
                dir = %self.dir.display(),
                delivered = report.delivered,
                failed = report.failed,
                remaining = report.remaining,
                "retry drain finished"
            );
        }

        Ok(report)
    }
}

async fn write_record(
    mut file: fs::File,
    temp_path: &Path,
    record_path: &Path,
    payload: &str,
) -> io::Result<()> {
    file.write_all(payload.as_bytes()).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, record_path).await?;

    match record_path.parent() {
        Some(dir) => sync_dir(dir).await,
        None => Ok(()),
    }
}

/// Flush directory metadata so a completed rename survives power loss.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

async fn collision_backoff(attempt: u32) {
    let wait = rand::thread_rng().gen_range(1..=COLLISION_BACKOFF_MAX_MS);
    debug!(attempt, wait_ms = wait, "retry record name collision");
    tokio::time::sleep(Duration::from_millis(wait)).await;
}

fn record_name(ts: u64) -> String {
    format!("{RECORD_PREFIX}{ts}{RECORD_SUFFIX}")
}

fn temp_name(ts: u64) -> String {
    format!("{TEMP_MARKER}{}", record_name(ts))
}

/// Timestamp of a well-formed record name.
fn parse_record_name(name: &str) -> Option<u64> {
    let digits = name
        .strip_prefix(RECORD_PREFIX)?
        .strip_suffix(RECORD_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn store() -> (TempDir, RetryStore) {
        let dir = TempDir::new().unwrap();
        let store = RetryStore::open(dir.path().join("endpoint_0")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_parse_record_name() {
        assert_eq!(parse_record_name("msg1700000000123.txt"), Some(1700000000123));
        assert_eq!(parse_record_name(".msg1700000000123.txt"), None);
        assert_eq!(parse_record_name("msg.txt"), None);
        assert_eq!(parse_record_name("msg12a.txt"), None);
        assert_eq!(parse_record_name("msg123.tmp"), None);
        assert_eq!(parse_record_name("notes.txt"), None);
    }

    #[test]
    fn test_names_share_timestamp() {
        assert_eq!(record_name(42), "msg42.txt");
        assert_eq!(temp_name(42), ".msg42.txt");
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b");
        let store = RetryStore::open(&path).unwrap();
        assert!(path.is_dir());
        assert_eq!(store.dir(), path.as_path());
    }

    #[test]
    fn test_open_rejects_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taken");
        std::fs::write(&path, "x").unwrap();

        assert!(RetryStore::open(&path).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sync_dir_requires_directory() {
        let (dir, store) = store();
        sync_dir(store.dir()).await.unwrap();
        assert!(sync_dir(&dir.path().join("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_write_record_leaves_only_final_name() {
        let (_dir, store) = store();
        let temp_path = store.dir().join(temp_name(7));
        let record_path = store.dir().join(record_name(7));
        let file = fs::File::create(&temp_path).await.unwrap();

        write_record(file, &temp_path, &record_path, "durable").await.unwrap();

        assert!(!temp_path.exists());
        assert_eq!(std::fs::read_to_string(&record_path).unwrap(), "durable");
        assert_eq!(store.pending().await.unwrap(), vec![record_name(7)]);
    }

    #[tokio::test]
    async fn test_enqueue_then_drain_delivers_exact_payload() {
        let (_dir, store) = store();
        let payload = "<smpp>\n<message>caf\u{e9} &amp; more</message>\n</smpp>\n";

        let path = store.enqueue(payload).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.len().await.unwrap(), 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = store
            .drain_once(|p| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(p);
                    Ok::<(), String>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(seen.lock().unwrap().as_slice(), [payload.to_string()]);
        assert!(!path.exists());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_redelivery_keeps_record() {
        let (_dir, store) = store();
        store.enqueue("payload").await.unwrap();

        let report = store
            .drain_once(|_| async { Err::<(), _>("endpoint down") })
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_is_oldest_first_and_ignores_foreign_files() {
        let (_dir, store) = store();
        std::fs::write(store.dir().join("msg1700000000300.txt"), "third").unwrap();
        std::fs::write(store.dir().join("msg1700000000100.txt"), "first").unwrap();
        std::fs::write(store.dir().join("msg1700000000200.txt"), "second").unwrap();
        std::fs::write(store.dir().join(".msg1700000000050.txt"), "in-flight").unwrap();
        std::fs::write(store.dir().join("README"), "ignore me").unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = order.clone();
        let report = store
            .drain_once(|p| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(p);
                    Ok::<(), String>(())
                }
            })
            .await
            .unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert!(store.dir().join(".msg1700000000050.txt").exists());
        assert!(store.dir().join("README").exists());
    }

    #[tokio::test]
    async fn test_empty_record_is_left_in_place() {
        let (_dir, store) = store();
        std::fs::write(store.dir().join("msg1700000000100.txt"), "  \n").unwrap();

        let report = store
            .drain_once(|_| async { Ok::<(), String>(()) })
            .await
            .unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_only_failed_records() {
        let (_dir, store) = store();
        std::fs::write(store.dir().join("msg1700000000100.txt"), "ok-1").unwrap();
        std::fs::write(store.dir().join("msg1700000000200.txt"), "bad").unwrap();
        std::fs::write(store.dir().join("msg1700000000300.txt"), "ok-2").unwrap();

        let report = store
            .drain_once(|p| async move {
                if p == "bad" {
                    Err("rejected".to_string())
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(store.pending().await.unwrap(), vec!["msg1700000000200.txt"]);
    }
}
