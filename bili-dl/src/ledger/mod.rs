//! The download ledger: which `(video, page, quality)` triples are done.
//!
//! The ledger is loaded once, consulted before every job and rewritten in full
//! after every successful one, so a crash loses at most the entry being
//! written. The store is a JSON array; a missing or empty file is an empty
//! history and a corrupted one is reported and replaced on the next write. A
//! store that exists but cannot be read is never overwritten.
//!
//! Writes are small blocking file operations done under the ledger's lock.
//! Jobs driven from one task, as the batch driver does, are fine with that;
//! jobs spawned onto runtime workers would have to move the flush off them.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// The deduplication key of a download.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    /// The video key.
    pub bvid: String,
    /// The content-unit identifier.
    pub cid: i64,
    /// The quality rank.
    pub quality: u32,
}

impl LedgerKey {
    pub fn new(bvid: impl Into<String>, cid: i64, quality: u32) -> Self {
        Self {
            bvid: bvid.into(),
            cid,
            quality,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.bvid, self.cid, self.quality)
    }
}

/// One persisted record. Only the key takes part in equality; the rest is
/// kept for whoever reads the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub key: LedgerKey,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub owner: String,
    /// Completion time, unix seconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl PartialEq for LedgerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for LedgerEntry {}

impl Hash for LedgerEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Records in file order, historical duplicates included.
    entries: Vec<LedgerEntry>,
    completed: HashSet<LedgerKey>,
    in_flight: HashSet<LedgerKey>,
}

/// The outcome of [`Ledger::try_claim`].
#[must_use]
#[derive(Debug)]
pub enum Claim<'a> {
    /// The caller owns the key until the guard is dropped.
    Acquired(ClaimGuard<'a>),
    /// The key is already recorded.
    Completed,
    /// Another worker currently owns the key.
    InFlight,
}

/// Exclusive ownership of a key that is being downloaded.
#[derive(Debug)]
pub struct ClaimGuard<'a> {
    ledger: &'a Ledger,
    key: LedgerKey,
}

impl ClaimGuard<'_> {
    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    /// Records the claimed key and releases the claim.
    pub fn record(self, title: &str, owner: &str) -> Result<(), LedgerError> {
        self.ledger.record(self.key.clone(), title, owner)
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.ledger.state().in_flight.remove(&self.key);
    }
}

/// The persistent set of completed downloads.
///
/// Shared between workers behind an `Arc`; lookups and claims only touch the
/// in-memory set, writes are serialized by the same lock.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    /// `false` when the store exists but could not be read.
    writable: bool,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Loads the ledger stored at `path`.
    ///
    /// Never fails: a missing file, an empty file and a missing directory are
    /// all an empty history, and a store that cannot be parsed is also treated
    /// as empty and replaced on the next record. A store that cannot be read
    /// at all is left alone: the ledger starts empty and records only in
    /// memory for this run. In the latter cases the problem is returned
    /// alongside the ledger so the caller can report it.
    pub fn open(path: impl AsRef<Path>) -> (Self, Option<LedgerError>) {
        let path = path.as_ref().to_path_buf();

        let (entries, writable, error) = match Self::load(&path) {
            Ok(Some(entries)) => (entries, true, None),
            Ok(None) => {
                Self::initialize(&path);
                (Vec::new(), true, None)
            }
            Err(error @ LedgerError::Corrupt { .. }) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Resetting download history: {}", error);

                (Vec::new(), true, Some(error))
            }
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Download history is not saved during this run: {}", error);

                (Vec::new(), false, Some(error))
            }
        };

        let completed = entries.iter().map(|entry| entry.key.clone()).collect();
        let ledger = Self {
            path,
            writable,
            state: Mutex::new(LedgerState {
                entries,
                completed,
                in_flight: HashSet::new(),
            }),
        };

        (ledger, error)
    }

    /// Reads the store; `None` when there is no file yet.
    fn load(path: &Path) -> Result<Option<Vec<LedgerEntry>>, LedgerError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LedgerError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Some(Vec::new()));
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| LedgerError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes an empty store so the file exists from the first run on.
    fn initialize(path: &Path) {
        if let Err(_e) = write_atomically(path, b"[]") {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to create download history {:?}: {}", path, _e);
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The path of the backing store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The number of distinct completed keys.
    pub fn len(&self) -> usize {
        self.state().completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the key is recorded. Never touches the store.
    pub fn contains(&self, key: &LedgerKey) -> bool {
        self.state().completed.contains(key)
    }

    /// Atomically checks the key and, if it is neither recorded nor being
    /// downloaded, claims it for the caller.
    pub fn try_claim(&self, key: LedgerKey) -> Claim<'_> {
        let mut state = self.state();
        if state.completed.contains(&key) {
            return Claim::Completed;
        }
        if !state.in_flight.insert(key.clone()) {
            return Claim::InFlight;
        }
        drop(state);

        Claim::Acquired(ClaimGuard { ledger: self, key })
    }

    /// Records a completed download and rewrites the store.
    ///
    /// Recording a key twice is a no-op. The key stays in memory even if the
    /// write fails, the error is returned for reporting. When the store could
    /// not be read on open, nothing is written.
    ///
    /// The rewrite blocks the calling thread while holding the ledger's lock.
    pub fn record(&self, key: LedgerKey, title: &str, owner: &str) -> Result<(), LedgerError> {
        let mut state = self.state();
        if !state.completed.insert(key.clone()) {
            return Ok(());
        }

        if !self.writable {
            #[cfg(feature = "tracing")]
            tracing::warn!("Not saving {} to the unreadable download history {:?}", key, self.path);

            return Ok(());
        }

        state.entries.push(LedgerEntry {
            key,
            title: title.to_string(),
            owner: owner.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        });

        // Flushing under the lock keeps concurrent rewrites in order.
        let bytes = serde_json::to_vec_pretty(&state.entries)?;
        write_atomically(&self.path, &bytes).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    /// A copy of the persisted records, in file order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state().entries.clone()
    }
}

/// Writes to a sibling temporary file and renames it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    crate::utils::file_system::create_parent_dir(path)?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));

    if let Err(e) = std::fs::write(&temp, bytes).and_then(|()| std::fs::rename(&temp, path)) {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(cid: i64) -> LedgerKey {
        LedgerKey::new("BV1xx411c7mD", cid, 80)
    }

    #[test]
    fn missing_file_and_directory_are_empty_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");

        let (ledger, error) = Ledger::open(&path);
        assert!(error.is_none());
        assert!(ledger.is_empty());
        // The store is initialised for the next run.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn empty_file_is_empty_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "  \n").unwrap();

        let (ledger, error) = Ledger::open(&path);
        assert!(error.is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn loads_legacy_records_without_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(
            &path,
            r#"[{"bvid": "BV1xx411c7mD", "cid": 1, "quality": 80, "title": "t", "timestamp": 1700000000},
                {"bvid": "BV1xx411c7mD", "cid": 1, "quality": 80, "title": "t", "timestamp": 1700000001}]"#,
        )
        .unwrap();

        let (ledger, error) = Ledger::open(&path);
        assert!(error.is_none());
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(&key(1)));
        assert!(!ledger.contains(&LedgerKey::new("BV1xx411c7mD", 1, 64)));
    }

    #[test]
    fn corrupted_store_resets_and_recovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "[{\"bvid\": ").unwrap();

        let (ledger, error) = Ledger::open(&path);
        assert!(matches!(error, Some(LedgerError::Corrupt { .. })));
        assert!(ledger.is_empty());

        ledger.record(key(1), "title", "owner").unwrap();
        ledger.record(key(2), "title", "owner").unwrap();

        let (reloaded, error) = Ledger::open(&path);
        assert!(error.is_none());
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.entries()[0].owner, "owner");
    }

    #[test]
    fn unreadable_store_is_never_overwritten() {
        let dir = tempdir().unwrap();
        // Reading a directory fails without the store being corrupt.
        let path = dir.path().join("history.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let (ledger, error) = Ledger::open(&path);
        assert!(matches!(error, Some(LedgerError::Io { .. })));
        assert!(ledger.is_empty());

        ledger.record(key(1), "title", "owner").unwrap();

        assert!(ledger.contains(&key(1)));
        assert!(path.is_dir());
        assert_eq!(std::fs::read(path.join("keep")).unwrap(), b"x");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn recording_twice_is_a_no_op() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let (ledger, _) = Ledger::open(&path);

        ledger.record(key(1), "a", "b").unwrap();
        ledger.record(key(1), "a", "b").unwrap();

        assert_eq!(ledger.entries().len(), 1);
        let stored: Vec<LedgerEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn metadata_does_not_take_part_in_equality() {
        let a = LedgerEntry {
            key: key(1),
            title: "one".into(),
            owner: "x".into(),
            timestamp: 1,
        };
        let b = LedgerEntry {
            key: key(1),
            title: "two".into(),
            owner: "y".into(),
            timestamp: 2,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn claims_are_exclusive_until_released() {
        let dir = tempdir().unwrap();
        let (ledger, _) = Ledger::open(dir.path().join("history.json"));

        let Claim::Acquired(guard) = ledger.try_claim(key(1)) else {
            panic!("first claim must succeed");
        };
        assert!(matches!(ledger.try_claim(key(1)), Claim::InFlight));
        assert!(matches!(ledger.try_claim(key(2)), Claim::Acquired(_)));

        drop(guard);
        let Claim::Acquired(guard) = ledger.try_claim(key(1)) else {
            panic!("released claim must be available again");
        };
        guard.record("t", "o").unwrap();

        assert!(matches!(ledger.try_claim(key(1)), Claim::Completed));
    }

    #[test]
    fn concurrent_records_all_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let (ledger, _) = Ledger::open(&path);

        std::thread::scope(|scope| {
            for cid in 0..16 {
                let ledger = &ledger;
                scope.spawn(move || ledger.record(key(cid), "t", "o").unwrap());
            }
        });

        let (reloaded, error) = Ledger::open(&path);
        assert!(error.is_none());
        assert_eq!(reloaded.len(), 16);
    }
}
