//! Atomic single-file snapshot of the monitored-domain registry.
//!
//! Grounded on the "temp path in the same directory, fsync, rename over the
//! canonical path" write protocol and `state.corrupt.<timestamp>`
//! quarantine-on-read-failure behaviour; generalises `empath-spool`'s
//! per-message backing store into a single whole-registry document, since
//! the registry here is small enough that there is no benefit to
//! per-message file layout.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use domainwatch_common::Domain;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{error, info, warn};

use crate::error::Result;

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    domains: Vec<Domain>,
}

/// Loads and persists the registry as a single JSON document under
/// `STATE_DIR`. The rate limiter and in-flight set are reconstructed on
/// boot and are never part of the snapshot.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn canonical_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_FILE}.tmp"))
    }

    /// Loads the snapshot, if any. A missing file starts empty. A malformed
    /// file is moved aside to `state.corrupt.<unix_ts>` and logged as an
    /// error; the store still starts empty rather than aborting startup.
    pub async fn load(&self) -> Result<Vec<Domain>> {
        let path = self.canonical_path();
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "store: no snapshot found, starting empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(snapshot) => {
                info!(count = snapshot.domains.len(), "store: loaded snapshot");
                Ok(snapshot.domains)
            }
            Err(err) => {
                error!(error = %err, "store: snapshot corrupt, quarantining");
                self.quarantine(&path).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn quarantine(&self, path: &Path) -> Result<()> {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let dest = self.dir.join(format!("state.corrupt.{ts}"));
        fs::rename(path, &dest).await?;
        warn!(dest = %dest.display(), "store: corrupt snapshot moved aside");
        Ok(())
    }

    /// Atomically writes `domains` to the canonical snapshot path: write to
    /// a temp file in the same directory, fsync, then rename over the
    /// canonical path so a concurrent reader never observes a partial file.
    pub async fn save(&self, domains: &[Domain]) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let body = serde_json::to_vec_pretty(&Snapshot { domains: domains.to_vec() })?;

        let temp = self.temp_path();
        let file = fs::File::create(&temp).await?;
        {
            use tokio::io::AsyncWriteExt;
            let mut file = file;
            file.write_all(&body).await?;
            file.sync_all().await?;
        }

        fs::rename(&temp, self.canonical_path()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[tokio::test]
    async fn missing_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let domains = store.load().await.unwrap();
        assert!(domains.is_empty());
    }

    #[tokio::test]
    async fn round_trips_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let domains = vec![Domain::new("example.com", true, SystemTime::now())];
        store.save(&domains).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "example.com");
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_quarantined_and_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        fs::write(store.canonical_path(), b"not json").await.unwrap();

        let domains = store.load().await.unwrap();
        assert!(domains.is_empty());

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        let mut saw_quarantine = false;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            if entry.file_name().to_string_lossy().starts_with("state.corrupt.") {
                saw_quarantine = true;
            }
        }
        assert!(saw_quarantine);
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&[Domain::new("a.com", false, SystemTime::now())]).await.unwrap();
        store.save(&[Domain::new("b.com", false, SystemTime::now())]).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "b.com");
    }
}
