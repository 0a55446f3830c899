//! Filesystem job store.
//!
//! Each job is one JSON file in the queue directory. A pending job is named
//! by its id; claiming renames it to `<id>.lock`. Rename within a directory
//! is atomic, so exactly one of several concurrent claimers wins.

use async_trait::async_trait;
use buildq_core::queue::CLAIMED_SUFFIX;
use buildq_core::{Error, JobDescriptor, JobId, JobState, JobStore, Result};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Prefix of in-progress writes. Never parses as a job id.
const TEMP_PREFIX: &str = ".tmp";

/// Attempts at finding an unused id before giving up.
const ENQUEUE_ATTEMPTS: usize = 3;

/// Job store backed by a directory.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    dir: PathBuf,
}

impl FsJobStore {
    /// Open the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn pending_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    fn claimed_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}{}", id, CLAIMED_SUFFIX))
    }

    fn write_new(dir: &Path, data: &[u8]) -> Result<JobId> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o664))?;

        for _ in 0..ENQUEUE_ATTEMPTS {
            let id = JobId::new();
            match tmp.persist_noclobber(dir.join(id.as_str())) {
                Ok(_) => return Ok(id),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
                Err(e) => return Err(e.error.into()),
            }
        }

        Err(Error::Conflict(format!(
            "no unused job id after {} attempts",
            ENQUEUE_ATTEMPTS
        )))
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn enqueue(&self, job: &JobDescriptor) -> Result<JobId> {
        let data = job
            .to_json()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let dir = self.dir.clone();

        let id = tokio::task::spawn_blocking(move || Self::write_new(&dir, data.as_bytes()))
            .await
            .map_err(|e| Error::Internal(format!("enqueue task failed: {}", e)))??;

        info!(
            job_id = %id,
            repository = %job.repository,
            git_ref = %job.git_ref,
            commit = %job.commit_id,
            "Enqueued build"
        );
        Ok(id)
    }

    async fn reset_stale(&self) -> Result<usize> {
        let stale = self.list(JobState::Claimed).await?;
        for id in &stale {
            tokio::fs::rename(self.claimed_path(id), self.pending_path(id)).await?;
            info!(job_id = %id, "Reset stale claim");
        }
        Ok(stale.len())
    }

    async fn list(&self, state: JobState) -> Result<Vec<JobId>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let id = match state {
                JobState::Pending => JobId::parse(name),
                JobState::Claimed => name.strip_suffix(CLAIMED_SUFFIX).and_then(JobId::parse),
            };
            if let Some(id) = id {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn claim(&self, id: &JobId) -> Result<bool> {
        match tokio::fs::rename(self.pending_path(id), self.claimed_path(id)).await {
            Ok(()) => {
                debug!(job_id = %id, "Claimed job");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(job_id = %id, "Job already claimed elsewhere");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load(&self, id: &JobId) -> Result<JobDescriptor> {
        let data = match tokio::fs::read(self.claimed_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("claimed job {}", id)));
            }
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8(data)
            .map_err(|e| Error::InvalidInput(format!("job {}: {}", id, e)))?;
        JobDescriptor::from_json(&text)
            .map_err(|e| Error::InvalidInput(format!("job {}: {}", id, e)))
    }

    async fn remove(&self, id: &JobId) -> Result<()> {
        let path = self.claimed_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::IsADirectory => {
                tokio::fs::remove_dir_all(&path).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(repository: &str) -> JobDescriptor {
        JobDescriptor::new(repository, "refs/heads/main", "abc123", "A", "a@x.com")
    }

    async fn store() -> (tempfile::TempDir, FsJobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsJobStore::open(dir.path().join("queue")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let (_dir, store) = store().await;
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn test_enqueue_writes_pending_entry() {
        let (_dir, store) = store().await;
        let id = store.enqueue(&job("amp_mgms")).await.unwrap();

        assert_eq!(store.list(JobState::Pending).await.unwrap(), vec![id.clone()]);
        assert!(store.list(JobState::Claimed).await.unwrap().is_empty());

        let raw = std::fs::read_to_string(store.dir().join(id.as_str())).unwrap();
        assert_eq!(JobDescriptor::from_json(&raw).unwrap(), job("amp_mgms"));
    }

    #[tokio::test]
    async fn test_enqueue_leaves_no_temp_files() {
        let (_dir, store) = store().await;
        for _ in 0..5 {
            store.enqueue(&job("amp_mgms")).await.unwrap();
        }
        let names: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|n| n.starts_with("build-")));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_ignores_foreign_files() {
        let (_dir, store) = store().await;
        let a = store.enqueue(&job("a")).await.unwrap();
        let b = store.enqueue(&job("b")).await.unwrap();
        let c = store.enqueue(&job("c")).await.unwrap();
        std::fs::write(store.dir().join("lock"), "1\n").unwrap();
        std::fs::write(store.dir().join(".tmpXYZ"), "{").unwrap();
        std::fs::write(store.dir().join("README"), "").unwrap();

        assert_eq!(store.list(JobState::Pending).await.unwrap(), vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_claim_load_remove() {
        let (_dir, store) = store().await;
        let id = store.enqueue(&job("amp_mgms")).await.unwrap();

        assert!(store.claim(&id).await.unwrap());
        assert!(store.list(JobState::Pending).await.unwrap().is_empty());
        assert_eq!(store.list(JobState::Claimed).await.unwrap(), vec![id.clone()]);
        assert!(store.dir().join(format!("{}.lock", id)).exists());

        assert_eq!(store.load(&id).await.unwrap(), job("amp_mgms"));

        store.remove(&id).await.unwrap();
        assert!(store.list(JobState::Claimed).await.unwrap().is_empty());
        store.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (_dir, store) = store().await;
        let id = store.enqueue(&job("amp_mgms")).await.unwrap();

        let (a, b) = tokio::join!(store.claim(&id), store.claim(&id));
        let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_claim_missing_is_false() {
        let (_dir, store) = store().await;
        let id = JobId::new();
        assert!(!store.claim(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_stale() {
        let (_dir, store) = store().await;
        let a = store.enqueue(&job("a")).await.unwrap();
        let b = store.enqueue(&job("b")).await.unwrap();
        store.claim(&a).await.unwrap();

        assert_eq!(store.reset_stale().await.unwrap(), 1);
        assert_eq!(store.list(JobState::Pending).await.unwrap(), vec![a, b]);
        assert!(store.list(JobState::Claimed).await.unwrap().is_empty());
        assert_eq!(store.reset_stale().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_malformed_is_invalid_input() {
        let (_dir, store) = store().await;
        let id = JobId::new();
        std::fs::write(store.dir().join(id.as_str()), "{not json").unwrap();

        assert!(store.claim(&id).await.unwrap());
        assert!(matches!(store.load(&id).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_load_missing_fields_is_invalid_input() {
        let (_dir, store) = store().await;
        let id = JobId::new();
        std::fs::write(store.dir().join(id.as_str()), r#"{"repository": "x"}"#).unwrap();

        assert!(store.claim(&id).await.unwrap());
        assert!(matches!(store.load(&id).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_load_unclaimed_is_not_found() {
        let (_dir, store) = store().await;
        let id = store.enqueue(&job("a")).await.unwrap();
        assert!(matches!(store.load(&id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_directory_entry() {
        let (_dir, store) = store().await;
        let id = JobId::new();
        std::fs::create_dir(store.dir().join(id.as_str())).unwrap();

        assert!(store.claim(&id).await.unwrap());
        assert!(matches!(store.load(&id).await, Err(Error::Io(_))));
        store.remove(&id).await.unwrap();
        assert!(store.list(JobState::Claimed).await.unwrap().is_empty());
    }
}
