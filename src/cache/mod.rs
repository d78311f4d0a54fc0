//! C4 — the cache backend contract and the four concrete backends.
//!
//! Grounded on `qik/cache.py` (`Cache`/`Repo`/`Local`/`Uncached`) and
//! `examples/original_source/qik/s3/cache.py` (the remote object-store
//! backend layered on the local one).

mod local;
mod remote;
mod repo;
mod uncached;

pub use local::LocalCache;
pub use remote::RemoteCache;
pub use repo::RepoCache;
pub use uncached::UncachedCache;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::runnable::{Result as RunResult, Runnable};

/// The persisted cache entry: what `set` writes and `get` reads back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub hash: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// The in-memory result of a cache hit: the manifest plus the restored log
/// text (artifacts, if requested, are restored as a side effect of `get`).
#[derive(Debug, Clone)]
pub struct Entry {
    pub manifest: Manifest,
    pub log: Option<String>,
}

/// Errors a cache backend can raise. These are operational (I/O, transport)
/// and distinct from the [`crate::error`] taxonomy, which governs runner vs
/// runnable failure semantics.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize cache manifest: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("remote object transfer failed: {0}")]
    Remote(String),
}

/// Abstract get/set of `(Manifest, log, artifacts)` keyed by
/// `(runnable, fingerprint)`. See spec.md §4.4.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Backend type name, used for `--cache` filtering and error messages.
    fn kind(&self) -> &'static str;

    /// Root directory this backend stores entries under for `runnable`.
    fn base_path(&self, runnable: &Runnable, hash: &str) -> PathBuf;

    fn manifest_path(&self, runnable: &Runnable, hash: &str) -> PathBuf {
        self.base_path(runnable, hash).join(format!("{}.json", runnable.slug()))
    }

    fn log_path(&self, runnable: &Runnable, hash: &str) -> PathBuf {
        self.base_path(runnable, hash).join(format!("{}.out", runnable.slug()))
    }

    /// Extension point invoked before reading the manifest (e.g. nothing
    /// for local backends; a no-op placeholder for symmetry with `on_miss`).
    async fn pre_get(&self, _runnable: &Runnable, _hash: &str) {}

    /// Extension point invoked when the manifest read misses. Remote
    /// backends use this to fetch the entry's prefix before retrying.
    async fn on_miss(&self, _runnable: &Runnable, _hash: &str) -> Result<(), CacheError> {
        Err(CacheError::Remote("on_miss not supported".into()))
    }

    /// Extension point invoked after a successful `set`. Remote backends
    /// use this to upload; the VCS backend stages files into the index.
    async fn post_set(&self, _runnable: &Runnable, _hash: &str, _manifest: &Manifest) {}

    /// Copy artifact files from the cache dir to their declared
    /// project-relative locations. Idempotent: calling twice with the same
    /// manifest must be a no-op on disk content.
    fn restore_artifacts(&self, runnable: &Runnable, hash: &str, artifacts: &[String]);

    /// Copy produced artifact files into the cache dir under opaque names,
    /// returning the list of project-relative paths actually captured.
    fn import_artifacts(&self, runnable: &Runnable, hash: &str) -> Vec<String>;

    /// Read the manifest, verify `manifest.hash == hash` (guards against
    /// races/tampering), and restore artifacts if requested. Misses invoke
    /// `on_miss` and retry exactly once — the retry-once pattern is load
    /// bearing for remote-miss -> download -> parse sequences under
    /// concurrent backends.
    async fn get(&self, runnable: &Runnable, hash: &str, artifacts: bool) -> Option<Entry> {
        self.pre_get(runnable, hash).await;

        if let Some(entry) = self.read_entry(runnable, hash, artifacts) {
            return Some(entry);
        }

        if self.on_miss(runnable, hash).await.is_ok() {
            if let Some(entry) = self.read_entry(runnable, hash, artifacts) {
                return Some(entry);
            }
        }

        None
    }

    /// Synchronous manifest read, used by both attempts inside `get`.
    fn read_entry(&self, runnable: &Runnable, hash: &str, artifacts: bool) -> Option<Entry> {
        let manifest_path = self.manifest_path(runnable, hash);
        let bytes = std::fs::read(&manifest_path).ok()?;
        let manifest: Manifest = serde_json::from_slice(&bytes).ok()?;
        if manifest.hash != hash {
            return None;
        }

        let log = match &manifest.log {
            Some(name) => {
                std::fs::read_to_string(self.base_path(runnable, hash).join(name)).ok()
            }
            None => None,
        };

        if artifacts {
            self.restore_artifacts(runnable, hash, &manifest.artifacts);
        }

        Some(Entry { manifest, log })
    }

    /// Persist `result`: write the manifest, the log (if any), import
    /// artifacts, and invoke `post_set`.
    async fn set(&self, runnable: &Runnable, result: &RunResult) {
        let artifacts = self.import_artifacts(runnable, &result.hash);
        let log_name = result.log.as_ref().map(|_| format!("{}.out", runnable.slug()));

        let manifest = Manifest {
            name: runnable.name.clone(),
            hash: result.hash.clone(),
            code: result.code,
            log: log_name.clone(),
            artifacts,
        };

        let base = self.base_path(runnable, &result.hash);
        let _ = std::fs::create_dir_all(&base);
        let _ = std::fs::write(
            self.manifest_path(runnable, &result.hash),
            serde_json::to_vec_pretty(&manifest).unwrap_or_default(),
        );

        if let (Some(log), Some(_name)) = (&result.log, &log_name) {
            let _ = std::fs::write(self.log_path(runnable, &result.hash), log);
        }

        self.post_set(runnable, &result.hash, &manifest).await;
    }
}

/// `artifact-<base64url(project_relative_path)>` — the opaque filename an
/// artifact is stored under inside a cache entry directory.
pub fn artifact_name(path: &str) -> String {
    use base64::Engine;
    format!(
        "artifact-{}",
        base64::engine::general_purpose::URL_SAFE.encode(path.as_bytes())
    )
}
