//! The `local` backend: entries live under a private, VCS-ignored
//! directory. Artifacts are copied under an opaque base64url-encoded name.
//! Grounded on `qik/cache.py::Local`.

use std::path::{Path, PathBuf};

use crate::runnable::Runnable;

use super::{artifact_name, Cache};

pub struct LocalCache {
    priv_work_dir: PathBuf,
    project_root: PathBuf,
}

impl LocalCache {
    pub fn new(priv_work_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        let priv_work_dir = priv_work_dir.into();
        ensure_gitignore(&priv_work_dir);
        Self {
            priv_work_dir,
            project_root: project_root.into(),
        }
    }

    fn walk_artifacts(&self, runnable: &Runnable) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for pattern in &runnable.artifacts {
            if let Ok(glob) = wax::Glob::new(pattern) {
                for entry in glob.walk(&self.project_root).flatten() {
                    out.push(entry.path().to_path_buf());
                }
            }
        }
        out
    }
}

/// Write a `.gitignore` on first use of the private cache directory so it
/// is excluded from VCS without requiring the user to configure it.
fn ensure_gitignore(dir: &Path) {
    let _ = std::fs::create_dir_all(dir);
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        let _ = std::fs::write(&gitignore, "*\n");
    }
}

#[async_trait::async_trait]
impl Cache for LocalCache {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn base_path(&self, runnable: &Runnable, _hash: &str) -> PathBuf {
        self.priv_work_dir.join("cache").join(&runnable.cmd)
    }

    fn restore_artifacts(&self, runnable: &Runnable, hash: &str, artifacts: &[String]) {
        let base = self.base_path(runnable, hash);
        let mut seen = std::collections::BTreeSet::new();
        for artifact in artifacts {
            if !seen.insert(artifact.clone()) {
                continue;
            }
            let src = base.join(artifact_name(artifact));
            let dest = self.project_root.join(artifact);
            if let Some(parent) = dest.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let _ = std::fs::copy(&src, &dest);
        }
    }

    fn import_artifacts(&self, runnable: &Runnable, hash: &str) -> Vec<String> {
        let base = self.base_path(runnable, hash);
        let _ = std::fs::create_dir_all(&base);
        let mut artifacts = Vec::new();
        for path in self.walk_artifacts(runnable) {
            let rel = path
                .strip_prefix(&self.project_root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            let dest = base.join(artifact_name(&rel));
            if std::fs::copy(&path, &dest).is_ok() {
                artifacts.push(rel);
            }
        }
        artifacts
    }
}
