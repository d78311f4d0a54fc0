//! The `repo` backend: entries live under a publicly-versioned directory
//! and are staged into the VCS index on `post_set` so they land in commits.
//! Installs a custom merge driver and a VCS attributes entry so cache files
//! render as "generated" in diffs/reviews. Grounded on `qik/cache.py::Repo`.

use std::path::PathBuf;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::runnable::Runnable;

use super::{artifact_name, Cache, Manifest};

/// Serializes all VCS index manipulation across `set` calls in this
/// process, matching spec.md §5's "exclusive lock" shared-resource note.
static VCS_INDEX_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct RepoCache {
    pub_work_dir: PathBuf,
    project_root: PathBuf,
}

impl RepoCache {
    pub fn new(pub_work_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            pub_work_dir: pub_work_dir.into(),
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

    fn stage(&self, repo: &git2::Repository, paths: &[PathBuf]) {
        if let Ok(mut index) = repo.index() {
            for path in paths {
                if let Ok(rel) = path.strip_prefix(repo.workdir().unwrap_or(&self.project_root)) {
                    let _ = index.add_path(rel);
                }
            }
            let _ = index.write();
        }
    }

    fn install_merge_driver(&self, repo: &git2::Repository) {
        if let Ok(mut cfg) = repo.config() {
            let _ = cfg.set_str(
                "merge.bramble.driver",
                "bramble-cache-merge %O %A %B",
            );
        }
    }

    fn mark_generated_in_attributes(&self) {
        let git_root = self
            .project_root
            .ancestors()
            .find(|p| p.join(".git").exists())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.project_root.clone());

        let rel = self
            .pub_work_dir
            .strip_prefix(&git_root)
            .unwrap_or(&self.pub_work_dir)
            .to_string_lossy()
            .into_owned();
        let attrs_line = format!("{rel}/**/* linguist-generated=true merge=bramble\n");

        let attrs_path = git_root.join(".gitattributes");
        let existing = std::fs::read_to_string(&attrs_path).unwrap_or_default();
        if !existing.contains(&attrs_line) {
            let _ = std::fs::write(&attrs_path, format!("{attrs_line}{existing}"));
        }
    }
}

#[async_trait::async_trait]
impl Cache for RepoCache {
    fn kind(&self) -> &'static str {
        "repo"
    }

    fn base_path(&self, runnable: &Runnable, _hash: &str) -> PathBuf {
        self.pub_work_dir.join("cache").join(&runnable.cmd)
    }

    fn restore_artifacts(&self, runnable: &Runnable, hash: &str, artifacts: &[String]) {
        let base = self.base_path(runnable, hash);
        for artifact in artifacts {
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

    async fn post_set(&self, runnable: &Runnable, hash: &str, manifest: &Manifest) {
        let Ok(repo) = git2::Repository::discover(&self.project_root) else {
            return;
        };

        let _guard = VCS_INDEX_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let mut staged = vec![self.manifest_path(runnable, hash)];
        if manifest.log.is_some() {
            staged.push(self.log_path(runnable, hash));
        }
        let base = self.base_path(runnable, hash);
        for artifact in &manifest.artifacts {
            staged.push(base.join(artifact_name(artifact)));
        }

        self.stage(&repo, &staged);
        self.mark_generated_in_attributes();
        self.install_merge_driver(&repo);
    }
}
