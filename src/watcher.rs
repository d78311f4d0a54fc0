//! C9 — `--watch`: a debounced filesystem watcher that accumulates changed
//! paths and wakes the scheduler once the workspace has been quiet for a
//! short window, so a save-all in an editor triggers one run instead of
//! one per file. Grounded on `qik/watcher.py` and
//! `turborepo-filewatch/src/debouncer.rs` (the `notify` + debounce pairing).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::Notify;

/// How long the workspace must be quiet before a batch of changes fires.
/// qik's default is 100ms; kept as a constant rather than configurable
/// since no config surface asks for it.
const DEBOUNCE: Duration = Duration::from_millis(100);

/// A package manager's distribution-metadata directory, e.g.
/// `requests-2.31.0.dist-info`. Matched against a single path component's
/// file name so callers don't need to know the install layout above it.
static DIST_INFO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9_.\-]+?)-[0-9][^-]*\.dist-info$").unwrap());

/// If `path`'s final component is a distribution-metadata directory, the
/// distribution name it names (underscores folded to hyphens, lowercased,
/// matching how `Dep::Pydist` names are normally written).
fn distribution_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let captures = DIST_INFO.captures(file_name)?;
    Some(captures[1].replace('_', "-").to_ascii_lowercase())
}

/// Shared between the `notify` callback thread and the async debounce
/// loop: accumulated changed paths, accumulated newly-installed
/// distribution names, and a wakeup signal.
#[derive(Default)]
struct Pending {
    paths: Mutex<BTreeSet<PathBuf>>,
    pydists: Mutex<BTreeSet<String>>,
    notify: Notify,
}

pub struct DebouncedWatcher {
    _inner: RecommendedWatcher,
    pending: Arc<Pending>,
    config_path: PathBuf,
}

/// One batch of changes surfaced to the caller.
pub enum Event {
    Changed {
        paths: BTreeSet<PathBuf>,
        /// Distributions whose metadata directory was created during this
        /// batch — an install, not an edit — so `Dep::Pydist` deps can be
        /// matched by name instead of by path glob.
        pydists: BTreeSet<String>,
    },
    /// The root configuration file itself changed — callers should reload
    /// configuration and rebuild the graph/registries rather than just
    /// re-scheduling, since command/dep declarations may have changed.
    ConfigChanged,
}

impl DebouncedWatcher {
    pub fn new(root: &Path, config_path: &Path) -> notify::Result<Self> {
        let pending = Arc::new(Pending::default());
        let callback_pending = pending.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            let is_create = matches!(event.kind, EventKind::Create(_));

            let mut paths = callback_pending.paths.lock();
            let mut pydists = callback_pending.pydists.lock();
            for path in event.paths {
                if is_create {
                    if let Some(name) = distribution_name(&path) {
                        pydists.insert(name);
                        continue;
                    }
                }
                paths.insert(path);
            }
            drop(paths);
            drop(pydists);
            callback_pending.notify.notify_one();
        })?;

        watcher.watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            _inner: watcher,
            pending,
            config_path: config_path.to_path_buf(),
        })
    }

    /// Wait for the next debounced batch. Never returns an empty batch:
    /// blocks until at least one change has settled.
    pub async fn next_event(&self) -> Event {
        loop {
            self.pending.notify.notified().await;

            // Keep draining/resetting the debounce window as long as new
            // events keep arriving within it.
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(DEBOUNCE) => break,
                    _ = self.pending.notify.notified() => continue,
                }
            }

            let paths: BTreeSet<PathBuf> = std::mem::take(&mut *self.pending.paths.lock());
            let pydists: BTreeSet<String> = std::mem::take(&mut *self.pending.pydists.lock());
            if paths.is_empty() && pydists.is_empty() {
                continue;
            }

            if paths.iter().any(|p| p == &self.config_path) {
                return Event::ConfigChanged;
            }
            return Event::Changed { paths, pydists };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_constant_is_short() {
        assert!(DEBOUNCE < Duration::from_secs(1));
    }

    #[test]
    fn distribution_name_matches_dist_info_directory() {
        let path = Path::new("/venv/lib/python3.12/site-packages/requests-2.31.0.dist-info");
        assert_eq!(distribution_name(path), Some("requests".to_string()));
    }

    #[test]
    fn distribution_name_folds_underscores_to_hyphens() {
        let path = Path::new("/venv/site-packages/typing_extensions-4.9.0.dist-info");
        assert_eq!(distribution_name(path), Some("typing-extensions".to_string()));
    }

    #[test]
    fn distribution_name_ignores_non_dist_info_paths() {
        let path = Path::new("/project/src/main.py");
        assert_eq!(distribution_name(path), None);
    }
}
