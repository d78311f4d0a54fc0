//! The `none` backend: every operation is a no-op, so every run misses.
//! Grounded on `qik/cache.py::Uncached`.

use std::path::PathBuf;

use crate::runnable::{Result as RunResult, Runnable};

use super::{Cache, Entry};

#[derive(Debug, Default, Clone, Copy)]
pub struct UncachedCache;

#[async_trait::async_trait]
impl Cache for UncachedCache {
    fn kind(&self) -> &'static str {
        "none"
    }

    fn base_path(&self, _runnable: &Runnable, _hash: &str) -> PathBuf {
        PathBuf::new()
    }

    fn restore_artifacts(&self, _runnable: &Runnable, _hash: &str, _artifacts: &[String]) {}

    fn import_artifacts(&self, _runnable: &Runnable, _hash: &str) -> Vec<String> {
        Vec::new()
    }

    async fn get(&self, _runnable: &Runnable, _hash: &str, _artifacts: bool) -> Option<Entry> {
        None
    }

    fn read_entry(&self, _runnable: &Runnable, _hash: &str, _artifacts: bool) -> Option<Entry> {
        None
    }

    async fn set(&self, _runnable: &Runnable, _result: &RunResult) {}
}
