//! The boundary this core exposes to a venv/package-manager plugin
//! (explicitly out of scope per spec.md §1): resolving external package
//! versions, and the extra globs/consts/since globs/runnable deps an
//! environment contributes to every runnable scoped to it.
//!
//! Grounded on `qik/venv.py` (base `Venv`) and `qik/uv/venv.py` (`UVVenv`,
//! which adds `glob_deps`/`since_deps`/`runnable_deps`/`version`).

use std::collections::BTreeMap;

use crate::dep::Runnable as RunnableDep;

/// A resolved environment (virtual env, toolchain install, ...) that a
/// [`crate::runnable::Runnable`] executes within.
pub trait Environment: Send + Sync {
    /// Stable name, used in cache keys and log lines.
    fn name(&self) -> &str;

    /// Resolve `package` to its currently-installed version, or `None` if
    /// the environment doesn't have it installed.
    fn version(&self, package: &str) -> Option<String>;

    /// Base environment variables a shell-mode runnable inherits.
    fn base_environ(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Extra glob patterns this environment contributes (lock files,
    /// `.env` files, install markers).
    fn glob_deps(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra constant-value deps this environment contributes.
    fn const_deps(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra `since` globs (may differ from `glob_deps` — e.g. a lock file
    /// that should trigger `--since` diffing but isn't watched directly).
    fn since_deps(&self) -> Vec<String> {
        Vec::new()
    }

    /// Extra runnable deps contributed by the environment (e.g. "install
    /// the environment" is a strict dependency of anything run inside it).
    fn runnable_deps(&self) -> Vec<RunnableDep> {
        Vec::new()
    }
}

/// The default environment for standalone use and tests: declares nothing,
/// resolves no packages. Equivalent to qik's bare `Venv` with no configured
/// lock file.
#[derive(Debug, Default, Clone)]
pub struct NullEnvironment {
    name: String,
}

impl NullEnvironment {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Environment for NullEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self, _package: &str) -> Option<String> {
        None
    }
}

/// A fixed-table environment useful for tests: resolves packages from a
/// fixed map instead of an actual toolchain.
#[derive(Debug, Default, Clone)]
pub struct FixedEnvironment {
    name: String,
    versions: BTreeMap<String, String>,
}

impl FixedEnvironment {
    pub fn new(name: impl Into<String>, versions: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            versions,
        }
    }
}

impl Environment for FixedEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self, package: &str) -> Option<String> {
        self.versions.get(package).cloned()
    }
}
