//! C10 — scoped accessors for "what is the current runnable/worker" plus
//! the two memoization registries callables can stash state in. Grounded on
//! `qik/ctx.py`, which exposes the same pair of caches (one cleared between
//! runs, one kept process-lifetime) via module-level globals; here they are
//! explicit fields on a [`Context`] handed to callables instead of thread
//! locals, since ownership/cycles matter more in Rust than in the original.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// Type-erased memoization slot. Callables downcast through `Any`; a wrong
/// downcast is a caller bug, not a runtime condition worth modeling as an
/// error.
type Slot = Arc<dyn Any + Send + Sync>;

/// Cleared at the start of every [`crate::scheduler`] run. Use for state
/// that's only valid for the lifetime of one invocation (e.g. a resolved
/// tool path that might differ between `--watch` iterations).
#[derive(Default)]
pub struct PerRunCache {
    slots: DashMap<String, Slot>,
}

impl PerRunCache {
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.slots
            .get(key)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Arc::new(value));
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

/// Never cleared: lives for the process lifetime. Use for state expensive
/// to recompute across watch iterations (e.g. a parsed lock file).
#[derive(Default)]
pub struct PermanentCache {
    slots: DashMap<String, Slot>,
}

impl PermanentCache {
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.slots
            .get(key)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.slots.insert(key.into(), Arc::new(value));
    }
}

/// What a running or currently-executing callable can see about its own
/// invocation: which runnable it is, which worker slot it occupies, and the
/// two caches above.
pub struct Context {
    pub runnable_name: RwLock<Option<String>>,
    pub worker_id: RwLock<Option<usize>>,
    pub per_run: PerRunCache,
    pub permanent: PermanentCache,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            runnable_name: RwLock::new(None),
            worker_id: RwLock::new(None),
            per_run: PerRunCache::default(),
            permanent: PermanentCache::default(),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope `runnable_name`/`worker_id` to the duration of `f`, restoring
    /// the previous values afterward. The scheduler calls this once per
    /// task spawn so nested callables can introspect "who am I" without
    /// threading an explicit parameter through every call site.
    pub fn scoped<T>(&self, runnable_name: &str, worker_id: usize, f: impl FnOnce() -> T) -> T {
        let prev_name = self.runnable_name.write().replace(runnable_name.to_string());
        let prev_worker = self.worker_id.write().replace(worker_id);
        let result = f();
        *self.runnable_name.write() = prev_name;
        *self.worker_id.write() = prev_worker;
        result
    }

    pub fn current_runnable(&self) -> Option<String> {
        self.runnable_name.read().clone()
    }

    pub fn current_worker(&self) -> Option<usize> {
        *self.worker_id.read()
    }
}

/// Env-var snapshot helper: resolves `key` against `base_environ` falling
/// back to the process environment, used by callables that want the same
/// variable resolution a shell-mode runnable gets. Mirrors `qik/ctx.py`'s
/// `env` accessor.
pub fn resolve_env_var(base_environ: &HashMap<String, String>, key: &str) -> Option<String> {
    base_environ
        .get(key)
        .cloned()
        .or_else(|| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_run_cache_round_trips_and_clears() {
        let cache = PerRunCache::default();
        cache.set("k", 42i32);
        assert_eq!(*cache.get::<i32>("k").unwrap(), 42);
        cache.clear();
        assert!(cache.get::<i32>("k").is_none());
    }

    #[test]
    fn context_scoped_restores_previous_values() {
        let ctx = Context::new();
        ctx.scoped("outer", 0, || {
            assert_eq!(ctx.current_runnable().as_deref(), Some("outer"));
            ctx.scoped("inner", 1, || {
                assert_eq!(ctx.current_runnable().as_deref(), Some("inner"));
                assert_eq!(ctx.current_worker(), Some(1));
            });
            assert_eq!(ctx.current_runnable().as_deref(), Some("outer"));
        });
        assert_eq!(ctx.current_runnable(), None);
    }
}
