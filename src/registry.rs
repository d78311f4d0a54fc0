//! Tag-string registries that stand in for the dynamic import/reflection the
//! original system used to resolve plugin types, cache backends, command
//! factories, and callable runnables at runtime. Each registry is a simple
//! `HashMap<String, ...>` built once at startup; there is no dynamic loading
//! here by design (REDESIGN FLAG: reflection-by-dotted-path becomes an
//! explicit registration call).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::cache::Cache;
use crate::error::RunnerError;

/// A plugin-contributed projection of a [`crate::dep::Dep::Plugin`] payload
/// into the six closed projections a [`crate::dep::DepsCollection`] exposes.
pub trait DepPlugin: Send + Sync {
    fn globs(&self, payload: &serde_json::Value) -> Vec<String>;
    fn consts(&self, _payload: &serde_json::Value) -> Vec<String> {
        Vec::new()
    }
    fn vals(&self, _payload: &serde_json::Value) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct DepRegistry {
    plugins: HashMap<String, Arc<dyn DepPlugin>>,
}

impl DepRegistry {
    pub fn register(&mut self, tag: impl Into<String>, plugin: Arc<dyn DepPlugin>) {
        self.plugins.insert(tag.into(), plugin);
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn DepPlugin>> {
        self.plugins.get(tag)
    }
}

/// A constructor for a [`Cache`] backend, keyed by the `type` string a
/// config's cache block names (`"local"`, `"repo"`, `"remote"`, `"none"`,
/// or a plugin tag).
pub type CacheFactory = Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn Cache>, RunnerError> + Send + Sync>;

#[derive(Default)]
pub struct CacheRegistry {
    factories: HashMap<String, CacheFactory>,
}

impl CacheRegistry {
    pub fn register(&mut self, kind: impl Into<String>, factory: CacheFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn build(&self, kind: &str, config: &serde_json::Value) -> Result<Arc<dyn Cache>, RunnerError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| RunnerError::InvalidCacheType(kind.to_string()))?;
        factory(config)
    }
}

/// A command factory contributes one or more [`crate::runnable::Runnable`]s
/// expanded from a single command declaration (e.g. one entry per module
/// placeholder substitution, or an arbitrary `**args` expansion).
pub type CommandFactoryFn = Arc<
    dyn Fn(&crate::config::CommandConfig, &crate::config::ModuleConfig) -> Vec<crate::runnable::Runnable>
        + Send
        + Sync,
>;

#[derive(Default)]
pub struct FactoryRegistry {
    factories: HashMap<String, CommandFactoryFn>,
}

impl FactoryRegistry {
    pub fn register(&mut self, name: impl Into<String>, factory: CommandFactoryFn) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Option<&CommandFactoryFn> {
        self.factories.get(name)
    }
}

/// A callable runnable's body: `fn(ctx args) -> (exit_code, log)`. Registered
/// under the dotted name a config's `cmd:` field would have named. Takes the
/// same `BTreeMap` [`crate::runnable::Runnable::args`] stores, so a runnable
/// can hand its args straight through without reshaping them.
pub type CallableFn = Arc<dyn Fn(&BTreeMap<String, Option<String>>) -> (i32, Option<String>) + Send + Sync>;

#[derive(Default)]
pub struct CallableRegistry {
    callables: HashMap<String, CallableFn>,
}

impl CallableRegistry {
    pub fn register(&mut self, name: impl Into<String>, callable: CallableFn) {
        self.callables.insert(name.into(), callable);
    }

    pub fn get(&self, name: &str) -> Option<&CallableFn> {
        self.callables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_registry_reports_unknown_kind() {
        let registry = CacheRegistry::default();
        let err = registry.build("bogus", &serde_json::Value::Null).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidCacheType(k) if k == "bogus"));
    }

    #[test]
    fn callable_registry_round_trips() {
        let mut registry = CallableRegistry::default();
        registry.register("noop", Arc::new(|_args| (0, None)));
        let callable = registry.get("noop").expect("registered");
        assert_eq!(callable(&BTreeMap::new()), (0, None));
    }
}
