//! A4 — plain serde record shapes for the on-disk configuration. Parsing
//! a config file format (TOML/YAML/whatever) from disk is out of scope;
//! these types are what a loader would deserialize into, mirroring the
//! field names of `qik/conf.py`'s `ModuleConf`/`Cmd`/`Space`/`CacheConf`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dep::Dep;

/// A named cache backend configuration block, referenced by [`CommandConfig::cache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// A space groups modules for `--space` filtering; it carries no behavior
/// of its own beyond its name and member module paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<String>,
}

/// One declared command: the shell template or callable name, its
/// dependency/artifact declarations, and cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub exec: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub deps: Vec<Dep>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub cache: Option<String>,
    #[serde(default)]
    pub cache_when: CacheWhen,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub isolated: Option<bool>,
    #[serde(default)]
    pub args: BTreeMap<String, Option<String>>,
    /// Excluded from the default `--ls`/run selection, but still resolvable
    /// as a `Dep::Cmd` target — a command meant to be depended on, not run
    /// directly.
    #[serde(default)]
    pub hidden: bool,
    /// Pins this command to one space, skipping the membership lookup in
    /// [`crate::factory::expand`] that would otherwise emit one runnable per
    /// space the owning module belongs to.
    #[serde(default)]
    pub space: Option<String>,
}

/// When a result is eligible for caching, per spec.md §4.3's `cache_when`
/// note: a nonzero exit is cached only when explicitly requested.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheWhen {
    #[default]
    Success,
    Always,
}

/// One module: its root path, the commands it declares, and default dep
/// contributions (e.g. a module-level `const` every command inherits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
    #[serde(default)]
    pub deps: Vec<Dep>,
}

/// The whole-workspace configuration: modules, spaces, and named cache
/// backends available for commands to reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub spaces: Vec<SpaceConfig>,
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
    #[serde(default)]
    pub default_cache: Option<String>,
}

impl WorkspaceConfig {
    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn space(&self, name: &str) -> Option<&SpaceConfig> {
        self.spaces.iter().find(|s| s.name == name)
    }

    pub fn cache(&self, name: &str) -> Option<&CacheConfig> {
        self.caches.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cache_when_defaults_to_success_only() {
        let cmd: CommandConfig = serde_json::from_value(serde_json::json!({
            "name": "build",
            "shell": "echo hi",
        }))
        .unwrap();
        assert_eq!(cmd.cache_when, CacheWhen::Success);
    }

    #[test]
    fn workspace_config_looks_up_members_by_name() {
        let config = WorkspaceConfig {
            modules: vec![ModuleConfig {
                name: "core".into(),
                path: "core".into(),
                commands: vec![],
                deps: vec![],
            }],
            ..Default::default()
        };
        assert!(config.module("core").is_some());
        assert!(config.module("missing").is_none());
    }
}
