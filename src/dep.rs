//! C2 — the dependency model: a tagged [`Dep`] variant plus the six
//! projections (`globs`, `vals`, `pydists`, `runnables`, `watch`, `since`)
//! each variant contributes, and [`DepsCollection`], the per-runnable view
//! that unions them.
//!
//! Grounded on `qik/dep.py` (`BaseDep` subclasses and their projections).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::env::Environment;

/// An edge to another command's expanded runnables, as contributed by a
/// [`Dep::Cmd`] (or a plugin dep that behaves like one).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Runnable {
    pub name: String,
    pub strict: bool,
    /// `None` defers to the run-wide `--isolated` default.
    pub isolated: Option<bool>,
}

/// Resolves a command declaration (+ custom args) to the set of runnable
/// names it expands to. Implemented by [`crate::factory::CommandRegistry`].
/// Kept as a trait so `dep.rs` does not need to know about command
/// expansion or the config shapes that drive it.
pub trait CommandResolver {
    fn resolve(&self, cmd: &str, args: &BTreeMap<String, Option<String>>) -> Vec<String>;

    /// Look up a single runnable by its full [`crate::runnable::Runnable::name`],
    /// used by [`crate::graph::Graph::build`] to pull a non-isolated edge's
    /// target into the graph even when it falls outside the originally
    /// selected runnable set. Defaults to `None` for resolvers (tests,
    /// stubs) that only need name resolution.
    fn get_runnable(&self, _name: &str) -> Option<std::sync::Arc<crate::runnable::Runnable>> {
        None
    }
}

/// A tagged dependency variant. Closed set for the core projections; see
/// [`Dep::Plugin`] for the open-registry escape hatch noted in spec.md §9.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Dep {
    /// A glob pattern over project files.
    Glob { pattern: String },
    /// A constant value baked into the definition (its own string content
    /// is part of the hash via `vals`/`consts`, depending on call site).
    Const { val: String },
    /// A value read from a file at a given key.
    Val { key: String, file: String },
    /// An external package name, resolved to a version by the active
    /// [`Environment`].
    Pydist { name: String },
    /// Another command's expanded runnables.
    Cmd {
        name: String,
        #[serde(default)]
        strict: bool,
        #[serde(default)]
        isolated: Option<bool>,
        #[serde(default)]
        args: BTreeMap<String, Option<String>>,
    },
    /// Serialized `{globs, pydists, hash?}` sourced from another runnable's
    /// `store_deps` output, falling back to `default` globs when absent.
    Load {
        path: String,
        #[serde(default)]
        default: Vec<String>,
    },
    /// A plugin-contributed dependency variant, dispatched by tag through
    /// [`crate::registry::DepRegistry`] rather than known to this enum at
    /// compile time.
    Plugin { tag: String, payload: serde_json::Value },
}

/// The `{globs, pydists, hash}` record a [`Dep::Load`] target file holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Serialized {
    #[serde(default)]
    pub globs: Vec<String>,
    #[serde(default)]
    pub pydists: Vec<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl Dep {
    pub fn globs(&self) -> Vec<String> {
        match self {
            Dep::Glob { pattern } => vec![pattern.clone()],
            Dep::Load { path, default } => match Self::load(path) {
                Some(s) => s.globs,
                None => default.clone(),
            },
            _ => Vec::new(),
        }
    }

    /// `Val` reads `key` out of the JSON object at `file` and folds
    /// `key=value` into the hash, so editing the value on disk invalidates
    /// any runnable depending on it. Unreadable files and missing keys
    /// contribute nothing, same as a dep that doesn't resolve.
    pub fn vals(&self) -> Vec<String> {
        match self {
            Dep::Val { key, file } => Self::read_val(file, key).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn consts(&self) -> Vec<String> {
        match self {
            Dep::Const { val } => vec![val.clone()],
            _ => Vec::new(),
        }
    }

    pub fn pydists(&self) -> Vec<String> {
        match self {
            Dep::Pydist { name } => vec![name.clone()],
            Dep::Load { path, .. } => Self::load(path).map(|s| s.pydists).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// `watch` is the set the filesystem watcher reacts to. Defaults to
    /// `globs()` for most variants; variants tied to non-VCS-observable
    /// state (lock files, lockfile-backed `Val`s) override it.
    pub fn watch(&self) -> Vec<String> {
        match self {
            Dep::Val { file, .. } => vec![file.clone()],
            other => other.globs(),
        }
    }

    /// `since` is the set used for `--since <sha>` diffing. Defaults to
    /// `watch()`; `Const` additionally reacts to the root config file since
    /// constants are config-embedded.
    pub fn since(&self) -> Vec<String> {
        match self {
            Dep::Const { .. } => vec!["*.bramble.toml".to_string()],
            other => other.watch(),
        }
    }

    /// Runnable edges this dep contributes, resolved through `resolver`.
    pub fn runnables(&self, resolver: &dyn CommandResolver) -> Vec<Runnable> {
        match self {
            Dep::Cmd {
                name,
                strict,
                isolated,
                args,
            } => resolver
                .resolve(name, args)
                .into_iter()
                .map(|n| Runnable {
                    name: n,
                    strict: *strict,
                    isolated: *isolated,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn load(path: &str) -> Option<Serialized> {
        let bytes = std::fs::read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn read_val(file: &str, key: &str) -> Option<String> {
        let bytes = std::fs::read(file).ok()?;
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        let value = parsed.get(key)?;
        Some(format!("{key}={value}"))
    }
}

/// A filterable, hashable view over a runnable's deps: the union of each
/// dep's projections plus environment-contributed globs/consts/since.
pub struct DepsCollection<'a> {
    deps: &'a [Dep],
    module: Option<&'a str>,
    env: &'a dyn Environment,
}

impl<'a> DepsCollection<'a> {
    pub fn new(deps: &'a [Dep], module: Option<&'a str>, env: &'a dyn Environment) -> Self {
        Self { deps, module, env }
    }

    pub fn globs(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.deps.iter().flat_map(Dep::globs).collect();
        set.extend(self.env.glob_deps());
        set
    }

    pub fn consts(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.deps.iter().flat_map(Dep::consts).collect();
        set.extend(self.env.const_deps());
        set
    }

    pub fn vals(&self) -> BTreeSet<String> {
        self.deps.iter().flat_map(Dep::vals).collect()
    }

    pub fn pydists(&self) -> BTreeSet<String> {
        self.deps.iter().flat_map(Dep::pydists).collect()
    }

    pub fn watch(&self) -> BTreeSet<String> {
        self.deps.iter().flat_map(Dep::watch).collect()
    }

    pub fn since(&self) -> BTreeSet<String> {
        let mut set: BTreeSet<String> = self.deps.iter().flat_map(Dep::since).collect();
        set.extend(self.env.since_deps());
        set
    }

    /// Runnable edges, filtered to the runnable's own module scope (a dep's
    /// target is excluded if it declares a *different* module than ours).
    pub fn runnables(&self, resolver: &dyn CommandResolver) -> BTreeMap<String, Runnable> {
        let mut out: BTreeMap<String, Runnable> = self
            .deps
            .iter()
            .flat_map(|d| d.runnables(resolver))
            .map(|r| (r.name.clone(), r))
            .collect();

        if let Some(module) = self.module {
            out.retain(|name, _| {
                // A runnable name carrying a different `#module` tag than
                // ours is excluded; untagged or same-module edges survive.
                match name.rsplit_once('#') {
                    Some((_, tagged)) => tagged.starts_with(module),
                    None => true,
                }
            });
        }

        for edge in self.env.runnable_deps() {
            out.insert(edge.name.clone(), edge);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::NullEnvironment;

    struct NoCmds;
    impl CommandResolver for NoCmds {
        fn resolve(&self, _cmd: &str, _args: &BTreeMap<String, Option<String>>) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn glob_dep_projects_only_globs() {
        let dep = Dep::Glob {
            pattern: "src/**/*.rs".into(),
        };
        assert_eq!(dep.globs(), vec!["src/**/*.rs".to_string()]);
        assert!(dep.pydists().is_empty());
        assert!(dep.consts().is_empty());
    }

    #[test]
    fn const_dep_since_includes_config_file() {
        let dep = Dep::Const { val: "x".into() };
        assert_eq!(dep.since(), vec!["*.bramble.toml".to_string()]);
    }

    #[test]
    fn deps_collection_unions_projections() {
        let env = NullEnvironment::new("default");
        let deps = vec![
            Dep::Glob {
                pattern: "a/**".into(),
            },
            Dep::Pydist { name: "requests".into() },
        ];
        let collection = DepsCollection::new(&deps, None, &env);
        assert_eq!(collection.globs().len(), 1);
        assert_eq!(collection.pydists().len(), 1);
        assert!(collection.runnables(&NoCmds).is_empty());
    }

    #[test]
    fn load_dep_falls_back_to_default_when_missing() {
        let dep = Dep::Load {
            path: "/nonexistent/path/for/test.json".into(),
            default: vec!["**/*.py".into()],
        };
        assert_eq!(dep.globs(), vec!["**/*.py".to_string()]);
    }

    #[test]
    fn val_dep_reads_key_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        std::fs::write(&path, r#"{"version": "1.2.3"}"#).unwrap();

        let dep = Dep::Val {
            key: "version".into(),
            file: path.to_string_lossy().into_owned(),
        };
        assert_eq!(dep.vals(), vec!["version=\"1.2.3\"".to_string()]);
    }

    #[test]
    fn val_dep_missing_key_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        std::fs::write(&path, r#"{"other": "x"}"#).unwrap();

        let dep = Dep::Val {
            key: "version".into(),
            file: path.to_string_lossy().into_owned(),
        };
        assert!(dep.vals().is_empty());
    }

    #[test]
    fn val_dep_editing_value_changes_projection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.json");
        std::fs::write(&path, r#"{"version": "1.0.0"}"#).unwrap();
        let dep = Dep::Val { key: "version".into(), file: path.to_string_lossy().into_owned() };
        let before = dep.vals();

        std::fs::write(&path, r#"{"version": "2.0.0"}"#).unwrap();
        let after = dep.vals();

        assert_ne!(before, after);
    }
}
