//! C3 — a single executable unit: the expansion of one command declaration
//! against one module (and, for factory-expanded commands, one argument
//! set). Owns naming (`fmt_name`/`slug`), fingerprinting, cache-policy
//! checks, and execution. Grounded on `qik/runnable.py`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

use crate::cache::Cache;
use crate::config::CacheWhen;
use crate::context::Context;
use crate::dep::{CommandResolver, Dep, DepsCollection};
use crate::env::Environment;
use crate::error::RunnableError;
use crate::hash::{hash_globs, hash_pydists, hash_strs, hash_val};
use crate::registry::CallableRegistry;

/// How a runnable's body is invoked.
#[derive(Debug, Clone)]
pub enum Body {
    /// A shell template, e.g. `"pytest {args}"`, run via the platform shell.
    Shell(String),
    /// A name registered in a [`CallableRegistry`], invoked in-process.
    Callable(String),
}

/// One executable unit. Distinct from [`crate::config::CommandConfig`]:
/// a config entry can expand (via a factory, or one entry per module) into
/// many `Runnable`s.
#[derive(Clone)]
pub struct Runnable {
    pub name: String,
    pub cmd: String,
    pub body: Body,
    pub module: Option<String>,
    pub space: Option<String>,
    pub deps: Vec<Dep>,
    pub artifacts: Vec<String>,
    pub cache: Option<String>,
    pub cache_when: CacheWhen,
    pub args: BTreeMap<String, Option<String>>,
}

/// The outcome of one execution, independent of whether it came from a
/// fresh run or a cache hit.
#[derive(Debug, Clone)]
pub struct Result {
    pub hash: String,
    pub code: i32,
    pub log: Option<String>,
    pub cached: bool,
}

/// `cmd[@space][#module][?k=v&...]` — see spec.md §4.1's naming note, lifted
/// from qik's `fmt_name`.
pub fn fmt_name(
    cmd: &str,
    space: Option<&str>,
    module: Option<&str>,
    args: &BTreeMap<String, Option<String>>,
) -> String {
    let mut out = cmd.to_string();
    if let Some(space) = space {
        out.push('@');
        out.push_str(space);
    }
    if let Some(module) = module {
        out.push('#');
        out.push_str(module);
    }
    if !args.is_empty() {
        out.push('?');
        let parts: Vec<String> = args
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v}"),
                None => k.clone(),
            })
            .collect();
        out.push_str(&parts.join("&"));
    }
    out
}

impl Runnable {
    pub fn new(
        cmd: String,
        body: Body,
        module: Option<String>,
        space: Option<String>,
        deps: Vec<Dep>,
        artifacts: Vec<String>,
        cache: Option<String>,
        cache_when: CacheWhen,
        args: BTreeMap<String, Option<String>>,
    ) -> Self {
        let name = fmt_name(&cmd, space.as_deref(), module.as_deref(), &args);
        Self {
            name,
            cmd,
            body,
            module,
            space,
            deps,
            artifacts,
            cache,
            cache_when,
            args,
        }
    }

    /// Filesystem-safe identifier, used for manifest/log filenames inside a
    /// cache entry directory: `name` with anything non-alphanumeric mapped
    /// to `-`.
    pub fn slug(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect()
    }

    /// Hash of everything that defines *what* this runnable does, excluding
    /// cache policy (changing `cache`/`cache_when` must not invalidate
    /// existing cache entries).
    fn spec_hash(&self) -> String {
        let body = match &self.body {
            Body::Shell(s) => format!("shell:{s}"),
            Body::Callable(name) => format!("callable:{name}"),
        };
        hash_strs([body, self.cmd.clone()])
    }

    /// The content fingerprint: spec hash, union of dep projections, and any
    /// upstream runnable's own fingerprint (the caller supplies those via
    /// `upstream_hashes`, since computing them here would require the graph).
    pub fn fingerprint(
        &self,
        project_root: &std::path::Path,
        artifact_root: Option<&std::path::Path>,
        env: &dyn Environment,
        upstream_hashes: &[String],
    ) -> std::result::Result<String, RunnableError> {
        let collection = DepsCollection::new(&self.deps, self.module.as_deref(), env);

        let globs_hash = hash_globs(
            project_root,
            artifact_root,
            &collection.globs().into_iter().collect::<Vec<_>>(),
        );
        let consts_hash = hash_strs(collection.consts());
        let vals_hash = hash_strs(collection.vals());
        let pydists_hash = hash_pydists(env, &collection.pydists().into_iter().collect::<Vec<_>>())?;

        // spec_hash ‖ consts_hash ‖ vals_hash ‖ globs_hash ‖ pydists_hash
        let mut parts = vec![self.spec_hash(), consts_hash, vals_hash, globs_hash, pydists_hash];
        parts.extend(upstream_hashes.iter().cloned());

        Ok(hash_strs(parts))
    }

    /// Whether a result with this exit code should be written to cache.
    pub fn should_cache(&self, code: i32) -> bool {
        if self.cache.is_none() {
            return false;
        }
        match self.cache_when {
            CacheWhen::Success => code == 0,
            CacheWhen::Always => true,
        }
    }

    /// Look up a cache hit for `hash`, restoring artifacts if `restore`.
    pub async fn get_cache_entry(
        &self,
        cache: &dyn Cache,
        hash: &str,
        restore: bool,
    ) -> Option<Result> {
        let entry = cache.get(self, hash, restore).await?;
        Some(Result {
            hash: entry.manifest.hash,
            code: entry.manifest.code,
            log: entry.log,
            cached: true,
        })
    }

    /// Run the body: a shell command via a child process, or a registered
    /// callable in-process. Never returns `Err` for a nonzero exit — only
    /// for conditions that prevent running at all (missing callable, I/O
    /// failure spawning the shell), which the scheduler maps to a per-run
    /// failure rather than a cached result.
    pub async fn execute(
        &self,
        hash: &str,
        working_dir: &std::path::Path,
        base_environ: &BTreeMap<String, String>,
        callables: &CallableRegistry,
        ctx: &Context,
    ) -> std::result::Result<Result, RunnableError> {
        match &self.body {
            Body::Shell(template) => {
                let mut child = TokioCommand::new(shell_program())
                    .arg(shell_flag())
                    .arg(template)
                    .current_dir(working_dir)
                    .envs(base_environ)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| RunnableError::DotEnvNotFound(e.to_string()))?;

                let mut out = String::new();
                if let Some(mut stdout) = child.stdout.take() {
                    let _ = stdout.read_to_string(&mut out).await;
                }
                let mut err = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut err).await;
                }
                let status = child.wait().await.map_err(|e| RunnableError::DotEnvNotFound(e.to_string()))?;

                let mut log = out;
                log.push_str(&err);

                Ok(Result {
                    hash: hash.to_string(),
                    code: status.code().unwrap_or(1),
                    log: if log.is_empty() { None } else { Some(log) },
                    cached: false,
                })
            }
            Body::Callable(name) => {
                let callable = callables
                    .get(name)
                    .ok_or_else(|| RunnableError::DistributionNotFound(name.clone()))?
                    .clone();
                let args = self.args.clone();
                let (code, log) = ctx.scoped(&self.name, 0, move || callable(&args));
                Ok(Result {
                    hash: hash.to_string(),
                    code,
                    log,
                    cached: false,
                })
            }
        }
    }

    /// Write this runnable's `{globs, pydists, hash}` for a downstream
    /// [`Dep::Load`] to read, at `path`.
    pub fn store_deps(
        &self,
        path: &std::path::Path,
        env: &dyn Environment,
        hash: &str,
    ) -> std::result::Result<(), RunnableError> {
        let collection = DepsCollection::new(&self.deps, self.module.as_deref(), env);
        let serialized = crate::dep::Serialized {
            globs: collection.globs().into_iter().collect(),
            pydists: collection.pydists().into_iter().collect(),
            hash: Some(hash.to_string()),
        };
        let bytes = serde_json::to_vec_pretty(&serialized)
            .map_err(|e| RunnableError::DotEnvNotFound(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| RunnableError::DotEnvNotFound(e.to_string()))
    }

    pub fn runnable_deps(&self, resolver: &dyn CommandResolver, env: &dyn Environment) -> Vec<crate::dep::Runnable> {
        let collection = DepsCollection::new(&self.deps, self.module.as_deref(), env);
        collection.runnables(resolver).into_values().collect()
    }
}

#[cfg(unix)]
fn shell_program() -> &'static str {
    "sh"
}

#[cfg(unix)]
fn shell_flag() -> &'static str {
    "-c"
}

#[cfg(windows)]
fn shell_program() -> &'static str {
    "cmd"
}

#[cfg(windows)]
fn shell_flag() -> &'static str {
    "/C"
}

/// A command factory's resolution output, matching spec.md's "an expanded
/// command entry maps to N runnables" note.
pub type RunnableMap = std::collections::BTreeMap<String, Arc<Runnable>>;

/// Stable, dep-order-independent hash of a value baked directly into a
/// `Const`-less hash input (used by [`crate::filters`] for `--cache` probes
/// that don't need the full fingerprint machinery).
pub fn hash_name(name: &str) -> String {
    hash_val(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("build", None, None, "build"; "bare cmd has no decorations")]
    #[test_case("test", Some("py"), None, "test@py"; "space only")]
    #[test_case("test", None, Some("core"), "test#core"; "module only")]
    #[test_case("test", Some("py"), Some("core"), "test@py#core"; "space and module")]
    fn fmt_name_variants(cmd: &str, space: Option<&str>, module: Option<&str>, expected: &str) {
        assert_eq!(fmt_name(cmd, space, module, &BTreeMap::new()), expected);
    }

    #[test]
    fn fmt_name_includes_args() {
        let mut args = BTreeMap::new();
        args.insert("k".to_string(), Some("v".to_string()));
        let name = fmt_name("test", Some("py"), Some("core"), &args);
        assert_eq!(name, "test@py#core?k=v");
    }

    #[test]
    fn slug_replaces_special_characters() {
        let runnable = Runnable::new(
            "test".into(),
            Body::Shell("pytest".into()),
            Some("core".into()),
            None,
            vec![],
            vec![],
            None,
            CacheWhen::Success,
            BTreeMap::new(),
        );
        assert_eq!(runnable.slug(), "test-core");
    }

    #[test]
    fn should_cache_respects_cache_when() {
        let mut runnable = Runnable::new(
            "build".into(),
            Body::Shell("true".into()),
            None,
            None,
            vec![],
            vec![],
            Some("local".into()),
            CacheWhen::Success,
            BTreeMap::new(),
        );
        assert!(runnable.should_cache(0));
        assert!(!runnable.should_cache(1));
        runnable.cache_when = CacheWhen::Always;
        assert!(runnable.should_cache(1));
    }

    #[test]
    fn should_cache_false_without_backend() {
        let runnable = Runnable::new(
            "build".into(),
            Body::Shell("true".into()),
            None,
            None,
            vec![],
            vec![],
            None,
            CacheWhen::Success,
            BTreeMap::new(),
        );
        assert!(!runnable.should_cache(0));
    }
}
