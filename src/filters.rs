//! C8 — the `--module`/`--space`/`--since`/`--cache`/`--cache-status`
//! runnable selection filters applied before a [`crate::scheduler`] run.
//! Grounded on `qik/runner.py`'s `Graph.filter_*` methods.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use crate::config::WorkspaceConfig;
use crate::error::RunnerError;
use crate::graph::Graph;
use crate::runnable::Runnable;

/// Keep only runnables whose module is in `modules` (empty = no filter).
pub fn by_modules(runnables: &[Arc<Runnable>], modules: &BTreeSet<String>) -> Vec<Arc<Runnable>> {
    if modules.is_empty() {
        return runnables.to_vec();
    }
    runnables
        .iter()
        .filter(|r| r.module.as_deref().is_some_and(|m| modules.contains(m)))
        .cloned()
        .collect()
}

/// Keep only runnables whose module belongs to one of `spaces` (a space's
/// member module list, looked up from the workspace config).
pub fn by_spaces(
    runnables: &[Arc<Runnable>],
    spaces: &BTreeSet<String>,
    config: &WorkspaceConfig,
) -> Vec<Arc<Runnable>> {
    if spaces.is_empty() {
        return runnables.to_vec();
    }

    let members: BTreeSet<&str> = spaces
        .iter()
        .filter_map(|s| config.space(s))
        .flat_map(|s| s.modules.iter().map(String::as_str))
        .collect();

    runnables
        .iter()
        .filter(|r| r.module.as_deref().is_some_and(|m| members.contains(m)))
        .cloned()
        .collect()
}

/// Keep only runnables whose `cache` backend name is in `caches`.
pub fn by_caches(runnables: &[Arc<Runnable>], caches: &BTreeSet<String>) -> Vec<Arc<Runnable>> {
    if caches.is_empty() {
        return runnables.to_vec();
    }
    runnables
        .iter()
        .filter(|r| r.cache.as_deref().is_some_and(|c| caches.contains(c)))
        .cloned()
        .collect()
}

/// A runnable's last-known cache status, used by `--cache-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Uncached,
}

/// Parse the `--cache-status` flag value, tolerant of surrounding
/// whitespace and case the way a hand-typed CLI flag tends to be.
pub fn parse_cache_status(raw: &str) -> Option<CacheStatus> {
    static PATTERN: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"^\s*(hit|miss|uncached)\s*$").unwrap());

    let captures = PATTERN.captures(&raw.to_ascii_lowercase())?;
    match &captures[1] {
        "hit" => Some(CacheStatus::Hit),
        "miss" => Some(CacheStatus::Miss),
        _ => Some(CacheStatus::Uncached),
    }
}

/// Keep only runnables whose probed status (via `probe`, which checks the
/// backend without restoring artifacts) matches `status`.
pub fn by_cache_status<F>(runnables: &[Arc<Runnable>], status: CacheStatus, probe: F) -> Vec<Arc<Runnable>>
where
    F: Fn(&Runnable) -> CacheStatus,
{
    runnables
        .iter()
        .filter(|r| probe(r) == status)
        .cloned()
        .collect()
}

/// `--since <ref>`/`--watch`: keep a runnable if any of its `since()`/`watch()`
/// globs matches a path in `changed_paths`, or any of its `Dep::Pydist`
/// names is in `changed_pydists` (a freshly-installed distribution), OR if
/// any of its transitive upstream deps does (a change in a dependency
/// should still schedule its dependents).
///
/// Per spec.md's open question: inclusion is by glob match against the
/// changed-paths set, not by diffing content hashes — a changed file that
/// happens to re-produce identical content still counts as "since"-dirty.
/// This mirrors qik's `--since`/`--watch` semantics, a cheaper, conservative
/// over-approximation rather than a second hashing pass.
pub fn by_changes(
    runnables: &[Arc<Runnable>],
    changed_paths: &BTreeSet<String>,
    changed_pydists: &BTreeSet<String>,
    graph: &Graph,
    globs_for: impl Fn(&Runnable) -> BTreeSet<String>,
    pydists_for: impl Fn(&Runnable) -> BTreeSet<String>,
) -> Vec<Arc<Runnable>> {
    let directly_changed: BTreeSet<String> = runnables
        .iter()
        .filter(|r| {
            matches_any(&globs_for(r), changed_paths) || !pydists_for(r).is_disjoint(changed_pydists)
        })
        .map(|r| r.name.clone())
        .collect();

    runnables
        .iter()
        .filter(|r| {
            directly_changed.contains(&r.name)
                || graph
                    .transitive_upstream(&r.name)
                    .iter()
                    .any(|u| directly_changed.contains(u))
        })
        .cloned()
        .collect()
}

/// `--since <git_sha>`: diff `git_sha` against the working tree (scenario C),
/// wrap the changed paths as the same path set [`by_changes`] matches glob
/// patterns against, and delegate to it. A git diff carries no notion of a
/// freshly-installed distribution, so the pydist side is always empty here.
pub fn since(
    repo_root: &Path,
    git_sha: &str,
    runnables: &[Arc<Runnable>],
    graph: &Graph,
    since_globs: impl Fn(&Runnable) -> BTreeSet<String>,
) -> std::result::Result<Vec<Arc<Runnable>>, RunnerError> {
    let changed = changed_paths_since(repo_root, git_sha).map_err(|e| RunnerError::ConfigParse(e.to_string()))?;
    Ok(by_changes(runnables, &changed, &BTreeSet::new(), graph, since_globs, |_| {
        BTreeSet::new()
    }))
}

/// Paths that differ between `git_sha`'s tree and the current working tree
/// (including uncommitted changes), relative to `repo_root`.
fn changed_paths_since(repo_root: &Path, git_sha: &str) -> std::result::Result<BTreeSet<String>, git2::Error> {
    let repo = git2::Repository::discover(repo_root)?;
    let commit = repo.revparse_single(git_sha)?.peel_to_commit()?;
    let old_tree = commit.tree()?;
    let diff = repo.diff_tree_to_workdir_with_index(Some(&old_tree), None)?;

    let mut changed = BTreeSet::new();
    diff.foreach(
        &mut |delta, _progress| {
            if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                changed.insert(path.to_string_lossy().into_owned());
            }
            true
        },
        None,
        None,
        None,
    )?;
    Ok(changed)
}

fn matches_any(patterns: &BTreeSet<String>, changed_paths: &BTreeSet<String>) -> bool {
    patterns.iter().any(|pattern| {
        wax::Glob::new(pattern)
            .map(|glob| changed_paths.iter().any(|p| glob.is_match(std::path::Path::new(p))))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheWhen;
    use crate::runnable::Body;
    use std::collections::BTreeMap;

    fn runnable(name: &str, module: Option<&str>, cache: Option<&str>) -> Arc<Runnable> {
        Arc::new(Runnable::new(
            name.to_string(),
            Body::Shell("true".into()),
            module.map(String::from),
            None,
            vec![],
            vec![],
            cache.map(String::from),
            CacheWhen::Success,
            BTreeMap::new(),
        ))
    }

    #[test]
    fn by_modules_empty_set_is_identity() {
        let runnables = vec![runnable("a", Some("core"), None)];
        assert_eq!(by_modules(&runnables, &BTreeSet::new()).len(), 1);
    }

    #[test]
    fn by_modules_filters_to_named_modules() {
        let runnables = vec![
            runnable("a", Some("core"), None),
            runnable("b", Some("web"), None),
        ];
        let filtered = by_modules(&runnables, &BTreeSet::from(["core".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "a");
    }

    #[test]
    fn parse_cache_status_is_case_insensitive() {
        assert_eq!(parse_cache_status("HIT"), Some(CacheStatus::Hit));
        assert_eq!(parse_cache_status(" miss "), Some(CacheStatus::Miss));
        assert_eq!(parse_cache_status("bogus"), None);
    }

    #[test]
    fn by_caches_filters_to_named_backend() {
        let runnables = vec![
            runnable("a", None, Some("local")),
            runnable("b", None, Some("remote")),
        ];
        let filtered = by_caches(&runnables, &BTreeSet::from(["remote".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "b");
    }

    struct NoCmds;
    impl crate::dep::CommandResolver for NoCmds {
        fn resolve(&self, _cmd: &str, _args: &BTreeMap<String, Option<String>>) -> Vec<String> {
            Vec::new()
        }
    }

    fn init_repo_with_commit(dir: &std::path::Path) {
        let repo = git2::Repository::init(dir).unwrap();
        std::fs::write(dir.join("a.txt"), "one").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(std::path::Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
    }

    #[test]
    fn since_picks_up_working_tree_changes_against_sha() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());
        std::fs::write(dir.path().join("a.txt"), "two").unwrap();

        let r = runnable("build", Some("core"), None);
        let env = crate::env::NullEnvironment::new("x");
        let graph = Graph::build(&[r.clone()], &NoCmds, &env, None).unwrap();

        let filtered = since(dir.path(), "HEAD", &[r.clone()], &graph, |_| {
            BTreeSet::from(["a.txt".to_string()])
        })
        .unwrap();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn by_changes_matches_runnable_by_pydist_name() {
        let r = runnable("build", Some("core"), None);
        let env = crate::env::NullEnvironment::new("x");
        let graph = Graph::build(&[r.clone()], &NoCmds, &env, None).unwrap();

        let filtered = by_changes(
            &[r.clone()],
            &BTreeSet::new(),
            &BTreeSet::from(["requests".to_string()]),
            &graph,
            |_| BTreeSet::new(),
            |_| BTreeSet::from(["requests".to_string()]),
        );
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn by_changes_excludes_runnable_with_no_matching_pydist() {
        let r = runnable("build", Some("core"), None);
        let env = crate::env::NullEnvironment::new("x");
        let graph = Graph::build(&[r.clone()], &NoCmds, &env, None).unwrap();

        let filtered = by_changes(
            &[r.clone()],
            &BTreeSet::new(),
            &BTreeSet::from(["numpy".to_string()]),
            &graph,
            |_| BTreeSet::new(),
            |_| BTreeSet::from(["requests".to_string()]),
        );
        assert!(filtered.is_empty());
    }

    #[test]
    fn since_excludes_runnable_with_no_matching_change() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());

        let r = runnable("build", Some("core"), None);
        let env = crate::env::NullEnvironment::new("x");
        let graph = Graph::build(&[r.clone()], &NoCmds, &env, None).unwrap();

        let filtered = since(dir.path(), "HEAD", &[r.clone()], &graph, |_| {
            BTreeSet::from(["a.txt".to_string()])
        })
        .unwrap();
        assert!(filtered.is_empty());
    }
}
