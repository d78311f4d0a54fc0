//! C1 — deterministic content hashing.
//!
//! Four entry points, mirroring spec.md §4.1: [`hash_strs`] (sorted-set
//! digest of strings), [`hash_val`] (raw bytes), [`hash_globs`] (VCS
//! object-id-addressed glob digest) and [`hash_pydists`] (package name +
//! resolved version digest). All four produce a 128-bit xxh3 hex digest.

use std::path::Path;

use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_128;

use crate::env::Environment;
use crate::error::RunnableError;

/// Hex-encode a 128-bit digest without an intermediate `Vec` allocation.
fn hex128(value: u128) -> String {
    format!("{value:032x}")
}

/// Digest of the sorted, concatenated input strings.
///
/// `hash_strs([a, b, c]) == hash_strs([c, b, a])` — callers must never rely
/// on the order they pass values in.
pub fn hash_strs<I, S>(vals: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = vals.into_iter().map(|s| s.as_ref().to_owned()).collect();
    sorted.sort_unstable();
    hex128(xxh3_128(sorted.concat().as_bytes()))
}

/// Digest of a value's raw bytes, verbatim.
pub fn hash_val(bytes: impl AsRef<[u8]>) -> String {
    hex128(xxh3_128(bytes.as_ref()))
}

/// One resolved file: either a VCS object id (cheap, O(1) for committed
/// content) or a freshly computed content hash (dirty/untracked files), or
/// a zero digest for files that vanished between listing and hashing.
fn resolve_file_digest(repo: Option<&git2::Repository>, path: &Path) -> String {
    if let Some(repo) = repo {
        if let Ok(status) = repo.status_file(path) {
            let is_dirty = status.intersects(
                git2::Status::WT_MODIFIED
                    | git2::Status::WT_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_NEW,
            );
            if !is_dirty {
                if let Ok(oid) = repo.blob_path(path) {
                    return oid.to_string();
                }
            }
        }
    }

    match std::fs::read(path) {
        Ok(bytes) => hash_val(bytes),
        Err(_) => "0".repeat(32),
    }
}

/// Expand glob patterns against the given root and VCS scope, then digest
/// `path || object_id` pairs in sorted-by-path order.
///
/// Two VCS scopes are supported (a main repo and a private artifact
/// sub-repo, e.g. `._bramble/artifacts`) and are hashed in a fixed order:
/// main scope first, then the artifact scope, matching spec.md §4.1.
pub fn hash_globs(root: &Path, artifact_root: Option<&Path>, patterns: &[String]) -> String {
    let mut patterns: Vec<&String> = patterns.iter().collect();
    patterns.sort_unstable();
    patterns.dedup();

    let main_repo = git2::Repository::discover(root).ok();
    let artifact_repo = artifact_root.and_then(|p| git2::Repository::discover(p).ok());

    let mut main_paths: Vec<std::path::PathBuf> = Vec::new();
    let mut artifact_paths: Vec<std::path::PathBuf> = Vec::new();

    for pattern in patterns {
        let (base, sink): (&Path, &mut Vec<std::path::PathBuf>) = match artifact_root {
            Some(a) if pattern.starts_with("._bramble/artifacts/") => (a, &mut artifact_paths),
            _ => (root, &mut main_paths),
        };

        if let Ok(glob) = wax::Glob::new(pattern) {
            sink.extend(glob.walk(base).flatten().map(|entry| entry.path().to_path_buf()));
        }
    }

    // Digesting is the expensive part (reads file content for anything not
    // a clean VCS-tracked blob), so it fans out across `rayon`'s pool; the
    // result is sorted right after, so per-file parallelism doesn't change
    // the deterministic ordering the final digest is built from.
    let digest_pairs = |base: &Path, repo: Option<&git2::Repository>, paths: &[std::path::PathBuf]| -> Vec<(String, String)> {
        paths
            .par_iter()
            .map(|path| {
                let rel = path.strip_prefix(base).unwrap_or(path).to_string_lossy().into_owned();
                (rel, resolve_file_digest(repo, path))
            })
            .collect()
    };

    let mut main_pairs = digest_pairs(root, main_repo.as_ref(), &main_paths);
    let mut artifact_pairs = match artifact_root {
        Some(a) => digest_pairs(a, artifact_repo.as_ref(), &artifact_paths),
        None => Vec::new(),
    };

    main_pairs.sort();
    artifact_pairs.sort();
    artifact_pairs.dedup();
    main_pairs.dedup();

    let concat = |pairs: &[(String, String)]| -> String {
        pairs.iter().map(|(p, h)| format!("{p}{h}")).collect()
    };

    hex128(xxh3_128(format!("{}{}", concat(&artifact_pairs), concat(&main_pairs)).as_bytes()))
}

/// Resolve each package name to a version via `env` and digest
/// `name || version` pairs, sorted by name.
///
/// Fails with [`RunnableError::DistributionNotFound`] if the environment has
/// no resolvable version and no override is configured.
pub fn hash_pydists(env: &dyn Environment, names: &[String]) -> Result<String, RunnableError> {
    let mut names: Vec<&String> = names.iter().collect();
    names.sort_unstable();
    names.dedup();

    let mut acc = String::new();
    for name in names {
        let version = env
            .version(name)
            .ok_or_else(|| RunnableError::DistributionNotFound(name.clone()))?;
        acc.push_str(name);
        acc.push_str(&version);
    }

    Ok(hex128(xxh3_128(acc.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_strs_is_order_independent() {
        assert_eq!(
            hash_strs(["a", "b", "c"]),
            hash_strs(["c", "b", "a"])
        );
    }

    #[test]
    fn hash_strs_differs_on_content() {
        assert_ne!(hash_strs(["a", "b"]), hash_strs(["a", "c"]));
    }

    #[test]
    fn hash_val_is_stable() {
        assert_eq!(hash_val("hello"), hash_val("hello"));
        assert_ne!(hash_val("hello"), hash_val("world"));
    }

    #[test]
    fn hash_globs_missing_file_degrades_to_zero_digest() {
        let dir = tempfile::tempdir().unwrap();
        let digest = hash_globs(dir.path(), None, &["nonexistent/**/*.rs".to_string()]);
        // No matches at all still produces a stable, deterministic digest.
        assert_eq!(digest.len(), 32);
    }
}
