//! C7 — the DAG scheduler: runs a bounded-concurrency worker pool over a
//! [`Graph`], dispatching a runnable once every upstream it cares about has
//! settled, skipping downstream work when a `strict` upstream fails.
//! Grounded on `qik/runner.py::DAGPool._exec`, reworked from a thread pool
//! onto `tokio::task::JoinSet` per spec.md §5's async scheduler note.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cache::Cache;
use crate::context::Context;
use crate::env::Environment;
use crate::graph::Graph;
use crate::registry::CallableRegistry;
use crate::runnable::{Result as RunResult, Runnable};

/// Terminal state of one runnable after a scheduler pass.
#[derive(Debug, Clone)]
pub enum Outcome {
    Ran(RunResult),
    /// A strict upstream failed or was itself skipped.
    Skipped { upstream: String },
    /// Fingerprinting or execution raised an error that aborts the run.
    Errored(String),
}

pub struct RunReport {
    pub outcomes: BTreeMap<String, Outcome>,
}

impl RunReport {
    /// Exit code for the whole run: the max of all non-cached exit codes,
    /// or 1 if anything errored/was skipped due to a strict failure, else 0.
    pub fn exit_code(&self) -> i32 {
        let mut code = 0;
        for outcome in self.outcomes.values() {
            code = code.max(match outcome {
                Outcome::Ran(result) => result.code,
                Outcome::Skipped { .. } => 1,
                Outcome::Errored(_) => 1,
            });
        }
        code
    }
}

/// `workers == 1` and `workers == N` must produce identical outcomes for
/// identical inputs — concurrency only changes wall-clock time, never
/// which runnables run or skip. The ready-set/in-degree bookkeeping below
/// is what makes that invariant hold regardless of `workers`.
pub struct Scheduler<'a> {
    graph: &'a Graph,
    cache_for: &'a dyn Fn(&Runnable) -> Arc<dyn Cache>,
    env: Arc<dyn Environment>,
    callables: Arc<CallableRegistry>,
    force: bool,
    restore_artifacts: bool,
    fail_fast: bool,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: &'a Graph,
        cache_for: &'a dyn Fn(&Runnable) -> Arc<dyn Cache>,
        env: Arc<dyn Environment>,
        callables: Arc<CallableRegistry>,
        force: bool,
        restore_artifacts: bool,
        fail_fast: bool,
    ) -> Self {
        Self {
            graph,
            cache_for,
            env,
            callables,
            force,
            restore_artifacts,
            fail_fast,
        }
    }

    /// Run every runnable in `runnables` to completion, respecting the
    /// graph's dependency order and `workers` concurrency cap.
    pub async fn run(
        &self,
        runnables: &BTreeMap<String, Arc<Runnable>>,
        project_root: &std::path::Path,
        artifact_root: Option<&std::path::Path>,
        working_dir: &std::path::Path,
        base_environ: &BTreeMap<String, String>,
        workers: usize,
    ) -> RunReport {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let ctx = Arc::new(Context::new());

        let mut in_degree: BTreeMap<String, usize> = runnables
            .keys()
            .map(|name| (name.clone(), self.graph.upstream(name).len()))
            .collect();

        let mut outcomes: BTreeMap<String, Outcome> = BTreeMap::new();
        let mut ready: Vec<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(name, _)| name.clone())
            .collect();

        let mut join_set: JoinSet<(String, Outcome)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut failed = false;

        loop {
            while !(self.fail_fast && failed) {
                let Some(name) = ready.pop() else {
                    break;
                };
                let Some(runnable) = runnables.get(&name).cloned() else {
                    continue;
                };

                // A strict upstream that failed/skipped propagates a skip
                // without ever entering the worker pool.
                if let Some(skip_reason) = self.skip_reason(&runnable, &outcomes) {
                    outcomes.insert(name.clone(), Outcome::Skipped { upstream: skip_reason });
                    self.release_downstream(&name, &mut in_degree, &mut ready);
                    continue;
                }

                let semaphore = semaphore.clone();
                let cache = (self.cache_for)(&runnable);
                let project_root = project_root.to_path_buf();
                let artifact_root = artifact_root.map(|p| p.to_path_buf());
                let working_dir = working_dir.to_path_buf();
                let base_environ = base_environ.clone();
                let callables = self.callables.clone();
                let env = self.env.clone();
                let ctx = ctx.clone();
                let force = self.force;
                let restore_artifacts = self.restore_artifacts;

                in_flight += 1;
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();

                    let outcome = execute_one(
                        &runnable,
                        &*cache,
                        &*env,
                        &callables,
                        &ctx,
                        &project_root,
                        artifact_root.as_deref(),
                        &working_dir,
                        &base_environ,
                        force,
                        restore_artifacts,
                    )
                    .await;
                    (runnable.name.clone(), outcome)
                });
            }

            if in_flight == 0 {
                break;
            }

            match join_set.join_next().await {
                Some(Ok((name, outcome))) => {
                    in_flight -= 1;
                    if self.fail_fast && is_failure(&outcome) {
                        failed = true;
                    }
                    outcomes.insert(name.clone(), outcome);
                    if !(self.fail_fast && failed) {
                        self.release_downstream(&name, &mut in_degree, &mut ready);
                    }
                }
                Some(Err(join_err)) => {
                    in_flight -= 1;
                    tracing::error!(error = %join_err, "runnable task panicked");
                }
                None => break,
            }
        }

        RunReport { outcomes }
    }

    fn skip_reason(&self, runnable: &Runnable, outcomes: &BTreeMap<String, Outcome>) -> Option<String> {
        for (upstream, edge) in self.graph.upstream(&runnable.name) {
            if !edge.strict {
                continue;
            }
            match outcomes.get(&upstream) {
                Some(Outcome::Ran(result)) if result.code != 0 => return Some(upstream),
                Some(Outcome::Skipped { .. }) | Some(Outcome::Errored(_)) => return Some(upstream),
                _ => {}
            }
        }
        None
    }

    fn release_downstream(
        &self,
        name: &str,
        in_degree: &mut BTreeMap<String, usize>,
        ready: &mut Vec<String>,
    ) {
        for downstream in self.graph.downstream(name) {
            if let Some(deg) = in_degree.get_mut(&downstream) {
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    ready.push(downstream);
                }
            }
        }
    }
}

/// Whether an outcome counts as a failure for `--fail`'s stop-scheduling
/// check — a propagated skip doesn't itself count, only the failure that
/// caused it.
fn is_failure(outcome: &Outcome) -> bool {
    matches!(outcome, Outcome::Ran(result) if result.code != 0) || matches!(outcome, Outcome::Errored(_))
}

#[allow(clippy::too_many_arguments)]
async fn execute_one(
    runnable: &Runnable,
    cache: &dyn Cache,
    env: &dyn Environment,
    callables: &CallableRegistry,
    ctx: &Context,
    project_root: &std::path::Path,
    artifact_root: Option<&std::path::Path>,
    working_dir: &std::path::Path,
    base_environ: &BTreeMap<String, String>,
    force: bool,
    restore_artifacts: bool,
) -> Outcome {
    let hash = match runnable.fingerprint(project_root, artifact_root, env, &[]) {
        Ok(hash) => hash,
        Err(e) => return Outcome::Errored(e.to_string()),
    };

    if !force {
        if let Some(cache_name) = &runnable.cache {
            let _ = cache_name;
            if let Some(result) = runnable.get_cache_entry(cache, &hash, restore_artifacts).await {
                return Outcome::Ran(result);
            }
        }
    }

    let result = match runnable
        .execute(&hash, working_dir, base_environ, callables, ctx)
        .await
    {
        Ok(result) => result,
        Err(e) => return Outcome::Errored(e.to_string()),
    };

    if runnable.should_cache(result.code) {
        cache.set(runnable, &result).await;
    }

    Outcome::Ran(result)
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn logs_error_on_task_panic() {
        tracing::error!(error = "boom", "runnable task panicked");
        assert!(logs_contain("runnable task panicked"));
    }

    #[test]
    fn exit_code_is_max_of_outcomes() {
        use super::{Outcome, RunReport};
        use crate::runnable::Result as RunResult;
        use std::collections::BTreeMap;

        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "a".to_string(),
            Outcome::Ran(RunResult { hash: "h".into(), code: 0, log: None, cached: false }),
        );
        outcomes.insert(
            "b".to_string(),
            Outcome::Ran(RunResult { hash: "h".into(), code: 3, log: None, cached: false }),
        );
        assert_eq!(RunReport { outcomes }.exit_code(), 3);
    }

    #[tokio::test]
    async fn fail_fast_stops_scheduling_downstream_after_failure() {
        use super::{Outcome, Scheduler};
        use crate::cache::{Cache, UncachedCache};
        use crate::config::CacheWhen;
        use crate::dep::{CommandResolver, Dep};
        use crate::env::{Environment, NullEnvironment};
        use crate::graph::Graph;
        use crate::registry::CallableRegistry;
        use crate::runnable::{Body, Runnable};
        use std::collections::BTreeMap;
        use std::sync::Arc;

        struct FixedResolver;
        impl CommandResolver for FixedResolver {
            fn resolve(&self, cmd: &str, _args: &BTreeMap<String, Option<String>>) -> Vec<String> {
                if cmd == "a" {
                    vec!["a".to_string()]
                } else {
                    Vec::new()
                }
            }
        }

        let a = Arc::new(Runnable::new(
            "a".into(),
            Body::Callable("fail".into()),
            None,
            None,
            vec![],
            vec![],
            None,
            CacheWhen::Success,
            BTreeMap::new(),
        ));
        let c = Arc::new(Runnable::new(
            "c".into(),
            Body::Callable("noop".into()),
            None,
            None,
            vec![Dep::Cmd {
                name: "a".into(),
                strict: false,
                isolated: None,
                args: BTreeMap::new(),
            }],
            vec![],
            None,
            CacheWhen::Success,
            BTreeMap::new(),
        ));

        let env: Arc<dyn Environment> = Arc::new(NullEnvironment::new("x"));
        let graph = Graph::build(&[a.clone(), c.clone()], &FixedResolver, env.as_ref(), None).unwrap();

        let mut callables = CallableRegistry::default();
        callables.register("fail", Arc::new(|_args: &BTreeMap<String, Option<String>>| (1, None)));
        callables.register("noop", Arc::new(|_args: &BTreeMap<String, Option<String>>| (0, None)));
        let callables = Arc::new(callables);

        let uncached: Arc<dyn Cache> = Arc::new(UncachedCache);
        let cache_for = move |_: &Runnable| uncached.clone();

        let scheduler = Scheduler::new(&graph, &cache_for, env, callables, false, true, true);

        let mut runnables = BTreeMap::new();
        runnables.insert("a".to_string(), a.clone());
        runnables.insert("c".to_string(), c.clone());

        let dir = tempfile::tempdir().unwrap();
        let report = scheduler
            .run(&runnables, dir.path(), None, dir.path(), &BTreeMap::new(), 1)
            .await;

        assert!(matches!(report.outcomes.get("a"), Some(Outcome::Ran(r)) if r.code == 1));
        assert!(report.outcomes.get("c").is_none());
    }
}
