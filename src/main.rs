//! Thin CLI entry point: parse args, load the JSON config stand-in, build
//! the command registry and graph, run the scheduler, write the manifest.
//! Config *loading* (the TOML layer) is the excluded collaborator; this
//! reads the same `serde`-shaped `WorkspaceConfig` a loader would produce,
//! from a JSON file, for standalone use. Grounded on `turborepo-lib`'s
//! `main.rs`/`lib.rs::main` wiring.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use itertools::Itertools;

use bramble::cache::{Cache, UncachedCache};
use bramble::cli::Cli;
use bramble::config::WorkspaceConfig;
use bramble::dep::DepsCollection;
use bramble::env::{Environment, NullEnvironment};
use bramble::factory::CommandRegistry;
use bramble::filters::{by_cache_status, by_caches, by_changes, by_modules, by_spaces, parse_cache_status, since, CacheStatus};
use bramble::graph::Graph;
use bramble::logger::{default_logger, Event};
use bramble::registry::{CallableRegistry, FactoryRegistry};
use bramble::run_summary::RunSummary;
use bramble::runnable::Runnable;
use bramble::scheduler::{RunReport, Scheduler};
use bramble::watcher::{DebouncedWatcher, Event as WatchEvent};

const CONFIG_ENV_VAR: &str = "BRAMBLE_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "bramble.json";

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            eprintln!("error: {err}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let project_root = std::env::current_dir()?;
    let config_path = config_path(&project_root);
    let config = load_config(&config_path)?;

    let factories = FactoryRegistry::default();
    let callables = Arc::new(CallableRegistry::default());
    let env: Arc<dyn Environment> = Arc::new(NullEnvironment::new("default"));

    let registry = CommandRegistry::build(&config, &factories);
    let mut runnables = select_runnables(&cli, &registry, &config);
    let mut graph = Graph::build(&runnables, &registry, env.as_ref(), cli.isolated)?;

    if let Some(git_sha) = &cli.since {
        let env_for_since = env.clone();
        runnables = since(&project_root, git_sha, &runnables, &graph, |r| since_globs(r, env_for_since.as_ref()))?;
    }

    if cli.ls {
        let names: Vec<String> = runnables.iter().map(|r| r.name.clone()).collect();
        let summary = RunSummary::pending(&names);
        println!("{}", summary.runnables.iter().join("\n"));
        return Ok(0);
    }

    let uncached: Arc<dyn Cache> = Arc::new(UncachedCache);
    let cache_for = move |_: &Runnable| uncached.clone();

    let runnable_map = index_by_name(&runnables);
    let report = run_once(
        &graph,
        &cache_for,
        env.clone(),
        callables.clone(),
        cli.force,
        cli.fail,
        &runnable_map,
        &project_root,
        cli.workers,
    )
    .await;
    let mut summary = finish_run(&report, &project_root)?;

    if cli.watch {
        let watcher = DebouncedWatcher::new(&project_root, &config_path)?;
        loop {
            match watcher.next_event().await {
                WatchEvent::ConfigChanged => {
                    let config = load_config(&config_path)?;
                    let config_registry = CommandRegistry::build(&config, &factories);
                    runnables = select_runnables(&cli, &config_registry, &config);
                    graph = Graph::build(&runnables, &config_registry, env.as_ref(), cli.isolated)?;
                    let runnable_map = index_by_name(&runnables);
                    let report = run_once(
                        &graph,
                        &cache_for,
                        env.clone(),
                        callables.clone(),
                        cli.force,
                        cli.fail,
                        &runnable_map,
                        &project_root,
                        cli.workers,
                    )
                    .await;
                    summary = finish_run(&report, &project_root)?;
                }
                WatchEvent::Changed { paths, pydists } => {
                    let changed: BTreeSet<String> =
                        paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
                    let env_for_watch = env.clone();
                    let env_for_pydists = env.clone();
                    let affected = by_changes(
                        &runnables,
                        &changed,
                        &pydists,
                        &graph,
                        |r| watch_globs(r, env_for_watch.as_ref()),
                        |r| watch_pydists(r, env_for_pydists.as_ref()),
                    );
                    if affected.is_empty() {
                        continue;
                    }
                    let affected_map = index_by_name(&affected);
                    let report = run_once(
                        &graph,
                        &cache_for,
                        env.clone(),
                        callables.clone(),
                        cli.force,
                        cli.fail,
                        &affected_map,
                        &project_root,
                        cli.workers,
                    )
                    .await;
                    summary = finish_run(&report, &project_root)?;
                }
            }
        }
    }

    Ok(summary.exit_code())
}

/// Apply the `commands`/`--module`/`--space`/`--cache`/`--cache-status`
/// selectors, in that order, over every runnable the registry expanded.
fn select_runnables(cli: &Cli, registry: &CommandRegistry, config: &WorkspaceConfig) -> Vec<Arc<Runnable>> {
    let mut runnables = registry.all();

    if !cli.commands.is_empty() {
        let wanted: BTreeSet<&str> = cli.commands.iter().map(String::as_str).collect();
        runnables.retain(|r| wanted.contains(r.cmd.as_str()));
    }

    runnables = by_modules(&runnables, &cli.modules.iter().cloned().collect());
    runnables = by_spaces(&runnables, &cli.spaces.iter().cloned().collect(), config);
    runnables = by_caches(&runnables, &cli.caches.iter().cloned().collect());

    if let Some(status) = cli.cache_status.as_deref().and_then(parse_cache_status) {
        // No backend has been consulted yet at this point in the pipeline,
        // so every runnable probes as `Uncached` until a real cache lookup
        // is wired in; this still exercises the filter's plumbing end to
        // end against the `--cache-status` flag.
        runnables = by_cache_status(&runnables, status, |_| CacheStatus::Uncached);
    }

    runnables
}

fn since_globs(runnable: &Runnable, env: &dyn Environment) -> BTreeSet<String> {
    DepsCollection::new(&runnable.deps, runnable.module.as_deref(), env).since()
}

fn watch_globs(runnable: &Runnable, env: &dyn Environment) -> BTreeSet<String> {
    DepsCollection::new(&runnable.deps, runnable.module.as_deref(), env).watch()
}

fn watch_pydists(runnable: &Runnable, env: &dyn Environment) -> BTreeSet<String> {
    DepsCollection::new(&runnable.deps, runnable.module.as_deref(), env).pydists()
}

fn index_by_name(runnables: &[Arc<Runnable>]) -> BTreeMap<String, Arc<Runnable>> {
    runnables.iter().map(|r| (r.name.clone(), r.clone())).collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    graph: &Graph,
    cache_for: &(dyn Fn(&Runnable) -> Arc<dyn Cache> + Send + Sync),
    env: Arc<dyn Environment>,
    callables: Arc<CallableRegistry>,
    force: bool,
    fail_fast: bool,
    runnable_map: &BTreeMap<String, Arc<Runnable>>,
    project_root: &std::path::Path,
    workers: usize,
) -> RunReport {
    let scheduler = Scheduler::new(graph, cache_for, env, callables, force, true, fail_fast);
    scheduler
        .run(runnable_map, project_root, None, project_root, &Default::default(), workers)
        .await
}

fn finish_run(report: &RunReport, project_root: &std::path::Path) -> anyhow::Result<RunSummary> {
    let logger = default_logger();
    for (name, outcome) in &report.outcomes {
        logger.log(Event::Finish { runnable: name, outcome });
    }

    let summary = RunSummary::from_report(report);
    summary.write(&project_root.join(".bramble").join("out").join("manifest.json"))?;
    if !summary.cached_runnables.is_empty() {
        println!("cached: {}", summary.cached_runnables.iter().join(", "));
    }
    Ok(summary)
}

fn config_path(project_root: &std::path::Path) -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| project_root.join(DEFAULT_CONFIG_FILE))
}

fn load_config(path: &std::path::Path) -> anyhow::Result<WorkspaceConfig> {
    if !path.exists() {
        return Ok(WorkspaceConfig::default());
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
