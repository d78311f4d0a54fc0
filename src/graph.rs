//! C6 — builds the dependency graph over a set of [`Runnable`]s: upstream
//! edges come from each runnable's `Dep::Cmd` projections, respecting
//! `strict` (a failed strict upstream skips downstream) vs non-strict
//! (failure is ignored for scheduling purposes). Grounded on
//! `qik/runner.py::Graph`.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::dep::{CommandResolver, Runnable as DepEdge};
use crate::env::Environment;
use crate::error::RunnerError;
use crate::runnable::Runnable;

/// One DAG edge: `from` depends on `to`, with `strict`/`isolated` carried
/// from the originating [`crate::dep::Dep::Cmd`].
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub strict: bool,
    pub isolated: Option<bool>,
}

pub struct Graph {
    graph: DiGraph<String, Edge>,
    index: BTreeMap<String, NodeIndex>,
}

impl Graph {
    /// Build a graph over `runnables`, resolving each one's `Dep::Cmd` edges
    /// through `resolver`. An `isolated` edge whose target isn't already in
    /// the selected set is simply dropped — isolation means "don't pull this
    /// in". A non-isolated edge with a missing target is resolved through
    /// `resolver.get_runnable` and recursively added to the graph instead,
    /// since a filtered run (e.g. `--module web`) must still pull in a
    /// strict, non-isolated upstream outside the filter for failure
    /// propagation to work. `isolated_override`, when `Some`, replaces every
    /// edge's declared `isolated` flag with it (the `--isolated` CLI flag).
    /// Returns [`RunnerError::GraphCycle`] if the result isn't a DAG.
    pub fn build(
        runnables: &[std::sync::Arc<Runnable>],
        resolver: &dyn CommandResolver,
        env: &dyn Environment,
        isolated_override: Option<bool>,
    ) -> std::result::Result<Self, RunnerError> {
        let mut graph = DiGraph::new();
        let mut index: BTreeMap<String, NodeIndex> = BTreeMap::new();
        let mut worklist: Vec<std::sync::Arc<Runnable>> = Vec::new();

        for runnable in runnables {
            let node = graph.add_node(runnable.name.clone());
            index.insert(runnable.name.clone(), node);
            worklist.push(runnable.clone());
        }

        let mut i = 0;
        while i < worklist.len() {
            let runnable = worklist[i].clone();
            i += 1;

            let from = index[&runnable.name];
            for edge in runnable.runnable_deps(resolver, env) {
                let DepEdge { name, strict, isolated } = edge;
                let isolated = match isolated_override {
                    Some(forced) => Some(forced),
                    None => isolated,
                };
                let is_isolated = isolated.unwrap_or(false);

                let to = match index.get(&name) {
                    Some(&existing) => existing,
                    None if is_isolated => continue,
                    None => {
                        let Some(target) = resolver.get_runnable(&name) else {
                            continue;
                        };
                        let node = graph.add_node(target.name.clone());
                        index.insert(target.name.clone(), node);
                        worklist.push(target);
                        node
                    }
                };

                graph.add_edge(from, to, Edge { strict, isolated });
            }
        }

        let built = Self { graph, index };
        if built.has_cycle() {
            return Err(RunnerError::GraphCycle);
        }
        Ok(built)
    }

    fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Direct upstream dependencies (what `name` depends on).
    pub fn upstream(&self, name: &str) -> Vec<(String, Edge)> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(node, Direction::Outgoing)
            .map(|e| (self.graph[e.target()].clone(), *e.weight()))
            .collect()
    }

    /// Direct downstream dependents (what depends on `name`).
    pub fn downstream(&self, name: &str) -> Vec<String> {
        let Some(&node) = self.index.get(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(node, Direction::Incoming)
            .map(|e| self.graph[e.source()].clone())
            .collect()
    }

    /// Transitive closure of everything `name` (directly or indirectly)
    /// depends on, via depth-first walk of outgoing edges.
    pub fn transitive_upstream(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for (upstream, _) in self.upstream(&current) {
                if seen.insert(upstream.clone()) {
                    stack.push(upstream);
                }
            }
        }
        seen
    }

    /// Transitive closure of everything that (directly or indirectly)
    /// depends on `name`.
    pub fn transitive_downstream(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            for downstream in self.downstream(&current) {
                if seen.insert(downstream.clone()) {
                    stack.push(downstream);
                }
            }
        }
        seen
    }

    pub fn node_names(&self) -> Vec<String> {
        self.index.keys().cloned().collect()
    }

    /// In-degree (number of upstream deps) for every node, the scheduler's
    /// starting ready-set input.
    pub fn in_degrees(&self) -> BTreeMap<String, usize> {
        self.index
            .keys()
            .map(|name| (name.clone(), self.upstream(name).len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheWhen;
    use crate::dep::Dep;
    use crate::env::NullEnvironment;
    use crate::runnable::Body;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    struct FixedResolver(BTreeMap<String, Vec<String>>);
    impl CommandResolver for FixedResolver {
        fn resolve(&self, cmd: &str, _args: &BTreeMap<String, Option<String>>) -> Vec<String> {
            self.0.get(cmd).cloned().unwrap_or_default()
        }
    }

    struct WorkspaceResolver(BTreeMap<String, Arc<Runnable>>);
    impl CommandResolver for WorkspaceResolver {
        fn resolve(&self, cmd: &str, _args: &BTreeMap<String, Option<String>>) -> Vec<String> {
            self.0
                .values()
                .filter(|r| r.cmd == cmd)
                .map(|r| r.name.clone())
                .collect()
        }

        fn get_runnable(&self, name: &str) -> Option<Arc<Runnable>> {
            self.0.get(name).cloned()
        }
    }

    fn runnable(name: &str, deps: Vec<Dep>) -> Arc<Runnable> {
        Arc::new(Runnable::new(
            name.to_string(),
            Body::Shell("true".into()),
            None,
            None,
            deps,
            vec![],
            None,
            CacheWhen::Success,
            BTreeMap::new(),
        ))
    }

    #[test]
    fn build_links_cmd_deps_as_edges() {
        let upstream = runnable("lib", vec![]);
        let downstream = runnable(
            "app",
            vec![Dep::Cmd {
                name: "lib".into(),
                strict: true,
                isolated: None,
                args: BTreeMap::new(),
            }],
        );
        let resolver = FixedResolver(BTreeMap::from([("lib".to_string(), vec!["lib".to_string()])]));
        let graph = Graph::build(&[upstream, downstream], &resolver, &NullEnvironment::new("x"), None).unwrap();

        assert_eq!(graph.upstream("app").len(), 1);
        assert_eq!(graph.upstream("app")[0].0, "lib");
        assert_eq!(graph.downstream("lib"), vec!["app".to_string()]);
    }

    #[test]
    fn transitive_closures_walk_multiple_hops() {
        let a = runnable("a", vec![]);
        let b = runnable(
            "b",
            vec![Dep::Cmd { name: "a".into(), strict: true, isolated: None, args: BTreeMap::new() }],
        );
        let c = runnable(
            "c",
            vec![Dep::Cmd { name: "b".into(), strict: true, isolated: None, args: BTreeMap::new() }],
        );
        let resolver = FixedResolver(BTreeMap::from([
            ("a".to_string(), vec!["a".to_string()]),
            ("b".to_string(), vec!["b".to_string()]),
        ]));
        let graph = Graph::build(&[a, b, c], &resolver, &NullEnvironment::new("x"), None).unwrap();

        assert_eq!(
            graph.transitive_upstream("c"),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            graph.transitive_downstream("a"),
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn non_isolated_missing_target_is_pulled_into_graph() {
        let core = runnable("build", vec![]);
        let web = runnable(
            "test",
            vec![Dep::Cmd {
                name: "build".into(),
                strict: true,
                isolated: None,
                args: BTreeMap::new(),
            }],
        );
        let workspace = WorkspaceResolver(BTreeMap::from([
            (core.name.clone(), core.clone()),
            (web.name.clone(), web.clone()),
        ]));

        // Only `web` is in the originally-selected set, as a `--module web`
        // filtered run would produce; `build` must still be pulled in.
        let graph = Graph::build(&[web.clone()], &workspace, &NullEnvironment::new("x"), None).unwrap();

        assert!(graph.contains("build"));
        assert_eq!(graph.upstream("test").len(), 1);
        assert_eq!(graph.upstream("test")[0].0, "build");
    }

    #[test]
    fn isolated_missing_target_is_dropped() {
        let core = runnable("build", vec![]);
        let web = runnable(
            "test",
            vec![Dep::Cmd {
                name: "build".into(),
                strict: true,
                isolated: Some(true),
                args: BTreeMap::new(),
            }],
        );
        let workspace = WorkspaceResolver(BTreeMap::from([
            (core.name.clone(), core.clone()),
            (web.name.clone(), web.clone()),
        ]));

        let graph = Graph::build(&[web.clone()], &workspace, &NullEnvironment::new("x"), None).unwrap();

        assert!(!graph.contains("build"));
        assert!(graph.upstream("test").is_empty());
    }
}
