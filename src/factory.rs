//! C5 — expands one [`CommandConfig`] (scoped to one [`ModuleConfig`]) into
//! the one or more [`Runnable`]s it names. Most commands expand to exactly
//! one runnable; a `factory` name routes through [`FactoryRegistry`] for
//! commands that fan out per argument set (qik's `**args` expansion) or
//! per submodule placeholder. Also the [`CommandResolver`] implementation
//! [`crate::dep::Dep::Cmd`] edges resolve through.
//!
//! Grounded on `qik/runnable.py::factory`/`_make_runnable` and `qik/cmd.py`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{CommandConfig, ModuleConfig, WorkspaceConfig};
use crate::dep::CommandResolver;
use crate::registry::FactoryRegistry;
use crate::runnable::{Body, Runnable};

/// The module-name substitution token in a `shell`/`exec` template, per
/// spec.md §4.5's "`exec` contains a module placeholder" rule.
const MODULE_PLACEHOLDER: &str = "{module}";

/// Builds every [`Runnable`] a [`WorkspaceConfig`] names and indexes them by
/// their [`Runnable::name`] for graph construction and `Dep::Cmd` resolution.
pub struct CommandRegistry {
    runnables: RwLock<BTreeMap<String, Arc<Runnable>>>,
    hidden: BTreeSet<String>,
}

impl CommandRegistry {
    /// Expand every module's commands. `factories` supplies custom
    /// expansion for commands naming a `factory`; commands without one
    /// expand per spec.md §4.5 — one runnable per space the owning module
    /// belongs to (or the command's pinned `space`), with the module
    /// placeholder substituted when the template uses one.
    pub fn build(config: &WorkspaceConfig, factories: &FactoryRegistry) -> Self {
        let mut runnables = BTreeMap::new();
        let mut hidden = BTreeSet::new();

        for module in &config.modules {
            for command in &module.commands {
                for runnable in expand(command, module, config, factories) {
                    if command.hidden {
                        hidden.insert(runnable.name.clone());
                    }
                    runnables.insert(runnable.name.clone(), Arc::new(runnable));
                }
            }
        }

        Self {
            runnables: RwLock::new(runnables),
            hidden,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Runnable>> {
        self.runnables.read().get(name).cloned()
    }

    /// Every runnable meant to be run directly — excludes commands marked
    /// `hidden` in config, which exist only to be depended on.
    pub fn all(&self) -> Vec<Arc<Runnable>> {
        self.runnables
            .read()
            .values()
            .filter(|r| !self.hidden.contains(&r.name))
            .cloned()
            .collect()
    }

    /// Every runnable whose `cmd` matches, across modules/args — the set a
    /// bare `Dep::Cmd { name: "lint" }` (no `#module`) edge resolves to.
    pub fn by_cmd(&self, cmd: &str) -> Vec<String> {
        self.runnables
            .read()
            .values()
            .filter(|r| r.cmd == cmd)
            .map(|r| r.name.clone())
            .collect()
    }
}

impl CommandResolver for CommandRegistry {
    fn resolve(&self, cmd: &str, args: &BTreeMap<String, Option<String>>) -> Vec<String> {
        let runnables = self.runnables.read();

        // An exact fmt_name match (cmd carries @space/#module/?args already)
        // wins outright; otherwise fall back to every runnable sharing the
        // base `cmd`, further narrowed by the args this edge supplies.
        if runnables.contains_key(cmd) {
            return vec![cmd.to_string()];
        }

        runnables
            .values()
            .filter(|r| r.cmd == cmd && (args.is_empty() || r.args == *args))
            .map(|r| r.name.clone())
            .collect()
    }

    fn get_runnable(&self, name: &str) -> Option<Arc<Runnable>> {
        self.get(name)
    }
}

/// Expand one command declaration against one module into its runnables.
///
/// Per spec.md §4.5: if the template names a module placeholder it's
/// substituted in; either way the command fans out to one runnable per
/// (space, module) pair, `module` already fixed by the caller's loop over
/// `config.modules`, so it reduces to one runnable per candidate space.
fn expand(
    command: &CommandConfig,
    module: &ModuleConfig,
    workspace: &WorkspaceConfig,
    factories: &FactoryRegistry,
) -> Vec<Runnable> {
    if let Some(factory_name) = &command.factory {
        if let Some(factory) = factories.get(factory_name) {
            return factory(command, module);
        }
    }

    spaces_for(command, module, workspace)
        .into_iter()
        .map(|space| make_runnable(command, module, space, command.args.clone()))
        .collect()
}

/// The spaces a command expands into: its pinned `space` if set, else every
/// space the owning module is a member of, else a single unscoped runnable
/// when the module belongs to no space at all.
fn spaces_for(command: &CommandConfig, module: &ModuleConfig, workspace: &WorkspaceConfig) -> Vec<Option<String>> {
    if let Some(space) = &command.space {
        return vec![Some(space.clone())];
    }

    let member_spaces: Vec<Option<String>> = workspace
        .spaces
        .iter()
        .filter(|s| s.modules.iter().any(|m| m == &module.name))
        .map(|s| Some(s.name.clone()))
        .collect();

    if member_spaces.is_empty() {
        vec![None]
    } else {
        member_spaces
    }
}

fn make_runnable(
    command: &CommandConfig,
    module: &ModuleConfig,
    space: Option<String>,
    args: BTreeMap<String, Option<String>>,
) -> Runnable {
    let substitute = |template: &str| template.replace(MODULE_PLACEHOLDER, &module.name);

    let body = match (&command.shell, &command.exec) {
        (Some(shell), _) => Body::Shell(substitute(shell)),
        (None, Some(exec)) => Body::Callable(substitute(exec)),
        (None, None) => Body::Shell(String::new()),
    };

    let mut deps = module.deps.clone();
    deps.extend(command.deps.clone());

    Runnable::new(
        command.name.clone(),
        body,
        Some(module.name.clone()),
        space,
        deps,
        command.artifacts.clone(),
        command.cache.clone(),
        command.cache_when,
        args,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceConfig;

    fn module(name: &str, commands: Vec<CommandConfig>) -> ModuleConfig {
        ModuleConfig {
            name: name.to_string(),
            path: name.to_string(),
            commands,
            deps: vec![],
        }
    }

    fn command(name: &str) -> CommandConfig {
        CommandConfig {
            name: name.to_string(),
            shell: Some("echo hi".to_string()),
            exec: None,
            factory: None,
            deps: vec![],
            artifacts: vec![],
            cache: None,
            cache_when: Default::default(),
            strict: false,
            isolated: None,
            args: BTreeMap::new(),
            hidden: false,
            space: None,
        }
    }

    #[test]
    fn build_indexes_runnables_by_fmt_name() {
        let config = WorkspaceConfig {
            modules: vec![module("core", vec![command("test")])],
            ..Default::default()
        };
        let registry = CommandRegistry::build(&config, &FactoryRegistry::default());
        assert!(registry.get("test#core").is_some());
    }

    #[test]
    fn resolve_matches_by_base_cmd_across_modules() {
        let config = WorkspaceConfig {
            modules: vec![
                module("core", vec![command("test")]),
                module("web", vec![command("test")]),
            ],
            ..Default::default()
        };
        let registry = CommandRegistry::build(&config, &FactoryRegistry::default());
        let mut names = registry.resolve("test", &BTreeMap::new());
        names.sort();
        assert_eq!(names, vec!["test#core".to_string(), "test#web".to_string()]);
    }

    #[test]
    fn pinned_space_produces_one_tagged_runnable() {
        let mut cmd = command("test");
        cmd.space = Some("py".to_string());
        let config = WorkspaceConfig {
            modules: vec![module("core", vec![cmd])],
            ..Default::default()
        };
        let registry = CommandRegistry::build(&config, &FactoryRegistry::default());
        assert!(registry.get("test@py#core").is_some());
        assert!(registry.get("test#core").is_none());
    }

    #[test]
    fn module_in_two_spaces_expands_to_two_runnables() {
        let config = WorkspaceConfig {
            modules: vec![module("core", vec![command("test")])],
            spaces: vec![
                SpaceConfig { name: "py".to_string(), modules: vec!["core".to_string()] },
                SpaceConfig { name: "js".to_string(), modules: vec!["core".to_string()] },
            ],
            ..Default::default()
        };
        let registry = CommandRegistry::build(&config, &FactoryRegistry::default());
        assert!(registry.get("test@py#core").is_some());
        assert!(registry.get("test@js#core").is_some());
    }

    #[test]
    fn module_placeholder_is_substituted_in_shell_template() {
        let mut cmd = command("build");
        cmd.shell = Some("build-{module}.sh".to_string());
        let config = WorkspaceConfig {
            modules: vec![module("core", vec![cmd])],
            ..Default::default()
        };
        let registry = CommandRegistry::build(&config, &FactoryRegistry::default());
        let runnable = registry.get("build#core").unwrap();
        match &runnable.body {
            Body::Shell(shell) => assert_eq!(shell, "build-core.sh"),
            Body::Callable(_) => panic!("expected shell body"),
        }
    }

    #[test]
    fn hidden_command_is_resolvable_but_excluded_from_all() {
        let mut cmd = command("internal");
        cmd.hidden = true;
        let config = WorkspaceConfig {
            modules: vec![module("core", vec![cmd])],
            ..Default::default()
        };
        let registry = CommandRegistry::build(&config, &FactoryRegistry::default());
        assert!(registry.get("internal#core").is_some());
        assert!(registry.all().is_empty());
    }
}
