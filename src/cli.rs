//! A3 — the command-line surface. Grounded on `turborepo-lib`'s `clap`
//! derive usage for its own run command, shaped to spec.md §6.

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "bramble", version, about = "Content-addressed, incremental workspace task runner")]
pub struct Cli {
    /// Command names to run, e.g. `test`, `build@py`.
    pub commands: Vec<String>,

    /// Restrict to these modules.
    #[arg(long = "module", value_delimiter = ',')]
    pub modules: Vec<String>,

    /// Restrict to these spaces.
    #[arg(long = "space", value_delimiter = ',')]
    pub spaces: Vec<String>,

    /// Only runnables changed since this git ref.
    #[arg(long)]
    pub since: Option<String>,

    /// Restrict to these cache backends.
    #[arg(long = "cache", value_delimiter = ',')]
    pub caches: Vec<String>,

    /// Restrict by cache status: `hit`, `miss`, or `uncached`.
    #[arg(long)]
    pub cache_status: Option<String>,

    /// Re-run on file changes until interrupted.
    #[arg(long)]
    pub watch: bool,

    /// Ignore cache entries and re-execute everything selected.
    #[arg(long)]
    pub force: bool,

    /// Concurrent worker count. `1` serializes; results are identical
    /// regardless of this value.
    #[arg(short = 'n', long, default_value_t = num_cpus())]
    pub workers: usize,

    /// Override each runnable's isolated flag.
    #[arg(long)]
    pub isolated: Option<bool>,

    /// List the selected runnables without executing them.
    #[arg(long)]
    pub ls: bool,

    /// Stop scheduling new work as soon as anything fails.
    #[arg(long)]
    pub fail: bool,

    /// Increase log verbosity (`-v` info, `-vv` debug).
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        let cli = Cli::parse_from(["bramble", "test", "lint"]);
        assert_eq!(cli.commands, vec!["test".to_string(), "lint".to_string()]);
        assert!(!cli.watch);
    }

    #[test]
    fn parses_module_and_since_flags() {
        let cli = Cli::parse_from(["bramble", "test", "--module", "core,web", "--since", "main"]);
        assert_eq!(cli.modules, vec!["core".to_string(), "web".to_string()]);
        assert_eq!(cli.since.as_deref(), Some("main"));
    }
}
