//! A2 — the human-facing event stream a run emits, separate from the
//! `tracing` diagnostic log: "runnable X started", "runnable X finished
//! with code 0 (cached)", "N files changed, re-running", an uncaught
//! exception banner. Grounded on `qik/logger.py`/`qik/console.py`.

use owo_colors::OwoColorize;

use crate::scheduler::Outcome;

/// One user-facing event a [`Logger`] renders. Distinct from `tracing`
/// spans/events, which are for operators/debugging, not the run's own
/// progress narration.
#[derive(Debug, Clone)]
pub enum Event<'a> {
    Start { runnable: &'a str },
    Finish { runnable: &'a str, outcome: &'a Outcome },
    ChangesDetected { count: usize },
    Exception { message: &'a str },
}

pub trait Logger: Send + Sync {
    fn log(&self, event: Event<'_>);
}

/// Pick [`ProgressLogger`] for an interactive terminal, [`StdoutLogger`]
/// for a pipe/CI runner — the same interactive-vs-plain split `console`
/// exists for.
pub fn default_logger() -> Box<dyn Logger> {
    if console::Term::stdout().is_term() {
        Box::new(ProgressLogger)
    } else {
        Box::new(StdoutLogger)
    }
}

/// Plain, unadorned stdout lines. Used for `--ls` and non-interactive
/// (CI, piped) runs where a progress bar would just add noise to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutLogger;

impl Logger for StdoutLogger {
    fn log(&self, event: Event<'_>) {
        match event {
            Event::Start { runnable } => println!("start  {runnable}"),
            Event::Finish { runnable, outcome } => println!("{}", format_finish(runnable, outcome)),
            Event::ChangesDetected { count } => println!("{count} file(s) changed, re-running"),
            Event::Exception { message } => println!("error: {message}"),
        }
    }
}

/// Colorized, terminal-aware output — green/red finish lines, a dim
/// "(cached)" suffix for hits. Falls back to the same text `StdoutLogger`
/// prints; only the styling differs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressLogger;

impl Logger for ProgressLogger {
    fn log(&self, event: Event<'_>) {
        match event {
            Event::Start { runnable } => println!("{} {runnable}", "start ".dimmed()),
            Event::Finish { runnable, outcome } => {
                let line = format_finish(runnable, outcome);
                match outcome {
                    Outcome::Ran(result) if result.code == 0 => println!("{}", line.green()),
                    Outcome::Ran(_) => println!("{}", line.red()),
                    Outcome::Skipped { .. } => println!("{}", line.yellow()),
                    Outcome::Errored(_) => println!("{}", line.red().bold().to_string()),
                }
            }
            Event::ChangesDetected { count } => {
                println!("{}", format!("{count} file(s) changed, re-running").cyan())
            }
            Event::Exception { message } => println!("{}", format!("error: {message}").red().bold()),
        }
    }
}

fn format_finish(runnable: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Ran(result) if result.cached => {
            format!("finish {runnable} code={} (cached)", result.code)
        }
        Outcome::Ran(result) => format!("finish {runnable} code={}", result.code),
        Outcome::Skipped { upstream } => format!("skip   {runnable} (upstream {upstream} failed)"),
        Outcome::Errored(message) => format!("error  {runnable}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::Result as RunResult;

    #[test]
    fn format_finish_marks_cache_hits() {
        let outcome = Outcome::Ran(RunResult {
            hash: "abc".into(),
            code: 0,
            log: None,
            cached: true,
        });
        assert_eq!(format_finish("build#core", &outcome), "finish build#core code=0 (cached)");
    }

    #[test]
    fn format_finish_reports_skip_reason() {
        let outcome = Outcome::Skipped { upstream: "lib#core".into() };
        assert_eq!(
            format_finish("app#web", &outcome),
            "skip   app#web (upstream lib#core failed)"
        );
    }
}
