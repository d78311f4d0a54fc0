//! A5 — the per-run `manifest.json`: a durable record of what a run did,
//! independent of the human-facing log lines [`crate::logger`] prints.
//! Grounded on `qik/logger.py::Stats`/`Manifest`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::scheduler::{Outcome, RunReport};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
    Skipped,
    Pending,
}

/// Written to `<private-dir>/out/manifest.json` at the end of a run. Drives
/// `--ls` (list `runnables` without running them, all `Pending`) and
/// `--fail` (re-read the manifest of the most recent failed run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub cmd_status: BTreeMap<String, RunStatus>,
    pub runnables: Vec<String>,
    pub runnable_status: BTreeMap<String, RunStatus>,
    pub cached_runnables: Vec<String>,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let mut runnable_status = BTreeMap::new();
        let mut cmd_status: BTreeMap<String, RunStatus> = BTreeMap::new();
        let mut cached_runnables = Vec::new();

        for (name, outcome) in &report.outcomes {
            let status = status_of(outcome);
            runnable_status.insert(name.clone(), status);

            if is_cached(outcome) {
                cached_runnables.push(name.clone());
            }

            let cmd = name.split(['@', '#', '?']).next().unwrap_or(name).to_string();
            let entry = cmd_status.entry(cmd).or_insert(status);
            *entry = worse(*entry, status);
        }

        let mut runnables: Vec<String> = report.outcomes.keys().cloned().collect();
        runnables.sort();
        cached_runnables.sort();

        Self {
            cmd_status,
            runnables,
            runnable_status,
            cached_runnables,
        }
    }

    /// A manifest for `--ls`: every selected runnable listed as `Pending`,
    /// none executed.
    pub fn pending(runnables: &[String]) -> Self {
        let runnable_status = runnables.iter().map(|n| (n.clone(), RunStatus::Pending)).collect();
        let cmd_status = runnables
            .iter()
            .map(|n| (n.split(['@', '#', '?']).next().unwrap_or(n).to_string(), RunStatus::Pending))
            .collect();
        Self {
            cmd_status,
            runnables: runnables.to_vec(),
            runnable_status,
            cached_runnables: Vec::new(),
        }
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Whether the run this summary describes should exit nonzero.
    pub fn exit_code(&self) -> i32 {
        if self
            .runnable_status
            .values()
            .any(|s| matches!(s, RunStatus::Failed))
        {
            1
        } else {
            0
        }
    }
}

/// A module's status worsens: `Pending` < `Skipped` < `Success` < `Failed`
/// in severity, so a command with any failed runnable is `Failed` overall.
fn worse(a: RunStatus, b: RunStatus) -> RunStatus {
    fn rank(s: RunStatus) -> u8 {
        match s {
            RunStatus::Pending => 0,
            RunStatus::Skipped => 1,
            RunStatus::Success => 2,
            RunStatus::Failed => 3,
        }
    }
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

fn status_of(outcome: &Outcome) -> RunStatus {
    match outcome {
        Outcome::Ran(result) if result.code == 0 => RunStatus::Success,
        Outcome::Ran(_) => RunStatus::Failed,
        Outcome::Skipped { .. } => RunStatus::Skipped,
        Outcome::Errored(_) => RunStatus::Failed,
    }
}

fn is_cached(outcome: &Outcome) -> bool {
    matches!(outcome, Outcome::Ran(result) if result.cached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::Result as RunResult;
    use std::collections::BTreeMap as Map;

    #[test]
    fn from_report_tracks_cached_runnables() {
        let mut outcomes = Map::new();
        outcomes.insert(
            "build#core".to_string(),
            Outcome::Ran(RunResult { hash: "h".into(), code: 0, log: None, cached: true }),
        );
        outcomes.insert(
            "test#core".to_string(),
            Outcome::Ran(RunResult { hash: "h".into(), code: 1, log: None, cached: false }),
        );

        let summary = RunSummary::from_report(&RunReport { outcomes });
        assert_eq!(summary.cached_runnables, vec!["build#core".to_string()]);
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.cmd_status["test"], RunStatus::Failed);
    }

    #[test]
    fn pending_summary_marks_everything_pending() {
        let summary = RunSummary::pending(&["build#core".to_string()]);
        assert_eq!(summary.runnable_status["build#core"], RunStatus::Pending);
        assert_eq!(summary.exit_code(), 0);
    }
}
