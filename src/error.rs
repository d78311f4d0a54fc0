//! Two-tier error taxonomy: [`RunnerError`] aborts the whole run,
//! [`RunnableError`] is caught per-runnable and surfaces as exit code 1.

use thiserror::Error;

/// Fatal errors that abort the run with a nonzero exit code.
///
/// Each variant carries a short stable code (via [`RunnerError::code`]) for
/// documentation links, matching qik's `errors.py` convention.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("failed to import plugin: {0}")]
    PluginImport(String),
    #[error("cycle detected in dependency graph")]
    GraphCycle,
    #[error("space not found: {0}")]
    SpaceNotFound(String),
    #[error("cache backend not configured: {0}")]
    UnconfiguredCache(String),
    #[error("invalid cache backend type: {0}")]
    InvalidCacheType(String),
    #[error("circular reference between venvs")]
    CircularVenv,
    #[error("circular reference between fences")]
    CircularFence,
    #[error("context value not found: {0}")]
    CtxValueNotFound(String),
    #[error("failed to cast environment variable {key}: {message}")]
    EnvCast { key: String, message: String },
    #[error("required argument not supplied: {0}")]
    ArgNotSupplied(String),
}

impl RunnerError {
    /// A short stable identifier, usable in doc links and log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "conf0",
            Self::ConfigParse(_) => "conf1",
            Self::ModuleNotFound(_) => "conf2",
            Self::CommandNotFound(_) => "conf5",
            Self::PluginImport(_) => "conf6",
            Self::GraphCycle => "conf7",
            Self::SpaceNotFound(_) => "conf8",
            Self::UnconfiguredCache(_) => "conf9",
            Self::InvalidCacheType(_) => "conf10",
            Self::CircularVenv => "conf11",
            Self::CircularFence => "conf12",
            Self::CtxValueNotFound(_) => "conf13",
            Self::EnvCast { .. } => "conf14",
            Self::ArgNotSupplied(_) => "conf15",
        }
    }
}

/// Non-fatal errors raised while executing a single runnable. These never
/// abort the run: they are rendered as the runnable's log and the runnable
/// reports exit code 1, same as any other failure.
#[derive(Debug, Error)]
pub enum RunnableError {
    #[error("lock file not found: {0}")]
    LockFileNotFound(String),
    #[error("virtual environment not found: {0}")]
    VenvNotFound(String),
    #[error("dotenv file not found: {0}")]
    DotEnvNotFound(String),
    #[error("distribution not found: {0}")]
    DistributionNotFound(String),
}

impl RunnableError {
    /// Render the error the way a runnable's captured log would show it.
    pub fn format_for_log(&self) -> String {
        format!("error: {self}")
    }
}
