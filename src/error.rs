//! Error types for bosun
//!
//! Uses `miette` for pretty error reporting with error codes and help text.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for bosun operations
#[derive(Error, Diagnostic, Debug)]
pub enum BosunError {
    #[error("Build script not found")]
    #[diagnostic(
        code(bosun::config::not_found),
        help("Create a bosunfile.rhai in your project root (bosun --init), or point at one with --config")
    )]
    ConfigNotFound {
        searched: Vec<PathBuf>,
    },

    #[error("Failed to parse build script {}", path.display())]
    #[diagnostic(code(bosun::config::parse))]
    ConfigParse {
        #[source]
        source: rhai::ParseError,
        path: PathBuf,
    },

    #[error("Build script {} failed during evaluation", path.display())]
    #[diagnostic(code(bosun::config::eval))]
    ConfigEval {
        #[source]
        source: Box<rhai::EvalAltResult>,
        path: PathBuf,
    },

    #[error("Task '{name}' not found")]
    #[diagnostic(
        code(bosun::task::not_found),
        help("Run `bosun --tasks` to see available tasks")
    )]
    TaskNotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("No tasks defined")]
    #[diagnostic(
        code(bosun::task::none_defined),
        help("Declare at least one task() in your bosunfile.rhai")
    )]
    NoTasksDefined,

    #[error("Task '{task}' failed")]
    #[diagnostic(code(bosun::task::action_failed))]
    ActionFailed {
        task: String,
        #[source]
        source: Box<rhai::EvalAltResult>,
    },

    #[error("I/O error")]
    #[diagnostic(code(bosun::io))]
    Io(#[from] std::io::Error),
}

/// Result type alias for bosun operations
pub type Result<T> = std::result::Result<T, BosunError>;

impl BosunError {
    /// Process exit code for this error, per the CLI contract:
    /// 1 general failure, 2 task not found, 3 build script not found.
    pub fn exit_code(&self) -> u8 {
        match self {
            BosunError::TaskNotFound { .. } => 2,
            BosunError::ConfigNotFound { .. } => 3,
            _ => 1,
        }
    }
}
