//! bosun - a make-style build-task runner with Rhai build scripts
//!
//! Tasks are named units of work with ordered actions and prerequisite
//! names. File-backed tasks compare the target's modification time against
//! their prerequisite paths and are skipped when fresh. Dependencies are
//! invoked depth-first; an invocation chain guards against cycles and a
//! per-run memo guarantees every task runs at most once unless reenabled.
//!
//! # Library Usage
//!
//! ```rust,ignore
//! use bosun::{Application, Project, ScriptHost};
//!
//! fn main() -> bosun::Result<()> {
//!     let project = Project::discover(None, &std::env::current_dir()?)?;
//!     let application = Application::new(project.root.clone());
//!
//!     let mut host = ScriptHost::new(application.registry());
//!     host.eval_file(&project.config_path)?;
//!
//!     application.execute(&["build".to_string()])
//! }
//! ```

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod registry;
pub mod script;
pub mod task;

// Re-export main types
pub use app::{Application, TaskName};
pub use config::Project;
pub use error::{BosunError, Result};
pub use registry::{InvocationChain, TaskRegistry};
pub use script::{ScriptAction, ScriptHost};
pub use task::{Action, Task, TaskHandle, TaskKind};
