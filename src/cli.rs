//! CLI argument definitions
//!
//! Uses `clap` derive API. No subcommands: bosun takes a list of task
//! names, optionally mixed with VAR=VALUE environment assignments, plus
//! flags.

use std::path::PathBuf;

use clap::Parser;

/// bosun - a make-style build-task runner with Rhai build scripts
#[derive(Parser, Debug)]
#[command(name = "bosun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the build script (skips discovery)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Change to this directory before doing anything
    #[arg(short = 'C', long, value_name = "DIR")]
    pub chdir: Option<PathBuf>,

    /// Run tasks even if they are not needed
    #[arg(short, long)]
    pub force: bool,

    /// Log every skip/invoke decision; show full error traces
    #[arg(short = 'T', long)]
    pub trace: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// List tasks and their descriptions
    #[arg(short, long)]
    pub tasks: bool,

    /// With --tasks: include file tasks and tasks without description
    #[arg(short = 'A', long)]
    pub all: bool,

    /// Create a starter bosunfile.rhai in the current directory
    #[arg(long)]
    pub init: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Task names to run, and NAME=VALUE environment assignments
    #[arg(value_name = "TASK|VAR=VALUE")]
    pub args: Vec<String>,
}

impl Cli {
    /// Splits positional arguments into task names and environment
    /// assignments (`NAME=VALUE` where NAME is an identifier).
    pub fn split_args(&self) -> (Vec<String>, Vec<(String, String)>) {
        let mut tasks = Vec::new();
        let mut env = Vec::new();

        for arg in &self.args {
            match parse_assignment(arg) {
                Some((name, value)) => env.push((name.to_string(), value.to_string())),
                None => tasks.push(arg.clone()),
            }
        }

        (tasks, env)
    }
}

fn parse_assignment(arg: &str) -> Option<(&str, &str)> {
    let (name, value) = arg.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name, value.trim_matches('"')))
}
