//! bosun - a make-style build-task runner
//!
//! Tasks are declared in a Rhai build script (`bosunfile.rhai`), found by
//! walking up from the working directory. The engine invokes dependencies
//! depth-first, skips fresh file-backed tasks by mtime, and runs every
//! task at most once per run.

use std::process::ExitCode;

use clap::Parser;
use console::style;

mod app;
mod cli;
mod config;
mod error;
mod registry;
mod script;
mod task;

use app::Application;
use cli::Cli;
use config::{Project, CONFIG_FILES, INIT_TEMPLATE};
use error::Result;
use script::ScriptHost;

fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = Cli::parse();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            if cli.trace {
                eprintln!("{}: {}", style("error").red().bold(), e);
                let mut source = std::error::Error::source(&e);
                while let Some(cause) = source {
                    eprintln!("  {} {}", style("caused by:").dim(), cause);
                    source = cause.source();
                }
            } else {
                eprintln!(
                    "{}: {} (use --trace for details)",
                    style("error").red().bold(),
                    e
                );
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    if let Some(dir) = &cli.chdir {
        std::env::set_current_dir(dir)?;
    }

    if cli.init {
        return init_project();
    }

    let (task_names, env) = cli.split_args();
    for (name, value) in &env {
        std::env::set_var(name, value);
    }

    let project = Project::discover(cli.config.as_deref(), &std::env::current_dir()?)?;

    let mut application = Application::new(project.root.clone());
    application.force_run = cli.force;
    application.trace = cli.trace;

    let mut host = ScriptHost::new(application.registry());
    host.eval_file(&project.config_path)?;
    for script in project.load_path_scripts() {
        host.eval_file(&script)?;
        tracing::info!(script = %script.display(), "loaded task script");
    }

    if cli.tasks {
        print!("{}", application.format_task_list(cli.all));
        return Ok(());
    }

    application.execute(&task_names)
}

fn init_project() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILES[0]);

    if path.exists() {
        return Err(error::BosunError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "project already has a bosunfile.rhai",
        )));
    }

    std::fs::write(path, INIT_TEMPLATE)?;

    println!(
        "{} Initialized project at {}",
        style("✓").green(),
        std::env::current_dir()?.display()
    );

    Ok(())
}
