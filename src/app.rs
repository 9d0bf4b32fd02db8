//! Engine orchestration
//!
//! The application owns the task registry and the invocation chain, and
//! drives the depth-first invocation algorithm: prerequisites before
//! actions, every task at most once per run, cycles broken by chain
//! membership. Tasks execute with the working directory set to the project
//! root; a guard restores the original directory even when an action fails.

use std::borrow::Cow;
use std::cell::RefCell;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use console::style;
use tracing::{debug, info};

use crate::error::{BosunError, Result};
use crate::registry::{InvocationChain, TaskRegistry};
use crate::task::{Task, TaskHandle, TaskKind};

/// Anything that can stand in for a task when asking "is this defined?":
/// a name, a task, or a handle.
pub trait TaskName {
    fn task_name(&self) -> Cow<'_, str>;
}

impl TaskName for &str {
    fn task_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl TaskName for String {
    fn task_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

impl TaskName for &Task {
    fn task_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

impl TaskName for &TaskHandle {
    fn task_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.borrow().name.clone())
    }
}

/// Scoped working-directory change; restores the previous directory on drop.
struct DirGuard {
    previous: PathBuf,
}

impl DirGuard {
    fn change_to(dir: &Path) -> io::Result<Self> {
        let previous = env::current_dir()?;
        env::set_current_dir(dir)?;
        Ok(Self { previous })
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.previous);
    }
}

/// The build engine.
pub struct Application {
    registry: Rc<RefCell<TaskRegistry>>,
    chain: RefCell<InvocationChain>,
    /// Run tasks even when they are not needed.
    pub force_run: bool,
    /// Log every skip/invoke decision.
    pub trace: bool,
    /// Directory of the root build script; the working directory while
    /// tasks execute.
    pub project_dir: PathBuf,
}

impl Application {
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            registry: Rc::new(RefCell::new(TaskRegistry::new())),
            chain: RefCell::new(InvocationChain::new()),
            force_run: false,
            trace: false,
            project_dir,
        }
    }

    /// Shared registry handle, for wiring into the script DSL.
    pub fn registry(&self) -> Rc<RefCell<TaskRegistry>> {
        self.registry.clone()
    }

    /// Registers a task, merging into an already-registered task of the
    /// same name instead of replacing it.
    pub fn define_task(&self, task: Task) -> TaskHandle {
        let mut registry = self.registry.borrow_mut();
        if let Some(existing) = registry.get(&task.name) {
            let mut merged = existing.borrow_mut();
            merged.prerequisites.extend(task.prerequisites);
            merged.actions.extend(task.actions);
            if task.description.is_some() {
                merged.description = task.description;
            }
            if task.usage.is_some() {
                merged.usage = task.usage;
            }
            drop(merged);
            existing
        } else {
            registry.insert(task.into_handle())
        }
    }

    pub fn task_defined(&self, task: impl TaskName) -> bool {
        self.registry.borrow().contains(&task.task_name())
    }

    /// Runs the requested tasks. All names are resolved up front; an
    /// unknown name aborts the run before anything executes. An empty list
    /// falls back to the first-registered task.
    pub fn execute(&self, names: &[String]) -> Result<()> {
        let resolved = self.resolve(names)?;
        let start = Instant::now();

        {
            let _cwd = DirGuard::change_to(&self.project_dir)?;

            for (name, task) in &resolved {
                info!(task = %name, "running task");
                println!("{} {}", style("bosun").cyan().bold(), style(name).bold());
                self.invoke(task)?;
            }
        }

        let elapsed = start.elapsed();
        println!(
            "{} build finished in {:.2}s",
            style("✓").green().bold(),
            elapsed.as_secs_f64()
        );

        Ok(())
    }

    fn resolve(&self, names: &[String]) -> Result<Vec<(String, TaskHandle)>> {
        let registry = self.registry.borrow();

        if names.is_empty() {
            let task = registry.first().ok_or(BosunError::NoTasksDefined)?;
            let name = task.borrow().name.clone();
            return Ok(vec![(name, task)]);
        }

        names
            .iter()
            .map(|name| {
                registry
                    .get(name)
                    .map(|task| (name.clone(), task))
                    .ok_or_else(|| BosunError::TaskNotFound {
                        name: name.clone(),
                        available: registry.names(),
                    })
            })
            .collect()
    }

    /// Invokes one task: prerequisites depth-first, then its own actions.
    ///
    /// A task already in the active chain (cycle) or already invoked this
    /// run (memo) is a no-op, as is a disabled task. Unless `force_run` is
    /// set, a task that is not needed is skipped. Errors from actions
    /// propagate unmodified; only `execute` converts them for reporting.
    pub fn invoke(&self, task: &TaskHandle) -> Result<()> {
        let (name, prerequisites, actions) = {
            let t = task.borrow();

            if !t.enabled {
                self.trace_decision(&t, "disabled, skipping");
                return Ok(());
            }
            if self.chain.borrow().has(task) {
                self.trace_decision(&t, "already in invocation chain");
                return Ok(());
            }
            if t.was_invoked() {
                self.trace_decision(&t, "already invoked this run");
                return Ok(());
            }
            if !self.force_run && !t.is_needed() {
                self.trace_decision(&t, "not needed, skipping");
                return Ok(());
            }

            self.trace_decision(&t, "invoking");
            (t.name.clone(), t.prerequisites.clone(), t.actions.clone())
        };

        self.chain.borrow_mut().push(task.clone());
        task.borrow_mut().mark_invoked();

        let result: Result<()> = (|| {
            for prereq in &prerequisites {
                // Names that are not registered tasks are plain references,
                // e.g. file paths used in staleness checks.
                let dep = self.registry.borrow().get(prereq);
                match dep {
                    Some(dep) => self.invoke(&dep)?,
                    None => debug!(task = %name, prerequisite = %prereq, "not a task, skipping"),
                }
            }

            for action in &actions {
                action.call(task)?;
            }

            Ok(())
        })();

        self.chain.borrow_mut().pop();
        result
    }

    fn trace_decision(&self, task: &Task, decision: &str) {
        let task_prereqs: Vec<&String> = {
            let registry = self.registry.borrow();
            task.prerequisites
                .iter()
                .filter(|p| registry.contains(p))
                .collect::<Vec<_>>()
        };
        if self.trace {
            info!(task = %task.name, prerequisites = ?task_prereqs, "{decision}");
        } else {
            debug!(task = %task.name, prerequisites = ?task_prereqs, "{decision}");
        }
    }

    /// Task names and descriptions in registration order.
    pub fn format_task_list(&self, all: bool) -> String {
        let mut text = format!("(in {})\n", self.project_dir.display());

        let registry = self.registry.borrow();
        for (i, handle) in registry.iter().enumerate() {
            let task = handle.borrow();

            // The first-registered task is the implicit default; file tasks
            // and undescribed tasks only show up on request.
            if i == 0 || (task.description.is_none() && !all) {
                continue;
            }

            match task.kind {
                TaskKind::File => text.push_str(&format!("File => {}\n", task.name)),
                TaskKind::Plain => text.push_str(&format!(
                    "bosun {}\n",
                    task.usage.as_deref().unwrap_or(&task.name)
                )),
            }

            if let Some(desc) = &task.description {
                text.push_str(&format!("    {}\n", desc));
            }
        }

        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;
    use std::cell::Cell;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn app() -> Application {
        Application::new(env::current_dir().unwrap())
    }

    fn counting_task(app: &Application, name: &str, deps: &[&str]) -> Rc<Cell<usize>> {
        let counter = Rc::new(Cell::new(0));
        let mut task = Task::new(name, TaskKind::Plain);
        for dep in deps {
            task.add_prerequisite(*dep);
        }
        let c = counter.clone();
        task.actions.push(Action::from_fn(move |_| {
            c.set(c.get() + 1);
            Ok(())
        }));
        app.define_task(task);
        counter
    }

    fn ordered_task(app: &Application, name: &str, deps: &[&str], log: &Rc<RefCell<Vec<String>>>) {
        let mut task = Task::new(name, TaskKind::Plain);
        for dep in deps {
            task.add_prerequisite(*dep);
        }
        let log = log.clone();
        let task_name = name.to_string();
        task.actions.push(Action::from_fn(move |_| {
            log.borrow_mut().push(task_name.clone());
            Ok(())
        }));
        app.define_task(task);
    }

    #[test]
    fn invoke_runs_actions_only_once_until_reenabled() {
        let app = app();
        let counter = counting_task(&app, "foo", &[]);
        let task = app.registry().borrow().get("foo").unwrap();

        app.invoke(&task).unwrap();
        app.invoke(&task).unwrap();
        assert_eq!(counter.get(), 1);

        task.borrow_mut().reenable();
        app.invoke(&task).unwrap();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn diamond_dependencies_run_shared_task_once() {
        let app = app();
        let log = Rc::new(RefCell::new(Vec::new()));
        ordered_task(&app, "a", &["b", "c"], &log);
        ordered_task(&app, "b", &["d"], &log);
        ordered_task(&app, "c", &["d"], &log);
        ordered_task(&app, "d", &[], &log);

        let a = app.registry().borrow().get("a").unwrap();
        app.invoke(&a).unwrap();

        let order = log.borrow().clone();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn cyclic_graph_terminates_and_runs_each_task_once() {
        let app = app();
        let a_count = counting_task(&app, "a", &["b"]);
        let b_count = counting_task(&app, "b", &["a"]);

        let a = app.registry().borrow().get("a").unwrap();
        app.invoke(&a).unwrap();

        assert_eq!(a_count.get(), 1);
        assert_eq!(b_count.get(), 1);
    }

    #[test]
    fn unregistered_prerequisite_is_ignored() {
        let app = app();
        let counter = counting_task(&app, "foo", &["not-a-task"]);

        let foo = app.registry().borrow().get("foo").unwrap();
        app.invoke(&foo).unwrap();

        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn disabled_task_is_a_no_op() {
        let app = app();
        let counter = counting_task(&app, "foo", &[]);

        let foo = app.registry().borrow().get("foo").unwrap();
        foo.borrow_mut().enabled = false;
        app.invoke(&foo).unwrap();

        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn fresh_file_task_is_skipped_but_force_run_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let input = dir.path().join("in.txt");
        std::fs::write(&target, "out").unwrap();
        std::fs::write(&input, "in").unwrap();

        let now = SystemTime::now();
        File::options()
            .write(true)
            .open(&input)
            .unwrap()
            .set_modified(now - Duration::from_secs(60))
            .unwrap();
        File::options()
            .write(true)
            .open(&target)
            .unwrap()
            .set_modified(now)
            .unwrap();

        let mut app = app();
        let counter = Rc::new(Cell::new(0));
        let mut task = Task::new(target.to_string_lossy(), TaskKind::File);
        task.add_prerequisite(input.to_string_lossy());
        let c = counter.clone();
        task.actions.push(Action::from_fn(move |_| {
            c.set(c.get() + 1);
            Ok(())
        }));
        let handle = app.define_task(task);

        app.invoke(&handle).unwrap();
        assert_eq!(counter.get(), 0);

        app.force_run = true;
        app.invoke(&handle).unwrap();
        assert_eq!(counter.get(), 1);

        // Still bound by the once-per-run memo.
        app.invoke(&handle).unwrap();
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn execute_runs_dependencies_before_dependents() {
        let app = app();
        let log = Rc::new(RefCell::new(Vec::new()));
        ordered_task(&app, "bar", &[], &log);
        ordered_task(&app, "foo", &["bar"], &log);

        app.execute(&["foo".to_string()]).unwrap();

        assert_eq!(log.borrow().clone(), vec!["bar", "foo"]);
    }

    #[test]
    fn execute_defaults_to_first_registered_task() {
        let app = app();
        let first = counting_task(&app, "first", &[]);
        let second = counting_task(&app, "second", &[]);

        app.execute(&[]).unwrap();

        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 0);
    }

    #[test]
    fn execute_with_no_tasks_is_an_error() {
        let app = app();
        let err = app.execute(&[]).unwrap_err();
        assert!(matches!(err, BosunError::NoTasksDefined));
    }

    #[test]
    fn execute_reports_unknown_task_and_runs_nothing() {
        let app = app();
        let counter = counting_task(&app, "known", &[]);

        let names = vec!["known".to_string(), "missing".to_string()];
        let err = app.execute(&names).unwrap_err();

        match err {
            BosunError::TaskNotFound { name, available } => {
                assert_eq!(name, "missing");
                assert_eq!(available, vec!["known"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn action_error_aborts_remaining_tasks() {
        let app = app();

        let mut doomed = Task::new("doomed", TaskKind::Plain);
        doomed.actions.push(Action::from_fn(|_| {
            Err(BosunError::ActionFailed {
                task: "doomed".into(),
                source: "boom".into(),
            })
        }));
        app.define_task(doomed);
        let after = counting_task(&app, "after", &[]);

        let names = vec!["doomed".to_string(), "after".to_string()];
        assert!(app.execute(&names).is_err());
        assert_eq!(after.get(), 0);
    }

    #[test]
    fn redefining_a_task_merges_instead_of_replacing() {
        let app = app();
        let first = counting_task(&app, "build", &["compile"]);
        let second = counting_task(&app, "build", &["docs"]);

        let build = app.registry().borrow().get("build").unwrap();
        assert_eq!(build.borrow().prerequisites, vec!["compile", "docs"]);

        app.invoke(&build).unwrap();
        assert_eq!(first.get(), 1);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn task_defined_accepts_names_and_handles() {
        let app = app();
        counting_task(&app, "foo", &[]);
        let foo = app.registry().borrow().get("foo").unwrap();

        assert!(app.task_defined("foo"));
        assert!(app.task_defined(&foo));
        assert!(!app.task_defined("bar"));
    }

    #[test]
    fn task_list_hides_default_and_undescribed_tasks() {
        let app = app();
        counting_task(&app, "default-task", &[]);
        counting_task(&app, "undescribed", &[]);

        let mut described = Task::new("greet", TaskKind::Plain);
        described.description = Some("Says hello".into());
        app.define_task(described);

        let mut artifact = Task::new("out.txt", TaskKind::File);
        artifact.description = Some("Build artifact".into());
        app.define_task(artifact);

        let listing = app.format_task_list(false);
        assert!(listing.contains("bosun greet"));
        assert!(listing.contains("Says hello"));
        assert!(listing.contains("File => out.txt"));
        assert!(!listing.contains("undescribed"));
        assert!(!listing.contains("default-task"));

        let listing_all = app.format_task_list(true);
        assert!(listing_all.contains("undescribed"));
    }
}
