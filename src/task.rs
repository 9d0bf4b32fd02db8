//! Task model
//!
//! A task is a named unit of work: an ordered list of actions, a list of
//! prerequisite names, and a staleness policy. File-backed tasks interpret
//! their name as a target path and compare modification times against their
//! prerequisite paths; plain tasks are always stale.

use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::SystemTime;

use crate::error::Result;
use crate::script::ScriptAction;

/// Shared handle to a task. Tasks are shared between the registry, the
/// invocation chain and script closures; identity is `Rc::ptr_eq`.
pub type TaskHandle = Rc<RefCell<Task>>;

/// Staleness policy of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Always considered stale.
    Plain,
    /// The task name is a target path; stale when the target is missing or
    /// older than the newest existing prerequisite path.
    File,
}

/// A single action of a task, run with the task itself as context.
#[derive(Clone)]
pub enum Action {
    /// A closure from the build script.
    Script(ScriptAction),
    /// A native Rust closure; used by library callers and tests.
    Native(Rc<dyn Fn(&TaskHandle) -> Result<()>>),
}

impl Action {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&TaskHandle) -> Result<()> + 'static,
    {
        Action::Native(Rc::new(f))
    }

    /// Run the action against `task`. The caller must not hold a borrow of
    /// the task while calling; actions are free to borrow it themselves.
    pub fn call(&self, task: &TaskHandle) -> Result<()> {
        match self {
            Action::Script(script) => script.call(task),
            Action::Native(f) => f(task),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Script(_) => f.write_str("Action::Script"),
            Action::Native(_) => f.write_str("Action::Native"),
        }
    }
}

/// A named unit of work.
#[derive(Debug)]
pub struct Task {
    /// Task name; for file tasks this is the target path.
    pub name: String,
    pub kind: TaskKind,
    /// Prerequisite names in declaration order. Names that are not
    /// registered tasks are legal; they may be plain file paths used only
    /// for staleness checks.
    pub prerequisites: Vec<String>,
    /// Actions in insertion order, never reordered.
    pub actions: Vec<Action>,
    pub description: Option<String>,
    pub usage: Option<String>,
    /// Disabled tasks invoke as a no-op.
    pub enabled: bool,
    already_invoked: bool,
}

impl Task {
    pub fn new(name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            kind,
            prerequisites: Vec::new(),
            actions: Vec::new(),
            description: None,
            usage: None,
            enabled: true,
            already_invoked: false,
        }
    }

    pub fn into_handle(self) -> TaskHandle {
        Rc::new(RefCell::new(self))
    }

    /// Appends a prerequisite name. Duplicates are kept as declared; the
    /// invocation chain de-duplicates at resolution time.
    pub fn add_prerequisite(&mut self, name: impl Into<String>) {
        self.prerequisites.push(name.into());
    }

    /// Merges additional prerequisites and optionally appends one more
    /// action. This is what lets a task declared in one build script be
    /// extended non-destructively by another.
    pub fn enhance<I, S>(&mut self, prerequisites: I, action: Option<Action>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for prereq in prerequisites {
            self.prerequisites.push(prereq.into());
        }
        if let Some(action) = action {
            self.actions.push(action);
        }
    }

    /// Drops all actions and prerequisites so the task can be redefined
    /// from scratch.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.prerequisites.clear();
    }

    /// Whether the task's actions must run this invocation.
    ///
    /// Plain tasks are always needed. File tasks are needed when the target
    /// does not exist, or when any existing prerequisite path is newer than
    /// the target. Missing prerequisite paths are ignored; if none exist the
    /// target counts as up to date.
    pub fn is_needed(&self) -> bool {
        match self.kind {
            TaskKind::Plain => true,
            TaskKind::File => {
                let target = Path::new(&self.name);
                let target_mtime = match mtime(target) {
                    Some(t) => t,
                    None => return true,
                };

                match self.prerequisites.iter().filter_map(|p| mtime(Path::new(p))).max() {
                    Some(newest) => newest > target_mtime,
                    None => false,
                }
            }
        }
    }

    /// True once the task has run within this process run.
    pub fn was_invoked(&self) -> bool {
        self.already_invoked
    }

    pub(crate) fn mark_invoked(&mut self) {
        self.already_invoked = true;
    }

    /// Resets the invoked marker so a subsequent invocation runs the
    /// actions again.
    pub fn reenable(&mut self) {
        self.already_invoked = false;
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn set_mtime(path: &Path, when: SystemTime) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(when).unwrap();
    }

    #[test]
    fn plain_task_is_always_needed() {
        let t = Task::new("compile", TaskKind::Plain);
        assert!(t.is_needed());
    }

    #[test]
    fn file_task_needed_when_target_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");

        let mut t = Task::new(target.to_string_lossy(), TaskKind::File);
        t.add_prerequisite(dir.path().join("in.txt").to_string_lossy());

        assert!(t.is_needed());
    }

    #[test]
    fn file_task_needed_when_prerequisite_newer() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let input = dir.path().join("in1.txt");
        std::fs::write(&target, "out").unwrap();
        std::fs::write(&input, "in").unwrap();
        std::fs::write(dir.path().join("in2.txt"), "in").unwrap();

        let now = SystemTime::now();
        set_mtime(&input, now);
        set_mtime(&target, now - Duration::from_secs(60));

        let mut t = Task::new(target.to_string_lossy(), TaskKind::File);
        t.enhance(
            [
                input.to_string_lossy().into_owned(),
                dir.path().join("in2.txt").to_string_lossy().into_owned(),
            ],
            None,
        );

        assert!(t.is_needed());
    }

    #[test]
    fn file_task_not_needed_when_target_newer() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        let in1 = dir.path().join("in1.txt");
        let in2 = dir.path().join("in2.txt");
        for p in [&target, &in1, &in2] {
            std::fs::write(p, "x").unwrap();
        }

        let now = SystemTime::now();
        set_mtime(&in1, now - Duration::from_secs(60));
        set_mtime(&in2, now - Duration::from_secs(60));
        set_mtime(&target, now);

        let mut t = Task::new(target.to_string_lossy(), TaskKind::File);
        t.enhance(
            [
                in1.to_string_lossy().into_owned(),
                in2.to_string_lossy().into_owned(),
            ],
            None,
        );

        assert!(!t.is_needed());
    }

    #[test]
    fn file_task_not_needed_when_no_prerequisite_exists() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, "out").unwrap();

        let mut t = Task::new(target.to_string_lossy(), TaskKind::File);
        t.add_prerequisite(dir.path().join("never-written.txt").to_string_lossy());

        // Empty max over existing prerequisites means no constraint.
        assert!(!t.is_needed());
    }

    #[test]
    fn enhance_merges_prerequisites_and_appends_action() {
        let mut t = Task::new("build", TaskKind::Plain);
        t.enhance(["compile"], None);
        t.enhance(["link"], Some(Action::from_fn(|_| Ok(()))));

        assert_eq!(t.prerequisites, vec!["compile", "link"]);
        assert_eq!(t.actions.len(), 1);
    }

    #[test]
    fn clear_drops_actions_and_prerequisites() {
        let mut t = Task::new("build", TaskKind::Plain);
        t.enhance(["compile"], Some(Action::from_fn(|_| Ok(()))));
        t.clear();

        assert!(t.prerequisites.is_empty());
        assert!(t.actions.is_empty());
    }
}
