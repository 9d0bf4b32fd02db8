//! Task registry and invocation chain
//!
//! The registry maps names to tasks and preserves registration order: the
//! first registered task is the implicit default task. The invocation chain
//! tracks tasks in the active depth-first invocation and guards against
//! cycles by identity.

use std::collections::HashMap;

use crate::task::{Task, TaskHandle, TaskKind};

/// Ordered name-to-task mapping.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskHandle>,
    index: HashMap<String, usize>,
    /// Descriptions attached to names that are not declared yet. Applied
    /// when the name is; a described-but-undeclared name never occupies a
    /// registry slot, so it cannot become the default task.
    pending_descriptions: HashMap<String, (String, Option<String>)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a task. Missing names are an ordinary `None`, never an
    /// error; whether absence is fatal is the caller's decision.
    pub fn get(&self, name: &str) -> Option<TaskHandle> {
        self.index.get(name).map(|&i| self.tasks[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Returns the task registered under `name`, creating it when absent.
    /// Re-declarations hand back the existing task so callers can merge
    /// additional prerequisites and actions into it; the kind of the first
    /// declaration wins.
    pub fn define(&mut self, name: &str, kind: TaskKind) -> TaskHandle {
        if let Some(task) = self.get(name) {
            return task;
        }
        let handle = Task::new(name, kind).into_handle();
        self.insert(handle.clone());
        handle
    }

    /// Stores a task under its name. An already-registered name keeps the
    /// existing task; the caller is expected to have merged state into it
    /// via `Task::enhance` first.
    pub fn insert(&mut self, task: TaskHandle) -> TaskHandle {
        let name = task.borrow().name.clone();
        if let Some(existing) = self.get(&name) {
            return existing;
        }
        if let Some((text, usage)) = self.pending_descriptions.remove(&name) {
            let mut t = task.borrow_mut();
            if t.description.is_none() {
                t.description = Some(text);
            }
            if t.usage.is_none() {
                t.usage = usage;
            }
        }
        self.index.insert(name, self.tasks.len());
        self.tasks.push(task.clone());
        task
    }

    /// Attaches a description (and optional usage line) to `name`. When the
    /// task is not declared yet the description is held back and applied at
    /// declaration time.
    pub fn describe(&mut self, name: &str, text: &str, usage: Option<&str>) {
        if let Some(task) = self.get(name) {
            let mut task = task.borrow_mut();
            task.description = Some(text.to_string());
            if let Some(usage) = usage {
                task.usage = Some(usage.to_string());
            }
        } else {
            self.pending_descriptions
                .insert(name.to_string(), (text.to_string(), usage.map(String::from)));
        }
    }

    /// The first-registered task, if any. This is the default task when no
    /// task name is given on invocation.
    pub fn first(&self) -> Option<TaskHandle> {
        self.tasks.first().cloned()
    }

    /// Tasks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskHandle> {
        self.tasks.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.borrow().name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Stack of tasks in the active invocation, in push order.
///
/// Membership is tested by identity (`Rc::ptr_eq`), not by name, so two
/// distinct task objects that happen to share a name are told apart.
#[derive(Debug, Default)]
pub struct InvocationChain {
    stack: Vec<TaskHandle>,
}

impl InvocationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: TaskHandle) {
        self.stack.push(task);
    }

    pub fn pop(&mut self) -> Option<TaskHandle> {
        self.stack.pop()
    }

    pub fn has(&self, task: &TaskHandle) -> bool {
        self.stack.iter().any(|t| std::rc::Rc::ptr_eq(t, task))
    }

    /// Tasks in push order, top of the stack last.
    pub fn iter(&self) -> impl Iterator<Item = &TaskHandle> {
        self.stack.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = TaskRegistry::new();
        registry.define("clean", TaskKind::Plain);
        registry.define("compile", TaskKind::Plain);
        registry.define("test", TaskKind::Plain);

        assert_eq!(registry.names(), vec!["clean", "compile", "test"]);
        assert_eq!(registry.first().unwrap().borrow().name, "clean");
    }

    #[test]
    fn get_missing_name_is_none() {
        let registry = TaskRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn define_returns_existing_task_for_known_name() {
        let mut registry = TaskRegistry::new();
        let first = registry.define("build", TaskKind::Plain);
        let second = registry.define("build", TaskKind::File);

        assert!(std::rc::Rc::ptr_eq(&first, &second));
        // First declaration's kind wins.
        assert_eq!(second.borrow().kind, TaskKind::Plain);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn description_for_undeclared_name_does_not_create_a_task() {
        let mut registry = TaskRegistry::new();
        registry.describe("deploy", "Ship it", Some("deploy TARGET"));
        assert!(registry.is_empty());

        registry.define("build", TaskKind::Plain);
        let deploy = registry.define("deploy", TaskKind::Plain);

        // The held-back description lands on declaration; the first
        // *declared* task stays the default.
        assert_eq!(deploy.borrow().description.as_deref(), Some("Ship it"));
        assert_eq!(deploy.borrow().usage.as_deref(), Some("deploy TARGET"));
        assert_eq!(registry.first().unwrap().borrow().name, "build");
    }

    #[test]
    fn chain_membership_is_by_identity_not_name() {
        let a = Task::new("same", TaskKind::Plain).into_handle();
        let b = Task::new("same", TaskKind::Plain).into_handle();

        let mut chain = InvocationChain::new();
        chain.push(a.clone());

        assert!(chain.has(&a));
        assert!(!chain.has(&b));

        chain.pop();
        assert!(!chain.has(&a));
        assert!(chain.is_empty());
    }
}
