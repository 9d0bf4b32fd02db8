//! Rhai build-script integration
//!
//! Build configuration is a Rhai script. Evaluating it calls the
//! registration DSL (`task`, `file`, `desc`) which is wired into the engine
//! as closures capturing a handle to the task registry; there is no global
//! application state. Task actions are script closures captured as `FnPtr`s
//! and called later, during invocation, against the AST they came from.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, Scope, AST};

use crate::error::{BosunError, Result};
use crate::registry::TaskRegistry;
use crate::task::{Action, TaskHandle, TaskKind};

/// Shared engine/AST plumbing behind script actions.
///
/// The engine is wrapped in `Rc` only after all DSL closures are registered,
/// so the closures hold this cell and read the engine through it. The
/// current AST is the one being evaluated; actions registered during that
/// evaluation must be called against it.
#[derive(Default)]
pub(crate) struct RuntimeCell {
    engine: RefCell<Option<Rc<Engine>>>,
    current_ast: RefCell<Option<Rc<AST>>>,
}

impl RuntimeCell {
    fn set_engine(&self, engine: Rc<Engine>) {
        *self.engine.borrow_mut() = Some(engine);
    }

    fn set_current_ast(&self, ast: Rc<AST>) {
        *self.current_ast.borrow_mut() = Some(ast);
    }

    fn engine(&self) -> Option<Rc<Engine>> {
        self.engine.borrow().clone()
    }

    fn current_ast(&self) -> Option<Rc<AST>> {
        self.current_ast.borrow().clone()
    }
}

/// A task action defined in a build script.
#[derive(Clone)]
pub struct ScriptAction {
    runtime: Rc<RuntimeCell>,
    ast: Rc<AST>,
    fn_ptr: FnPtr,
}

impl std::fmt::Debug for ScriptAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptAction")
            .field("fn_ptr", &self.fn_ptr)
            .finish_non_exhaustive()
    }
}

impl ScriptAction {
    fn new(runtime: Rc<RuntimeCell>, fn_ptr: FnPtr) -> DslResult<Self> {
        let Some(ast) = runtime.current_ast() else {
            return Err("actions can only be registered while a build script is evaluating".into());
        };
        Ok(Self { runtime, ast, fn_ptr })
    }

    /// Calls the script closure, passing the task as argument when the
    /// closure declares a parameter for it.
    pub fn call(&self, task: &TaskHandle) -> Result<()> {
        let name = task.borrow().name.clone();
        let Some(engine) = self.runtime.engine() else {
            return Err(BosunError::ActionFailed {
                task: name,
                source: "script engine is not initialized".into(),
            });
        };

        let result = if self.wants_task_argument() {
            self.fn_ptr
                .call::<Dynamic>(&engine, &self.ast, (TaskRef(task.clone()),))
        } else {
            self.fn_ptr.call::<Dynamic>(&engine, &self.ast, ())
        };

        result
            .map(|_| ())
            .map_err(|source| BosunError::ActionFailed { task: name, source })
    }

    fn wants_task_argument(&self) -> bool {
        // Closures are lifted to script functions; their captured variables
        // appear as curried arguments on the FnPtr.
        self.ast
            .iter_functions()
            .find(|f| f.name == self.fn_ptr.fn_name())
            .map_or(false, |f| f.params.len() > self.fn_ptr.curry().len())
    }
}

/// The task object handed to build scripts.
#[derive(Clone)]
pub struct TaskRef(pub TaskHandle);

/// Evaluates build scripts and owns the script engine for the lifetime of
/// the run. Actions keep the engine alive through `Rc`, so dropping the
/// host after evaluation is fine.
pub struct ScriptHost {
    engine: Rc<Engine>,
    runtime: Rc<RuntimeCell>,
    /// Paths of all evaluated build scripts.
    pub loaded: Vec<PathBuf>,
}

impl ScriptHost {
    pub fn new(registry: Rc<RefCell<TaskRegistry>>) -> Self {
        let runtime = Rc::new(RuntimeCell::default());

        let mut engine = Engine::new();
        engine.set_max_expr_depths(64, 64);
        engine.set_max_string_size(1024 * 1024);

        register_stdlib(&mut engine);
        register_task_type(&mut engine, &runtime);
        register_dsl(&mut engine, &registry, &runtime);

        let engine = Rc::new(engine);
        runtime.set_engine(engine.clone());

        Self {
            engine,
            runtime,
            loaded: Vec::new(),
        }
    }

    /// Evaluates one build script file, registering its tasks.
    pub fn eval_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path)?;
        self.eval(&source, path)?;
        self.loaded.push(path.to_path_buf());
        Ok(())
    }

    /// Evaluates build-script source that does not come from a file.
    pub fn eval_source(&mut self, source: &str) -> Result<()> {
        self.eval(source, Path::new("<inline>"))
    }

    fn eval(&mut self, source: &str, path: &Path) -> Result<()> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|source| BosunError::ConfigParse {
                source,
                path: path.to_path_buf(),
            })?;
        let ast = Rc::new(ast);
        self.runtime.set_current_ast(ast.clone());

        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|source| BosunError::ConfigEval {
                source,
                path: path.to_path_buf(),
            })?;

        Ok(())
    }
}

type DslResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Registers `task`/`file`/`desc` and friends. Explicit arity overloads,
/// no argument-type sniffing.
fn register_dsl(
    engine: &mut Engine,
    registry: &Rc<RefCell<TaskRegistry>>,
    runtime: &Rc<RuntimeCell>,
) {
    {
        let registry = registry.clone();
        engine.register_fn("task", move |name: &str| -> DslResult<TaskRef> {
            declare(&registry, name, TaskKind::Plain, Vec::new(), None)
        });
    }
    {
        let registry = registry.clone();
        let runtime = runtime.clone();
        engine.register_fn("task", move |name: &str, action: FnPtr| -> DslResult<TaskRef> {
            let action = Action::Script(ScriptAction::new(runtime.clone(), action)?);
            declare(&registry, name, TaskKind::Plain, Vec::new(), Some(action))
        });
    }
    {
        let registry = registry.clone();
        engine.register_fn("task", move |name: &str, deps: rhai::Array| -> DslResult<TaskRef> {
            declare(&registry, name, TaskKind::Plain, names_from(deps)?, None)
        });
    }
    {
        let registry = registry.clone();
        let runtime = runtime.clone();
        engine.register_fn(
            "task",
            move |name: &str, deps: rhai::Array, action: FnPtr| -> DslResult<TaskRef> {
                let action = Action::Script(ScriptAction::new(runtime.clone(), action)?);
                declare(&registry, name, TaskKind::Plain, names_from(deps)?, Some(action))
            },
        );
    }

    {
        let registry = registry.clone();
        engine.register_fn("file", move |target: &str, deps: rhai::Array| -> DslResult<TaskRef> {
            declare(&registry, target, TaskKind::File, names_from(deps)?, None)
        });
    }
    {
        let registry = registry.clone();
        let runtime = runtime.clone();
        engine.register_fn(
            "file",
            move |target: &str, deps: rhai::Array, action: FnPtr| -> DslResult<TaskRef> {
                let action = Action::Script(ScriptAction::new(runtime.clone(), action)?);
                declare(&registry, target, TaskKind::File, names_from(deps)?, Some(action))
            },
        );
    }

    {
        let registry = registry.clone();
        engine.register_fn("desc", move |name: &str, text: &str| {
            registry.borrow_mut().describe(name, text, None);
        });
    }
    {
        let registry = registry.clone();
        engine.register_fn("desc", move |name: &str, text: &str, usage: &str| {
            registry.borrow_mut().describe(name, text, Some(usage));
        });
    }

    {
        let registry = registry.clone();
        engine.register_fn("task_defined", move |name: &str| -> bool {
            registry.borrow().contains(name)
        });
    }
}

fn declare(
    registry: &Rc<RefCell<TaskRegistry>>,
    name: &str,
    kind: TaskKind,
    prerequisites: Vec<String>,
    action: Option<Action>,
) -> DslResult<TaskRef> {
    if name.is_empty() {
        return Err("task name cannot be empty".into());
    }

    let task = registry.borrow_mut().define(name, kind);
    task.borrow_mut().enhance(prerequisites, action);
    Ok(TaskRef(task))
}

fn names_from(deps: rhai::Array) -> DslResult<Vec<String>> {
    deps.into_iter()
        .map(|d| {
            d.into_string()
                .map_err(|typ| format!("prerequisite must be a string, got {typ}").into())
        })
        .collect()
}

/// Exposes the task object to scripts: `t.name`, `t.prerequisites`,
/// `t.enhance(..)`, `t.reenable()`, `t.clear()`.
fn register_task_type(engine: &mut Engine, runtime: &Rc<RuntimeCell>) {
    engine.register_type_with_name::<TaskRef>("Task");

    engine.register_get("name", |t: &mut TaskRef| t.0.borrow().name.clone());

    engine.register_get("prerequisites", |t: &mut TaskRef| -> rhai::Array {
        t.0.borrow()
            .prerequisites
            .iter()
            .map(|p| Dynamic::from(p.clone()))
            .collect()
    });

    engine.register_fn("enhance", |t: &mut TaskRef, deps: rhai::Array| -> DslResult<()> {
        t.0.borrow_mut().enhance(names_from(deps)?, None);
        Ok(())
    });

    {
        let runtime = runtime.clone();
        engine.register_fn(
            "enhance",
            move |t: &mut TaskRef, deps: rhai::Array, action: FnPtr| -> DslResult<()> {
                let action = Action::Script(ScriptAction::new(runtime.clone(), action)?);
                t.0.borrow_mut().enhance(names_from(deps)?, Some(action));
                Ok(())
            },
        );
    }

    engine.register_fn("reenable", |t: &mut TaskRef| {
        t.0.borrow_mut().reenable();
    });

    engine.register_fn("clear", |t: &mut TaskRef| {
        t.0.borrow_mut().clear();
    });
}

/// Helper functions available to build scripts.
fn register_stdlib(engine: &mut Engine) {
    // Shell command execution
    engine.register_fn("sh", |cmd: &str| -> DslResult<String> {
        let output = if cfg!(windows) {
            std::process::Command::new("cmd").args(["/C", cmd]).output()
        } else {
            std::process::Command::new("sh").args(["-c", cmd]).output()
        };

        match output {
            Ok(o) if o.status.success() => Ok(String::from_utf8_lossy(&o.stdout).to_string()),
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                Err(format!("Command failed: {}", stderr).into())
            }
            Err(e) => Err(format!("Failed to execute command: {}", e).into()),
        }
    });

    // Aborts the current task with a message
    engine.register_fn("fail", |msg: &str| -> DslResult<()> {
        Err(msg.to_string().into())
    });

    // File operations
    engine.register_fn("read_file", |path: &str| -> DslResult<String> {
        std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read file '{}': {}", path, e).into())
    });

    engine.register_fn("write_file", |path: &str, content: &str| -> DslResult<()> {
        std::fs::write(path, content)
            .map_err(|e| format!("Failed to write file '{}': {}", path, e).into())
    });

    engine.register_fn("touch", |path: &str| -> DslResult<()> {
        let file = std::fs::File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Failed to touch '{}': {}", path, e))?;
        file.set_modified(std::time::SystemTime::now())
            .map_err(|e| format!("Failed to touch '{}': {}", path, e).into())
    });

    engine.register_fn("copy_file", |src: &str, dst: &str| -> DslResult<()> {
        std::fs::copy(src, dst)
            .map(|_| ())
            .map_err(|e| format!("Failed to copy '{}' to '{}': {}", src, dst, e).into())
    });

    engine.register_fn("rm", |path: &str| -> DslResult<()> {
        std::fs::remove_file(path)
            .map_err(|e| format!("Failed to remove '{}': {}", path, e).into())
    });

    engine.register_fn("file_exists", |path: &str| -> bool {
        std::path::Path::new(path).exists()
    });

    engine.register_fn("is_dir", |path: &str| -> bool {
        std::path::Path::new(path).is_dir()
    });

    // Directory operations
    engine.register_fn("mkdir", |path: &str| -> DslResult<()> {
        std::fs::create_dir_all(path)
            .map_err(|e| format!("Failed to create directory '{}': {}", path, e).into())
    });

    engine.register_fn("rmdir", |path: &str| -> DslResult<()> {
        std::fs::remove_dir_all(path)
            .map_err(|e| format!("Failed to remove directory '{}': {}", path, e).into())
    });

    // Path operations
    engine.register_fn("join_path", |a: &str, b: &str| -> String {
        std::path::Path::new(a).join(b).to_string_lossy().to_string()
    });

    engine.register_fn("parent_path", |path: &str| -> String {
        std::path::Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default()
    });

    engine.register_fn("file_name", |path: &str| -> String {
        std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    });

    // Environment
    engine.register_fn("get_env", |key: &str| -> String {
        std::env::var(key).unwrap_or_default()
    });

    engine.register_fn("set_env", |key: &str, value: &str| {
        std::env::set_var(key, value);
    });

    // Glob matching
    engine.register_fn("glob", |pattern: &str| -> DslResult<rhai::Array> {
        let paths: Vec<_> = glob::glob(pattern)
            .map_err(|e| format!("Invalid glob pattern: {}", e))?
            .filter_map(|p| p.ok())
            .map(|p| Dynamic::from(p.to_string_lossy().to_string()))
            .collect();
        Ok(paths)
    });

    // JSON operations
    engine.register_fn("parse_json", |s: &str| -> DslResult<Dynamic> {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| format!("Failed to parse JSON: {}", e))?;
        json_to_dynamic(value)
    });

    engine.register_fn("to_json", |value: Dynamic| -> DslResult<String> {
        let json = dynamic_to_json(value)?;
        serde_json::to_string_pretty(&json)
            .map_err(|e| format!("Failed to serialize JSON: {}", e).into())
    });
}

/// Convert serde_json::Value to Rhai Dynamic
fn json_to_dynamic(value: serde_json::Value) -> DslResult<Dynamic> {
    use serde_json::Value;

    Ok(match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: std::result::Result<rhai::Array, _> =
                arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec?)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v)?);
            }
            Dynamic::from(map)
        }
    })
}

/// Convert Rhai Dynamic to serde_json::Value
fn dynamic_to_json(value: Dynamic) -> DslResult<serde_json::Value> {
    use serde_json::Value;

    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Ok(Value::Bool(b));
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        return Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Ok(Value::String(s));
    }
    if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
        let vec: std::result::Result<Vec<_>, _> = arr.into_iter().map(dynamic_to_json).collect();
        return Ok(Value::Array(vec?));
    }
    if let Some(map) = value.clone().try_cast::<rhai::Map>() {
        let obj: std::result::Result<serde_json::Map<String, Value>, _> = map
            .into_iter()
            .map(|(k, v)| dynamic_to_json(v).map(|v| (k.to_string(), v)))
            .collect();
        return Ok(Value::Object(obj?));
    }

    Err("Cannot convert value to JSON".into())
}
