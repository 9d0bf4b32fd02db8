//! Build-script discovery
//!
//! Locates the root build script by walking up from the working directory
//! to the filesystem boundary. The directory containing the root script is
//! the project root; additional task files under `bosun_tasks/` are
//! evaluated after it and may augment already-declared tasks.

use std::path::{Path, PathBuf};

use crate::error::{BosunError, Result};

/// Build-script file names to search for
pub const CONFIG_FILES: &[&str] = &["bosunfile.rhai", "Bosunfile.rhai"];

/// Directory under the project root whose *.rhai files are loaded after
/// the root script
pub const LOAD_PATH: &str = "bosun_tasks";

/// Starter build script written by `bosun --init`
pub const INIT_TEMPLATE: &str = r#"// bosunfile.rhai - build tasks for this project
//
// The first task declared here is the default task.

task("default", ["example"]);

desc("example", "Write Hello World to stdout");
task("example", || {
    print("Hello World!");
    print("Add more tasks to bosunfile.rhai in your project root.");
});
"#;

/// A located project: the root build script and the directory it lives in.
#[derive(Debug, Clone)]
pub struct Project {
    pub config_path: PathBuf,
    pub root: PathBuf,
}

impl Project {
    /// Locates the project from an explicit script path or by searching
    /// upwards from `start_dir`.
    pub fn discover(explicit: Option<&Path>, start_dir: &Path) -> Result<Self> {
        let config_path = match explicit {
            Some(p) => {
                if p.exists() {
                    p.to_path_buf()
                } else {
                    return Err(BosunError::ConfigNotFound {
                        searched: vec![p.to_path_buf()],
                    });
                }
            }
            None => Self::find_config(start_dir)?,
        };

        let root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self { config_path, root })
    }

    /// Walks up the directory tree looking for a build script.
    fn find_config(start_dir: &Path) -> Result<PathBuf> {
        let mut current = start_dir.to_path_buf();
        let mut searched = Vec::new();

        loop {
            for name in CONFIG_FILES {
                let candidate = current.join(name);
                if candidate.exists() {
                    return Ok(candidate);
                }
                searched.push(candidate);
            }

            if !current.pop() {
                break;
            }
        }

        Err(BosunError::ConfigNotFound { searched })
    }

    /// Additional task scripts under the project's load path, sorted for a
    /// stable evaluation order. A missing load-path directory is not an
    /// error.
    pub fn load_path_scripts(&self) -> Vec<PathBuf> {
        let pattern = self.root.join(LOAD_PATH).join("*.rhai");

        let mut scripts: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(|p| p.ok()).collect())
            .unwrap_or_default();
        scripts.sort();
        scripts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn discover_finds_script_in_ancestor_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("bosunfile.rhai");
        fs::write(&config, "task(\"default\");").unwrap();

        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).unwrap();

        let project = Project::discover(None, &nested).unwrap();
        assert_eq!(project.config_path, config);
        assert_eq!(project.root, dir.path());
    }

    #[test]
    fn discover_reports_searched_paths_when_missing() {
        let dir = tempfile::tempdir().unwrap();

        let err = Project::discover(None, dir.path()).unwrap_err();
        match err {
            BosunError::ConfigNotFound { searched } => {
                assert!(searched.iter().any(|p| p.starts_with(dir.path())));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn explicit_config_path_bypasses_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("custom.rhai");
        fs::write(&config, "task(\"default\");").unwrap();

        let project = Project::discover(Some(&config), dir.path()).unwrap();
        assert_eq!(project.config_path, config);
        assert_eq!(project.root, dir.path());
    }

    #[test]
    fn load_path_scripts_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bosunfile.rhai"), "").unwrap();
        let tasks_dir = dir.path().join(LOAD_PATH);
        fs::create_dir(&tasks_dir).unwrap();
        fs::write(tasks_dir.join("b.rhai"), "").unwrap();
        fs::write(tasks_dir.join("a.rhai"), "").unwrap();
        fs::write(tasks_dir.join("ignored.txt"), "").unwrap();

        let project = Project::discover(None, dir.path()).unwrap();
        let scripts = project.load_path_scripts();

        assert_eq!(scripts.len(), 2);
        assert!(scripts[0].ends_with("a.rhai"));
        assert!(scripts[1].ends_with("b.rhai"));
    }
}
