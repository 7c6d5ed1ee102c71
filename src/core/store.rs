//! Project store layout.
//!
//! A project is any directory tree; its Carapace state lives under
//! `<root>/.carapace/`. Ledger keys are file paths relative to the root.

use crate::core::error;
use std::path::{Component, Path, PathBuf};

pub const STATE_DIR: &str = ".carapace";
pub const CONFIG_FILE: &str = "config.toml";
pub const MEMORY_FILE: &str = "project-memory.json";
pub const JOURNAL_FILE: &str = "gate.events.jsonl";

/// Store handle representing one project's Carapace state.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the project root (parent of `.carapace/`)
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join(CONFIG_FILE)
    }

    pub fn default_memory_path(&self) -> PathBuf {
        self.state_dir().join(MEMORY_FILE)
    }

    pub fn default_journal_path(&self) -> PathBuf {
        self.state_dir().join(JOURNAL_FILE)
    }

    /// Resolve a configured path: absolute paths are kept, relative ones hang off the root.
    pub fn resolve(&self, configured: &Path) -> PathBuf {
        if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            self.root.join(configured)
        }
    }

    /// Absolute location of a file named relative to the project root.
    pub fn file_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Ledger key for a file: root-relative and `/`-separated. `.` segments
    /// are dropped and `..` pops the previous segment; `..` that climbs above
    /// the root is kept so the key still names the file `file_path` reads.
    pub fn ledger_key(&self, path: &str) -> String {
        let normalized = path.replace('\\', "/");
        let p = Path::new(&normalized);
        let relative = if p.is_absolute() {
            p.strip_prefix(&self.root).unwrap_or(p)
        } else {
            p
        };
        let mut segments: Vec<String> = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_string_lossy().to_string()),
                Component::RootDir => segments.push(String::new()),
                Component::ParentDir => match segments.last().map(String::as_str) {
                    Some("") => {}
                    Some("..") | None => segments.push("..".to_string()),
                    Some(_) => {
                        segments.pop();
                    }
                },
                Component::CurDir | Component::Prefix(_) => {}
            }
        }
        segments.join("/")
    }
}

/// Walk up from `start_dir` looking for a `.carapace/` directory.
pub fn find_project_root(start_dir: &Path) -> Result<PathBuf, error::CarapaceError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(STATE_DIR).is_dir() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(error::CarapaceError::NotFound(format!(
                "'{}' directory not found in current or parent directories",
                STATE_DIR
            )));
        }
    }
}
