// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where every file the managers touch lives on a node. All paths
//! hang off of a single __node root__ directory:
//!
//! ```text
//! <node root>/
//! ├── apps/                  app templates, virtual-apps.json, registry.json
//! ├── app-data/              per-app data directories
//! ├── db/user.json           user state
//! ├── services/<name>.yml    per-service definitions
//! ├── scripts/configure      node reconfiguration script
//! └── docker-compose.yml     master compose document
//! ```

use std::{
    env::current_exe,
    path::{Component, Path, PathBuf},
};

/// On-disk layout of a node.
///
/// Does not check if any of the paths returned actually exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    root: PathBuf,
}

impl NodeLayout {
    /// Construct new layout rooted at target directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Determine default node root from location of running executable.
    ///
    /// Executables are installed one directory below the node root, e.g.,
    /// `<node root>/app/app-manager`. Thus, the parent of the directory
    /// holding the executable is the node root.
    ///
    /// # Errors
    ///
    /// - Return [`PathError::NoExecutable`] if executable path is unknown.
    /// - Return [`PathError::NoNodeRoot`] if executable has no grandparent.
    pub fn from_executable() -> Result<Self> {
        let exe = current_exe().map_err(PathError::NoExecutable)?;
        let exe = exe.canonicalize().unwrap_or(exe);
        exe.parent()
            .and_then(Path::parent)
            .map(Self::new)
            .ok_or(PathError::NoNodeRoot(exe.clone()))
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Resolve path relative to node root.
    ///
    /// Absolute paths are returned as-is.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join("apps")
    }

    pub fn app_dir(&self, app: impl AsRef<str>) -> PathBuf {
        self.apps_dir().join(app.as_ref())
    }

    /// Compose file of a single app.
    pub fn app_compose_file(&self, app: impl AsRef<str>) -> PathBuf {
        self.app_dir(app).join("docker-compose.yml")
    }

    /// Cached dependency-compatibility result of an app.
    pub fn app_result_file(&self, app: impl AsRef<str>) -> PathBuf {
        self.app_dir(app).join("result.yml")
    }

    pub fn app_data_dir(&self, app: impl AsRef<str>) -> PathBuf {
        self.root.join("app-data").join(app.as_ref())
    }

    pub fn virtual_apps_file(&self) -> PathBuf {
        self.apps_dir().join("virtual-apps.json")
    }

    pub fn registry_file(&self) -> PathBuf {
        self.apps_dir().join("registry.json")
    }

    pub fn user_file(&self) -> PathBuf {
        self.root.join("db").join("user.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join("db").join("app-manager.toml")
    }

    pub fn service_file(&self, service: impl AsRef<str>) -> PathBuf {
        self.root
            .join("services")
            .join(format!("{}.yml", service.as_ref()))
    }

    /// Master compose document of the node.
    pub fn compose_file(&self) -> PathBuf {
        self.root.join("docker-compose.yml")
    }
}

/// Check that app identifier names exactly one directory entry.
///
/// App identifiers get joined onto node directories that are later deleted
/// recursively, so they must never climb out of, or collapse into, those
/// directories.
///
/// # Errors
///
/// - Return [`PathError::InvalidAppName`] if app is empty, or holds a path
///   separator, `.`, or `..`.
pub fn check_app_name(app: &str) -> Result<()> {
    let mut components = Path::new(app).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if name.to_str() == Some(app) => Ok(()),
        _ => Err(PathError::InvalidAppName(app.into())),
    }
}

/// Path resolution error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Path of running executable cannot be determined.
    #[error("cannot determine path to running executable")]
    NoExecutable(#[source] std::io::Error),

    /// Executable is not nested deep enough to have a node root.
    #[error("cannot determine node root from executable {0:?}")]
    NoNodeRoot(PathBuf),

    /// App identifier does not name a single directory entry.
    #[error("{0:?} is not a valid app name")]
    InvalidAppName(String),
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
