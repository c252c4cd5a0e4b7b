// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Node state storage.
//!
//! Everything the managers know about a node lives in a handful of files
//! under the node root. Those files act as global state shared between
//! invocations, so access to them goes through two layers of indirection:
//!
//! - [`ComposeStore`] for the master compose document and the per-service
//!   definitions merged into it.
//! - [`NodeStore`] for user state, virtual apps, the app registry, and
//!   per-app data directories.
//!
//! The filesystem implementations rewrite whole files on every save. Nothing
//! is locked, thus callers must never run two managers against the same node
//! at once.

use crate::{
    config::{parse_registry, RegistryEntry, UserData, VirtualApps},
    path::{check_app_name, NodeLayout, PathError},
};

use ignore::WalkBuilder;
use serde_yaml::{Mapping, Value};
use std::{
    fs::{copy, read_to_string, remove_dir_all, remove_file, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Layer of indirection for compose document access.
pub trait ComposeStore {
    /// Load service definition document of target service.
    fn load_service(&self, name: &str) -> Result<Mapping>;

    /// Load master compose document.
    fn load_compose(&self) -> Result<Mapping>;

    /// Replace master compose document in full.
    fn save_compose(&self, compose: &Mapping) -> Result<()>;
}

/// Layer of indirection for node state access.
pub trait NodeStore {
    /// Load user state. Missing state is empty state.
    fn load_user_data(&self) -> Result<UserData>;

    /// Replace user state in full.
    fn save_user_data(&self, data: &UserData) -> Result<()>;

    /// Load virtual app mapping. Missing mapping is empty.
    fn load_virtual_apps(&self) -> Result<VirtualApps>;

    /// Load app registry. Missing registry is empty.
    fn load_registry(&self) -> Result<Vec<RegistryEntry>>;

    /// Delete cached dependency-compatibility result of target app.
    fn remove_cached_result(&self, app: &str) -> Result<()>;

    /// Create fresh data directory for target app from its template.
    fn create_data_dir(&self, app: &str) -> Result<()>;

    /// Delete data directory of target app.
    fn delete_data(&self, app: &str) -> Result<()>;

    /// List identifiers of all apps available on the node.
    fn list_apps(&self) -> Result<Vec<String>>;
}

/// Compose document access through the filesystem.
#[derive(Debug, Clone)]
pub struct FsComposeStore {
    layout: NodeLayout,
}

impl FsComposeStore {
    pub fn new(layout: NodeLayout) -> Self {
        Self { layout }
    }
}

impl ComposeStore for FsComposeStore {
    #[instrument(skip(self), level = "debug")]
    fn load_service(&self, name: &str) -> Result<Mapping> {
        load_yaml_mapping(self.layout.service_file(name))
    }

    #[instrument(skip(self), level = "debug")]
    fn load_compose(&self) -> Result<Mapping> {
        load_yaml_mapping(self.layout.compose_file())
    }

    #[instrument(skip(self, compose), level = "debug")]
    fn save_compose(&self, compose: &Mapping) -> Result<()> {
        let path = self.layout.compose_file();
        debug!("write compose document {:?}", path.display());
        let contents = serde_yaml::to_string(compose)
            .map_err(|error| StoreError::Yaml(path.clone(), error))?;
        write(&path, contents).map_err(|error| StoreError::Io(path, error))
    }
}

/// Node state access through the filesystem.
#[derive(Debug, Clone)]
pub struct FsNodeStore {
    layout: NodeLayout,
}

impl FsNodeStore {
    pub fn new(layout: NodeLayout) -> Self {
        Self { layout }
    }
}

impl NodeStore for FsNodeStore {
    #[instrument(skip(self), level = "debug")]
    fn load_user_data(&self) -> Result<UserData> {
        let path = self.layout.user_file();
        match read_optional(&path)? {
            Some(data) => data.parse().map_err(|error| StoreError::Config(path, error)),
            None => Ok(UserData::default()),
        }
    }

    #[instrument(skip(self, data), level = "debug")]
    fn save_user_data(&self, data: &UserData) -> Result<()> {
        let path = self.layout.user_file();
        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent).map_err(|error| StoreError::Io(parent.into(), error))?;
        }
        debug!("write user state {:?}", path.display());
        write(&path, data.to_string()).map_err(|error| StoreError::Io(path, error))
    }

    #[instrument(skip(self), level = "debug")]
    fn load_virtual_apps(&self) -> Result<VirtualApps> {
        let path = self.layout.virtual_apps_file();
        match read_optional(&path)? {
            Some(data) => data.parse().map_err(|error| StoreError::Config(path, error)),
            None => Ok(VirtualApps::default()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn load_registry(&self) -> Result<Vec<RegistryEntry>> {
        let path = self.layout.registry_file();
        match read_optional(&path)? {
            Some(data) => parse_registry(&data).map_err(|error| StoreError::Config(path, error)),
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn remove_cached_result(&self, app: &str) -> Result<()> {
        check_app_name(app)?;
        let path = self.layout.app_result_file(app);
        match remove_file(&path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!("no cached result to remove at {:?}", path.display());
                Ok(())
            }
            Err(error) => Err(StoreError::Io(path, error)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn create_data_dir(&self, app: &str) -> Result<()> {
        check_app_name(app)?;
        let template = self.layout.app_dir(app);
        let data_dir = self.layout.app_data_dir(app);
        if data_dir.exists() {
            debug!("replace stale data directory {:?}", data_dir.display());
            remove_dir_all(&data_dir).map_err(|error| StoreError::Io(data_dir.clone(), error))?;
        }

        mkdirp::mkdirp(&data_dir).map_err(|error| StoreError::Io(data_dir.clone(), error))?;
        if template.is_dir() {
            copy_template(&template, &data_dir)?;
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_data(&self, app: &str) -> Result<()> {
        check_app_name(app)?;
        let data_dir = self.layout.app_data_dir(app);
        remove_dir_all(&data_dir).map_err(|error| StoreError::Io(data_dir, error))
    }

    #[instrument(skip(self), level = "debug")]
    fn list_apps(&self) -> Result<Vec<String>> {
        let pattern = self.layout.apps_dir().join("*").join("app.yml");
        let mut apps = Vec::new();
        for entry in glob::glob(pattern.to_string_lossy().as_ref())? {
            let path = entry?;
            if let Some(app) = path
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
            {
                apps.push(app);
            }
        }
        apps.sort();

        Ok(apps)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!("{:?} does not exist", path.display());
            Ok(None)
        }
        Err(error) => Err(StoreError::Io(path.into(), error)),
    }
}

fn load_yaml_mapping(path: PathBuf) -> Result<Mapping> {
    let data = match read_to_string(&path) {
        Ok(data) => data,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path));
        }
        Err(error) => return Err(StoreError::Io(path, error)),
    };

    match serde_yaml::from_str(&data).map_err(|error| StoreError::Yaml(path.clone(), error))? {
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(StoreError::NotMapping(path)),
    }
}

// Every file of the template is copied except for `.gitignore`.
fn copy_template(template: &Path, data_dir: &Path) -> Result<()> {
    let walker = WalkBuilder::new(template).standard_filters(false).build();
    for entry in walker {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(template) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative,
            _ => continue,
        };

        if entry.file_name() == ".gitignore" {
            continue;
        }

        let target = data_dir.join(relative);
        if entry.file_type().is_some_and(|kind| kind.is_dir()) {
            mkdirp::mkdirp(&target).map_err(|error| StoreError::Io(target.clone(), error))?;
        } else {
            copy(entry.path(), &target).map_err(|error| StoreError::Io(target.clone(), error))?;
        }
    }

    Ok(())
}

/// All possible error types for node state access.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Required document does not exist.
    #[error("{0:?} does not exist")]
    NotFound(PathBuf),

    /// Document is not well-formed YAML.
    #[error("failed to parse {0:?}")]
    Yaml(PathBuf, #[source] serde_yaml::Error),

    /// Document is well-formed YAML, but not a mapping at the top-level.
    #[error("{0:?} is not a mapping at the top-level")]
    NotMapping(PathBuf),

    /// JSON or TOML document is malformed.
    #[error("failed to parse {0:?}")]
    Config(PathBuf, #[source] crate::config::ConfigError),

    /// Glob pattern for app listing is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// App listing hit an unreadable path.
    #[error(transparent)]
    Glob(#[from] glob::GlobError),

    /// App template could not be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// App identifier would resolve outside of its directory.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Filesystem operation failed.
    #[error("failed to access {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::create_dir_all;

    fn layout() -> NodeLayout {
        NodeLayout::new(std::env::current_dir().unwrap())
    }

    #[sealed_test]
    fn compose_document_keeps_key_order() -> anyhow::Result<()> {
        let document = indoc! {r#"
            services:
              tor:
                image: tor
              bitcoin:
                image: bitcoind
            networks:
              default:
                name: citadel
        "#};
        write("docker-compose.yml", document)?;

        let store = FsComposeStore::new(layout());
        let compose = store.load_compose()?;
        store.save_compose(&compose)?;

        let result = read_to_string("docker-compose.yml")?;
        let expect = indoc! {r#"
            services:
              tor:
                image: tor
              bitcoin:
                image: bitcoind
            networks:
              default:
                name: citadel
        "#};
        assert_eq!(result, expect);

        Ok(())
    }

    #[sealed_test]
    fn missing_service_document() {
        let store = FsComposeStore::new(layout());
        let result = store.load_service("electrs");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[sealed_test]
    fn malformed_compose_document() -> anyhow::Result<()> {
        write("docker-compose.yml", "services: [unclosed")?;
        let store = FsComposeStore::new(layout());
        assert!(matches!(store.load_compose(), Err(StoreError::Yaml(..))));

        write("docker-compose.yml", "- just\n- a\n- list\n")?;
        assert!(matches!(store.load_compose(), Err(StoreError::NotMapping(_))));

        Ok(())
    }

    #[sealed_test]
    fn missing_node_files_read_as_empty() -> anyhow::Result<()> {
        let store = FsNodeStore::new(layout());
        assert_eq!(store.load_user_data()?, UserData::default());
        assert_eq!(store.load_virtual_apps()?, VirtualApps::default());
        assert_eq!(store.load_registry()?, Vec::new());
        store.remove_cached_result("lnd")?;

        Ok(())
    }

    #[sealed_test]
    fn save_user_data_creates_db_dir() -> anyhow::Result<()> {
        let store = FsNodeStore::new(layout());
        let mut data = UserData::default();
        data.set_installed("bitcoind");
        store.save_user_data(&data)?;

        assert_eq!(store.load_user_data()?, data);

        Ok(())
    }

    #[sealed_test]
    fn data_dir_lifecycle() -> anyhow::Result<()> {
        create_dir_all("apps/lnd/nested")?;
        write("apps/lnd/docker-compose.yml", "services: {}\n")?;
        write("apps/lnd/nested/lnd.conf", "alias=node\n")?;
        write("apps/lnd/.gitignore", "*\n")?;

        let store = FsNodeStore::new(layout());
        store.create_data_dir("lnd")?;
        assert!(Path::new("app-data/lnd/docker-compose.yml").is_file());
        assert_eq!(read_to_string("app-data/lnd/nested/lnd.conf")?, "alias=node\n");
        assert!(!Path::new("app-data/lnd/.gitignore").exists());

        store.delete_data("lnd")?;
        assert!(!Path::new("app-data/lnd").exists());
        assert!(store.delete_data("lnd").is_err());

        Ok(())
    }

    #[sealed_test]
    fn data_dir_refuses_path_like_app_names() -> anyhow::Result<()> {
        create_dir_all("db")?;
        create_dir_all("app-data/lnd")?;
        write("db/user.json", r#"{"installedApps": []}"#)?;
        write("docker-compose.yml", "services: {}\n")?;

        let store = FsNodeStore::new(layout());
        for app in ["..", ".", "lnd/..", ""] {
            assert!(matches!(store.create_data_dir(app), Err(StoreError::Path(_))));
            assert!(matches!(store.delete_data(app), Err(StoreError::Path(_))));
            assert!(matches!(store.remove_cached_result(app), Err(StoreError::Path(_))));
        }

        assert!(Path::new("db/user.json").is_file());
        assert!(Path::new("docker-compose.yml").is_file());
        assert!(Path::new("app-data/lnd").is_dir());

        Ok(())
    }

    #[sealed_test]
    fn list_apps_with_manifest() -> anyhow::Result<()> {
        for app in ["lnd", "btcpay", "not-an-app"] {
            create_dir_all(format!("apps/{app}"))?;
        }
        write("apps/lnd/app.yml", "version: 1\n")?;
        write("apps/btcpay/app.yml", "version: 1\n")?;

        let store = FsNodeStore::new(layout());
        assert_eq!(store.list_apps()?, vec!["btcpay".to_string(), "lnd".to_string()]);

        Ok(())
    }
}
