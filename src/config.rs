// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the structured files that the managers read and
//! write to simplify the process of serialization and deserialization. File
//! I/O is left to the caller to figure out.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// App manager settings layout.
///
/// Every node may carry an optional settings file that tweaks how the app
/// manager talks to the outside world. Any missing field falls back to its
/// default value, so an empty file is a valid settings file.
///
/// # General Layout
///
/// ```toml
/// [compose]
/// program = "docker"
/// env_file = ".env"
///
/// [reconfigure]
/// script = "scripts/configure"
/// proxies = ["app-tor", "app-2-tor", "app-3-tor"]
///
/// [helper]
/// program = "app/app-helper"
/// ```
///
/// Relative paths are resolved against the node root by the caller.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerSettings {
    /// How to invoke the compose tool.
    pub compose: ComposeSettings,

    /// How to reconfigure the node after app changes.
    pub reconfigure: ReconfigureSettings,

    /// External helper handling dependency resolution and repository syncing.
    pub helper: HelperSettings,
}

impl FromStr for ManagerSettings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: ManagerSettings =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on all path fields.
        settings.compose.program = expand(&settings.compose.program)?;
        settings.compose.env_file = expand(&settings.compose.env_file)?;
        settings.reconfigure.script = expand(&settings.reconfigure.script)?;
        settings.helper.program = expand(&settings.helper.program)?;

        Ok(settings)
    }
}

impl Display for ManagerSettings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(shellexpand::full(path.to_string_lossy().as_ref())
        .map_err(ConfigError::ShellExpansion)?
        .into_owned()
        .into())
}

/// Compose tool settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ComposeSettings {
    /// Container tool binary that provides the `compose` subcommand.
    pub program: PathBuf,

    /// Environment file handed to every compose invocation.
    pub env_file: PathBuf,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            program: "docker".into(),
            env_file: ".env".into(),
        }
    }
}

/// Node reconfiguration settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconfigureSettings {
    /// Script that regenerates node-wide configuration.
    pub script: PathBuf,

    /// Services of the node compose project to bounce after reconfiguring.
    pub proxies: Vec<String>,
}

impl Default for ReconfigureSettings {
    fn default() -> Self {
        Self {
            script: "scripts/configure".into(),
            proxies: vec!["app-tor".into(), "app-2-tor".into(), "app-3-tor".into()],
        }
    }
}

/// External helper settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HelperSettings {
    pub program: PathBuf,
}

impl Default for HelperSettings {
    fn default() -> Self {
        Self {
            program: "app/app-helper".into(),
        }
    }
}

/// User state layout.
///
/// The user state file records which apps are considered installed. It also
/// holds data owned by other tools, so every unknown field is carried through
/// untouched.
#[derive(Default, Debug, PartialEq, Clone, Deserialize, Serialize)]
pub struct UserData {
    /// Installed apps in order of installation.
    #[serde(
        rename = "installedApps",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub installed_apps: Option<Vec<String>>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl UserData {
    pub fn is_installed(&self, app: impl AsRef<str>) -> bool {
        self.installed_apps
            .as_ref()
            .is_some_and(|apps| apps.iter().any(|entry| entry == app.as_ref()))
    }

    /// Append app to installed listing.
    ///
    /// Does nothing if app is already listed.
    pub fn set_installed(&mut self, app: impl Into<String>) {
        let app = app.into();
        let apps = self.installed_apps.get_or_insert_with(Vec::new);
        if !apps.contains(&app) {
            apps.push(app);
        }
    }

    /// Remove every occurrence of app from installed listing.
    pub fn set_removed(&mut self, app: impl AsRef<str>) {
        if let Some(apps) = self.installed_apps.as_mut() {
            apps.retain(|entry| entry != app.as_ref());
        }
    }
}

impl FromStr for UserData {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(ConfigError::Json)
    }
}

impl Display for UserData {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            serde_json::to_string_pretty(self)
                .map_err(ConfigError::Json)?
                .as_str(),
        )
    }
}

/// Mapping of virtual apps to their concrete implementations.
///
/// A __virtual app__ is a capability that several apps can provide, e.g., two
/// competing wallet backends. Only one implementation may be installed at a
/// time.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct VirtualApps(BTreeMap<String, Vec<String>>);

impl VirtualApps {
    /// Implementations of target virtual app, if it is one.
    pub fn implementations(&self, virtual_app: impl AsRef<str>) -> Option<&[String]> {
        self.0.get(virtual_app.as_ref()).map(Vec::as_slice)
    }

    /// Check if app implements virtual app.
    pub fn implements(&self, virtual_app: impl AsRef<str>, app: impl AsRef<str>) -> bool {
        self.implementations(virtual_app)
            .is_some_and(|apps| apps.iter().any(|entry| entry == app.as_ref()))
    }

    /// All virtual apps with their implementations.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(name, apps)| (name.as_str(), apps.as_slice()))
    }
}

impl FromIterator<(String, Vec<String>)> for VirtualApps {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromStr for VirtualApps {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(ConfigError::Json)
    }
}

/// Entry of app registry.
///
/// The registry is computed by the external dependency resolver. Only the
/// fields needed to invalidate cached results are read here.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RegistryEntry {
    /// Identifier of the app.
    pub name: String,

    /// Whether all dependencies of the app are satisfied.
    #[serde(default = "default_compatible")]
    pub compatible: bool,

    /// Dependencies that are not yet satisfied.
    #[serde(default)]
    pub missing_dependencies: Vec<Dependency>,
}

fn default_compatible() -> bool {
    true
}

/// Dependency of an app.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Dependency {
    /// Exactly one app is required.
    One(String),

    /// Any one of several apps is required.
    AnyOf(Vec<String>),
}

impl Dependency {
    /// Check if installing app would satisfy this dependency.
    ///
    /// An app satisfies a dependency if it is the dependency, or if it is an
    /// implementation of the dependency as a virtual app.
    pub fn is_satisfied_by(&self, app: impl AsRef<str>, virtual_apps: &VirtualApps) -> bool {
        let app = app.as_ref();
        let satisfies = |dep: &String| dep == app || virtual_apps.implements(dep, app);
        match self {
            Self::One(dep) => satisfies(dep),
            Self::AnyOf(deps) => deps.iter().any(satisfies),
        }
    }
}

/// Parse app registry listing.
///
/// # Errors
///
/// - Return [`ConfigError::Json`] if listing is malformed.
pub fn parse_registry(data: &str) -> Result<Vec<RegistryEntry>> {
    serde_json::from_str(data).map_err(ConfigError::Json)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize settings.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize settings.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to (de)serialize JSON data.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Failed to perform shell expansion on settings.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
