// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! App lifecycle management.
//!
//! An __app__ is a containerized compose project that can be installed on,
//! or removed from, a node. Whether an app counts as installed is decided by
//! the __installed-apps list__ inside the user state file alone, not by what
//! containers happen to be running.
//!
//! # Virtual Apps
//!
//! Several apps may implement one __virtual app__, e.g., two competing
//! lightning backends that both provide "lightning". Only one implementation
//! of a virtual app may be installed at a time, thus installing a sibling
//! implementation fails until the installed one is removed.
//!
//! # Best-Effort Teardown
//!
//! Removing an app from the installed-apps list must never be blocked by a
//! broken app. Container teardown and data deletion during uninstall are
//! therefore attempted, and any failure is reported as
//! [`BestEffort::Ignored`] instead of being propagated.

pub mod runner;

use crate::{
    app::runner::{ComposeRunner, DockerCompose, RunnerError},
    path::check_app_name,
    store::{FsNodeStore, NodeStore, StoreError},
};

use std::fmt::Display;
use tracing::{debug, info, instrument, warn};

const PULL: &[&str] = &["pull"];
const UP: &[&str] = &["up", "--detach"];
const DOWN: &[&str] = &["rm", "--force", "--stop"];

/// Outcome of an operation whose failure is deliberately ignored.
#[must_use]
#[derive(Debug)]
pub enum BestEffort<E> {
    /// Operation finished without error.
    Done,

    /// Operation failed, and the failure was ignored.
    Ignored(E),
}

impl<E> BestEffort<E> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl<E: Display> BestEffort<E> {
    fn from_result(result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::Done,
            Err(error) => {
                warn!("ignoring failure: {error}");
                Self::Ignored(error)
            }
        }
    }
}

/// Options shared by every lifecycle action.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActionOptions {
    /// Invoked by the node configuration step, so do not reconfigure again.
    pub invoked_by_configure: bool,
}

/// Drive app state transitions of a node.
#[derive(Debug)]
pub struct AppManager<S = FsNodeStore, R = DockerCompose>
where
    S: NodeStore,
    R: ComposeRunner,
{
    pub(crate) store: S,
    pub(crate) runner: R,
    options: ActionOptions,
}

impl<S, R> AppManager<S, R>
where
    S: NodeStore,
    R: ComposeRunner,
{
    /// Construct new app manager.
    pub fn new(store: S, runner: R, options: ActionOptions) -> Self {
        Self {
            store,
            runner,
            options,
        }
    }

    /// List identifiers of every app available on the node.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Store`] if apps directory cannot be read.
    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self.store.list_apps()?)
    }

    /// List installed apps in installation order.
    ///
    /// Yields [`None`] if the user state has no installed-apps list at all.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Store`] if user state cannot be loaded.
    pub fn list_installed(&self) -> Result<Option<Vec<String>>> {
        Ok(self.store.load_user_data()?.installed_apps)
    }

    /// Install app.
    ///
    /// Creates the data directory of the app, pulls its images, starts its
    /// containers, and marks it installed. Cached compatibility results of
    /// every app that was waiting on this app are invalidated afterwards.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::InvalidName`] if app is not a plain name.
    /// - Return [`AppError::AlreadyInstalled`] if app is already installed.
    /// - Return [`AppError::ConflictingImplementation`] if another
    ///   implementation of a virtual app this app implements is installed.
    /// - Return [`AppError::Store`] if node state cannot be accessed.
    /// - Return [`AppError::Runner`] if compose tool fails.
    #[instrument(skip(self), level = "debug")]
    pub fn install(&self, app: &str) -> Result<()> {
        ensure_valid_name(app)?;
        let mut user_data = self.store.load_user_data()?;
        let virtual_apps = self.store.load_virtual_apps()?;

        if user_data.is_installed(app) {
            return Err(AppError::AlreadyInstalled(app.into()));
        }

        // INVARIANT: At most one implementation of a virtual app is installed.
        for (virtual_app, implementations) in virtual_apps.iter() {
            if !implementations.iter().any(|entry| entry == app) {
                continue;
            }

            if let Some(installed) = implementations
                .iter()
                .find(|entry| user_data.is_installed(entry))
            {
                return Err(AppError::ConflictingImplementation {
                    virtual_app: virtual_app.into(),
                    installed: installed.clone(),
                });
            }
        }

        info!("Installing app {app}...");
        self.store.create_data_dir(app)?;
        self.runner.run(app, PULL)?;
        self.runner.run(app, UP)?;

        user_data.set_installed(app);
        self.store.save_user_data(&user_data)?;

        for entry in self.store.load_registry()? {
            if entry.compatible {
                continue;
            }

            if entry
                .missing_dependencies
                .iter()
                .any(|dep| dep.is_satisfied_by(app, &virtual_apps))
            {
                debug!("invalidate cached result of {}", entry.name);
                self.store.remove_cached_result(&entry.name)?;
            }
        }

        if self.options.invoked_by_configure {
            debug!("invoked by configure, skip reconfiguration");
            return Ok(());
        }

        self.reconfigure()
    }

    /// Uninstall app.
    ///
    /// Stops and removes the containers of the app, deletes its data, and
    /// takes it off the installed-apps list. Teardown stops at the first
    /// failure, and that failure is ignored, so the app always ends up
    /// uninstalled. Thus, an app whose containers could not be removed still
    /// has its data directory left behind.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::InvalidName`] if app is not a plain name.
    /// - Return [`AppError::NotInstalled`] if app is not installed.
    /// - Return [`AppError::Store`] if user state cannot be accessed.
    #[instrument(skip(self), level = "debug")]
    pub fn uninstall(&self, app: &str) -> Result<BestEffort<AppError>> {
        self.ensure_installed(app, "is not installed")?;

        info!("Stopping app {app}...");
        let teardown = BestEffort::from_result(self.teardown(app));

        info!("Removing from the list of installed apps...");
        let mut user_data = self.store.load_user_data()?;
        user_data.set_removed(app);
        self.store.save_user_data(&user_data)?;

        Ok(teardown)
    }

    /// Bring up containers of installed app.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::InvalidName`] if app is not a plain name.
    /// - Return [`AppError::NotInstalled`] if app is not installed.
    /// - Return [`AppError::Runner`] if compose tool fails.
    #[instrument(skip(self), level = "debug")]
    pub fn start(&self, app: &str) -> Result<()> {
        self.ensure_installed(app, "is not yet installed")?;
        info!("Starting app {app}...");
        Ok(self.runner.run(app, UP)?)
    }

    /// Stop and remove containers of app.
    ///
    /// Works whether or not the app is installed.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::InvalidName`] if app is not a plain name.
    /// - Return [`AppError::Runner`] if compose tool fails.
    #[instrument(skip(self), level = "debug")]
    pub fn stop(&self, app: &str) -> Result<()> {
        ensure_valid_name(app)?;
        info!("Stopping app {app}...");
        Ok(self.runner.run(app, DOWN)?)
    }

    /// Stop and remove containers of installed app, then bring them back up.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::InvalidName`] if app is not a plain name.
    /// - Return [`AppError::NotInstalled`] if app is not installed.
    /// - Return [`AppError::Runner`] if compose tool fails.
    #[instrument(skip(self), level = "debug")]
    pub fn restart(&self, app: &str) -> Result<()> {
        self.ensure_installed(app, "is not yet installed")?;
        info!("Restarting app {app}...");
        self.runner.run(app, DOWN)?;
        Ok(self.runner.run(app, UP)?)
    }

    /// Pass arbitrary arguments through to compose tool for app.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::InvalidName`] if app is not a plain name.
    /// - Return [`AppError::Runner`] if compose tool fails.
    #[instrument(skip(self), level = "debug")]
    pub fn compose(&self, app: &str, args: &[String]) -> Result<()> {
        ensure_valid_name(app)?;
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        Ok(self.runner.run(app, &args)?)
    }

    /// Regenerate node configuration, and bounce the node proxies.
    ///
    /// Failing steps of [`DockerCompose`] are logged and skipped.
    ///
    /// # Errors
    ///
    /// - Return [`AppError::Runner`] if the runner reports a failure.
    pub fn reconfigure(&self) -> Result<()> {
        Ok(self.runner.reconfigure()?)
    }

    fn ensure_installed(&self, app: &str, reason: &'static str) -> Result<()> {
        ensure_valid_name(app)?;
        if !self.store.load_user_data()?.is_installed(app) {
            return Err(AppError::NotInstalled {
                app: app.into(),
                reason,
            });
        }

        Ok(())
    }

    // NOTE: Stops at first failure, so data survives a failed container removal.
    fn teardown(&self, app: &str) -> Result<()> {
        self.runner.run(app, DOWN)?;
        info!("Deleting data...");
        self.store.delete_data(app)?;
        Ok(())
    }
}

fn ensure_valid_name(app: &str) -> Result<()> {
    check_app_name(app).map_err(|_| AppError::InvalidName(app.into()))
}

/// All possible error types for app lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// App is required to be installed, but it is not.
    #[error("App {app} {reason}")]
    NotInstalled { app: String, reason: &'static str },

    /// App identifier is not a plain directory name.
    #[error("Invalid app name {0:?}")]
    InvalidName(String),

    /// App is already installed.
    #[error("App {0} is already installed")]
    AlreadyInstalled(String),

    /// Another implementation of the same virtual app is installed.
    #[error(
        "Another implementation of {virtual_app} is already installed: {installed}. \
         Uninstall it first to install this app."
    )]
    ConflictingImplementation {
        virtual_app: String,
        installed: String,
    },

    /// Node state cannot be accessed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Compose tool failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Friendly result alias :3
pub type Result<T, E = AppError> = std::result::Result<T, E>;
