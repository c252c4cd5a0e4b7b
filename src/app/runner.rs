// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Container tool invocation.
//!
//! Every app is its own compose project whose compose file lives in the app
//! template directory. Apps are brought up, torn down, and poked at by
//! shelling out to the compose tool. All calls block until the tool exits;
//! there is no timeout or cancellation.

use crate::{config::ManagerSettings, path::NodeLayout};

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument, warn};

/// Layer of indirection for container tool access.
pub trait ComposeRunner {
    /// Run compose tool against the project of target app.
    fn run(&self, app: &str, args: &[&str]) -> Result<()>;

    /// Regenerate node configuration and bounce the node proxies.
    ///
    /// Every step is attempted even if an earlier one fails.
    fn reconfigure(&self) -> Result<()>;
}

/// Container tool access through `docker compose`.
#[derive(Debug, Clone)]
pub struct DockerCompose {
    layout: NodeLayout,
    program: PathBuf,
    env_file: PathBuf,
    configure_script: PathBuf,
    proxies: Vec<String>,
}

impl DockerCompose {
    /// Construct new compose runner for node.
    pub fn new(layout: NodeLayout, settings: &ManagerSettings) -> Self {
        Self {
            program: settings.compose.program.clone(),
            env_file: layout.resolve(&settings.compose.env_file),
            configure_script: layout.resolve(&settings.reconfigure.script),
            proxies: settings.reconfigure.proxies.clone(),
            layout,
        }
    }

    fn app_args(&self, app: &str, args: &[&str]) -> Vec<OsString> {
        let mut bin_args: Vec<OsString> = vec!["compose".into()];
        if self.env_file.is_file() {
            bin_args.extend(["--env-file".into(), self.env_file.clone().into_os_string()]);
        }
        bin_args.extend([
            "--project-name".into(),
            app.into(),
            "--file".into(),
            self.layout.app_compose_file(app).into_os_string(),
        ]);
        bin_args.extend(args.iter().map(OsString::from));

        bin_args
    }

    fn node_call(&self, args: &[&str]) -> Result<()> {
        let mut bin_args: Vec<OsString> = vec!["compose".into()];
        bin_args.extend(args.iter().map(OsString::from));
        syscall_interactive(&self.program, bin_args, Some(self.layout.root()))
    }
}

impl ComposeRunner for DockerCompose {
    #[instrument(skip(self), level = "debug")]
    fn run(&self, app: &str, args: &[&str]) -> Result<()> {
        syscall_interactive(&self.program, self.app_args(app, args), Some(self.layout.root()))
    }

    #[instrument(skip(self), level = "debug")]
    fn reconfigure(&self) -> Result<()> {
        info!("reconfigure node");
        let configured = syscall_interactive(
            &self.configure_script,
            Vec::<OsString>::new(),
            Some(self.layout.root()),
        );
        skip_failure(configured);

        for proxy in &self.proxies {
            skip_failure(self.node_call(&["stop", proxy.as_str()]));
            skip_failure(self.node_call(&["start", proxy.as_str()]));
        }

        Ok(())
    }
}

fn skip_failure(result: Result<()>) {
    if let Err(error) = result {
        warn!("reconfiguration step failed: {error}");
    }
}

/// External helper program.
///
/// Dependency resolution, repository syncing, update discovery, and entropy
/// derivation are all performed by a separate program. The helper inherits
/// standard input and output, so whatever it prints goes straight to the
/// caller.
#[derive(Debug, Clone)]
pub struct Helper {
    layout: NodeLayout,
    program: PathBuf,
}

impl Helper {
    pub fn new(layout: NodeLayout, settings: &ManagerSettings) -> Self {
        Self {
            program: layout.resolve(&settings.helper.program),
            layout,
        }
    }

    /// Hand action over to helper.
    ///
    /// # Errors
    ///
    /// - Return [`RunnerError::Spawn`] if helper cannot be executed.
    /// - Return [`RunnerError::Failed`] if helper exits unsuccessfully.
    #[instrument(skip(self), level = "debug")]
    pub fn call(&self, action: &str, arg: Option<&str>) -> Result<()> {
        let mut args = vec![action];
        args.extend(arg);
        syscall_interactive(&self.program, args, Some(self.layout.root()))
    }
}

/// Run external command with inherited standard streams.
///
/// Blocks current process until command exits.
///
/// # Errors
///
/// - Return [`RunnerError::Spawn`] if command cannot be executed.
/// - Return [`RunnerError::Failed`] if command exits unsuccessfully.
pub fn syscall_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    cwd: Option<&Path>,
) -> Result<()> {
    let args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_os_string())
        .collect::<Vec<_>>();
    debug!("run {:?} {:?}", cmd.as_ref(), args);

    let mut command = Command::new(cmd.as_ref());
    command.args(&args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let status = command
        .spawn()
        .and_then(|mut child| child.wait())
        .map_err(|error| RunnerError::Spawn(cmd.as_ref().into(), error))?;
    if !status.success() {
        warn!("command {:?} exited with {status}", cmd.as_ref());
        return Err(RunnerError::Failed {
            command: render_command(cmd.as_ref(), &args),
            code: status.code(),
        });
    }

    Ok(())
}

fn render_command(cmd: &OsStr, args: &[OsString]) -> String {
    std::iter::once(cmd)
        .chain(args.iter().map(OsString::as_os_str))
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// All possible error types for container tool access.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Command could not be executed at all.
    #[error("failed to run {0:?}")]
    Spawn(OsString, #[source] std::io::Error),

    /// Command ran, but did not exit successfully.
    #[error("command `{command}` failed with exit code {code:?}")]
    Failed { command: String, code: Option<i32> },
}

/// Friendly result alias :3
pub type Result<T, E = RunnerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::fs::write;

    #[test]
    fn app_args_without_env_file() {
        let layout = NodeLayout::new("/nonexistent/node");
        let runner = DockerCompose::new(layout, &ManagerSettings::default());
        let result = runner.app_args("lnd", &["up", "--detach"]);
        let expect: Vec<OsString> = [
            "compose",
            "--project-name",
            "lnd",
            "--file",
            "/nonexistent/node/apps/lnd/docker-compose.yml",
            "up",
            "--detach",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        assert_eq!(result, expect);
    }

    #[sealed_test]
    fn app_args_with_env_file() -> anyhow::Result<()> {
        write(".env", "BITCOIN_NETWORK=mainnet\n")?;
        let root = std::env::current_dir()?;
        let runner = DockerCompose::new(NodeLayout::new(&root), &ManagerSettings::default());
        let result = runner.app_args("lnd", &["pull"]);

        assert_eq!(result[1], OsString::from("--env-file"));
        assert_eq!(result[2], root.join(".env").into_os_string());
        assert_eq!(result.last(), Some(&OsString::from("pull")));

        Ok(())
    }

    fn write_script(path: &Path, body: &str) -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        write(path, format!("#!/bin/sh\n{body}"))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    #[sealed_test]
    fn reconfigure_keeps_going_after_failed_steps() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        write_script(&root.join("configure"), "echo configure >> calls.log\nexit 3\n")?;
        write_script(
            &root.join("fake-docker"),
            indoc! {r#"
                echo "$@" >> calls.log
                if [ "$*" = "compose stop app-tor" ]; then exit 1; fi
            "#},
        )?;

        let mut settings = ManagerSettings::default();
        settings.compose.program = root.join("fake-docker");
        settings.reconfigure.script = "configure".into();
        settings.reconfigure.proxies = vec!["app-tor".into(), "app-2-tor".into()];
        let runner = DockerCompose::new(NodeLayout::new(&root), &settings);
        runner.reconfigure()?;

        let expect = indoc! {"
            configure
            compose stop app-tor
            compose start app-tor
            compose stop app-2-tor
            compose start app-2-tor
        "};
        assert_eq!(std::fs::read_to_string("calls.log")?, expect);

        Ok(())
    }

    #[sealed_test]
    fn reconfigure_without_configure_script() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let mut settings = ManagerSettings::default();
        settings.compose.program = "true".into();
        let runner = DockerCompose::new(NodeLayout::new(&root), &settings);

        assert!(runner.reconfigure().is_ok());

        Ok(())
    }

    #[test]
    fn syscall_reports_exit_status() {
        assert!(syscall_interactive("true", Vec::<&str>::new(), None).is_ok());

        let result = syscall_interactive("false", Vec::<&str>::new(), None);
        assert!(matches!(
            result,
            Err(RunnerError::Failed { ref command, code: Some(1) }) if command == "false"
        ));
    }

    #[test]
    fn syscall_reports_missing_program() {
        let result = syscall_interactive("./definitely-not-a-program", ["arg"], None);
        assert!(matches!(result, Err(RunnerError::Spawn(..))));
    }
}
