// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use nodeapps::{
    app::{
        runner::{DockerCompose, Helper},
        ActionOptions, AppManager, BestEffort,
    },
    config::ManagerSettings,
    ensure_root,
    path::NodeLayout,
    store::FsNodeStore,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{fs::read_to_string, io::ErrorKind, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about = "Manage apps on your node",
    override_usage = "app-manager [options] [<action>] [<app>] [<other>]...",
    subcommand_help_heading = "Actions",
    version
)]
struct Cli {
    /// Show debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Called by the node configuration step.
    #[arg(long, global = true, hide = true)]
    pub invoked_by_configure: bool,

    /// Root directory of the node.
    #[arg(long, global = true, env = "NODE_ROOT", value_name = "path")]
    pub node_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List all apps available on the node.
    List,

    /// Print available app updates as JSON.
    ListUpdates,

    /// Download latest app repositories.
    Download,

    /// Regenerate node configuration.
    Generate(OptionalAppOptions),

    /// Download updates for one or all apps, then regenerate node configuration.
    Update(OptionalAppOptions),

    /// List installed apps.
    LsInstalled,

    /// Install app.
    Install(AppOptions),

    /// Uninstall app and delete its data.
    Uninstall(AppOptions),

    /// Stop containers of app.
    Stop(AppOptions),

    /// Start containers of installed app.
    Start(AppOptions),

    /// Run compose tool directly on app.
    Compose(ComposeOptions),

    /// Restart containers of installed app.
    Restart(AppOptions),

    /// Derive entropy for identifier.
    Entropy(EntropyOptions),
}

#[derive(Parser, Clone, Debug)]
struct AppOptions {
    /// App to perform action on.
    #[arg(value_name = "app")]
    pub app: Option<String>,
}

#[derive(Parser, Clone, Debug)]
struct OptionalAppOptions {
    /// Only perform action on this app.
    #[arg(value_name = "app")]
    pub app: Option<String>,
}

#[derive(Parser, Clone, Debug)]
struct ComposeOptions {
    /// App to run compose tool on.
    #[arg(value_name = "app")]
    pub app: Option<String>,

    /// Arguments handed to compose tool.
    #[arg(value_name = "other", trailing_var_arg = true, allow_hyphen_values = true)]
    pub other: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
struct EntropyOptions {
    /// Identifier to derive entropy for.
    #[arg(value_name = "identifier")]
    pub identifier: Option<String>,
}

/// Required argument was not given.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MissingArgument(&'static str);

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let code = if error.use_stderr() { 1 } else { 0 };
            let _ = error.print();
            exit(code);
        }
    };

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run(cli) {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run(cli: Cli) -> Result<()> {
    ensure_root()?;

    let layout = match cli.node_root {
        Some(root) => NodeLayout::new(root),
        None => NodeLayout::from_executable()?,
    };
    let settings = load_settings(&layout)?;
    let manager = AppManager::new(
        FsNodeStore::new(layout.clone()),
        DockerCompose::new(layout.clone(), &settings),
        ActionOptions {
            invoked_by_configure: cli.invoked_by_configure,
        },
    );
    let helper = Helper::new(layout, &settings);

    match cli.command.unwrap_or(Command::List) {
        Command::List => run_list(&manager),
        Command::ListUpdates => Ok(helper.call("list-updates", None)?),
        Command::Download => Ok(helper.call("download", None)?),
        Command::Generate(opts) => {
            run_generate(&manager, &helper, cli.invoked_by_configure, opts.app.as_deref())
        }
        Command::Update(opts) => {
            run_update(&manager, &helper, cli.invoked_by_configure, opts.app.as_deref())
        }
        Command::LsInstalled => run_ls_installed(&manager),
        Command::Install(opts) => Ok(manager.install(&require_app(opts.app)?)?),
        Command::Uninstall(opts) => run_uninstall(&manager, opts),
        Command::Stop(opts) => Ok(manager.stop(&require_app(opts.app)?)?),
        Command::Start(opts) => Ok(manager.start(&require_app(opts.app)?)?),
        Command::Compose(opts) => Ok(manager.compose(&require_app(opts.app)?, &opts.other)?),
        Command::Restart(opts) => Ok(manager.restart(&require_app(opts.app)?)?),
        Command::Entropy(opts) => {
            let identifier = opts
                .identifier
                .filter(|identifier| !identifier.is_empty())
                .ok_or(MissingArgument("Missing identifier for entropy"))?;
            Ok(helper.call("entropy", Some(identifier.as_str()))?)
        }
    }
}

fn load_settings(layout: &NodeLayout) -> Result<ManagerSettings> {
    let path = layout.settings_file();
    match read_to_string(&path) {
        Ok(data) => data
            .parse::<ManagerSettings>()
            .with_context(|| format!("cannot parse settings {:?}", path.display())),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(ManagerSettings::default()),
        Err(error) => {
            Err(error).with_context(|| format!("cannot read settings {:?}", path.display()))
        }
    }
}

fn require_app(app: Option<String>) -> Result<String, MissingArgument> {
    app.filter(|app| !app.is_empty())
        .ok_or(MissingArgument("No app provided"))
}

fn run_list(manager: &AppManager) -> Result<()> {
    for app in manager.list()? {
        println!("{app}");
    }

    Ok(())
}

fn run_ls_installed(manager: &AppManager) -> Result<()> {
    match manager.list_installed()? {
        Some(apps) => println!("{}", apps.join("\n")),
        None => println!("\n"),
    }

    Ok(())
}

fn run_uninstall(manager: &AppManager, opts: AppOptions) -> Result<()> {
    let app = require_app(opts.app)?;
    if let BestEffort::Ignored(error) = manager.uninstall(&app)? {
        warn!("teardown of {app} did not finish: {error}");
    }

    Ok(())
}

fn run_generate(
    manager: &AppManager,
    helper: &Helper,
    invoked_by_configure: bool,
    app: Option<&str>,
) -> Result<()> {
    if invoked_by_configure {
        helper.call("generate", app)?;
    } else {
        manager.reconfigure()?;
    }

    Ok(())
}

fn run_update(
    manager: &AppManager,
    helper: &Helper,
    invoked_by_configure: bool,
    app: Option<&str>,
) -> Result<()> {
    helper.call("download", app)?;
    match app {
        Some(app) => info!("Downloaded latest {app} version"),
        None => info!("Downloaded all updates"),
    }

    run_generate(manager, helper, invoked_by_configure, None)
}
