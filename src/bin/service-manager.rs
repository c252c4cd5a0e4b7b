// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use nodeapps::{ensure_root, path::NodeLayout, service::ServiceRegistrar, store::FsComposeStore};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about = "Manage services on your node",
    override_usage = "service-manager [options] <action> <service>",
    subcommand_help_heading = "Actions",
    version
)]
struct Cli {
    /// Show debug output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Root directory of the node.
    #[arg(long, global = true, env = "NODE_ROOT", value_name = "path")]
    pub node_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Merge service into the compose document of the node.
    Install(ServiceOptions),

    /// Take service out of the compose document of the node.
    Uninstall(ServiceOptions),
}

#[derive(Parser, Clone, Debug)]
struct ServiceOptions {
    /// Service to perform action on.
    #[arg(required = true, value_name = "service")]
    pub service: String,
}

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
    let registrar = ServiceRegistrar::new(FsComposeStore::new(layout));

    match cli.command {
        Command::Install(opts) => registrar.install_service(&opts.service)?,
        Command::Uninstall(opts) => registrar.uninstall_service(&opts.service)?,
    }

    Ok(())
}
