#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]

mod commands;
mod logging;

use clap::Parser;
use fern_core::Config;
use miette::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fern")]
#[command(author, version, about = "A deterministic package installer for Node projects", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Install dependencies from package.json
    Install {
        /// Fail instead of updating the lockfile when it is out of date
        #[arg(long)]
        frozen_lockfile: bool,

        /// Use cached packages when they satisfy a range, even if newer
        /// versions may exist in the registry
        #[arg(long, conflicts_with = "offline")]
        prefer_offline: bool,

        /// Never touch the network; fail on uncached packages
        #[arg(long)]
        offline: bool,

        /// Layout strategy for node_modules (hoisted or isolated)
        #[arg(long, value_name = "STRATEGY")]
        linker: Option<String>,

        /// Skip devDependencies of the root and workspace packages
        #[arg(long, alias = "production")]
        no_dev: bool,

        /// Skip optionalDependencies
        #[arg(long)]
        no_optional: bool,
    },

    /// Run a package.json script across workspace packages
    Run {
        /// The script name to run
        script: String,

        /// Ignore dependency order and run everything at once
        #[arg(long)]
        parallel: bool,
    },

    /// Prepare a package for patching in a scratch directory
    Patch {
        /// Package to patch, as name@version
        spec: String,
    },

    /// Diff an edited scratch directory and save the patch
    PatchCommit {
        /// Scratch directory produced by `fern patch`
        dir: PathBuf,
    },

    /// List workspace packages
    Workspaces,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = Config::new(cwd.clone());
    config.json = cli.json;
    config.verbosity = cli.verbose;

    logging::init(config.verbosity, config.json);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Install {
            frozen_lockfile,
            prefer_offline,
            offline,
            linker,
            no_dev,
            no_optional,
        }) => {
            let action = commands::install::InstallAction {
                cwd,
                frozen_lockfile,
                prefer_offline,
                offline,
                linker,
                include_dev: !no_dev,
                include_optional: !no_optional,
            };
            commands::install::run(action, config.channel, cli.json)
        }
        Some(Commands::Run { script, parallel }) => {
            commands::run::run(&cwd, &script, parallel, cli.json)
        }
        Some(Commands::Patch { spec }) => {
            commands::patch::begin(&cwd, &spec, config.channel, cli.json)
        }
        Some(Commands::PatchCommit { dir }) => {
            commands::patch::commit(&cwd, &dir, config.channel, cli.json)
        }
        Some(Commands::Workspaces) => commands::workspaces::run(&cwd, cli.json),
    }
}
