use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;
use graft_core::Channel;

mod dispatch;
mod exit_codes;
mod logging;
mod render;

#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(about = "Plug a JavaScript payload into an installed Discord client", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory holding graft.toml, the location cache and installed bundles"
    )]
    config_dir: Option<PathBuf>,
    #[arg(
        short = 'v',
        action = ArgAction::Count,
        global = true,
        help = "Raise log verbosity (-v info, -vv debug, -vvv trace)"
    )]
    verbosity: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Inject the payload loader into the client")]
    Inject(SwapArgs),
    #[command(about = "Restore the client's original app.asar")]
    Uninject(SwapArgs),
    #[command(about = "Uninject when injected, then inject again")]
    Reinject(SwapArgs),
    #[command(about = "Show where the client is installed and whether it is injected")]
    Status {
        #[arg(value_parser = parse_channel)]
        channel: Option<Channel>,
        #[arg(long, help = "List the top-level entries of the container")]
        verbose: bool,
        #[arg(long, help = "Drop the cached install location before looking it up")]
        forget: bool,
    },
    #[command(about = "Recover an installation left behind by an interrupted run")]
    Heal {
        #[arg(value_parser = parse_channel)]
        channel: Option<Channel>,
    },
    #[command(about = "Print a shell completion script")]
    Completions { shell: Shell },
}

#[derive(Args, Debug, Clone, Default)]
struct SwapArgs {
    #[arg(
        value_parser = parse_channel,
        help = "stable, ptb, canary or development; defaults to the configured channel"
    )]
    channel: Option<Channel>,
    #[arg(long, help = "Leave a running client alone and do not restart it")]
    no_relaunch: bool,
    #[arg(
        long,
        help = "Inject the packaged bundle instead of the development entry file"
    )]
    production: bool,
    #[arg(
        long,
        value_name = "PATH",
        conflicts_with = "production",
        help = "Development entry file the loader requires"
    )]
    entry_point: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PATH",
        requires = "production",
        help = "Packaged bundle used with --production"
    )]
    bundle: Option<PathBuf>,
    #[arg(long, help = "Always exit with status 0")]
    no_exit_codes: bool,
}

impl Commands {
    fn suppresses_exit_codes(&self) -> bool {
        match self {
            Self::Inject(args) | Self::Uninject(args) | Self::Reinject(args) => args.no_exit_codes,
            Self::Status { .. } | Self::Heal { .. } | Self::Completions { .. } => false,
        }
    }
}

fn parse_channel(raw: &str) -> Result<Channel, String> {
    raw.parse::<Channel>().map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let suppress = cli.command.suppresses_exit_codes();

    match dispatch::run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            render::print_error(&err);
            if suppress {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(exit_codes::GraftExit::from_error(&err).code())
            }
        }
    }
}

#[cfg(test)]
mod tests;
