use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::Shell;
use graft_core::PlatformStrategy;
use graft_injector::{
    default_config_root, Engine, EngineConfig, EngineEvent, EngineLayout, LocateEnv, Operation,
    PayloadRequest, RunOptions, StdinPrompt, SystemProcesses,
};

use crate::logging::init_logging;
use crate::render::{
    format_run_report_lines, format_status_lines, StopSpinner, TerminalRenderer,
};
use crate::{Cli, Commands, SwapArgs};

struct Session {
    layout: EngineLayout,
    config: EngineConfig,
    platform: PlatformStrategy,
    processes: SystemProcesses,
}

impl Session {
    fn open(config_dir: Option<PathBuf>, verbosity: u8) -> Result<Self> {
        let platform = PlatformStrategy::current()?;
        let root = match config_dir {
            Some(dir) => dir,
            None => default_config_root()?,
        };
        let layout = EngineLayout::new(root);
        let config = EngineConfig::load(&layout)?;
        init_logging(verbosity, config.log.level.as_deref());
        tracing::debug!(
            platform = platform.as_str(),
            config_root = %layout.root().display(),
            "session opened"
        );

        Ok(Self {
            layout,
            config,
            platform,
            processes: SystemProcesses::new(platform),
        })
    }

    fn engine(&self) -> Engine<'_, SystemProcesses> {
        Engine::new(
            &self.layout,
            &self.config,
            self.platform,
            LocateEnv::from_system(&self.config),
            &self.processes,
        )
    }
}

pub fn run_cli(cli: Cli) -> Result<()> {
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Inject(args) => {
            let session = Session::open(cli.config_dir, cli.verbosity)?;
            run_swap(&session, Operation::Inject, args, renderer)
        }
        Commands::Uninject(args) => {
            let session = Session::open(cli.config_dir, cli.verbosity)?;
            run_swap(&session, Operation::Uninject, args, renderer)
        }
        Commands::Reinject(args) => {
            let session = Session::open(cli.config_dir, cli.verbosity)?;
            run_swap(&session, Operation::Reinject, args, renderer)
        }
        Commands::Status {
            channel,
            verbose,
            forget,
        } => {
            let session = Session::open(cli.config_dir, cli.verbosity)?;
            let channel = channel.unwrap_or(session.config.inject.default_channel);
            let engine = session.engine();
            if forget && engine.forget(channel)? {
                renderer.print_status("ok", &format!("forgot cached location for {channel}"));
            }
            let report = engine.status(channel, &mut StdinPrompt, verbose)?;
            renderer.print_lines(&format_status_lines(&report, renderer.style()));
            Ok(())
        }
        Commands::Heal { channel } => {
            let session = Session::open(cli.config_dir, cli.verbosity)?;
            let channel = channel.unwrap_or(session.config.inject.default_channel);
            let (located, healed) = session.engine().heal(channel, &mut StdinPrompt)?;
            if healed {
                renderer.print_status(
                    "ok",
                    &format!("healed {channel} at {}", located.container.display()),
                );
            } else {
                renderer.print_status(
                    "ok",
                    &format!(
                        "{channel} at {} is not broken; nothing to heal",
                        located.container.display()
                    ),
                );
            }
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout().lock();
            write_completions_script(shell, &mut stdout)
        }
    }
}

fn run_swap(
    session: &Session,
    operation: Operation,
    args: SwapArgs,
    renderer: TerminalRenderer,
) -> Result<()> {
    let channel = args
        .channel
        .unwrap_or(session.config.inject.default_channel);
    let options = swap_options(&args, &session.config);
    let engine = session.engine();

    let mut spinner: Option<StopSpinner> = None;
    let mut observer = |event: &EngineEvent| match event {
        EngineEvent::StoppingClient { process_name } => {
            spinner = Some(renderer.start_spinner(&format!("waiting for {process_name} to exit")));
        }
        EngineEvent::ClientStopped(_) => {
            if let Some(active) = spinner.take() {
                active.finish();
            }
        }
        _ => {}
    };
    let outcome = engine.run(operation, channel, &options, &mut StdinPrompt, &mut observer);
    if let Some(active) = spinner.take() {
        active.finish();
    }

    let report = outcome?;
    renderer.print_lines(&format_run_report_lines(&report, renderer.style()));
    Ok(())
}

fn swap_options(args: &SwapArgs, config: &EngineConfig) -> RunOptions {
    RunOptions {
        skip_relaunch: args.no_relaunch,
        payload: PayloadRequest {
            production: args.production,
            entry_point: args.entry_point.clone(),
            bundle_path: args
                .bundle
                .clone()
                .or_else(|| config.inject.bundle_path.clone()),
        },
    }
}

pub fn write_completions_script<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "graft", &mut generated);
    writer
        .write_all(&generated)
        .with_context(|| "failed writing generated completion script")?;
    Ok(())
}
