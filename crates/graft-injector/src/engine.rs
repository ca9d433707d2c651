use std::path::PathBuf;

use anyhow::Result;
use graft_core::asar::AsarArchive;
use graft_core::{Channel, InjectError, InstallState, PlatformStrategy};

use crate::config::EngineConfig;
use crate::inspect::{heal, inspect, InstallPaths};
use crate::locate::{InstallLocator, LocateEnv, Located, PathPrompt};
use crate::location_cache::clear_cached_location;
use crate::payload::{install_bundle, Payload, PayloadRequest};
use crate::process::{
    process_name, relaunch, relaunch_command, stop_running, ProcessCoordinator, StoppedSession,
};
use crate::sandbox::{self, AccommodationOutcome};
use crate::transaction::{InjectionTransaction, SwapKind, TransactionState};
use crate::EngineLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Inject,
    Uninject,
    Reinject,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inject => "inject",
            Self::Uninject => "uninject",
            Self::Reinject => "reinject",
        }
    }

    fn reverts(self) -> bool {
        matches!(self, Self::Uninject | Self::Reinject)
    }

    fn installs(self) -> bool {
        matches!(self, Self::Inject | Self::Reinject)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub skip_relaunch: bool,
    pub payload: PayloadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Located(Located),
    Healed { container: PathBuf },
    Accommodated(AccommodationOutcome),
    StoppingClient { process_name: String },
    ClientStopped(StoppedSession),
    Relaunched { command: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub operation: Operation,
    pub channel: Channel,
    pub located: Located,
    pub healed: bool,
    pub transactions: Vec<(SwapKind, TransactionState)>,
    pub accommodation: Option<AccommodationOutcome>,
    pub stopped: Option<StoppedSession>,
    pub installed_bundle: Option<PathBuf>,
    pub relaunched: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub located: Located,
    pub state: InstallState,
    pub entries: Vec<String>,
}

pub struct Engine<'a, C: ?Sized> {
    layout: &'a EngineLayout,
    config: &'a EngineConfig,
    platform: PlatformStrategy,
    env: LocateEnv,
    coordinator: &'a C,
}

impl<'a, C> Engine<'a, C>
where
    C: ProcessCoordinator + ?Sized,
{
    pub fn new(
        layout: &'a EngineLayout,
        config: &'a EngineConfig,
        platform: PlatformStrategy,
        env: LocateEnv,
        coordinator: &'a C,
    ) -> Self {
        Self {
            layout,
            config,
            platform,
            env,
            coordinator,
        }
    }

    pub fn locate(&self, channel: Channel, prompt: &mut dyn PathPrompt) -> Result<Located> {
        InstallLocator::new(self.layout, self.platform, &self.env, self.coordinator)
            .locate(channel, prompt)
    }

    pub fn forget(&self, channel: Channel) -> Result<bool> {
        clear_cached_location(self.layout, channel)
    }

    pub fn status(
        &self,
        channel: Channel,
        prompt: &mut dyn PathPrompt,
        list_entries: bool,
    ) -> Result<StatusReport> {
        let located = self.locate(channel, prompt)?;
        let paths = InstallPaths::new(&located.container);
        let state = inspect(&paths)?;
        let entries = if list_entries && matches!(state, InstallState::Vanilla | InstallState::Injected)
        {
            AsarArchive::open(&paths.container)
                .map_err(|source| InjectError::ArchiveCorrupt {
                    path: paths.container.clone(),
                    source,
                })?
                .top_level_entries()
        } else {
            Vec::new()
        };
        Ok(StatusReport {
            located,
            state,
            entries,
        })
    }

    pub fn heal(&self, channel: Channel, prompt: &mut dyn PathPrompt) -> Result<(Located, bool)> {
        let located = self.locate(channel, prompt)?;
        let healed = heal(&InstallPaths::new(&located.container))?;
        Ok((located, healed))
    }

    pub fn run(
        &self,
        operation: Operation,
        channel: Channel,
        options: &RunOptions,
        prompt: &mut dyn PathPrompt,
        observer: &mut dyn FnMut(&EngineEvent),
    ) -> Result<RunReport> {
        let located = self.locate(channel, prompt)?;
        observer(&EngineEvent::Located(located.clone()));
        let paths = InstallPaths::new(&located.container);
        let mut report = RunReport {
            operation,
            channel,
            located,
            healed: false,
            transactions: Vec::new(),
            accommodation: None,
            stopped: None,
            installed_bundle: None,
            relaunched: false,
        };

        let mut revert = None;
        if operation.reverts() {
            let mut tx = InjectionTransaction::new(channel, SwapKind::Revert, paths.clone());
            let validated = tx.validate();
            self.note_heal(&tx, &mut report, observer);
            match validated {
                Ok(_) => revert = Some(tx),
                Err(err) if operation == Operation::Reinject && is_nothing_to_unplug(&err) => {
                    tracing::debug!("not injected yet; reinject skips the revert");
                }
                Err(err) => return Err(err),
            }
        }

        let mut install = None;
        if operation == Operation::Inject {
            let mut tx = InjectionTransaction::new(channel, SwapKind::Install, paths.clone());
            let validated = tx.validate();
            self.note_heal(&tx, &mut report, observer);
            validated?;
            install = Some(tx);
        }

        let payload = if operation.installs() {
            match Payload::resolve(&options.payload) {
                Ok(payload) => Some(payload),
                Err(err) => {
                    for tx in revert.iter_mut().chain(install.iter_mut()) {
                        tx.abort();
                    }
                    return Err(err);
                }
            }
        } else {
            None
        };

        if let Some(payload) = &payload {
            if sandbox::needs_accommodation(&paths.container) {
                let outcome = sandbox::accommodate(
                    self.coordinator,
                    &paths.container,
                    channel,
                    &payload.engine_dir(self.layout),
                );
                observer(&EngineEvent::Accommodated(outcome.clone()));
                report.accommodation = Some(outcome);
            }
        }

        let skip_relaunch = options.skip_relaunch || self.config.inject.skip_relaunch;
        if !skip_relaunch {
            let session = match self.stop_client(channel, observer) {
                Ok(session) => session,
                Err(err) => {
                    for tx in revert.iter_mut().chain(install.iter_mut()) {
                        tx.abort();
                    }
                    return Err(err);
                }
            };
            for tx in revert.iter_mut().chain(install.iter_mut()) {
                tx.mark_stopped()?;
            }
            report.stopped = Some(session);
        }

        let swapped = self.swap(
            revert,
            install,
            payload.as_ref(),
            channel,
            &paths,
            &mut report,
        );

        if let Some(session) = &report.stopped {
            if inspect(&paths).is_ok_and(|state| state != InstallState::Broken) {
                report.relaunched = self.relaunch_client(channel, &paths, session, observer);
            } else {
                tracing::warn!("installation left broken; not relaunching the client");
            }
        }

        swapped?;
        Ok(report)
    }

    fn swap(
        &self,
        revert: Option<InjectionTransaction>,
        install: Option<InjectionTransaction>,
        payload: Option<&Payload>,
        channel: Channel,
        paths: &InstallPaths,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(mut tx) = revert {
            let reverted = tx.revert();
            report.transactions.push((SwapKind::Revert, tx.state()));
            reverted?;
        }

        let Some(payload) = payload else {
            return Ok(());
        };
        let mut tx = match install {
            Some(tx) => tx,
            None => {
                let mut tx = InjectionTransaction::new(channel, SwapKind::Install, paths.clone());
                if let Err(err) = tx.validate() {
                    report.transactions.push((SwapKind::Install, tx.state()));
                    return Err(err);
                }
                tx
            }
        };
        let installed = tx.install(&payload.loader_target(self.layout));
        report.transactions.push((SwapKind::Install, tx.state()));
        installed?;

        if let Payload::Bundled { source } = payload {
            report.installed_bundle = Some(install_bundle(self.layout, source)?);
        }
        Ok(())
    }

    fn stop_client(
        &self,
        channel: Channel,
        observer: &mut dyn FnMut(&EngineEvent),
    ) -> Result<StoppedSession> {
        let name = process_name(self.platform, channel);
        observer(&EngineEvent::StoppingClient {
            process_name: name.to_string(),
        });
        let session = stop_running(self.coordinator, name, &self.config.terminate_policy())?;
        observer(&EngineEvent::ClientStopped(session.clone()));
        Ok(session)
    }

    fn relaunch_client(
        &self,
        channel: Channel,
        paths: &InstallPaths,
        session: &StoppedSession,
        observer: &mut dyn FnMut(&EngineEvent),
    ) -> bool {
        if !session.had_running_instances() {
            return false;
        }
        let launched = relaunch_command(
            self.platform,
            channel,
            &paths.container,
            self.env.local_app_data.as_deref(),
        )
        .and_then(|command| {
            relaunch(self.coordinator, session, &command).map(|launched| (command, launched))
        });
        match launched {
            Ok((command, launched)) => {
                if launched {
                    observer(&EngineEvent::Relaunched {
                        command: command.to_string(),
                    });
                }
                launched
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not relaunch the client");
                false
            }
        }
    }

    fn note_heal(
        &self,
        tx: &InjectionTransaction,
        report: &mut RunReport,
        observer: &mut dyn FnMut(&EngineEvent),
    ) {
        if tx.healed() && !report.healed {
            report.healed = true;
            observer(&EngineEvent::Healed {
                container: tx.paths().container.clone(),
            });
        }
    }
}

fn is_nothing_to_unplug(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<InjectError>(),
        Some(InjectError::NothingToUnplug { .. })
    )
}
