use std::fs;
use std::io;
use std::path::Path;

use anyhow::{anyhow, Result};
use graft_core::asar::{self, AsarError};
use graft_core::{Channel, InjectError, InstallState};

use crate::fs_utils::{remove_dir_if_exists, remove_file_if_exists, swap_error};
use crate::inspect::{heal, inspect, InstallPaths, ORIGINAL_DIR_NAME};
use crate::payload::write_loader_files;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Validating,
    Stopped,
    Swapping,
    Committed,
    Failed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Stopped => "stopped",
            Self::Swapping => "swapping",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed | Self::RolledBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    Install,
    Revert,
}

impl SwapKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Revert => "revert",
        }
    }
}

#[derive(Debug)]
pub struct InjectionTransaction {
    channel: Channel,
    kind: SwapKind,
    paths: InstallPaths,
    state: TransactionState,
    history: Vec<TransactionState>,
    healed: bool,
}

impl InjectionTransaction {
    pub fn new(channel: Channel, kind: SwapKind, paths: InstallPaths) -> Self {
        Self {
            channel,
            kind,
            paths,
            state: TransactionState::Idle,
            history: vec![TransactionState::Idle],
            healed: false,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn history(&self) -> &[TransactionState] {
        &self.history
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    pub fn healed(&self) -> bool {
        self.healed
    }

    fn transition(&mut self, next: TransactionState) {
        tracing::debug!(
            kind = self.kind.as_str(),
            from = self.state.as_str(),
            to = next.as_str(),
            "transaction state"
        );
        self.state = next;
        self.history.push(next);
    }

    pub fn validate(&mut self) -> Result<InstallState> {
        self.expect_state(&[TransactionState::Idle], "validate")?;
        self.transition(TransactionState::Validating);
        let outcome = self.check_precondition();
        if outcome.is_err() {
            self.transition(TransactionState::Failed);
        }
        outcome
    }

    fn check_precondition(&mut self) -> Result<InstallState> {
        let mut state = inspect(&self.paths)?;
        if state == InstallState::Broken {
            tracing::warn!(
                container = %self.paths.container.display(),
                "previous run was interrupted; healing before continuing"
            );
            heal(&self.paths)?;
            self.healed = true;
            state = inspect(&self.paths)?;
        }

        let container = self.paths.container.clone();
        match (self.kind, state) {
            (SwapKind::Install, InstallState::Vanilla)
            | (SwapKind::Revert, InstallState::Injected) => Ok(state),
            (SwapKind::Install, InstallState::Injected) => Err(InjectError::AlreadyInjected {
                channel: self.channel,
                path: container,
            }
            .into()),
            (SwapKind::Install, InstallState::NotInstalled) => {
                Err(InjectError::InstallationNotFound {
                    channel: self.channel,
                    detail: Some(format!("{} does not exist", container.display())),
                }
                .into())
            }
            (SwapKind::Revert, InstallState::Vanilla | InstallState::NotInstalled) => {
                Err(InjectError::NothingToUnplug {
                    channel: self.channel,
                    path: container,
                }
                .into())
            }
            (_, InstallState::Broken) => Err(anyhow!(
                "{} is still broken after healing",
                container.display()
            )),
        }
    }

    pub fn mark_stopped(&mut self) -> Result<()> {
        self.expect_state(&[TransactionState::Validating], "stop")?;
        self.transition(TransactionState::Stopped);
        Ok(())
    }

    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.transition(TransactionState::Failed);
        }
    }

    pub fn install(&mut self, loader_target: &Path) -> Result<()> {
        self.begin_swap(SwapKind::Install)?;
        let result = install_steps(&self.paths, loader_target);
        self.finish_swap(result)
    }

    pub fn revert(&mut self) -> Result<()> {
        self.begin_swap(SwapKind::Revert)?;
        let result = revert_steps(&self.paths);
        self.finish_swap(result)
    }

    fn begin_swap(&mut self, kind: SwapKind) -> Result<()> {
        if self.kind != kind {
            return Err(anyhow!(
                "cannot {} with a {} transaction",
                kind.as_str(),
                self.kind.as_str()
            ));
        }
        self.expect_state(
            &[TransactionState::Validating, TransactionState::Stopped],
            kind.as_str(),
        )?;
        self.transition(TransactionState::Swapping);
        Ok(())
    }

    fn finish_swap(&mut self, result: Result<()>) -> Result<()> {
        let err = match result {
            Ok(()) => {
                self.transition(TransactionState::Committed);
                tracing::info!(
                    kind = self.kind.as_str(),
                    container = %self.paths.container.display(),
                    "transaction committed"
                );
                return Ok(());
            }
            Err(err) => err,
        };

        let vanished = matches!(
            err.downcast_ref::<InjectError>(),
            Some(InjectError::TargetNotFound { .. })
        );
        if vanished {
            self.transition(TransactionState::Failed);
            tracing::warn!("a target vanished mid-swap; the next run will heal");
            return Err(err);
        }

        match heal(&self.paths) {
            Ok(_) => {
                self.transition(TransactionState::RolledBack);
                tracing::warn!(kind = self.kind.as_str(), "transaction rolled back");
                Err(err.context(format!("{} rolled back", self.kind.as_str())))
            }
            Err(heal_err) => {
                self.transition(TransactionState::Failed);
                tracing::error!(
                    error = %format!("{heal_err:#}"),
                    "rollback failed; installation left broken"
                );
                Err(err.context(format!(
                    "{} failed and rollback failed: {heal_err:#}",
                    self.kind.as_str()
                )))
            }
        }
    }

    fn expect_state(&self, allowed: &[TransactionState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(anyhow!(
            "cannot {action} while transaction is {}",
            self.state.as_str()
        ))
    }
}

fn install_steps(paths: &InstallPaths, loader_target: &Path) -> Result<()> {
    tracing::info!(backup = %paths.backup.display(), "moving vanilla container aside");
    fs::rename(&paths.container, &paths.backup)
        .map_err(|err| swap_error("rename", &paths.container, err))?;

    let original = paths.staging.join(ORIGINAL_DIR_NAME);
    asar::AsarArchive::open(&paths.backup)
        .and_then(|archive| {
            archive.extract_all_with_unpacked(&original, &asar::unpacked_dir(&paths.container))
        })
        .map_err(|err| archive_error("extract", &paths.backup, err))?;

    write_loader_files(&paths.staging, loader_target)?;

    tracing::info!(container = %paths.container.display(), "packing injected container");
    asar::create_package(&paths.staging, &paths.container)
        .map_err(|err| archive_error("pack", &paths.container, err))?;

    remove_file_if_exists(&paths.backup)
        .map_err(|err| swap_error("delete", &paths.backup, err))?;
    discard_staging(paths);
    Ok(())
}

fn revert_steps(paths: &InstallPaths) -> Result<()> {
    asar::extract_all(&paths.container, &paths.staging)
        .map_err(|err| archive_error("extract", &paths.container, err))?;

    let original = paths.staging.join(ORIGINAL_DIR_NAME);
    if !original.is_dir() {
        return Err(InjectError::ArchiveCorrupt {
            path: paths.container.clone(),
            source: AsarError::Malformed(format!("missing {ORIGINAL_DIR_NAME} directory")),
        }
        .into());
    }

    tracing::info!(container = %paths.container.display(), "restoring original container");
    asar::create_package(&original, &paths.container)
        .map_err(|err| archive_error("pack", &paths.container, err))?;

    discard_staging(paths);
    Ok(())
}

// A leftover staging dir only marks the install Broken; healing it never
// touches the swapped container.
pub(crate) fn discard_staging(paths: &InstallPaths) -> bool {
    match remove_dir_if_exists(&paths.staging) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                staging = %paths.staging.display(),
                error = %err,
                "swap finished but staging could not be removed"
            );
            false
        }
    }
}

fn archive_error(action: &'static str, path: &Path, err: AsarError) -> anyhow::Error {
    match err {
        AsarError::Io(io_err)
            if matches!(
                io_err.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound
            ) =>
        {
            swap_error(action, path, io_err)
        }
        AsarError::Io(io_err) => {
            anyhow::Error::new(io_err).context(format!("failed to {action} {}", path.display()))
        }
        err @ (AsarError::Json(_) | AsarError::Malformed(_)) => InjectError::ArchiveCorrupt {
            path: path.to_path_buf(),
            source: err,
        }
        .into(),
    }
}
