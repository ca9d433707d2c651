use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use graft_core::asar::{self, partial_path};
use graft_core::{InjectError, InstallState};

use crate::fs_utils::{remove_dir_if_exists, remove_file_if_exists, swap_error};

pub const CONTAINER_NAME: &str = "app.asar";
pub const VANILLA_BACKUP_NAME: &str = "vanilla.asar";
pub const STAGING_DIR_NAME: &str = "temp";
pub const ORIGINAL_DIR_NAME: &str = "app.orig";
pub const LOADER_ENTRY_NAME: &str = "index.js";
pub const LOADER_MANIFEST_NAME: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub container: PathBuf,
    pub backup: PathBuf,
    pub staging: PathBuf,
    pub partial: PathBuf,
}

impl InstallPaths {
    pub fn new(container: impl Into<PathBuf>) -> Self {
        let container = container.into();
        let parent = container
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            backup: parent.join(VANILLA_BACKUP_NAME),
            staging: parent.join(STAGING_DIR_NAME),
            partial: partial_path(&container),
            container,
        }
    }

    pub fn has_footprint(&self) -> bool {
        self.container.exists() || self.backup.exists()
    }
}

pub fn inspect(paths: &InstallPaths) -> Result<InstallState> {
    let container_exists = paths.container.exists();
    let backup_exists = paths.backup.exists();
    let staging_exists = paths.staging.exists();

    if staging_exists || (backup_exists && !container_exists) {
        return Ok(InstallState::Broken);
    }
    if !container_exists {
        return Ok(InstallState::NotInstalled);
    }

    let archive = asar::AsarArchive::open(&paths.container).map_err(|source| {
        InjectError::ArchiveCorrupt {
            path: paths.container.clone(),
            source,
        }
    })?;
    if archive.has_entry(LOADER_ENTRY_NAME) && archive.has_entry(ORIGINAL_DIR_NAME) {
        Ok(InstallState::Injected)
    } else {
        Ok(InstallState::Vanilla)
    }
}

pub fn heal(paths: &InstallPaths) -> Result<bool> {
    if inspect_footprint(paths) != InstallState::Broken {
        return Ok(false);
    }

    remove_file_if_exists(&paths.partial)
        .map_err(|err| swap_error("remove partial archive", &paths.partial, err))?;
    remove_dir_if_exists(&paths.staging)
        .map_err(|err| swap_error("remove staging directory", &paths.staging, err))?;

    if paths.backup.exists() {
        if fs::symlink_metadata(&paths.container).is_ok() {
            fs::remove_file(&paths.container).map_err(|source| InjectError::HealFailed {
                path: paths.container.clone(),
                source,
            })?;
        }
        fs::rename(&paths.backup, &paths.container).map_err(|source| {
            InjectError::HealFailed {
                path: paths.container.clone(),
                source,
            }
        })?;
    }

    tracing::info!(container = %paths.container.display(), "healed interrupted installation");
    Ok(true)
}

// Checked without opening the archive so a half-written container cannot
// block healing.
fn inspect_footprint(paths: &InstallPaths) -> InstallState {
    let container_exists = paths.container.exists();
    if paths.staging.exists() || (paths.backup.exists() && !container_exists) {
        InstallState::Broken
    } else if container_exists {
        InstallState::Vanilla
    } else {
        InstallState::NotInstalled
    }
}
