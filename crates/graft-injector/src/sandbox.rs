use std::path::Path;

use graft_core::Channel;

use crate::process::{LaunchCommand, ProcessCoordinator};

const SANDBOX_MARKER: &str = "flatpak";
const SYSTEM_INSTALL_PREFIX: &str = "/var";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccommodationOutcome {
    pub command: String,
    pub succeeded: bool,
}

pub fn needs_accommodation(container: &Path) -> bool {
    container.to_string_lossy().contains(SANDBOX_MARKER)
}

pub fn accommodation_command(
    container: &Path,
    channel: Channel,
    engine_dir: &Path,
) -> LaunchCommand {
    let filesystem = format!("--filesystem={}", engine_dir.display());
    if container.starts_with(SYSTEM_INSTALL_PREFIX) {
        LaunchCommand::new("sudo")
            .arg("flatpak")
            .arg("override")
            .arg(channel.flatpak_app_id())
            .arg(filesystem)
    } else {
        LaunchCommand::new("flatpak")
            .arg("override")
            .arg("--user")
            .arg(channel.flatpak_app_id())
            .arg(filesystem)
    }
}

pub fn accommodate<C>(
    coordinator: &C,
    container: &Path,
    channel: Channel,
    engine_dir: &Path,
) -> AccommodationOutcome
where
    C: ProcessCoordinator + ?Sized,
{
    let command = accommodation_command(container, channel, engine_dir);
    let succeeded = match coordinator.run_to_completion(&command) {
        Ok(()) => {
            tracing::info!(command = %command, "granted sandbox access to payload");
            true
        }
        Err(err) => {
            tracing::warn!(
                command = %command,
                error = %format!("{err:#}"),
                "sandbox override failed; run the command manually"
            );
            false
        }
    };
    AccommodationOutcome {
        command: command.to_string(),
        succeeded,
    }
}
