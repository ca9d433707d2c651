use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::{AsarError, Channel};

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("unsupported platform '{0}'; supported platforms are windows, macos and linux")]
    PlatformUnsupported(String),

    #[error("unknown release channel '{0}'; expected stable, ptb, canary or development")]
    UnknownChannel(String),

    #[error("could not find a {channel} installation{}", detail_suffix(.detail))]
    InstallationNotFound {
        channel: Channel,
        detail: Option<String>,
    },

    #[error("{channel} is already injected at {}", .path.display())]
    AlreadyInjected { channel: Channel, path: PathBuf },

    #[error("nothing to unplug: {channel} is not injected at {}", .path.display())]
    NothingToUnplug { channel: Channel, path: PathBuf },

    #[error("payload has not been built: {} does not exist", .path.display())]
    NotBuilt { path: PathBuf },

    #[error("archive {} is corrupt", .path.display())]
    ArchiveCorrupt {
        path: PathBuf,
        #[source]
        source: AsarError,
    },

    #[error("permission denied while trying to {action} {}", .path.display())]
    PermissionDenied {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} vanished while trying to {action}", .path.display())]
    TargetNotFound {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to restore {} from the vanilla backup", .path.display())]
    HealFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|value| format!(": {value}"))
        .unwrap_or_default()
}

impl InjectError {
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InstallationNotFound { .. } => {
                Some("make sure the client is installed for this channel, or pick another channel")
            }
            Self::AlreadyInjected { .. } => {
                Some("run `graft uninject` first, or `graft reinject` to replace the current injection")
            }
            Self::NothingToUnplug { .. } => Some("run `graft inject` to inject the client"),
            Self::NotBuilt { .. } => {
                Some("build the payload first, or pass --entry-point with an existing file")
            }
            Self::ArchiveCorrupt { .. } => Some("reinstall the client to get a clean app.asar"),
            Self::PermissionDenied { .. } => {
                Some("close the client and retry, or rerun with elevated privileges")
            }
            Self::TargetNotFound { .. } => {
                Some("rerun the command; the interrupted installation is healed on the next run")
            }
            Self::HealFailed { .. } => {
                Some("rename vanilla.asar back to resources/app.asar by hand, then retry")
            }
            Self::PlatformUnsupported(_) | Self::UnknownChannel(_) => None,
        }
    }
}
