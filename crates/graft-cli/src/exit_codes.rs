use graft_core::InjectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GraftExit {
    Failure = 1,
    PlatformUnsupported = 10,
    InstallationNotFound = 11,
    AlreadyInjected = 12,
    NothingToUnplug = 13,
    NotBuilt = 14,
    ArchiveCorrupt = 15,
    PermissionDenied = 16,
    TargetNotFound = 17,
    HealFailed = 18,
}

impl GraftExit {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_error(err: &anyhow::Error) -> Self {
        match find_inject_error(err) {
            Some(kind) => Self::from_kind(kind),
            None => Self::Failure,
        }
    }

    pub fn from_kind(kind: &InjectError) -> Self {
        match kind {
            InjectError::PlatformUnsupported(_) => Self::PlatformUnsupported,
            InjectError::InstallationNotFound { .. } => Self::InstallationNotFound,
            InjectError::AlreadyInjected { .. } => Self::AlreadyInjected,
            InjectError::NothingToUnplug { .. } => Self::NothingToUnplug,
            InjectError::NotBuilt { .. } => Self::NotBuilt,
            InjectError::ArchiveCorrupt { .. } => Self::ArchiveCorrupt,
            InjectError::PermissionDenied { .. } => Self::PermissionDenied,
            InjectError::TargetNotFound { .. } => Self::TargetNotFound,
            InjectError::HealFailed { .. } => Self::HealFailed,
            InjectError::UnknownChannel(_) => Self::Failure,
        }
    }
}

pub fn find_inject_error(err: &anyhow::Error) -> Option<&InjectError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<InjectError>())
}
