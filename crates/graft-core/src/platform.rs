use crate::InjectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStrategy {
    Windows,
    MacOs,
    Linux,
}

impl PlatformStrategy {
    pub fn current() -> Result<Self, InjectError> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self, InjectError> {
        match os {
            "windows" => Ok(Self::Windows),
            "macos" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            other => Err(InjectError::PlatformUnsupported(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }
}
