use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::InjectError;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Ptb,
    Canary,
    #[serde(alias = "dev")]
    Development,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Stable,
        Channel::Ptb,
        Channel::Canary,
        Channel::Development,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Ptb => "ptb",
            Self::Canary => "canary",
            Self::Development => "development",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "stable" => Some(Self::Stable),
            "ptb" => Some(Self::Ptb),
            "canary" => Some(Self::Canary),
            "dev" | "development" => Some(Self::Development),
            _ => None,
        }
    }

    pub fn windows_name(self) -> &'static str {
        match self {
            Self::Stable => "Discord",
            Self::Ptb => "DiscordPTB",
            Self::Canary => "DiscordCanary",
            Self::Development => "DiscordDevelopment",
        }
    }

    pub fn macos_bundle_name(self) -> &'static str {
        match self {
            Self::Stable => "Discord",
            Self::Ptb => "Discord PTB",
            Self::Canary => "Discord Canary",
            Self::Development => "Discord Development",
        }
    }

    pub fn linux_executable_name(self) -> &'static str {
        self.windows_name()
    }

    pub fn linux_dir_name(self) -> &'static str {
        match self {
            Self::Stable => "discord",
            Self::Ptb => "discord-ptb",
            Self::Canary => "discord-canary",
            Self::Development => "discord-development",
        }
    }

    pub fn linux_alt_dir_name(self) -> &'static str {
        self.windows_name()
    }

    pub fn flatpak_app_id(self) -> &'static str {
        match self {
            Self::Stable => "com.discordapp.Discord",
            Self::Ptb => "com.discordapp.DiscordPTB",
            Self::Canary => "com.discordapp.DiscordCanary",
            Self::Development => "com.discordapp.DiscordDevelopment",
        }
    }

    pub fn linux_process_pattern(self) -> &'static str {
        match self {
            Self::Stable => r"(?i)discord$",
            Self::Ptb => r"(?i)discord-?ptb$",
            Self::Canary => r"(?i)discord-?canary$",
            Self::Development => r"(?i)discord-?development$",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = InjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| InjectError::UnknownChannel(s.to_string()))
    }
}
