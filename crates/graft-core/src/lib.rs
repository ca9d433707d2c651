pub mod asar;
mod channel;
mod error;
mod platform;
mod state;

pub use asar::{AsarArchive, AsarError, AsarFile, AsarNode};
pub use channel::Channel;
pub use error::InjectError;
pub use platform::PlatformStrategy;
pub use state::InstallState;

#[cfg(test)]
mod tests;
