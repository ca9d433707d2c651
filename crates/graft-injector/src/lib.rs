mod config;
mod engine;
mod fs_utils;
mod inspect;
mod layout;
mod locate;
mod location_cache;
mod payload;
pub mod process;
pub mod sandbox;
mod transaction;

pub use config::{EngineConfig, InjectConfig, LocateConfig, LogConfig, ProcessConfig};
pub use engine::{Engine, EngineEvent, Operation, RunOptions, RunReport, StatusReport};
pub use fs_utils::{remove_dir_if_exists, remove_file_if_exists};
pub use inspect::{
    heal, inspect, InstallPaths, CONTAINER_NAME, LOADER_ENTRY_NAME, LOADER_MANIFEST_NAME,
    ORIGINAL_DIR_NAME, STAGING_DIR_NAME, VANILLA_BACKUP_NAME,
};
pub use layout::{default_config_root, EngineLayout, CONFIG_DIR_ENV, INSTALLED_BUNDLE_NAME};
pub use locate::{
    find_container_in_dir, linux_search_dirs, newest_version_dir, InstallLocator, LocateEnv,
    LocateSource, Located, NoPrompt, PathPrompt, StdinPrompt,
};
pub use location_cache::{clear_cached_location, read_cached_location, write_cached_location};
pub use payload::{
    install_bundle, render_loader_entry, render_loader_manifest, write_loader_files, Payload,
    PayloadRequest, DEFAULT_BUNDLE_PATH, DEFAULT_DEV_ENTRY_PATH,
};
pub use process::{
    ProcessCoordinator, ProcessEntry, ProcessHandle, StoppedSession, SystemProcesses,
    TerminateOutcome, TerminatePolicy,
};
pub use transaction::{InjectionTransaction, SwapKind, TransactionState};
