use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "GRAFT_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

pub fn filter_directive(
    graft_log: Option<String>,
    rust_log: Option<String>,
    verbosity: u8,
    config_level: Option<&str>,
) -> String {
    let from_env = [graft_log, rust_log]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty());
    if let Some(directive) = from_env {
        return directive;
    }

    match verbosity {
        0 => config_level
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .unwrap_or(DEFAULT_DIRECTIVE)
            .to_string(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

pub fn init_logging(verbosity: u8, config_level: Option<&str>) {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
        verbosity,
        config_level,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("graft: ignoring invalid log filter '{directive}': {err}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .without_time()
        .try_init();
}
