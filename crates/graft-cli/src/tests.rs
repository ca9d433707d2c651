use super::*;

use std::io;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::Parser;
use graft_core::{AsarError, InjectError, InstallState};
use graft_injector::{
    LocateSource, Located, Operation, ProcessHandle, RunReport, StatusReport, StoppedSession,
    SwapKind, TerminateOutcome, TransactionState,
};

use crate::dispatch::write_completions_script;
use crate::exit_codes::GraftExit;
use crate::logging::filter_directive;
use crate::render::{
    format_error_lines, format_run_report_lines, format_status_lines, render_status_line,
    OutputStyle,
};

fn sample_report() -> RunReport {
    RunReport {
        operation: Operation::Inject,
        channel: Channel::Canary,
        located: Located {
            container: PathBuf::from("/opt/discord-canary/resources/app.asar"),
            source: LocateSource::WellKnownPath,
        },
        healed: false,
        transactions: vec![(SwapKind::Install, TransactionState::Committed)],
        accommodation: None,
        stopped: Some(StoppedSession {
            process_name: "DiscordCanary".to_string(),
            stopped: vec![
                (ProcessHandle { pid: 10, ppid: 1 }, TerminateOutcome::Exited),
                (ProcessHandle { pid: 20, ppid: 1 }, TerminateOutcome::TimedOut),
            ],
        }),
        installed_bundle: None,
        relaunched: true,
    }
}

#[test]
fn cli_parses_swap_flags() {
    let cli = Cli::try_parse_from([
        "graft",
        "inject",
        "canary",
        "--no-relaunch",
        "--entry-point",
        "dist/main.js",
        "--no-exit-codes",
    ])
    .expect("must parse");

    let Commands::Inject(args) = &cli.command else {
        panic!("expected inject");
    };
    assert_eq!(args.channel, Some(Channel::Canary));
    assert!(args.no_relaunch);
    assert!(!args.production);
    assert_eq!(args.entry_point, Some(PathBuf::from("dist/main.js")));
    assert!(cli.command.suppresses_exit_codes());
}

#[test]
fn cli_accepts_channel_aliases_and_global_flags() {
    let cli = Cli::try_parse_from(["graft", "uninject", "dev", "-vv", "--config-dir", "/tmp/g"])
        .expect("must parse");
    assert_eq!(cli.verbosity, 2);
    assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/g")));
    let Commands::Uninject(args) = cli.command else {
        panic!("expected uninject");
    };
    assert_eq!(args.channel, Some(Channel::Development));
}

#[test]
fn cli_rejects_unknown_channel_and_conflicting_payload_flags() {
    assert!(Cli::try_parse_from(["graft", "inject", "nightly"]).is_err());
    assert!(Cli::try_parse_from([
        "graft",
        "inject",
        "--production",
        "--entry-point",
        "dist/main.js"
    ])
    .is_err());
    assert!(Cli::try_parse_from(["graft", "inject", "--bundle", "dist/graft.asar"]).is_err());
    assert!(Cli::try_parse_from([
        "graft",
        "reinject",
        "--production",
        "--bundle",
        "dist/graft.asar"
    ])
    .is_ok());
}

#[test]
fn cli_status_flags_parse() {
    let cli = Cli::try_parse_from(["graft", "status", "ptb", "--verbose", "--forget"])
        .expect("must parse");
    let Commands::Status {
        channel,
        verbose,
        forget,
    } = cli.command
    else {
        panic!("expected status");
    };
    assert_eq!(channel, Some(Channel::Ptb));
    assert!(verbose);
    assert!(forget);
}

#[test]
fn exit_codes_follow_failure_kind() {
    let already = anyhow::Error::new(InjectError::AlreadyInjected {
        channel: Channel::Stable,
        path: PathBuf::from("/opt/discord/resources/app.asar"),
    })
    .context("inject failed");
    assert_eq!(GraftExit::from_error(&already).code(), 12);

    let corrupt = anyhow::Error::new(InjectError::ArchiveCorrupt {
        path: PathBuf::from("app.asar"),
        source: AsarError::Malformed("truncated header".to_string()),
    });
    assert_eq!(GraftExit::from_error(&corrupt), GraftExit::ArchiveCorrupt);

    let denied = anyhow::Error::new(InjectError::PermissionDenied {
        action: "rename",
        path: PathBuf::from("app.asar"),
        source: io::Error::from(io::ErrorKind::PermissionDenied),
    });
    assert_eq!(GraftExit::from_error(&denied).code(), 16);

    let heal = anyhow::Error::new(InjectError::HealFailed {
        path: PathBuf::from("app.asar"),
        source: io::Error::from(io::ErrorKind::Other),
    });
    assert_eq!(GraftExit::from_error(&heal).code(), 18);

    assert_eq!(GraftExit::from_error(&anyhow!("disk full")).code(), 1);
    assert_eq!(
        GraftExit::from_kind(&InjectError::PlatformUnsupported("freebsd".to_string())).code(),
        10
    );
}

#[test]
fn error_lines_carry_kind_hint() {
    let err = anyhow::Error::new(InjectError::NothingToUnplug {
        channel: Channel::Stable,
        path: PathBuf::from("/opt/discord/resources/app.asar"),
    });
    let lines = format_error_lines(&err);
    assert_eq!(
        lines[0],
        "error: nothing to unplug: stable is not injected at /opt/discord/resources/app.asar"
    );
    assert_eq!(lines[1], "hint: run `graft inject` to inject the client");

    assert_eq!(format_error_lines(&anyhow!("boom")), vec!["error: boom"]);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "injected stable"),
        "injected stable"
    );
}

#[test]
fn render_status_line_rich_includes_ascii_badge() {
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "injected stable"),
        "[OK] injected stable"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "sandbox override failed"),
        "[WARN] sandbox override failed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "err", "broken"),
        "[ERR] broken"
    );
}

#[test]
fn run_report_lines_summarize_the_operation() {
    let lines = format_run_report_lines(&sample_report(), OutputStyle::Rich);
    assert_eq!(
        lines,
        vec![
            "[OK] stopped 2 DiscordCanary process(es)",
            "[WARN] 1 process(es) did not exit in time",
            "[OK] injected canary at /opt/discord-canary/resources/app.asar",
            "[OK] relaunched canary",
        ]
    );
}

#[test]
fn run_report_lines_mention_healing_and_sandbox() {
    let mut report = sample_report();
    report.healed = true;
    report.stopped = None;
    report.relaunched = false;
    report.accommodation = Some(graft_injector::sandbox::AccommodationOutcome {
        command: "flatpak override --user com.discordapp.DiscordCanary --filesystem=/cfg"
            .to_string(),
        succeeded: false,
    });

    let lines = format_run_report_lines(&report, OutputStyle::Plain);
    assert_eq!(
        lines[0],
        "healed an installation left broken by an interrupted run"
    );
    assert!(lines[1].starts_with("sandbox override failed; run it yourself: flatpak override"));
    assert_eq!(lines.len(), 3);
}

#[test]
fn status_lines_show_state_path_and_entries() {
    let report = StatusReport {
        located: Located {
            container: PathBuf::from("/opt/discord/resources/app.asar"),
            source: LocateSource::Cache,
        },
        state: InstallState::Injected,
        entries: vec!["app.orig".to_string(), "index.js".to_string()],
    };
    assert_eq!(
        format_status_lines(&report, OutputStyle::Plain),
        vec![
            "state: injected",
            "path: /opt/discord/resources/app.asar",
            "found via: cache",
            "  app.orig",
            "  index.js",
        ]
    );

    let broken = StatusReport {
        state: InstallState::Broken,
        entries: Vec::new(),
        ..report
    };
    let lines = format_status_lines(&broken, OutputStyle::Rich);
    assert_eq!(lines[0], "[WARN] state: broken");
    assert!(lines[3].contains("graft heal"));
}

#[test]
fn log_filter_prefers_env_then_flags_then_config() {
    assert_eq!(
        filter_directive(Some("graft_injector=trace".into()), Some("info".into()), 2, Some("debug")),
        "graft_injector=trace"
    );
    assert_eq!(
        filter_directive(Some("  ".into()), Some("info".into()), 0, None),
        "info"
    );
    assert_eq!(filter_directive(None, None, 1, Some("error")), "info");
    assert_eq!(filter_directive(None, None, 3, None), "trace");
    assert_eq!(filter_directive(None, None, 0, Some("debug")), "debug");
    assert_eq!(filter_directive(None, None, 0, None), "warn");
}

#[test]
fn completions_script_names_the_binary() {
    let mut out = Vec::new();
    write_completions_script(clap_complete::Shell::Bash, &mut out).expect("must generate");
    let script = String::from_utf8(out).expect("utf8");
    assert!(script.contains("graft"));
    assert!(script.contains("reinject"));
}
