use std::io::{self, IsTerminal};
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use graft_core::InstallState;
use graft_injector::{RunReport, StatusReport, TerminateOutcome, TransactionState};
use indicatif::{ProgressBar, ProgressStyle};

use crate::exit_codes::find_inject_error;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub struct TerminalRenderer {
    style: OutputStyle,
}

pub struct StopSpinner {
    progress_bar: Option<ProgressBar>,
}

impl TerminalRenderer {
    pub fn current() -> Self {
        Self {
            style: current_output_style(),
        }
    }

    pub fn style(self) -> OutputStyle {
        self.style
    }

    pub fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub fn start_spinner(self, message: &str) -> StopSpinner {
        if self.style != OutputStyle::Rich {
            return StopSpinner { progress_bar: None };
        }

        let progress_bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
            progress_bar.set_style(style.tick_chars("\\|/- "));
        }
        progress_bar.set_message(message.to_string());
        progress_bar.enable_steady_tick(Duration::from_millis(80));
        StopSpinner {
            progress_bar: Some(progress_bar),
        }
    }
}

impl StopSpinner {
    pub fn finish(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub fn current_output_style() -> OutputStyle {
    let dumb_terminal = std::env::var("TERM").is_ok_and(|term| term == "dumb");
    if io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none() && !dumb_terminal {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" => "[OK]",
        "warn" => "[WARN]",
        "err" => "[ERR]",
        _ => "[..]",
    }
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn hint_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightYellow.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn format_error_lines(err: &anyhow::Error) -> Vec<String> {
    let mut lines = vec![format!("error: {err:#}")];
    if let Some(hint) = find_inject_error(err).and_then(|kind| kind.hint()) {
        lines.push(format!("hint: {hint}"));
    }
    lines
}

pub fn print_error(err: &anyhow::Error) {
    let rich = io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    if !rich {
        for line in format_error_lines(err) {
            eprintln!("{line}");
        }
        return;
    }

    eprintln!("{} {err:#}", colorize(error_style(), "[ERR]"));
    if let Some(hint) = find_inject_error(err).and_then(|kind| kind.hint()) {
        eprintln!("{} {hint}", colorize(hint_style(), "hint:"));
    }
}

fn past_tense(operation: graft_injector::Operation) -> &'static str {
    match operation {
        graft_injector::Operation::Inject => "injected",
        graft_injector::Operation::Uninject => "uninjected",
        graft_injector::Operation::Reinject => "reinjected",
    }
}

pub fn format_run_report_lines(report: &RunReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if report.healed {
        lines.push(render_status_line(
            style,
            "warn",
            "healed an installation left broken by an interrupted run",
        ));
    }
    if let Some(accommodation) = &report.accommodation {
        if accommodation.succeeded {
            lines.push(render_status_line(
                style,
                "ok",
                &format!("granted sandbox access: {}", accommodation.command),
            ));
        } else {
            lines.push(render_status_line(
                style,
                "warn",
                &format!(
                    "sandbox override failed; run it yourself: {}",
                    accommodation.command
                ),
            ));
        }
    }
    if let Some(session) = &report.stopped {
        if session.had_running_instances() {
            lines.push(render_status_line(
                style,
                "ok",
                &format!(
                    "stopped {} {} process(es)",
                    session.stopped.len(),
                    session.process_name
                ),
            ));
        }
        let stuck = session
            .stopped
            .iter()
            .filter(|(_, outcome)| *outcome == TerminateOutcome::TimedOut)
            .count();
        if stuck > 0 {
            lines.push(render_status_line(
                style,
                "warn",
                &format!("{stuck} process(es) did not exit in time"),
            ));
        }
    }

    let committed = report
        .transactions
        .iter()
        .all(|(_, state)| *state == TransactionState::Committed);
    if committed {
        lines.push(render_status_line(
            style,
            "ok",
            &format!(
                "{} {} at {}",
                past_tense(report.operation),
                report.channel,
                report.located.container.display()
            ),
        ));
    }
    if let Some(bundle) = &report.installed_bundle {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("installed payload bundle at {}", bundle.display()),
        ));
    }
    if report.relaunched {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("relaunched {}", report.channel),
        ));
    }
    lines
}

pub fn format_status_lines(report: &StatusReport, style: OutputStyle) -> Vec<String> {
    let status = match report.state {
        InstallState::Vanilla | InstallState::Injected => "ok",
        InstallState::Broken => "warn",
        InstallState::NotInstalled => "err",
    };
    let mut lines = vec![
        render_status_line(style, status, &format!("state: {}", report.state)),
        format!("path: {}", report.located.container.display()),
        format!("found via: {}", report.located.source.as_str()),
    ];
    if report.state == InstallState::Broken {
        lines.push("hint: run `graft heal` to recover the installation".to_string());
    }
    for entry in &report.entries {
        lines.push(format!("  {entry}"));
    }
    lines
}
