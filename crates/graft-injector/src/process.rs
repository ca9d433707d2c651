use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use graft_core::{Channel, PlatformStrategy};

use crate::sandbox;

// Linux truncates `comm` to this many bytes.
const LINUX_COMM_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub pid: u32,
    pub ppid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
}

impl ProcessEntry {
    pub fn executable(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    pub fn handle(&self) -> ProcessHandle {
        ProcessHandle {
            pid: self.pid,
            ppid: self.ppid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quote = |raw: &OsString| {
            let value = raw.to_string_lossy();
            if value.contains(' ') {
                format!("\"{value}\"")
            } else {
                value.into_owned()
            }
        };
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

pub trait ProcessCoordinator {
    fn list_processes(&self) -> Result<Vec<ProcessEntry>>;

    fn find_running(&self, process_name: &str) -> Result<Vec<ProcessHandle>>;

    fn is_alive(&self, pid: u32) -> bool;

    fn signal_terminate(&self, pid: u32) -> Result<()>;

    fn launch_detached(&self, command: &LaunchCommand) -> Result<()>;

    fn run_to_completion(&self, command: &LaunchCommand) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminatePolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for TerminatePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Exited,
    TimedOut,
    AlreadyGone,
}

// Never fails and never waits longer than `policy.timeout`.
pub fn terminate<C>(coordinator: &C, pid: u32, policy: &TerminatePolicy) -> TerminateOutcome
where
    C: ProcessCoordinator + ?Sized,
{
    if !coordinator.is_alive(pid) {
        return TerminateOutcome::AlreadyGone;
    }
    if let Err(err) = coordinator.signal_terminate(pid) {
        if !coordinator.is_alive(pid) {
            return TerminateOutcome::AlreadyGone;
        }
        tracing::warn!(pid, error = %format!("{err:#}"), "failed to signal process");
    }

    let started = Instant::now();
    loop {
        if !coordinator.is_alive(pid) {
            tracing::debug!(pid, elapsed_ms = started.elapsed().as_millis() as u64, "process exited");
            return TerminateOutcome::Exited;
        }
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            tracing::warn!(
                pid,
                timeout_ms = policy.timeout.as_millis() as u64,
                "process did not exit in time; continuing"
            );
            return TerminateOutcome::TimedOut;
        }
        thread::sleep(policy.poll_interval.min(policy.timeout - elapsed));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedSession {
    pub process_name: String,
    pub stopped: Vec<(ProcessHandle, TerminateOutcome)>,
}

impl StoppedSession {
    pub fn had_running_instances(&self) -> bool {
        !self.stopped.is_empty()
    }
}

pub fn stop_running<C>(
    coordinator: &C,
    process_name: &str,
    policy: &TerminatePolicy,
) -> Result<StoppedSession>
where
    C: ProcessCoordinator + ?Sized,
{
    let running = coordinator
        .find_running(process_name)
        .with_context(|| format!("failed to look up running '{process_name}' processes"))?;
    let mut stopped = Vec::new();
    for handle in root_handles(&running) {
        tracing::info!(pid = handle.pid, process = process_name, "stopping client");
        stopped.push((handle, terminate(coordinator, handle.pid, policy)));
    }
    Ok(StoppedSession {
        process_name: process_name.to_string(),
        stopped,
    })
}

pub fn relaunch<C>(
    coordinator: &C,
    session: &StoppedSession,
    command: &LaunchCommand,
) -> Result<bool>
where
    C: ProcessCoordinator + ?Sized,
{
    if !session.had_running_instances() {
        return Ok(false);
    }
    coordinator
        .launch_detached(command)
        .with_context(|| format!("failed to relaunch client with `{command}`"))?;
    tracing::info!(command = %command, "relaunched client");
    Ok(true)
}

pub(crate) fn root_handles(handles: &[ProcessHandle]) -> Vec<ProcessHandle> {
    let pids = handles.iter().map(|handle| handle.pid).collect::<HashSet<_>>();
    let roots = handles
        .iter()
        .copied()
        .filter(|handle| !pids.contains(&handle.ppid))
        .collect::<Vec<_>>();
    if roots.is_empty() {
        handles.to_vec()
    } else {
        roots
    }
}

pub fn process_name(platform: PlatformStrategy, channel: Channel) -> &'static str {
    match platform {
        PlatformStrategy::Windows => channel.windows_name(),
        PlatformStrategy::MacOs => channel.macos_bundle_name(),
        PlatformStrategy::Linux => channel.linux_executable_name(),
    }
}

pub fn relaunch_command(
    platform: PlatformStrategy,
    channel: Channel,
    container: &Path,
    local_app_data: Option<&Path>,
) -> Result<LaunchCommand> {
    match platform {
        PlatformStrategy::Windows => {
            let base = local_app_data
                .ok_or_else(|| anyhow!("LOCALAPPDATA is not set; cannot relaunch the client"))?;
            let name = channel.windows_name();
            Ok(LaunchCommand::new(base.join(name).join("Update.exe"))
                .arg("--processStart")
                .arg(format!("{name}.exe")))
        }
        PlatformStrategy::MacOs => Ok(LaunchCommand::new("open")
            .arg("-a")
            .arg(channel.macos_bundle_name())),
        PlatformStrategy::Linux => {
            if sandbox::needs_accommodation(container) {
                return Ok(LaunchCommand::new("flatpak")
                    .arg("run")
                    .arg(channel.flatpak_app_id()));
            }
            let install_dir = container
                .parent()
                .and_then(Path::parent)
                .ok_or_else(|| {
                    anyhow!(
                        "cannot derive the client executable from {}",
                        container.display()
                    )
                })?;
            Ok(LaunchCommand::new(
                install_dir.join(channel.linux_executable_name()),
            ))
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemProcesses {
    platform: PlatformStrategy,
    own_pid: u32,
}

impl SystemProcesses {
    pub fn new(platform: PlatformStrategy) -> Self {
        Self {
            platform,
            own_pid: std::process::id(),
        }
    }

    fn posix_listing(&self, column: &str) -> Result<Vec<ProcessEntry>> {
        let output = capture_stdout(
            Command::new("ps").arg("-eo").arg(format!("pid=,ppid=,{column}=")),
            "failed to list processes with ps",
        )?;
        Ok(parse_posix_listing(&output))
    }

    fn windows_listing(&self, filter: Option<&str>) -> Result<Vec<ProcessEntry>> {
        let filter = filter
            .map(|image| format!(" -Filter \"Name = '{}'\"", image.replace('\'', "''")))
            .unwrap_or_default();
        let script = format!(
            "Get-CimInstance Win32_Process{filter} | ForEach-Object {{ '{{0}},{{1}},{{2}}' -f $_.ProcessId, $_.ParentProcessId, $_.Name }}"
        );
        let output = capture_stdout(
            Command::new("powershell")
                .arg("-NoProfile")
                .arg("-NonInteractive")
                .arg("-Command")
                .arg(script),
            "failed to query processes with powershell",
        )?;
        Ok(parse_windows_listing(&output))
    }
}

impl ProcessCoordinator for SystemProcesses {
    fn list_processes(&self) -> Result<Vec<ProcessEntry>> {
        match self.platform {
            PlatformStrategy::Windows => self.windows_listing(None),
            PlatformStrategy::MacOs | PlatformStrategy::Linux => self.posix_listing("args"),
        }
    }

    fn find_running(&self, process_name: &str) -> Result<Vec<ProcessHandle>> {
        let entries = match self.platform {
            PlatformStrategy::Windows => {
                self.windows_listing(Some(&format!("{process_name}.exe")))?
            }
            PlatformStrategy::MacOs | PlatformStrategy::Linux => self
                .posix_listing("comm")?
                .into_iter()
                .filter(|entry| comm_matches(&entry.command, process_name))
                .collect(),
        };
        Ok(entries
            .iter()
            .filter(|entry| entry.pid != self.own_pid)
            .map(ProcessEntry::handle)
            .collect())
    }

    fn is_alive(&self, pid: u32) -> bool {
        is_pid_alive(pid)
    }

    fn signal_terminate(&self, pid: u32) -> Result<()> {
        send_terminate(pid)
    }

    fn launch_detached(&self, command: &LaunchCommand) -> Result<()> {
        let mut child = command.to_command();
        child
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut child);
        child
            .spawn()
            .with_context(|| format!("failed to start `{command}`"))?;
        Ok(())
    }

    fn run_to_completion(&self, command: &LaunchCommand) -> Result<()> {
        let context_message = format!("`{command}` failed");
        run_command(&mut command.to_command(), &context_message)
    }
}

pub(crate) fn parse_posix_listing(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            let rest = rest.trim_start();
            let (ppid, command) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Some(ProcessEntry {
                pid: pid.parse().ok()?,
                ppid: ppid.parse().ok()?,
                command: command.trim().to_string(),
            })
        })
        .collect()
}

pub(crate) fn parse_windows_listing(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().splitn(3, ',');
            let pid = fields.next()?.trim().parse().ok()?;
            let ppid = fields.next()?.trim().parse().ok()?;
            let command = fields.next().unwrap_or("").trim().to_string();
            Some(ProcessEntry { pid, ppid, command })
        })
        .collect()
}

pub(crate) fn comm_matches(comm: &str, process_name: &str) -> bool {
    let base = comm.rsplit('/').next().unwrap_or(comm);
    if base == process_name {
        return true;
    }
    process_name.len() > LINUX_COMM_LEN
        && process_name.is_char_boundary(LINUX_COMM_LEN)
        && base == &process_name[..LINUX_COMM_LEN]
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

fn capture_stdout(command: &mut Command, context_message: &str) -> Result<String> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if !output.status.success() {
        return Err(anyhow!(
            "{context_message}: status={} stderr='{}'",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(unix)]
fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
fn is_pid_alive(pid: u32) -> bool {
    let filter = format!("PID eq {pid}");
    capture_stdout(
        Command::new("tasklist")
            .arg("/FI")
            .arg(filter)
            .arg("/NH")
            .arg("/FO")
            .arg("CSV"),
        "failed to query process liveness with tasklist",
    )
    .map(|output| output.contains(&format!("\"{pid}\"")))
    .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
fn is_pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_terminate(pid: u32) -> Result<()> {
    let raw = libc::pid_t::try_from(pid).map_err(|_| anyhow!("pid {pid} is out of range"))?;
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result == 0 {
        return Ok(());
    }
    Err(std::io::Error::last_os_error()).with_context(|| format!("failed to send SIGTERM to {pid}"))
}

#[cfg(windows)]
fn send_terminate(pid: u32) -> Result<()> {
    run_command(
        Command::new("taskkill")
            .arg("/PID")
            .arg(pid.to_string())
            .arg("/F"),
        &format!("failed to terminate process {pid}"),
    )
}

#[cfg(not(any(unix, windows)))]
fn send_terminate(pid: u32) -> Result<()> {
    Err(anyhow!("cannot signal process {pid} on this platform"))
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    command.process_group(0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}
