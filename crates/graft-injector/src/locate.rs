use std::cmp::Ordering;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use graft_core::{Channel, InjectError, PlatformStrategy};
use regex::Regex;

use crate::config::EngineConfig;
use crate::inspect::{InstallPaths, CONTAINER_NAME, VANILLA_BACKUP_NAME};
use crate::location_cache::{read_cached_location, write_cached_location};
use crate::process::ProcessCoordinator;
use crate::EngineLayout;

const RENDERER_MARKER: &str = "--type=renderer";
const VERSION_DIR_PREFIX: &str = "app-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateSource {
    Cache,
    VersionedFolder,
    StaticTable,
    RunningProcess,
    WellKnownPath,
    Prompt,
}

impl LocateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::VersionedFolder => "versioned-folder",
            Self::StaticTable => "static-table",
            Self::RunningProcess => "running-process",
            Self::WellKnownPath => "well-known-path",
            Self::Prompt => "prompt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub container: PathBuf,
    pub source: LocateSource,
}

pub trait PathPrompt {
    fn ask_install_path(&mut self, channel: Channel) -> Result<Option<String>>;
}

#[derive(Debug, Default)]
pub struct StdinPrompt;

impl PathPrompt for StdinPrompt {
    fn ask_install_path(&mut self, channel: Channel) -> Result<Option<String>> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }

        let mut stderr = io::stderr();
        write!(
            stderr,
            "could not find {channel} automatically; enter its install path: "
        )
        .and_then(|()| stderr.flush())
        .context("failed to write install path prompt")?;

        let mut answer = String::new();
        stdin
            .lock()
            .read_line(&mut answer)
            .context("failed to read install path")?;
        let answer = answer.trim();
        Ok((!answer.is_empty()).then(|| answer.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct NoPrompt;

impl PathPrompt for NoPrompt {
    fn ask_install_path(&mut self, _channel: Channel) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateEnv {
    pub fs_root: PathBuf,
    pub home: Option<PathBuf>,
    pub local_app_data: Option<PathBuf>,
    pub extra_search_roots: Vec<PathBuf>,
}

impl LocateEnv {
    pub fn from_system(config: &EngineConfig) -> Self {
        Self {
            fs_root: PathBuf::from("/"),
            home: dirs::home_dir(),
            local_app_data: std::env::var_os("LOCALAPPDATA")
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .or_else(dirs::data_local_dir),
            extra_search_roots: config.locate.extra_search_roots.clone(),
        }
    }

    fn rooted(&self, absolute: &str) -> PathBuf {
        self.fs_root.join(absolute.trim_start_matches('/'))
    }

    fn expand_home(&self, raw: &str) -> PathBuf {
        match (raw.strip_prefix("~/"), &self.home) {
            (Some(rest), Some(home)) => home.join(rest),
            _ if raw == "~" => self.home.clone().unwrap_or_else(|| PathBuf::from(raw)),
            _ => PathBuf::from(raw),
        }
    }
}

pub struct InstallLocator<'a, C: ?Sized> {
    layout: &'a EngineLayout,
    platform: PlatformStrategy,
    env: &'a LocateEnv,
    processes: &'a C,
}

impl<'a, C> InstallLocator<'a, C>
where
    C: ProcessCoordinator + ?Sized,
{
    pub fn new(
        layout: &'a EngineLayout,
        platform: PlatformStrategy,
        env: &'a LocateEnv,
        processes: &'a C,
    ) -> Self {
        Self {
            layout,
            platform,
            env,
            processes,
        }
    }

    pub fn locate(&self, channel: Channel, prompt: &mut dyn PathPrompt) -> Result<Located> {
        if let Some(container) = read_cached_location(self.layout, channel)? {
            match self.superseding_version(channel, &container) {
                Some(newer) => {
                    tracing::info!(
                        channel = %channel,
                        cached = %container.display(),
                        container = %newer.container.display(),
                        "cached location superseded by a newer version folder"
                    );
                    write_cached_location(self.layout, channel, &newer.container)?;
                    return Ok(newer);
                }
                None => {
                    tracing::debug!(channel = %channel, container = %container.display(), "using cached location");
                    return Ok(Located {
                        container,
                        source: LocateSource::Cache,
                    });
                }
            }
        }

        let located = match self.platform {
            PlatformStrategy::Windows => self.locate_windows(channel)?,
            PlatformStrategy::MacOs => self.locate_macos(channel),
            PlatformStrategy::Linux => self.locate_linux(channel, prompt)?,
        };

        write_cached_location(self.layout, channel, &located.container)?;
        tracing::info!(
            channel = %channel,
            container = %located.container.display(),
            source = located.source.as_str(),
            "located installation"
        );
        Ok(located)
    }

    fn locate_windows(&self, channel: Channel) -> Result<Located> {
        let not_found = |detail: String| InjectError::InstallationNotFound {
            channel,
            detail: Some(detail),
        };
        let Some(base) = &self.env.local_app_data else {
            return Err(not_found("LOCALAPPDATA is not set".to_string()).into());
        };

        let install_dir = base.join(channel.windows_name());
        let entries = match fs::read_dir(&install_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(not_found(format!("{} does not exist", install_dir.display())).into());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", install_dir.display()));
            }
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to iterate {}", install_dir.display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(VERSION_DIR_PREFIX) && entry.path().is_dir() {
                versions.push(name);
            }
        }

        let newest = newest_version_dir(&versions).ok_or_else(|| {
            not_found(format!(
                "no {VERSION_DIR_PREFIX}* folder under {}",
                install_dir.display()
            ))
        })?;
        Ok(Located {
            container: install_dir
                .join(newest)
                .join("resources")
                .join(CONTAINER_NAME),
            source: LocateSource::VersionedFolder,
        })
    }

    // Squirrel keeps the previous app-* folder around after an update.
    fn superseding_version(&self, channel: Channel, cached: &Path) -> Option<Located> {
        if self.platform != PlatformStrategy::Windows {
            return None;
        }
        self.locate_windows(channel).ok().filter(|newest| {
            newest.container.as_path() != cached
                && InstallPaths::new(&newest.container).has_footprint()
        })
    }

    fn locate_macos(&self, channel: Channel) -> Located {
        Located {
            container: self
                .env
                .rooted("/Applications")
                .join(format!("{}.app", channel.macos_bundle_name()))
                .join("Contents")
                .join("Resources")
                .join(CONTAINER_NAME),
            source: LocateSource::StaticTable,
        }
    }

    fn locate_linux(&self, channel: Channel, prompt: &mut dyn PathPrompt) -> Result<Located> {
        match self.running_install_dir(channel) {
            Ok(Some(dir)) => {
                if let Some(container) = find_container_in_dir(&dir) {
                    return Ok(Located {
                        container,
                        source: LocateSource::RunningProcess,
                    });
                }
                tracing::debug!(dir = %dir.display(), "running client has no container beside it");
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "process scan failed; probing well-known paths");
            }
        }

        for dir in linux_search_dirs(self.env, channel) {
            tracing::debug!(dir = %dir.display(), "probing");
            if let Some(container) = find_container_in_dir(&dir) {
                return Ok(Located {
                    container,
                    source: LocateSource::WellKnownPath,
                });
            }
        }

        let Some(answer) = prompt.ask_install_path(channel)? else {
            return Err(InjectError::InstallationNotFound {
                channel,
                detail: Some("no running client or well-known path matched".to_string()),
            }
            .into());
        };
        let container = resolve_prompt_answer(self.env, &answer).ok_or_else(|| {
            InjectError::InstallationNotFound {
                channel,
                detail: Some(format!("{answer} does not exist or contains no {CONTAINER_NAME}")),
            }
        })?;
        Ok(Located {
            container,
            source: LocateSource::Prompt,
        })
    }

    fn running_install_dir(&self, channel: Channel) -> Result<Option<PathBuf>> {
        let pattern = Regex::new(channel.linux_process_pattern())
            .with_context(|| format!("invalid process pattern for {channel}"))?;
        let entries = self.processes.list_processes()?;
        Ok(entries
            .iter()
            .find(|entry| {
                pattern.is_match(entry.executable()) && entry.command.contains(RENDERER_MARKER)
            })
            .and_then(|entry| Path::new(entry.executable()).parent().map(Path::to_path_buf)))
    }
}

pub fn linux_search_dirs(env: &LocateEnv, channel: Channel) -> Vec<PathBuf> {
    let dir = channel.linux_dir_name();
    let alt = channel.linux_alt_dir_name();
    let app_id = channel.flatpak_app_id();

    let mut dirs = env.extra_search_roots.clone();
    if let Some(home) = &env.home {
        dirs.push(home.join(".local/share").join(dir));
    }
    dirs.push(env.rooted("/usr/share").join(dir));
    dirs.push(env.rooted("/usr/lib").join(dir));
    dirs.push(env.rooted("/usr/lib64").join(dir));
    dirs.push(env.rooted("/opt").join(dir));
    dirs.push(env.rooted("/opt").join(alt));
    dirs.push(env.rooted(&format!("/snap/{dir}/current/usr/share/{dir}")));
    dirs.push(env.rooted(&format!(
        "/var/lib/flatpak/app/{app_id}/current/active/files/{dir}"
    )));
    if let Some(home) = &env.home {
        dirs.push(home.join(format!(
            ".local/share/flatpak/app/{app_id}/current/active/files/{dir}"
        )));
    }
    dirs
}

pub fn find_container_in_dir(dir: &Path) -> Option<PathBuf> {
    [dir.join("resources"), dir.to_path_buf()]
        .into_iter()
        .find(|candidate| {
            candidate.join(CONTAINER_NAME).is_file()
                || candidate.join(VANILLA_BACKUP_NAME).is_file()
        })
        .map(|candidate| candidate.join(CONTAINER_NAME))
}

fn resolve_prompt_answer(env: &LocateEnv, answer: &str) -> Option<PathBuf> {
    let path = env.expand_home(answer.trim());
    if path.is_file() {
        let is_container = path
            .extension()
            .is_some_and(|extension| extension == "asar");
        return is_container.then_some(path);
    }
    if path.is_dir() {
        return find_container_in_dir(&path);
    }
    None
}

pub fn newest_version_dir(names: &[String]) -> Option<&String> {
    names
        .iter()
        .max_by(|left, right| compare_version_dirs(left, right))
}

fn compare_version_dirs(left: &str, right: &str) -> Ordering {
    let parse = |name: &str| {
        name.strip_prefix(VERSION_DIR_PREFIX)
            .and_then(|version| semver::Version::parse(version).ok())
    };
    match (parse(left), parse(right)) {
        (Some(left_version), Some(right_version)) => left_version
            .cmp(&right_version)
            .then_with(|| left.cmp(right)),
        _ => left.cmp(right),
    }
}
