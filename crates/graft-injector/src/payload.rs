use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use graft_core::InjectError;

use crate::inspect::{LOADER_ENTRY_NAME, LOADER_MANIFEST_NAME};
use crate::EngineLayout;

pub const DEFAULT_BUNDLE_PATH: &str = "dist/graft.asar";
pub const DEFAULT_DEV_ENTRY_PATH: &str = "dist/main.js";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bundled { source: PathBuf },
    Development { entry: PathBuf },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadRequest {
    pub production: bool,
    pub entry_point: Option<PathBuf>,
    pub bundle_path: Option<PathBuf>,
}

impl Payload {
    pub fn resolve(request: &PayloadRequest) -> Result<Self> {
        let payload = if request.production {
            let source = request
                .bundle_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BUNDLE_PATH));
            Self::Bundled {
                source: absolute(&source)?,
            }
        } else {
            let entry = request
                .entry_point
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEV_ENTRY_PATH));
            Self::Development {
                entry: absolute(&entry)?,
            }
        };

        let built = payload.build_output();
        if !built.exists() {
            return Err(InjectError::NotBuilt {
                path: built.to_path_buf(),
            }
            .into());
        }
        Ok(payload)
    }

    pub fn build_output(&self) -> &Path {
        match self {
            Self::Bundled { source } => source,
            Self::Development { entry } => entry,
        }
    }

    pub fn loader_target(&self, layout: &EngineLayout) -> PathBuf {
        match self {
            Self::Bundled { .. } => layout.installed_bundle_path(),
            Self::Development { entry } => entry.clone(),
        }
    }

    pub fn engine_dir(&self, layout: &EngineLayout) -> PathBuf {
        match self {
            Self::Bundled { .. } => layout.root().to_path_buf(),
            Self::Development { entry } => entry
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| entry.clone()),
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .with_context(|| format!("failed to resolve payload path {}", path.display()))
}

pub fn render_loader_entry(target: &Path) -> Result<String> {
    let literal = serde_json::to_string(&target.to_string_lossy())
        .context("failed to encode loader target")?;
    Ok(format!("require({literal});\n"))
}

pub fn render_loader_manifest() -> Result<String> {
    let manifest = serde_json::json!({
        "name": "discord",
        "main": LOADER_ENTRY_NAME,
    });
    serde_json::to_string_pretty(&manifest).context("failed to encode loader manifest")
}

pub fn write_loader_files(staging: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(staging)
        .with_context(|| format!("failed to create {}", staging.display()))?;

    let entry_path = staging.join(LOADER_ENTRY_NAME);
    fs::write(&entry_path, render_loader_entry(target)?)
        .with_context(|| format!("failed to write {}", entry_path.display()))?;

    let manifest_path = staging.join(LOADER_MANIFEST_NAME);
    fs::write(&manifest_path, render_loader_manifest()?)
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    Ok(())
}

pub fn install_bundle(layout: &EngineLayout, source: &Path) -> Result<PathBuf> {
    layout.ensure_base_dirs()?;
    let dest = layout.installed_bundle_path();
    fs::copy(source, &dest).with_context(|| {
        format!(
            "failed to copy payload {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    match_enclosing_owner(layout.root(), &dest);
    tracing::info!(bundle = %dest.display(), "installed payload bundle");
    Ok(dest)
}

// The engine often runs elevated; hand the config dir and bundle back to the
// user who owns the enclosing directory.
#[cfg(unix)]
fn match_enclosing_owner(config_root: &Path, bundle: &Path) {
    use std::os::unix::fs::MetadataExt;

    let Some(enclosing) = config_root.parent() else {
        return;
    };
    let owner = match fs::metadata(enclosing) {
        Ok(metadata) => (metadata.uid(), metadata.gid()),
        Err(err) => {
            tracing::warn!(
                path = %enclosing.display(),
                error = %err,
                "cannot read config directory owner"
            );
            return;
        }
    };
    for path in [config_root, bundle] {
        if let Err(err) = std::os::unix::fs::chown(path, Some(owner.0), Some(owner.1)) {
            tracing::warn!(
                path = %path.display(),
                uid = owner.0,
                gid = owner.1,
                error = %err,
                "failed to adjust ownership"
            );
        }
    }
}

#[cfg(not(unix))]
fn match_enclosing_owner(_config_root: &Path, _bundle: &Path) {}
