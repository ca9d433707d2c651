use anyhow::{Context, Result};
use graft_core::Channel;
use std::fs;
use std::path::{Path, PathBuf};

use crate::fs_utils::remove_file_if_exists;
use crate::inspect::InstallPaths;
use crate::EngineLayout;

pub fn write_cached_location(
    layout: &EngineLayout,
    channel: Channel,
    container: &Path,
) -> Result<PathBuf> {
    let cache_path = layout.location_cache_path(channel);
    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache dir: {}", parent.display()))?;
    }

    fs::write(&cache_path, container.to_string_lossy().as_bytes())
        .with_context(|| format!("failed to write location cache: {}", cache_path.display()))?;
    Ok(cache_path)
}

pub fn read_cached_location(layout: &EngineLayout, channel: Channel) -> Result<Option<PathBuf>> {
    let cache_path = layout.location_cache_path(channel);
    if !cache_path.exists() {
        return Ok(None);
    }

    let value = fs::read_to_string(&cache_path)
        .with_context(|| format!("failed to read location cache: {}", cache_path.display()))?;
    let trimmed = value.trim();
    let cached = PathBuf::from(trimmed);
    if trimmed.is_empty() || !InstallPaths::new(&cached).has_footprint() {
        tracing::debug!(
            channel = %channel,
            cached = trimmed,
            "discarding stale location cache"
        );
        clear_cached_location(layout, channel)?;
        return Ok(None);
    }
    Ok(Some(cached))
}

pub fn clear_cached_location(layout: &EngineLayout, channel: Channel) -> Result<bool> {
    let cache_path = layout.location_cache_path(channel);
    let existed = cache_path.exists();
    remove_file_if_exists(&cache_path)
        .with_context(|| format!("failed to remove location cache: {}", cache_path.display()))?;
    Ok(existed)
}
