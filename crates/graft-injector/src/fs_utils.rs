use std::fs;
use std::io;
use std::path::Path;

use graft_core::InjectError;

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub(crate) fn swap_error(action: &'static str, path: &Path, err: io::Error) -> anyhow::Error {
    match err.kind() {
        io::ErrorKind::PermissionDenied => InjectError::PermissionDenied {
            action,
            path: path.to_path_buf(),
            source: err,
        }
        .into(),
        io::ErrorKind::NotFound => InjectError::TargetNotFound {
            action,
            path: path.to_path_buf(),
            source: err,
        }
        .into(),
        _ => anyhow::Error::new(err).context(format!("failed to {action} {}", path.display())),
    }
}
