use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UNPACKED_DIR_SUFFIX: &str = ".unpacked";
pub const PARTIAL_SUFFIX: &str = ".partial";

const SIZE_PICKLE_PAYLOAD_LEN: u32 = 4;
const MAX_HEADER_LEN: u32 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum AsarError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid header json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed archive: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AsarNode {
    Directory { files: BTreeMap<String, AsarNode> },
    Link { link: String },
    File(AsarFile),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsarFile {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unpacked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<serde_json::Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl AsarFile {
    fn data_offset(&self, entry: &str) -> Result<u64, AsarError> {
        let raw = self
            .offset
            .as_deref()
            .ok_or_else(|| AsarError::Malformed(format!("entry '{entry}' has no offset")))?;
        raw.parse::<u64>().map_err(|_| {
            AsarError::Malformed(format!("entry '{entry}' has invalid offset '{raw}'"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct AsarArchive {
    path: PathBuf,
    root: BTreeMap<String, AsarNode>,
    data_offset: u64,
}

impl AsarArchive {
    pub fn open(path: &Path) -> Result<Self, AsarError> {
        let mut file = File::open(path)?;
        let (root, data_offset) = read_header(&mut file)?;
        Ok(Self {
            path: path.to_path_buf(),
            root,
            data_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &BTreeMap<String, AsarNode> {
        &self.root
    }

    pub fn find(&self, entry: &str) -> Option<&AsarNode> {
        let mut segments = entry.split('/').filter(|segment| !segment.is_empty());
        let first = segments.next()?;
        let mut node = self.root.get(first)?;
        for segment in segments {
            match node {
                AsarNode::Directory { files } => node = files.get(segment)?,
                _ => return None,
            }
        }
        Some(node)
    }

    pub fn has_entry(&self, entry: &str) -> bool {
        self.find(entry).is_some()
    }

    pub fn top_level_entries(&self) -> Vec<String> {
        self.root.keys().cloned().collect()
    }

    pub fn extract_all(&self, dest: &Path) -> Result<(), AsarError> {
        self.extract_all_with_unpacked(dest, &unpacked_dir(&self.path))
    }

    pub fn extract_all_with_unpacked(
        &self,
        dest: &Path,
        unpacked_root: &Path,
    ) -> Result<(), AsarError> {
        fs::create_dir_all(dest)?;
        let mut data = File::open(&self.path)?;
        let mut rel = PathBuf::new();
        self.extract_dir(&self.root, dest, &mut rel, &mut data, unpacked_root)
    }

    fn extract_dir(
        &self,
        files: &BTreeMap<String, AsarNode>,
        dest_root: &Path,
        rel: &mut PathBuf,
        data: &mut File,
        unpacked_root: &Path,
    ) -> Result<(), AsarError> {
        for (name, node) in files {
            validate_entry_name(name)?;
            rel.push(name);
            let target = dest_root.join(&*rel);
            match node {
                AsarNode::Directory { files } => {
                    fs::create_dir_all(&target)?;
                    self.extract_dir(files, dest_root, rel, data, unpacked_root)?;
                }
                AsarNode::File(file) => {
                    if file.unpacked {
                        fs::copy(unpacked_root.join(&*rel), &target)?;
                    } else {
                        let entry = rel.display().to_string();
                        let offset = self
                            .data_offset
                            .checked_add(file.data_offset(&entry)?)
                            .ok_or_else(|| {
                                AsarError::Malformed(format!("entry '{entry}' offset overflows"))
                            })?;
                        copy_range(data, offset, file.size, &target, &entry)?;
                    }
                    if file.executable {
                        mark_executable(&target)?;
                    }
                }
                AsarNode::Link { link } => {
                    let link_target = relative_link_target(rel, link)?;
                    create_symlink(&link_target, &target)?;
                }
            }
            rel.pop();
        }
        Ok(())
    }
}

pub fn has_entry(container: &Path, entry: &str) -> Result<bool, AsarError> {
    Ok(AsarArchive::open(container)?.has_entry(entry))
}

pub fn extract_all(container: &Path, dest: &Path) -> Result<(), AsarError> {
    let archive = AsarArchive::open(container)?;
    archive.extract_all(dest)?;
    tracing::debug!(
        container = %container.display(),
        dest = %dest.display(),
        "extracted archive"
    );
    Ok(())
}

pub fn create_package(source: &Path, container: &Path) -> Result<(), AsarError> {
    let source_root = fs::canonicalize(source)?;
    let mut payload = Vec::new();
    let mut next_offset = 0_u64;
    let files = collect_dir(&source_root, &source_root, &mut payload, &mut next_offset)?;
    let header = encode_header(&AsarNode::Directory { files })?;

    let partial = partial_path(container);
    let written = write_archive(&partial, &header, &payload);
    if let Err(err) = written {
        let _ = fs::remove_file(&partial);
        return Err(err);
    }
    if let Err(err) = fs::rename(&partial, container) {
        let _ = fs::remove_file(&partial);
        return Err(err.into());
    }

    tracing::debug!(
        source = %source.display(),
        container = %container.display(),
        files = payload.len(),
        bytes = next_offset,
        "packed archive"
    );
    Ok(())
}

pub fn partial_path(container: &Path) -> PathBuf {
    sibling_with_suffix(container, PARTIAL_SUFFIX)
}

pub fn unpacked_dir(container: &Path) -> PathBuf {
    sibling_with_suffix(container, UNPACKED_DIR_SUFFIX)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn read_header(reader: &mut impl Read) -> Result<(BTreeMap<String, AsarNode>, u64), AsarError> {
    let mut prefix = [0_u8; 8];
    read_exact_or_truncated(reader, &mut prefix, "size pickle")?;
    let size_payload_len = read_u32(&prefix, 0);
    if size_payload_len != SIZE_PICKLE_PAYLOAD_LEN {
        return Err(AsarError::Malformed(format!(
            "unexpected size pickle length {size_payload_len}"
        )));
    }

    let header_len = read_u32(&prefix, 4);
    if !(8..=MAX_HEADER_LEN).contains(&header_len) {
        return Err(AsarError::Malformed(format!(
            "header length {header_len} is out of range"
        )));
    }

    let mut header = vec![0_u8; header_len as usize];
    read_exact_or_truncated(reader, &mut header, "header")?;
    let payload_len = read_u32(&header, 0) as u64;
    if payload_len + 4 > header_len as u64 {
        return Err(AsarError::Malformed(format!(
            "header payload length {payload_len} exceeds header length {header_len}"
        )));
    }
    let json_len = read_u32(&header, 4) as usize;
    if 8 + json_len > header.len() {
        return Err(AsarError::Malformed(format!(
            "header json length {json_len} exceeds header length {header_len}"
        )));
    }

    let root: AsarNode = serde_json::from_slice(&header[8..8 + json_len])?;
    match root {
        AsarNode::Directory { files } => Ok((files, 8 + header_len as u64)),
        _ => Err(AsarError::Malformed(
            "header root is not a directory".to_string(),
        )),
    }
}

pub(crate) fn encode_header(root: &AsarNode) -> Result<Vec<u8>, AsarError> {
    let json = serde_json::to_vec(root)?;
    let json_len = u32::try_from(json.len())
        .map_err(|_| AsarError::Malformed("header json is too large".to_string()))?;
    let padded_json_len = json.len().next_multiple_of(4);
    let header_payload_len = 4 + padded_json_len;
    let header_len = 4 + header_payload_len;
    let header_len_u32 = u32::try_from(header_len)
        .ok()
        .filter(|len| *len <= MAX_HEADER_LEN)
        .ok_or_else(|| AsarError::Malformed("header json is too large".to_string()))?;

    let mut out = Vec::with_capacity(8 + header_len);
    out.extend_from_slice(&SIZE_PICKLE_PAYLOAD_LEN.to_le_bytes());
    out.extend_from_slice(&header_len_u32.to_le_bytes());
    out.extend_from_slice(&(header_payload_len as u32).to_le_bytes());
    out.extend_from_slice(&json_len.to_le_bytes());
    out.extend_from_slice(&json);
    out.resize(8 + header_len, 0);
    Ok(out)
}

fn collect_dir(
    source_root: &Path,
    dir: &Path,
    payload: &mut Vec<(PathBuf, u64)>,
    next_offset: &mut u64,
) -> Result<BTreeMap<String, AsarNode>, AsarError> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, io::Error>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut files = BTreeMap::new();
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().into_string().map_err(|raw| {
            AsarError::Malformed(format!("entry name is not valid UTF-8: {raw:?}"))
        })?;
        let metadata = fs::symlink_metadata(&path)?;

        let node = if metadata.is_dir() {
            AsarNode::Directory {
                files: collect_dir(source_root, &path, payload, next_offset)?,
            }
        } else if metadata.file_type().is_symlink() {
            let resolved = fs::canonicalize(&path)?;
            match resolved.strip_prefix(source_root) {
                Ok(inside) => AsarNode::Link {
                    link: to_entry_path(inside)?,
                },
                Err(_) if resolved.is_file() => {
                    file_node(&resolved, &fs::metadata(&resolved)?, payload, next_offset)
                }
                Err(_) => {
                    return Err(AsarError::Malformed(format!(
                        "symlink {} points outside the packed directory",
                        path.display()
                    )));
                }
            }
        } else {
            file_node(&path, &metadata, payload, next_offset)
        };
        files.insert(name, node);
    }
    Ok(files)
}

fn file_node(
    path: &Path,
    metadata: &fs::Metadata,
    payload: &mut Vec<(PathBuf, u64)>,
    next_offset: &mut u64,
) -> AsarNode {
    let size = metadata.len();
    let node = AsarNode::File(AsarFile {
        size,
        offset: Some(next_offset.to_string()),
        executable: is_executable(metadata),
        unpacked: false,
        integrity: None,
    });
    payload.push((path.to_path_buf(), size));
    *next_offset += size;
    node
}

fn write_archive(path: &Path, header: &[u8], payload: &[(PathBuf, u64)]) -> Result<(), AsarError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(header)?;
    for (source, size) in payload {
        let copied = io::copy(&mut File::open(source)?.take(*size), &mut writer)?;
        if copied != *size {
            return Err(AsarError::Malformed(format!(
                "{} shrank while packing ({copied} of {size} bytes)",
                source.display()
            )));
        }
    }
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn copy_range(
    data: &mut File,
    offset: u64,
    size: u64,
    target: &Path,
    entry: &str,
) -> Result<(), AsarError> {
    data.seek(SeekFrom::Start(offset))?;
    let mut out = File::create(target)?;
    let copied = io::copy(&mut (&mut *data).take(size), &mut out)?;
    if copied != size {
        return Err(AsarError::Malformed(format!(
            "entry '{entry}' is truncated ({copied} of {size} bytes)"
        )));
    }
    Ok(())
}

fn read_exact_or_truncated(
    reader: &mut impl Read,
    buf: &mut [u8],
    what: &str,
) -> Result<(), AsarError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            AsarError::Malformed(format!("truncated {what}"))
        } else {
            AsarError::Io(err)
        }
    })
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0_u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn validate_entry_name(name: &str) -> Result<(), AsarError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(AsarError::Malformed(format!(
            "unsafe entry name '{name}'"
        )));
    }
    Ok(())
}

fn to_entry_path(rel: &Path) -> Result<String, AsarError> {
    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str().ok_or_else(|| {
                AsarError::Malformed(format!("link target is not valid UTF-8: {}", rel.display()))
            })?),
            _ => {
                return Err(AsarError::Malformed(format!(
                    "link target is not a plain relative path: {}",
                    rel.display()
                )));
            }
        }
    }
    Ok(segments.join("/"))
}

// Links are stored relative to the archive root; on disk they are made
// relative to the directory holding the link.
fn relative_link_target(link_rel: &Path, link: &str) -> Result<PathBuf, AsarError> {
    let mut target = PathBuf::new();
    let depth = link_rel.components().count().saturating_sub(1);
    for _ in 0..depth {
        target.push("..");
    }
    for segment in link.split('/').filter(|segment| !segment.is_empty()) {
        validate_entry_name(segment)?;
        target.push(segment);
    }
    Ok(target)
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), AsarError> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), AsarError> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(link_target: &Path, at: &Path) -> Result<(), AsarError> {
    std::os::unix::fs::symlink(link_target, at)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(link_target: &Path, at: &Path) -> Result<(), AsarError> {
    tracing::warn!(
        link = %at.display(),
        target = %link_target.display(),
        "skipping symlink entry on a host without symlink support"
    );
    Ok(())
}
