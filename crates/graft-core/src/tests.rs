use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::*;
use crate::asar::{create_package, encode_header, extract_all, has_entry, partial_path};

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("file has parent")).expect("must create dirs");
        fs::write(&path, content).expect("must write file");
    }
}

fn packed_sample(dir: &Path) -> std::path::PathBuf {
    let source = dir.join("source");
    write_tree(
        &source,
        &[
            ("package.json", r#"{"name":"discord","main":"app_bootstrap/index.js"}"#),
            ("app_bootstrap/index.js", "require('./bootstrap');"),
            ("app_bootstrap/bootstrap.js", "module.exports = {};"),
            ("common/paths.js", ""),
        ],
    );
    let container = dir.join("app.asar");
    create_package(&source, &container).expect("must pack");
    container
}

#[test]
fn channel_parse_accepts_aliases_and_case() {
    assert_eq!(Channel::parse("stable"), Some(Channel::Stable));
    assert_eq!(Channel::parse(" PTB "), Some(Channel::Ptb));
    assert_eq!(Channel::parse("Canary"), Some(Channel::Canary));
    assert_eq!(Channel::parse("dev"), Some(Channel::Development));
    assert_eq!(Channel::parse("development"), Some(Channel::Development));
    assert_eq!(Channel::parse("nightly"), None);
}

#[test]
fn channel_from_str_reports_unknown_channel() {
    let err = "nightly".parse::<Channel>().expect_err("must reject");
    assert!(matches!(err, InjectError::UnknownChannel(ref value) if value == "nightly"));
}

#[test]
fn channel_as_str_round_trips_through_parse() {
    for channel in Channel::ALL {
        assert_eq!(Channel::parse(channel.as_str()), Some(channel));
    }
}

#[test]
fn channel_names_follow_client_naming() {
    assert_eq!(Channel::Canary.windows_name(), "DiscordCanary");
    assert_eq!(Channel::Ptb.macos_bundle_name(), "Discord PTB");
    assert_eq!(Channel::Development.linux_dir_name(), "discord-development");
    assert_eq!(Channel::Stable.linux_alt_dir_name(), "Discord");
    assert_eq!(
        Channel::Canary.flatpak_app_id(),
        "com.discordapp.DiscordCanary"
    );
}

#[test]
fn platform_from_os_rejects_unknown_hosts() {
    assert_eq!(
        PlatformStrategy::from_os("linux").expect("linux supported"),
        PlatformStrategy::Linux
    );
    assert_eq!(
        PlatformStrategy::from_os("macos").expect("macos supported"),
        PlatformStrategy::MacOs
    );
    let err = PlatformStrategy::from_os("freebsd").expect_err("must reject");
    assert!(matches!(err, InjectError::PlatformUnsupported(ref os) if os == "freebsd"));
}

#[test]
fn inject_error_hints_name_the_next_command() {
    let err = InjectError::AlreadyInjected {
        channel: Channel::Stable,
        path: "/opt/discord/resources/app.asar".into(),
    };
    assert!(err.hint().expect("has hint").contains("graft uninject"));
    assert_eq!(
        err.to_string(),
        "stable is already injected at /opt/discord/resources/app.asar"
    );

    let not_found = InjectError::InstallationNotFound {
        channel: Channel::Canary,
        detail: Some("no process or well-known path matched".to_string()),
    };
    assert_eq!(
        not_found.to_string(),
        "could not find a canary installation: no process or well-known path matched"
    );
}

#[test]
fn has_entry_reads_nested_paths_from_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());

    assert!(has_entry(&container, "package.json").expect("must read header"));
    assert!(has_entry(&container, "app_bootstrap/bootstrap.js").expect("must read header"));
    assert!(has_entry(&container, "common").expect("must read header"));
    assert!(!has_entry(&container, "index.js").expect("must read header"));
    assert!(!has_entry(&container, "package.json/nested").expect("must read header"));
    assert!(!has_entry(&container, "").expect("must read header"));
}

#[test]
fn top_level_entries_are_sorted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());
    let archive = AsarArchive::open(&container).expect("must open");
    assert_eq!(
        archive.top_level_entries(),
        vec!["app_bootstrap", "common", "package.json"]
    );
}

#[test]
fn extract_all_restores_every_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());
    let out = dir.path().join("out");

    extract_all(&container, &out).expect("must extract");

    assert_eq!(
        fs::read_to_string(out.join("app_bootstrap/index.js")).expect("read"),
        "require('./bootstrap');"
    );
    assert_eq!(
        fs::read_to_string(out.join("package.json")).expect("read"),
        r#"{"name":"discord","main":"app_bootstrap/index.js"}"#
    );
    assert_eq!(fs::read(out.join("common/paths.js")).expect("read").len(), 0);
}

#[test]
fn repacking_an_extraction_is_byte_identical() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());
    let out = dir.path().join("out");
    extract_all(&container, &out).expect("must extract");

    let repacked = dir.path().join("repacked.asar");
    create_package(&out, &repacked).expect("must repack");

    assert_eq!(
        fs::read(&container).expect("read original"),
        fs::read(&repacked).expect("read repacked")
    );
}

#[test]
fn header_uses_pickle_framing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());
    let bytes = fs::read(&container).expect("read");

    let word = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"));
    assert_eq!(word(0), 4);
    let header_len = word(4) as usize;
    assert_eq!(word(8) as usize, header_len - 4);
    let json_len = word(12) as usize;
    assert!(16 + json_len <= 8 + header_len);
    assert_eq!(header_len % 4, 0);

    let json: serde_json::Value =
        serde_json::from_slice(&bytes[16..16 + json_len]).expect("header json");
    assert_eq!(
        json["files"]["package.json"]["offset"],
        serde_json::Value::String("43".to_string())
    );
}

#[test]
fn create_package_overwrites_and_leaves_no_partial_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());

    let other = dir.path().join("other");
    write_tree(&other, &[("index.js", "require('/tmp/main.js');")]);
    create_package(&other, &container).expect("must overwrite");

    assert!(!partial_path(&container).exists());
    assert!(has_entry(&container, "index.js").expect("header"));
    assert!(!has_entry(&container, "package.json").expect("header"));
}

#[test]
fn truncated_archive_is_malformed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = packed_sample(dir.path());
    let bytes = fs::read(&container).expect("read");
    fs::write(&container, &bytes[..bytes.len() - 4]).expect("truncate");

    let err = extract_all(&container, &dir.path().join("out")).expect_err("must fail");
    assert!(matches!(err, AsarError::Malformed(ref msg) if msg.contains("truncated")));
}

#[test]
fn overflowing_entry_offset_is_malformed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = dir.path().join("app.asar");
    let mut files = BTreeMap::new();
    files.insert(
        "a".to_string(),
        AsarNode::File(AsarFile {
            size: 1,
            offset: Some(u64::MAX.to_string()),
            executable: false,
            unpacked: false,
            integrity: None,
        }),
    );
    let header = encode_header(&AsarNode::Directory { files }).expect("encode");
    fs::write(&container, header).expect("write");

    let err = extract_all(&container, &dir.path().join("out")).expect_err("must fail");
    assert!(matches!(err, AsarError::Malformed(ref msg) if msg.contains("offset overflows")));
}

#[test]
fn garbage_file_is_malformed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = dir.path().join("app.asar");
    fs::write(&container, b"PK\x03\x04 definitely not an asar").expect("write");

    let err = AsarArchive::open(&container).expect_err("must fail");
    assert!(matches!(err, AsarError::Malformed(_)));

    fs::write(&container, b"\x04\x00").expect("write");
    let err = AsarArchive::open(&container).expect_err("must fail");
    assert!(matches!(err, AsarError::Malformed(ref msg) if msg.contains("truncated")));
}

#[test]
fn invalid_header_json_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = dir.path().join("app.asar");
    let json = b"{\"files\": oops}";
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&4_u32.to_le_bytes());
    bytes.extend_from_slice(&24_u32.to_le_bytes());
    bytes.extend_from_slice(&20_u32.to_le_bytes());
    bytes.extend_from_slice(&(json.len() as u32).to_le_bytes());
    bytes.extend_from_slice(json);
    bytes.resize(32, 0);
    fs::write(&container, bytes).expect("write");

    let err = AsarArchive::open(&container).expect_err("must fail");
    assert!(matches!(err, AsarError::Json(_)));
}

#[test]
fn unsafe_entry_names_are_rejected_on_extract() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = dir.path().join("app.asar");
    let mut files = BTreeMap::new();
    files.insert(
        "..".to_string(),
        AsarNode::File(AsarFile {
            size: 0,
            offset: Some("0".to_string()),
            executable: false,
            unpacked: false,
            integrity: None,
        }),
    );
    let header = encode_header(&AsarNode::Directory { files }).expect("encode");
    fs::write(&container, header).expect("write");

    let err = extract_all(&container, &dir.path().join("out")).expect_err("must fail");
    assert!(matches!(err, AsarError::Malformed(ref msg) if msg.contains("unsafe entry name")));
}

#[test]
fn unpacked_entries_are_copied_from_sibling_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let container = dir.path().join("app.asar");
    let mut native = BTreeMap::new();
    native.insert(
        "addon.node".to_string(),
        AsarNode::File(AsarFile {
            size: 6,
            offset: None,
            executable: false,
            unpacked: true,
            integrity: None,
        }),
    );
    let mut files = BTreeMap::new();
    files.insert("native".to_string(), AsarNode::Directory { files: native });
    let header = encode_header(&AsarNode::Directory { files }).expect("encode");
    fs::write(&container, header).expect("write");
    write_tree(
        &dir.path().join("app.asar.unpacked"),
        &[("native/addon.node", "binary")],
    );

    let out = dir.path().join("out");
    extract_all(&container, &out).expect("must extract");
    assert_eq!(
        fs::read_to_string(out.join("native/addon.node")).expect("read"),
        "binary"
    );
}

#[cfg(unix)]
#[test]
fn executable_bit_and_links_survive_round_trip() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("source");
    write_tree(&source, &[("bin/run.sh", "#!/bin/sh\n"), ("lib/real.js", "1")]);
    let script = source.join("bin/run.sh");
    let mut permissions = fs::metadata(&script).expect("stat").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&script, permissions).expect("chmod");
    std::os::unix::fs::symlink("../lib/real.js", source.join("bin/alias.js")).expect("symlink");

    let container = dir.path().join("app.asar");
    create_package(&source, &container).expect("must pack");
    let archive = AsarArchive::open(&container).expect("open");
    assert_eq!(
        archive.find("bin/alias.js"),
        Some(&AsarNode::Link {
            link: "lib/real.js".to_string()
        })
    );

    let out = dir.path().join("out");
    extract_all(&container, &out).expect("must extract");
    let mode = fs::metadata(out.join("bin/run.sh"))
        .expect("stat")
        .permissions()
        .mode();
    assert_ne!(mode & 0o100, 0);
    assert_eq!(
        fs::read_to_string(out.join("bin/alias.js")).expect("follow link"),
        "1"
    );
}
