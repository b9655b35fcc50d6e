//! Root folder resolution tests
//!
//! Tests that manipulate HAVEN_ROOT are marked #[serial] so they do not race
//! on the process environment.

use haven_common::config::{
    default_root_folder, prepare_root_folder, read_root_folder_key, resolve_root_folder,
    DATABASE_FILE,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;

const TEST_ENV_VAR: &str = "HAVEN_ROOT_TEST";

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(TEST_ENV_VAR, "/tmp/haven-from-env");

    let root = resolve_root_folder(Some("/tmp/haven-from-cli"), TEST_ENV_VAR);
    assert_eq!(root, PathBuf::from("/tmp/haven-from-cli"));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_argument() {
    env::set_var(TEST_ENV_VAR, "/tmp/haven-from-env");

    let root = resolve_root_folder(None, TEST_ENV_VAR);
    assert_eq!(root, PathBuf::from("/tmp/haven-from-env"));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    env::set_var(TEST_ENV_VAR, "");

    let root = resolve_root_folder(None, TEST_ENV_VAR);
    assert!(!root.as_os_str().is_empty());
    assert_ne!(root, PathBuf::from(""));

    env::remove_var(TEST_ENV_VAR);
}

#[test]
fn test_default_root_folder_is_named_haven() {
    let root = default_root_folder();
    assert!(root.to_string_lossy().contains("haven"));
}

#[test]
fn test_read_root_folder_key_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "root_folder = \"/srv/haven\"\n").unwrap();

    assert_eq!(read_root_folder_key(&path), Some(PathBuf::from("/srv/haven")));
}

#[test]
fn test_read_root_folder_key_tolerates_bad_files() {
    let dir = tempfile::tempdir().unwrap();

    let malformed = dir.path().join("bad.toml");
    std::fs::write(&malformed, "root_folder = [unterminated").unwrap();
    assert_eq!(read_root_folder_key(&malformed), None);

    let missing_key = dir.path().join("other.toml");
    std::fs::write(&missing_key, "port = 8080\n").unwrap();
    assert_eq!(read_root_folder_key(&missing_key), None);

    assert_eq!(read_root_folder_key(&dir.path().join("absent.toml")), None);
}

#[test]
fn test_prepare_root_folder_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("haven");

    let db_path = prepare_root_folder(&root).unwrap();

    assert!(root.is_dir());
    assert_eq!(db_path, root.join(DATABASE_FILE));
}
