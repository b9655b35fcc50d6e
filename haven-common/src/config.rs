//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the root folder
pub const ROOT_ENV_VAR: &str = "HAVEN_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "haven.db";

/// Service settings file name inside the root folder
pub const SETTINGS_FILE: &str = "haven.toml";

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `root_folder` key of the user/system TOML config file
/// 4. OS-dependent compiled default
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(config_path) = locate_config_file() {
        if let Some(root_folder) = read_root_folder_key(&config_path) {
            return root_folder;
        }
    }

    default_root_folder()
}

/// Read the `root_folder` key from a TOML file, if present and well-formed
pub fn read_root_folder_key(config_path: &Path) -> Option<PathBuf> {
    let toml_content = std::fs::read_to_string(config_path).ok()?;
    let config = toml::from_str::<toml::Value>(&toml_content).ok()?;
    config
        .get("root_folder")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

/// Find the platform configuration file
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("haven").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/haven/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("haven"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/haven"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("haven"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/haven"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("haven"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\haven"))
    } else {
        PathBuf::from("./haven_data")
    }
}

/// Create the root folder if missing and return the database path inside it
pub fn prepare_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join(DATABASE_FILE))
}
