//! Configuration loading and root folder resolution

use std::path::PathBuf;

use crate::{Error, Result};

/// Resolve the shared root folder, in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file (`root_folder` key)
/// 4. OS-dependent compiled default (fallback)
///
/// Both services must resolve the same folder: it holds the database and
/// the media tree they coordinate through.
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    if let Ok(config_path) = find_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    Ok(default_root_folder())
}

/// Database path under the root folder
pub fn database_path(root_folder: &std::path::Path) -> PathBuf {
    root_folder.join("unmix.db")
}

/// Locate the configuration file for the platform
fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // ~/.config/unmix/config.toml first, then /etc/unmix/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("unmix").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/unmix/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("unmix").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("unmix"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/unmix"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("unmix"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/unmix"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("unmix"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\unmix"))
    } else {
        PathBuf::from("./unmix_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_argument_wins() {
        let resolved = resolve_root_folder(Some("/tmp/unmix-cli"), "UNMIX_TEST_UNSET").unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/unmix-cli"));
    }

    #[test]
    fn falls_back_to_a_default_when_nothing_is_set() {
        let resolved = resolve_root_folder(None, "UNMIX_TEST_UNSET").unwrap();
        assert!(!resolved.as_os_str().is_empty());
    }

    #[test]
    fn database_lives_under_the_root() {
        assert_eq!(
            database_path(std::path::Path::new("/data/unmix")),
            PathBuf::from("/data/unmix/unmix.db")
        );
    }
}
