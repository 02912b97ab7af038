//! Configuration file resolution and TOML loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform config file, if present
///
/// Returns `None` when no file applies; callers then run on built-in defaults.
/// An explicitly named file (1 or 2) that does not exist is an error.
pub fn resolve_config_file(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app_name: &str,
) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf()).map(Some);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_existing(PathBuf::from(path)).map(Some);
        }
    }

    Ok(default_config_file(app_name).filter(|p| p.exists()))
}

fn require_existing(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!("Config file not found: {}", path.display())))
    }
}

/// Get default configuration file path for the platform
///
/// Linux additionally falls back to `/etc/<app>/config.toml`.
pub fn default_config_file(app_name: &str) -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(app_name).join("config.toml"));

    if cfg!(target_os = "linux") {
        if let Some(path) = user_config.as_ref() {
            if path.exists() {
                return user_config;
            }
        }
        let system_config = PathBuf::from(format!("/etc/{}/config.toml", app_name));
        if system_config.exists() {
            return Some(system_config);
        }
    }

    user_config
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading config file {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        port: u16,
        #[serde(default)]
        name: Option<String>,
    }

    #[test]
    fn test_cli_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 1").unwrap();

        let resolved = resolve_config_file(Some(file.path()), "VOXPLAY_TEST_UNSET_VAR", "voxplay")
            .unwrap();
        assert_eq!(resolved.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = resolve_config_file(
            Some(Path::new("/definitely/not/here.toml")),
            "VOXPLAY_TEST_UNSET_VAR",
            "voxplay",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5741\nname = \"desk\"").unwrap();

        let sample: Sample = load_toml(file.path()).unwrap();
        assert_eq!(sample.port, 5741);
        assert_eq!(sample.name.as_deref(), Some("desk"));
    }

    #[test]
    fn test_load_toml_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();

        match load_toml::<Sample>(file.path()) {
            Err(Error::Config(msg)) => assert!(msg.contains(&file.path().display().to_string())),
            other => panic!("Expected config error, got {:?}", other),
        }
    }
}
