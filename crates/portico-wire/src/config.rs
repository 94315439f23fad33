//! Configuration loading.

use portico_types::config::ConnectConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load configuration from a TOML file, falling back to defaults.
///
/// Reads `path`, or `~/.portico/config.toml` when `path` is `None`. A missing
/// or malformed file is never fatal.
pub fn load_config(path: Option<&Path>) -> ConnectConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<ConnectConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    ConnectConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    portico_home().join("config.toml")
}

/// Get the default Portico home directory.
pub fn portico_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".portico")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/portico/config.toml")));
        assert_eq!(config, ConnectConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
expected_origin = "https://child.example"
connect_timeout_ms = 500
debug_logging = true
liveness_interval_ms = 250
"#
        )
        .unwrap();

        let config = load_config(Some(&path));
        assert_eq!(config.expected_origin.as_deref(), Some("https://child.example"));
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(500)));
        assert!(config.debug_logging);
        assert_eq!(config.liveness_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_config_malformed_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "connect_timeout_ms = \"soon\"").unwrap();
        assert_eq!(load_config(Some(&path)), ConnectConfig::default());
    }

    #[test]
    fn test_default_paths() {
        assert!(default_config_path().ends_with(".portico/config.toml"));
        assert!(portico_home().ends_with(".portico"));
    }
}
