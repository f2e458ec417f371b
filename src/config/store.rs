use std::path::Path;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Environment variable naming an optional STUN server
pub const STUN_SERVER_ENV: &str = "SAMPLE_STUN_SERVER";

/// Load configuration from an optional JSON file and apply environment overrides
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                AppError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            info!("Loaded configuration from {}", path.display());
            serde_json::from_str::<AppConfig>(&text)?
        }
        None => {
            debug!("No configuration file given, using defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Apply environment-derived overrides using `lookup` to read variables
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(server) = lookup(STUN_SERVER_ENV) {
        let server = server.trim();
        if !server.is_empty() && !config.webrtc.stun_servers.iter().any(|s| s == server) {
            info!("Using STUN server from {}: {}", STUN_SERVER_ENV, server);
            config.webrtc.stun_servers.push(server.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_adds_stun_server_once() {
        let mut config = AppConfig::default();
        let lookup = |key: &str| (key == STUN_SERVER_ENV).then(|| "stun:stun.example.org:3478".to_string());
        apply_env_overrides(&mut config, lookup);
        apply_env_overrides(&mut config, lookup);
        assert_eq!(config.webrtc.stun_servers, vec!["stun:stun.example.org:3478"]);
    }

    #[test]
    fn test_empty_env_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, |_| Some("  ".to_string()));
        assert!(config.webrtc.stun_servers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"session": {{"timeout_secs": 30}}}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.session.timeout_secs, 30);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"video": {{"width": 641}}}}"#).unwrap();

        assert!(matches!(
            load_config(Some(file.path())),
            Err(AppError::Config(_))
        ));
    }
}
