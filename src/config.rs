use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub sheet_timeout: Duration,
    pub log_stdout: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid LEADDESK_BIND_ADDR: {0}")]
    InvalidBindAddr(String),
    #[error("invalid LEADDESK_SHEET_TIMEOUT_SECS: {0}")]
    InvalidSheetTimeout(String),
    #[error("invalid LEADDESK_LOG_STDOUT: {0}")]
    InvalidLogStdout(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = lookup("LEADDESK_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:5000".to_string())
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::InvalidBindAddr(error.to_string()))?;
        let data_dir = lookup("LEADDESK_DATA_DIR")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let sheet_timeout_secs = lookup("LEADDESK_SHEET_TIMEOUT_SECS")
            .unwrap_or_else(|| "20".to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidSheetTimeout(error.to_string()))?;
        if sheet_timeout_secs == 0 {
            return Err(ConfigError::InvalidSheetTimeout("must be > 0".to_string()));
        }
        let log_stdout = parse_bool(
            lookup("LEADDESK_LOG_STDOUT")
                .unwrap_or_else(|| "false".to_string())
                .as_str(),
        )
        .ok_or_else(|| ConfigError::InvalidLogStdout("expected true or false".to_string()))?;

        Ok(Self {
            bind_addr,
            data_dir,
            sheet_timeout: Duration::from_secs(sheet_timeout_secs),
            log_stdout,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("leaddesk.db")
    }

    pub fn upload_root(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};
    use std::collections::HashMap;

    fn lookup(values: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = values
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:5000");
        assert!(config.db_path().ends_with("data/leaddesk.db"));
        assert_eq!(config.sheet_timeout.as_secs(), 20);
        assert!(!config.log_stdout);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("LEADDESK_BIND_ADDR", "nowhere")])),
            Err(ConfigError::InvalidBindAddr(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("LEADDESK_SHEET_TIMEOUT_SECS", "0")])),
            Err(ConfigError::InvalidSheetTimeout(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("LEADDESK_LOG_STDOUT", "maybe")])),
            Err(ConfigError::InvalidLogStdout(_))
        ));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("LEADDESK_BIND_ADDR", "0.0.0.0:8080"),
            ("LEADDESK_DATA_DIR", "/var/lib/leaddesk"),
            ("LEADDESK_LOG_STDOUT", "yes"),
        ]))
        .expect("config");
        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.upload_root().starts_with("/var/lib/leaddesk"));
        assert!(config.log_stdout);
    }
}
