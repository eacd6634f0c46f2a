use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Socket address for the SSH listener (e.g. `0.0.0.0:2222`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Root of the data directory (repositories, key files, tables).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            ssh: SshConfig::default(),
            log: LogConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:2222".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

// ---------------------------------------------------------------------------
// SSH transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Seconds of inactivity before a connection is dropped.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout: u64,
    /// Delay (milliseconds) applied after a rejected authentication attempt.
    #[serde(default = "default_auth_rejection_time_ms")]
    pub auth_rejection_time_ms: u64,
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: default_inactivity_timeout(),
            auth_rejection_time_ms: default_auth_rejection_time_ms(),
            max_auth_attempts: default_max_auth_attempts(),
        }
    }
}

fn default_inactivity_timeout() -> u64 {
    600
}

fn default_auth_rejection_time_ms() -> u64 {
    1000
}

fn default_max_auth_attempts() -> usize {
    3
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

impl Config {
    /// Apply command-line / environment overrides on top of the file values.
    ///
    /// `port` may be a bare port number (bound on all interfaces) or a full
    /// socket address.
    pub fn apply_overrides(&mut self, port: Option<&str>, data_dir: Option<&Path>) {
        if let Some(port) = port {
            self.listen = match port.parse::<u16>() {
                Ok(port) => format!("0.0.0.0:{port}"),
                Err(_) => port.to_string(),
            };
        }
        if let Some(dir) = data_dir {
            self.data_dir = dir.to_path_buf();
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("invalid listen address: {:?}", self.listen))
    }
}

/// Load a [`Config`] from an optional YAML file, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Basic sanity checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    config.listen_addr()?;
    anyhow::ensure!(
        !config.data_dir.as_os_str().is_empty(),
        "data_dir must not be empty"
    );
    anyhow::ensure!(
        config.ssh.max_auth_attempts > 0,
        "ssh.max_auth_attempts must be at least 1"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.listen, "0.0.0.0:2222");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.ssh.inactivity_timeout, 600);
        assert_eq!(config.log.format, LogFormat::Json);
        validate_config(&config).unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(
            &path,
            "data_dir: /srv/git\nssh:\n  max_auth_attempts: 5\nlog:\n  format: pretty\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/git"));
        assert_eq!(config.ssh.max_auth_attempts, 5);
        assert_eq!(config.ssh.auth_rejection_time_ms, 1000);
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.listen, "0.0.0.0:2222");
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&tmp.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn bare_port_override_binds_all_interfaces() {
        let mut config = Config::default();
        config.apply_overrides(Some("2022"), Some(Path::new("/var/lib/gitgate")));
        assert_eq!(config.listen, "0.0.0.0:2022");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/gitgate"));

        config.apply_overrides(Some("127.0.0.1:2200"), None);
        assert_eq!(config.listen, "127.0.0.1:2200");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/gitgate"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.listen = "not-an-address".into();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.ssh.max_auth_attempts = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.data_dir = PathBuf::new();
        assert!(validate_config(&config).is_err());
    }
}
