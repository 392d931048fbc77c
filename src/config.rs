use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for jailwarden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Locations of the fail2ban files we read and rewrite
    pub paths: PathsConfig,
    /// Control client configuration
    pub client: ClientConfig,
    /// Ban callback configuration
    pub callback: CallbackConfig,
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Persisted operator settings (JSON)
    pub settings_file: PathBuf,
    /// Primary jail file holding the [DEFAULT] section
    pub jail_local: PathBuf,
    /// Directory of secondary jail files
    pub jail_d_dir: PathBuf,
    /// Side-car jail defaults file declaring the custom action chain
    pub jail_defaults_file: PathBuf,
    /// Synthesized action definition
    pub action_file: PathBuf,
    /// Directory of filter definitions
    pub filter_dir: PathBuf,
    /// fail2ban log file
    pub ban_log: PathBuf,
}

/// Control client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Control binary, resolved through PATH if not absolute
    pub binary: String,
    /// Per-command timeout in seconds
    pub timeout_secs: u64,
}

/// Ban callback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Endpoint the synthesized action posts ban notifications to
    pub url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            paths: PathsConfig {
                settings_file: PathBuf::from("jailwarden-settings.json"),
                jail_local: PathBuf::from("/etc/fail2ban/jail.local"),
                jail_d_dir: PathBuf::from("/etc/fail2ban/jail.d"),
                jail_defaults_file: PathBuf::from("/etc/fail2ban/jail.d/ui-custom-action.conf"),
                action_file: PathBuf::from("/etc/fail2ban/action.d/ui-custom-action.conf"),
                filter_dir: PathBuf::from("/etc/fail2ban/filter.d"),
                ban_log: PathBuf::from("/var/log/fail2ban.log"),
            },
            client: ClientConfig {
                binary: "fail2ban-client".to_string(),
                timeout_secs: 5,
            },
            callback: CallbackConfig {
                url: "http://127.0.0.1:8080/api/ban".to_string(),
            },
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Configuration rooted in a scratch directory, used by tests
    #[cfg(test)]
    pub(crate) fn rooted_at(root: &std::path::Path) -> Self {
        let mut config = Config::default();
        config.paths = PathsConfig {
            settings_file: root.join("jailwarden-settings.json"),
            jail_local: root.join("jail.local"),
            jail_d_dir: root.join("jail.d"),
            jail_defaults_file: root.join("jail.d").join("ui-custom-action.conf"),
            action_file: root.join("action.d").join("ui-custom-action.conf"),
            filter_dir: root.join("filter.d"),
            ban_log: root.join("fail2ban.log"),
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jailwarden.toml");

        let mut config = Config::default();
        config.client.timeout_secs = 9;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.client.timeout_secs, 9);
        assert_eq!(loaded.client.binary, "fail2ban-client");
        assert_eq!(loaded.paths.ban_log, PathBuf::from("/var/log/fail2ban.log"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = Config::from_file(&PathBuf::from("/nonexistent/jailwarden.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_timeout_duration() {
        assert_eq!(Config::default().client.timeout(), Duration::from_secs(5));
    }
}
