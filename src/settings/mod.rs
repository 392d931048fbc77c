//! Operator settings store
//!
//! Holds the single [`Settings`] value behind a reader/writer lock. Every
//! mutation is flushed to the JSON settings file and regenerates the custom
//! fail2ban action while the write lock is held.

pub mod bootstrap;
pub mod countries;

pub use bootstrap::{scan_jail_defaults, JailDefaults};
pub use countries::{AlertCountries, ALL_COUNTRIES};

use crate::action::{ActionError, ActionSynthesizer};
use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors from reading, validating or persisting settings
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Validation(String),

    #[error("Action synthesis failed: {0}")]
    Action(#[from] ActionError),
}

/// SMTP parameters for alert mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    #[serde(rename = "useTLS")]
    pub use_tls: bool,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "noreply@example.com".to_string(),
            password: String::new(),
            from: "noreply@example.com".to_string(),
            use_tls: true,
        }
    }
}

/// UI settings plus the fail2ban `[DEFAULT]` policy values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub language: String,
    pub debug: bool,
    pub reload_needed: bool,
    pub alert_countries: AlertCountries,
    pub smtp: SmtpSettings,

    pub bantime_increment: bool,
    pub ignoreip: String,
    pub bantime: String,
    pub findtime: String,
    pub maxretry: u32,
    pub destemail: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            language: "en".to_string(),
            debug: false,
            reload_needed: false,
            alert_countries: AlertCountries::All,
            smtp: SmtpSettings::default(),
            bantime_increment: false,
            ignoreip: "127.0.0.1/8 ::1".to_string(),
            bantime: "48h".to_string(),
            findtime: "30m".to_string(),
            maxretry: 3,
            destemail: "alerts@example.com".to_string(),
        }
    }
}

impl Settings {
    /// Whether any field that fail2ban must reload for differs
    pub fn policy_differs(&self, other: &Settings) -> bool {
        self.bantime_increment != other.bantime_increment
            || self.ignoreip != other.ignoreip
            || self.bantime != other.bantime
            || self.findtime != other.findtime
            || self.maxretry != other.maxretry
            || self.destemail != other.destemail
            || self.alert_countries != other.alert_countries
    }

    /// Reject values that cannot be written into fail2ban config files
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.bantime.trim().is_empty() {
            return Err(SettingsError::Validation("bantime must not be empty".into()));
        }
        if self.findtime.trim().is_empty() {
            return Err(SettingsError::Validation("findtime must not be empty".into()));
        }

        let single_line = [
            ("language", &self.language),
            ("bantime", &self.bantime),
            ("findtime", &self.findtime),
            ("ignoreip", &self.ignoreip),
            ("destemail", &self.destemail),
        ];
        for (name, value) in single_line {
            if value.contains(['\n', '\r']) {
                return Err(SettingsError::Validation(format!(
                    "{} must be a single line",
                    name
                )));
            }
        }

        let invalid = self.alert_countries.invalid_codes();
        if !invalid.is_empty() {
            return Err(SettingsError::Validation(format!(
                "invalid country codes: {}",
                invalid.join(", ")
            )));
        }

        Ok(())
    }
}

/// Process-wide settings, shared by handle
pub struct SettingsStore {
    state: RwLock<Settings>,
    settings_file: PathBuf,
    synthesizer: ActionSynthesizer,
}

impl SettingsStore {
    /// Load settings, bootstrapping them if necessary
    ///
    /// Never fails: a missing or unreadable settings file falls back to the
    /// `[DEFAULT]` section of `jail.local`, then to built-in defaults, and
    /// the result is saved. Problems are logged.
    pub fn open(config: &Config) -> Self {
        let settings_file = config.paths.settings_file.clone();
        let synthesizer = ActionSynthesizer::from_config(config);

        let settings = match load_settings(&settings_file) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!(
                    "Settings not loaded from {} ({}), initializing from {}",
                    settings_file.display(),
                    e,
                    config.paths.jail_local.display()
                );
                let settings = bootstrap_settings(&config.paths.jail_local);
                if let Err(e) = save_settings(&settings_file, &settings) {
                    log::error!("Failed to save initial settings: {}", e);
                }
                settings
            }
        };

        if let Err(e) = synthesizer.initialize(&settings.alert_countries) {
            log::error!("Error initializing fail2ban action: {}", e);
        }

        SettingsStore {
            state: RwLock::new(settings),
            settings_file,
            synthesizer,
        }
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings
    ///
    /// `reload_needed` is forced on when a policy field changed and is
    /// otherwise never cleared here. On a persistence error the new value
    /// is already in effect.
    pub fn update(&self, new: Settings) -> Result<Settings, SettingsError> {
        let mut new = new;
        new.alert_countries = new.alert_countries.normalized();
        new.validate()?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        log::debug!("Locked settings for update");

        if state.policy_differs(&new) {
            new.reload_needed = true;
        } else {
            new.reload_needed = new.reload_needed || state.reload_needed;
        }

        *state = new;
        log::debug!(
            "New settings applied (reload needed: {})",
            state.reload_needed
        );

        if let Err(e) = self.persist(&state) {
            log::error!("Error saving settings: {}", e);
            return Err(e);
        }
        log::info!("Settings saved to {}", self.settings_file.display());
        Ok(state.clone())
    }

    /// Replace the settings from an inbound JSON payload
    pub fn update_from_json(&self, payload: &str) -> Result<Settings, SettingsError> {
        let new: Settings = serde_json::from_str(payload)
            .map_err(|e| SettingsError::Validation(e.to_string()))?;
        self.update(new)
    }

    /// Acknowledge that fail2ban has been reloaded
    pub fn mark_reload_done(&self) -> Result<(), SettingsError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.reload_needed = false;
        self.persist(&state)
    }

    /// Write the settings file and regenerate the action
    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        let saved = save_settings(&self.settings_file, settings);
        let synthesized = self.synthesizer.synchronize(&settings.alert_countries);
        saved?;
        synthesized?;
        Ok(())
    }
}

fn load_settings(path: &Path) -> Result<Settings, SettingsError> {
    log::debug!("Loading settings from {}", path.display());
    let data = std::fs::read_to_string(path)?;
    let mut settings: Settings = serde_json::from_str(&data)?;
    settings.alert_countries = settings.alert_countries.normalized();
    Ok(settings)
}

fn save_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let json = serde_json::to_string_pretty(settings)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}

fn bootstrap_settings(jail_local: &Path) -> Settings {
    let mut settings = Settings::default();
    match std::fs::read_to_string(jail_local) {
        Ok(text) => scan_jail_defaults(&text).apply(&mut settings),
        Err(e) => log::warn!("Error reading {}: {}", jail_local.display(), e),
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_in(dir: &Path) -> (Config, SettingsStore) {
        let config = Config::rooted_at(dir);
        let store = SettingsStore::open(&config);
        (config, store)
    }

    #[test]
    fn test_bootstrap_defaults_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = store_in(dir.path());

        assert_eq!(store.get(), Settings::default());
        assert!(config.paths.settings_file.exists());
        assert!(config.paths.action_file.exists());
        assert!(config.paths.jail_defaults_file.exists());
    }

    #[test]
    fn test_bootstrap_from_jail_local() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("jail.local"),
            "[DEFAULT]\nbantime = 2h\nmaxretry = 7\naction = %(action_mw)s\n",
        )
        .unwrap();

        let (config, store) = store_in(dir.path());
        let settings = store.get();
        assert_eq!(settings.bantime, "2h");
        assert_eq!(settings.maxretry, 7);
        assert_eq!(settings.findtime, "30m");

        let jail_local = fs::read_to_string(&config.paths.jail_local).unwrap();
        assert!(jail_local.contains("action = %(action_mwlg)s"));
    }

    #[test]
    fn test_load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("jailwarden-settings.json"),
            r#"{"language":"de","reloadNeeded":true,"alertCountries":["CH"],"maxretry":4}"#,
        )
        .unwrap();

        let (_, store) = store_in(dir.path());
        let settings = store.get();
        assert_eq!(settings.language, "de");
        assert!(settings.reload_needed);
        assert_eq!(settings.maxretry, 4);
        assert_eq!(settings.alert_countries, AlertCountries::from_codes(["CH"]));
        assert_eq!(settings.bantime, "48h");
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("jailwarden-settings.json"), "{ not json").unwrap();

        let (config, store) = store_in(dir.path());
        assert_eq!(store.get(), Settings::default());

        let rewritten = fs::read_to_string(&config.paths.settings_file).unwrap();
        assert!(serde_json::from_str::<Settings>(&rewritten).is_ok());
    }

    #[test]
    fn test_policy_change_marks_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store_in(dir.path());

        let mut new = store.get();
        new.maxretry = 10;
        let applied = store.update(new).unwrap();
        assert!(applied.reload_needed);
        assert!(store.get().reload_needed);
    }

    #[test]
    fn test_cosmetic_change_keeps_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store_in(dir.path());

        let mut new = store.get();
        new.language = "fr".to_string();
        assert!(!store.update(new).unwrap().reload_needed);

        let mut new = store.get();
        new.bantime = "1d".to_string();
        store.update(new).unwrap();

        // identical policy, stale client copy with the flag unset
        let mut new = store.get();
        new.reload_needed = false;
        new.debug = true;
        assert!(store.update(new.clone()).unwrap().reload_needed);
        assert!(store.update(new).unwrap().reload_needed);
    }

    #[test]
    fn test_country_order_does_not_mark_reload() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store_in(dir.path());

        let mut new = store.get();
        new.alert_countries = AlertCountries::from_codes(["CH", "DE"]);
        assert!(store.update(new).unwrap().reload_needed);
        store.mark_reload_done().unwrap();

        let mut new = store.get();
        new.alert_countries = AlertCountries::from_codes(["DE", "CH"]);
        assert!(!store.update(new).unwrap().reload_needed);
    }

    #[test]
    fn test_empty_countries_normalize_to_all() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = store_in(dir.path());

        let mut new = store.get();
        new.alert_countries = AlertCountries::from_codes(["CH"]);
        store.update(new).unwrap();

        let mut new = store.get();
        new.alert_countries = AlertCountries::Only(Default::default());
        let applied = store.update(new).unwrap();
        assert_eq!(applied.alert_countries, AlertCountries::All);

        let persisted = fs::read_to_string(&config.paths.settings_file).unwrap();
        assert!(persisted.contains("\"ALL\""));
    }

    #[test]
    fn test_sentinel_inside_set_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = store_in(dir.path());

        let mut new = store.get();
        new.alert_countries = AlertCountries::Only(
            ["ALL", "CH"].iter().map(|c| c.to_string()).collect(),
        );
        let applied = store.update(new).unwrap();
        assert_eq!(applied.alert_countries, AlertCountries::All);

        let action = fs::read_to_string(&config.paths.action_file).unwrap();
        assert!(!action.contains("geoiplookup"));
    }

    #[test]
    fn test_mark_reload_done() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = store_in(dir.path());

        let mut new = store.get();
        new.findtime = "5m".to_string();
        store.update(new).unwrap();

        store.mark_reload_done().unwrap();
        assert!(!store.get().reload_needed);

        let persisted: Settings =
            serde_json::from_str(&fs::read_to_string(&config.paths.settings_file).unwrap())
                .unwrap();
        assert!(!persisted.reload_needed);
        assert_eq!(persisted.findtime, "5m");
    }

    #[test]
    fn test_update_from_json_validation() {
        let dir = tempfile::tempdir().unwrap();
        let (_, store) = store_in(dir.path());
        let before = store.get();

        let result = store.update_from_json(r#"{"maxretry": -1}"#);
        assert!(matches!(result, Err(SettingsError::Validation(_))));

        let result = store.update_from_json(r#"{"bantime": "1h\naction = evil"}"#);
        assert!(matches!(result, Err(SettingsError::Validation(_))));

        let result = store.update_from_json(r#"{"alertCountries": ["CHE"]}"#);
        assert!(matches!(result, Err(SettingsError::Validation(_))));

        assert_eq!(store.get(), before);

        let applied = store.update_from_json(r#"{"alertCountries": ["ch", "de"]}"#).unwrap();
        assert_eq!(applied.alert_countries.codes(), vec!["CH", "DE"]);
    }

    #[test]
    fn test_persistence_failure_still_applies() {
        let dir = tempfile::tempdir().unwrap();
        let (mut config, _) = store_in(dir.path());

        // settings file path is a directory, so writing it fails
        config.paths.settings_file = dir.path().to_path_buf();
        let store = SettingsStore::open(&config);

        let mut new = store.get();
        new.bantime = "3h".to_string();
        assert!(store.update(new).is_err());
        assert_eq!(store.get().bantime, "3h");
        assert!(store.get().reload_needed);
    }

    #[test]
    fn test_update_regenerates_action() {
        let dir = tempfile::tempdir().unwrap();
        let (config, store) = store_in(dir.path());

        let mut new = store.get();
        new.alert_countries = AlertCountries::from_codes(["CH"]);
        store.update(new).unwrap();

        let action = fs::read_to_string(&config.paths.action_file).unwrap();
        assert!(action.contains("alertcountries = CH"));
    }

    #[test]
    fn test_concurrent_updates_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        let (_config, store) = store_in(dir.path());
        store.mark_reload_done().unwrap();

        let policies = [("48h", "30m"), ("1h", "10m"), ("2h", "20m")];

        std::thread::scope(|scope| {
            for writer in 0..2usize {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..20 {
                        let (bantime, findtime) = policies[1 + (writer + i) % 2];
                        let mut new = store.get();
                        new.bantime = bantime.to_string();
                        new.findtime = findtime.to_string();
                        new.reload_needed = false;
                        store.update(new).unwrap();
                    }
                });
            }

            for _ in 0..2 {
                let store = &store;
                scope.spawn(move || {
                    let mut seen_reload = false;
                    for _ in 0..200 {
                        let snapshot = store.get();
                        assert!(
                            policies
                                .iter()
                                .any(|&(b, f)| snapshot.bantime == b && snapshot.findtime == f),
                            "torn snapshot: {} / {}",
                            snapshot.bantime,
                            snapshot.findtime
                        );

                        if seen_reload {
                            assert!(snapshot.reload_needed);
                        }
                        seen_reload |= snapshot.reload_needed;
                    }
                });
            }
        });

        assert!(store.get().reload_needed);
        store.mark_reload_done().unwrap();
        assert!(!store.get().reload_needed);
    }
}
