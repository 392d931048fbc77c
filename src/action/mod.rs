//! Custom fail2ban action synthesis
//!
//! Renders the action definition that reports bans back to us, gated on the
//! alert countries, and wires it into fail2ban:
//!
//! - the action file itself, rewritten on every settings change
//! - a jail defaults side-car declaring the `action_mwlg` chain, created once
//! - the `[DEFAULT]` action directive of `jail.local`, patched once

use crate::config::Config;
use crate::settings::AlertCountries;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Marks `jail.local` as already redirected to our action chain
pub const PATCH_MARKER: &str = "# Custom Fail2Ban action applied by jailwarden";

/// Shared prefix of the marker, also written by other fail2ban front ends
const PATCH_MARKER_PREFIX: &str = "# Custom Fail2Ban action applied";

/// Action chain declared in the jail defaults side-car
pub const ACTION_CHAIN: &str = "action_mwlg";

/// Errors from writing fail2ban configuration
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of patching the default action directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// The directive was commented out and replaced
    Rewritten(String),
    /// The marker is present; nothing to do
    AlreadyPatched,
    /// No `action = %(...)s` directive in the default section
    NoDirective,
}

/// Outcome of [`ActionSynthesizer::patch_jail_local`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Patched,
    AlreadyPatched,
    NoDirective,
}

/// Render the action definition for `countries`
///
/// Pure and deterministic: countries are emitted in sorted order.
pub fn render_action(countries: &AlertCountries, callback_url: &str) -> String {
    let actionban = if countries.is_all() {
        "actionban = <_notify>".to_string()
    } else {
        [
            r#"actionban = country="$(geoiplookup <ip> | sed -n 's/^GeoIP Country Edition: \([A-Z][A-Z]\),.*/\1/p' | head -n 1)""#,
            r#"            case ",<alertcountries>," in"#,
            r#"              *",$country,"*) <_notify> ;;"#,
            r#"              *) logger -t jailwarden "ban of <ip> in <name> not reported (country ${country:-unknown})" ;;"#,
            r#"            esac"#,
        ]
        .join("\n")
    };

    format!(
        r#"[INCLUDES]

before = sendmail-common.conf
         mail-whois-common.conf
         helpers-common.conf

[Definition]

# Bypass ban/unban for restored tickets
norestored = 1

actionstart =
actionstop =
actioncheck =
actionunban =

# Reports a ban to jailwarden as JSON
_notify = /usr/bin/curl -s -X POST <callback> \
     -H "Content-Type: application/json" \
     -d "$(jq -n --arg ip '<ip>' \
                 --arg jail '<name>' \
                 --arg hostname '<fq-hostname>' \
                 --arg failures '<failures>' \
                 --arg whois "$(whois <ip> || echo 'missing whois program')" \
                 --arg logs "$(tac <logpath> | grep <grepopts> -wF <ip>)" \
                 '{{ip: $ip, jail: $jail, hostname: $hostname, failures: $failures, whois: $whois, logs: $logs}}')"

{actionban}

[Init]

# Default name of the chain
name = default

# Comma separated ISO codes, ALL for every country
alertcountries = {countries}

callback = {callback_url}

# Path to log files containing relevant lines for the abuser IP
logpath = /dev/null

# Number of log lines to include in the report
grepmax = 1000
grepopts = -m <grepmax>
"#,
        actionban = actionban,
        countries = countries.codes().join(","),
        callback_url = callback_url,
    )
}

/// Render the jail defaults side-car declaring the action chain
pub fn render_jail_defaults(action_name: &str) -> String {
    format!(
        r#"[DEFAULT]
# Custom Fail2Ban action using geo-filter for alerts

{chain} = %(action_)s
             {action}[sender="%(sender)s", dest="%(destemail)s", logpath="%(logpath)s", chain="%(chain)s"]
"#,
        chain = ACTION_CHAIN,
        action = action_name,
    )
}

/// Redirect the default-section action directive to [`ACTION_CHAIN`]
///
/// Only the first `action = %(...)s` line of the default scope is replaced.
/// Text carrying a patch marker, ours or a sibling tool's, is left alone.
pub fn patch_default_action(text: &str) -> Patch {
    if text.lines().any(|line| line.trim_start().starts_with(PATCH_MARKER_PREFIX)) {
        return Patch::AlreadyPatched;
    }

    let mut in_default = true;
    let mut patched = false;
    let mut out = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && trimmed.ends_with(']') {
            in_default = trimmed[1..trimmed.len() - 1].trim() == "DEFAULT";
        } else if in_default && !patched && is_action_directive(trimmed) {
            out.push(format!("# {}", line));
            out.push(PATCH_MARKER.to_string());
            out.push(format!("action = %({})s", ACTION_CHAIN));
            patched = true;
            continue;
        }
        out.push(line.to_string());
    }

    if !patched {
        return Patch::NoDirective;
    }

    let mut rewritten = out.join("\n");
    if text.ends_with('\n') {
        rewritten.push('\n');
    }
    Patch::Rewritten(rewritten)
}

fn is_action_directive(trimmed: &str) -> bool {
    match trimmed.split_once('=') {
        Some((key, value)) => key.trim() == "action" && value.trim_start().starts_with('%'),
        None => false,
    }
}

/// Writes the custom action and the files that reference it
#[derive(Debug, Clone)]
pub struct ActionSynthesizer {
    action_file: PathBuf,
    jail_defaults_file: PathBuf,
    jail_local: PathBuf,
    callback_url: String,
}

impl ActionSynthesizer {
    pub fn from_config(config: &Config) -> Self {
        ActionSynthesizer {
            action_file: config.paths.action_file.clone(),
            jail_defaults_file: config.paths.jail_defaults_file.clone(),
            jail_local: config.paths.jail_local.clone(),
            callback_url: config.callback.url.clone(),
        }
    }

    /// Name fail2ban knows the action by (the action file's stem)
    pub fn action_name(&self) -> String {
        self.action_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ui-custom-action".to_string())
    }

    /// One-time setup at startup
    ///
    /// A missing or unpatchable `jail.local` is only logged; the remaining
    /// steps run regardless.
    pub fn initialize(&self, countries: &AlertCountries) -> Result<(), ActionError> {
        match self.patch_jail_local() {
            Ok(PatchOutcome::Patched) => {
                log::info!("Redirected default action in {}", self.jail_local.display())
            }
            Ok(PatchOutcome::AlreadyPatched) => {
                log::debug!("{} already uses the custom action", self.jail_local.display())
            }
            Ok(PatchOutcome::NoDirective) => log::warn!(
                "No default action directive in {}, leaving it untouched",
                self.jail_local.display()
            ),
            Err(e) => log::warn!("Error setting up custom action in jail.local: {}", e),
        }
        self.synchronize(countries)
    }

    /// Ensure the side-car exists and rewrite the action file
    pub fn synchronize(&self, countries: &AlertCountries) -> Result<(), ActionError> {
        self.ensure_jail_defaults()?;
        self.write_action(countries)
    }

    /// Rewrite the action file for `countries`
    pub fn write_action(&self, countries: &AlertCountries) -> Result<(), ActionError> {
        write_file(&self.action_file, &render_action(countries, &self.callback_url))?;
        log::debug!("Custom action written to {}", self.action_file.display());
        Ok(())
    }

    /// Create the jail defaults side-car unless it already exists
    ///
    /// Returns whether the file was created.
    pub fn ensure_jail_defaults(&self) -> Result<bool, ActionError> {
        if self.jail_defaults_file.exists() {
            log::debug!("Custom jail.d configuration already exists");
            return Ok(false);
        }
        write_file(&self.jail_defaults_file, &render_jail_defaults(&self.action_name()))?;
        log::info!(
            "Created custom jail.d configuration at {}",
            self.jail_defaults_file.display()
        );
        Ok(true)
    }

    /// Patch the default action directive of `jail.local` in place
    pub fn patch_jail_local(&self) -> Result<PatchOutcome, ActionError> {
        let text = fs::read_to_string(&self.jail_local).map_err(|source| ActionError::Read {
            path: self.jail_local.clone(),
            source,
        })?;

        match patch_default_action(&text) {
            Patch::Rewritten(new_text) => {
                write_file(&self.jail_local, &new_text)?;
                Ok(PatchOutcome::Patched)
            }
            Patch::AlreadyPatched => Ok(PatchOutcome::AlreadyPatched),
            Patch::NoDirective => Ok(PatchOutcome::NoDirective),
        }
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ActionError> {
    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    };
    write().map_err(|source| ActionError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK: &str = "http://127.0.0.1:8080/api/ban";

    fn synthesizer(root: &Path) -> ActionSynthesizer {
        ActionSynthesizer::from_config(&Config::rooted_at(root))
    }

    #[test]
    fn test_render_all_countries() {
        let text = render_action(&AlertCountries::All, CALLBACK);
        assert!(text.contains("actionban = <_notify>"));
        assert!(text.contains("alertcountries = ALL"));
        assert!(text.contains("norestored = 1"));
        assert!(text.contains("logpath = /dev/null"));
        assert!(text.contains(&format!("callback = {}", CALLBACK)));
        assert!(!text.contains("geoiplookup"));
    }

    #[test]
    fn test_render_country_guard() {
        let text = render_action(&AlertCountries::from_codes(["DE", "CH"]), CALLBACK);
        assert!(text.contains("alertcountries = CH,DE"));
        assert!(text.contains("geoiplookup <ip>"));
        assert!(text.contains(r#"*",$country,"*) <_notify> ;;"#));
        assert!(text.contains("logger -t jailwarden"));
    }

    #[test]
    fn test_render_sentinel_in_set_matches_everything() {
        let set = ["ALL", "CH"].iter().map(|c| c.to_string()).collect();
        let text = render_action(&AlertCountries::Only(set), CALLBACK);
        assert!(text.contains("actionban = <_notify>"));
        assert!(text.contains("alertcountries = ALL\n"));
        assert!(!text.contains("geoiplookup"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let a = render_action(&AlertCountries::from_codes(["US", "CH", "DE"]), CALLBACK);
        let b = render_action(&AlertCountries::from_codes(["DE", "US", "CH"]), CALLBACK);
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_jail_defaults() {
        let text = render_jail_defaults("ui-custom-action");
        assert!(text.starts_with("[DEFAULT]"));
        assert!(text.contains("action_mwlg = %(action_)s"));
        assert!(text.contains("ui-custom-action[sender="));
    }

    #[test]
    fn test_patch_default_action() {
        let text = "[DEFAULT]\nbantime = 1h\naction = %(action_mw)s\n\n[sshd]\nenabled = true\n";
        let Patch::Rewritten(patched) = patch_default_action(text) else {
            panic!("expected a rewrite");
        };
        assert_eq!(
            patched,
            format!(
                "[DEFAULT]\nbantime = 1h\n# action = %(action_mw)s\n{}\naction = %(action_mwlg)s\n\n[sshd]\nenabled = true\n",
                PATCH_MARKER
            )
        );

        assert_eq!(patch_default_action(&patched), Patch::AlreadyPatched);
    }

    #[test]
    fn test_patch_recognizes_foreign_marker() {
        let text = "[DEFAULT]\n# action = %(action_mw)s\n# Custom Fail2Ban action applied by fail2ban-ui\naction = %(action_mwlg)s\n";
        assert_eq!(patch_default_action(text), Patch::AlreadyPatched);
    }

    #[test]
    fn test_patch_ignores_jail_sections() {
        let text = "[DEFAULT]\nbantime = 1h\n\n[sshd]\naction = %(action_mw)s\n";
        assert_eq!(patch_default_action(text), Patch::NoDirective);
        assert_eq!(patch_default_action(""), Patch::NoDirective);
    }

    #[test]
    fn test_patch_only_first_directive() {
        let text = "[DEFAULT]\naction = %(action_)s\naction = %(action_mw)s";
        let Patch::Rewritten(patched) = patch_default_action(text) else {
            panic!("expected a rewrite");
        };
        assert_eq!(patched.matches(PATCH_MARKER).count(), 1);
        assert!(patched.ends_with("action = %(action_mw)s"));
    }

    #[test]
    fn test_ensure_jail_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let synth = synthesizer(dir.path());

        assert!(synth.ensure_jail_defaults().unwrap());
        let path = dir.path().join("jail.d").join("ui-custom-action.conf");
        fs::write(&path, "[DEFAULT]\n# operator edit\n").unwrap();

        assert!(!synth.ensure_jail_defaults().unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[DEFAULT]\n# operator edit\n");
    }

    #[test]
    fn test_patch_jail_local_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let jail_local = dir.path().join("jail.local");
        fs::write(&jail_local, "[DEFAULT]\naction = %(action_)s\n").unwrap();
        let synth = synthesizer(dir.path());

        assert_eq!(synth.patch_jail_local().unwrap(), PatchOutcome::Patched);
        let once = fs::read_to_string(&jail_local).unwrap();
        assert_eq!(synth.patch_jail_local().unwrap(), PatchOutcome::AlreadyPatched);
        assert_eq!(fs::read_to_string(&jail_local).unwrap(), once);
    }

    #[test]
    fn test_patch_missing_jail_local() {
        let dir = tempfile::tempdir().unwrap();
        let result = synthesizer(dir.path()).patch_jail_local();
        assert!(matches!(result, Err(ActionError::Read { .. })));
    }

    #[test]
    fn test_initialize_without_jail_local() {
        let dir = tempfile::tempdir().unwrap();
        let synth = synthesizer(dir.path());
        synth.initialize(&AlertCountries::All).unwrap();

        let action = fs::read_to_string(dir.path().join("action.d/ui-custom-action.conf")).unwrap();
        assert_eq!(action, render_action(&AlertCountries::All, CALLBACK));
        assert!(!dir.path().join("jail.local").exists());
    }

    #[test]
    fn test_write_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("action.d");
        fs::write(&blocker, "not a directory").unwrap();

        let result = synthesizer(dir.path()).write_action(&AlertCountries::All);
        assert!(matches!(result, Err(ActionError::Write { .. })));
    }
}
