//! Control interface of the fail2ban daemon
//!
//! All access to the running daemon goes through [`ControlClient`], so the
//! free-text parsing of its output stays behind one seam.

pub mod fail2ban_client;

pub use fail2ban_client::Fail2banClient;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from invoking the control interface
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited unsuccessfully\noutput: {output}")]
    Failed { command: String, output: String },

    #[error("`{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },
}

/// Capabilities used from the daemon's control interface
#[async_trait]
pub trait ControlClient: Send + Sync {
    /// Names of the active jails, in the order the daemon reports them
    async fn list_jails(&self) -> Result<Vec<String>, ControlError>;

    /// Addresses currently banned in `jail`
    async fn banned_addresses(&self, jail: &str) -> Result<Vec<String>, ControlError>;

    /// Lift the ban on `address` in `jail`
    async fn unban(&self, jail: &str, address: &str) -> Result<(), ControlError>;

    /// Ask the daemon to re-read its configuration
    async fn reload(&self) -> Result<(), ControlError>;
}

/// Extract the jail names from `status` output
///
/// Looks for the `Jail list:` marker and splits the remainder on commas.
pub fn parse_jail_list(output: &str) -> Vec<String> {
    marker_value(output, "Jail list:")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Extract the banned addresses from `status <jail>` output
pub fn parse_ip_list(output: &str) -> Vec<String> {
    marker_value(output, "IP list:")
        .map(|raw| raw.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn marker_value<'a>(output: &'a str, marker: &str) -> Option<&'a str> {
    output
        .lines()
        .find_map(|line| line.find(marker).map(|pos| &line[pos + marker.len()..]))
}
