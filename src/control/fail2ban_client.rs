//! `fail2ban-client` backed implementation of the control interface

use super::{parse_ip_list, parse_jail_list, ControlClient, ControlError};
use crate::config::ClientConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Runs the daemon's control binary, one short-lived process per call
#[derive(Debug, Clone)]
pub struct Fail2banClient {
    binary: String,
    timeout: Duration,
}

impl Fail2banClient {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Fail2banClient {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.binary.clone(), config.timeout())
    }

    /// Run the binary with `args` and return its combined output
    ///
    /// A non-zero exit is an error carrying that output. The child is
    /// killed if the timeout expires.
    async fn run(&self, args: &[&str]) -> Result<String, ControlError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        log::debug!("Running {}", command);

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(ControlError::Spawn { command, source }),
            Err(_) => {
                return Err(ControlError::Timeout {
                    command,
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(ControlError::Failed {
                command,
                output: combined,
            });
        }

        Ok(combined)
    }
}

#[async_trait]
impl ControlClient for Fail2banClient {
    async fn list_jails(&self) -> Result<Vec<String>, ControlError> {
        let out = self.run(&["status"]).await?;
        Ok(parse_jail_list(&out))
    }

    async fn banned_addresses(&self, jail: &str) -> Result<Vec<String>, ControlError> {
        let out = self.run(&["status", jail]).await?;
        Ok(parse_ip_list(&out))
    }

    async fn unban(&self, jail: &str, address: &str) -> Result<(), ControlError> {
        self.run(&["set", jail, "unbanip", address]).await?;
        log::info!("Unbanned {} from jail {}", address, jail);
        Ok(())
    }

    async fn reload(&self) -> Result<(), ControlError> {
        self.run(&["reload"]).await?;
        log::info!("fail2ban configuration reloaded");
        Ok(())
    }
}
