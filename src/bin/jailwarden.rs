use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

use jailwarden::action::render_action;
use jailwarden::config::Config;
use jailwarden::settings::{AlertCountries, Settings};
use jailwarden::{Fail2banClient, FilterStore, JailFiles, JailStatusAggregator, SettingsStore};

/// fail2ban management command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "jailwarden", about = "Manage fail2ban jails, bans and alert settings")]
struct Opt {
    /// Path to configuration file
    #[structopt(short, long, default_value = "jailwarden.toml")]
    config: PathBuf,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(StructOpt, Debug)]
enum Cmd {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "jailwarden.toml")]
        output: PathBuf,
    },
    /// Show active jails and the most recent bans
    Summary,
    /// Lift a ban
    Unban { jail: String, ip: String },
    /// Reload fail2ban and clear the pending-reload flag
    Reload,
    /// Inspect or change settings
    Settings(SettingsCmd),
    /// Inspect or toggle jail definitions
    Jails(JailsCmd),
    /// Inspect or replace filter definitions
    Filter(FilterCmd),
    /// Print the action file for the current alert countries
    RenderAction,
}

#[derive(StructOpt, Debug)]
enum SettingsCmd {
    /// Print the current settings as JSON
    Show,
    /// Replace the settings with a JSON document
    Apply { payload: String },
    /// Set the alert countries (ISO codes, or ALL)
    Countries { codes: Vec<String> },
}

#[derive(StructOpt, Debug)]
enum JailsCmd {
    /// List declared jails
    List,
    /// Set enabled flags, e.g. `sshd=true nginx-401=false`
    Set { assignments: Vec<String> },
}

#[derive(StructOpt, Debug)]
enum FilterCmd {
    /// List the available filters
    List,
    /// Print a jail's filter definition
    Show { jail: String },
    /// Replace a jail's filter definition with the contents of a file
    Set { jail: String, file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let config = if opt.config.exists() {
        Config::from_file(&opt.config)?
    } else {
        Config::default()
    };

    let level = if persisted_debug(&config) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    if !opt.config.exists() {
        log::warn!("Config file {:?} not found, using defaults", opt.config);
    }

    let aggregator = || {
        JailStatusAggregator::new(Arc::new(Fail2banClient::from_config(&config.client)))
    };

    match opt.cmd {
        Cmd::Config { output } => {
            Config::default().to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cmd::Summary => {
            let summary = aggregator().summary(&config.paths.ban_log).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Cmd::Unban { jail, ip } => {
            aggregator().unban(&jail, &ip).await?;
            println!("{} unbanned from jail {}", ip, jail);
        }
        Cmd::Reload => {
            let store = SettingsStore::open(&config);
            aggregator().reload_and_acknowledge(&store).await?;
            println!("fail2ban reloaded");
        }
        Cmd::Settings(cmd) => {
            let store = SettingsStore::open(&config);
            let settings = match cmd {
                SettingsCmd::Show => store.get(),
                SettingsCmd::Apply { payload } => store.update_from_json(&payload)?,
                SettingsCmd::Countries { codes } => {
                    let mut new = store.get();
                    new.alert_countries = AlertCountries::from_codes(codes);
                    store.update(new)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if settings.reload_needed {
                eprintln!("fail2ban reload needed to apply changes");
            }
        }
        Cmd::Jails(JailsCmd::List) => {
            let jails = JailFiles::from_config(&config).list_jails()?;
            println!("{}", serde_json::to_string_pretty(&jails)?);
        }
        Cmd::Jails(JailsCmd::Set { assignments }) => {
            let updates = parse_assignments(&assignments)?;
            JailFiles::from_config(&config).apply_enabled_updates(&updates)?;
            println!("Updated {} jail(s); reload fail2ban to apply", updates.len());
        }
        Cmd::Filter(FilterCmd::List) => {
            for name in FilterStore::from_config(&config).list()? {
                println!("{}", name);
            }
        }
        Cmd::Filter(FilterCmd::Show { jail }) => {
            print!("{}", FilterStore::from_config(&config).get(&jail)?);
        }
        Cmd::Filter(FilterCmd::Set { jail, file }) => {
            let content = std::fs::read_to_string(&file)?;
            FilterStore::from_config(&config).set(&jail, &content)?;
        }
        Cmd::RenderAction => {
            let store = SettingsStore::open(&config);
            print!("{}", render_action(&store.get().alert_countries, &config.callback.url));
        }
    }

    Ok(())
}

/// Debug flag of the saved settings, without bootstrapping them
fn persisted_debug(config: &Config) -> bool {
    std::fs::read_to_string(&config.paths.settings_file)
        .ok()
        .and_then(|text| serde_json::from_str::<Settings>(&text).ok())
        .map_or(false, |settings| settings.debug)
}

fn parse_assignments(assignments: &[String]) -> Result<HashMap<String, bool>, String> {
    assignments
        .iter()
        .map(|a| {
            let (jail, value) = a
                .split_once('=')
                .ok_or_else(|| format!("expected <jail>=<true|false>, got {:?}", a))?;
            let enabled = value
                .trim()
                .parse::<bool>()
                .map_err(|_| format!("invalid flag for {}: {:?}", jail, value))?;
            Ok((jail.trim().to_string(), enabled))
        })
        .collect()
}
