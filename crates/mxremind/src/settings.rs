//! Configuration loading: YAML file plus `MXREMIND_*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;
use mxremind_core::{Config, Security, ServerConfig};
use tracing::{info, warn};

/// Prefix of environment overrides, e.g. `MXREMIND_DATABASE_URL`.
const ENV_PREFIX: &str = "MXREMIND_";

/// Config file looked up in the working directory when none is given.
const DEFAULT_FILE: &str = "mxremind.yaml";

/// `MXREMIND_CONFIG` names the config file and is read by the CLI parser.
const FILE_KEY: &str = "config";

/// Loads the configuration from `path`, or `./mxremind.yaml` if present,
/// then applies environment overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => {
            let path = PathBuf::from(DEFAULT_FILE);
            if path.exists() {
                read_file(&path)?
            } else {
                info!("No config file found");
                Config::default()
            }
        }
    };
    apply_env(&mut config, std::env::vars())?;
    Ok(config)
}

fn read_file(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    info!("Using config file: {}", path.display());
    Ok(config)
}

/// Applies every `MXREMIND_<SECTION>_<KEY>` variable to `config`.
///
/// Unknown keys are logged and ignored; malformed values are errors.
pub fn apply_env<I>(config: &mut Config, vars: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, value) in vars {
        let Some(key) = setting_key(&name) else {
            continue;
        };
        set(config, &key, &value).with_context(|| format!("invalid value for {name}"))?;
    }
    Ok(())
}

/// Lowercase setting key of an override variable, or `None` if the variable
/// isn't a setting.
fn setting_key(name: &str) -> Option<String> {
    let key = name.strip_prefix(ENV_PREFIX)?.to_ascii_lowercase();
    (key != FILE_KEY).then_some(key)
}

fn set(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "timezone" => config.timezone = value.parse::<Tz>().map_err(|e| anyhow!("{e}"))?,
        "fetch_interval" => config.fetch_interval = value.parse()?,
        "send_interval" => config.send_interval = value.parse()?,
        "max_messages" => config.max_messages = value.parse()?,
        "mailbox_inbound" => config.mailbox.inbound = value.to_string(),
        "mailbox_processed" => config.mailbox.processed = value.to_string(),
        "database_url" => config.database.url = value.to_string(),
        "database_migrate" => config.database.migrate = value.parse()?,
        _ => {
            if let Some(field) = key.strip_prefix("imap_") {
                set_server(&mut config.imap, field, value)?;
            } else if let Some(field) = key.strip_prefix("smtp_") {
                set_server(&mut config.smtp, field, value)?;
            } else {
                warn!("Ignoring unknown setting {ENV_PREFIX}{}", key.to_ascii_uppercase());
            }
        }
    }
    Ok(())
}

fn set_server(server: &mut ServerConfig, field: &str, value: &str) -> Result<()> {
    match field {
        "address" => server.address = value.to_string(),
        "password" => server.password = value.to_string(),
        "host" => server.host = value.to_string(),
        "port" => server.port = Some(value.parse()?),
        "security" => server.security = serde_yaml::from_str::<Security>(&value.to_lowercase())?,
        "authenticated" => server.authenticated = value.parse()?,
        "insecure" => server.insecure = value.parse()?,
        _ => bail!("unknown server setting {field:?}"),
    }
    Ok(())
}

/// Copy of `config` with passwords masked, for display.
pub fn redacted(config: &Config) -> Config {
    let mask = |server: &ServerConfig| ServerConfig {
        password: if server.password.is_empty() {
            String::new()
        } else {
            "********".to_string()
        },
        ..server.clone()
    };
    Config {
        imap: mask(&config.imap),
        smtp: mask(&config.smtp),
        ..config.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_yaml_with_defaults() {
        let config: Config = serde_yaml::from_str(
            r"
timezone: America/Montreal
fetch_interval: 30
mailbox:
  processed: Done
imap:
  address: me@example.com
  host: imap.example.com
smtp:
  host: smtp.example.com
  security: starttls
",
        )
        .unwrap();

        assert_eq!(config.timezone, chrono_tz::America::Montreal);
        assert_eq!(config.fetch_interval, 30);
        assert_eq!(config.send_interval, 60);
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.mailbox.inbound, "INBOX");
        assert_eq!(config.mailbox.processed, "Done");
        assert!(config.database.migrate);
        assert!(config.imap.authenticated);
        assert_eq!(config.smtp.security, Security::StartTls);
        assert_eq!(config.smtp.smtp_port(), 587);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env(
            &mut config,
            vars(&[
                ("MXREMIND_DATABASE_URL", "sqlite::memory:"),
                ("MXREMIND_IMAP_PASSWORD", "hunter2"),
                ("MXREMIND_SMTP_PORT", "2525"),
                ("MXREMIND_SMTP_SECURITY", "None"),
                ("MXREMIND_TIMEZONE", "Europe/Paris"),
                ("MXREMIND_SEND_INTERVAL", "15"),
                ("HOME", "/root"),
            ]),
        )
        .unwrap();

        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.imap.password, "hunter2");
        assert_eq!(config.smtp.port, Some(2525));
        assert_eq!(config.smtp.security, Security::None);
        assert_eq!(config.timezone, chrono_tz::Europe::Paris);
        assert_eq!(config.send_interval, 15);
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply_env(&mut config, vars(&[("MXREMIND_MAX_MESSAGES", "ten")])).is_err());
        assert!(apply_env(&mut config, vars(&[("MXREMIND_TIMEZONE", "Mars/Olympus")])).is_err());
        assert!(apply_env(&mut config, vars(&[("MXREMIND_IMAP_COLOR", "red")])).is_err());
    }

    #[test]
    fn test_env_ignores_unknown_top_level_key() {
        let mut config = Config::default();
        apply_env(&mut config, vars(&[("MXREMIND_VERBOSITY", "3")])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_env_skips_config_file_variable() {
        let mut config = Config::default();
        apply_env(&mut config, vars(&[("MXREMIND_CONFIG", "/etc/mxremind.yaml")])).unwrap();
        assert_eq!(config, Config::default());

        assert_eq!(setting_key("MXREMIND_CONFIG"), None);
        assert_eq!(setting_key("HOME"), None);
        assert_eq!(setting_key("MXREMIND_IMAP_HOST").as_deref(), Some("imap_host"));
    }

    #[test]
    fn test_redacted_masks_passwords() {
        let mut config = Config::default();
        config.imap.password = "secret".to_string();

        let shown = redacted(&config);
        assert_eq!(shown.imap.password, "********");
        assert_eq!(shown.smtp.password, "");

        let yaml = serde_yaml::to_string(&shown).unwrap();
        assert!(!yaml.contains("secret"));
    }
}
