//! Service configuration.
//!
//! Everything the service needs to run: the reference timezone, tick
//! periods, mailbox names, database location and the IMAP/SMTP accounts.
//! Loading is left to the caller; this module only defines the shape,
//! defaults and validation.

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Security/encryption mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption (not recommended).
    None,
    /// Implicit TLS (connect directly with TLS).
    #[default]
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }
}

/// Connection settings for one mail server.
///
/// The address doubles as the login name and, for SMTP, as the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Account email address.
    pub address: String,
    /// Account password.
    pub password: String,
    /// Server hostname.
    pub host: String,
    /// Server port; derived from `security` when unset.
    pub port: Option<u16>,
    /// Security mode.
    pub security: Security,
    /// Whether to authenticate. IMAP sessions always log in.
    pub authenticated: bool,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            password: String::new(),
            host: String::new(),
            port: None,
            security: Security::default(),
            authenticated: true,
            insecure: false,
        }
    }
}

impl ServerConfig {
    /// IMAP port: the configured one, else 993 for TLS and 143 otherwise.
    #[must_use]
    pub const fn imap_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None => match self.security {
                Security::None | Security::StartTls => 143,
                Security::Tls => 993,
            },
        }
    }

    /// SMTP port: the configured one, else 465/587/25 by security mode.
    #[must_use]
    pub const fn smtp_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None => match self.security {
                Security::None => 25,
                Security::StartTls => 587,
                Security::Tls => 465,
            },
        }
    }
}

/// Mailbox names on the IMAP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Mailbox scanned for reminder requests.
    pub inbound: String,
    /// Mailbox processed messages are moved to.
    pub processed: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            inbound: "INBOX".to_string(),
            processed: "Processed".to_string(),
        }
    }
}

/// Reminder database settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite:` URL or plain file path.
    pub url: String,
    /// Create the schema on connect.
    pub migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mxremind.db".to_string(),
            migrate: true,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reference timezone for reminder subjects.
    pub timezone: Tz,
    /// Seconds between fetch ticks.
    pub fetch_interval: u64,
    /// Seconds between due-reminder ticks.
    pub send_interval: u64,
    /// Messages fetched per tick; also the capacity of inter-stage channels.
    pub max_messages: u32,
    /// Mailbox names.
    pub mailbox: MailboxConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Inbound mail server.
    pub imap: ServerConfig,
    /// Outbound mail server.
    pub smtp: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            fetch_interval: 60,
            send_interval: 60,
            max_messages: 10,
            mailbox: MailboxConfig::default(),
            database: DatabaseConfig::default(),
            imap: ServerConfig::default(),
            smtp: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Period of the fetch timer.
    #[must_use]
    pub const fn fetch_period(&self) -> Duration {
        Duration::from_secs(self.fetch_interval)
    }

    /// Period of the due-reminder timer.
    #[must_use]
    pub const fn send_period(&self) -> Duration {
        Duration::from_secs(self.send_interval)
    }

    /// Human-readable label for log lines, `address:mailbox`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}:{}", self.imap.address, self.mailbox.inbound)
    }

    /// Checks the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if self.fetch_interval == 0 {
            errors.push(ConfigError::ZeroFetchInterval);
        }
        if self.send_interval == 0 {
            errors.push(ConfigError::ZeroSendInterval);
        }
        if self.max_messages == 0 {
            errors.push(ConfigError::ZeroMaxMessages);
        }

        if self.mailbox.inbound.trim().is_empty() {
            errors.push(ConfigError::EmptyInboundMailbox);
        }
        if self.mailbox.processed.trim().is_empty() {
            errors.push(ConfigError::EmptyProcessedMailbox);
        } else if self.mailbox.processed == self.mailbox.inbound {
            errors.push(ConfigError::SameMailboxes);
        }

        if self.database.url.trim().is_empty() {
            errors.push(ConfigError::EmptyDatabaseUrl);
        }

        // IMAP
        if self.imap.host.trim().is_empty() {
            errors.push(ConfigError::EmptyImapHost);
        }
        if self.imap.port == Some(0) {
            errors.push(ConfigError::InvalidImapPort);
        }
        if !is_valid_email(&self.imap.address) {
            errors.push(ConfigError::InvalidImapAddress);
        }
        if self.imap.password.is_empty() {
            errors.push(ConfigError::EmptyImapPassword);
        }

        // SMTP
        if self.smtp.host.trim().is_empty() {
            errors.push(ConfigError::EmptySmtpHost);
        }
        if self.smtp.port == Some(0) {
            errors.push(ConfigError::InvalidSmtpPort);
        }
        if !is_valid_email(&self.smtp.address) {
            errors.push(ConfigError::InvalidSmtpAddress);
        }
        if self.smtp.authenticated && self.smtp.password.is_empty() {
            errors.push(ConfigError::EmptySmtpPassword);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Validation error for a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Fetch interval is zero.
    ZeroFetchInterval,
    /// Send interval is zero.
    ZeroSendInterval,
    /// Batch size is zero.
    ZeroMaxMessages,
    /// Inbound mailbox name is empty.
    EmptyInboundMailbox,
    /// Processed mailbox name is empty.
    EmptyProcessedMailbox,
    /// Processed mailbox is the inbound mailbox.
    SameMailboxes,
    /// Database URL is empty.
    EmptyDatabaseUrl,
    /// IMAP host is empty.
    EmptyImapHost,
    /// IMAP port is zero.
    InvalidImapPort,
    /// IMAP address is missing or malformed.
    InvalidImapAddress,
    /// IMAP password is empty.
    EmptyImapPassword,
    /// SMTP host is empty.
    EmptySmtpHost,
    /// SMTP port is zero.
    InvalidSmtpPort,
    /// SMTP address is missing or malformed.
    InvalidSmtpAddress,
    /// SMTP password is empty while authentication is on.
    EmptySmtpPassword,
}

impl ConfigError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ZeroFetchInterval => "Fetch interval must be at least one second",
            Self::ZeroSendInterval => "Send interval must be at least one second",
            Self::ZeroMaxMessages => "Max messages must be at least 1",
            Self::EmptyInboundMailbox => "Inbound mailbox is required",
            Self::EmptyProcessedMailbox => "Processed mailbox is required",
            Self::SameMailboxes => "Processed mailbox must differ from the inbound mailbox",
            Self::EmptyDatabaseUrl => "Database URL is required",
            Self::EmptyImapHost => "IMAP server is required",
            Self::InvalidImapPort => "IMAP port must be 1-65535",
            Self::InvalidImapAddress => "IMAP address must be a valid email address",
            Self::EmptyImapPassword => "IMAP password is required",
            Self::EmptySmtpHost => "SMTP server is required",
            Self::InvalidSmtpPort => "SMTP port must be 1-65535",
            Self::InvalidSmtpAddress => "SMTP address must be a valid email address",
            Self::EmptySmtpPassword => "SMTP password is required",
        }
    }

    /// Get the config key this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::ZeroFetchInterval => "fetch_interval",
            Self::ZeroSendInterval => "send_interval",
            Self::ZeroMaxMessages => "max_messages",
            Self::EmptyInboundMailbox => "mailbox.inbound",
            Self::EmptyProcessedMailbox | Self::SameMailboxes => "mailbox.processed",
            Self::EmptyDatabaseUrl => "database.url",
            Self::EmptyImapHost => "imap.host",
            Self::InvalidImapPort => "imap.port",
            Self::InvalidImapAddress => "imap.address",
            Self::EmptyImapPassword => "imap.password",
            Self::EmptySmtpHost => "smtp.host",
            Self::InvalidSmtpPort => "smtp.port",
            Self::InvalidSmtpAddress => "smtp.address",
            Self::EmptySmtpPassword => "smtp.password",
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field(), self.message())
    }
}

impl std::error::Error for ConfigError {}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|part| !part.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn complete() -> Config {
        let server = |host: &str| ServerConfig {
            address: "reminders@example.com".to_string(),
            password: "secret".to_string(),
            host: host.to_string(),
            ..ServerConfig::default()
        };
        Config {
            imap: server("imap.example.com"),
            smtp: server("smtp.example.com"),
            ..Config::default()
        }
    }

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user.name@sub.example.com"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@@example.com"));
        assert!(!is_valid_email("user@example..com"));
    }

    #[test]
    fn test_default_ports() {
        let mut server = ServerConfig::default();
        assert_eq!((server.imap_port(), server.smtp_port()), (993, 465));

        server.security = Security::StartTls;
        assert_eq!((server.imap_port(), server.smtp_port()), (143, 587));

        server.security = Security::None;
        assert_eq!((server.imap_port(), server.smtp_port()), (143, 25));

        server.port = Some(2525);
        assert_eq!((server.imap_port(), server.smtp_port()), (2525, 2525));
    }

    #[test]
    fn test_validate_complete_config() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_every_error() {
        let config = Config {
            send_interval: 0,
            max_messages: 0,
            ..Config::default()
        };
        let errors = config.validate().unwrap_err();

        assert!(errors.contains(&ConfigError::ZeroSendInterval));
        assert!(errors.contains(&ConfigError::ZeroMaxMessages));
        assert!(errors.contains(&ConfigError::EmptyImapHost));
        assert!(errors.contains(&ConfigError::InvalidSmtpAddress));
        assert!(!errors.contains(&ConfigError::ZeroFetchInterval));
    }

    #[test]
    fn test_unauthenticated_smtp_needs_no_password() {
        let mut config = complete();
        config.smtp.password.clear();
        assert_eq!(
            config.validate().unwrap_err(),
            vec![ConfigError::EmptySmtpPassword]
        );

        config.smtp.authenticated = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_mailboxes_rejected() {
        let mut config = complete();
        config.mailbox.processed = config.mailbox.inbound.clone();
        assert_eq!(
            config.validate().unwrap_err(),
            vec![ConfigError::SameMailboxes]
        );
    }

    #[test]
    fn test_error_display_names_field() {
        assert_eq!(
            ConfigError::EmptyDatabaseUrl.to_string(),
            "database.url: Database URL is required"
        );
    }
}
