use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;

use crate::link_config::{LinkPolicy, DEFAULT_LINK};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./contact-link.db", or "memory"
    /// for a non-persistent in-process store.
    pub database_url: String,

    /// Plain-text admin password loaded from the environment at startup
    pub admin_password: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// How many hours an admin session token remains valid
    pub session_duration_hours: u64,

    /// Link shown while nothing is stored or the store is unreachable.
    pub default_link: String,

    /// Validation applied to links entered in the admin view.
    pub link_policy: LinkPolicy,

    /// UTC offset used to decide day / week / month boundaries for click
    /// counters, e.g. "+05:30". Defaults to UTC.
    pub calendar_offset: FixedOffset,

    /// How often to look for writes made by other processes sharing the
    /// database.
    pub change_poll_interval: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let admin_password = std::env::var("ADMIN_PASSWORD")
            .context("ADMIN_PASSWORD must be set in the environment or .env file")?;

        if admin_password.trim().is_empty() {
            anyhow::bail!("ADMIN_PASSWORD must not be empty");
        }

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let session_duration_hours = std::env::var("SESSION_DURATION_HOURS")
            .unwrap_or_else(|_| "24".into())
            .parse::<u64>()
            .unwrap_or(24);

        let default_link = std::env::var("DEFAULT_LINK")
            .ok()
            .filter(|link| !link.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LINK.into());

        let link_policy = std::env::var("LINK_POLICY")
            .unwrap_or_else(|_| "permissive".into())
            .parse::<LinkPolicy>()?;

        let calendar_offset = std::env::var("CALENDAR_UTC_OFFSET")
            .unwrap_or_else(|_| "+00:00".into())
            .parse::<FixedOffset>()
            .context("CALENDAR_UTC_OFFSET must look like +HH:MM or -HH:MM")?;

        let change_poll_ms = std::env::var("CHANGE_POLL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse::<u64>()
            .context("CHANGE_POLL_MS must be a number of milliseconds")?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./contact-link.db".into()),
            admin_password,
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            session_duration_hours,
            default_link,
            link_policy,
            calendar_offset,
            change_poll_interval: Duration::from_millis(change_poll_ms.max(10)),
        })
    }

    /// True when the configured store is the in-process one.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}
