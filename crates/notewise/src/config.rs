//! Settings shared by every subcommand.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use miette::Result;

use notewise_push::{DEFAULT_TTL, VapidConfig};
use notewise_reminders::SchedulerConfig;
use notewise_store::NoteDb;

/// Database, VAPID and scheduler settings. Every flag can also come from
/// a `NOTEWISE_*` environment variable.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// SQLite database path
    #[arg(long, env = "NOTEWISE_DATABASE", default_value = "notewise.db", global = true)]
    pub database: String,

    /// VAPID subject (mailto: or https: contact URI)
    #[arg(long, env = "NOTEWISE_VAPID_SUBJECT", global = true)]
    pub vapid_subject: Option<String>,

    /// Path to the PEM-encoded VAPID private key
    #[arg(long, env = "NOTEWISE_VAPID_PRIVATE_KEY", global = true)]
    pub vapid_private_key: Option<PathBuf>,

    /// Expected VAPID public key (base64url); checked against the private key
    #[arg(long, env = "NOTEWISE_VAPID_PUBLIC_KEY", global = true)]
    pub vapid_public_key: Option<String>,

    /// Seconds between reminder ticks
    #[arg(long, env = "NOTEWISE_TICK_INTERVAL", default_value = "60", global = true)]
    pub tick_interval: u64,

    /// Delivery window in seconds
    #[arg(long, env = "NOTEWISE_WINDOW", default_value = "60", global = true)]
    pub window: u64,

    /// Seconds before a single push send is abandoned
    #[arg(long, env = "NOTEWISE_SEND_TIMEOUT", default_value = "10", global = true)]
    pub send_timeout: u64,

    /// Maximum push sends in flight during one tick
    #[arg(long, env = "NOTEWISE_MAX_CONCURRENT_SENDS", default_value = "16", global = true)]
    pub max_concurrent_sends: usize,

    /// Seconds the push service may hold an undelivered notification
    #[arg(long, env = "NOTEWISE_PUSH_TTL", default_value_t = DEFAULT_TTL, global = true)]
    pub push_ttl: u32,
}

impl Settings {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_interval),
            window: Duration::from_secs(self.window),
            send_timeout: Duration::from_secs(self.send_timeout),
            max_concurrent_sends: self.max_concurrent_sends,
        }
    }

    pub fn open_database(&self) -> Result<NoteDb> {
        NoteDb::open(&self.database)
            .map_err(|e| miette::miette!("failed to open database {}: {}", self.database, e))
    }

    /// Read the VAPID private key file.
    pub async fn read_private_key(&self) -> Result<Vec<u8>> {
        let path = self.vapid_private_key.as_ref().ok_or_else(|| {
            miette::miette!("missing VAPID private key: set --vapid-private-key or NOTEWISE_VAPID_PRIVATE_KEY")
        })?;
        tokio::fs::read(path)
            .await
            .map_err(|e| miette::miette!("failed to read VAPID private key {}: {}", path.display(), e))
    }

    /// Build the push provider configuration.
    ///
    /// The HTTP timeout matches the per-send timeout so both bounds agree.
    pub async fn vapid_config(&self) -> Result<VapidConfig> {
        let subject = self.vapid_subject.as_deref().ok_or_else(|| {
            miette::miette!("missing VAPID subject: set --vapid-subject or NOTEWISE_VAPID_SUBJECT")
        })?;
        let pem = self.read_private_key().await?;

        let mut config = VapidConfig::new(subject, pem)
            .with_ttl(self.push_ttl)
            .with_request_timeout(Duration::from_secs(self.send_timeout));
        if let Some(public_key) = &self.vapid_public_key {
            config = config.with_public_key(public_key.clone());
        }
        Ok(config)
    }
}
