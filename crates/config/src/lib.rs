use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use model::TransitionPolicy;
use rust_decimal::Decimal;
use serde::Deserialize;

/// Where documents are kept.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// PostgreSQL with JSONB document tables.
    Postgres,
    /// Process-local store; data is lost on restart.
    Memory,
}

/// `AppConfig` holds all configuration parameters required by the application.
///
/// The configuration is loaded from environment variables (optionally via a `.env` file)
/// or uses default values if the variable is not set.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppConfig {
    // --- Storage ---
    /// Document store backend: "postgres" or "memory".
    pub store_backend: StoreBackend,

    // --- Database settings ---
    /// Database hostname or service name (e.g. "postgres" in Docker Compose, "localhost" for local runs).
    pub db_host: String,
    /// Database port (default: 5432).
    pub db_port: u16,
    /// Database user.
    pub db_user: String,
    /// Database password.
    pub db_password: String,
    /// Database name.
    pub db_name: String,
    /// Maximum number of pooled connections.
    pub db_pool_size: usize,
    /// Folder with `.sql` migrations applied at startup.
    pub migrations_dir: String,

    // --- HTTP server ---
    /// The port on which the HTTP server will listen.
    pub http_port: u16,

    // --- Shutdown timeout ---
    /// Graceful shutdown timeout (human-friendly format, e.g. "5s", "1m").
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Business rules ---
    /// Flat tax rate applied to every subtotal, e.g. "0.10".
    #[serde(deserialize_with = "deserialize_decimal")]
    pub tax_rate: Decimal,
    /// "strict" applies the order transition table to admins, "permissive" does not.
    pub transition_policy: TransitionPolicy,
    /// First bookable appointment start ("HH:MM").
    #[serde(deserialize_with = "model::appointment::clock::deserialize")]
    pub business_hours_start: NaiveTime,
    /// End of the enumeration window ("HH:MM").
    #[serde(deserialize_with = "model::appointment::clock::deserialize")]
    pub business_hours_end: NaiveTime,
    /// Granularity of candidate appointment slots.
    #[serde(deserialize_with = "deserialize_duration")]
    pub slot_step: Duration,

    // --- Cart sweeper ---
    /// Carts untouched for longer than this are purged.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cart_idle_ttl: Duration,
    /// How often the idle-cart sweep runs.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cart_sweep_interval: Duration,

    // --- Mail ---
    /// HTTP endpoint of the mail relay. Empty means emails are only logged.
    pub mail_relay_url: String,
    /// Sender address of outgoing emails.
    pub mail_from: String,
}

/// Custom deserializer for durations.
/// Accepts human-readable formats like "5s", "30m", "7d", etc.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val)
        .map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    Decimal::from_str(val.trim())
        .map_err(|e| D::Error::custom(format!("Invalid decimal '{val}': {e}")))
}

impl AppConfig {
    /// Loads configuration from environment variables (and optionally from `.env` file).
    ///
    /// Fields not set via env will be filled with default values.
    ///
    /// # Errors
    /// Returns an error if environment variables are invalid or missing required values.
    pub fn load() -> Result<Self> {
        // Load from .env file (for Docker environment)
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            // Storage
            .set_default("store_backend", "postgres")?
            // Database
            .set_default("db_host", "localhost")?
            .set_default("db_port", 5432)?
            .set_default("db_user", "marketplace")?
            .set_default("db_password", "marketplace")?
            .set_default("db_name", "marketplace")?
            .set_default("db_pool_size", 16)?
            .set_default("migrations_dir", "migrations")?
            // HTTP
            .set_default("http_port", 8081)?
            // Shutdown
            .set_default("shutdown_timeout", "5s")?
            // Business rules
            .set_default("tax_rate", "0.10")?
            .set_default("transition_policy", "strict")?
            .set_default("business_hours_start", "09:00")?
            .set_default("business_hours_end", "17:00")?
            .set_default("slot_step", "30m")?
            // Cart sweeper
            .set_default("cart_idle_ttl", "7days")?
            .set_default("cart_sweep_interval", "1h")?
            // Mail
            .set_default("mail_relay_url", "")?
            .set_default("mail_from", "no-reply@marketplace.local")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load configuration")
    }

    /// libpq-style connection string for the configured database.
    pub fn database_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.db_host, self.db_port, self.db_user, self.db_password, self.db_name
        )
    }
}
