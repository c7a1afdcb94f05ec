use std::net::IpAddr;
use std::time::Duration;

use crate::queue::{Backoff, ProcessorConfig};
use crate::submission::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub destination_url: String,
    pub destination_token: Option<String>,
    pub identity_fields: Vec<String>,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub delivery_timeout: Duration,
    pub lease: Duration,
    pub immediate_attempts: u32,
    pub drain_interval: Duration,
    pub max_body_size: usize,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_or("FORMRELAY_DATABASE_URL", "sqlite://formrelay.db");
        let destination_url = env_required("FORMRELAY_DESTINATION_URL")?;
        let destination_token = std::env::var("FORMRELAY_DESTINATION_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let host: IpAddr = env_or("FORMRELAY_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid FORMRELAY_HOST: {e}"))?;

        let port: u16 = parse_env("FORMRELAY_PORT", "3000")?;

        let identity_fields: Vec<String> = env_or("FORMRELAY_IDENTITY_FIELDS", "email,phone")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_retries: u32 = parse_env("FORMRELAY_MAX_RETRIES", "5")?;
        let backoff_base = Duration::from_millis(parse_env("FORMRELAY_BACKOFF_BASE_MS", "1000")?);
        let backoff_cap = Duration::from_millis(parse_env("FORMRELAY_BACKOFF_CAP_MS", "300000")?);

        let delivery_timeout =
            Duration::from_secs(parse_env("FORMRELAY_DELIVERY_TIMEOUT_SECS", "30")?);
        let lease = Duration::from_secs(parse_env("FORMRELAY_LEASE_SECS", "120")?);

        let immediate_attempts: u32 = parse_env("FORMRELAY_IMMEDIATE_ATTEMPTS", "3")?;
        let drain_interval =
            Duration::from_secs(parse_env("FORMRELAY_DRAIN_INTERVAL_SECS", "30")?);
        let max_body_size: usize = parse_env("FORMRELAY_MAX_BODY_SIZE", "1048576")?;
        let log_level = env_or("FORMRELAY_LOG_LEVEL", "info");

        let config = Config {
            database_url,
            host,
            port,
            destination_url,
            destination_token,
            identity_fields,
            max_retries,
            backoff_base,
            backoff_cap,
            delivery_timeout,
            lease,
            immediate_attempts,
            drain_interval,
            max_body_size,
            log_level,
        };
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the retry engine cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        // A zero base would schedule retries for the instant they failed.
        if self.backoff_base.is_zero() {
            return Err("FORMRELAY_BACKOFF_BASE_MS must be greater than zero".into());
        }
        if self.backoff_cap < self.backoff_base {
            return Err("FORMRELAY_BACKOFF_CAP_MS must not be below FORMRELAY_BACKOFF_BASE_MS".into());
        }
        if self.lease <= self.delivery_timeout {
            return Err("FORMRELAY_LEASE_SECS must exceed FORMRELAY_DELIVERY_TIMEOUT_SECS".into());
        }
        Ok(())
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_retries: self.max_retries,
            backoff: Backoff::new(self.backoff_base, self.backoff_cap),
            delivery_timeout: self.delivery_timeout,
            lease: self.lease,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            immediate_attempts: self.immediate_attempts,
            delivery_timeout: self.delivery_timeout,
            identity_fields: self.identity_fields.clone(),
            ..Default::default()
        }
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
