use std::path::PathBuf;
use std::time::Duration;

use crate::limits::{DEFAULT_SESSION_LIFETIME, DEFAULT_STORE_TIMEOUT};

/// Process settings, read once at startup from `ROOMKEEP_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub store_timeout: Duration,
    pub session_lifetime: Duration,
    pub compact_threshold: u64,
    pub seed_rooms: Vec<String>,
    pub admin_email: Option<String>,
    pub admin_password_hash: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            compact_threshold: 1000,
            seed_rooms: parse_list("General's Quarters,Major's Suite"),
            admin_email: None,
            admin_password_hash: None,
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            bind: get("ROOMKEEP_BIND").unwrap_or(defaults.bind),
            port: get("ROOMKEEP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            data_dir: get("ROOMKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: get("ROOMKEEP_METRICS_PORT").and_then(|s| s.parse().ok()),
            store_timeout: parsed("ROOMKEEP_STORE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.store_timeout),
            session_lifetime: parsed("ROOMKEEP_SESSION_LIFETIME_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_lifetime),
            compact_threshold: parsed("ROOMKEEP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            seed_rooms: get("ROOMKEEP_SEED_ROOMS")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.seed_rooms),
            admin_email: get("ROOMKEEP_ADMIN_EMAIL").filter(|s| !s.trim().is_empty()),
            admin_password_hash: get("ROOMKEEP_ADMIN_PASSWORD_HASH")
                .filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roomkeep.wal")
    }
}
