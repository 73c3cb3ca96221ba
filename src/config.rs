//! Runtime configuration and the persisted snapshot-timestamp record.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

/// Timestamp record keys, one per ranked entity kind.
pub const TIMESTAMP_OWNER_RANKS: &str = "TIMESTAMP_OWNER_RANKS";
pub const TIMESTAMP_ORGANIZATION_RANKS: &str = "TIMESTAMP_ORGANIZATION_RANKS";
pub const TIMESTAMP_REPOSITORY_RANKS: &str = "TIMESTAMP_REPOSITORY_RANKS";

/// Settings loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream GraphQL endpoint.
    pub api_url: String,
    /// Static bearer credential for the upstream.
    pub api_token: String,
    /// Document database connection string.
    pub mongo_url: String,
    /// Database name holding the owners/repositories/ranks collections.
    pub mongo_database: String,
    /// Port for the read API.
    pub web_port: u16,
    /// Path of the persisted timestamp record.
    pub timestamp_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: env_or("API_URL", "https://api.github.com/graphql"),
            api_token: std::env::var("API_TOKEN").context("API_TOKEN is not set")?,
            mongo_url: env_or("MONGO_URL", "mongodb://localhost:27017"),
            mongo_database: env_or("MONGO_DATABASE", "gh_ranks"),
            web_port: env_or("WEB_PORT", "8000")
                .parse()
                .context("WEB_PORT is not a port number")?,
            timestamp_path: Self::timestamp_path()?,
        })
    }

    /// Default location of the timestamp record, overridable with
    /// TIMESTAMP_FILE for containerized deployments.
    fn timestamp_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("TIMESTAMP_FILE") {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        ProjectDirs::from("dev", "gh-ranks", "gh-ranks")
            .map(|dirs| dirs.data_dir().join("timestamps.json"))
            .context("Could not determine data directory")
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

/// On-disk shape of the timestamp record: integer nanoseconds since
/// epoch per entity kind, zero meaning "never sealed".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Timestamps {
    #[serde(rename = "TIMESTAMP_OWNER_RANKS", default)]
    owner_ranks: i64,
    #[serde(rename = "TIMESTAMP_ORGANIZATION_RANKS", default)]
    organization_ranks: i64,
    #[serde(rename = "TIMESTAMP_REPOSITORY_RANKS", default)]
    repository_ranks: i64,
}

impl Timestamps {
    fn get(&self, key: &str) -> i64 {
        match key {
            TIMESTAMP_OWNER_RANKS => self.owner_ranks,
            TIMESTAMP_ORGANIZATION_RANKS => self.organization_ranks,
            TIMESTAMP_REPOSITORY_RANKS => self.repository_ranks,
            _ => 0,
        }
    }

    fn set(&mut self, key: &str, nanos: i64) {
        match key {
            TIMESTAMP_OWNER_RANKS => self.owner_ranks = nanos,
            TIMESTAMP_ORGANIZATION_RANKS => self.organization_ranks = nanos,
            TIMESTAMP_REPOSITORY_RANKS => self.repository_ranks = nanos,
            _ => {}
        }
    }
}

/// Shared handle on the timestamp record. Workers seal new snapshot
/// timestamps through it; the read API reads the latest per kind.
pub struct TimestampStore {
    path: Option<PathBuf>,
    inner: RwLock<Timestamps>,
}

impl TimestampStore {
    /// Load the record from disk, starting from zeroes when absent.
    pub fn load(path: PathBuf) -> Result<Self> {
        let inner = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Malformed timestamp record: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Timestamps::default(),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read timestamp record: {}", path.display())
                })
            }
        };
        Ok(Self {
            path: Some(path),
            inner: RwLock::new(inner),
        })
    }

    /// An unpersisted record, for tests and one-shot runs.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            inner: RwLock::new(Timestamps::default()),
        }
    }

    /// Latest sealed snapshot timestamp for a kind; epoch when unset.
    pub fn get(&self, key: &str) -> DateTime<Utc> {
        let nanos = self.inner.read().unwrap().get(key);
        Utc.timestamp_nanos(nanos)
    }

    pub fn is_unset(&self, key: &str) -> bool {
        self.inner.read().unwrap().get(key) == 0
    }

    /// Record a completed snapshot and rewrite the file atomically.
    pub fn seal(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.write().unwrap();
            inner.set(key, at.timestamp_nanos_opt().unwrap_or(i64::MAX));
            inner.clone()
        };
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }
            let tmp = path.with_extension("tmp");
            std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)
                .with_context(|| format!("Failed to write timestamp record: {}", tmp.display()))?;
            std::fs::rename(&tmp, path)
                .with_context(|| format!("Failed to replace timestamp record: {}", path.display()))?;
        }
        Ok(())
    }
}
