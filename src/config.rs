// ⚙️ Configuration - runtime settings for the cert update job
//
// Every field has a default, so a config file only needs the keys it changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_path: PathBuf,

    /// Feed root; requests go to {feed_base_url}{kind}.php?cid={id}
    pub feed_base_url: String,
    pub feed_timeout_secs: u64,

    /// Reserved account credited as instigator of automated bans
    pub system_account_id: i64,

    /// Members below this id are legacy/system accounts and never batch-synced
    pub min_member_id: i64,

    pub home_region: String,
    pub home_division: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            database_path: PathBuf::from("members.db"),
            feed_base_url: "https://cert.vatsim.net/vatsimnet/".to_string(),
            feed_timeout_secs: 30,
            system_account_id: 707070,
            min_member_id: 800000,
            home_region: "EUR".to_string(),
            home_division: "GBR".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load settings from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: SyncConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// File settings if a path is given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }
}
