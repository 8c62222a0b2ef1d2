//! Origin access and download limits.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_ORIGIN_BYTES, DEFAULT_ORIGIN_TIMEOUT_MS, DEFAULT_USER_AGENT};
use crate::origin::OriginAllowList;

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_ORIGIN_BYTES
}

fn default_timeout_ms() -> u64 {
    DEFAULT_ORIGIN_TIMEOUT_MS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Allowed `host[/path]` entries. `None` allows every origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<Vec<String>>,

    /// Maximum origin body size in bytes (default: 3 MiB)
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Connect and stall timeout in milliseconds (default: 10000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// User agent sent to origins
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            allow_list: None,
            max_bytes: default_max_bytes(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl OriginConfig {
    /// Build the allow-list trie from the configured entries.
    pub fn build_allow_list(&self) -> Result<OriginAllowList, String> {
        match &self.allow_list {
            Some(entries) => OriginAllowList::from_entries(entries),
            None => Ok(OriginAllowList::allow_all()),
        }
    }
}
