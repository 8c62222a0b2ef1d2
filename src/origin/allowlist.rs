//! Origin access control.
//!
//! The allow-list is a per-host trie of lowercase path segments, built once
//! from flat `host[/path/segments]` entries:
//!
//! ```text
//! example.com                 -> any path on example.com
//! cdn.example.com/images/pub  -> only paths under /images/pub
//! ```
//!
//! An entry that ends at a node makes everything below that node allowed, so
//! `example.com` together with `example.com/images` still allows every path.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::Serialize;

use crate::error::RequestError;

/// A node of the allow-list trie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WhitelistEntry {
    children: BTreeMap<String, WhitelistEntry>,
    /// An entry ended here: the remaining path is unconstrained
    #[serde(skip)]
    open: bool,
}

impl WhitelistEntry {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child(&self, segment: &str) -> Option<&WhitelistEntry> {
        self.children.get(segment)
    }

    fn insert<'a>(&mut self, mut segments: impl Iterator<Item = &'a str>) {
        if self.open {
            return;
        }
        match segments.next() {
            None => {
                self.open = true;
                self.children.clear();
            }
            Some(segment) => self
                .children
                .entry(segment.to_lowercase())
                .or_default()
                .insert(segments),
        }
    }
}

/// Host → path trie, or "allow everything" when no list is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginAllowList {
    hosts: Option<BTreeMap<String, WhitelistEntry>>,
}

impl OriginAllowList {
    /// Access control disabled.
    pub fn allow_all() -> Self {
        Self { hosts: None }
    }

    /// Build from flat entries. Blank entries are skipped; hosts are
    /// case-insensitive.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hosts: BTreeMap<String, WhitelistEntry> = BTreeMap::new();

        for raw in entries {
            let entry = raw.as_ref().trim();
            if entry.is_empty() {
                continue;
            }

            let mut segments = entry.trim_end_matches('/').split('/');
            let host = segments.next().unwrap_or_default().to_lowercase();
            if host.is_empty() {
                return Err(format!("Invalid origin allow-list entry '{}': empty host", entry));
            }

            hosts.entry(host).or_default().insert(segments);
        }

        Ok(Self { hosts: Some(hosts) })
    }

    /// Parse the comma-separated environment form (`a.com,b.com/img`).
    /// `None` or an empty string disables access control.
    pub fn from_env_value(value: Option<&str>) -> Result<Self, String> {
        match value {
            Some(v) if !v.trim().is_empty() => Self::from_entries(v.split(',')),
            _ => Ok(Self::allow_all()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.hosts.is_some()
    }

    pub fn host_entry(&self, host: &str) -> Option<&WhitelistEntry> {
        self.hosts.as_ref()?.get(&host.to_lowercase())
    }

    /// Check a source URI against the list.
    pub fn validate(&self, uri: &str) -> Result<(), RequestError> {
        let Some(hosts) = &self.hosts else {
            return Ok(());
        };

        let parsed = Url::parse(uri).map_err(|e| RequestError::InvalidSourceUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(port)) => format!("{}:{}", h, port),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(RequestError::InvalidSourceUri {
                    uri: uri.to_string(),
                    reason: "no host".to_string(),
                })
            }
        }
        .to_lowercase();

        let mut entry = hosts
            .get(&host)
            .ok_or_else(|| RequestError::OriginNotAllowed { host: host.clone() })?;

        if !entry.has_children() {
            return Ok(());
        }

        let path = parsed.path().to_lowercase();
        let mut segments = path.strip_prefix('/').unwrap_or(&path).split('/');

        // Running out of segments while the trie continues is allowed as well
        while entry.has_children() {
            let Some(segment) = segments.next() else {
                break;
            };
            entry = entry
                .child(segment)
                .ok_or_else(|| RequestError::OriginPathNotAllowed {
                    host: host.clone(),
                    segment: segment.to_string(),
                })?;
        }

        Ok(())
    }

    /// Startup diagnostics: the configured trie, or a warning when disabled.
    pub fn status(&self) -> serde_json::Value {
        match &self.hosts {
            Some(hosts) => serde_json::json!({ "origins": hosts }),
            None => serde_json::json!({
                "warning": "No origin whitelist specified: allowing ALL origins"
            }),
        }
    }

    /// Flattened `host/path` entries, for logging.
    pub fn entries(&self) -> Vec<String> {
        fn walk(prefix: &str, entry: &WhitelistEntry, out: &mut Vec<String>) {
            if !entry.has_children() {
                out.push(prefix.to_string());
                return;
            }
            for (segment, child) in &entry.children {
                walk(&format!("{}/{}", prefix, segment), child, out);
            }
        }

        let mut out = Vec::new();
        if let Some(hosts) = &self.hosts {
            for (host, entry) in hosts {
                walk(host, entry, &mut out);
            }
        }
        out
    }
}
