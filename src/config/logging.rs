//! Logging configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SOURCE_NAME;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" => Ok(LogFormat::Text),
            other => Err(format!("Unknown log format '{}'. Supported: json, text", other)),
        }
    }
}

fn default_source_name() -> String {
    DEFAULT_SOURCE_NAME.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit every request log, not only the failed ones
    #[serde(default)]
    pub verbose: bool,
    /// Pretty-print request log documents
    #[serde(default)]
    pub indent: bool,
    /// `source` tag stamped on every request log
    #[serde(default = "default_source_name")]
    pub source_name: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            indent: false,
            source_name: default_source_name(),
            format: LogFormat::default(),
        }
    }
}
