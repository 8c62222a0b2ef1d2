// Configuration module
//
// Configuration comes from an optional YAML file (with `${VAR}` substitution)
// and is then overridden by `IMGSRV_*` environment variables, so a container
// can run with no file at all.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod codecs;
pub mod logging;
pub mod origin;
pub mod server;

pub use codecs::{CodecConfig, ToolsConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use origin::OriginConfig;
pub use server::ServerConfig;

use crate::constants::DEFAULT_TEMP_DIR;

fn default_temp_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEMP_DIR)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    /// Working directory for per-request temp files
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default)]
    pub codecs: CodecConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            origin: OriginConfig::default(),
            temp_dir: default_temp_dir(),
            codecs: CodecConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("Invalid value for {}: '{}' ({})", name, value, e))
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        let mut missing = None;
        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            })
        });

        if let Some(var_name) = missing {
            return Err(format!(
                "Environment variable '{}' is referenced but not set",
                var_name
            ));
        }

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    /// Load the effective configuration: file (if any), then process
    /// environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `IMGSRV_*` overrides. `lookup` abstracts the environment so the
    /// mapping can be tested without touching process state.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IMGSRV_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = lookup("IMGSRV_PORT") {
            self.server.port = parse_env("IMGSRV_PORT", &v)?;
        }
        if let Some(v) = lookup("IMGSRV_THREADS") {
            self.server.threads = parse_env("IMGSRV_THREADS", &v)?;
        }
        if let Some(v) = lookup("IMGSRV_ENV").or_else(|| lookup("NODE_ENV")) {
            self.server.production = v.trim().eq_ignore_ascii_case("production");
        }

        if let Some(v) = lookup("IMGSRV_ORIGIN_WHITELIST") {
            let entries: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
            self.origin.allow_list = (!entries.is_empty()).then_some(entries);
        }
        if let Some(v) = lookup("IMGSRV_MAX_ORIGIN_BYTES") {
            self.origin.max_bytes = parse_env("IMGSRV_MAX_ORIGIN_BYTES", &v)?;
        }
        if let Some(v) = lookup("IMGSRV_ORIGIN_TIMEOUT_MS") {
            self.origin.timeout_ms = parse_env("IMGSRV_ORIGIN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("IMGSRV_USER_AGENT") {
            self.origin.user_agent = v;
        }

        if let Some(v) = lookup("IMGSRV_TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }

        if let Some(v) = lookup("IMGSRV_CODEC_TIMEOUT_MS") {
            self.codecs.timeout_ms = parse_env("IMGSRV_CODEC_TIMEOUT_MS", &v)?;
        }
        let tools = &mut self.codecs.tools;
        for (name, slot) in [
            ("IMGSRV_TOOL_CONVERT", &mut tools.convert),
            ("IMGSRV_TOOL_PNGQUANT", &mut tools.pngquant),
            ("IMGSRV_TOOL_JPEGOPTIM", &mut tools.jpegoptim),
            ("IMGSRV_TOOL_CWEBP", &mut tools.cwebp),
            ("IMGSRV_TOOL_JXRENC", &mut tools.jxrenc),
        ] {
            if let Some(v) = lookup(name) {
                *slot = v;
            }
        }

        if let Some(v) = lookup("IMGSRV_VERBOSE") {
            self.logging.verbose = v.trim() == "1";
        }
        if let Some(v) = lookup("IMGSRV_LOG_INDENT") {
            self.logging.indent = !v.is_empty();
        }
        if let Some(v) = lookup("IMGSRV_SOURCENAME") {
            if !v.is_empty() {
                self.logging.source_name = v;
            }
        }
        if let Some(v) = lookup("IMGSRV_LOG_FORMAT") {
            self.logging.format = parse_env("IMGSRV_LOG_FORMAT", &v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.threads == 0 {
            return Err("server.threads must be at least 1".to_string());
        }

        if self.origin.max_bytes == 0 {
            return Err("origin.max_bytes must be greater than 0".to_string());
        }

        if self.origin.timeout_ms == 0 {
            return Err("origin.timeout_ms must be greater than 0".to_string());
        }

        if self.temp_dir.as_os_str().is_empty() {
            return Err("temp_dir cannot be empty".to_string());
        }

        for program in self.codecs.tools.programs() {
            if program.trim().is_empty() {
                return Err("codec tool names cannot be empty".to_string());
            }
        }

        // Surfaces malformed allow-list entries at startup
        self.origin.build_allow_list()?;

        Ok(())
    }
}
