//! External codec tool configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CODEC_TIMEOUT_MS;

fn default_timeout_ms() -> u64 {
    DEFAULT_CODEC_TIMEOUT_MS
}

fn default_convert() -> String {
    "convert".to_string()
}

fn default_pngquant() -> String {
    "pngquant".to_string()
}

fn default_jpegoptim() -> String {
    "jpegoptim".to_string()
}

fn default_cwebp() -> String {
    "cwebp".to_string()
}

fn default_jxrenc() -> String {
    "JxrEncApp".to_string()
}

/// Program names (or absolute paths) of the codec tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// ImageMagick convert: resizing, JPEG 2000, BMP flattening
    #[serde(default = "default_convert")]
    pub convert: String,
    #[serde(default = "default_pngquant")]
    pub pngquant: String,
    #[serde(default = "default_jpegoptim")]
    pub jpegoptim: String,
    #[serde(default = "default_cwebp")]
    pub cwebp: String,
    /// JPEG-XR reference encoder
    #[serde(default = "default_jxrenc")]
    pub jxrenc: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            convert: default_convert(),
            pngquant: default_pngquant(),
            jpegoptim: default_jpegoptim(),
            cwebp: default_cwebp(),
            jxrenc: default_jxrenc(),
        }
    }
}

impl ToolsConfig {
    /// Every configured program, for the startup availability check
    pub fn programs(&self) -> [&str; 5] {
        [
            self.convert.as_str(),
            self.pngquant.as_str(),
            self.jpegoptim.as_str(),
            self.cwebp.as_str(),
            self.jxrenc.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Per-invocation timeout in milliseconds; 0 disables it
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            tools: ToolsConfig::default(),
        }
    }
}

impl CodecConfig {
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_ms > 0).then(|| std::time::Duration::from_millis(self.timeout_ms))
    }
}
