//! Server configuration types.
//!
//! Address/port binding, worker threads, and the production toggle that
//! controls how much detail error pages reveal.
//!
//! Default values are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ADDRESS, DEFAULT_PORT, DEFAULT_THREADS};

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// Default worker thread count
fn default_threads() -> usize {
    DEFAULT_THREADS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Production mode: error pages show only the message and request id
    #[serde(default)]
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            threads: default_threads(),
            production: false,
        }
    }
}

impl ServerConfig {
    /// `address:port` as handed to the listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}
