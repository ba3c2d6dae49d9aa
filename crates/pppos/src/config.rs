//! Link configuration loaded from a JSON file

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::decoder::DEFAULT_MAX_FRAME_LEN;

/// Default baud rate
pub const BAUD_RATE: u32 = 115200;

/// Tunables for one PPP-over-serial link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    /// Limit on the data region (payload + FCS) of a received frame
    pub max_frame_len: usize,
    /// Idle time after which the next frame gets a leading flag
    pub idle_flag_ms: u64,
    /// Depth of the bridged-mode input queue
    pub channel_capacity: usize,
    /// Bytes per serial read
    pub read_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            idle_flag_ms: 100,
            channel_capacity: 64,
            read_buffer: 1024,
        }
    }
}

impl LinkConfig {
    #[must_use]
    pub fn idle_flag(&self) -> Duration {
        Duration::from_millis(self.idle_flag_ms)
    }

    /// Parse a configuration document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load configuration from a JSON file, falling back to defaults
    pub async fn load(path: &Path) -> Self {
        match fs::read_to_string(path).await {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded link configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }
}
