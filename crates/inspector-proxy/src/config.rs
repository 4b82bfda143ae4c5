//! Proxy configuration
//!
//! Plain serde struct. The binary loads it from an optional JSON file and
//! lets command-line flags override individual fields.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::handlers::stub::PAUSED_OVERLAY_METHOD;
use crate::registry::ReconnectPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the WebSocket listener binds to
    pub listen_addr: String,

    /// How often every device is asked for its page list
    pub pages_poll_interval_ms: u64,

    /// Duplicate device id handling
    pub reconnect_policy: ReconnectPolicy,

    /// CDP methods answered locally with an empty result
    pub stub_methods: Vec<String>,

    /// Log every relayed CDP message at trace level
    pub trace_messages: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8081".to_string(),
            pages_poll_interval_ms: 1000,
            reconnect_policy: ReconnectPolicy::Replace,
            stub_methods: vec![PAUSED_OVERLAY_METHOD.to_string()],
            trace_messages: false,
        }
    }
}

impl ProxyConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn pages_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pages_poll_interval_ms.max(1))
    }
}
