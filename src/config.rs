//! Socket configuration.
//!
//! Defaults match PuTTY's Pageant. A config can be built in code through
//! [`SocketBuilder`](crate::SocketBuilder) or parsed from JSON; missing
//! fields fall back to their defaults.
//!
//! # Example
//!
//! ```
//! use pageant_client::config::SocketConfig;
//!
//! let config = SocketConfig::from_json(r#"{ "notify_timeout_ms": 1000 }"#).unwrap();
//!
//! assert_eq!(config.notify_timeout_ms, 1000);
//! assert_eq!(config.window_class, "Pageant");
//! ```

use std::ffi::CString;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PageantError, Result};
use crate::protocol::{
    AGENT_MAX_MSGLEN, CHANNEL_NAME_PREFIX, DEFAULT_NOTIFY_TIMEOUT, LENGTH_PREFIX_SIZE,
    PAGEANT_WINDOW_CLASS, PAGEANT_WINDOW_TITLE,
};

/// Settings for locating and talking to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Class name of the agent window.
    pub window_class: String,
    /// Title of the agent window.
    pub window_title: String,
    /// Shared region size; upper bound on request and reply wire length.
    pub max_message_len: usize,
    /// How long the agent gets to answer one request, in milliseconds.
    pub notify_timeout_ms: u64,
    /// Prefix of shared region names.
    pub channel_prefix: String,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            window_class: PAGEANT_WINDOW_CLASS.to_string(),
            window_title: PAGEANT_WINDOW_TITLE.to_string(),
            max_message_len: AGENT_MAX_MSGLEN,
            notify_timeout_ms: DEFAULT_NOTIFY_TIMEOUT.as_millis() as u64,
            channel_prefix: CHANNEL_NAME_PREFIX.to_string(),
        }
    }
}

impl SocketConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field for a value the native layer can accept.
    pub fn validate(&self) -> Result<()> {
        self.window_class_cstr()?;
        self.window_title_cstr()?;
        if self.channel_prefix.contains('\0') {
            return Err(PageantError::Config(
                "channel_prefix contains a NUL byte".to_string(),
            ));
        }
        if self.max_message_len <= LENGTH_PREFIX_SIZE
            || u32::try_from(self.max_message_len).is_err()
        {
            return Err(PageantError::Config(format!(
                "max_message_len {} must be between {} and {}",
                self.max_message_len,
                LENGTH_PREFIX_SIZE + 1,
                u32::MAX
            )));
        }
        if self.notify_timeout_ms == 0 || self.notify_timeout_ms > u64::from(u32::MAX) {
            return Err(PageantError::Config(format!(
                "notify_timeout_ms {} must be between 1 and {}",
                self.notify_timeout_ms,
                u32::MAX
            )));
        }
        Ok(())
    }

    /// Get the notification timeout.
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    pub(crate) fn window_class_cstr(&self) -> Result<CString> {
        to_cstring("window_class", &self.window_class)
    }

    pub(crate) fn window_title_cstr(&self) -> Result<CString> {
        to_cstring("window_title", &self.window_title)
    }
}

fn to_cstring(field: &str, value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| PageantError::Config(format!("{} contains a NUL byte", field)))
}
