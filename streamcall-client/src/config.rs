use serde::{Deserialize, Serialize};
use std::time::Duration;
use streamcall_core::{head::default_user_agent, Authority, DEFAULT_MAX_MESSAGE_SIZE};

/// Connection-wide settings shared by every call made through a [`crate::Connection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub scheme: String,
    pub user_agent: String,
    /// Timeout applied to calls whose options carry neither a timeout nor a deadline.
    pub default_timeout_ms: Option<u64>,
    pub max_response_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            scheme: "https".to_string(),
            user_agent: default_user_agent(),
            default_timeout_ms: None,
            max_response_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn authority(&self) -> Authority {
        Authority {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}
