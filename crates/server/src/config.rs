//! Relay configuration from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::{Context, Result};

/// Settings for the development relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    /// Key clients must use in `/app/{key}`.
    pub app_key: String,
    /// Seconds of silence the relay announces before clients should ping.
    pub activity_timeout: u64,
    /// Bearer token -> user id.
    pub tokens: HashMap<String, String>,
}

impl RelayConfig {
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            app_key: app_key.into(),
            activity_timeout: 30,
            tokens: HashMap::new(),
        }
    }

    /// Accept `token` as the credential of `user_id`.
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSEBOARD_RELAY_ADDR`: listen address (default: "0.0.0.0:8080")
    /// - `PULSEBOARD_REVERB_APP_KEY`: app key clients connect with (default: "pulseboard")
    /// - `PULSEBOARD_RELAY_ACTIVITY_TIMEOUT`: seconds (default: 30)
    /// - `PULSEBOARD_RELAY_TOKENS`: comma list of `token=user_id` pairs
    pub fn from_env() -> Result<Self> {
        let app_key = std::env::var("PULSEBOARD_REVERB_APP_KEY")
            .unwrap_or_else(|_| "pulseboard".to_string());
        let mut config = Self::new(app_key);

        if let Ok(addr) = std::env::var("PULSEBOARD_RELAY_ADDR") {
            config.addr = addr
                .parse()
                .with_context(|| format!("invalid PULSEBOARD_RELAY_ADDR {addr:?}"))?;
        }
        if let Ok(secs) = std::env::var("PULSEBOARD_RELAY_ACTIVITY_TIMEOUT") {
            config.activity_timeout = secs
                .trim()
                .parse()
                .with_context(|| format!("invalid PULSEBOARD_RELAY_ACTIVITY_TIMEOUT {secs:?}"))?;
        }
        if let Ok(list) = std::env::var("PULSEBOARD_RELAY_TOKENS") {
            config.tokens = parse_tokens(&list)?;
        }

        Ok(config)
    }
}

fn parse_tokens(list: &str) -> Result<HashMap<String, String>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, user) = entry
                .split_once('=')
                .with_context(|| format!("token entry {entry:?} is not token=user_id"))?;
            let (token, user) = (token.trim(), user.trim());
            anyhow::ensure!(
                !token.is_empty() && !user.is_empty(),
                "token entry {entry:?} has an empty side"
            );
            Ok((token.to_string(), user.to_string()))
        })
        .collect()
}
