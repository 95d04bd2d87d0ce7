//! Realtime transport configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const ENV_APP_KEY: &str = "PULSEBOARD_REVERB_APP_KEY";
pub const ENV_HOST: &str = "PULSEBOARD_REVERB_HOST";
pub const ENV_PORT: &str = "PULSEBOARD_REVERB_PORT";
pub const ENV_TLS_PORT: &str = "PULSEBOARD_REVERB_TLS_PORT";
pub const ENV_FORCE_TLS: &str = "PULSEBOARD_REVERB_FORCE_TLS";
pub const ENV_TRANSPORTS: &str = "PULSEBOARD_REVERB_TRANSPORTS";
pub const ENV_AUTH_URL: &str = "PULSEBOARD_BROADCAST_AUTH_URL";
pub const ENV_ACTIVITY_TIMEOUT: &str = "PULSEBOARD_REVERB_ACTIVITY_TIMEOUT";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TLS_PORT: u16 = 443;
pub const DEFAULT_AUTH_URL: &str = "http://localhost:8000/api/broadcasting/auth";
pub const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
    #[error("{0}")]
    Invalid(String),
}

/// Socket transports the client may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Ws,
    Wss,
}

impl TransportKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Ws => "ws",
            TransportKind::Wss => "wss",
        }
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" => Ok(TransportKind::Ws),
            "wss" => Ok(TransportKind::Wss),
            other => Err(ConfigError::InvalidValue {
                name: ENV_TRANSPORTS.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Backoff applied by the socket transport between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay as u32).min(self.max_delay_ms) as u64)
    }

    pub fn gives_up_after(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Everything needed to open the realtime socket and authorize private
/// channels.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub app_key: String,
    pub host: String,
    pub port: u16,
    pub tls_port: u16,
    pub force_tls: bool,
    pub enabled_transports: Vec<TransportKind>,
    /// `POST` target for private-channel authorization.
    pub auth_endpoint: String,
    /// Silence after which the client pings the server.
    pub activity_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl RealtimeConfig {
    /// Defaults for everything but the app key.
    pub fn new(app_key: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls_port: DEFAULT_TLS_PORT,
            force_tls: false,
            enabled_transports: vec![TransportKind::Ws, TransportKind::Wss],
            auth_endpoint: DEFAULT_AUTH_URL.to_string(),
            activity_timeout: Duration::from_secs(DEFAULT_ACTIVITY_TIMEOUT_SECS),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Load and validate configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PULSEBOARD_REVERB_APP_KEY`: application key (required)
    /// - `PULSEBOARD_REVERB_HOST`: socket host (default: "localhost")
    /// - `PULSEBOARD_REVERB_PORT`: plain socket port (default: 8080)
    /// - `PULSEBOARD_REVERB_TLS_PORT`: TLS socket port (default: 443)
    /// - `PULSEBOARD_REVERB_FORCE_TLS`: "true" | "false" (default: "false")
    /// - `PULSEBOARD_REVERB_TRANSPORTS`: comma list of "ws", "wss" (default: "ws,wss")
    /// - `PULSEBOARD_BROADCAST_AUTH_URL`: private channel auth endpoint
    /// - `PULSEBOARD_REVERB_ACTIVITY_TIMEOUT`: seconds of silence before a ping (default: 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let app_key = lookup(ENV_APP_KEY)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(ENV_APP_KEY.to_string()))?;

        let mut config = Self::new(app_key);

        if let Some(host) = lookup(ENV_HOST) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            config.port = parse_var(ENV_PORT, &port)?;
        }
        if let Some(port) = lookup(ENV_TLS_PORT) {
            config.tls_port = parse_var(ENV_TLS_PORT, &port)?;
        }
        if let Some(flag) = lookup(ENV_FORCE_TLS) {
            config.force_tls = parse_bool(ENV_FORCE_TLS, &flag)?;
        }
        if let Some(list) = lookup(ENV_TRANSPORTS) {
            config.enabled_transports = list
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .map(TransportKind::from_str)
                .collect::<Result<_, _>>()?;
        }
        if let Some(url) = lookup(ENV_AUTH_URL) {
            config.auth_endpoint = url.trim().to_string();
        }
        if let Some(secs) = lookup(ENV_ACTIVITY_TIMEOUT) {
            config.activity_timeout = Duration::from_secs(parse_var(ENV_ACTIVITY_TIMEOUT, &secs)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_key.trim().is_empty() {
            return Err(ConfigError::Invalid("app key must not be empty".into()));
        }
        if self.host.is_empty() || self.host.contains("://") || self.host.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "host must be a bare hostname, got {:?}",
                self.host
            )));
        }
        if self.port == 0 || self.tls_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".into()));
        }
        if self.enabled_transports.is_empty() {
            return Err(ConfigError::Invalid("at least one transport must be enabled".into()));
        }
        if self.force_tls && !self.enabled_transports.contains(&TransportKind::Wss) {
            return Err(ConfigError::Invalid("force_tls requires the wss transport".into()));
        }
        match Url::parse(&self.auth_endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::InvalidValue {
                    name: ENV_AUTH_URL.to_string(),
                    value: self.auth_endpoint.clone(),
                })
            }
        }
        if self.activity_timeout.is_zero() {
            return Err(ConfigError::Invalid("activity timeout must be positive".into()));
        }
        Ok(())
    }

    /// Transport the socket will use: TLS when forced or when plain sockets
    /// are disabled.
    pub fn transport(&self) -> TransportKind {
        if self.force_tls || !self.enabled_transports.contains(&TransportKind::Ws) {
            TransportKind::Wss
        } else {
            TransportKind::Ws
        }
    }

    /// Full socket URL, e.g. `ws://localhost:8080/app/key?protocol=7&client=pulseboard&version=0.1.0&flash=false`.
    pub fn socket_url(&self) -> String {
        let transport = self.transport();
        let port = match transport {
            TransportKind::Ws => self.port,
            TransportKind::Wss => self.tls_port,
        };
        format!(
            "{}://{}:{}/app/{}?protocol={}&client=pulseboard&version={}&flash=false",
            transport.scheme(),
            self.host,
            port,
            self.app_key,
            pulseboard_shared::PROTOCOL_VERSION,
            env!("CARGO_PKG_VERSION"),
        )
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn applies_documented_defaults() {
        let config = RealtimeConfig::from_lookup(lookup(&[(ENV_APP_KEY, "app-key")])).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8080);
        assert_eq!(config.tls_port, 443);
        assert!(!config.force_tls);
        assert_eq!(
            config.enabled_transports,
            vec![TransportKind::Ws, TransportKind::Wss]
        );
        assert_eq!(config.auth_endpoint, DEFAULT_AUTH_URL);
        assert_eq!(config.activity_timeout, Duration::from_secs(30));
        assert_eq!(
            config.socket_url(),
            format!(
                "ws://localhost:8080/app/app-key?protocol=7&client=pulseboard&version={}&flash=false",
                env!("CARGO_PKG_VERSION")
            )
        );
    }

    #[test]
    fn requires_an_app_key() {
        let err = RealtimeConfig::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnvVar(ENV_APP_KEY.to_string()));
    }

    #[test]
    fn forced_tls_uses_the_tls_port() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            (ENV_APP_KEY, "k"),
            (ENV_HOST, "ws.example.com"),
            (ENV_FORCE_TLS, "true"),
            (ENV_TLS_PORT, "6001"),
        ]))
        .unwrap();
        assert_eq!(config.transport(), TransportKind::Wss);
        assert!(config.socket_url().starts_with("wss://ws.example.com:6001/app/k?"));
    }

    #[test]
    fn rejects_inconsistent_settings() {
        let tls_without_wss = RealtimeConfig::from_lookup(lookup(&[
            (ENV_APP_KEY, "k"),
            (ENV_FORCE_TLS, "1"),
            (ENV_TRANSPORTS, "ws"),
        ]));
        assert!(matches!(tls_without_wss, Err(ConfigError::Invalid(_))));

        let bad_port = RealtimeConfig::from_lookup(lookup(&[(ENV_APP_KEY, "k"), (ENV_PORT, "http")]));
        assert!(matches!(bad_port, Err(ConfigError::InvalidValue { .. })));

        let bad_auth_url =
            RealtimeConfig::from_lookup(lookup(&[(ENV_APP_KEY, "k"), (ENV_AUTH_URL, "/broadcasting/auth")]));
        assert!(matches!(bad_auth_url, Err(ConfigError::InvalidValue { .. })));

        let bad_transport =
            RealtimeConfig::from_lookup(lookup(&[(ENV_APP_KEY, "k"), (ENV_TRANSPORTS, "ws,sse")]));
        assert!(matches!(bad_transport, Err(ConfigError::InvalidValue { .. })));

        let mut config = RealtimeConfig::new("k");
        config.host = "https://ws.example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(reconnect.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(reconnect.delay_for_attempt(20), Duration::from_millis(30000));
        assert!(!reconnect.gives_up_after(9));
        assert!(reconnect.gives_up_after(10));
    }
}
