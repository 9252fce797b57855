use std::env;

/// Default bind address for the local invocation server, also used as the
/// Runtime API endpoint when the local server is enabled.
pub(crate) const DEFAULT_HOST: &str = "127.0.0.1";
pub(crate) const DEFAULT_PORT: u16 = 7000;

/// Canned payload style served by the local server's `next` endpoint.
///
/// Anything other than [`PayloadMode::Off`] is a test fixture: the server
/// fabricates events instead of waiting for `POST /invoke`.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum PayloadMode {
    /// Serve queued invocations only. This is the mode used outside of tests.
    #[default]
    Off,
    /// Serve a JSON string payload: `"<uuid>"`.
    String,
    /// Serve a JSON object payload: `{"name":"<uuid>"}`.
    Json,
}

/// Configuration derived from environment variables.
///
/// The configuration is read once at startup and never mutated afterwards.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// `host:port` of the Runtime API, from `AWS_LAMBDA_RUNTIME_API`.
    /// Ignored when the local server is enabled.
    pub runtime_api_endpoint: Option<String>,
    /// Log level for the process-wide subscriber, from `LOG_LEVEL`.
    pub log_level: String,
    /// Stop after this many invocations, from `MAX_INVOCATIONS`.
    /// Zero means unbounded. Primarily for tests and benchmarks.
    pub max_invocations: u32,
    /// Run the local invocation server instead of connecting to a remote
    /// Runtime API, from `LOCAL_LAMBDA_SERVER_ENABLED`.
    pub local_server_enabled: bool,
    /// Local server bind host, from `HOST`.
    pub host: String,
    /// Local server bind port, from `PORT`.
    pub port: u16,
    /// Canned payload style for the local server, from `MODE`.
    pub mode: PayloadMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            runtime_api_endpoint: None,
            log_level: "info".to_string(),
            max_invocations: 0,
            local_server_enabled: false,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            mode: PayloadMode::Off,
        }
    }
}

impl Config {
    /// Read the configuration from environment variables.
    ///
    /// Malformed numeric variables are an error; unset variables fall back
    /// to their defaults.
    pub fn from_env() -> Result<Self, crate::Error> {
        let max_invocations = match env::var("MAX_INVOCATIONS") {
            Ok(value) => value
                .parse::<u32>()
                .map_err(|err| format!("MAX_INVOCATIONS is not a non-negative integer: {err}"))?,
            Err(_) => 0,
        };
        let port = match env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|err| format!("PORT is not a valid port number: {err}"))?,
            Err(_) => DEFAULT_PORT,
        };
        let mode = match env::var("MODE") {
            Ok(value) => parse_payload_mode(&value)?,
            Err(_) => PayloadMode::Off,
        };

        Ok(Config {
            runtime_api_endpoint: env::var("AWS_LAMBDA_RUNTIME_API").ok(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_invocations,
            local_server_enabled: env::var("LOCAL_LAMBDA_SERVER_ENABLED")
                .map(|value| is_truthy(&value))
                .unwrap_or(false),
            host: env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port,
            mode,
        })
    }

    /// The endpoint the Runtime API client should connect to.
    ///
    /// With the local server enabled this is the configured bind address;
    /// otherwise `AWS_LAMBDA_RUNTIME_API` is required.
    pub(crate) fn endpoint(&self) -> Result<http::Uri, crate::Error> {
        let endpoint = if self.local_server_enabled {
            format!("{}:{}", self.host, self.port)
        } else {
            self.runtime_api_endpoint
                .clone()
                .ok_or("missing AWS_LAMBDA_RUNTIME_API env var")?
        };
        endpoint
            .parse::<http::Uri>()
            .map_err(|err| format!("invalid Runtime API endpoint {endpoint}: {err}").into())
    }
}

fn parse_payload_mode(value: &str) -> Result<PayloadMode, crate::Error> {
    match value.to_ascii_lowercase().as_str() {
        "" | "off" => Ok(PayloadMode::Off),
        "string" => Ok(PayloadMode::String),
        "json" => Ok(PayloadMode::Json),
        other => Err(format!("unknown MODE value: {other}").into()),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-wide; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "AWS_LAMBDA_RUNTIME_API",
            "LOG_LEVEL",
            "MAX_INVOCATIONS",
            "LOCAL_LAMBDA_SERVER_ENABLED",
            "HOST",
            "PORT",
            "MODE",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn config_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = Config::from_env().expect("config should parse");
        assert_eq!(config, Config::default());
        assert!(config.endpoint().is_err(), "no endpoint without env or local mode");
    }

    #[test]
    fn config_from_env_vars() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("AWS_LAMBDA_RUNTIME_API", "127.0.0.1:9001");
        env::set_var("LOG_LEVEL", "debug");
        env::set_var("MAX_INVOCATIONS", "5");
        env::set_var("MODE", "json");
        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.runtime_api_endpoint.as_deref(), Some("127.0.0.1:9001"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_invocations, 5);
        assert_eq!(config.mode, PayloadMode::Json);
        assert_eq!(
            config.endpoint().expect("endpoint should parse").to_string(),
            "127.0.0.1:9001"
        );
        clear_env();
    }

    #[test]
    fn local_mode_overrides_endpoint() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("LOCAL_LAMBDA_SERVER_ENABLED", "true");
        env::set_var("PORT", "8123");
        let config = Config::from_env().expect("config should parse");
        assert!(config.local_server_enabled);
        assert_eq!(
            config.endpoint().expect("endpoint should parse").to_string(),
            "127.0.0.1:8123"
        );
        clear_env();
    }

    #[test]
    fn truthy_flags() {
        for value in ["1", "true", "YES", "On"] {
            assert!(is_truthy(value), "{value} should be truthy");
        }
        for value in ["0", "false", "no", "off", ""] {
            assert!(!is_truthy(value), "{value} should be falsy");
        }
    }

    #[test]
    fn malformed_max_invocations_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("MAX_INVOCATIONS", "many");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
