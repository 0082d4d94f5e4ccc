use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_PORT, DEFAULT_SEND_TIMEOUT_MS, INPUT_SEND_MS, RENDER_MS, START_LEVEL, TICK_MS,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_ms: u64,
    pub send_timeout_ms: u64,
    pub seed: u64,
    pub start_level: String,
    /// JSON level definitions replacing the built-in world.
    pub levels_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_ms: TICK_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            seed: 0,
            start_level: START_LEVEL.to_string(),
            levels_path: None,
        }
    }
}

impl ServerConfig {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("FLATLAND_HOST").unwrap_or(defaults.host),
            port: parse_first(&lookup, &["FLATLAND_PORT", "PORT"]).unwrap_or(defaults.port),
            tick_ms: parse_first(&lookup, &["FLATLAND_TICK_MS"])
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.tick_ms),
            send_timeout_ms: parse_first(&lookup, &["FLATLAND_SEND_TIMEOUT_MS"])
                .unwrap_or(defaults.send_timeout_ms),
            seed: parse_first(&lookup, &["FLATLAND_SEED"]).unwrap_or_else(rand::random),
            start_level: lookup("FLATLAND_START_LEVEL").unwrap_or(defaults.start_level),
            levels_path: lookup("FLATLAND_LEVELS").map(PathBuf::from),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub input_period_ms: u64,
    pub render_period_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            input_period_ms: INPUT_SEND_MS,
            render_period_ms: RENDER_MS,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("FLATLAND_SERVER_HOST").unwrap_or(defaults.host),
            port: parse_first(&lookup, &["FLATLAND_SERVER_PORT", "FLATLAND_PORT"])
                .unwrap_or(defaults.port),
            ..defaults
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_first<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<T> {
    keys.iter()
        .find_map(|key| lookup(key).and_then(|value| value.trim().parse().ok()))
}

/// `RUST_LOG` selects the filter (default `info`); `LOG_FORMAT=json` switches
/// to JSON lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON lines; anything else is compact text.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Compact,
        }
    }
}

pub fn init_tracing() {
    init_tracing_as(LogFormat::from_env());
}

/// Installs the global subscriber. Logs go to stderr so stdout stays free
/// for machine-readable output.
pub fn init_tracing_as(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init(),
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}
