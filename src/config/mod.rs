//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, str::FromStr};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, DispatchMode, MAX_EXPIRATION_SECS};

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "softcache";
const ENV_PREFIX: &str = "SOFTCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

impl Settings {
    /// Base URL the background trigger posts to.
    ///
    /// An explicit `cache.trigger_url` wins; otherwise the listener address is
    /// used, with an unspecified host mapped to loopback.
    pub fn trigger_base_url(&self) -> String {
        if let Some(url) = self.cache.trigger_url.as_ref() {
            return url.clone();
        }
        let mut addr = self.server.addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(if addr.is_ipv4() {
                std::net::Ipv4Addr::LOCALHOST.into()
            } else {
                std::net::Ipv6Addr::LOCALHOST.into()
            });
        }
        format!("http://{addr}")
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.cache_default_expiration_seconds {
            self.cache.default_expiration_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_lock_margin_seconds {
            self.cache.lock_margin_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_hard_ttl_seconds {
            self.cache.hard_ttl_seconds = Some(seconds);
        }
        if let Some(mode) = overrides.cache_dispatch.as_ref() {
            self.cache.dispatch = Some(mode.clone());
        }
        if let Some(url) = overrides.cache_trigger_url.as_ref() {
            self.cache.trigger_url = Some(url.clone());
        }
        if let Some(path) = overrides.cache_trigger_path.as_ref() {
            self.cache.trigger_path = Some(path.clone());
        }
        if let Some(ms) = overrides.cache_trigger_timeout_ms {
            self.cache.trigger_timeout_ms = Some(ms);
        }
        if let Some(verify) = overrides.cache_trigger_verify_tls {
            self.cache.trigger_verify_tls = Some(verify);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn exceeds_max_expiration(seconds: u64) -> bool {
    !i64::try_from(seconds).is_ok_and(|secs| secs <= MAX_EXPIRATION_SECS)
}

fn out_of_range(key: &'static str) -> LoadError {
    LoadError::invalid(key, format!("must not exceed {MAX_EXPIRATION_SECS} seconds"))
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let dispatch = match cache.dispatch.as_deref().map(str::trim) {
        None => defaults.dispatch,
        Some(mode) if mode.eq_ignore_ascii_case("trigger") => DispatchMode::Trigger,
        Some(mode) if mode.eq_ignore_ascii_case("deferred") => DispatchMode::Deferred,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.dispatch",
                format!("expected `trigger` or `deferred`, got `{other}`"),
            ));
        }
    };

    let trigger_url = match cache.trigger_url {
        Some(value) if value.trim().is_empty() => None,
        Some(value) => {
            let url = Url::parse(value.trim())
                .map_err(|err| LoadError::invalid("cache.trigger_url", err.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "cache.trigger_url",
                    "scheme must be http or https",
                ));
            }
            Some(url.to_string())
        }
        None => None,
    };

    let trigger_path = cache.trigger_path.unwrap_or(defaults.trigger_path);
    if !trigger_path.starts_with('/') {
        return Err(LoadError::invalid(
            "cache.trigger_path",
            "must start with `/`",
        ));
    }

    let trigger_timeout_ms = cache
        .trigger_timeout_ms
        .unwrap_or(defaults.trigger_timeout_ms);
    if trigger_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.trigger_timeout_ms",
            "must be greater than zero",
        ));
    }

    let default_expiration_seconds = cache
        .default_expiration_seconds
        .unwrap_or(defaults.default_expiration_seconds);
    if default_expiration_seconds > MAX_EXPIRATION_SECS {
        return Err(out_of_range("cache.default_expiration_seconds"));
    }
    let lock_margin_seconds = cache
        .lock_margin_seconds
        .unwrap_or(defaults.lock_margin_seconds);
    if exceeds_max_expiration(lock_margin_seconds) {
        return Err(out_of_range("cache.lock_margin_seconds"));
    }
    let hard_ttl_seconds = cache.hard_ttl_seconds.filter(|secs| *secs > 0);
    if hard_ttl_seconds.is_some_and(exceeds_max_expiration) {
        return Err(out_of_range("cache.hard_ttl_seconds"));
    }

    Ok(CacheConfig {
        default_expiration_seconds,
        lock_margin_seconds,
        hard_ttl_seconds,
        dispatch,
        trigger_url,
        trigger_path,
        trigger_timeout_ms,
        trigger_verify_tls: cache
            .trigger_verify_tls
            .unwrap_or(defaults.trigger_verify_tls),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    default_expiration_seconds: Option<i64>,
    lock_margin_seconds: Option<u64>,
    hard_ttl_seconds: Option<u64>,
    dispatch: Option<String>,
    trigger_url: Option<String>,
    trigger_path: Option<String>,
    trigger_timeout_ms: Option<u64>,
    trigger_verify_tls: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
