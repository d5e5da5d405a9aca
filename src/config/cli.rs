use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the softcache binary.
#[derive(Debug, Parser)]
#[command(name = "softcache", version, about = "Soft-expiry cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SOFTCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the soft expiration applied when a call sets none.
    #[arg(long = "cache-default-expiration-seconds", value_name = "SECONDS")]
    pub cache_default_expiration_seconds: Option<i64>,

    /// Override how long a refresh lock outlives the soft expiration.
    #[arg(long = "cache-lock-margin-seconds", value_name = "SECONDS")]
    pub cache_lock_margin_seconds: Option<u64>,

    /// Override the hard TTL of cache entries (0 disables it).
    #[arg(long = "cache-hard-ttl-seconds", value_name = "SECONDS")]
    pub cache_hard_ttl_seconds: Option<u64>,

    /// Override how refreshes are dispatched (trigger|deferred).
    #[arg(long = "cache-dispatch", value_name = "MODE")]
    pub cache_dispatch: Option<String>,

    /// Override the base URL the trigger calls back into.
    #[arg(long = "cache-trigger-url", value_name = "URL")]
    pub cache_trigger_url: Option<String>,

    /// Override the path the trigger layer answers on.
    #[arg(long = "cache-trigger-path", value_name = "PATH")]
    pub cache_trigger_path: Option<String>,

    /// Override the trigger call timeout in milliseconds.
    #[arg(long = "cache-trigger-timeout-ms", value_name = "MS")]
    pub cache_trigger_timeout_ms: Option<u64>,

    /// Toggle TLS certificate verification for trigger calls.
    #[arg(
        long = "cache-trigger-verify-tls",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_trigger_verify_tls: Option<bool>,
}
