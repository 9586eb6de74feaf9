//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::content::Namespace;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "resort-cache";
const ENV_PREFIX: &str = "RESORT_CACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3100;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;
const DEFAULT_REVALIDATION_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the resort-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "resort-cache",
    version,
    about = "Resort content cache and revalidation service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "RESORT_CACHE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the revalidation receiver.
    Serve(Box<ServeArgs>),
    /// Send a signed revalidation request for the given tags.
    Revalidate(RevalidateArgs),
    /// Advance a namespace version.
    #[command(name = "bump-version")]
    BumpVersion(NamespaceArgs),
    /// Print a namespace version.
    Version(NamespaceArgs),
    /// Delete cache keys.
    Evict(EvictArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverride {
    /// Override the store backend (memory|redis|rest).
    #[arg(long = "store-backend", value_name = "BACKEND")]
    pub store_backend: Option<String>,

    /// Override the store URL.
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Toggle the cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RevalidateArgs {
    /// Override the revalidation endpoint.
    #[arg(long = "endpoint", value_name = "URL")]
    pub endpoint: Option<String>,

    /// Tags to revalidate.
    #[arg(value_name = "TAG", required = true)]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct NamespaceArgs {
    #[command(flatten)]
    pub store: StoreOverride,

    /// Content namespace (rooms, offers, events, attractions, blogs, gallery,
    /// testimonials, static_images).
    #[arg(value_name = "NAMESPACE")]
    pub namespace: Namespace,
}

#[derive(Debug, Args, Clone)]
pub struct EvictArgs {
    #[command(flatten)]
    pub store: StoreOverride,

    /// Keys to delete, without the configured prefix.
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub revalidation: RevalidationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
    Rest,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "rest" => Ok(Self::Rest),
            other => Err(format!("unknown backend `{other}` (memory|redis|rest)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: Option<String>,
    pub token: Option<String>,
    pub memory_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub key_prefix: String,
    pub default_ttl: Option<Duration>,
    pub single_flight: bool,
}

#[derive(Debug, Clone)]
pub struct RevalidationSettings {
    pub endpoint: Option<Url>,
    pub secret: Option<String>,
    pub session_token: Option<String>,
    pub timeout: Duration,
}

impl Default for RevalidationSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            secret: None,
            session_token: None,
            timeout: Duration::from_secs(DEFAULT_REVALIDATION_TIMEOUT_SECS),
        }
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
        Some(Command::Revalidate(args)) => {
            if let Some(endpoint) = args.endpoint.as_ref() {
                raw.revalidation.endpoint = Some(endpoint.clone());
            }
        }
        Some(Command::BumpVersion(args)) | Some(Command::Version(args)) => {
            raw.apply_store_override(&args.store)
        }
        Some(Command::Evict(args)) => raw.apply_store_override(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    revalidation: RawRevalidationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }

        self.apply_store_override(&overrides.store);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(backend) = overrides.store_backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            revalidation,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let cache = build_cache_settings(cache)?;
        let revalidation = build_revalidation_settings(revalidation)?;

        Ok(Self {
            server,
            logging,
            store,
            cache,
            revalidation,
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

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend.as_deref() {
        Some(value) => StoreBackend::from_str(value)
            .map_err(|reason| LoadError::invalid("store.backend", reason))?,
        None => StoreBackend::Memory,
    };

    let url = non_blank(store.url);
    let token = non_blank(store.token);

    match backend {
        StoreBackend::Memory => {}
        StoreBackend::Redis => {
            let url = url
                .as_deref()
                .ok_or_else(|| LoadError::invalid("store.url", "required for the redis backend"))?;
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(LoadError::invalid(
                    "store.url",
                    "must use the redis:// or rediss:// scheme",
                ));
            }
        }
        StoreBackend::Rest => {
            let url = url
                .as_deref()
                .ok_or_else(|| LoadError::invalid("store.url", "required for the rest backend"))?;
            parse_http_url(url).map_err(|reason| LoadError::invalid("store.url", reason))?;
            if token.is_none() {
                return Err(LoadError::invalid(
                    "store.token",
                    "required for the rest backend",
                ));
            }
        }
    }

    let memory_capacity = store.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
    let memory_capacity = NonZeroUsize::new(memory_capacity)
        .ok_or_else(|| LoadError::invalid("store.memory_capacity", "must be greater than zero"))?
        .get();

    Ok(StoreSettings {
        backend,
        url,
        token,
        memory_capacity,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = match cache.default_ttl_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.default_ttl_seconds",
                "must be greater than zero; omit it to store entries without expiry",
            ));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        key_prefix: cache.key_prefix.unwrap_or_default(),
        default_ttl,
        single_flight: cache.single_flight.unwrap_or(true),
    })
}

fn build_revalidation_settings(
    revalidation: RawRevalidationSettings,
) -> Result<RevalidationSettings, LoadError> {
    let endpoint = match non_blank(revalidation.endpoint) {
        Some(value) => Some(
            parse_http_url(&value)
                .map_err(|reason| LoadError::invalid("revalidation.endpoint", reason))?,
        ),
        None => None,
    };
    let secret = non_blank(revalidation.secret);
    let session_token = non_blank(revalidation.session_token);

    if endpoint.is_some() {
        if secret.is_none() {
            return Err(LoadError::invalid(
                "revalidation.secret",
                "required when revalidation.endpoint is set",
            ));
        }
        if session_token.is_none() {
            return Err(LoadError::invalid(
                "revalidation.session_token",
                "required when revalidation.endpoint is set",
            ));
        }
    }

    let timeout_secs = revalidation
        .timeout_seconds
        .unwrap_or(DEFAULT_REVALIDATION_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "revalidation.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RevalidationSettings {
        endpoint,
        secret,
        session_token,
        timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    url: Option<String>,
    token: Option<String>,
    memory_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    key_prefix: Option<String>,
    default_ttl_seconds: Option<u64>,
    single_flight: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevalidationSettings {
    endpoint: Option<String>,
    secret: Option<String>,
    session_token: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|err| format!("invalid URL `{value}`: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme `{other}`")),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
