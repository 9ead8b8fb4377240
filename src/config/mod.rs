use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecycleConfig,
    pub access: AccessConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = LifecycleConfig::default();
        let event_page_size = numeric_var("APP_EVENT_PAGE_SIZE", defaults.event_page_size)?;
        if event_page_size == 0 || event_page_size > MAX_EVENT_PAGE_SIZE {
            return Err(ConfigError::InvalidNumber {
                key: "APP_EVENT_PAGE_SIZE",
            });
        }

        let lifecycle = LifecycleConfig {
            event_page_size,
            acknowledgment_days: numeric_var(
                "APP_ACKNOWLEDGMENT_DAYS",
                defaults.acknowledgment_days,
            )?,
            due_soon_days: numeric_var("APP_DUE_SOON_DAYS", defaults.due_soon_days)?,
            description_release_days: numeric_var(
                "APP_DESCRIPTION_RELEASE_DAYS",
                defaults.description_release_days,
            )?,
            notification_queue: numeric_var("APP_NOTIFICATION_QUEUE", defaults.notification_queue)?,
        };

        if lifecycle.notification_queue == 0 {
            return Err(ConfigError::InvalidNumber {
                key: "APP_NOTIFICATION_QUEUE",
            });
        }

        let access = match env::var("APP_STAFF_TOKENS") {
            Ok(raw) => AccessConfig::parse(&raw)?,
            Err(_) => AccessConfig::default(),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            lifecycle,
            access,
        })
    }
}

fn numeric_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Bearer tokens that identify agency staff, mapped to their user ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessConfig {
    pub staff_tokens: HashMap<String, String>,
}

impl AccessConfig {
    /// Parse `token=user` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut staff_tokens = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (token, user) = pair
                .split_once('=')
                .map(|(token, user)| (token.trim(), user.trim()))
                .filter(|(token, user)| !token.is_empty() && !user.is_empty())
                .ok_or(ConfigError::InvalidStaffTokens)?;
            staff_tokens.insert(token.to_string(), user.to_string());
        }
        Ok(Self { staff_tokens })
    }
}

/// Upper bound for a single page of the event log.
pub const MAX_EVENT_PAGE_SIZE: usize = 100;

/// Deadlines, pagination, and notification queue sizing for the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Default page size for event log listings.
    pub event_page_size: usize,
    /// Days granted for the initial acknowledgment when a request is submitted.
    pub acknowledgment_days: u32,
    /// Window ahead of a due date that flags a request as due soon.
    pub due_soon_days: u32,
    /// Days after closure before the agency description becomes public.
    pub description_release_days: u32,
    /// Capacity of the outbound notification queue.
    pub notification_queue: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            event_page_size: 10,
            acknowledgment_days: 5,
            due_soon_days: 2,
            description_release_days: 10,
            notification_queue: 256,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
    InvalidStaffTokens,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a positive integer within range")
            }
            ConfigError::InvalidStaffTokens => {
                write!(f, "APP_STAFF_TOKENS must be a comma-separated list of token=user pairs")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::InvalidStaffTokens => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
