use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::workflows::verification::domain::TaskKind;

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
    pub engine: EngineConfig,
    pub requirements: RequirementsConfig,
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
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            engine: EngineConfig::from_env()?,
            requirements: RequirementsConfig::from_env()?,
        })
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Processing limits, retry backoff, and provider SLA settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub concurrency_limit: usize,
    pub max_initiate_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
    pub stale_after_minutes: u32,
    /// Zero disables the background poller.
    pub poll_interval_seconds: u64,
    pub timeout_failure_kinds: Vec<TaskKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_initiate_attempts: 5,
            backoff_base_seconds: 5,
            backoff_max_seconds: 300,
            stale_after_minutes: 3 * 24 * 60,
            poll_interval_seconds: 30,
            timeout_failure_kinds: Vec::new(),
        }
    }
}

impl EngineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let concurrency_limit =
            positive_var::<usize>("ENGINE_CONCURRENCY_LIMIT", defaults.concurrency_limit)?;
        let max_initiate_attempts =
            positive_var::<u32>("ENGINE_MAX_INITIATE_ATTEMPTS", defaults.max_initiate_attempts)?;
        let backoff_base_seconds =
            number_var::<u64>("ENGINE_BACKOFF_BASE_SECONDS", defaults.backoff_base_seconds)?;
        let backoff_max_seconds =
            number_var::<u64>("ENGINE_BACKOFF_MAX_SECONDS", defaults.backoff_max_seconds)?;
        let stale_after_minutes =
            positive_var::<u32>("ENGINE_STALE_AFTER_MINUTES", defaults.stale_after_minutes)?;
        let poll_interval_seconds =
            number_var::<u64>("ENGINE_POLL_INTERVAL_SECONDS", defaults.poll_interval_seconds)?;
        let timeout_failure_kinds = env::var("ENGINE_TIMEOUT_FAILURE_KINDS")
            .map(|raw| parse_kind_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            concurrency_limit,
            max_initiate_attempts,
            backoff_base_seconds,
            backoff_max_seconds,
            stale_after_minutes,
            poll_interval_seconds,
            timeout_failure_kinds,
        })
    }
}

/// Required task kinds per subject type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementsConfig {
    pub employee_kinds: Vec<TaskKind>,
    pub contractor_kinds: Vec<TaskKind>,
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        let mut employee_kinds = TaskKind::background_checks().to_vec();
        employee_kinds.extend(TaskKind::onboarding_agreements());

        Self {
            employee_kinds,
            contractor_kinds: vec![
                TaskKind::IDENTITY_CHECK,
                TaskKind::CRIMINAL_CHECK,
                TaskKind::CONFIDENTIALITY_SIGNATURE,
                TaskKind::IP_ASSIGNMENT_SIGNATURE,
            ],
        }
    }
}

impl RequirementsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            employee_kinds: kinds_var(
                "ONBOARDING_EMPLOYEE_KINDS",
                "employee",
                defaults.employee_kinds,
            )?,
            contractor_kinds: kinds_var(
                "ONBOARDING_CONTRACTOR_KINDS",
                "contractor",
                defaults.contractor_kinds,
            )?,
        })
    }
}

fn number_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn positive_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = number_var(key, default)?;
    if value <= T::default() {
        return Err(ConfigError::InvalidNumber {
            key,
            value: env::var(key).unwrap_or_default(),
        });
    }
    Ok(value)
}

fn kinds_var(
    key: &'static str,
    subject_type: &'static str,
    default: Vec<TaskKind>,
) -> Result<Vec<TaskKind>, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };

    let kinds = parse_kind_list(&raw);
    if kinds.is_empty() {
        return Err(ConfigError::EmptyRequirements { subject_type });
    }
    Ok(kinds)
}

fn parse_kind_list(raw: &str) -> Vec<TaskKind> {
    raw.split(',').filter_map(TaskKind::parse).collect()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str, value: String },
    EmptyRequirements { subject_type: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} must be a positive number, got '{value}'")
            }
            ConfigError::EmptyRequirements { subject_type } => {
                write!(f, "requirement list for {subject_type} must name at least one kind")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::EmptyRequirements { .. } => None,
        }
    }
}
