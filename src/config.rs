use crate::domain::entities::ServerConfig;
use crate::domain::value_objects::{Algorithm, FailureCoupling};
use crate::infrastructure::health_checker::{HealthCheckConfig, HealthCheckType};
use crate::infrastructure::metrics_aggregator::MetricsConfig;
use crate::infrastructure::response_cache::CacheConfig;
use std::time::Duration;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid backend {0}: {1}")]
    InvalidBackend(String, String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Selection and sticky-session settings.
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    pub algorithm: Algorithm,
    pub sticky_sessions: bool,
    pub session_ttl: Duration,
    pub session_cleanup_interval: Duration,
    pub failure_coupling: FailureCoupling,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::RoundRobin,
            sticky_sessions: false,
            session_ttl: Duration::from_secs(3600),
            session_cleanup_interval: Duration::from_secs(300),
            failure_coupling: FailureCoupling::Shared,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    // Listeners
    pub listen_addr: String,
    pub admin_enabled: bool,
    pub admin_listen_addr: String,
    pub debug: bool,

    // Upstreams
    pub backends: Vec<ServerConfig>,
    pub forward_timeout: Duration,

    pub load_balancer: LoadBalancerConfig,
    pub health_check: HealthCheckConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            admin_enabled: true,
            admin_listen_addr: "0.0.0.0:8081".to_string(),
            debug: false,
            backends: Vec::new(),
            forward_timeout: Duration::from_millis(30_000),
            load_balancer: LoadBalancerConfig::default(),
            health_check: HealthCheckConfig::default(),
            cache: CacheConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Check every option against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_check.interval.is_zero() {
            return Err(ConfigError::Zero("health check interval"));
        }
        if self.health_check.timeout.is_zero() {
            return Err(ConfigError::Zero("health check timeout"));
        }
        if self.health_check.max_failures == 0 {
            return Err(ConfigError::Zero("health check max failures"));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::Zero("cache max size"));
        }
        if self.cache.cleanup_interval.is_zero() {
            return Err(ConfigError::Zero("cache cleanup interval"));
        }
        if self.load_balancer.sticky_sessions {
            if self.load_balancer.session_ttl.is_zero() {
                return Err(ConfigError::Zero("session ttl"));
            }
            if self.load_balancer.session_cleanup_interval.is_zero() {
                return Err(ConfigError::Zero("session cleanup interval"));
            }
        }
        if self.metrics.system_history == 0 {
            return Err(ConfigError::Zero("system history"));
        }
        if self.metrics.system_sample_interval.is_zero() {
            return Err(ConfigError::Zero("system sample interval"));
        }
        if self.forward_timeout.is_zero() {
            return Err(ConfigError::Zero("forward timeout"));
        }

        for backend in &self.backends {
            if !(backend.url.starts_with("http://") || backend.url.starts_with("https://")) {
                return Err(ConfigError::InvalidBackend(
                    backend.url.clone(),
                    "url must start with http:// or https://".to_string(),
                ));
            }
            if backend.weight == 0 {
                return Err(ConfigError::InvalidBackend(
                    backend.url.clone(),
                    "weight must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Parse `url[|weight[|max_connections]]` entries separated by commas.
pub fn parse_backends(raw: &str, health_path: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.split('|').map(str::trim);
            let url = parts.next().unwrap_or_default();
            let mut server = ServerConfig::new(url).with_health_path(health_path);

            if let Some(weight) = parts.next() {
                let weight = weight.parse().map_err(|_| {
                    ConfigError::InvalidBackend(entry.to_string(), format!("bad weight {:?}", weight))
                })?;
                server = server.with_weight(weight);
            }
            if let Some(max) = parts.next() {
                let max = max.parse().map_err(|_| {
                    ConfigError::InvalidBackend(
                        entry.to_string(),
                        format!("bad max connections {:?}", max),
                    )
                })?;
                server = server.with_max_connections(max);
            }
            Ok(server)
        })
        .collect()
}

/// Fit a parsed number into a narrower type, rejecting rather than truncating.
fn narrow<T: TryFrom<u64>>(key: &'static str, value: u64) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build the configuration from an arbitrary variable lookup.
pub fn load_config_from<F>(var: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = GatewayConfig::default();

    let string = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());
    let flag = |key: &str, default: bool| {
        var(key)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(default)
    };
    let number = |key: &str, default: u64| {
        var(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(default)
    };
    let count_u32 = |key: &'static str, default: u32| -> Result<u32, ConfigError> {
        narrow(key, number(key, default.into()))
    };
    let count_usize = |key: &'static str, default: usize| -> Result<usize, ConfigError> {
        narrow(key, number(key, default as u64))
    };
    let secs = |key: &str, default: Duration| Duration::from_secs(number(key, default.as_secs()));
    let millis = |key: &str, default: Duration| {
        Duration::from_millis(number(key, default.as_millis() as u64))
    };

    let algorithm = match var("GATEWAY_LB_ALGORITHM") {
        Some(v) => Algorithm::parse(&v).ok_or(ConfigError::InvalidValue {
            key: "GATEWAY_LB_ALGORITHM",
            value: v,
        })?,
        None => defaults.load_balancer.algorithm,
    };

    let failure_coupling = match var("GATEWAY_FAILURE_COUPLING") {
        Some(v) => FailureCoupling::parse(&v).ok_or(ConfigError::InvalidValue {
            key: "GATEWAY_FAILURE_COUPLING",
            value: v,
        })?,
        None => defaults.load_balancer.failure_coupling,
    };

    let check_type = match var("GATEWAY_HEALTH_CHECK_TYPE") {
        Some(v) => HealthCheckType::parse(&v).ok_or(ConfigError::InvalidValue {
            key: "GATEWAY_HEALTH_CHECK_TYPE",
            value: v,
        })?,
        None => defaults.health_check.check_type,
    };

    let health_path = string("GATEWAY_HEALTH_PATH", "/health");
    let backends = parse_backends(&var("GATEWAY_BACKENDS").unwrap_or_default(), &health_path)?;

    let config = GatewayConfig {
        listen_addr: string("GATEWAY_LISTEN_ADDR", &defaults.listen_addr),
        admin_enabled: flag("GATEWAY_ADMIN_ENABLED", defaults.admin_enabled),
        admin_listen_addr: string("GATEWAY_ADMIN_LISTEN_ADDR", &defaults.admin_listen_addr),
        debug: var("DEBUG").is_some(),
        backends,
        forward_timeout: millis("GATEWAY_FORWARD_TIMEOUT_MS", defaults.forward_timeout),
        load_balancer: LoadBalancerConfig {
            algorithm,
            sticky_sessions: flag("GATEWAY_STICKY_SESSIONS", defaults.load_balancer.sticky_sessions),
            session_ttl: secs("GATEWAY_SESSION_TTL_SECS", defaults.load_balancer.session_ttl),
            session_cleanup_interval: secs(
                "GATEWAY_SESSION_CLEANUP_SECS",
                defaults.load_balancer.session_cleanup_interval,
            ),
            failure_coupling,
        },
        health_check: HealthCheckConfig {
            interval: secs("GATEWAY_HEALTH_INTERVAL_SECS", defaults.health_check.interval),
            timeout: millis("GATEWAY_HEALTH_TIMEOUT_MS", defaults.health_check.timeout),
            max_failures: count_u32(
                "GATEWAY_HEALTH_MAX_FAILURES",
                defaults.health_check.max_failures,
            )?,
            check_type,
        },
        cache: CacheConfig {
            enabled: flag("GATEWAY_CACHE_ENABLED", defaults.cache.enabled),
            default_ttl: secs("GATEWAY_CACHE_TTL_SECS", defaults.cache.default_ttl),
            max_size: count_usize("GATEWAY_CACHE_MAX_SIZE", defaults.cache.max_size)?,
            cleanup_interval: secs("GATEWAY_CACHE_CLEANUP_SECS", defaults.cache.cleanup_interval),
        },
        metrics: MetricsConfig {
            window: secs("GATEWAY_METRICS_WINDOW_SECS", defaults.metrics.window),
            system_history: count_usize("GATEWAY_SYSTEM_HISTORY", defaults.metrics.system_history)?,
            system_sample_interval: secs(
                "GATEWAY_SYSTEM_SAMPLE_SECS",
                defaults.metrics.system_sample_interval,
            ),
            snapshot_log_interval: secs(
                "GATEWAY_SNAPSHOT_LOG_SECS",
                defaults.metrics.snapshot_log_interval,
            ),
        },
    };

    config.validate()?;
    Ok(config)
}
