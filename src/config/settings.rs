//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Shared store configuration
    pub redis: RedisSettings,

    /// Cache-aside defaults
    pub cache: CacheSettings,

    /// Session store defaults
    pub session: SessionSettings,

    /// Rate limiting configuration
    pub rate_limit: RateLimitSettings,

    /// Push gateway configuration
    pub realtime: RealtimeSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// Which store implementation backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// A Redis server at `redis.url`
    Redis,
    /// In-process store, single instance only
    Memory,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis connection URL
    pub url: String,

    /// Store implementation
    pub backend: StoreBackend,

    /// Timeout for opening each connection, in milliseconds
    pub connect_timeout_ms: u64,
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// TTL applied to cache-aside reads (seconds)
    pub default_ttl_secs: u64,
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Default session lifetime (seconds)
    pub ttl_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Requests per window on general API routes (fixed window)
    pub api_limit: u32,
    pub api_window_secs: u64,

    /// Requests per window on session routes (fixed window)
    pub auth_limit: u32,
    pub auth_window_secs: u64,

    /// Gateway connection attempts per window (sliding window)
    pub websocket_limit: u32,
    pub websocket_window_secs: u64,
}

/// Push gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSettings {
    /// Heartbeat interval announced in HELLO (milliseconds)
    pub heartbeat_interval_ms: u64,

    /// Silence after which a session is dropped (milliseconds)
    pub heartbeat_timeout_ms: u64,

    /// Time allowed between connect and IDENTIFY (seconds)
    pub identify_timeout_secs: u64,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for verifying tokens
    pub secret: String,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("redis.backend", "redis")?
            .set_default("redis.connect_timeout_ms", 5000_i64)?
            .set_default("cache.default_ttl_secs", 300_i64)?
            .set_default("session.ttl_secs", 86400_i64)?
            .set_default("rate_limit.api_limit", 100)?
            .set_default("rate_limit.api_window_secs", 60)?
            .set_default("rate_limit.auth_limit", 20)?
            .set_default("rate_limit.auth_window_secs", 60)?
            .set_default("rate_limit.websocket_limit", 10)?
            .set_default("rate_limit.websocket_window_secs", 60)?
            .set_default("realtime.heartbeat_interval_ms", 30000_i64)?
            .set_default("realtime.heartbeat_timeout_ms", 60000_i64)?
            .set_default("realtime.identify_timeout_secs", 30_i64)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__REDIS__BACKEND=memory -> redis.backend = "memory"
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Checks cross-field constraints the deserializer cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.realtime.heartbeat_timeout_ms <= self.realtime.heartbeat_interval_ms {
            return Err(ConfigError::Message(
                "realtime.heartbeat_timeout_ms must exceed realtime.heartbeat_interval_ms".into(),
            ));
        }
        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            server: ServerSettings {
                host: "127.0.0.1".into(),
                port: 0,
            },
            redis: RedisSettings {
                url: "redis://127.0.0.1:6379".into(),
                backend: StoreBackend::Memory,
                connect_timeout_ms: 1000,
            },
            cache: CacheSettings {
                default_ttl_secs: 300,
            },
            session: SessionSettings { ttl_secs: 86400 },
            rate_limit: RateLimitSettings {
                api_limit: 100,
                api_window_secs: 60,
                auth_limit: 20,
                auth_window_secs: 60,
                websocket_limit: 10,
                websocket_window_secs: 60,
            },
            realtime: RealtimeSettings {
                heartbeat_interval_ms: 30000,
                heartbeat_timeout_ms: 60000,
                identify_timeout_secs: 30,
            },
            jwt: JwtSettings {
                secret: "x".repeat(MIN_JWT_SECRET_LENGTH),
            },
            cors: CorsSettings {
                allowed_origins: vec![],
            },
            environment: "test".into(),
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(settings().validate().is_ok());
        assert_eq!(settings().server_addr(), "127.0.0.1:0");
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut settings = settings();
        settings.jwt.secret = "short".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_below_interval() {
        let mut settings = settings();
        settings.realtime.heartbeat_timeout_ms = settings.realtime.heartbeat_interval_ms;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_backend_deserializes_lowercase() {
        let backend: StoreBackend = serde_json::from_str(r#""memory""#).unwrap();
        assert_eq!(backend, StoreBackend::Memory);
    }
}
