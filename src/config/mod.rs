//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS ("*" allows any)
    pub client_origin: String,

    /// Maximum non-bot players per room
    pub room_capacity: usize,
    /// Inactivity before the one-time warning
    pub idle_warn: Duration,
    /// Inactivity before forced disconnect
    pub idle_kick: Duration,
    /// Fuse duration after a bomb plant
    pub bomb_fuse: Duration,

    /// Room the liveness bot keeps populated; None disables the bot
    pub bot_room: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            room_capacity: parse_or("ROOM_CAPACITY", 5)?,
            idle_warn: Duration::from_secs(parse_or("IDLE_WARN_SECS", 110)?),
            idle_kick: Duration::from_secs(parse_or("IDLE_KICK_SECS", 120)?),
            bomb_fuse: Duration::from_secs(parse_or("BOMB_FUSE_SECS", 40)?),

            bot_room: env::var("BOT_ROOM").ok().filter(|s| !s.is_empty()),
        };

        if config.idle_warn >= config.idle_kick {
            return Err(ConfigError::IdleWindow);
        }

        Ok(config)
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Environment variable {0} is not a valid number")]
    InvalidNumber(&'static str),

    #[error("IDLE_WARN_SECS must be less than IDLE_KICK_SECS")]
    IdleWindow,
}
