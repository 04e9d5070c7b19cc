//! Configuration Module
//!
//! Handles loading and managing store and server configuration from environment variables.

use std::env;

/// Default store byte budget (100 MB)
pub const DEFAULT_MAX_BYTE_SIZE: usize = 100 * 1024 * 1024;

/// Memory store parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum aggregate entry size in bytes, 0 disables the budget
    pub max_byte_size: usize,
    /// Store binary items as-is instead of serializing them
    pub allow_mixed_content: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_byte_size: DEFAULT_MAX_BYTE_SIZE,
            allow_mixed_content: false,
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Store byte budget
    pub max_byte_size: usize,
    /// Binary passthrough in the store
    pub allow_mixed_content: bool,
    /// HTTP server port
    pub server_port: u16,
    /// Segment served by the HTTP surface
    pub segment: String,
    /// Policy expiry in milliseconds for writes without explicit TTL
    pub expires_in: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_BYTE_SIZE` - Store byte budget (default: 104857600)
    /// - `ALLOW_MIXED_CONTENT` - Binary passthrough (default: false)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_SEGMENT` - Segment name (default: "default")
    /// - `EXPIRES_IN` - Default expiry in milliseconds (default: 300000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_byte_size: parse_var("MAX_BYTE_SIZE").unwrap_or(defaults.max_byte_size),
            allow_mixed_content: parse_var("ALLOW_MIXED_CONTENT")
                .unwrap_or(defaults.allow_mixed_content),
            server_port: parse_var("SERVER_PORT").unwrap_or(defaults.server_port),
            segment: env::var("CACHE_SEGMENT")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.segment),
            expires_in: parse_var("EXPIRES_IN").unwrap_or(defaults.expires_in),
        }
    }

    /// Store parameters derived from this configuration.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_byte_size: self.max_byte_size,
            allow_mixed_content: self.allow_mixed_content,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_byte_size: DEFAULT_MAX_BYTE_SIZE,
            allow_mixed_content: false,
            server_port: 3000,
            segment: "default".to_string(),
            expires_in: 300_000,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_byte_size, 100 * 1024 * 1024);
        assert!(!config.allow_mixed_content);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.segment, "default");
        assert_eq!(config.expires_in, 300_000);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("MAX_BYTE_SIZE");
        env::remove_var("ALLOW_MIXED_CONTENT");
        env::remove_var("SERVER_PORT");
        env::remove_var("CACHE_SEGMENT");
        env::remove_var("EXPIRES_IN");

        let config = Config::from_env();
        assert_eq!(config.max_byte_size, DEFAULT_MAX_BYTE_SIZE);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.segment, "default");
        assert_eq!(config.expires_in, 300_000);
    }

    #[test]
    fn test_store_config_from_config() {
        let config = Config {
            max_byte_size: 2048,
            allow_mixed_content: true,
            ..Config::default()
        };
        assert_eq!(
            config.store_config(),
            StoreConfig {
                max_byte_size: 2048,
                allow_mixed_content: true,
            }
        );
    }
}
