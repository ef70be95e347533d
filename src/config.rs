//! Application configuration loaded from environment variables.
//!
//! `DATABASE_URL` and `JWT_SECRET` are mandatory; everything else has a
//! development-friendly default.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::HeaderValue;
use thiserror::Error;

use crate::db::DbConfig;

/// Database URL that selects the in-process store instead of Postgres.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Upper bound for `JWT_EXPIRY_DAYS` (ten years).
pub const MAX_JWT_EXPIRY_DAYS: i64 = 3650;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_days: i64,
    pub environment: String,
    pub bind_addr: SocketAddr,
    pub allowed_origins: Vec<HeaderValue>,
    /// Root directory for avatar and cover uploads, served under `/uploads`.
    pub upload_dir: PathBuf,
    pub bcrypt_cost: u32,
    pub db: DbConfig,
}

impl AppConfig {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET")?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let jwt_expiry_days = parse_or(&lookup, "JWT_EXPIRY_DAYS", 30)?;
        if !(1..=MAX_JWT_EXPIRY_DAYS).contains(&jwt_expiry_days) {
            return Err(ConfigError::Invalid {
                var: "JWT_EXPIRY_DAYS",
                value: jwt_expiry_days.to_string(),
            });
        }

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = parse_or(&lookup, "PORT", 5001)?;
        let bind_addr: SocketAddr =
            format!("{}:{}", host, port)
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    var: "HOST",
                    value: host.clone(),
                })?;

        let upload_dir = PathBuf::from(lookup("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()));

        let bcrypt_cost: u32 = parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                var: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        let db = DbConfig {
            max_connections: parse_or(&lookup, "DB_POOL_MAX", 10)?,
            min_connections: parse_or(&lookup, "DB_POOL_MIN", 2)?,
            connect_timeout_secs: parse_or(&lookup, "DB_CONNECT_TIMEOUT", 10)?,
            idle_timeout_secs: parse_or(&lookup, "DB_IDLE_TIMEOUT", 300)?,
        };

        let config = Self {
            database_url,
            jwt_secret,
            jwt_expiry_days,
            allowed_origins: allowed_origins(&lookup),
            environment,
            bind_addr,
            upload_dir,
            bcrypt_cost,
            db,
        };

        if config.is_production() && config.jwt_secret.len() < 32 {
            tracing::warn!(
                "SECURITY: JWT_SECRET is shorter than 32 bytes. \
                 Use a long random value in production."
            );
        }

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

/// ALLOWED_ORIGINS (comma-separated) wins over FRONTEND_ORIGIN; local dev
/// origins are used when neither is set.
fn allowed_origins<F>(lookup: &F) -> Vec<HeaderValue>
where
    F: Fn(&str) -> Option<String>,
{
    lookup("ALLOWED_ORIGINS")
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            lookup("FRONTEND_ORIGIN")
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:5173"),
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ]
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_database_url_is_fatal() {
        let result = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", "s")]));
        assert_eq!(result.unwrap_err(), ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn test_missing_jwt_secret_is_fatal() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/courses"),
            ("JWT_SECRET", "  "),
        ]));
        assert_eq!(result.unwrap_err(), ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.jwt_expiry_days, 30);
        assert_eq!(config.bind_addr.port(), 5001);
        assert_eq!(config.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.db.max_connections, 10);
        assert!(config.uses_memory_store());
        assert!(!config.is_production());
        assert!(!config.allowed_origins.is_empty());
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "secret"),
            ("PORT", "not-a-port"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { var: "PORT", .. })
        ));
    }

    #[test]
    fn test_jwt_expiry_days_bounds() {
        for value in ["0", "3651", "9223372036854775807"] {
            let result = AppConfig::from_lookup(lookup_from(&[
                ("DATABASE_URL", "memory://"),
                ("JWT_SECRET", "secret"),
                ("JWT_EXPIRY_DAYS", value),
            ]));
            assert!(matches!(
                result,
                Err(ConfigError::Invalid { var: "JWT_EXPIRY_DAYS", .. })
            ));
        }

        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "secret"),
            ("JWT_EXPIRY_DAYS", "3650"),
        ]))
        .unwrap();
        assert_eq!(config.jwt_expiry_days, MAX_JWT_EXPIRY_DAYS);
    }

    #[test]
    fn test_bcrypt_cost_bounds() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "secret"),
            ("BCRYPT_COST", "4"),
        ]))
        .unwrap();
        assert_eq!(config.bcrypt_cost, 4);

        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "secret"),
            ("BCRYPT_COST", "40"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { var: "BCRYPT_COST", .. })
        ));
    }

    #[test]
    fn test_allowed_origins_parsed() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "secret"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example"),
        ]))
        .unwrap();
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.allowed_origins[1], "https://b.example");
    }
}
