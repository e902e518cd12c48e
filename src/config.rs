// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup (a `.env` file is
//! honoured through `dotenvy` in `main`).
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `APP_ENV` | `development` or `production` | `development` |
//! | `DATA_DIR` | Root directory for the database, uploads and audit logs | `./data` |
//! | `JWT_SECRET` | HMAC secret for access and refresh tokens | Required in production |
//! | `JWT_ISSUER` | `iss` claim written into and expected from tokens | `dbt-portal` |
//! | `ACCESS_TOKEN_TTL_SECS` | Access token lifetime | `3600` |
//! | `REFRESH_TOKEN_TTL_SECS` | Refresh token lifetime | `604800` |
//! | `FIELD_ENCRYPTION_KEY` | Secret the Aadhaar/bank field key is derived from | Required in production |
//! | `BCRYPT_COST` | bcrypt work factor | `12` |
//! | `DISBURSEMENT_DELAY_SECS` | Delay before an initiated disbursement settles | `5` |
//! | `DISBURSEMENT_POLL_SECS` | Settlement worker poll interval | `1` |
//! | `GRIEVANCE_SLA_HOURS` | Default grievance resolution target | `72` |
//! | `UPLOAD_MAX_BYTES` | Maximum decoded document size | `5242880` |
//! | `UPLOAD_ALLOWED_MIME` | Comma separated MIME allow-list | `application/pdf,image/jpeg,image/png` |
//! | `RATE_LIMIT_MAX_REQUESTS` | Requests allowed per IP per window | `300` |
//! | `RATE_LIMIT_WINDOW_SECS` | Rate limit window | `900` |
//! | `TRUST_FORWARDED_FOR` | Use `X-Forwarded-For` as the client address (behind a proxy only) | `false` |
//! | `COOKIE_SECURE` | Mark auth cookies `Secure` | `true` in production |
//! | `BOOTSTRAP_ADMIN_EMAIL` | Email of the admin created on first start | Optional |
//! | `BOOTSTRAP_ADMIN_PASSWORD` | Password of the bootstrap admin | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::path::PathBuf;
use std::time::Duration;

/// Secret used for tokens when `JWT_SECRET` is unset outside production.
const DEV_JWT_SECRET: &str = "dbt-portal-development-jwt-secret";

/// Secret used for field encryption when `FIELD_ENCRYPTION_KEY` is unset outside production.
const DEV_FIELD_KEY: &str = "dbt-portal-development-field-key";

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set when APP_ENV=production")]
    MissingSecret(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Credentials for the admin account seeded at startup.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub field_encryption_key: String,
    pub bcrypt_cost: u32,
    pub disbursement_delay: Duration,
    pub disbursement_poll_interval: Duration,
    pub grievance_sla_hours: u32,
    pub upload_max_bytes: usize,
    pub upload_allowed_mime: Vec<String>,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub cookie_secure: bool,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("development") | Some("dev") | Some("test") | None => Environment::Development,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "APP_ENV",
                    value: other.to_string(),
                })
            }
        };

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if environment.is_production() => {
                return Err(ConfigError::MissingSecret("JWT_SECRET"))
            }
            None => DEV_JWT_SECRET.to_string(),
        };

        let field_encryption_key = match get("FIELD_ENCRYPTION_KEY") {
            Some(key) => key,
            None if environment.is_production() => {
                return Err(ConfigError::MissingSecret("FIELD_ENCRYPTION_KEY"))
            }
            None => DEV_FIELD_KEY.to_string(),
        };

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let bootstrap_admin = match (get("BOOTSTRAP_ADMIN_EMAIL"), get("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            _ => None,
        };

        let upload_allowed_mime = get("UPLOAD_ALLOWED_MIME")
            .unwrap_or_else(|| "application/pdf,image/jpeg,image/png".to_string())
            .split(',')
            .map(|m| m.trim().to_ascii_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080)?,
            environment,
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".to_string())),
            jwt_secret,
            jwt_issuer: get("JWT_ISSUER").unwrap_or_else(|| "dbt-portal".to_string()),
            access_token_ttl: Duration::from_secs(parse_or(&get, "ACCESS_TOKEN_TTL_SECS", 3600)?),
            refresh_token_ttl: Duration::from_secs(parse_or(
                &get,
                "REFRESH_TOKEN_TTL_SECS",
                7 * 24 * 3600,
            )?),
            field_encryption_key,
            bcrypt_cost: parse_or(&get, "BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            disbursement_delay: Duration::from_secs(parse_or(&get, "DISBURSEMENT_DELAY_SECS", 5)?),
            disbursement_poll_interval: Duration::from_secs(parse_or(
                &get,
                "DISBURSEMENT_POLL_SECS",
                1,
            )?),
            grievance_sla_hours: parse_or(&get, "GRIEVANCE_SLA_HOURS", 72)?,
            upload_max_bytes: parse_or(&get, "UPLOAD_MAX_BYTES", 5 * 1024 * 1024)?,
            upload_allowed_mime,
            rate_limit_max_requests: parse_or(&get, "RATE_LIMIT_MAX_REQUESTS", 300)?,
            rate_limit_window: Duration::from_secs(parse_or(&get, "RATE_LIMIT_WINDOW_SECS", 900)?),
            trust_forwarded_for: parse_or(&get, "TRUST_FORWARDED_FOR", false)?,
            cookie_secure: parse_or(&get, "COOKIE_SECURE", environment.is_production())?,
            bootstrap_admin,
            log_format,
        })
    }

    /// Development configuration rooted at `data_dir`, with a cheap bcrypt cost.
    ///
    /// Used by tests and local tooling.
    pub fn development(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::from_lookup(|_| None).unwrap_or_else(|_| unreachable!());
        config.data_dir = data_dir.into();
        config.bcrypt_cost = 4;
        config
    }

    /// Either secret fell back to its built-in development value.
    pub fn uses_development_secrets(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET || self.field_encryption_key == DEV_FIELD_KEY
    }

    /// Socket address string the server binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value: raw,
        }),
        None => Ok(default),
    }
}
