use std::{env, net::SocketAddr, str::FromStr};

use chrono::Duration;

use crate::error::AppError;

pub const DEFAULT_SESSION_TTL_SECS: i64 = 60 * 60 * 24 * 30;
pub const DEFAULT_SESSION_LIST_LIMIT: u32 = 50;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub cookie_secret: String,
    pub session_ttl: Duration,
    pub session_list_limit: u32,
    /// Adds the `Secure` flag to the session cookie.
    pub secure_cookies: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://loginbook.db?mode=rwc".to_string());
        let listen_addr: SocketAddr = parse_var("APP_LISTEN_ADDR", "127.0.0.1:3000")?;

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-loginbook-cookie-secret-change-me".to_string());

        let ttl_secs: i64 = parse_var("SESSION_TTL_SECS", &DEFAULT_SESSION_TTL_SECS.to_string())?;
        if ttl_secs <= 0 {
            return Err(AppError::Config("SESSION_TTL_SECS must be positive".into()));
        }

        let session_list_limit: u32 =
            parse_var("SESSION_LIST_LIMIT", &DEFAULT_SESSION_LIST_LIMIT.to_string())?;
        if session_list_limit == 0 {
            return Err(AppError::Config("SESSION_LIST_LIMIT must be positive".into()));
        }

        let secure_cookies = env::var("APP_ENV")
            .map(|value| value.eq_ignore_ascii_case("production"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            listen_addr,
            cookie_secret,
            session_ttl: Duration::seconds(ttl_secs),
            session_list_limit,
            secure_cookies,
        })
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|err| AppError::Config(format!("invalid {name}: {err}")))
}
