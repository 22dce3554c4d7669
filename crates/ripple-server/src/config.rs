use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Placeholder secret used when none is configured. Tokens signed with it
/// are forgeable by anyone who has read this file.
pub const DEV_SECRET: &str = "dev-secret-change-me";

/// Longest session token lifetime accepted from the environment (one year).
pub const MAX_TOKEN_TTL_HOURS: i64 = 8760;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub sweep_interval: Duration,
    pub post_limit: usize,
    pub vote_limit: usize,
    pub rate_window: Duration,
    pub send_timeout: Duration,
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup. Unset keys take their default;
    /// set but malformed values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("RIPPLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&lookup, "RIPPLE_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", host, port))?;

        let token_ttl_hours: i64 = parse(&lookup, "RIPPLE_TOKEN_TTL_HOURS", 24)?;
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&token_ttl_hours) {
            anyhow::bail!("RIPPLE_TOKEN_TTL_HOURS must be between 1 and {}", MAX_TOKEN_TTL_HOURS);
        }
        let sweep_secs: u64 = parse(&lookup, "RIPPLE_SWEEP_INTERVAL_SECS", 300)?;
        if sweep_secs == 0 {
            anyhow::bail!("RIPPLE_SWEEP_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            addr,
            db_path: lookup("RIPPLE_DB_PATH")
                .unwrap_or_else(|| "ripple.db".into())
                .into(),
            jwt_secret: lookup("RIPPLE_JWT_SECRET")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEV_SECRET.into()),
            token_ttl: chrono::Duration::hours(token_ttl_hours),
            sweep_interval: Duration::from_secs(sweep_secs),
            post_limit: parse(&lookup, "RIPPLE_POST_LIMIT", 30)?,
            vote_limit: parse(&lookup, "RIPPLE_VOTE_LIMIT", 100)?,
            rate_window: Duration::from_secs(parse(&lookup, "RIPPLE_RATE_WINDOW_SECS", 60)?),
            send_timeout: Duration::from_millis(parse(&lookup, "RIPPLE_SEND_TIMEOUT_MS", 2000)?),
            secure_cookies: parse(&lookup, "RIPPLE_SECURE_COOKIES", false)?,
        })
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_SECRET
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.db_path, PathBuf::from("ripple.db"));
        assert!(config.uses_dev_secret());
        assert_eq!(config.token_ttl, chrono::Duration::hours(24));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.post_limit, 30);
        assert_eq!(config.vote_limit, 100);
        assert_eq!(config.rate_window, Duration::from_secs(60));
        assert_eq!(config.send_timeout, Duration::from_millis(2000));
        assert!(!config.secure_cookies);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("RIPPLE_HOST", "127.0.0.1"),
            ("RIPPLE_PORT", "8080"),
            ("RIPPLE_JWT_SECRET", "s3cret"),
            ("RIPPLE_POST_LIMIT", "5"),
            ("RIPPLE_SECURE_COOKIES", "true"),
        ])
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:8080".parse().unwrap());
        assert!(!config.uses_dev_secret());
        assert_eq!(config.post_limit, 5);
        assert!(config.secure_cookies);
    }

    #[test]
    fn test_malformed_values_rejected() {
        assert!(config(&[("RIPPLE_PORT", "eighty")]).is_err());
        assert!(config(&[("RIPPLE_VOTE_LIMIT", "-1")]).is_err());
        assert!(config(&[("RIPPLE_SECURE_COOKIES", "yes")]).is_err());
        assert!(config(&[("RIPPLE_SWEEP_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("RIPPLE_TOKEN_TTL_HOURS", "0")]).is_err());
    }

    #[test]
    fn test_token_ttl_is_bounded() {
        let longest = config(&[("RIPPLE_TOKEN_TTL_HOURS", "8760")]).unwrap();
        assert_eq!(longest.token_ttl, chrono::Duration::hours(MAX_TOKEN_TTL_HOURS));

        assert!(config(&[("RIPPLE_TOKEN_TTL_HOURS", "8761")]).is_err());
        assert!(config(&[("RIPPLE_TOKEN_TTL_HOURS", "9223372036854775807")]).is_err());
    }
}
