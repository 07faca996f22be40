//! Connection configuration
//!
//! Connection parameters come from the environment, optionally seeded from a
//! `.env` file. `DATABASE_URL` overrides the individual `DB_*` variables.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;

/// Database configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Full URL; takes precedence over the individual parts
    pub url_override: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "assessment_db".to_string(),
            url_override: None,
            max_connections: 1,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseConfig {
    /// Read `DATABASE_URL` / `DB_HOST` / `DB_PORT` / `DB_USER` /
    /// `DB_PASSWORD` / `DB_NAME` / `DB_POOL_SIZE` from the environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("DB_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = raw.as_str(), "invalid DB_PORT, using {}", defaults.port);
                defaults.port
            }),
            None => defaults.port,
        };

        Self {
            host: get("DB_HOST").unwrap_or(defaults.host),
            port,
            user: get("DB_USER").unwrap_or(defaults.user),
            // An empty password is legitimate, so no blank filtering here
            password: lookup("DB_PASSWORD").unwrap_or(defaults.password),
            database: get("DB_NAME").unwrap_or(defaults.database),
            url_override: get("DATABASE_URL"),
            max_connections: get("DB_POOL_SIZE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_connections),
            connection_timeout: defaults.connection_timeout,
        }
    }

    /// Connection URL with credentials percent-encoded
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.url_override {
            return url.clone();
        }

        let base = format!("postgres://{}:{}", self.host, self.port);
        match Url::parse(&base) {
            Ok(mut url) => {
                // set_username/set_password only fail for cannot-be-a-base URLs
                let _ = url.set_username(&self.user);
                if !self.password.is_empty() {
                    let _ = url.set_password(Some(&self.password));
                }
                url.set_path(&self.database);
                url.to_string()
            }
            Err(e) => {
                warn!("Could not build database URL from parts: {}", e);
                format!(
                    "postgres://{}@{}:{}/{}",
                    self.user, self.host, self.port, self.database
                )
            }
        }
    }
}

/// Load a `.env` file into the process environment.
///
/// With an explicit path that does not exist, falls back to the default
/// `.env` lookup. A missing file is never an error.
pub fn load_env(path: Option<&Path>) {
    let loaded = match path {
        Some(p) if p.exists() => dotenvy::from_path(p).map(|_| p.to_path_buf()),
        _ => dotenvy::dotenv(),
    };
    match loaded {
        Ok(p) => debug!("Loaded environment from {}", p.display()),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => warn!("Failed to load .env file: {}", e),
    }
}

/// Replace the password in a database URL with `***` for logging
pub fn mask_database_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
