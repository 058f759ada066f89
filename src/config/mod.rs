use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::relay::{RelayOptions, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub cors: CorsConfig,
    pub umami: UmamiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Database settings alone, for tools that do not serve HTTP
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match var("DATABASE_BACKEND")
            .unwrap_or_else(|| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => DatabaseBackend::Sqlite,
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "memory" => DatabaseBackend::Memory,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres, memory"
                );
                DatabaseBackend::Sqlite
            }
        };

        Ok(DatabaseConfig {
            backend,
            url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://./museum.db".to_string()),
            max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 5u32)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub login: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Empty means any origin
    pub allowed_origins: Vec<String>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct UmamiConfig {
    pub enabled: bool,
    pub url: String,
    pub website_id: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub domain: String,
    pub queue_capacity: usize,
    pub workers: usize,
}

impl std::fmt::Debug for UmamiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UmamiConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("website_id", &self.website_id)
            .field("username", &self.username)
            .field("domain", &self.domain)
            .field("queue_capacity", &self.queue_capacity)
            .field("workers", &self.workers)
            .finish()
    }
}

impl UmamiConfig {
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            website_id: self.website_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            domain: self.domain.clone(),
            queue_capacity: self.queue_capacity,
            workers: self.workers,
            ..RelayOptions::new(self.url.clone())
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_vars<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let var_or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let host = var_or("SERVER_HOST", "127.0.0.1");
        let port = parse_or(&var, "SERVER_PORT", 8080u16)?;
        let shutdown_timeout_secs = parse_or(&var, "SERVER_SHUTDOWN_TIMEOUT_SECS", 30u64)?;

        let admin_login = var("ADMIN_LOGIN").context("ADMIN_LOGIN must be set")?;
        let admin_password = var("ADMIN_PASSWORD").context("ADMIN_PASSWORD must be set")?;

        let allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty() && o != "*")
                    .collect()
            })
            .unwrap_or_default();

        let umami_enabled = var("UMAMI_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let umami = if umami_enabled {
            let url = var("UMAMI_URL").context("UMAMI_URL must be set when UMAMI_ENABLED=true")?;
            let website_id = var("UMAMI_WEBSITE_ID");

            // Credentials are only needed to look up or create the website
            let (username, password, domain) = if website_id.is_some() {
                (
                    var("UMAMI_USERNAME").unwrap_or_default(),
                    var("UMAMI_PASSWORD").unwrap_or_default(),
                    var("UMAMI_DOMAIN").unwrap_or_default(),
                )
            } else {
                (
                    var("UMAMI_USERNAME")
                        .context("UMAMI_USERNAME must be set when UMAMI_WEBSITE_ID is not")?,
                    var("UMAMI_PASSWORD")
                        .context("UMAMI_PASSWORD must be set when UMAMI_WEBSITE_ID is not")?,
                    var("UMAMI_DOMAIN")
                        .context("UMAMI_DOMAIN must be set when UMAMI_WEBSITE_ID is not")?,
                )
            };

            UmamiConfig {
                enabled: true,
                url,
                website_id,
                username,
                password,
                domain,
                queue_capacity: parse_or(&var, "UMAMI_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
                workers: parse_or(&var, "UMAMI_WORKERS", DEFAULT_WORKERS)?,
            }
        } else {
            UmamiConfig {
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
                workers: DEFAULT_WORKERS,
                ..UmamiConfig::default()
            }
        };

        Ok(Config {
            database: DatabaseConfig::from_vars(&lookup)?,
            server: ServerConfig {
                host,
                port,
                shutdown_timeout_secs,
            },
            admin: AdminConfig {
                login: admin_login,
                password: admin_password,
            },
            cors: CorsConfig { allowed_origins },
            umami,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
