//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use bridge_core::billing::PriceTable;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which deployment the process runs in. Development mocks are only ever
/// allowed in `Development`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "production" | "prod" => Ok(AppEnv::Production),
            other => Err(format!("'{other}' is not one of development, production")),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: Level,
    pub app_env: AppEnv,
    pub app_url: String,
    pub cors_origin: String,
    pub http_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub translation_model: String,
    pub blob_token: Option<String>,
    pub blob_api_url: String,
    pub blob_public_host: String,
    pub resend_api_key: Option<String>,
    pub email_from: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub prices: PriceTable,
    pub admin_api_key: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let or_default = |name: &str, default: &str| var(name).unwrap_or_else(|| default.to_string());

        // --- Server and Database Settings ---
        let bind_address = parse_var("BIND_ADDRESS", &or_default("BIND_ADDRESS", "0.0.0.0:3000"))?;
        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", &or_default("DB_MAX_CONNECTIONS", "5"))?;

        let log_level_str = or_default("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let app_env = or_default("APP_ENV", "production")
            .parse::<AppEnv>()
            .map_err(|e| ConfigError::InvalidValue("APP_ENV".to_string(), e))?;
        let app_url = or_default("APP_URL", "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        let cors_origin = var("CORS_ORIGIN").unwrap_or_else(|| app_url.clone());
        let http_timeout =
            Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", &or_default("HTTP_TIMEOUT_SECS", "120"))?);

        // --- Adapter Settings (keys are optional here and checked at startup) ---
        let openai_api_key = var("OPENAI_API_KEY");
        let translation_model = or_default("TRANSLATION_MODEL", "gpt-4o");
        let blob_token = var("BLOB_READ_WRITE_TOKEN");
        let blob_api_url = or_default("BLOB_API_URL", "https://blob.vercel-storage.com")
            .trim_end_matches('/')
            .to_string();
        let blob_public_host = or_default("BLOB_PUBLIC_HOST", "public.blob.vercel-storage.com");
        let resend_api_key = var("RESEND_API_KEY");
        let email_from = or_default("EMAIL_FROM", "Bridge <noreply@bridge.app>");

        // --- Billing and Admin ---
        let stripe_secret_key = var("STRIPE_SECRET_KEY");
        let stripe_webhook_secret = var("STRIPE_WEBHOOK_SECRET");
        let prices = PriceTable {
            starter: var("STRIPE_PRICE_STARTER"),
            pro: var("STRIPE_PRICE_PRO"),
            enterprise: var("STRIPE_PRICE_ENTERPRISE"),
        };
        let admin_api_key = var("ADMIN_API_KEY");

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            app_env,
            app_url,
            cors_origin,
            http_timeout,
            openai_api_key,
            translation_model,
            blob_token,
            blob_api_url,
            blob_public_host,
            resend_api_key,
            email_from,
            stripe_secret_key,
            stripe_webhook_secret,
            prices,
            admin_api_key,
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnv::Development
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_database_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/bridge")]).unwrap();
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.app_env, AppEnv::Production);
        assert_eq!(config.cors_origin, "http://localhost:3000");
        assert_eq!(config.translation_model, "gpt-4o");
        assert!(config.openai_api_key.is_none());
        assert!(config.stripe_secret_key.is_none());
        assert_eq!(config.blob_public_host, "public.blob.vercel-storage.com");
    }

    #[test]
    fn database_url_is_required() {
        let err = load(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(name) if name == "DATABASE_URL"));
    }

    #[test]
    fn malformed_values_name_their_variable() {
        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/bridge"),
            ("DB_MAX_CONNECTIONS", "many"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "DB_MAX_CONNECTIONS"));

        let err = load(&[
            ("DATABASE_URL", "postgres://localhost/bridge"),
            ("APP_ENV", "staging"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(name, _) if name == "APP_ENV"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = load(&[
            ("DATABASE_URL", "postgres://localhost/bridge"),
            ("APP_URL", "https://bridge.app/"),
            ("OPENAI_API_KEY", "  "),
            ("STRIPE_PRICE_PRO", "price_123"),
            ("STRIPE_SECRET_KEY", "sk_test_1"),
        ])
        .unwrap();
        assert_eq!(config.app_url, "https://bridge.app");
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.prices.pro.as_deref(), Some("price_123"));
        assert_eq!(config.stripe_secret_key.as_deref(), Some("sk_test_1"));
    }
}
