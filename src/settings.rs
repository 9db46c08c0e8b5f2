use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub listen: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Store {
    pub backend: Backend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Auth {
    pub session_ttl_secs: i64,
    pub admin_username: String,
    pub admin_phone: String,
    pub admin_password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Retry {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: Server,
    pub store: Store,
    pub postgres: Postgres,
    pub auth: Auth,
    pub retry: Retry,
}

impl Settings {
    /// Loads `path` (any format `config` understands) with defaults for every
    /// section, then applies `EARN__SECTION__KEY` environment overrides.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.listen", "0.0.0.0:8080")?
            .set_default("store.backend", "memory")?
            .set_default("postgres.url", "postgres://localhost/earn")?
            .set_default("postgres.max_connections", 5)?
            .set_default("auth.session_ttl_secs", 7 * 24 * 3600)?
            .set_default("auth.admin_username", "admin")?
            .set_default("auth.admin_phone", "01000000000")?
            .set_default("auth.admin_password", "change-me")?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 100)?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("EARN").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::new("does-not-exist.toml").unwrap();
        assert_eq!(settings.store.backend, Backend::Memory);
        assert_eq!(settings.server.listen, "0.0.0.0:8080");
        assert_eq!(settings.retry, Retry::default());
        assert_eq!(settings.auth.admin_username, "admin");
    }
}
