use serde::Deserialize;
use std::env;
use std::path::PathBuf;



#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub redis_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub claim_max_attempts: u32,
    pub claim_backoff_ms: u64,
    pub retention_hours: i64,
    /// Origin used when building share links, e.g. `https://play.example.com`.
    pub public_origin: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            claim_max_attempts: 8,
            claim_backoff_ms: 25,
            retention_hours: 3,
            public_origin: "http://127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    pub cron_key: String,
}


#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub maintenance: MaintenanceConfig,
}

/// Environment layer used when `RUN_ENV` is unset.
pub const DEFAULT_RUN_ENV: &str = "local";

/// Name of the `config/{env}.toml` layer this process loads.
pub fn run_env() -> String {
    env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_RUN_ENV.into())
}

impl Config {

    pub fn load() -> Result<Self, config::ConfigError> {
        let env = run_env();

        let builder = ::config::Config::builder()
            .add_source(config::File::with_name("config/default.toml"))
            .add_source(
                config::File::with_name(&format!("config/{}", env))
                    .required(false),
            )
            .add_source(config::File::with_name("config/local.toml").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
