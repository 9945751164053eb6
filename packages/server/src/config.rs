use std::path::PathBuf;

use common::config::{JudgeConfig, SandboxConfig, ToolchainConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use worker::WorkerSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            cors: CorsConfig::default(),
        }
    }
}

/// Where users and problems are loaded from.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    /// TOML catalog file. When unset the stores start empty.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("CODEARENA_CONFIG").unwrap_or_else(|_| "config/config".into());
        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            // Load from config/config.toml unless CODEARENA_CONFIG points elsewhere
            .add_source(File::with_name(&file).required(false))
            // Override from environment (e.g., CODEARENA__JUDGE__WORKERS)
            .add_source(
                Environment::with_prefix("CODEARENA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            judge: self.judge.clone(),
            sandbox: self.sandbox.clone(),
            toolchain: self.toolchain.clone(),
        }
    }
}
