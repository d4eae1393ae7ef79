use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub models: ModelsConfig,
    pub catalog: CatalogConfig,
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// 账本存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// 模型服务配置, URL 缺省即视为该能力未加载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub detector_url: Option<String>,
    pub recognizer_url: Option<String>,
    pub timeout_secs: u64,
    pub detection_score_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub threads: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/expiry_scan".to_string(),
                max_connections: 20,
                acquire_timeout_secs: 10,
            },
            storage: StorageConfig {
                backend: StorageBackend::Postgres,
            },
            models: ModelsConfig {
                detector_url: None,
                recognizer_url: None,
                timeout_secs: 30,
                detection_score_threshold: 0.3,
            },
            catalog: CatalogConfig {
                base_url: "https://apib2b.delsud.com.ar/api/search/v3/materiales".to_string(),
                bearer_token: None,
                timeout_secs: 5,
            },
            workers: WorkersConfig { threads: 4 },
        }
    }
}

impl AppConfig {
    /// 加载配置: 默认值 -> config/default.toml -> $EXPIRY_SCAN_CONFIG -> EXPIRY_SCAN__* 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", i64::from(defaults.database.max_connections))?
            .set_default("database.acquire_timeout_secs", defaults.database.acquire_timeout_secs)?
            .set_default("storage.backend", "postgres")?
            .set_default("models.timeout_secs", defaults.models.timeout_secs)?
            .set_default(
                "models.detection_score_threshold",
                defaults.models.detection_score_threshold,
            )?
            .set_default("catalog.base_url", defaults.catalog.base_url)?
            .set_default("catalog.timeout_secs", defaults.catalog.timeout_secs)?
            .set_default("workers.threads", defaults.workers.threads as u64)?
            .add_source(File::with_name("config/default").required(false));

        if let Ok(path) = std::env::var("EXPIRY_SCAN_CONFIG") {
            builder = builder.add_source(File::with_name(&path));
        }

        builder
            .add_source(
                Environment::with_prefix("EXPIRY_SCAN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_falls_back_to_defaults() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.models.timeout_secs, 30);
        assert!(config.workers.threads >= 1);
    }

    #[test]
    fn test_storage_backend_is_lowercase_on_the_wire() {
        let json = serde_json::to_string(&StorageBackend::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
        let parsed: StorageBackend = serde_json::from_str("\"postgres\"").unwrap();
        assert_eq!(parsed, StorageBackend::Postgres);
    }
}
