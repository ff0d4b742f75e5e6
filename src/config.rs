use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::helper::random_string;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Cloud placement is enabled when this section is present
    #[serde(default)]
    pub cos: Option<CosStorageConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Bearer token for upload and delete routes. Empty disables the check.
    #[serde(default)]
    pub api_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Uploads up to this size are hashed in memory instead of a temp file
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_id_length")]
    pub id_length: usize,
    #[serde(default)]
    pub file_salt: String,
    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: usize,
    #[serde(default = "default_downloads")]
    pub default_downloads: i64,
    #[serde(default = "default_expiry_days")]
    pub default_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Tencent COS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CosStorageConfig {
    pub secret_id: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_url_expire")]
    pub url_expire_seconds: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    53842
}

fn default_public_url() -> String {
    "http://localhost:53842".to_string()
}

fn default_db_path() -> String {
    "data/dropvault.db".to_string()
}

fn default_data_dir() -> String {
    "data/files".to_string()
}

fn default_max_file_size_mb() -> u64 {
    102400
}

fn default_max_memory_mb() -> u64 {
    50
}

fn default_id_length() -> usize {
    15
}

fn default_max_parallel_uploads() -> usize {
    4
}

fn default_downloads() -> i64 {
    1
}

fn default_expiry_days() -> i64 {
    14
}

fn default_cleanup_interval() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_url_expire() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            api_token: String::new(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_file_size_mb: default_max_file_size_mb(),
            max_memory_mb: default_max_memory_mb(),
            id_length: default_id_length(),
            file_salt: String::new(),
            max_parallel_uploads: default_max_parallel_uploads(),
            default_downloads: default_downloads(),
            default_expiry_days: default_expiry_days(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StorageConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_file_salt()?;
        tracing::info!(
            "Storage config: data_dir={}, max_file_size_mb={}, cloud={}",
            config.storage.data_dir,
            config.storage.max_file_size_mb,
            config.cos.is_some()
        );
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from config.toml or conf.ini
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml", "conf.ini", "data/conf.ini"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config = Self::from_toml(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: DV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(val) = env::var("DV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = parse_env("DV_CONF_SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(val) = env::var("DV_CONF_SERVER_PUBLIC_URL") {
            self.server.public_url = val;
        }
        if let Ok(val) = env::var("DV_CONF_SERVER_API_TOKEN") {
            self.server.api_token = val;
        }

        // Database overrides
        if let Ok(val) = env::var("DV_CONF_DATABASE_BACKEND") {
            match val.to_lowercase().as_str() {
                "sqlite" => self.database.backend = DatabaseBackend::Sqlite,
                "memory" => self.database.backend = DatabaseBackend::Memory,
                other => tracing::warn!("Ignoring unknown database backend {}", other),
            }
        }
        if let Ok(val) = env::var("DV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // Storage overrides
        if let Ok(val) = env::var("DV_CONF_STORAGE_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Some(v) = parse_env("DV_CONF_STORAGE_MAX_FILE_SIZE_MB") {
            self.storage.max_file_size_mb = v;
        }
        if let Some(v) = parse_env("DV_CONF_STORAGE_MAX_MEMORY_MB") {
            self.storage.max_memory_mb = v;
        }
        if let Some(v) = parse_env("DV_CONF_STORAGE_ID_LENGTH") {
            self.storage.id_length = v;
        }
        if let Ok(val) = env::var("DV_CONF_STORAGE_FILE_SALT") {
            self.storage.file_salt = val;
        }
        if let Some(v) = parse_env("DV_CONF_STORAGE_MAX_PARALLEL_UPLOADS") {
            self.storage.max_parallel_uploads = v;
        }

        // Cleanup overrides
        if let Some(v) = parse_env("DV_CONF_CLEANUP_INTERVAL_SECS") {
            self.cleanup.interval_secs = v;
        }
        if let Some(v) = parse_env("DV_CONF_CLEANUP_SWEEP_INTERVAL_SECS") {
            self.cleanup.sweep_interval_secs = v;
        }
    }

    /// Ensure a per-install salt for file passwords exists and is persisted
    fn ensure_file_salt(&mut self) -> anyhow::Result<()> {
        if !self.storage.file_salt.is_empty() {
            return Ok(());
        }
        let salt_path = self.storage.data_path().join(".file_salt");
        if salt_path.exists() {
            self.storage.file_salt = fs::read_to_string(&salt_path)?.trim().to_string();
            tracing::info!("Loaded persisted file salt from {:?}", salt_path);
        } else {
            let salt = random_string(30);
            fs::write(&salt_path, &salt)?;
            self.storage.file_salt = salt;
            tracing::info!("Generated and persisted new file salt to {:?}", salt_path);
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if self.database.backend == DatabaseBackend::Sqlite {
            if let Some(parent) = Path::new(&self.database.path).parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::create_dir_all(&self.storage.data_dir)?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.id_length, 15);
        assert_eq!(config.storage.max_memory_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.cleanup.interval_secs, 3600);
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert!(config.cos.is_none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 8080

            [database]
            backend = "memory"

            [storage]
            max_file_size_mb = 10

            [cos]
            secret_id = "id"
            secret_key = "key"
            bucket = "files-1250000000"
            region = "ap-guangzhou"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
        assert_eq!(config.storage.max_file_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.storage.default_downloads, 1);
        let cos = config.cos.unwrap();
        assert_eq!(cos.bucket, "files-1250000000");
        assert_eq!(cos.url_expire_seconds, 300);
    }

    #[test]
    fn test_file_salt_is_persisted() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = temp.path().to_string_lossy().to_string();

        config.ensure_file_salt().unwrap();
        let salt = config.storage.file_salt.clone();
        assert_eq!(salt.len(), 30);

        let mut reloaded = Config::default();
        reloaded.storage.data_dir = config.storage.data_dir.clone();
        reloaded.ensure_file_salt().unwrap();
        assert_eq!(reloaded.storage.file_salt, salt);
    }
}
