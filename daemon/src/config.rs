use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use anyhow::{Context, Result};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name shown for the server node in client trees.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Unset means the system socket path.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

fn default_server_name() -> String { "local".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            socket_path: None,
        }
    }
}

impl ServerConfig {
    pub fn socket(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(common::DEFAULT_SOCKET_PATH))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Unset means the system catalog path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Databases local SQL steps may target.
    #[serde(default = "default_databases")]
    pub databases: Vec<String>,
}

fn default_databases() -> Vec<String> { vec!["postgres".to_string()] }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            databases: default_databases(),
        }
    }
}

impl StoreConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(common::DEFAULT_DB_PATH))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Audit rows older than this are pruned at startup; 0 keeps everything.
    #[serde(default = "default_audit_days")]
    pub audit_days: u32,
}

fn default_audit_days() -> u32 { 365 }

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            audit_days: default_audit_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Merge with another config, preferring values from other
    pub fn merge(&mut self, other: Config) {
        self.server.name = other.server.name;
        if other.server.socket_path.is_some() {
            self.server.socket_path = other.server.socket_path;
        }

        self.logging.level = other.logging.level;
        if other.logging.output.is_some() {
            self.logging.output = other.logging.output;
        }

        if other.store.path.is_some() {
            self.store.path = other.store.path;
        }
        if !other.store.databases.is_empty() {
            self.store.databases = other.store.databases;
        }

        self.retention.audit_days = other.retention.audit_days;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_defaults() {
        let config: Config = serde_yaml::from_str("server:\n  name: prod\n").unwrap();
        assert_eq!(config.server.name, "prod");
        assert_eq!(config.server.socket_path, None);
        assert_eq!(config.server.socket(), PathBuf::from(common::DEFAULT_SOCKET_PATH));
        assert_eq!(config.store.databases, vec!["postgres".to_string()]);
        assert_eq!(config.retention.audit_days, 365);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_store_section() {
        let config: Config = toml::from_str(
            "[store]\npath = \"/tmp/agent.db\"\ndatabases = [\"app\", \"reporting\"]\n",
        )
        .unwrap();
        assert_eq!(config.store.catalog_path(), PathBuf::from("/tmp/agent.db"));
        assert_eq!(config.store.databases.len(), 2);
        assert_eq!(config.server.name, "local");
    }

    #[test]
    fn test_merge_keeps_databases_when_other_empty() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.server.name = "replica".to_string();
        other.store.databases.clear();
        other.logging.output = Some(PathBuf::from("/tmp/pgajob.log"));

        base.merge(other);
        assert_eq!(base.server.name, "replica");
        assert_eq!(base.store.databases, vec!["postgres".to_string()]);
        assert_eq!(base.logging.output, Some(PathBuf::from("/tmp/pgajob.log")));
    }

    #[test]
    fn test_merge_keeps_paths_the_file_omits() {
        let mut base = Config::default();
        base.server.socket_path = Some(PathBuf::from(common::USER_SOCKET_PATH));
        base.store.path = Some(PathBuf::from(common::USER_DB_PATH));

        let file: Config = serde_yaml::from_str("server:\n  name: prod\n").unwrap();
        base.merge(file);
        assert_eq!(base.server.name, "prod");
        assert_eq!(base.server.socket(), PathBuf::from(common::USER_SOCKET_PATH));
        assert_eq!(base.store.catalog_path(), PathBuf::from(common::USER_DB_PATH));

        let file: Config = toml::from_str("[store]\npath = \"/srv/agent.db\"\n").unwrap();
        base.merge(file);
        assert_eq!(base.store.catalog_path(), PathBuf::from("/srv/agent.db"));
        assert_eq!(base.server.socket(), PathBuf::from(common::USER_SOCKET_PATH));
    }

    #[test]
    fn test_unknown_extension_rejected() {
        assert!(Config::from_file(&PathBuf::from("config.ini")).is_err());
    }
}
