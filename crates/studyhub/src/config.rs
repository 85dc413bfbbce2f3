//! Configuration for the study backend

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyHubConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// On-disk locations
    pub storage: StorageConfig,
    /// External document analysis program
    pub analysis: AnalysisConfig,
    /// Analysis job retention
    pub jobs: JobsConfig,
    /// Identity verification
    pub auth: AuthConfig,
    /// Chat-with-paper program
    pub chat: ChatConfig,
}

impl StudyHubConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("Failed to parse {}: {}", path.display(), e))
                })?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `PORT`, `STUDYHUB_ENV`, `STUDYHUB_DATABASE` and `STUDYHUB_DATA_DIR`
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(env) = std::env::var("STUDYHUB_ENV") {
            match env.to_lowercase().as_str() {
                "production" => self.server.environment = Environment::Production,
                "development" => self.server.environment = Environment::Development,
                other => tracing::warn!("Ignoring unknown STUDYHUB_ENV value '{}'", other),
            }
        }
        if let Ok(data_dir) = std::env::var("STUDYHUB_DATA_DIR") {
            self.storage = StorageConfig::rooted_at(PathBuf::from(data_dir));
        }
        if let Ok(db) = std::env::var("STUDYHUB_DATABASE") {
            self.storage.database_path = PathBuf::from(db);
        }
    }
}

/// Deployment environment, controls error verbosity
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,
    /// Maximum size of a single uploaded document in bytes (default: 10MB)
    pub max_upload_size: usize,
    /// Deployment environment
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            enable_cors: true,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            max_upload_size: 10 * 1024 * 1024, // 10MB
            environment: Environment::Development,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Final location of study documents, served under /documents
    pub documents_dir: PathBuf,
    /// Temporary location of uploads awaiting analysis
    pub uploads_dir: PathBuf,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Activity logs (study clicks, chat history)
    pub logs_dir: PathBuf,
}

impl StorageConfig {
    /// All storage paths below a single data directory
    pub fn rooted_at(root: PathBuf) -> Self {
        Self {
            documents_dir: root.join("documents"),
            uploads_dir: root.join("uploads"),
            database_path: root.join("studyhub.db"),
            logs_dir: root.join("logs"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::rooted_at(root)
    }
}

/// External analysis program configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Program to execute
    pub program: String,
    /// Arguments placed before the document path (usually the script)
    pub leading_args: Vec<String>,
    /// Flag that introduces the output directory argument
    pub output_dir_flag: String,
    /// Directory the program writes its result file into
    pub output_dir: PathBuf,
    /// Working directory for the program
    pub working_dir: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            leading_args: vec!["analysis/analyze_document.py".to_string()],
            output_dir_flag: "--output_dir".to_string(),
            output_dir: std::env::temp_dir().join("studyhub-analysis"),
            working_dir: None,
        }
    }
}

/// Analysis job retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Age after which a job is evicted regardless of status (default: 1 hour)
    pub retention_secs: u64,
    /// Interval between sweeps (default: 15 minutes)
    pub sweep_interval_secs: u64,
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60 * 60,
            sweep_interval_secs: 15 * 60,
        }
    }
}

/// Identity verification configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Token verification endpoint of the identity provider.
    /// When unset, only `static_tokens` are accepted.
    pub verify_url: Option<String>,
    /// Request timeout for the verification endpoint in seconds
    pub timeout_secs: Option<u64>,
    /// Fixed token → identity table (development and tests)
    pub static_tokens: HashMap<String, StaticIdentity>,
}

/// Identity bound to a static token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticIdentity {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Chat-with-paper program configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Program to execute
    pub program: String,
    /// Chat handler script, passed as the first argument
    pub script_path: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            script_path: PathBuf::from("chatbot/live_chat_handler.py"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StudyHubConfig::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.max_upload_size, 10 * 1024 * 1024);
        assert_eq!(config.jobs.retention(), Duration::from_secs(3600));
        assert_eq!(config.jobs.sweep_interval(), Duration::from_secs(900));
        assert!(config.auth.verify_url.is_none());
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8081
environment = "production"

[jobs]
retention_secs = 120

[auth.static_tokens.dev-token]
uid = "researcher-1"
email = "r1@example.org"
"#
        )
        .unwrap();

        let config: StudyHubConfig =
            toml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.jobs.retention_secs, 120);
        assert_eq!(config.jobs.sweep_interval_secs, 900);
        assert_eq!(config.auth.static_tokens["dev-token"].uid, "researcher-1");
    }

    #[test]
    fn test_rooted_storage() {
        let storage = StorageConfig::rooted_at(PathBuf::from("/srv/studyhub"));
        assert_eq!(storage.documents_dir, PathBuf::from("/srv/studyhub/documents"));
        assert_eq!(storage.database_path, PathBuf::from("/srv/studyhub/studyhub.db"));
    }
}
