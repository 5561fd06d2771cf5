use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::RepoCoordinates;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub git: GitConfig,
    pub github: GitHubConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_string")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    #[serde(with = "duration_string")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_string")]
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitConfig {
    /// Root under which working copies live as `<owner>/<repo>`
    pub workspace_dir: PathBuf,
    pub max_history_depth: usize,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: Option<String>,
    /// Branch to list; the repository's default branch when unset
    pub branch: Option<String>,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub docker_binary: String,
    pub scanner_image: String,
    pub sonarqube_url: String,
    pub token: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 10,
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("./repositories"),
            max_history_depth: 10_000,
            timeout: Duration::from_secs(120),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
            branch: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            docker_binary: "docker".to_string(),
            scanner_image: "sonarsource/sonar-scanner-cli:latest".to_string(),
            sonarqube_url: "http://localhost:9000".to_string(),
            token: None,
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout: Duration::from_secs(900),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults, then the optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(host) = var("REPOGRAPH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("REPOGRAPH_PORT") {
            self.server.port = port.parse()?;
        }
        if let Some(workspace) = var("REPOGRAPH_WORKSPACE") {
            self.git.workspace_dir = PathBuf::from(workspace);
        }
        if let Some(url) = var("DATABASE_URL") {
            self.storage.database_url = Some(url);
            self.storage.backend = StorageBackend::Postgres;
        }
        if let Some(token) = var("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(api_url) = var("GITHUB_API_URL") {
            self.github.api_url = api_url;
        }
        if let Some(url) = var("SONARQUBE_URL") {
            self.analysis.sonarqube_url = url;
        }
        Ok(())
    }

    /// Working copy location for a repository
    pub fn destination_for(&self, coords: &RepoCoordinates) -> PathBuf {
        self.git
            .workspace_dir
            .join(&coords.owner)
            .join(&coords.repo)
    }
}

// Helper module for duration serialization
mod duration_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = format!("{}s", duration.as_secs());
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Some(stripped) = s.strip_suffix('s') {
            let secs: u64 = stripped.parse().map_err(serde::de::Error::custom)?;
            Ok(Duration::from_secs(secs))
        } else {
            Err(serde::de::Error::custom(
                "Expected duration string ending with 's'",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 8080

            [git]
            timeout = "45s"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.git.timeout, Duration::from_secs(45));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_duration_requires_suffix() {
        let result: Result<AppConfig, _> = toml::from_str("[git]\ntimeout = \"45\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REPOGRAPH_PORT", "9001"),
            ("DATABASE_URL", "postgres://localhost/repograph"),
            ("GITHUB_TOKEN", "ghp_test"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.github.token.as_deref(), Some("ghp_test"));
    }

    #[test]
    fn test_destination_for_repository() {
        let mut config = AppConfig::default();
        config.git.workspace_dir = PathBuf::from("/srv/repos");
        let dest = config.destination_for(&RepoCoordinates::new("owner", "repo"));
        assert_eq!(dest, PathBuf::from("/srv/repos/owner/repo"));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.analysis.scanner_image, config.analysis.scanner_image);
    }
}
