//! Containerized static analysis
//!
//! Runs the SonarQube scanner image against a working copy and fetches the
//! resulting issues from the SonarQube server.

use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;

#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    /// Analyze the working copy at `repo_path` under `project_key` and return
    /// the server's issue report
    async fn analyze(
        &self,
        repo_path: &Path,
        project_key: &str,
    ) -> Result<serde_json::Value, AnalysisError>;
}

/// Project keys may only hold letters, digits and `-_.:`
pub fn project_key_for(repo: &str) -> String {
    repo.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub struct SonarQubeAnalyzer {
    config: AnalysisConfig,
    client: Client,
}

impl SonarQubeAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AnalysisError::Results)?;
        Ok(Self { config, client })
    }

    /// Arguments passed to the container runtime
    pub fn scanner_args(&self, repo_path: &Path, project_key: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/usr/src", repo_path.display()),
            self.config.scanner_image.clone(),
            format!("-Dsonar.projectKey={}", project_key),
            "-Dsonar.sources=/usr/src".to_string(),
            format!("-Dsonar.host.url={}", self.config.sonarqube_url),
        ];
        if let Some(token) = &self.config.token {
            args.push(format!("-Dsonar.token={}", token));
        }
        args
    }

    fn issues_url(&self) -> String {
        format!(
            "{}/api/issues/search",
            self.config.sonarqube_url.trim_end_matches('/')
        )
    }

    async fn run_scanner(&self, repo_path: &Path, project_key: &str) -> Result<(), AnalysisError> {
        let args = self.scanner_args(repo_path, project_key);
        let child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(AnalysisError::Launch)?;

        let output = timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| AnalysisError::Timeout(self.config.timeout))?
            .map_err(AnalysisError::Launch)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(project_key, "Scanner failed: {}", stderr);
            return Err(AnalysisError::ScannerFailed {
                status: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(())
    }

    async fn fetch_issues(&self, project_key: &str) -> Result<serde_json::Value, AnalysisError> {
        let request = self
            .client
            .get(self.issues_url())
            .query(&[("projectKeys", project_key)]);
        let request = match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request.basic_auth(&self.config.username, Some(&self.config.password)),
        };

        request
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(AnalysisError::Results)?
            .json()
            .await
            .map_err(AnalysisError::Results)
    }
}

#[async_trait]
impl StaticAnalyzer for SonarQubeAnalyzer {
    #[instrument(skip(self), fields(path = %repo_path.display()))]
    async fn analyze(
        &self,
        repo_path: &Path,
        project_key: &str,
    ) -> Result<serde_json::Value, AnalysisError> {
        if !self.config.enabled {
            return Err(AnalysisError::Disabled);
        }

        self.run_scanner(repo_path, project_key).await?;
        info!(project_key, "Scanner finished, fetching issues");
        self.fetch_issues(project_key).await
    }
}
