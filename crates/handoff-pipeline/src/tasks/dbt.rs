//! dbt build task.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

use crate::context::ExecutionContext;
use crate::error::TaskError;
use crate::result::TaskResult;
use crate::workflow::Task;

/// Arguments for running `dbt build` against a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbtArgs {
    /// dbt project directory (contains `dbt_project.yml`).
    pub project_dir: PathBuf,

    /// Profiles directory (default: the project directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_dir: Option<PathBuf>,

    /// Profile target to build against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// dbt executable (default: "dbt").
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Extra environment variables for the dbt process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

fn default_executable() -> String {
    "dbt".to_string()
}

impl DbtArgs {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            profiles_dir: None,
            target: None,
            executable: default_executable(),
            env: HashMap::new(),
            timeout_seconds: None,
        }
    }

    /// Command-line arguments passed to the executable.
    pub fn command_args(&self) -> Vec<String> {
        let profiles_dir = self.profiles_dir.as_ref().unwrap_or(&self.project_dir);
        let mut args = vec![
            "build".to_string(),
            "--project-dir".to_string(),
            self.project_dir.display().to_string(),
            "--profiles-dir".to_string(),
            profiles_dir.display().to_string(),
        ];
        if let Some(ref target) = self.target {
            args.push("--target".to_string());
            args.push(target.clone());
        }
        args
    }
}

/// Task that runs `dbt build` as a child process.
#[derive(Debug, Clone)]
pub struct DbtBuild {
    args: DbtArgs,
}

impl DbtBuild {
    pub fn new(args: DbtArgs) -> Self {
        Self { args }
    }

    async fn execute(&self) -> Result<TaskResult, TaskError> {
        let start = std::time::Instant::now();

        let mut cmd = Command::new(&self.args.executable);
        cmd.args(self.args.command_args())
            .current_dir(&self.args.project_dir)
            .envs(&self.args.env)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TaskError::Process(format!("Failed to spawn '{}': {}", self.args.executable, e))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Read stdout and stderr concurrently
        let stdout_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::trace!(target: "handoff_pipeline::dbt", "{}", line);
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        let stderr_handle = tokio::spawn(async move {
            let mut output = String::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            output
        });

        let wait_result = match self.args.timeout_seconds.map(Duration::from_secs) {
            Some(duration) => match timeout(duration, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill timed out dbt process");
                    }
                    let stdout = stdout_handle.await.unwrap_or_default();
                    let stderr = stderr_handle.await.unwrap_or_default();
                    return Ok(TaskResult::timed_out(&self.args.executable, duration, stdout, stderr)
                        .with_duration(start.elapsed()));
                }
            },
            None => child.wait().await,
        };

        let status = wait_result
            .map_err(|e| TaskError::Process(format!("Failed to wait for dbt: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let stdout = stdout_handle.await.unwrap_or_default();
        let stderr = stderr_handle.await.unwrap_or_default();

        Ok(TaskResult::exited(&self.args.executable, exit_code, stdout, stderr)
            .with_duration(start.elapsed()))
    }
}

#[async_trait]
impl Task for DbtBuild {
    fn kind(&self) -> &'static str {
        "dbt_build"
    }

    async fn run(&self, ctx: &ExecutionContext) -> Result<TaskResult, TaskError> {
        if !self.args.project_dir.is_dir() {
            return Err(TaskError::Configuration(format!(
                "dbt project directory not found: {}",
                self.args.project_dir.display()
            )));
        }

        tracing::debug!(
            task = %ctx.task_id,
            executable = %self.args.executable,
            project_dir = %self.args.project_dir.display(),
            timeout = ?self.args.timeout_seconds,
            "Running dbt build"
        );

        self.execute().await
    }
}
