//! Playwright CLI executor.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::executor::{ExecutionOutcome, ExecutionRequest, TestExecutor};

/// Runs `npx playwright test` with the JSON reporter.
#[derive(Debug, Clone)]
pub struct PlaywrightExecutor {
    program: String,
    config_path: Option<PathBuf>,
}

impl Default for PlaywrightExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaywrightExecutor {
    pub fn new() -> Self {
        Self {
            program: "npx".to_string(),
            config_path: None,
        }
    }

    /// Use a different launcher than `npx`.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Command-line arguments for a request.
    pub fn build_args(&self, request: &ExecutionRequest) -> Vec<String> {
        let mut args = vec!["playwright".to_string(), "test".to_string()];
        args.extend(request.files.iter().cloned());
        args.push("--reporter=json".to_string());
        if let Some(config) = &self.config_path {
            args.push(format!("--config={}", config.display()));
        }
        if let Some(grep) = request.grep.as_deref().filter(|g| !g.is_empty()) {
            args.push("--grep".to_string());
            args.push(grep.to_string());
        }
        if request.headed {
            args.push("--headed".to_string());
        }
        args
    }
}

#[async_trait]
impl TestExecutor for PlaywrightExecutor {
    fn framework(&self) -> &str {
        "playwright"
    }

    async fn execute(&self, request: &ExecutionRequest) -> RunnerResult<ExecutionOutcome> {
        let args = self.build_args(request);
        info!("Running {} {}", self.program, args.join(" "));

        if let Some(parent) = request.report_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .current_dir(&request.workdir)
            .env("PLAYWRIGHT_JSON_OUTPUT_NAME", &request.report_path)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(base_url) = &request.base_url {
            cmd.env("BASE_URL", base_url);
        }

        let start = Instant::now();
        let child = cmd.spawn().map_err(|e| {
            RunnerError::ExecutorUnavailable(format!("failed to start {}: {}", self.program, e))
        })?;

        let output = match tokio::time::timeout(
            Duration::from_millis(request.timeout_ms),
            child.wait_with_output(),
        )
        .await
        {
            Ok(output) => output?,
            Err(_) => {
                warn!("Test command exceeded {} ms, killed", request.timeout_ms);
                return Err(RunnerError::Timeout(request.timeout_ms));
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let report = match tokio::fs::read_to_string(&request.report_path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring unreadable report {:?}: {}", request.report_path, e);
                    None
                }
            },
            Err(_) => {
                debug!("No report written at {:?}", request.report_path);
                None
            }
        };

        Ok(ExecutionOutcome {
            ok: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            report,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let executor = PlaywrightExecutor::new();
        let request = ExecutionRequest::new("/work", "/work/report.json")
            .file("tests/login.spec.ts")
            .grep("(?:^|\\s)logs in(?:$|\\s)")
            .headed(true);

        assert_eq!(
            executor.build_args(&request),
            vec![
                "playwright",
                "test",
                "tests/login.spec.ts",
                "--reporter=json",
                "--grep",
                "(?:^|\\s)logs in(?:$|\\s)",
                "--headed",
            ]
        );
    }

    #[test]
    fn test_build_args_whole_suite() {
        let executor = PlaywrightExecutor::new().config_path("pw.config.ts");
        let request = ExecutionRequest::new("/work", "/work/report.json");
        assert_eq!(
            executor.build_args(&request),
            vec!["playwright", "test", "--reporter=json", "--config=pw.config.ts"]
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let executor = PlaywrightExecutor::new().program("mend-definitely-missing-binary");
        let request = ExecutionRequest::new(dir.path(), dir.path().join("report.json"));

        let err = executor.execute(&request).await.unwrap_err();
        assert!(matches!(err, RunnerError::ExecutorUnavailable(_)));
    }
}
