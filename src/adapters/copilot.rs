//! Copilot external reviewer, driving the `copilot` CLI as a subprocess.
//!
//! The CLI does not read prompts from stdin, so the payload goes through a
//! temp file that is removed on every exit path (the handle's drop). The
//! child runs in its own process group; a deadline expiry kills the whole
//! group, so grandchildren the CLI spawns are reaped along with it.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use super::{build_external_prompt, verdict::parse_reply, ReviewAdapter};
use crate::config::HookConfig;
use crate::types::{ReviewContext, Verdict};

pub struct CopilotAdapter {
    cli_path: Option<PathBuf>,
    timeout: Duration,
}

impl CopilotAdapter {
    pub fn new(config: &HookConfig) -> Self {
        Self {
            cli_path: find_on_path("copilot"),
            timeout: Duration::from_secs(config.timeout_seconds()),
        }
    }

    #[cfg(test)]
    fn with_cli_path(cli_path: PathBuf, timeout: Duration) -> Self {
        Self {
            cli_path: Some(cli_path),
            timeout,
        }
    }
}

#[async_trait]
impl ReviewAdapter for CopilotAdapter {
    fn name(&self) -> &str {
        "copilot"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn available(&self) -> bool {
        self.cli_path.is_some()
    }

    async fn review(&self, prompt: &str, context: &ReviewContext) -> Verdict {
        let Some(cli_path) = self.cli_path.clone() else {
            return Verdict::failure(self.name(), "copilot CLI not found");
        };

        let full_prompt = build_external_prompt(prompt, context);
        let start = Instant::now();

        // NamedTempFile deletes itself on drop, covering every return below.
        let mut payload = match tempfile::NamedTempFile::new() {
            Ok(file) => file,
            Err(e) => {
                return Verdict::failure(self.name(), format!("temp file error: {e}"));
            }
        };
        if let Err(e) = payload.write_all(full_prompt.as_bytes()) {
            return Verdict::failure(self.name(), format!("temp file error: {e}"));
        }

        let instruction = format!(
            "Read the review request in {} and answer it, replying in the JSON format the request specifies.",
            payload.path().display()
        );

        let mut command = Command::new(&cli_path);
        command
            .arg("-p")
            .arg(&instruction)
            .env("TERM", "dumb")
            .env("CI", "true")
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so the timeout kill below reaps any
        // grandchildren the CLI forks.
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Verdict::failure(self.name(), format!("failed to spawn copilot: {e}"));
            }
        };
        #[cfg(unix)]
        let child_pid = child.id();

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            // deadline expired: kill the whole group; kill_on_drop already
            // covered the direct child when the future was dropped
            Err(_) => {
                #[cfg(unix)]
                if let Some(pid) = child_pid {
                    unsafe {
                        libc::killpg(pid as i32, libc::SIGKILL);
                    }
                }
                let mut verdict = Verdict::failure(self.name(), "timeout");
                verdict.duration_ms = start.elapsed().as_millis() as u64;
                return verdict;
            }
            Ok(Err(e)) => {
                return Verdict::failure(self.name(), format!("copilot I/O error: {e}"));
            }
            Ok(Ok(output)) => output,
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut verdict =
                Verdict::failure(self.name(), format!("CLI error: {}", stderr.trim()));
            verdict.duration_ms = duration_ms;
            return verdict;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_reply(self.name(), &stdout).with_duration(duration_ms)
    }
}

/// Resolve a binary name against `PATH`.
fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}
