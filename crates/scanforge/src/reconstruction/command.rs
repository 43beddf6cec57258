use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;

use super::ReconstructionEngine;
use crate::config::ReconstructionConfig;
use crate::error::ReconstructionError;

/// Lines of engine output kept for the failure message.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

/// Runs `<binary> --input <frames> --output <model> [extra_args...]`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    binary: PathBuf,
    extra_args: Vec<String>,
    env: HashMap<String, String>,
}

impl CommandEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &ReconstructionConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.binary),
            extra_args: config.extra_args.clone(),
            env: config.env.clone(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// `PATH` with the engine's own directory in front, so sibling tools
    /// shipped next to the binary resolve first.
    fn search_path(&self) -> Option<OsString> {
        let bin_dir = self
            .binary
            .parent()
            .filter(|p| !p.as_os_str().is_empty())?;
        let mut dirs = vec![bin_dir.to_path_buf()];
        if let Some(existing) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(dirs).ok()
    }
}

#[async_trait]
impl ReconstructionEngine for CommandEngine {
    async fn invoke(
        &self,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ReconstructionError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| ReconstructionError::CreateOutput {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        let mut cmd = TokioCommand::new(&self.binary);
        cmd.arg("--input")
            .arg(input_dir)
            .arg("--output")
            .arg(output_dir)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The engine gets its own process group so the helpers it launches
        // can be killed together with it.
        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(path) = self.search_path() {
            cmd.env("PATH", path);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        log::info!(
            "Launching reconstruction engine {} on {}",
            self.binary.display(),
            input_dir.display()
        );

        let mut child = cmd.spawn().map_err(|e| ReconstructionError::Launch {
            binary: self.binary.clone(),
            source: e,
        })?;
        let mut group = ProcessGroupGuard::new(&child);

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let (stdout_tail, stderr_tail) = tokio::join!(
            collect_tail(stdout_pipe, "stdout"),
            collect_tail(stderr_pipe, "stderr"),
        );

        let status = child.wait().await.map_err(|e| ReconstructionError::Launch {
            binary: self.binary.clone(),
            source: e,
        })?;
        group.disarm();

        if status.success() {
            log::info!("Reconstruction engine finished: {}", output_dir.display());
            Ok(output_dir.to_path_buf())
        } else {
            let exit_code = status.code();
            let diagnostics = format_engine_output(&stderr_tail, &stdout_tail, exit_code);
            log::warn!(
                "Reconstruction engine exited with {:?}: {}",
                exit_code,
                diagnostics
            );
            Err(ReconstructionError::EngineFailed {
                exit_code,
                diagnostics,
            })
        }
    }
}

/// Kills the engine's whole process group if dropped while armed, which
/// happens when the invocation future is dropped on timeout.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(child: &tokio::process::Child) -> Self {
        Self {
            pgid: child.id().and_then(|id| i32::try_from(id).ok()),
        }
    }

    /// Called once the engine has been reaped; its group id may be reused.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        log::warn!("Killing reconstruction engine process group {}", pgid);
        #[cfg(unix)]
        {
            // SAFETY: killpg only sends a signal; pgid is the group created
            // for this engine and its leader has not been reaped yet.
            if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
                log::debug!(
                    "killpg({}) failed: {}",
                    pgid,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

/// Logs every line of an engine stream and keeps the last few.
async fn collect_tail<R>(pipe: Option<R>, stream: &'static str) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
    if let Some(pipe) = pipe {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("engine {}: {}", stream, line);
            if tail.len() == DIAGNOSTIC_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
    tail.into_iter().collect()
}

fn format_engine_output(stderr: &[String], stdout: &[String], exit_code: Option<i32>) -> String {
    let stderr = stderr.join("\n").trim().to_string();
    let stdout = stdout.join("\n").trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => match exit_code {
            Some(code) => format!("Engine failed with exit code {}", code),
            None => "Engine terminated by signal".to_string(),
        },
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}
