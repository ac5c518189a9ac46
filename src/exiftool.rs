//! ExifTool command wrapper utilities
//!
//! The binary is optional. A missing executable, a non-zero exit or a run that
//! exceeds its deadline are all reported as ordinary errors so the caller can
//! move on to the next backend.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ExifToolError {
    #[error("ExifTool not found: {0}")]
    NotInstalled(String),

    #[error("ExifTool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("ExifTool timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured output of a finished ExifTool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub struct ExifToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ExifToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command, killing it if it outlives the configured timeout.
    pub fn execute(self) -> Result<ToolOutput, ExifToolError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ExifToolError::NotInstalled(self.program.display().to_string())
                }
                _ => ExifToolError::Io(e),
            })?;

        let output = wait_with_timeout(child, self.timeout)?;
        Ok(output)
    }
}

fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<ToolOutput, ExifToolError> {
    // Drain both pipes on their own threads so a chatty child cannot block on a full pipe.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            debug!("exiftool killed after {:?}", timeout);
            return Err(ExifToolError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.map(join_drain).unwrap_or_default();
    let stderr = stderr.map(join_drain).unwrap_or_default();

    if !status.success() {
        return Err(ExifToolError::ExecutionFailed(
            String::from_utf8_lossy(&stderr).trim().to_string(),
        ));
    }

    Ok(ToolOutput { stdout, stderr })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Probe `program -ver`; returns the reported version when the tool runs.
pub fn probe_version(program: &Path, timeout: Duration) -> Option<String> {
    let output = ExifToolCommand::new(program)
        .args(&["-ver"])
        .timeout(timeout)
        .execute()
        .ok()?;
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}
