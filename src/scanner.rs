//! gixy Invocation
//!
//! Runs the external analyzer against a sanitized dump, bounded by a
//! wall-clock timeout and a concurrency limit, and turns its JSON report into
//! findings annotated with the scanned path.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// One record of the scanner report. Kept as an open JSON object so fields
/// added by newer gixy releases pass through untouched.
pub type Finding = Map<String, Value>;

pub const DEFAULT_BINARY: &str = "gixy";
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_REDOS_URL: &str = "http://localhost:3001/recheck";
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Debug, Clone)]
pub struct ScannerSettings {
    /// Program to execute, looked up on `PATH` when not absolute.
    pub binary: String,
    /// Arguments placed before the standard ones.
    pub extra_args: Vec<String>,
    pub timeout: Duration,
    /// ReDoS checker endpoint passed as `--regex-redos-url`; `None` omits it.
    pub redos_url: Option<String>,
    pub max_concurrent: usize,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            extra_args: Vec::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            redos_url: Some(DEFAULT_REDOS_URL.to_string()),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{binary} timed out")]
    Timeout { binary: String },
    #[error("Failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    /// Output was not a JSON array of objects. Carries stderr, or stdout when
    /// stderr is empty.
    #[error("{0}")]
    InvalidOutput(String),
    #[error("{binary} terminated abnormally: {detail}")]
    Crashed { binary: String, detail: String },
    #[error("Scanner is shutting down")]
    Closed,
}

pub struct ScannerInvoker {
    settings: ScannerSettings,
    permits: Arc<Semaphore>,
}

impl ScannerInvoker {
    pub fn new(settings: ScannerSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
        Self { settings, permits }
    }

    pub fn settings(&self) -> &ScannerSettings {
        &self.settings
    }

    /// Full argument list for scanning `path`.
    pub fn command_args(&self, path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.settings.extra_args.iter().map(OsString::from).collect();
        args.push("-f".into());
        args.push("json".into());
        if let Some(url) = &self.settings.redos_url {
            args.push("--regex-redos-url".into());
            args.push(url.into());
        }
        args.push(path.as_os_str().to_owned());
        args
    }

    /// Scans `path` and returns its findings, each tagged with `path`.
    pub async fn scan(&self, path: &Path) -> Result<Vec<Finding>, ScanError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ScanError::Closed)?;

        let binary = &self.settings.binary;
        let started = Instant::now();
        debug!("Running {} against {}", binary, path.display());

        let mut command = Command::new(binary);
        command
            .args(self.command_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child.
        let output = match tokio::time::timeout(self.settings.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                warn!("Could not start {}: {}", binary, source);
                return Err(ScanError::Spawn {
                    binary: binary.clone(),
                    source,
                });
            }
            Err(_) => {
                warn!(
                    "{} exceeded {:?} on {}, killed",
                    binary,
                    self.settings.timeout,
                    path.display()
                );
                return Err(ScanError::Timeout {
                    binary: binary.clone(),
                });
            }
        };

        let result = interpret_output(
            binary,
            path,
            output.status.code(),
            &output.stdout,
            &output.stderr,
        );
        match &result {
            Ok(findings) => info!(
                "{} finished on {} in {:?}: {} finding(s)",
                binary,
                path.display(),
                started.elapsed(),
                findings.len()
            ),
            Err(e) => warn!("{} failed on {}: {}", binary, path.display(), e),
        }
        result
    }
}

/// Parses scanner output. A parseable report wins over the exit code, since
/// gixy exits non-zero whenever it reports issues. `exit_code` is `None`
/// when the process was killed by a signal.
pub fn interpret_output(
    binary: &str,
    path: &Path,
    exit_code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Vec<Finding>, ScanError> {
    match serde_json::from_slice::<Vec<Finding>>(stdout) {
        Ok(mut findings) => {
            if exit_code != Some(0) {
                debug!("{} exited with {:?} but produced a report", binary, exit_code);
            }
            let scanned = Value::String(path.display().to_string());
            for finding in &mut findings {
                finding.insert("path".to_string(), scanned.clone());
            }
            Ok(findings)
        }
        Err(parse_err) => {
            let stderr = String::from_utf8_lossy(stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(stdout).trim().to_string();
            let detail = match (stderr.is_empty(), stdout.is_empty()) {
                (false, _) => stderr,
                (true, false) => stdout,
                (true, true) => format!("{} produced no parseable output: {}", binary, parse_err),
            };

            match exit_code {
                Some(_) => Err(ScanError::InvalidOutput(detail)),
                None => Err(ScanError::Crashed {
                    binary: binary.to_string(),
                    detail,
                }),
            }
        }
    }
}
