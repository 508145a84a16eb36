use crate::banner;
use crate::scanner::{
    ScannerSettings, DEFAULT_BINARY, DEFAULT_MAX_CONCURRENT, DEFAULT_REDOS_URL,
    DEFAULT_TIMEOUT_SECS,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "gixy-gate.toml";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub scanner: Option<ScannerConfig>,
    pub upload: Option<UploadConfig>,
    pub strip: Option<StripConfig>,
    pub audit: Option<AuditConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ServerConfig {
    pub port: Option<u16>,
    pub bind: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ScannerConfig {
    pub binary: Option<String>,
    pub extra_args: Option<Vec<String>>,
    pub timeout_seconds: Option<u64>,
    /// Empty string disables `--regex-redos-url`.
    pub redos_url: Option<String>,
    pub max_concurrent: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct UploadConfig {
    pub max_bytes: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct StripConfig {
    pub extra_directives: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AuditConfig {
    /// JSONL file receiving one record per scan request.
    pub log_path: Option<String>,
}

impl Config {
    /// Scanner settings with `binary`/`timeout_seconds` overrides from the CLI.
    pub fn scanner_settings(&self, binary: Option<String>, timeout_seconds: Option<u64>) -> ScannerSettings {
        let file = self.scanner.clone().unwrap_or_default();

        let redos_url = match file.redos_url {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some(DEFAULT_REDOS_URL.to_string()),
        };

        ScannerSettings {
            binary: binary
                .or(file.binary)
                .unwrap_or_else(|| DEFAULT_BINARY.to_string()),
            extra_args: file.extra_args.unwrap_or_default(),
            timeout: Duration::from_secs(
                timeout_seconds
                    .or(file.timeout_seconds)
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            redos_url,
            max_concurrent: file.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
        }
    }

    pub fn extra_directives(&self) -> Vec<String> {
        self.strip
            .as_ref()
            .and_then(|s| s.extra_directives.clone())
            .unwrap_or_default()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.upload
            .as_ref()
            .and_then(|u| u.max_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
    }

    pub fn audit_log_path(&self) -> Option<String> {
        self.audit.as_ref().and_then(|a| a.log_path.clone())
    }
}

/// Directory holding the executable, falling back to the working directory.
pub fn base_dir() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        exe_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
    } else {
        std::env::current_dir().unwrap_or_default()
    }
}

pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(content)
}

/// Loads `path`, or `gixy-gate.toml` next to the executable. Any failure is
/// reported and yields the defaults.
pub fn load_config(path: Option<&Path>) -> Config {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_dir().join(CONFIG_FILE_NAME));

    if path.exists() {
        match fs::read_to_string(&path) {
            Ok(content) => match parse_config(&content) {
                Ok(config) => {
                    banner::print_success(&format!("Loaded config from {}", path.display()));
                    return config;
                }
                Err(e) => banner::print_error(&format!("Failed to parse {}: {}", path.display(), e)),
            },
            Err(e) => banner::print_error(&format!("Failed to read {}: {}", path.display(), e)),
        }
    } else {
        banner::print_warning(&format!(
            "No {} found at {}. Using defaults.",
            CONFIG_FILE_NAME,
            path.display()
        ));
    }
    Config::default()
}
