use crate::banner;
use crate::error::ApiError;
use crate::sanitize::{BlockStripper, StripStats};
use crate::scanner::{Finding, ScannerInvoker, ScannerSettings};
use crate::upload::{check_content_type, decode_payload, ScanName, ScanWorkspace, UploadError};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use colored::Colorize;
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

pub const USAGE: &str = r#"POST /scan/{scan_path}

Send the output of `nginx -T` as a plain-text file upload under field
`file`. The `scan_path` is a user-supplied name (letters, digits,
underscore, hyphen only) used to name the temp file.

Embedded Lua blocks (content_by_lua_block, lua_ingress, ...) are removed
before the dump is handed to gixy.

CONTENT TYPES
  - text/plain
  - application/octet-stream

USAGE EXAMPLE
  curl -F "file=@nginx.conf" https://yourhost/scan/my_config

RESPONSES

  200 OK
    JSON array of findings from gixy. Each item includes at least:
      - path     - the scanned filename (with ".conf" suffix)
      - plugin   - gixy plugin ID
      - severity - gixy severity level
      - summary  - human-readable description

ERROR CODES (all return JSON with a "detail" field)

  400 Bad Request
    - invalid scan_path (only A-Z, a-z, 0-9, underscore, hyphen)
    - missing `file` field, empty or non-UTF-8 upload
    - gixy output could not be parsed

  413 Payload Too Large
    upload exceeds the configured size limit

  415 Unsupported Media Type
    {"detail": "Expecting a plain-text nginx -T dump"}

  502 Bad Gateway
    gixy is missing or crashed

  504 Gateway Timeout
    gixy timed out
"#;

pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub scanner: ScannerSettings,
    pub extra_directives: Vec<String>,
    pub max_upload_bytes: usize,
    pub audit_log_path: Option<String>,
    pub verbose: bool,
}

#[derive(Clone)]
pub struct AppState {
    stripper: Arc<BlockStripper>,
    scanner: Arc<ScannerInvoker>,
    audit_log_path: Option<String>,
    verbose: bool,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        stripper: Arc<BlockStripper>,
        scanner: Arc<ScannerInvoker>,
        audit_log_path: Option<String>,
        verbose: bool,
    ) -> Self {
        Self {
            stripper,
            scanner,
            audit_log_path,
            verbose,
            max_upload_bytes: crate::config::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK\n")
}

async fn help_handler() -> &'static str {
    USAGE
}

pub fn build_router(mut state: AppState, max_upload_bytes: usize) -> Router {
    state.max_upload_bytes = max_upload_bytes;
    Router::new()
        .route("/", get(help_handler))
        .route("/health", get(health_handler))
        .route("/scan/:scan_path", post(scan_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn start_server(
    config: ServerConfig,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    let stripper = BlockStripper::with_extra_directives(config.extra_directives.as_slice())?;
    let directive_count = stripper.directives().len();
    let timeout_secs = config.scanner.timeout.as_secs();
    let scanner_binary = config.scanner.binary.clone();

    let state = AppState::new(
        Arc::new(stripper),
        Arc::new(ScannerInvoker::new(config.scanner)),
        config.audit_log_path,
        config.verbose,
    );
    let app = build_router(state, config.max_upload_bytes);

    let ip: IpAddr = config
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {:?}: {}", config.bind, e))?;
    let addr = SocketAddr::from((ip, config.port));

    banner::print_startup_info(
        &addr.to_string(),
        &scanner_binary,
        timeout_secs,
        directive_count,
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
            banner::print_success("Shutdown signal received. Closing server...");
            tracing::info!("Server shutting down gracefully");
        })
        .await?;

    Ok(())
}

/// Appends one JSON line to the audit log without blocking the request.
fn log_scan_event(path: Option<String>, event: Value) {
    let Some(log_path) = path else {
        return;
    };
    tokio::spawn(async move {
        if let Err(e) = append_audit_line(&log_path, &event).await {
            tracing::warn!("Failed to write audit log {}: {}", log_path, e);
        }
    });
}

async fn append_audit_line(log_path: &str, event: &Value) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await?;
    file.write_all(line.as_bytes()).await
}

struct UploadedFile {
    content_type: Option<String>,
    bytes: axum::body::Bytes,
}

/// An over-limit body surfaces as a multipart error; keep it apart from
/// malformed input.
fn multipart_error(e: MultipartError, limit: usize) -> UploadError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge { limit }
    } else {
        UploadError::Multipart(e.body_text())
    }
}

/// Pulls the `file` field out of the form, skipping any other fields.
async fn read_file_field(mut multipart: Multipart, limit: usize) -> Result<UploadedFile, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, limit))?;
        return Ok(UploadedFile {
            content_type,
            bytes,
        });
    }
    Err(UploadError::MissingFile)
}

async fn run_scan(
    state: &AppState,
    scan_path: &str,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(Vec<Finding>, StripStats), ApiError> {
    let multipart = multipart.map_err(|e| UploadError::Multipart(e.body_text()))?;
    let upload = read_file_field(multipart, state.max_upload_bytes).await?;

    check_content_type(upload.content_type.as_deref())?;
    let name = ScanName::parse(scan_path)?;
    let text = decode_payload(&upload.bytes)?;

    let (cleaned, stats) = state.stripper.strip_text_with_stats(text);
    if stats.unterminated {
        tracing::warn!(
            "Dump for '{}' ends inside a stripped block; the remainder was dropped",
            name
        );
    }
    tracing::info!(
        "Stripped {} block(s), {} of {} line(s) for '{}'",
        stats.blocks_removed,
        stats.lines_removed,
        stats.lines_in,
        name
    );

    let workspace = ScanWorkspace::create(&name, &cleaned).await?;
    let result = state.scanner.scan(workspace.conf_path()).await;
    if let Err(e) = workspace.close() {
        tracing::warn!("Failed to remove scan directory for '{}': {}", name, e);
    }

    Ok((result?, stats))
}

async fn scan_handler(
    State(state): State<AppState>,
    Path(scan_path): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Vec<Finding>>, ApiError> {
    let started = Instant::now();
    tracing::info!("Scan request for '{}'", scan_path);

    if state.verbose {
        println!("{} POST /scan/{}", "INCOMING:".bright_black(), scan_path);
    }

    let outcome = run_scan(&state, &scan_path, multipart).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match &outcome {
        Ok((findings, stats)) => {
            if state.verbose {
                println!(
                    "{} {} finding(s) for '{}' in {}ms",
                    "SCANNED:".bright_green(),
                    findings.len(),
                    scan_path,
                    elapsed_ms
                );
            }
            log_scan_event(
                state.audit_log_path.clone(),
                serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "event": "scan_completed",
                    "scan_path": scan_path,
                    "findings": findings.len(),
                    "blocks_removed": stats.blocks_removed,
                    "lines_removed": stats.lines_removed,
                    "duration_ms": elapsed_ms
                }),
            );
        }
        Err(e) => {
            if state.verbose {
                println!(
                    "{} '{}' -> {} ({})",
                    "FAILED:".bright_red(),
                    scan_path,
                    e.status(),
                    e
                );
            }
            log_scan_event(
                state.audit_log_path.clone(),
                serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "event": "scan_failed",
                    "scan_path": scan_path,
                    "error": e.kind(),
                    "status": e.status().as_u16(),
                    "duration_ms": elapsed_ms
                }),
            );
        }
    }

    outcome.map(|(findings, _)| Json(findings))
}
