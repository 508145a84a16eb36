use clap::{Parser, Subcommand};
use gixy_gate::config::{self, Config, DEFAULT_BIND, DEFAULT_PORT};
use gixy_gate::sanitize::BlockStripper;
use gixy_gate::scanner::ScannerInvoker;
use gixy_gate::server::{self, ServerConfig};
use gixy_gate::{audit, banner, logger};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "gixy-gate")]
#[command(about = "Strip Lua blocks from nginx -T dumps and scan them with gixy", long_about = None)]
struct Cli {
    /// Config file (defaults to gixy-gate.toml next to the executable)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP scan service
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(short, long)]
        bind: Option<String>,

        /// gixy executable
        #[arg(short, long)]
        scanner: Option<String>,

        /// Scanner timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Enable detailed request logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Strip Lua blocks from a local dump
    Strip {
        /// nginx -T dump to read
        input: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Strip and scan a local dump the way the service does
    Audit {
        /// nginx -T dump to read
        input: PathBuf,

        /// Scan name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// gixy executable
        #[arg(short, long)]
        scanner: Option<String>,

        /// Scanner timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print only the JSON findings on stdout, without the banner
        #[arg(long)]
        json: bool,
    },
}

fn get_env_path() -> PathBuf {
    config::base_dir().join(".env")
}

/// `None` when there is no file to load.
fn load_env_file(path: &Path) -> Option<Result<(), dotenvy::Error>> {
    if !path.exists() {
        return None;
    }
    Some(dotenvy::from_path(path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env may set RUST_LOG; load it before the subscriber reads it.
    let env_path = get_env_path();
    let env_loaded = load_env_file(&env_path);
    logger::init_logger();

    match env_loaded {
        Some(Ok(())) => tracing::info!("Loaded .env from: {}", env_path.display()),
        Some(Err(e)) => tracing::error!("Failed to load .env from {}: {}", env_path.display(), e),
        None => tracing::info!("No .env found at: {}", env_path.display()),
    }

    let cli = Cli::parse();

    // Commands writing to stdout keep it clean.
    let quiet = match &cli.command {
        Commands::Strip { output, .. } => output.is_none(),
        Commands::Audit { json, .. } => *json,
        Commands::Serve { .. } => false,
    };
    banner::set_quiet(quiet);
    banner::print_banner();

    let file_config = config::load_config(cli.config.as_deref());

    // Create a cancellation token for local runs (e.g. Ctrl+C)
    let shutdown_token = tokio_util::sync::CancellationToken::new();
    let t = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            t.cancel();
        }
    });

    run_app(cli.command, file_config, shutdown_token).await
}

fn build_stripper(file_config: &Config) -> anyhow::Result<BlockStripper> {
    Ok(BlockStripper::with_extra_directives(file_config.extra_directives().as_slice())?)
}

async fn run_app(
    command: Commands,
    file_config: Config,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Commands::Serve { port, bind, scanner, timeout, verbose } => {
            let server_file = file_config.server.clone().unwrap_or_default();

            let port = port.or(server_file.port).unwrap_or(DEFAULT_PORT);
            let bind = bind
                .or(server_file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string());

            let config = ServerConfig {
                port,
                bind,
                scanner: file_config.scanner_settings(scanner, timeout),
                extra_directives: file_config.extra_directives(),
                max_upload_bytes: file_config.max_upload_bytes(),
                audit_log_path: file_config.audit_log_path(),
                verbose,
            };

            tracing::info!("Server starting on port {}", port);
            server::start_server(config, shutdown_token).await?;
        }
        Commands::Strip { input, output } => {
            let stripper = build_stripper(&file_config)?;
            if let Some(cleaned) = audit::run_strip(&input, output.as_deref(), &stripper).await? {
                write_stdout(cleaned.as_bytes())?;
            }
        }
        Commands::Audit { input, name, scanner, timeout, .. } => {
            let stripper = build_stripper(&file_config)?;
            let invoker = ScannerInvoker::new(file_config.scanner_settings(scanner, timeout));
            let findings = tokio::select! {
                res = audit::run_audit(&input, name.as_deref(), &stripper, &invoker) => res?,
                _ = shutdown_token.cancelled() => {
                    anyhow::bail!("Audit of {} interrupted", input.display());
                }
            };
            write_stdout(audit::render_findings(&findings)?.as_bytes())?;
        }
    }

    Ok(())
}

fn write_stdout(bytes: &[u8]) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_is_applied_before_logging() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".env");
        assert!(load_env_file(&path).is_none());

        std::fs::write(&path, "GIXY_GATE_TEST_RUST_LOG=gixy_gate=debug\n").unwrap();
        assert!(matches!(load_env_file(&path), Some(Ok(()))));
        assert_eq!(
            std::env::var("GIXY_GATE_TEST_RUST_LOG").unwrap(),
            "gixy_gate=debug"
        );
    }
}
