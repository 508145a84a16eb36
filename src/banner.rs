use colored::*;
use std::sync::atomic::{AtomicBool, Ordering};

static QUIET: AtomicBool = AtomicBool::new(false);

/// Silences console output; messages still reach the log.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

pub fn print_banner() {
    if is_quiet() {
        return;
    }
    let banner = r#"
        _                                 _
   __ _(_)_  ___   _       __ _  __ _| |_ ___
  / _` | \ \/ / | | |____ / _` |/ _` | __/ _ \
 | (_| | |>  <| |_| |____| (_| | (_| | ||  __/
  \__, |_/_/\_\\__, |     \__, |\__,_|\__\___|
  |___/        |___/      |___/
    "#;

    println!("{}", banner.bright_cyan().bold());
    println!("{}", "   Lua-free nginx dumps, straight into gixy".bright_white().italic());
    println!("{}", "   ===============================================".bright_black());
    println!();
}

pub fn print_startup_info(addr: &str, scanner: &str, timeout_secs: u64, directives: usize) {
    println!("{} {}", "Listening on:".bright_black(), addr.bright_white());
    println!("{} {}", "Scanner:     ".bright_black(), scanner.bright_white());
    println!(
        "{} {}s",
        "Timeout:     ".bright_black(),
        timeout_secs.to_string().bright_white()
    );
    println!(
        "{} {}",
        "Directives:  ".bright_black(),
        directives.to_string().bright_white()
    );
    println!();
    tracing::info!(
        "Startup: addr={} scanner={} timeout={}s directives={}",
        addr,
        scanner,
        timeout_secs,
        directives
    );
}

pub fn print_step(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "➜".bright_blue().bold(), msg);
    }
    tracing::info!("STEP: {}", msg);
}

pub fn print_success(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "✔".bright_green().bold(), msg);
    }
    tracing::info!("SUCCESS: {}", msg);
}

pub fn print_warning(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "⚠".bright_yellow().bold(), msg);
    }
    tracing::warn!("WARNING: {}", msg);
}

pub fn print_error(msg: &str) {
    if !is_quiet() {
        println!("{} {}", "✘".bright_red().bold(), msg);
    }
    tracing::error!("ERROR: {}", msg);
}
