//! Local (offline) counterparts of the HTTP endpoint: strip a dump on disk,
//! or strip and scan it exactly as a request to `/scan/{name}` would.

use crate::banner;
use crate::sanitize::{BlockStripper, StripStats};
use crate::scanner::{Finding, ScannerInvoker};
use crate::upload::{decode_payload, ScanName, ScanWorkspace};
use anyhow::Context;
use std::path::Path;

/// Scan name for a local file, derived from its stem.
pub fn derive_scan_name(path: &Path) -> ScanName {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    ScanName::from_lossy(&stem)
}

async fn read_dump(input: &Path) -> anyhow::Result<String> {
    let raw = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let text = decode_payload(&raw).with_context(|| format!("Rejected {}", input.display()))?;
    Ok(text.to_string())
}

fn report_stats(input: &Path, stats: &StripStats) {
    banner::print_success(&format!(
        "Removed {} block(s), {} of {} line(s) from {}",
        stats.blocks_removed,
        stats.lines_removed,
        stats.lines_in,
        input.display()
    ));
    if stats.unterminated {
        banner::print_warning("Input ends inside a stripped block; the remainder was dropped");
    }
}

/// Strips `input` and writes the result to `output`, or returns it when
/// `output` is `None`.
pub async fn run_strip(
    input: &Path,
    output: Option<&Path>,
    stripper: &BlockStripper,
) -> anyhow::Result<Option<String>> {
    banner::print_step(&format!("Stripping {}", input.display()));
    let text = read_dump(input).await?;
    let (cleaned, stats) = stripper.strip_text_with_stats(&text);
    report_stats(input, &stats);

    match output {
        Some(out) => {
            tokio::fs::write(out, &cleaned)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            banner::print_success(&format!("Wrote {}", out.display()));
            Ok(None)
        }
        None => Ok(Some(cleaned)),
    }
}

/// Strips `input`, runs the scanner on it and returns the findings.
pub async fn run_audit(
    input: &Path,
    name: Option<&str>,
    stripper: &BlockStripper,
    scanner: &ScannerInvoker,
) -> anyhow::Result<Vec<Finding>> {
    let name = match name {
        Some(n) => ScanName::parse(n)?,
        None => derive_scan_name(input),
    };
    banner::print_step(&format!("Auditing {} as '{}'", input.display(), name));

    let text = read_dump(input).await?;
    let (cleaned, stats) = stripper.strip_text_with_stats(&text);
    report_stats(input, &stats);

    let workspace = ScanWorkspace::create(&name, &cleaned).await?;
    banner::print_step(&format!(
        "Running {} on {}",
        scanner.settings().binary,
        workspace.conf_path().display()
    ));
    let result = scanner.scan(workspace.conf_path()).await;
    if let Err(e) = workspace.close() {
        banner::print_warning(&format!("Failed to remove scan directory: {}", e));
    }
    let findings = result?;

    if findings.is_empty() {
        banner::print_success("No issues found.");
    }
    for finding in &findings {
        let field = |key: &str| finding.get(key).and_then(|v| v.as_str()).unwrap_or("?");
        banner::print_warning(&format!(
            "[{}] {}: {}",
            field("severity"),
            field("plugin"),
            field("summary")
        ));
    }
    banner::print_success("Audit complete.");

    Ok(findings)
}

/// Findings as a pretty JSON array with a trailing newline, for stdout.
pub fn render_findings(findings: &[Finding]) -> serde_json::Result<String> {
    let mut out = serde_json::to_string_pretty(findings)?;
    out.push('\n');
    Ok(out)
}
