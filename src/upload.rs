//! Upload Validation & Scan Workspace
//!
//! Checks an uploaded dump before anything touches the disk, then writes the
//! sanitized text to `<tmpdir>/<scan name>.conf`. The temporary directory is
//! owned by [`ScanWorkspace`] and removed when it is dropped, so every exit
//! path of a request cleans up after itself.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

/// Media types accepted for the uploaded dump.
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &["text/plain", "application/octet-stream"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Expecting a plain-text nginx -T dump")]
    UnsupportedMediaType,
    #[error("Invalid filename in path; only A–Z, a–z, 0–9, underscore and hyphen allowed")]
    InvalidScanName,
    #[error("Uploaded file is empty.")]
    Empty,
    #[error("Uploaded file is not valid UTF-8 text")]
    NotUtf8,
    #[error("Missing multipart field `file`")]
    MissingFile,
    #[error("Malformed multipart body: {0}")]
    Multipart(String),
    #[error("Upload exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("Failed to prepare scan file: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-chosen name for the scanned file. Letters, digits, `_` and `-` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanName(String);

impl ScanName {
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(UploadError::InvalidScanName);
        }
        Ok(Self(raw.to_string()))
    }

    /// Maps every character outside the token set to `_`. Empty input
    /// becomes `config`.
    pub fn from_lossy(raw: &str) -> Self {
        let name: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if name.is_empty() {
            Self("config".to_string())
        } else {
            Self(name)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.conf", self.0)
    }
}

impl std::fmt::Display for ScanName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accepts `text/plain` and `application/octet-stream`, ignoring parameters
/// such as `charset` and letter case. A missing content type is rejected.
pub fn check_content_type(content_type: Option<&str>) -> Result<(), UploadError> {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    match essence {
        Some(ct) if ACCEPTED_CONTENT_TYPES.contains(&ct.as_str()) => Ok(()),
        _ => Err(UploadError::UnsupportedMediaType),
    }
}

/// Rejects empty or whitespace-only payloads, then decodes them as UTF-8.
pub fn decode_payload(raw: &[u8]) -> Result<&str, UploadError> {
    // Same whitespace set as a byte-level strip: space, \t, \n, \v, \f, \r.
    if raw
        .iter()
        .all(|b| matches!(b, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r'))
    {
        return Err(UploadError::Empty);
    }
    std::str::from_utf8(raw).map_err(|_| UploadError::NotUtf8)
}

/// Per-request temporary directory holding the file handed to the scanner.
#[derive(Debug)]
pub struct ScanWorkspace {
    dir: TempDir,
    conf_path: PathBuf,
}

impl ScanWorkspace {
    pub async fn create(name: &ScanName, contents: &str) -> Result<Self, UploadError> {
        let dir = tempfile::Builder::new().prefix("gixy-gate-").tempdir()?;
        let conf_path = dir.path().join(name.file_name());
        tokio::fs::write(&conf_path, contents).await?;
        debug!("Wrote {} bytes to {}", contents.len(), conf_path.display());
        Ok(Self { dir, conf_path })
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_name_accepts_token_chars() {
        for name in ["prod", "edge_01", "a-b-c", "X9"] {
            let parsed = ScanName::parse(name).expect("valid name");
            assert_eq!(parsed.as_str(), name);
        }
        assert_eq!(ScanName::parse("edge").unwrap().file_name(), "edge.conf");
    }

    #[test]
    fn test_scan_name_from_lossy() {
        assert_eq!(ScanName::from_lossy("edge dump.v2").as_str(), "edge_dump_v2");
        assert_eq!(ScanName::from_lossy("naïve").as_str(), "na_ve");
        assert_eq!(ScanName::from_lossy("").as_str(), "config");
    }

    #[test]
    fn test_scan_name_rejects_everything_else() {
        for name in ["", "../etc", "a b", "name.conf", "naïve", "a/b", "x\n"] {
            assert!(
                matches!(ScanName::parse(name), Err(UploadError::InvalidScanName)),
                "{:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_content_type_essence() {
        assert!(check_content_type(Some("text/plain")).is_ok());
        assert!(check_content_type(Some("application/octet-stream")).is_ok());
        assert!(check_content_type(Some("Text/Plain; charset=utf-8")).is_ok());
        assert!(matches!(
            check_content_type(Some("application/json")),
            Err(UploadError::UnsupportedMediaType)
        ));
        assert!(matches!(
            check_content_type(None),
            Err(UploadError::UnsupportedMediaType)
        ));
    }

    #[test]
    fn test_empty_and_whitespace_payloads() {
        assert!(matches!(decode_payload(b""), Err(UploadError::Empty)));
        assert!(matches!(
            decode_payload(b" \r\n\t\x0b\x0c"),
            Err(UploadError::Empty)
        ));
    }

    #[test]
    fn test_payload_must_be_utf8() {
        assert!(matches!(
            decode_payload(b"server {\xff}"),
            Err(UploadError::NotUtf8)
        ));
        assert_eq!(decode_payload(b" listen 80;\n").unwrap(), " listen 80;\n");
    }

    #[tokio::test]
    async fn test_workspace_writes_and_cleans_up() {
        let name = ScanName::parse("edge").unwrap();
        let workspace = ScanWorkspace::create(&name, "listen 80;\n").await.unwrap();
        let path = workspace.conf_path().to_path_buf();
        let dir = workspace.dir().to_path_buf();

        assert_eq!(path.file_name().unwrap(), "edge.conf");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "listen 80;\n");

        drop(workspace);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_workspace_close() {
        let name = ScanName::parse("close-me").unwrap();
        let workspace = ScanWorkspace::create(&name, "x").await.unwrap();
        let dir = workspace.dir().to_path_buf();
        workspace.close().unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_workspaces_are_unique() {
        let name = ScanName::parse("same").unwrap();
        let a = ScanWorkspace::create(&name, "a").await.unwrap();
        let b = ScanWorkspace::create(&name, "b").await.unwrap();
        assert_ne!(a.conf_path(), b.conf_path());
    }
}
