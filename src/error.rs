//! HTTP error mapping. Every failure leaves the service as
//! `{"detail": "<message>"}` with a status chosen by the failure's origin.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::scanner::ScanError;
use crate::upload::UploadError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Upload(UploadError::UnsupportedMediaType) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Upload(UploadError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload(UploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::Scan(ScanError::InvalidOutput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Scan(ScanError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Scan(ScanError::Spawn { .. } | ScanError::Crashed { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Scan(ScanError::Closed) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Short label used in the audit log.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Upload(UploadError::UnsupportedMediaType) => "unsupported_media_type",
            ApiError::Upload(UploadError::InvalidScanName) => "invalid_scan_name",
            ApiError::Upload(UploadError::Empty) => "empty_upload",
            ApiError::Upload(UploadError::NotUtf8) => "not_utf8",
            ApiError::Upload(UploadError::MissingFile) => "missing_file",
            ApiError::Upload(UploadError::Multipart(_)) => "malformed_multipart",
            ApiError::Upload(UploadError::TooLarge { .. }) => "payload_too_large",
            ApiError::Upload(UploadError::Io(_)) => "io_error",
            ApiError::Scan(ScanError::InvalidOutput(_)) => "scanner_output",
            ApiError::Scan(ScanError::Timeout { .. }) => "scanner_timeout",
            ApiError::Scan(ScanError::Spawn { .. }) => "scanner_unavailable",
            ApiError::Scan(ScanError::Crashed { .. }) => "scanner_crashed",
            ApiError::Scan(ScanError::Closed) => "shutting_down",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{} ({})", self, status);
        } else {
            tracing::warn!("{} ({})", self, status);
        }

        let body = serde_json::json!({ "detail": self.to_string() });
        let body = serde_json::to_string(&body).unwrap_or_default() + "\n";
        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (UploadError::UnsupportedMediaType.into(), StatusCode::UNSUPPORTED_MEDIA_TYPE),
            (UploadError::InvalidScanName.into(), StatusCode::BAD_REQUEST),
            (UploadError::Empty.into(), StatusCode::BAD_REQUEST),
            (UploadError::MissingFile.into(), StatusCode::BAD_REQUEST),
            (UploadError::TooLarge { limit: 16 }.into(), StatusCode::PAYLOAD_TOO_LARGE),
            (ScanError::InvalidOutput("x".into()).into(), StatusCode::BAD_REQUEST),
            (
                ScanError::Timeout { binary: "gixy".into() }.into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ScanError::Spawn {
                    binary: "gixy".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }
                .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ScanError::Crashed { binary: "gixy".into(), detail: "Killed".into() }.into(),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{}", err);
        }
    }

    #[tokio::test]
    async fn test_response_body_has_detail() {
        let response = ApiError::from(ScanError::Timeout { binary: "gixy".into() }).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "detail": "gixy timed out" }));
    }
}
