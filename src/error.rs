use thiserror::Error;

/// Application-wide error taxonomy. Variant names mirror the error kinds
/// enumerated in the bridge's error-handling design, not arbitrary Rust
/// wrapper names.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("carrier API error: {0}")]
    CarrierApi(String),

    #[error("inference service unreachable: {0}")]
    InferenceUnreachable(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("datastore error: {0}")]
    Datastore(#[from] sqlx::Error),

    #[error("rate limited by inference provider")]
    AiRateLimit,

    #[error("inference provider server error: {0}")]
    AiServerError(String),

    #[error("inference provider API error: {0}")]
    AiApiError(String),

    #[error("failed to parse inference provider response: {0}")]
    AiParseError(String),

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("call not found")]
    CallNotFound,

    #[error("no transcript available")]
    NoTranscript,

    #[error("unknown error: {0}")]
    UnknownError(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::InferenceUnreachable(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::AiParseError(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Configuration(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::CarrierApi(_) => StatusCode::BAD_GATEWAY,
            Self::InferenceUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Codec(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Datastore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AiRateLimit => StatusCode::TOO_MANY_REQUESTS,
            Self::AiServerError(_) => StatusCode::BAD_GATEWAY,
            Self::AiApiError(_) => StatusCode::BAD_GATEWAY,
            Self::AiParseError(_) => StatusCode::BAD_GATEWAY,
            Self::NetworkError(_) => StatusCode::BAD_GATEWAY,
            Self::CallNotFound => StatusCode::NOT_FOUND,
            Self::NoTranscript => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnknownError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error, if encountered during the recap pipeline, should
    /// drive `recap_status` to `recap_failed_transient` (true, retryable) or
    /// `recap_failed_permanent` (false, terminal).
    pub fn recap_transient(&self) -> bool {
        !matches!(self, Self::CallNotFound | Self::NoTranscript)
    }

    /// Stable error code persisted as `recap_error_code`.
    pub fn recap_error_code(&self) -> &'static str {
        match self {
            Self::AiRateLimit => "RATE_LIMIT",
            Self::AiServerError(_) => "AI_SERVER_ERROR",
            Self::AiApiError(_) => "AI_API_ERROR",
            Self::AiParseError(_) => "AI_PARSE_ERROR",
            Self::NetworkError(_) => "NETWORK_ERROR",
            Self::CallNotFound => "CALL_NOT_FOUND",
            Self::NoTranscript => "NO_TRANSCRIPT",
            Self::Datastore(_) => "DATASTORE_ERROR",
            _ => "UNKNOWN_ERROR",
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(AppError::AiRateLimit.recap_transient());
        assert!(AppError::AiServerError("simulated".into()).recap_transient());
    }

    #[test]
    fn permanent_errors_are_terminal() {
        assert!(!AppError::CallNotFound.recap_transient());
        assert!(!AppError::NoTranscript.recap_transient());
    }

    #[test]
    fn recap_error_codes_are_stable_identifiers() {
        assert_eq!(AppError::AiRateLimit.recap_error_code(), "RATE_LIMIT");
        assert_eq!(AppError::CallNotFound.recap_error_code(), "CALL_NOT_FOUND");
        assert_eq!(AppError::NoTranscript.recap_error_code(), "NO_TRANSCRIPT");
    }
}
