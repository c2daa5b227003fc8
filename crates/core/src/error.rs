use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The gateway's single error taxonomy. Every fallible operation on the hot
/// path returns one of these, never a bare `anyhow::Error`, the HTTP
/// status and the `{error:{code,message}}` envelope both derive from the
/// variant.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("invalid api key")]
    InvalidApiKey,

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// Upstream answered with a non-2xx status; the body is forwarded
    /// as-is (credential-restricted messages are redacted before this
    /// variant is constructed, not after).
    #[error("upstream returned {status}")]
    UpstreamStatus { status: u16, body: String },

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("failed to decode upstream response: {0}")]
    UpstreamDecode(String),

    /// The client disconnected before a response could be sent. Carries no
    /// HTTP response, the handler only uses this to finalize the log.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error("internal error")]
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UnknownProvider(_) | Self::UnknownModel(_) => StatusCode::BAD_REQUEST,
            Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamUnreachable(_) | Self::UpstreamDecode(_) => StatusCode::BAD_GATEWAY,
            Self::ClientDisconnected => StatusCode::OK,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidApiKey => "invalid_api_key",
            Self::UnknownProvider(_) => "unknown_provider",
            Self::UnknownModel(_) => "unknown_model",
            Self::UpstreamStatus { .. } => "upstream_error",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::UpstreamDecode(_) => "upstream_decode_error",
            Self::ClientDisconnected => "client_disconnected",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to put in the client-visible error envelope. Upstream
    /// bodies are forwarded verbatim; credential redaction happens
    /// server-side before a `GatewayError` variant is ever constructed.
    pub fn client_message(&self) -> String {
        match self {
            Self::UpstreamStatus { body, .. } => body.clone(),
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    code: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.client_message();

        (status, Json(ErrorEnvelope { error: ErrorDetails { code, message } })).into_response()
    }
}
