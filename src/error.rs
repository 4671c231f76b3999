use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error taxonomy for the session, rate, and dispatch core.
///
/// The dispatcher recovers exactly one category locally (a single
/// unauthenticated upstream response triggers one refresh-and-retry); every
/// other error is surfaced to the caller unchanged.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The refresh token is invalid or expired. The session has been cleared
    /// and the user must re-authenticate; retrying is pointless.
    #[error("authentication expired, re-authentication required")]
    AuthExpired,
    /// The token refresh failed for a transient reason (network, timeout).
    /// The session is preserved and a later retry may succeed.
    #[error("transient authentication failure: {0}")]
    AuthTransient(String),
    /// A rate window or daily quota rejected the request.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    /// The session carrier failed to persist a write. Surfaced rather than
    /// swallowed: an unsynced token silently diverges from what the client
    /// believes it has.
    #[error("session persistence failed: {0}")]
    Persistence(String),
    /// An upstream mail/LLM failure unrelated to auth.
    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// HTTP status the route layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::AuthExpired => 401,
            GatewayError::AuthTransient(_) => 503,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Persistence(_) | GatewayError::Config(_) => 500,
            GatewayError::Upstream { status, .. } if *status >= 400 => *status,
            GatewayError::Upstream { .. } => 502,
        }
    }
}

/// Raw failure from an upstream HTTP call (mail or LLM API), before the
/// dispatcher has decided whether it is an auth problem.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(String),
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, UpstreamError::Status { status: 401, .. })
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Decode(err.to_string())
    }
}

impl From<UpstreamError> for GatewayError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Status { status, body } => GatewayError::Upstream {
                status,
                message: body,
            },
            UpstreamError::Http(msg) => GatewayError::Upstream {
                status: 502,
                message: msg,
            },
            UpstreamError::Decode(msg) => GatewayError::Upstream {
                status: 502,
                message: msg,
            },
        }
    }
}
