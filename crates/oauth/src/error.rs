/// Errors surfaced by the OAuth token lifecycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OAuthError {
    #[error("no authorization in progress: call begin_authorization() first")]
    Sequence,

    #[error("authorization code exchange failed (HTTP {status}): {body}")]
    Exchange { status: u16, body: String },

    #[error("token refresh failed (HTTP {status}): {body}")]
    Refresh { status: u16, body: String },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("stored tokens have no refresh token")]
    NoRefreshToken,

    #[error("invalid authorization code: {0}")]
    InvalidCode(String),

    #[error("state returned by the provider does not match the pending authorization")]
    StateMismatch,

    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("timed out waiting for the authorization callback")]
    CallbackTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid OAuth configuration: {0}")]
    InvalidConfig(String),

    #[error("unexpected token endpoint response: {0}")]
    InvalidResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token storage error: {0}")]
    Storage(String),
}

impl OAuthError {
    /// Whether the caller has to run the authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated
                | Self::NoRefreshToken
                | Self::Refresh { .. }
                | Self::Exchange { .. }
                | Self::Sequence
        )
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for OAuthError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OAuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T, E = OAuthError> = std::result::Result<T, E>;
