use std::{fmt, time::Duration};

use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
};

/// How the `state` parameter of an authorization request is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateMode {
    /// A fresh random value per attempt.
    #[default]
    Random,
    /// Reuse the PKCE verifier as the state value.
    Verifier,
}

/// Encoding of token endpoint request bodies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBodyFormat {
    #[default]
    Json,
    Form,
}

/// OAuth 2.0 provider configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: StateMode,
    /// Reject a code whose accompanying `state` differs from the pending attempt.
    pub verify_state: bool,
    pub token_body: TokenBodyFormat,
    /// Extra headers sent with every token endpoint request.
    pub headers: Vec<(String, String)>,
    /// Extra query parameters appended to the authorize URL.
    pub extra_authorize_params: Vec<(String, String)>,
    /// Access tokens expiring within this window are refreshed before use.
    pub refresh_margin: Duration,
    pub request_timeout: Duration,
}

impl OAuthConfig {
    pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        client_id: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            redirect_uri: redirect_uri.into(),
            scopes: Vec::new(),
            state: StateMode::default(),
            verify_state: false,
            token_body: TokenBodyFormat::default(),
            headers: Vec::new(),
            extra_authorize_params: Vec::new(),
            refresh_margin: Self::DEFAULT_REFRESH_MARGIN,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_state_mode(mut self, state: StateMode) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_state_verification(mut self, verify: bool) -> Self {
        self.verify_state = verify;
        self
    }

    #[must_use]
    pub fn with_token_body(mut self, format: TokenBodyFormat) -> Self {
        self.token_body = format;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_authorize_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.extra_authorize_params
            .push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Check that the endpoints are absolute URLs and the client id is set.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.trim().is_empty() {
            return Err("client_id is empty".to_string());
        }
        for (name, value) in [
            ("auth_url", &self.auth_url),
            ("token_url", &self.token_url),
            ("redirect_uri", &self.redirect_uri),
        ] {
            url::Url::parse(value).map_err(|e| format!("{name} '{value}' is not a URL: {e}"))?;
        }
        Ok(())
    }
}

/// Stored OAuth tokens.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    #[serde(rename = "access")]
    pub access_token: String,
    #[serde(rename = "refresh", default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp in milliseconds when the access token expires.
    #[serde(rename = "expires", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl OAuthTokens {
    /// Build a token pair from a token endpoint response received at `now_ms`.
    pub fn from_response(response: TokenResponse, now_ms: u64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| now_ms.saturating_add(secs.saturating_mul(1000))),
        }
    }

    /// Build the replacement pair from a refresh response. The previous
    /// refresh token survives when the provider does not rotate it.
    pub fn refreshed(&self, response: TokenResponse, now_ms: u64) -> Self {
        let mut next = Self::from_response(response, now_ms);
        if next.refresh_token.is_none() {
            next.refresh_token = self.refresh_token.clone();
        }
        next
    }

    /// Whether the token expires within `margin` of `now_ms`.
    pub fn expires_within(&self, margin: Duration, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let margin_ms = u64::try_from(margin.as_millis()).unwrap_or(u64::MAX);
                expires_at.saturating_sub(now_ms) < margin_ms
            },
            None => false,
        }
    }

    /// Remaining lifetime, or `None` when no expiry is known or it has passed.
    pub fn remaining(&self, now_ms: u64) -> Option<Duration> {
        self.expires_at
            .filter(|&at| at > now_ms)
            .map(|at| Duration::from_millis(at - now_ms))
    }
}

impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint response body.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: SecretString,
    pub challenge: String,
}

impl PkceChallenge {
    pub const METHOD: &'static str = "S256";
}

/// An authorization attempt handed to the user (or a redirect receiver).
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// What a lifecycle instance is currently waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unauthenticated,
    AwaitingCode,
    Authenticated,
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
