use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use {tokio_util::sync::CancellationToken, tracing::info};

use crate::{
    code::AuthorizationCode,
    error::{OAuthError, Result},
    flow::{OAuthFlow, PendingAuthorization},
    redirect::RedirectReceiver,
    storage::TokenStore,
    transport::{HttpTransport, ReqwestTransport},
    types::{AuthorizationRequest, LifecycleState, OAuthConfig, OAuthTokens, now_millis},
};

/// Owns the authorization code + PKCE handshake and the stored token pair.
///
/// One authorization attempt may be pending at a time; starting another
/// replaces it. Tokens are refreshed lazily by [`access_token`] when they
/// are about to expire, and concurrent callers share a single refresh.
///
/// [`access_token`]: TokenLifecycle::access_token
pub struct TokenLifecycle {
    flow: OAuthFlow,
    store: TokenStore,
    pending: Mutex<Option<PendingAuthorization>>,
    /// Held for the duration of a refresh; holds the error of the last
    /// completed attempt, if it failed.
    refresh_gate: tokio::sync::Mutex<Option<OAuthError>>,
    /// Bumped under the gate each time a refresh attempt completes.
    refresh_generation: AtomicU64,
}

impl TokenLifecycle {
    pub fn new(
        config: OAuthConfig,
        store: TokenStore,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        Ok(Self {
            flow: OAuthFlow::new(config, transport)?,
            store,
            pending: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(None),
            refresh_generation: AtomicU64::new(0),
        })
    }

    /// Use a `reqwest` transport honoring the configured request timeout.
    pub fn with_default_transport(config: OAuthConfig, store: TokenStore) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Self::new(config, store, Arc::new(transport))
    }

    pub fn config(&self) -> &OAuthConfig {
        self.flow.config()
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn state(&self) -> Result<LifecycleState> {
        if self.lock_pending().is_some() {
            return Ok(LifecycleState::AwaitingCode);
        }
        Ok(match self.store.load()? {
            Some(_) => LifecycleState::Authenticated,
            None => LifecycleState::Unauthenticated,
        })
    }

    /// The stored token pair, without refreshing it.
    pub fn tokens(&self) -> Result<Option<OAuthTokens>> {
        self.store.load()
    }

    /// Start a new authorization attempt and return the URL to visit.
    pub fn begin_authorization(&self) -> AuthorizationRequest {
        let pending = self.flow.start();
        let request = pending.request.clone();
        if self.lock_pending().replace(pending).is_some() {
            tracing::debug!("replacing pending authorization attempt");
        }
        request
    }

    /// Exchange the code returned by the provider for tokens and persist them.
    ///
    /// Accepts a bare code, `code#state`, or the full callback URL.
    pub async fn complete_authorization(&self, raw_code: &str) -> Result<OAuthTokens> {
        self.complete_authorization_with_cancel(raw_code, &CancellationToken::new())
            .await
    }

    /// Like [`complete_authorization`](Self::complete_authorization). On
    /// cancellation the pending attempt is kept.
    pub async fn complete_authorization_with_cancel(
        &self,
        raw_code: &str,
        cancel: &CancellationToken,
    ) -> Result<OAuthTokens> {
        let pending = self.lock_pending().clone().ok_or(OAuthError::Sequence)?;
        let code = AuthorizationCode::parse(raw_code)?;
        if self.config().verify_state
            && code
                .state
                .as_deref()
                .is_some_and(|state| state != pending.request.state)
        {
            return Err(OAuthError::StateMismatch);
        }

        let exchange =
            self.flow
                .exchange(&code.code, code.state.as_deref(), &pending.pkce.verifier);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OAuthError::Cancelled),
            resp = exchange => resp?,
        };

        let tokens = OAuthTokens::from_response(response, now_millis());
        self.store.save(&tokens)?;

        let mut slot = self.lock_pending();
        if slot
            .as_ref()
            .is_some_and(|current| current.request.state == pending.request.state)
        {
            *slot = None;
        }
        drop(slot);

        info!(
            key = self.store.key(),
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_at = tokens.expires_at,
            "authorization complete"
        );
        Ok(tokens)
    }

    /// Begin an attempt, let `receiver` obtain the redirect result, and complete it.
    pub async fn authorize(&self, receiver: &dyn RedirectReceiver) -> Result<OAuthTokens> {
        let request = self.begin_authorization();
        let raw = receiver.receive(&request).await?;
        self.complete_authorization(&raw).await
    }

    /// Return a usable access token, refreshing it first when it expires
    /// within the configured margin.
    pub async fn access_token(&self) -> Result<String> {
        self.access_token_with_cancel(&CancellationToken::new())
            .await
    }

    pub async fn access_token_with_cancel(&self, cancel: &CancellationToken) -> Result<String> {
        let margin = self.config().refresh_margin;
        let tokens = self.store.load()?.ok_or(OAuthError::NotAuthenticated)?;
        if !tokens.expires_within(margin, now_millis()) {
            return Ok(tokens.access_token);
        }

        let seen = self.refresh_generation.load(Ordering::Acquire);
        let mut last_failure = self.refresh_gate.lock().await;
        // An attempt finished while we waited: share its failure.
        if self.refresh_generation.load(Ordering::Acquire) != seen {
            if let Some(err) = last_failure.as_ref() {
                return Err(err.clone());
            }
        }
        let current = self.store.load()?.ok_or(OAuthError::NotAuthenticated)?;
        if current != tokens || !current.expires_within(margin, now_millis()) {
            return Ok(current.access_token);
        }
        tracing::debug!(key = self.store.key(), "access token expiring, refreshing");
        let refreshed = self.refresh_locked(current, cancel).await;
        self.record_outcome(&mut last_failure, &refreshed);
        Ok(refreshed?.access_token)
    }

    /// Refresh the stored token pair now. Exactly one request is made.
    pub async fn refresh(&self) -> Result<OAuthTokens> {
        self.refresh_with_cancel(&CancellationToken::new()).await
    }

    pub async fn refresh_with_cancel(&self, cancel: &CancellationToken) -> Result<OAuthTokens> {
        let mut last_failure = self.refresh_gate.lock().await;
        let tokens = self.store.load()?.ok_or(OAuthError::NotAuthenticated)?;
        let refreshed = self.refresh_locked(tokens, cancel).await;
        self.record_outcome(&mut last_failure, &refreshed);
        refreshed
    }

    /// Drop the stored tokens and any pending attempt.
    pub fn logout(&self) -> Result<()> {
        self.lock_pending().take();
        self.store.forget()?;
        info!(key = self.store.key(), "logged out");
        Ok(())
    }

    async fn refresh_locked(
        &self,
        tokens: OAuthTokens,
        cancel: &CancellationToken,
    ) -> Result<OAuthTokens> {
        let refresh_token = tokens
            .refresh_token
            .as_deref()
            .ok_or(OAuthError::NoRefreshToken)?;

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OAuthError::Cancelled),
            resp = self.flow.refresh(refresh_token) => resp?,
        };

        let next = tokens.refreshed(response, now_millis());
        self.store.save(&next)?;
        info!(
            key = self.store.key(),
            rotated = next.refresh_token != tokens.refresh_token,
            expires_at = next.expires_at,
            "access token refreshed"
        );
        Ok(next)
    }

    /// Publish a finished attempt to callers queued on the gate. A
    /// cancellation belongs to its caller only and is not shared.
    fn record_outcome(
        &self,
        last_failure: &mut Option<OAuthError>,
        outcome: &Result<OAuthTokens>,
    ) {
        if matches!(outcome, Err(OAuthError::Cancelled)) {
            return;
        }
        *last_failure = outcome.as_ref().err().cloned();
        self.refresh_generation.fetch_add(1, Ordering::Release);
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingAuthorization>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
