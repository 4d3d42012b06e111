use async_trait::async_trait;

use crate::{error::Result, types::AuthorizationRequest};

/// Obtains the provider's redirect result for an authorization attempt.
///
/// Implementations present `request.url` to the user however they like
/// (browser, terminal, local callback server) and return whatever the
/// provider handed back: a bare code, `code#state`, or the callback URL.
#[async_trait]
pub trait RedirectReceiver: Send + Sync {
    async fn receive(&self, request: &AuthorizationRequest) -> Result<String>;
}
