//! OAuth 2.0 authorization code + PKCE client with local token persistence.
//!
//! [`TokenLifecycle`] drives the handshake and hands out access tokens,
//! refreshing them shortly before they expire. Persistence and HTTP are
//! injected through [`Storage`] and [`HttpTransport`].

pub mod callback_server;
pub mod code;
pub mod error;
pub mod flow;
pub mod lifecycle;
pub mod pkce;
pub mod redirect;
pub mod storage;
pub mod transport;
pub mod types;

pub use {
    callback_server::{CallbackParams, CallbackServer, LoopbackReceiver},
    code::AuthorizationCode,
    error::OAuthError,
    flow::{OAuthFlow, PendingAuthorization},
    lifecycle::TokenLifecycle,
    redirect::RedirectReceiver,
    storage::{FileStorage, MemoryStorage, Storage, TokenStore},
    transport::{HttpTransport, RequestBody, ReqwestTransport, TokenRequest, TransportResponse},
    types::{
        AuthorizationRequest, LifecycleState, OAuthConfig, OAuthTokens, PkceChallenge, StateMode,
        TokenBodyFormat, TokenResponse,
    },
};
