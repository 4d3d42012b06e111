use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use {
    async_trait::async_trait,
    axum::{
        Router,
        extract::{Query, State},
        http::StatusCode,
        response::Html,
        routing::get,
    },
    tokio::sync::{Mutex, oneshot},
};

use crate::{
    error::{OAuthError, Result},
    redirect::RedirectReceiver,
    types::AuthorizationRequest,
};

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Signed in</title></head>\
<body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">\
<h2>Authentication complete</h2><p>You can close this tab and return to the terminal.</p>\
</body></html>";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    pub state: Option<String>,
}

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Outcome = std::result::Result<CallbackParams, String>;
type SenderSlot = Arc<Mutex<Option<oneshot::Sender<Outcome>>>>;

/// A one-shot local HTTP server capturing the authorization redirect.
pub struct CallbackServer {
    listener: tokio::net::TcpListener,
    path: String,
}

impl CallbackServer {
    /// Bind `addr` and serve `path`. Port 0 picks a free port.
    pub async fn bind(addr: SocketAddr, path: impl Into<String>) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            OAuthError::Transport(format!("failed to bind callback server on {addr}: {e}"))
        })?;
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self { listener, path })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| OAuthError::Transport(e.to_string()))
    }

    /// Serve until the first callback carrying a code or an error arrives.
    pub async fn wait_for_code(self, timeout: Duration) -> Result<CallbackParams> {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let slot: SenderSlot = Arc::new(Mutex::new(Some(tx)));
        let app = Router::new()
            .route(&self.path, get(handle_callback))
            .with_state(slot);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let addr = self.local_addr()?;
        tracing::debug!(%addr, path = %self.path, "oauth callback server listening");
        let server = tokio::spawn(async move {
            let served = axum::serve(self.listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await;
            if let Err(e) = served {
                tracing::warn!(%e, "oauth callback server stopped with error");
            }
        });

        let outcome = tokio::time::timeout(timeout, rx).await;
        let _ = stop_tx.send(());
        // Browsers may hold idle keep-alive connections open.
        let abort = server.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
            abort.abort();
        }

        match outcome {
            Ok(Ok(Ok(params))) => Ok(params),
            Ok(Ok(Err(denied))) => Err(OAuthError::AuthorizationDenied(denied)),
            Ok(Err(_)) => Err(OAuthError::Transport(
                "callback server closed unexpectedly".into(),
            )),
            Err(_) => Err(OAuthError::CallbackTimeout),
        }
    }
}

async fn handle_callback(
    State(slot): State<SenderSlot>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    let outcome = if let Some(error) = params.get("error") {
        let detail = params
            .get("error_description")
            .map_or_else(|| error.clone(), |d| format!("{error}: {d}"));
        Err(detail)
    } else if let Some(code) = params.get("code").filter(|c| !c.is_empty()) {
        Ok(CallbackParams {
            code: code.clone(),
            state: params.get("state").cloned(),
        })
    } else {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("Missing code parameter.")),
        );
    };

    let page = match &outcome {
        Ok(_) => (StatusCode::OK, Html(SUCCESS_PAGE.to_string())),
        Err(detail) => (
            StatusCode::OK,
            Html(error_page(&format!("Authorization failed: {detail}"))),
        ),
    };
    if let Some(sender) = slot.lock().await.take() {
        let _ = sender.send(outcome);
    }
    page
}

fn error_page(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        "<!DOCTYPE html><html><head><title>Sign-in failed</title></head>\
<body style=\"font-family: system-ui; text-align: center; padding-top: 80px;\">\
<h2>Authentication failed</h2><p>{escaped}</p></body></html>"
    )
}

/// Receives the redirect on a loopback `redirect_uri` by running a
/// [`CallbackServer`] for the duration of one attempt.
pub struct LoopbackReceiver {
    addr: SocketAddr,
    path: String,
    redirect_uri: url::Url,
    timeout: Duration,
    on_ready: Option<Box<dyn Fn(&AuthorizationRequest) + Send + Sync>>,
}

impl LoopbackReceiver {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

    /// Derive address and path from a `http://127.0.0.1:<port>/<path>` style URI.
    pub fn for_redirect_uri(redirect_uri: &str) -> Result<Self> {
        let url = url::Url::parse(redirect_uri)
            .map_err(|e| OAuthError::InvalidConfig(format!("redirect_uri: {e}")))?;
        let ip = loopback_ip(&url).ok_or_else(|| {
            OAuthError::InvalidConfig(format!(
                "redirect_uri '{redirect_uri}' is not a loopback address"
            ))
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            OAuthError::InvalidConfig(format!("redirect_uri '{redirect_uri}' has no port"))
        })?;
        Ok(Self {
            addr: SocketAddr::new(ip, port),
            path: url.path().to_string(),
            redirect_uri: url,
            timeout: Self::DEFAULT_TIMEOUT,
            on_ready: None,
        })
    }

    /// Whether `redirect_uri` can be served locally.
    pub fn supports(redirect_uri: &str) -> bool {
        url::Url::parse(redirect_uri)
            .ok()
            .and_then(|url| loopback_ip(&url))
            .is_some()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Called once the server is listening, typically to open a browser.
    #[must_use]
    pub fn on_ready(mut self, f: impl Fn(&AuthorizationRequest) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl RedirectReceiver for LoopbackReceiver {
    async fn receive(&self, request: &AuthorizationRequest) -> Result<String> {
        let server = CallbackServer::bind(self.addr, self.path.clone()).await?;
        if let Some(on_ready) = &self.on_ready {
            on_ready(request);
        }
        let params = server.wait_for_code(self.timeout).await?;

        let mut callback = self.redirect_uri.clone();
        callback
            .query_pairs_mut()
            .clear()
            .append_pair("code", &params.code);
        if let Some(state) = &params.state {
            callback.query_pairs_mut().append_pair("state", state);
        }
        Ok(callback.into())
    }
}

fn loopback_ip(url: &url::Url) -> Option<IpAddr> {
    match url.host()? {
        url::Host::Domain("localhost") => Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        url::Host::Ipv4(ip) if ip.is_loopback() => Some(IpAddr::V4(ip)),
        url::Host::Ipv6(ip) if ip == Ipv6Addr::LOCALHOST => Some(IpAddr::V6(ip)),
        _ => None,
    }
}
