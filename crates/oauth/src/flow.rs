use std::sync::Arc;

use {
    secrecy::{ExposeSecret, SecretString},
    serde_json::json,
};

use crate::{
    error::{OAuthError, Result},
    pkce,
    transport::{HttpTransport, RequestBody, TokenRequest, TransportResponse},
    types::{
        AuthorizationRequest, OAuthConfig, PkceChallenge, StateMode, TokenBodyFormat,
        TokenResponse,
    },
};

/// A freshly generated authorization attempt and the secret needed to finish it.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub request: AuthorizationRequest,
    pub pkce: PkceChallenge,
}

/// Stateless OAuth 2.0 authorization code + PKCE operations against one provider.
pub struct OAuthFlow {
    config: OAuthConfig,
    transport: Arc<dyn HttpTransport>,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate().map_err(OAuthError::InvalidConfig)?;
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Generate PKCE material and the authorize URL for a new attempt.
    pub fn start(&self) -> PendingAuthorization {
        let pkce = pkce::generate();
        let state = match self.config.state {
            StateMode::Random => uuid::Uuid::new_v4().simple().to_string(),
            StateMode::Verifier => pkce.verifier.expose_secret().clone(),
        };
        let url = self.authorization_url(&pkce, &state);
        PendingAuthorization {
            request: AuthorizationRequest { url, state },
            pkce,
        }
    }

    /// Build the browser-facing authorize URL.
    pub fn authorization_url(&self, pkce: &PkceChallenge, state: &str) -> String {
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let scope = self.config.scopes.join(" ");
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }
        params.extend([
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", PkceChallenge::METHOD),
            ("state", state),
        ]);
        params.extend(
            self.config
                .extra_authorize_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        match url::Url::parse(&self.config.auth_url) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params);
                url.into()
            },
            // Only for configs that never went through `validate`.
            Err(_) => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params)
                    .finish();
                format!("{}?{query}", self.config.auth_url)
            },
        }
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange(
        &self,
        code: &str,
        state: Option<&str>,
        verifier: &SecretString,
    ) -> Result<TokenResponse> {
        let mut fields = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", verifier.expose_secret().as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(state) = state {
            fields.push(("state", state));
        }

        let resp = self.post(&fields).await?;
        if !resp.is_success() {
            tracing::warn!(status = resp.status, "authorization code exchange rejected");
            return Err(OAuthError::Exchange {
                status: resp.status,
                body: resp.body,
            });
        }
        parse_token_response(&resp)
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let fields = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];

        let resp = self.post(&fields).await?;
        if !resp.is_success() {
            tracing::warn!(status = resp.status, "token refresh rejected");
            return Err(OAuthError::Refresh {
                status: resp.status,
                body: resp.body,
            });
        }
        parse_token_response(&resp)
    }

    async fn post(&self, fields: &[(&str, &str)]) -> Result<TransportResponse> {
        let body = match self.config.token_body {
            TokenBodyFormat::Json => RequestBody::Json(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), json!(v)))
                    .collect::<serde_json::Map<_, _>>()
                    .into(),
            ),
            TokenBodyFormat::Form => RequestBody::Form(
                fields
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
        };
        self.transport
            .post(TokenRequest {
                url: self.config.token_url.clone(),
                headers: self.config.headers.clone(),
                body,
            })
            .await
    }
}

fn parse_token_response(resp: &TransportResponse) -> Result<TokenResponse> {
    let parsed: TokenResponse = serde_json::from_str(&resp.body)
        .map_err(|e| OAuthError::InvalidResponse(format!("{e} (HTTP {})", resp.status)))?;
    if parsed.access_token.is_empty() {
        return Err(OAuthError::InvalidResponse("empty access_token".into()));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {super::*, async_trait::async_trait};

    struct Recorder {
        requests: Mutex<Vec<TokenRequest>>,
        response: TransportResponse,
    }

    #[async_trait]
    impl HttpTransport for Recorder {
        async fn post(&self, request: TokenRequest) -> Result<TransportResponse> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    fn recorder(status: u16, body: &str) -> Arc<Recorder> {
        Arc::new(Recorder {
            requests: Mutex::new(Vec::new()),
            response: TransportResponse {
                status,
                body: body.to_string(),
            },
        })
    }

    fn config() -> OAuthConfig {
        OAuthConfig::new(
            "client-1",
            "https://auth.example.com/oauth/authorize?prompt=login",
            "https://auth.example.com/oauth/token",
            "http://127.0.0.1:1455/callback",
        )
        .with_scopes(["profile", "offline_access"])
    }

    fn query(url: &str) -> Vec<(String, String)> {
        url::Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_authorization_url_parameters() {
        let flow = OAuthFlow::new(config(), recorder(200, "{}")).unwrap();
        let pending = flow.start();
        let pairs = query(&pending.request.url);

        assert!(pending.request.url.starts_with("https://auth.example.com/oauth/authorize?"));
        assert_eq!(param(&pairs, "prompt"), Some("login"));
        assert_eq!(param(&pairs, "response_type"), Some("code"));
        assert_eq!(param(&pairs, "client_id"), Some("client-1"));
        assert_eq!(
            param(&pairs, "redirect_uri"),
            Some("http://127.0.0.1:1455/callback")
        );
        assert_eq!(param(&pairs, "scope"), Some("profile offline_access"));
        assert_eq!(param(&pairs, "code_challenge_method"), Some("S256"));
        assert_eq!(
            param(&pairs, "code_challenge"),
            Some(pending.pkce.challenge.as_str())
        );
        assert_eq!(param(&pairs, "state"), Some(pending.request.state.as_str()));
        assert!(pending.request.url.contains("code_challenge_method=S256"));
    }

    #[test]
    fn test_state_modes() {
        let random = OAuthFlow::new(config(), recorder(200, "{}")).unwrap().start();
        assert_ne!(&random.request.state, random.pkce.verifier.expose_secret());
        assert_eq!(random.request.state.len(), 32);

        let flow = OAuthFlow::new(
            config().with_state_mode(StateMode::Verifier),
            recorder(200, "{}"),
        )
        .unwrap();
        let pending = flow.start();
        assert_eq!(&pending.request.state, pending.pkce.verifier.expose_secret());
    }

    #[test]
    fn test_empty_scopes_and_extra_params() {
        let mut cfg = config().with_authorize_param("code", "true");
        cfg.scopes.clear();
        let flow = OAuthFlow::new(cfg, recorder(200, "{}")).unwrap();
        let pairs = query(&flow.start().request.url);
        assert_eq!(param(&pairs, "scope"), None);
        assert_eq!(pairs.last().map(|(k, _)| k.as_str()), Some("code"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cfg = OAuthConfig::new("c", "nope", "https://x/token", "http://127.0.0.1/cb");
        assert!(matches!(
            OAuthFlow::new(cfg, recorder(200, "{}")),
            Err(OAuthError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_request_fields() {
        let transport = recorder(
            200,
            r#"{"access_token":"T1","refresh_token":"R1","expires_in":3600}"#,
        );
        let flow = OAuthFlow::new(config().with_header("user-agent", "t/1"), transport.clone())
            .unwrap();
        let pending = flow.start();

        let resp = flow
            .exchange("ABC", Some("XYZ"), &pending.pkce.verifier)
            .await
            .unwrap();
        assert_eq!(resp.access_token, "T1");
        assert_eq!(resp.expires_in, Some(3600));

        let requests = transport.requests.lock().unwrap();
        let req = &requests[0];
        assert_eq!(req.url, "https://auth.example.com/oauth/token");
        assert_eq!(req.headers, vec![("user-agent".to_string(), "t/1".to_string())]);
        assert!(matches!(req.body, RequestBody::Json(_)));
        assert_eq!(req.body.field("grant_type"), Some("authorization_code"));
        assert_eq!(req.body.field("code"), Some("ABC"));
        assert_eq!(req.body.field("state"), Some("XYZ"));
        assert_eq!(req.body.field("client_id"), Some("client-1"));
        assert_eq!(
            req.body.field("redirect_uri"),
            Some("http://127.0.0.1:1455/callback")
        );
        assert_eq!(
            req.body.field("code_verifier"),
            Some(pending.pkce.verifier.expose_secret().as_str())
        );
    }

    #[tokio::test]
    async fn test_refresh_uses_form_body_when_configured() {
        let transport = recorder(200, r#"{"access_token":"T2"}"#);
        let flow = OAuthFlow::new(
            config().with_token_body(TokenBodyFormat::Form),
            transport.clone(),
        )
        .unwrap();

        let resp = flow.refresh("R1").await.unwrap();
        assert_eq!(resp.access_token, "T2");
        assert!(resp.refresh_token.is_none());

        let requests = transport.requests.lock().unwrap();
        assert!(matches!(requests[0].body, RequestBody::Form(_)));
        assert_eq!(requests[0].body.field("grant_type"), Some("refresh_token"));
        assert_eq!(requests[0].body.field("refresh_token"), Some("R1"));
        assert_eq!(requests[0].body.field("code_verifier"), None);
    }

    #[tokio::test]
    async fn test_error_statuses_map_to_typed_errors() {
        let flow = OAuthFlow::new(config(), recorder(400, "invalid_grant")).unwrap();
        let pending = flow.start();
        match flow.exchange("ABC", None, &pending.pkce.verifier).await {
            Err(OAuthError::Exchange { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid_grant");
            },
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            flow.refresh("R").await,
            Err(OAuthError::Refresh { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_success_body() {
        let flow = OAuthFlow::new(config(), recorder(200, "<html>")).unwrap();
        assert!(matches!(
            flow.refresh("R").await,
            Err(OAuthError::InvalidResponse(_))
        ));
    }
}
