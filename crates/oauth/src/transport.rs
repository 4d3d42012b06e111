use std::time::Duration;

use {async_trait::async_trait, serde_json::Value};

use crate::error::Result;

/// Body of a token endpoint request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    /// Look up a field regardless of encoding.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self {
            Self::Json(value) => value.get(name).and_then(Value::as_str),
            Self::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
        }
    }
}

/// A POST to the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

/// Raw status and body of the provider's answer.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues token endpoint requests. Errors are connection-level failures;
/// HTTP error statuses come back as a response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: TokenRequest) -> Result<TransportResponse>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: TokenRequest) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!(url = %request.url, status, "token endpoint responded");
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reqwest_transport_sends_json_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/json")
            .match_header("x-extra", "1")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"grant_type": "refresh_token"}),
            ))
            .with_status(200)
            .with_body(r#"{"access_token":"T"}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let resp = transport
            .post(TokenRequest {
                url: format!("{}/token", server.url()),
                headers: vec![("x-extra".into(), "1".into())],
                body: RequestBody::Json(serde_json::json!({"grant_type": "refresh_token"})),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(resp.is_success());
        assert_eq!(resp.body, r#"{"access_token":"T"}"#);
    }

    #[tokio::test]
    async fn test_reqwest_transport_form_body_and_error_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "authorization_code".into(),
            ))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let resp = transport
            .post(TokenRequest {
                url: format!("{}/token", server.url()),
                headers: vec![],
                body: RequestBody::Form(vec![(
                    "grant_type".into(),
                    "authorization_code".into(),
                )]),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(resp.status, 400);
        assert!(!resp.is_success());
        assert!(resp.body.contains("invalid_grant"));
    }

    #[test]
    fn test_request_body_field_lookup() {
        let json = RequestBody::Json(serde_json::json!({"code": "c"}));
        assert_eq!(json.field("code"), Some("c"));
        assert_eq!(json.field("state"), None);

        let form = RequestBody::Form(vec![("code".into(), "c".into())]);
        assert_eq!(form.field("code"), Some("c"));
    }
}
