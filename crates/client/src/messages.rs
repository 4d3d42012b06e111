use std::sync::Arc;

use {
    reqwest::StatusCode,
    serde_json::Value,
    tokenline_config::ApiConfig,
    tokenline_oauth::{OAuthError, TokenLifecycle},
    tracing::{debug, warn},
};

/// Errors from calls made with an OAuth access token.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] OAuthError),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("no model given and no default_model configured")]
    MissingModel,
}

/// Per-call overrides for [`MessagesClient::send_message`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

/// Posts JSON to a provider API with the lifecycle's bearer token.
///
/// A 401 forces one token refresh and one retry; a second rejection is
/// returned to the caller.
pub struct MessagesClient {
    lifecycle: Arc<TokenLifecycle>,
    api: ApiConfig,
    client: reqwest::Client,
}

impl MessagesClient {
    pub fn new(lifecycle: Arc<TokenLifecycle>, api: ApiConfig) -> Self {
        Self {
            lifecycle,
            api,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// POST `body` to `path` under the configured base URL.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let url = self.url(path);
        let token = self.lifecycle.access_token().await?;
        let resp = self.send(&url, &token, body).await?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return decode(resp).await;
        }

        warn!(%url, "access token rejected, refreshing once");
        let tokens = self.lifecycle.refresh().await?;
        let retry = self.send(&url, &tokens.access_token, body).await?;
        decode(retry).await
    }

    /// Send a single user message and return the concatenated text blocks.
    pub async fn send_message(
        &self,
        text: &str,
        options: &SendOptions,
    ) -> Result<String, ClientError> {
        let model = options
            .model
            .as_deref()
            .or(self.api.default_model.as_deref())
            .ok_or(ClientError::MissingModel)?;
        let body = serde_json::json!({
            "model": model,
            "max_tokens": options.max_tokens.unwrap_or(self.api.max_tokens),
            "messages": [{"role": "user", "content": text}],
        });

        let resp = self.post_json(&self.api.messages_path, &body).await?;
        let text = resp["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect::<String>()
            })
            .ok_or_else(|| ClientError::Decode("missing content array".into()))?;

        debug!(
            model,
            input_tokens = resp["usage"]["input_tokens"].as_u64(),
            output_tokens = resp["usage"]["output_tokens"].as_u64(),
            "message complete"
        );
        Ok(text)
    }

    async fn send(
        &self,
        url: &str,
        token: &str,
        body: &Value,
    ) -> Result<reqwest::Response, ClientError> {
        let mut req = self
            .client
            .post(url)
            .bearer_auth(token)
            .header("content-type", "application/json");
        for (name, value) in &self.api.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        Ok(req.json(body).send().await?)
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(ClientError::Http {
            status: status.as_u16(),
            body: error_body(resp.text().await),
        });
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(format!("{e}: {text}")))
}

fn error_body(body: reqwest::Result<String>) -> String {
    body.unwrap_or_else(|e| format!("<unreadable body: {e}>"))
}
