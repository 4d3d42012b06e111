use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use {
    serde::{Deserialize, Serialize},
    tokenline_oauth::{OAuthConfig, StateMode, TokenBodyFormat},
};

/// Root of `tokenline.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenlineConfig {
    /// Provider used when none is named on the command line.
    pub default_provider: Option<String>,
    pub storage: StorageConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Token file; defaults to `<config dir>/tokenline/tokens.json`.
    pub path: Option<PathBuf>,
}

/// One OAuth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub state: StateMode,
    #[serde(default)]
    pub verify_state: bool,
    #[serde(default)]
    pub token_body: TokenBodyFormat,
    #[serde(default)]
    pub token_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub authorize_params: BTreeMap<String, String>,
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub api: Option<ApiConfig>,
}

impl ProviderConfig {
    pub fn oauth_config(&self) -> OAuthConfig {
        let mut config = OAuthConfig::new(
            &self.client_id,
            &self.auth_url,
            &self.token_url,
            &self.redirect_uri,
        )
        .with_scopes(self.scopes.iter().cloned())
        .with_state_mode(self.state)
        .with_state_verification(self.verify_state)
        .with_token_body(self.token_body)
        .with_refresh_margin(Duration::from_secs(self.refresh_margin_secs))
        .with_request_timeout(Duration::from_secs(self.request_timeout_secs));
        for (name, value) in &self.token_headers {
            config = config.with_header(name, value);
        }
        for (name, value) in &self.authorize_params {
            config = config.with_authorize_param(name, value);
        }
        config
    }
}

/// Endpoint the access token is presented to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_messages_path")]
    pub messages_path: String,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_refresh_margin_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_messages_path() -> String {
    "/v1/messages".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}
