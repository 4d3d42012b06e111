//! Normalization of the authorization code as handed back by a user or a
//! redirect: a bare code, `code#state`, or a full callback URL.

use crate::error::{OAuthError, Result};

/// An authorization code with the state it was issued for, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: Option<String>,
}

impl AuthorizationCode {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();

        let (code, state) = if let Some(url) = as_url(raw) {
            from_url(&url)
                .ok_or_else(|| OAuthError::InvalidCode("no code in callback URL".into()))?
        } else if let Some((code, state)) = raw.split_once('#') {
            (code.to_string(), non_empty(state))
        } else if raw.contains("code=") {
            from_query(raw.trim_start_matches('?'))
                .ok_or_else(|| OAuthError::InvalidCode("no code parameter".into()))?
        } else {
            (raw.to_string(), None)
        };

        let code = code.trim().to_string();
        if code.is_empty() {
            return Err(OAuthError::InvalidCode("empty code".into()));
        }
        Ok(Self {
            code,
            state: state.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn as_url(raw: &str) -> Option<url::Url> {
    url::Url::parse(raw).ok().filter(|url| !url.cannot_be_a_base())
}

fn from_url(url: &url::Url) -> Option<(String, Option<String>)> {
    url.query()
        .and_then(from_query)
        .or_else(|| url.fragment().and_then(from_query))
}

fn from_query(query: &str) -> Option<(String, Option<String>)> {
    let mut code = None;
    let mut state = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {},
        }
    }
    Some((code?, state))
}
