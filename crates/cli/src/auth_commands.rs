use std::time::Duration;

use {
    anyhow::Result,
    clap::Subcommand,
    tokenline_config::TokenlineConfig,
    tokenline_oauth::{LifecycleState, LoopbackReceiver, OAuthTokens, types::now_millis},
};

use crate::{
    paste::{PastePrompt, present},
    provider::Provider,
};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Log in to the provider via OAuth.
    Login {
        /// Paste the code instead of running the local callback server.
        #[arg(long)]
        manual: bool,
        /// Print the authorization URL without opening a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Show authentication status for every configured provider.
    Status,
    /// Refresh the access token now.
    Refresh,
    /// Print a valid access token, refreshing it if needed.
    Token,
    /// Forget the stored tokens.
    Logout,
}

pub async fn handle_auth(
    action: AuthAction,
    config: &TokenlineConfig,
    selected: Option<&str>,
) -> Result<()> {
    match action {
        AuthAction::Login { manual, no_browser } => {
            login(&Provider::open(config, selected)?, manual, no_browser).await
        },
        AuthAction::Status => status(config, selected),
        AuthAction::Refresh => refresh(&Provider::open(config, selected)?).await,
        AuthAction::Token => {
            let provider = Provider::open(config, selected)?;
            println!("{}", provider.lifecycle.access_token().await?);
            Ok(())
        },
        AuthAction::Logout => {
            let provider = Provider::open(config, selected)?;
            provider.lifecycle.logout()?;
            println!("Logged out from {}", provider.name);
            Ok(())
        },
    }
}

async fn login(provider: &Provider, manual: bool, no_browser: bool) -> Result<()> {
    let redirect_uri = provider.lifecycle.config().redirect_uri.clone();

    let tokens = if !manual && LoopbackReceiver::supports(&redirect_uri) {
        let receiver = LoopbackReceiver::for_redirect_uri(&redirect_uri)?
            .on_ready(move |request| present(&request.url, !no_browser));
        println!("Waiting for callback on {redirect_uri} ...");
        provider.lifecycle.authorize(&receiver).await?
    } else {
        provider
            .lifecycle
            .authorize(&PastePrompt::new(!no_browser))
            .await?
    };

    println!(
        "Successfully logged in to {} [{}]",
        provider.name,
        describe(&tokens, now_millis())
    );
    Ok(())
}

async fn refresh(provider: &Provider) -> Result<()> {
    let tokens = provider.lifecycle.refresh().await?;
    println!(
        "Refreshed {} [{}]",
        provider.name,
        describe(&tokens, now_millis())
    );
    Ok(())
}

/// Without `--provider`, every configured provider is listed.
fn status(config: &TokenlineConfig, selected: Option<&str>) -> Result<()> {
    let names: Vec<&str> = match selected {
        Some(name) => vec![config.provider(Some(name))?.0],
        None => config.providers.keys().map(String::as_str).collect(),
    };
    if names.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    for name in names {
        let provider = Provider::open(config, Some(name))?;
        let line = match provider.lifecycle.state()? {
            LifecycleState::Authenticated => match provider.lifecycle.tokens()? {
                Some(tokens) => describe(&tokens, now_millis()),
                None => "not logged in".to_string(),
            },
            LifecycleState::AwaitingCode => "awaiting code".to_string(),
            LifecycleState::Unauthenticated => "not logged in".to_string(),
        };
        println!("{name} [{line}]");
    }
    Ok(())
}

fn describe(tokens: &OAuthTokens, now_ms: u64) -> String {
    match (tokens.expires_at, tokens.remaining(now_ms)) {
        (None, _) => "valid (no expiry)".to_string(),
        (Some(_), Some(remaining)) if remaining > Duration::ZERO => {
            format!("valid ({} remaining)", format_duration(remaining))
        },
        (Some(_), _) if tokens.refresh_token.is_some() => {
            "expired, will refresh on next use".to_string()
        },
        (Some(_), _) => "expired".to_string(),
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, mins) = (secs / 3600, (secs % 3600) / 60);
    if hours > 0 {
        format!("{hours}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_at: Option<u64>, refresh: bool) -> OAuthTokens {
        OAuthTokens {
            access_token: "T1".into(),
            refresh_token: refresh.then(|| "R1".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_describe_remaining() {
        let now = 1_000_000;
        let t = tokens(Some(now + 2 * 3_600_000 + 5 * 60_000), true);
        assert_eq!(describe(&t, now), "valid (2h 5m remaining)");
        let t = tokens(Some(now + 30_000), true);
        assert_eq!(describe(&t, now), "valid (30s remaining)");
    }

    #[test]
    fn test_describe_expired() {
        let now = 1_000_000;
        assert_eq!(
            describe(&tokens(Some(now - 1), true), now),
            "expired, will refresh on next use"
        );
        assert_eq!(describe(&tokens(Some(now - 1), false), now), "expired");
        assert_eq!(describe(&tokens(None, false), now), "valid (no expiry)");
    }
}
