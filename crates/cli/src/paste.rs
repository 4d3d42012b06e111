use std::io::{self, BufRead, Write};

use {
    async_trait::async_trait,
    tokenline_oauth::{AuthorizationRequest, OAuthError, RedirectReceiver, error::Result},
};

/// Asks the user to paste the code (or the whole redirect URL) the
/// provider displayed after sign-in.
pub struct PastePrompt {
    open_browser: bool,
}

impl PastePrompt {
    pub fn new(open_browser: bool) -> Self {
        Self { open_browser }
    }
}

#[async_trait]
impl RedirectReceiver for PastePrompt {
    async fn receive(&self, request: &AuthorizationRequest) -> Result<String> {
        present(&request.url, self.open_browser);

        tokio::task::spawn_blocking(|| {
            print!("Paste the authorization code or redirect URL: ");
            io::stdout().flush().map_err(prompt_error)?;
            read_code(io::stdin().lock())
        })
        .await
        .map_err(|_| OAuthError::Cancelled)?
    }
}

/// Print the authorization URL and optionally open it in a browser.
pub fn present(url: &str, open_browser: bool) {
    if open_browser {
        println!("Opening browser for authentication...");
        if open::that(url).is_ok() {
            println!("If nothing opened, visit:\n{url}");
            return;
        }
    }
    println!("Visit this URL to sign in:\n{url}");
}

fn read_code(mut input: impl BufRead) -> Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line).map_err(prompt_error)? == 0 {
        return Err(OAuthError::Cancelled);
    }
    Ok(line.trim().to_string())
}

fn prompt_error(err: io::Error) -> OAuthError {
    OAuthError::Transport(format!("reading the authorization code from the terminal: {err}"))
}
