use {
    anyhow::{Context, Result},
    tokenline_client::{MessagesClient, SendOptions},
    tracing::info,
};

use crate::provider::Provider;

pub async fn send(provider: &Provider, message: &str, options: &SendOptions) -> Result<()> {
    let api = provider
        .config
        .api
        .clone()
        .with_context(|| format!("provider '{}' has no [api] section", provider.name))?;
    info!(provider = %provider.name, base_url = %api.base_url, "sending message");

    let client = MessagesClient::new(provider.lifecycle.clone(), api);
    let reply = client.send_message(message, options).await?;
    println!("{reply}");
    Ok(())
}
