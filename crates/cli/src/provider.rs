use std::sync::Arc;

use {
    anyhow::Context,
    tokenline_config::{ProviderConfig, TokenlineConfig},
    tokenline_oauth::{FileStorage, TokenLifecycle, TokenStore},
    tracing::debug,
};

/// A configured provider with its lifecycle wired to the shared token file.
pub struct Provider {
    pub name: String,
    pub config: ProviderConfig,
    pub lifecycle: Arc<TokenLifecycle>,
}

impl Provider {
    pub fn open(config: &TokenlineConfig, selected: Option<&str>) -> anyhow::Result<Self> {
        let (name, provider) = config.provider(selected)?;
        let path = config.storage_path()?;
        debug!(provider = name, path = %path.display(), "opening token store");

        let store = TokenStore::new(Arc::new(FileStorage::new(path))).with_key(name);
        let lifecycle = TokenLifecycle::with_default_transport(provider.oauth_config(), store)
            .with_context(|| format!("provider '{name}'"))?;

        Ok(Self {
            name: name.to_string(),
            config: provider.clone(),
            lifecycle: Arc::new(lifecycle),
        })
    }
}
