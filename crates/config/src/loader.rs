use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::schema::{ProviderConfig, TokenlineConfig};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "TOKENLINE_CONFIG";

const FILE_STEM: &str = "tokenline";
const EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// `<config dir>/tokenline`.
pub fn config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("tokenline"))
}

/// First `tokenline.{toml,yaml,yml,json}` present in `dir`.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{FILE_STEM}.{ext}")))
        .find(|p| p.is_file())
}

/// Load configuration.
///
/// An explicit path (argument, then `$TOKENLINE_CONFIG`) must exist. Without
/// one the default config directory is searched and a missing file yields
/// the default (empty) configuration.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<TokenlineConfig> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    if let Some(path) = explicit.map(Path::to_path_buf).or(from_env) {
        return load_file(&path);
    }

    match config_dir().as_deref().and_then(find_config_file) {
        Some(path) => load_file(&path),
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(TokenlineConfig::default())
        },
    }
}

/// Parse one file, picking the format from its extension.
pub fn load_file(path: &Path) -> anyhow::Result<TokenlineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = parse(&content, path)?;
    validate(&config).with_context(|| format!("invalid config file {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        providers = config.providers.len(),
        "loaded config"
    );
    Ok(config)
}

fn parse(content: &str, path: &Path) -> anyhow::Result<TokenlineConfig> {
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(content).map_err(anyhow::Error::from),
        Some("yaml" | "yml") => serde_yaml::from_str(content).map_err(anyhow::Error::from),
        Some("json") => serde_json::from_str(content).map_err(anyhow::Error::from),
        other => bail!(
            "unsupported config format {:?} for {}",
            other.unwrap_or(""),
            path.display()
        ),
    };
    parsed.with_context(|| format!("failed to parse config file {}", path.display()))
}

fn validate(config: &TokenlineConfig) -> anyhow::Result<()> {
    for (name, provider) in &config.providers {
        provider
            .oauth_config()
            .validate()
            .map_err(|e| anyhow::anyhow!("provider '{name}': {e}"))?;
        if let Some(api) = &provider.api {
            url::Url::parse(&api.base_url)
                .with_context(|| format!("provider '{name}': api.base_url"))?;
        }
    }
    if let Some(default) = &config.default_provider {
        if !config.providers.contains_key(default) {
            bail!("default_provider '{default}' is not configured");
        }
    }
    Ok(())
}

impl TokenlineConfig {
    /// Resolve a provider by name, falling back to `default_provider`, then
    /// to the only configured provider.
    pub fn provider(&self, name: Option<&str>) -> anyhow::Result<(&str, &ProviderConfig)> {
        let name = match name.or(self.default_provider.as_deref()) {
            Some(name) => name,
            None if self.providers.len() == 1 => {
                return self
                    .providers
                    .iter()
                    .next()
                    .map(|(n, p)| (n.as_str(), p))
                    .context("no providers configured");
            },
            None if self.providers.is_empty() => bail!("no providers configured"),
            None => bail!(
                "several providers configured ({}); pick one with --provider",
                self.providers
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        self.providers
            .get_key_value(name)
            .map(|(n, p)| (n.as_str(), p))
            .with_context(|| format!("unknown provider '{name}'"))
    }

    /// Token file location.
    pub fn storage_path(&self) -> anyhow::Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => tokenline_oauth::FileStorage::default_path().map_err(anyhow::Error::from),
        }
    }
}
