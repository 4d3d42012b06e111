//! Configuration for tokenline: OAuth providers, token storage and the API
//! each provider's tokens are used against.

pub mod loader;
pub mod schema;

pub use {
    loader::{CONFIG_ENV, config_dir, find_config_file, load, load_file},
    schema::{ApiConfig, ProviderConfig, StorageConfig, TokenlineConfig},
};
