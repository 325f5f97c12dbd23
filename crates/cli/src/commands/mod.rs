//! Command implementations.

pub mod cart;
pub mod filters;
pub mod payments;

use emporium_storefront::api::{ApiClient, ApiError};
use emporium_storefront::config::{BackendConfig, ConfigError};
use thiserror::Error;

/// Errors shared by the backend-facing commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Backend configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Backend request failed.
    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    /// Argument could not be used.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be encoded.
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Build a backend client from `EMPORIUM_API_*` variables.
pub fn backend_client() -> Result<ApiClient, CommandError> {
    dotenvy::dotenv().ok();
    let config = BackendConfig::from_env()?;
    tracing::debug!(base_url = %config.base_url, "Using backend");
    Ok(ApiClient::new(&config)?)
}

/// Print a value as pretty JSON on stdout.
#[allow(clippy::print_stdout)]
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CommandError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
