//! Cart inspection commands.
//!
//! # Usage
//!
//! ```bash
//! em-cli cart show --token 3f0c...
//! ```

use emporium_core::CartToken;
use emporium_storefront::cart::CartClient;

use super::{CommandError, backend_client, print_json};

/// Fetch and print a cart snapshot.
pub async fn show(token: &str) -> Result<(), CommandError> {
    let token = CartToken::new(token.trim())
        .ok_or_else(|| CommandError::InvalidArgument("cart token is empty".to_owned()))?;

    let client = CartClient::new(backend_client()?);
    let cart = client.get_cart(&token).await?;

    tracing::info!(
        version = %cart.version,
        items = cart.item_count(),
        "Fetched cart"
    );
    print_json(&cart)
}
