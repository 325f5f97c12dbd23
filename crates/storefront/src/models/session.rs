//! Values kept in the shopper's session.

use emporium_core::CartToken;
use tower_sessions::Session;

/// Session keys.
pub mod keys {
    /// Key for the backend-issued cart token.
    pub const CART_TOKEN: &str = "cart_token";
}

/// Cart token stored for this session, if any.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn cart_token(session: &Session) -> Result<Option<CartToken>, tower_sessions::session::Error> {
    Ok(session
        .get::<CartToken>(keys::CART_TOKEN)
        .await?
        .and_then(|token| CartToken::new(token.as_str())))
}

/// Remember the cart token for this session.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn set_cart_token(
    session: &Session,
    token: &CartToken,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(keys::CART_TOKEN, token).await
}

/// Forget the cart token, after an order was placed or the cart vanished.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn clear_cart_token(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session
        .remove::<CartToken>(keys::CART_TOKEN)
        .await
        .map(|_| ())
}
