//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET    /health                        - Health check
//!
//! # Catalog
//! GET    /catalog                       - Product listing (filters in the query string)
//! GET    /category/{slug}               - Category listing
//! GET    /product/{slug}                - Product detail
//!
//! # Cart
//! GET    /cart                          - Current cart
//! POST   /cart/items                    - Add item (creates the cart)
//! PATCH  /cart/items/{id}               - Change quantity
//! DELETE /cart/items/{id}               - Remove item
//! POST   /cart/promo                    - Apply promo code
//! DELETE /cart/promo/{code}             - Remove promo code
//!
//! # Checkout
//! GET    /checkout                      - Checkout state
//! POST   /checkout/start                - Open a checkout session
//! PUT    /checkout/address              - Shipping address
//! GET    /checkout/shipping-methods     - Quoted shipping methods
//! PUT    /checkout/shipping             - Select shipping method
//! GET    /checkout/payment-providers    - Available payment providers
//! PUT    /checkout/payment              - Select payment provider
//! POST   /checkout/loyalty              - Redeem loyalty points
//! DELETE /checkout/loyalty              - Undo redemption
//! POST   /checkout/confirm              - Place the order
//!
//! # Address lookup
//! GET    /shipping/settlements?q=       - Settlement search
//! GET    /shipping/warehouses?settlement_ref=&q= - Pickup points
//! ```

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod shipping;

use axum::{
    Router,
    extract::Request,
    middleware::from_fn,
    routing::{delete, get, patch, post, put},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::field::Empty;

use crate::middleware::{create_session_layer, request_id_middleware};
use crate::state::AppState;

/// Create the catalog routes router.
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/catalog", get(catalog::index))
        .route("/category/{slug}", get(catalog::category))
        .route("/product/{slug}", get(catalog::product))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/items", post(cart::add_item))
        .route(
            "/items/{id}",
            patch(cart::update_item).delete(cart::remove_item),
        )
        .route("/promo", post(cart::apply_promo))
        .route("/promo/{code}", delete(cart::remove_promo))
}

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(checkout::show))
        .route("/start", post(checkout::start))
        .route("/address", put(checkout::set_address))
        .route("/shipping-methods", get(checkout::shipping_methods))
        .route("/shipping", put(checkout::set_shipping))
        .route("/payment-providers", get(checkout::payment_providers))
        .route("/payment", put(checkout::set_payment))
        .route(
            "/loyalty",
            post(checkout::apply_loyalty).delete(checkout::remove_loyalty),
        )
        .route("/confirm", post(checkout::confirm))
}

/// Create the address lookup routes router.
pub fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/settlements", get(shipping::settlements))
        .route("/warehouses", get(shipping::warehouses))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(catalog_routes())
        .nest("/cart", cart_routes())
        .nest("/checkout", checkout_routes())
        .nest("/shipping", shipping_routes())
}

/// Build the application with session, request id and tracing layers.
///
/// Sentry layers are added by the binary so tests can build the router
/// without a Sentry client.
pub fn router(state: AppState) -> Router {
    let session_layer = create_session_layer(state.config());

    // Outermost first: the trace span exists before the request id is recorded.
    routes()
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request| {
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = Empty,
                        )
                    }),
                )
                .layer(from_fn(request_id_middleware))
                .layer(session_layer),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
async fn health() -> &'static str {
    "ok"
}
