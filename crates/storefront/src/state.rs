//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Duration;

use emporium_core::CartToken;
use moka::future::Cache;
use tracing::debug;

use crate::api::{ApiClient, ApiError};
use crate::cart::{CartClient, CartRegistry, CartStore};
use crate::catalog::CatalogClient;
use crate::checkout::CheckoutController;
use crate::config::StorefrontConfig;
use crate::payments::PaymentsClient;
use crate::shipping::ShippingClient;

/// Checkout controllers idle for longer than this are dropped.
const CHECKOUT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// backend clients and the per-cart state containers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    api: ApiClient,
    carts: CartRegistry,
    checkouts: Cache<CartToken, Arc<CheckoutController>>,
    catalog: CatalogClient,
    shipping: ShippingClient,
    payments: PaymentsClient,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend HTTP client cannot be built.
    pub fn new(config: StorefrontConfig) -> Result<Self, ApiError> {
        let api = ApiClient::new(&config.backend)?;
        let checkouts = Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(CHECKOUT_IDLE_TIMEOUT)
            .build();

        Ok(Self {
            inner: Arc::new(AppStateInner {
                carts: CartRegistry::new(CartClient::new(api.clone())),
                catalog: CatalogClient::new(api.clone()),
                shipping: ShippingClient::new(api.clone()),
                payments: PaymentsClient::new(api.clone()),
                checkouts,
                api,
                config,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the backend API client.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Get a reference to the cart registry.
    #[must_use]
    pub fn carts(&self) -> &CartRegistry {
        &self.inner.carts
    }

    /// Get a reference to the catalog client.
    #[must_use]
    pub fn catalog(&self) -> &CatalogClient {
        &self.inner.catalog
    }

    /// Get a reference to the shipping client.
    #[must_use]
    pub fn shipping(&self) -> &ShippingClient {
        &self.inner.shipping
    }

    /// Get a reference to the payments client.
    #[must_use]
    pub fn payments(&self) -> &PaymentsClient {
        &self.inner.payments
    }

    /// The checkout controller for a cart, created on first use.
    ///
    /// A controller bound to a different store for the same token (the
    /// registry dropped and rebuilt the store while the controller was kept)
    /// is replaced, so checkout never works from an orphaned snapshot.
    pub async fn checkout(&self, cart: Arc<CartStore>) -> Arc<CheckoutController> {
        let inner = &self.inner;
        let build = || {
            Arc::new(CheckoutController::new(
                inner.api.clone(),
                Arc::clone(&cart),
                inner.carts.subscribe(),
            ))
        };

        let controller = inner
            .checkouts
            .get_with(cart.token().clone(), async { build() })
            .await;
        if Arc::ptr_eq(controller.cart(), &cart) {
            return controller;
        }

        debug!(token = %cart.token(), "Cart store was replaced, rebuilding checkout");
        let controller = build();
        inner
            .checkouts
            .insert(cart.token().clone(), Arc::clone(&controller))
            .await;
        controller
    }

    /// Drop the checkout controller for a cart that no longer exists.
    pub async fn forget_checkout(&self, token: &CartToken) {
        self.inner.checkouts.invalidate(token).await;
    }
}
