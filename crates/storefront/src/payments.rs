//! Payment providers and payment initialisation.
//!
//! Payment itself happens at the provider; the storefront only lists the
//! providers the backend offers and asks the backend to initialise a payment
//! for a placed order, which yields a redirect URL for online providers.

use emporium_core::{CheckoutSessionId, OrderId};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::{ApiClient, ApiError, ApiRequest};

/// Provider code for cash on delivery.
pub const CASH_ON_DELIVERY: &str = "cod";

/// A payment provider offered for a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProvider {
    /// Provider code, e.g. `cod`, `liqpay`, `monobank`.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Whether the shopper is redirected to pay online.
    #[serde(default)]
    pub online: bool,
}

impl PaymentProvider {
    /// Whether this is cash on delivery.
    #[must_use]
    pub fn is_cash_on_delivery(&self) -> bool {
        self.code == CASH_ON_DELIVERY
    }
}

/// Result of initialising a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInit {
    /// Where to send the shopper, for online providers.
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Provider-side payment status.
    pub status: String,
}

/// Client for the payment endpoints.
#[derive(Clone)]
pub struct PaymentsClient {
    api: ApiClient,
}

impl PaymentsClient {
    /// Create a payments client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Providers available, optionally narrowed to a checkout.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self))]
    pub async fn providers(
        &self,
        checkout_id: Option<&CheckoutSessionId>,
    ) -> Result<Vec<PaymentProvider>, ApiError> {
        let mut request = ApiRequest::get("/api/v1/payments/providers");
        if let Some(id) = checkout_id {
            request = request.query("checkout_id", id.as_str());
        }
        Ok(self.api.send(request).await?.data)
    }

    /// Initialise payment for a placed order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self))]
    pub async fn init(&self, order_id: OrderId, provider: &str) -> Result<PaymentInit, ApiError> {
        let request = ApiRequest::post("/api/v1/payments/init").json(&serde_json::json!({
            "order_id": order_id,
            "provider": provider,
        }))?;
        Ok(self.api.send(request).await?.data)
    }
}
