//! Shipping lookups: quoted methods for a checkout, settlement and
//! warehouse (pickup point) search for carrier delivery.

use emporium_core::{CheckoutSessionId, QuoteId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::{ApiClient, ApiError, ApiRequest};

/// Shortest search string sent to the settlement/warehouse search.
pub const MIN_SEARCH_LENGTH: usize = 2;

/// Maximum results requested from the search endpoints.
const SEARCH_LIMIT: u32 = 20;

/// A delivery option priced for a specific checkout destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMethod {
    /// Method code, e.g. `nova_poshta_warehouse` or `courier`.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Quoted price.
    pub price: Decimal,
    /// Quote to echo back when selecting this method.
    pub quote_id: QuoteId,
    /// Estimated delivery time.
    #[serde(default)]
    pub eta_days: Option<u32>,
    /// Whether a warehouse (pickup point) must be chosen.
    #[serde(default)]
    pub requires_warehouse: bool,
}

/// A city/town known to the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Carrier reference.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Display name.
    pub name: String,
    /// Region/oblast.
    #[serde(default)]
    pub region: Option<String>,
}

/// A carrier branch or parcel locker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    /// Carrier reference.
    #[serde(rename = "ref")]
    pub reference: String,
    /// Display name.
    pub name: String,
    /// Branch number.
    #[serde(default)]
    pub number: Option<String>,
    /// Street address.
    #[serde(default)]
    pub address: Option<String>,
}

/// Client for the shipping endpoints.
#[derive(Clone)]
pub struct ShippingClient {
    api: ApiClient,
}

impl ShippingClient {
    /// Create a shipping client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Methods available for the checkout's current destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self), fields(checkout_id = %checkout_id))]
    pub async fn methods(
        &self,
        checkout_id: &CheckoutSessionId,
    ) -> Result<Vec<ShippingMethod>, ApiError> {
        let request =
            ApiRequest::get("/api/v1/shipping/methods").query("checkout_id", checkout_id.as_str());
        Ok(self.api.send(request).await?.data)
    }

    /// Search settlements by name. Queries shorter than
    /// [`MIN_SEARCH_LENGTH`] return nothing without calling the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self))]
    pub async fn settlements(&self, query: &str) -> Result<Vec<Settlement>, ApiError> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_LENGTH {
            return Ok(Vec::new());
        }

        let request = ApiRequest::get("/api/v1/shipping/settlements")
            .query("q", query)
            .query("limit", SEARCH_LIMIT.to_string());
        Ok(self.api.send(request).await?.data)
    }

    /// Warehouses in a settlement, optionally filtered by text.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self))]
    pub async fn warehouses(
        &self,
        settlement_ref: &str,
        query: Option<&str>,
    ) -> Result<Vec<Warehouse>, ApiError> {
        let settlement_ref = settlement_ref.trim();
        if settlement_ref.is_empty() {
            return Err(ApiError::InvalidRequest(
                "settlement reference is required".to_string(),
            ));
        }

        let mut request = ApiRequest::get("/api/v1/shipping/warehouses")
            .query("settlement_ref", settlement_ref)
            .query("limit", SEARCH_LIMIT.to_string());
        if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
            request = request.query("q", q);
        }
        Ok(self.api.send(request).await?.data)
    }
}
