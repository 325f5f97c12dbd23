//! Cart client: token-scoped, version-checked cart calls.
//!
//! # Protocol
//!
//! - `GET /api/v1/cart` returns the current snapshot for `X-Cart-Token`
//! - Every mutation sends `If-Match: "<version>"` and an `Idempotency-Key`
//! - An accepted mutation returns the new snapshot with a bumped version
//! - A stale version is answered with 409 and surfaces as
//!   [`ApiError::VersionConflict`]; nothing is merged client-side
//! - The first add-to-cart is sent without a token; the backend creates the
//!   cart and returns its token in the snapshot

mod store;

pub use store::{CartEvent, CartRegistry, CartStore, ConflictPolicy};

use emporium_core::{
    CartItemId, CartToken, CartVersion, CurrencyCode, IdempotencyKey, ProductId, VariantId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::{ApiClient, ApiError, ApiRequest};

const CART_PATH: &str = "/api/v1/cart";

// =============================================================================
// Cart Types
// =============================================================================

/// Snapshot of a cart as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    /// Cart identity.
    pub token: CartToken,
    /// Optimistic-lock version of this snapshot.
    pub version: CartVersion,
    /// Currency of every amount in the snapshot.
    #[serde(default)]
    pub currency: CurrencyCode,
    /// Line items.
    #[serde(default)]
    pub items: Vec<CartItem>,
    /// Promotions applied by the backend.
    #[serde(default)]
    pub promotions: Vec<Promotion>,
    /// Loyalty points the shopper could redeem at checkout.
    #[serde(default)]
    pub loyalty: Option<LoyaltyEligibility>,
    /// Totals computed by the backend.
    pub totals: CartTotals,
}

impl Cart {
    /// Whether the cart has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Find a line by its ID.
    #[must_use]
    pub fn item(&self, id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// A cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Line ID.
    pub id: CartItemId,
    /// Purchased variant.
    pub variant_id: VariantId,
    /// Parent product.
    pub product_id: ProductId,
    /// Product name at the time the line was priced.
    pub name: String,
    /// Variant SKU.
    #[serde(default)]
    pub sku: Option<String>,
    /// Units on this line.
    pub quantity: u32,
    /// Price per unit.
    pub unit_price: Decimal,
    /// Price per unit before discounts, when discounted.
    #[serde(default)]
    pub original_price: Option<Decimal>,
    /// `unit_price * quantity` as computed by the backend.
    pub line_total: Decimal,
    /// Thumbnail URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A promotion applied to the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Promo code, if the promotion was code-activated.
    #[serde(default)]
    pub code: Option<String>,
    /// Display name.
    pub name: String,
    /// Discount granted by this promotion.
    pub discount: Decimal,
}

/// Loyalty figures for the cart's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyEligibility {
    /// Points on the shopper's account.
    pub points_balance: u64,
    /// Most points redeemable against this cart.
    pub max_redeemable_points: u64,
    /// Money value of one point.
    pub point_value: Decimal,
}

/// Cart totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    /// Sum of line totals.
    pub subtotal: Decimal,
    /// Sum of promotion discounts.
    #[serde(default)]
    pub discount: Decimal,
    /// Amount payable before shipping.
    pub total: Decimal,
}

/// A cart mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CartOp {
    /// Add units of a variant (creates the cart when there is none).
    AddItem {
        /// Variant to add.
        variant_id: VariantId,
        /// Units to add.
        quantity: u32,
    },
    /// Set the quantity of a line. Zero removes the line.
    UpdateQuantity {
        /// Line to change.
        item_id: CartItemId,
        /// New quantity.
        quantity: u32,
    },
    /// Remove a line.
    RemoveItem {
        /// Line to remove.
        item_id: CartItemId,
    },
    /// Apply a promo code.
    ApplyPromo {
        /// Code as typed by the shopper.
        code: String,
    },
    /// Remove a promo code.
    RemovePromo {
        /// Code to remove.
        code: String,
    },
    /// Remove every line.
    Clear,
}

impl CartOp {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddItem { .. } => "add_item",
            Self::UpdateQuantity { .. } => "update_quantity",
            Self::RemoveItem { .. } => "remove_item",
            Self::ApplyPromo { .. } => "apply_promo",
            Self::RemovePromo { .. } => "remove_promo",
            Self::Clear => "clear",
        }
    }

    /// Whether the op can create a cart (be sent without a token).
    #[must_use]
    pub const fn creates_cart(&self) -> bool {
        matches!(self, Self::AddItem { .. })
    }

    /// Rewrite degenerate ops: a zero quantity update becomes a removal.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::UpdateQuantity {
                item_id,
                quantity: 0,
            } => Self::RemoveItem { item_id },
            other => other,
        }
    }

    /// Build the backend request for this op (without cart headers).
    fn to_request(&self) -> Result<ApiRequest, ApiError> {
        match self {
            Self::AddItem {
                variant_id,
                quantity,
            } => {
                if *quantity == 0 {
                    return Err(ApiError::InvalidRequest(
                        "quantity must be at least 1".to_string(),
                    ));
                }
                ApiRequest::post(format!("{CART_PATH}/items")).json(&serde_json::json!({
                    "variant_id": variant_id,
                    "quantity": quantity,
                }))
            }
            Self::UpdateQuantity { item_id, quantity } => {
                ApiRequest::patch(format!("{CART_PATH}/items/{item_id}"))
                    .json(&serde_json::json!({ "quantity": quantity }))
            }
            Self::RemoveItem { item_id } => {
                Ok(ApiRequest::delete(format!("{CART_PATH}/items/{item_id}")))
            }
            Self::ApplyPromo { code } => {
                let code = code.trim();
                if code.is_empty() {
                    return Err(ApiError::InvalidRequest(
                        "promo code cannot be empty".to_string(),
                    ));
                }
                ApiRequest::post(format!("{CART_PATH}/promo"))
                    .json(&serde_json::json!({ "code": code }))
            }
            Self::RemovePromo { code } => Ok(ApiRequest::delete(format!(
                "{CART_PATH}/promo/{}",
                urlencoding::encode(code.trim())
            ))),
            Self::Clear => Ok(ApiRequest::delete(CART_PATH)),
        }
    }
}

// =============================================================================
// CartClient
// =============================================================================

/// Client for the cart endpoints.
#[derive(Clone)]
pub struct CartClient {
    api: ApiClient,
}

impl CartClient {
    /// Create a cart client on top of the shared API client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetch the current snapshot of a cart.
    ///
    /// # Errors
    ///
    /// Returns an error if the cart does not exist or the request fails.
    #[instrument(skip(self), fields(token = %token))]
    pub async fn get_cart(&self, token: &CartToken) -> Result<Cart, ApiError> {
        let response = self
            .api
            .send::<Cart>(ApiRequest::get(CART_PATH).cart_token(token))
            .await?;
        debug!(version = %response.data.version, "Fetched cart");
        Ok(response.data)
    }

    /// Apply a mutation to a cart.
    ///
    /// `cart` is the token and last-known version; `None` is only accepted
    /// for ops that create a cart. The same `key` must be passed when the
    /// same logical operation is retried.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::VersionConflict`] if `version` is stale, or any
    /// other classified error from the backend.
    #[instrument(skip(self, key), fields(op = op.name(), version = tracing::field::Empty))]
    pub async fn mutate(
        &self,
        cart: Option<(&CartToken, CartVersion)>,
        op: &CartOp,
        key: &IdempotencyKey,
    ) -> Result<Cart, ApiError> {
        let mut request = op.to_request()?.idempotency_key(key);

        match cart {
            Some((token, version)) => {
                tracing::Span::current().record("version", version.as_u64());
                request = request.cart_token(token).if_match(version);
            }
            None if op.creates_cart() => {}
            None => {
                return Err(ApiError::InvalidRequest(format!(
                    "{} requires an existing cart",
                    op.name()
                )));
            }
        }

        let response = self.api.send::<Cart>(request).await?;
        let etag = response.etag_version();
        let mut snapshot = response.data;
        if let Some(version) = etag
            && version > snapshot.version
        {
            snapshot.version = version;
        }

        debug!(version = %snapshot.version, "Cart mutation accepted");
        Ok(snapshot)
    }
}
