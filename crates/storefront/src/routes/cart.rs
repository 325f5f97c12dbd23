//! Cart route handlers.
//!
//! The cart token lives in the shopper's session; the first add-to-cart
//! creates the cart on the backend and stores its token. Every mutation goes
//! through the cart's [`CartStore`], which serialises it against other
//! mutations of the same cart and attaches the last-known version.
//!
//! Quantity changes abort on a version conflict (the shopper picked a number
//! against a cart that has since changed and should see the new one); adds,
//! removals, and promo codes are retried once against the fresh version.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use emporium_core::{CartItemId, CartVersion, CurrencyCode, Money, VariantId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{info, instrument};

use crate::api::ApiError;
use crate::cart::{Cart, CartItem, CartOp, CartStore, ConflictPolicy};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::models::session;
use crate::state::AppState;

/// Cart line display data.
#[derive(Debug, Clone, Serialize)]
pub struct CartItemView {
    pub id: CartItemId,
    pub variant_id: VariantId,
    pub name: String,
    pub sku: Option<String>,
    pub quantity: u32,
    pub unit_price: String,
    pub original_price: Option<String>,
    pub line_total: String,
    pub image_url: Option<String>,
}

impl CartItemView {
    fn new(item: &CartItem, currency: CurrencyCode) -> Self {
        Self {
            id: item.id,
            variant_id: item.variant_id,
            name: item.name.clone(),
            sku: item.sku.clone(),
            quantity: item.quantity,
            unit_price: Money::new(item.unit_price, currency).display(),
            original_price: item
                .original_price
                .filter(|p| *p > item.unit_price)
                .map(|p| Money::new(p, currency).display()),
            line_total: Money::new(item.line_total, currency).display(),
            image_url: item.image_url.clone(),
        }
    }
}

/// Applied promotion display data.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionView {
    pub code: Option<String>,
    pub name: String,
    pub discount: String,
}

/// Loyalty figures display data.
#[derive(Debug, Clone, Serialize)]
pub struct LoyaltyView {
    pub points_balance: u64,
    pub max_redeemable_points: u64,
    pub max_discount: String,
}

/// Cart display data.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub version: Option<CartVersion>,
    pub items: Vec<CartItemView>,
    pub item_count: u32,
    pub promotions: Vec<PromotionView>,
    pub loyalty: Option<LoyaltyView>,
    pub subtotal: String,
    pub discount: Option<String>,
    pub total: String,
}

impl CartView {
    /// An empty cart, before the first add-to-cart.
    #[must_use]
    pub fn empty(currency: CurrencyCode) -> Self {
        let zero = Money::zero(currency).display();
        Self {
            version: None,
            items: Vec::new(),
            item_count: 0,
            promotions: Vec::new(),
            loyalty: None,
            subtotal: zero.clone(),
            discount: None,
            total: zero,
        }
    }
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        let money = |amount: Decimal| Money::new(amount, cart.currency).display();
        Self {
            version: Some(cart.version),
            items: cart
                .items
                .iter()
                .map(|item| CartItemView::new(item, cart.currency))
                .collect(),
            item_count: cart.item_count(),
            promotions: cart
                .promotions
                .iter()
                .map(|p| PromotionView {
                    code: p.code.clone(),
                    name: p.name.clone(),
                    discount: money(p.discount),
                })
                .collect(),
            loyalty: cart.loyalty.as_ref().map(|l| LoyaltyView {
                points_balance: l.points_balance,
                max_redeemable_points: l.max_redeemable_points,
                max_discount: money(Decimal::from(l.max_redeemable_points) * l.point_value),
            }),
            subtotal: money(cart.totals.subtotal),
            discount: (!cart.totals.discount.is_zero()).then(|| money(cart.totals.discount)),
            total: money(cart.totals.total),
        }
    }
}

/// Add to cart request.
#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub variant_id: VariantId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

const fn default_quantity() -> u32 {
    1
}

/// Quantity change request.
#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

/// Promo code request.
#[derive(Debug, Deserialize)]
pub struct PromoRequest {
    pub code: String,
}

/// Cart store for the session's cart, if it has one.
pub(crate) async fn session_cart(
    state: &AppState,
    session: &Session,
) -> Result<Option<Arc<CartStore>>> {
    match session::cart_token(session).await? {
        Some(token) => Ok(Some(state.carts().open(&token).await)),
        None => Ok(None),
    }
}

/// Cart store for the session's cart, or 404.
pub(crate) async fn require_cart(state: &AppState, session: &Session) -> Result<Arc<CartStore>> {
    session_cart(state, session)
        .await?
        .ok_or_else(|| AppError::NotFound("cart".to_string()))
}

/// Drop a cart the backend no longer knows.
async fn forget_cart(state: &AppState, session: &Session, store: &CartStore) -> Result<()> {
    info!(token = %store.token(), "Cart no longer exists, clearing session");
    state.forget_checkout(store.token()).await;
    session::clear_cart_token(session).await?;
    Ok(())
}

/// Apply `op` to the session's cart.
async fn mutate(
    state: &AppState,
    session: &Session,
    op: CartOp,
    policy: ConflictPolicy,
) -> Result<Json<CartView>> {
    let store = require_cart(state, session).await?;
    match store.mutate(op, policy).await {
        Ok(cart) => Ok(Json(CartView::from(&cart))),
        Err(ApiError::NotFound(what)) => {
            forget_cart(state, session, &store).await?;
            Err(AppError::NotFound(what))
        }
        Err(e) => Err(e.into()),
    }
}

/// Show the cart.
///
/// Always read from the backend, so edits made from another device show up
/// and the stored snapshot catches up with them.
#[instrument(skip(state, session))]
pub async fn show(State(state): State<AppState>, session: Session) -> Result<Json<CartView>> {
    let empty = || Json(CartView::empty(state.config().backend.currency));
    let Some(store) = session_cart(&state, &session).await? else {
        return Ok(empty());
    };

    let cart = match store.load().await {
        Ok(cart) => cart,
        Err(ApiError::NotFound(_)) => {
            forget_cart(&state, &session, &store).await?;
            return Ok(empty());
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(CartView::from(&cart)))
}

/// Add an item, creating the cart on first use.
#[instrument(skip(state, session))]
pub async fn add_item(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<CartView>> {
    let op = CartOp::AddItem {
        variant_id: request.variant_id,
        quantity: request.quantity,
    };
    let variant = request.variant_id.to_string();
    add_breadcrumb("cart", "Add item", Some(&[("variant_id", variant.as_str())]));

    if let Some(store) = session_cart(&state, &session).await? {
        match store.mutate(op.clone(), ConflictPolicy::RetryOnce).await {
            Ok(cart) => return Ok(Json(CartView::from(&cart))),
            Err(ApiError::NotFound(_)) => forget_cart(&state, &session, &store).await?,
            Err(e) => return Err(e.into()),
        }
    }

    let store = state.carts().create(op).await?;
    session::set_cart_token(&session, store.token()).await?;
    let cart = store
        .snapshot()
        .ok_or_else(|| AppError::Internal("created cart has no snapshot".to_string()))?;
    Ok(Json(CartView::from(&cart)))
}

/// Change a line's quantity. Zero removes the line.
#[instrument(skip(state, session))]
pub async fn update_item(
    State(state): State<AppState>,
    session: Session,
    Path(item_id): Path<CartItemId>,
    Json(request): Json<UpdateQuantityRequest>,
) -> Result<Json<CartView>> {
    let op = CartOp::UpdateQuantity {
        item_id,
        quantity: request.quantity,
    };
    mutate(&state, &session, op, ConflictPolicy::Abort).await
}

/// Remove a line.
#[instrument(skip(state, session))]
pub async fn remove_item(
    State(state): State<AppState>,
    session: Session,
    Path(item_id): Path<CartItemId>,
) -> Result<Json<CartView>> {
    mutate(
        &state,
        &session,
        CartOp::RemoveItem { item_id },
        ConflictPolicy::RetryOnce,
    )
    .await
}

/// Apply a promo code.
#[instrument(skip(state, session, request))]
pub async fn apply_promo(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<PromoRequest>,
) -> Result<Json<CartView>> {
    let op = CartOp::ApplyPromo {
        code: request.code.trim().to_string(),
    };
    mutate(&state, &session, op, ConflictPolicy::RetryOnce).await
}

/// Remove a promo code.
#[instrument(skip(state, session))]
pub async fn remove_promo(
    State(state): State<AppState>,
    session: Session,
    Path(code): Path<String>,
) -> Result<Json<CartView>> {
    mutate(
        &state,
        &session,
        CartOp::RemovePromo { code },
        ConflictPolicy::RetryOnce,
    )
    .await
}
