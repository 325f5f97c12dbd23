//! Checkout route handlers.
//!
//! Each handler drives the session cart's [`CheckoutController`] one step
//! and answers with the resulting [`CheckoutView`]. Errors from the
//! controller (illegal step, cart changed, session expired) are turned into
//! JSON error bodies by [`AppError`].

use std::sync::Arc;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use emporium_core::{CheckoutSessionId, CheckoutStep, CurrencyCode, Money, QuoteId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use super::cart::require_cart;
use crate::checkout::{
    Address, CheckoutController, CheckoutError, CheckoutState, PlacedOrder, ShippingSelection,
};
use crate::error::{Result, add_breadcrumb};
use crate::middleware::RequestId;
use crate::models::session;
use crate::payments::PaymentProvider;
use crate::shipping::ShippingMethod;
use crate::state::AppState;

/// Pricing display data.
#[derive(Debug, Clone, Serialize)]
pub struct PricingView {
    pub subtotal: String,
    pub shipping: String,
    pub discount: Option<String>,
    pub loyalty_discount: Option<String>,
    pub total: String,
}

/// Shipping method display data.
#[derive(Debug, Clone, Serialize)]
pub struct ShippingMethodView {
    pub code: String,
    pub name: String,
    pub price: String,
    pub quote_id: QuoteId,
    pub eta_days: Option<u32>,
    pub requires_warehouse: bool,
    pub selected: bool,
}

impl ShippingMethodView {
    fn new(method: &ShippingMethod, currency: CurrencyCode, selected: bool) -> Self {
        Self {
            code: method.code.clone(),
            name: method.name.clone(),
            price: Money::new(method.price, currency).display(),
            quote_id: method.quote_id.clone(),
            eta_days: method.eta_days,
            requires_warehouse: method.requires_warehouse,
            selected,
        }
    }
}

/// Checkout page data.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutView {
    pub step: CheckoutStep,
    pub session_id: Option<CheckoutSessionId>,
    pub expires_at: Option<DateTime<Utc>>,
    pub pricing: Option<PricingView>,
    pub address: Option<Address>,
    pub shipping_methods: Vec<ShippingMethodView>,
    pub shipping: Option<ShippingSelection>,
    pub payment_provider: Option<String>,
    pub loyalty_points: Option<u64>,
    pub missing: Vec<&'static str>,
    pub can_confirm: bool,
    pub order: Option<PlacedOrder>,
    pub notice: Option<String>,
}

impl From<&CheckoutState> for CheckoutView {
    fn from(state: &CheckoutState) -> Self {
        let session = state.session();
        let currency = session.map(|s| s.currency).unwrap_or_default();
        let money = |amount: Decimal| Money::new(amount, currency).display();
        let nonzero = |amount: Decimal| (!amount.is_zero()).then(|| money(amount));
        let shipping = state.shipping();

        Self {
            step: state.step(),
            session_id: session.map(|s| s.id.clone()),
            expires_at: session.map(|s| s.expires_at),
            pricing: session.map(|s| PricingView {
                subtotal: money(s.pricing.subtotal),
                shipping: money(s.pricing.shipping),
                discount: nonzero(s.pricing.discount),
                loyalty_discount: nonzero(s.pricing.loyalty_discount),
                total: money(s.pricing.total),
            }),
            address: state.destination().map(|d| d.address.clone()),
            shipping_methods: state
                .destination()
                .map(|d| {
                    d.methods
                        .iter()
                        .map(|m| {
                            let selected = shipping.is_some_and(|s| {
                                s.method_code == m.code && s.quote_id == m.quote_id
                            });
                            ShippingMethodView::new(m, currency, selected)
                        })
                        .collect()
                })
                .unwrap_or_default(),
            shipping: shipping.cloned(),
            payment_provider: state.ready().map(|r| r.provider().to_string()),
            loyalty_points: state.loyalty_points(),
            missing: if state.step().is_terminal() {
                Vec::new()
            } else {
                state.missing()
            },
            can_confirm: state.step().is_ready_to_confirm(),
            order: state.order().cloned(),
            notice: None,
        }
    }
}

/// Order confirmation data.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationView {
    pub order: PlacedOrder,
    pub payment_url: Option<String>,
    pub notice: Option<String>,
}

/// Payment provider choice.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub provider: String,
}

/// Loyalty redemption request.
#[derive(Debug, Deserialize)]
pub struct LoyaltyRequest {
    pub points: u64,
}

async fn controller(state: &AppState, session: &Session) -> Result<Arc<CheckoutController>> {
    let cart = require_cart(state, session).await?;
    Ok(state.checkout(cart).await)
}

fn view(state: &CheckoutState) -> Json<CheckoutView> {
    Json(CheckoutView::from(state))
}

/// Show the checkout, refreshing pricing when a session is open.
///
/// A session that expired or lost its cart is reported in `notice` rather
/// than as an error; the view then shows the reset checkout.
#[instrument(skip(state, session))]
pub async fn show(State(state): State<AppState>, session: Session) -> Result<Json<CheckoutView>> {
    let checkout = controller(&state, &session).await?;
    let notice = match checkout.refresh().await {
        Ok(_) => None,
        Err(
            e @ (CheckoutError::Expired | CheckoutError::CartChanged | CheckoutError::Superseded),
        ) => Some(e.user_message()),
        Err(e) => return Err(e.into()),
    };

    let mut view = CheckoutView::from(&checkout.state());
    view.notice = notice;
    Ok(Json(view))
}

/// Open a checkout session from the cart.
#[instrument(skip(state, session))]
pub async fn start(State(state): State<AppState>, session: Session) -> Result<Json<CheckoutView>> {
    add_breadcrumb("checkout", "Start checkout", None);
    let checkout = controller(&state, &session).await?;
    Ok(view(&checkout.start().await?))
}

/// Submit the shipping address.
#[instrument(skip(state, session, address))]
pub async fn set_address(
    State(state): State<AppState>,
    session: Session,
    Json(address): Json<Address>,
) -> Result<Json<CheckoutView>> {
    let checkout = controller(&state, &session).await?;
    Ok(view(&checkout.set_address(address).await?))
}

/// Methods quoted for the current address.
#[instrument(skip(state, session))]
pub async fn shipping_methods(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<ShippingMethod>>> {
    let checkout = controller(&state, &session).await?;
    Ok(Json(checkout.shipping_methods().await?))
}

/// Select a quoted shipping method.
#[instrument(skip(state, session))]
pub async fn set_shipping(
    State(state): State<AppState>,
    session: Session,
    Json(selection): Json<ShippingSelection>,
) -> Result<Json<CheckoutView>> {
    let checkout = controller(&state, &session).await?;
    Ok(view(&checkout.set_shipping(selection).await?))
}

/// Payment providers available for the open session.
#[instrument(skip(state, session))]
pub async fn payment_providers(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<PaymentProvider>>> {
    let checkout = controller(&state, &session).await?;
    let session_id = checkout.state().session().map(|s| s.id.clone());
    Ok(Json(state.payments().providers(session_id.as_ref()).await?))
}

/// Select a payment provider.
#[instrument(skip(state, session))]
pub async fn set_payment(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<CheckoutView>> {
    let checkout = controller(&state, &session).await?;
    Ok(view(&checkout.set_payment(&request.provider).await?))
}

/// Redeem loyalty points.
#[instrument(skip(state, session))]
pub async fn apply_loyalty(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoyaltyRequest>,
) -> Result<Json<CheckoutView>> {
    let checkout = controller(&state, &session).await?;
    Ok(view(&checkout.apply_loyalty(request.points).await?))
}

/// Undo a loyalty redemption.
#[instrument(skip(state, session))]
pub async fn remove_loyalty(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<CheckoutView>> {
    let checkout = controller(&state, &session).await?;
    Ok(view(&checkout.remove_loyalty().await?))
}

/// Place the order and start online payment if the provider needs it.
///
/// The cart token is removed from the session once the order exists. A
/// failure to start online payment does not undo the order; it is reported
/// in `notice` so the shopper can pay later.
#[instrument(skip(state, session, request_id))]
pub async fn confirm(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    session: Session,
) -> Result<Json<ConfirmationView>> {
    add_breadcrumb("checkout", "Confirm order", None);
    let checkout = controller(&state, &session).await?;
    let order = checkout.confirm().await?;
    info!(
        request_id = %request_id,
        order_id = %order.order_id,
        number = %order.number,
        "Order confirmed"
    );

    session::clear_cart_token(&session).await?;
    state.forget_checkout(checkout.cart().token()).await;

    let (payment_url, notice) = match checkout.init_payment().await {
        Ok(init) => (init.and_then(|i| i.redirect_url), None),
        Err(e) => {
            warn!(order_id = %order.order_id, error = %e, "Payment initialisation failed");
            (
                None,
                Some("Your order is placed. We could not start the payment; please try again from your order page".to_string()),
            )
        }
    };

    Ok(Json(ConfirmationView {
        order,
        payment_url,
        notice,
    }))
}
