//! Checkout session controller.
//!
//! One [`CheckoutController`] drives the checkout of one cart through
//! `Idle -> Started -> AddressSet -> ShippingSet -> PaymentSet
//! [-> LoyaltyApplied] -> Confirmed`. Each step is a backend call; the state
//! only advances when the call succeeds, so a failed request leaves the
//! machine where it was.
//!
//! # Invalidation
//!
//! A session is bound to the cart version it was opened against. The
//! controller listens on the cart event bus and, before every transition,
//! drains pending events: if the bound cart moved to a newer version or was
//! cleared, the session is dropped and the caller gets
//! [`CheckoutError::CartChanged`]. The backend enforces the same rule with
//! the `CART_CHANGED` error code, which resets the machine the same way.
//!
//! # Stale responses
//!
//! Every transition takes a new epoch. A response that arrives after a later
//! transition began (or after an invalidation) is thrown away and reported
//! as [`CheckoutError::Superseded`].

mod state;
mod types;

pub use state::{CheckoutState, Destination, ReadySelection};
pub use types::{
    Address, CheckoutSession, DEFAULT_COUNTRY, OrderPayment, PlacedOrder, Pricing,
    ShippingSelection,
};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use emporium_core::{CheckoutSessionId, CheckoutStep, Transition};
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiClient, ApiError, ApiRequest, FieldErrors};
use crate::cart::{CartEvent, CartStore};
use crate::payments::{PaymentInit, PaymentsClient};
use crate::shipping::{ShippingClient, ShippingMethod};
use crate::store::Store;

const CHECKOUT_PATH: &str = "/api/v1/checkout";

/// Errors from checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The backend call failed.
    #[error(transparent)]
    Api(ApiError),

    /// The operation is not allowed from the current step.
    #[error("Cannot {transition} while checkout is {from}")]
    IllegalTransition {
        /// Step the machine was in.
        from: CheckoutStep,
        /// Attempted transition.
        transition: Transition,
    },

    /// Confirm was attempted before every selection was made.
    #[error("Checkout is missing: {}", .missing.join(", "))]
    NotReady {
        /// Selections still needed.
        missing: Vec<&'static str>,
    },

    /// The cart changed after the session was opened; checkout restarted.
    #[error("Cart changed since checkout started")]
    CartChanged,

    /// The session expired; checkout restarted.
    #[error("Checkout session expired")]
    Expired,

    /// The machine moved on while the request was in flight.
    #[error("Checkout moved on before the request finished")]
    Superseded,

    /// Checkout cannot start from an empty cart.
    #[error("Cart is empty")]
    EmptyCart,

    /// The selected method/quote pair was not offered for this address.
    #[error("Shipping quote is not valid for this address")]
    UnknownQuote,

    /// The selected method delivers to a pickup point and none was chosen.
    #[error("A pickup point is required for {0}")]
    WarehouseRequired(String),

    /// The address failed local checks.
    #[error("Invalid address")]
    InvalidAddress(FieldErrors),

    /// More loyalty points were requested than the cart allows.
    #[error("Cannot redeem {requested} points (at most {max})")]
    LoyaltyLimit {
        /// Points requested.
        requested: u64,
        /// Points redeemable.
        max: u64,
    },
}

impl From<ApiError> for CheckoutError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::CartChanged => Self::CartChanged,
            ApiError::CheckoutExpired => Self::Expired,
            other => Self::Api(other),
        }
    }
}

impl CheckoutError {
    /// Message suitable for showing to a shopper.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(err) => err.user_message(),
            Self::IllegalTransition { .. } | Self::Superseded => {
                "Checkout has changed. Please review it and try again".to_string()
            }
            Self::NotReady { missing } => {
                format!("Please complete checkout first: {}", missing.join(", "))
            }
            Self::CartChanged => ApiError::CartChanged.user_message(),
            Self::Expired => ApiError::CheckoutExpired.user_message(),
            Self::EmptyCart => "Your cart is empty".to_string(),
            Self::UnknownQuote => {
                "That delivery option is no longer available. Please choose again".to_string()
            }
            Self::WarehouseRequired(_) => "Please choose a pickup point".to_string(),
            Self::InvalidAddress(_) => "Please check your address".to_string(),
            Self::LoyaltyLimit { max, .. } => format!("You can redeem at most {max} points"),
        }
    }
}

/// Snapshot of the state taken when a transition begins.
struct Ticket {
    epoch: u64,
    state: CheckoutState,
}

impl Ticket {
    fn session(&self, transition: Transition) -> Result<CheckoutSession, CheckoutError> {
        self.state
            .session()
            .cloned()
            .ok_or(CheckoutError::IllegalTransition {
                from: self.state.step(),
                transition,
            })
    }

    fn destination(&self, transition: Transition) -> Result<Destination, CheckoutError> {
        self.state
            .destination()
            .cloned()
            .ok_or(CheckoutError::IllegalTransition {
                from: self.state.step(),
                transition,
            })
    }

    fn ready(&self, transition: Transition) -> Result<ReadySelection, CheckoutError> {
        self.state
            .ready()
            .cloned()
            .ok_or(CheckoutError::IllegalTransition {
                from: self.state.step(),
                transition,
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn step_path(id: &CheckoutSessionId, step: &str) -> String {
    format!("{CHECKOUT_PATH}/{}/{step}", urlencoding::encode(id.as_str()))
}

/// Drives the checkout of one cart.
pub struct CheckoutController {
    api: ApiClient,
    shipping: ShippingClient,
    payments: PaymentsClient,
    cart: Arc<CartStore>,
    cart_events: Mutex<broadcast::Receiver<CartEvent>>,
    state: Store<CheckoutState>,
    epoch: Mutex<u64>,
}

impl CheckoutController {
    /// Create an idle controller for `cart`, listening on `cart_events`.
    #[must_use]
    pub fn new(
        api: ApiClient,
        cart: Arc<CartStore>,
        cart_events: broadcast::Receiver<CartEvent>,
    ) -> Self {
        Self {
            shipping: ShippingClient::new(api.clone()),
            payments: PaymentsClient::new(api.clone()),
            api,
            cart,
            cart_events: Mutex::new(cart_events),
            state: Store::default(),
            epoch: Mutex::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CheckoutState {
        self.state.get()
    }

    /// Current step.
    #[must_use]
    pub fn step(&self) -> CheckoutStep {
        self.state.with(CheckoutState::step)
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CheckoutState> {
        self.state.subscribe()
    }

    /// The cart being checked out.
    #[must_use]
    pub const fn cart(&self) -> &Arc<CartStore> {
        &self.cart
    }

    /// Drop the session and return to `Idle`.
    pub fn invalidate(&self) {
        let mut epoch = lock(&self.epoch);
        *epoch += 1;
        self.state.set(CheckoutState::Idle);
        debug!(token = %self.cart.token(), "Checkout invalidated");
    }

    /// Open a session from the cart's current snapshot.
    ///
    /// Allowed from any step; a previous session is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::EmptyCart`] for an empty cart, or the
    /// backend error if the session could not be opened. When the backend
    /// reports the cart changed, the cart snapshot is reloaded before the
    /// error is returned.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn start(&self) -> Result<CheckoutState, CheckoutError> {
        let cart = match self.cart.snapshot() {
            Some(cart) => cart,
            None => self.cart.load().await?,
        };
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let ticket = self.begin(Transition::Start)?;
        let request = ApiRequest::post(format!("{CHECKOUT_PATH}/start"))
            .cart_token(&cart.token)
            .if_match(cart.version)
            .json(&json!({ "cart_token": cart.token }))?;

        let session = match self.call(ticket.epoch, request).await {
            Ok(session) => session,
            Err(
                err @ (CheckoutError::CartChanged
                | CheckoutError::Api(ApiError::VersionConflict { .. })),
            ) => {
                // The snapshot is behind the backend; the next start uses the fresh one.
                if let Err(e) = self.cart.load().await {
                    warn!(error = %e, "Cart reload after a stale start failed");
                }
                return Err(err);
            }
            Err(e) => return Err(e),
        };
        info!(
            checkout_id = %session.id,
            cart_version = %session.cart_version,
            "Checkout started"
        );
        self.commit(ticket.epoch, CheckoutState::Started { session })
    }

    /// Re-read the session's pricing and expiry.
    ///
    /// Does not change the step. A no-op while no session is open.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::Expired`] or [`CheckoutError::CartChanged`]
    /// (after resetting to `Idle`), or the backend error.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn refresh(&self) -> Result<CheckoutState, CheckoutError> {
        let (epoch, id) = {
            let epoch = lock(&self.epoch);
            if self.check_cart() {
                drop(epoch);
                self.invalidate();
                return Err(CheckoutError::CartChanged);
            }
            match self.state.with(|s| s.session().map(|s| s.id.clone())) {
                Some(id) => (*epoch, id),
                None => return Ok(self.state.get()),
            }
        };

        let request = ApiRequest::get(format!(
            "{CHECKOUT_PATH}/{}",
            urlencoding::encode(id.as_str())
        ));
        let session = self.call(epoch, request).await?;

        if session.is_expired(Utc::now()) {
            self.reset_if_current(epoch);
            return Err(CheckoutError::Expired);
        }

        let _epoch = lock(&self.epoch);
        self.state.update(|state| {
            if state.session().is_some_and(|s| s.id == session.id) {
                *state = std::mem::take(state).with_session(session);
            }
        });
        Ok(self.state.get())
    }

    /// Submit the shipping address and fetch the methods quoted for it.
    ///
    /// Any shipping, payment, or loyalty selection is dropped.
    ///
    /// If the address is accepted but the method lookup fails, the machine
    /// still moves to `AddressSet` (with no methods) and the lookup error is
    /// returned; [`Self::shipping_methods`] retries the lookup.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::InvalidAddress`] before any network call if
    /// required fields are blank, or the backend error.
    #[instrument(skip(self, address), fields(token = %self.cart.token()))]
    pub async fn set_address(&self, address: Address) -> Result<CheckoutState, CheckoutError> {
        let errors = address.validate();
        if !errors.is_empty() {
            return Err(CheckoutError::InvalidAddress(errors));
        }

        let ticket = self.begin(Transition::SetAddress)?;
        let session = ticket.session(Transition::SetAddress)?;
        let request = ApiRequest::put(step_path(&session.id, "address")).json(&address)?;
        let session = self.call(ticket.epoch, request).await?;

        let (methods, lookup_error) = match self.shipping.methods(&session.id).await {
            Ok(methods) => (methods, None),
            Err(e) => {
                warn!(error = %e, "Shipping method lookup failed");
                (Vec::new(), Some(e))
            }
        };
        debug!(methods = methods.len(), "Address accepted");

        let state = self.commit(
            ticket.epoch,
            CheckoutState::AddressSet {
                session,
                destination: Destination { address, methods },
            },
        )?;
        match lookup_error {
            Some(e) => Err(self.fail(ticket.epoch, e)),
            None => Ok(state),
        }
    }

    /// Methods quoted for the current address.
    ///
    /// Served from the last address step; fetched again only when that
    /// lookup came back empty.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotReady`] before an address is set, or the
    /// backend error from a repeated lookup.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn shipping_methods(&self) -> Result<Vec<ShippingMethod>, CheckoutError> {
        let (session_id, methods) = self
            .state
            .with(|s| {
                s.session()
                    .zip(s.destination())
                    .map(|(session, dest)| (session.id.clone(), dest.methods.clone()))
            })
            .ok_or_else(|| CheckoutError::NotReady {
                missing: vec!["address"],
            })?;
        if !methods.is_empty() {
            return Ok(methods);
        }

        let methods = self.shipping.methods(&session_id).await?;
        let _epoch = lock(&self.epoch);
        self.state.update(|state| {
            let same_session = state.session().is_some_and(|s| s.id == session_id);
            if same_session && let Some(destination) = state.destination_mut() {
                destination.methods.clone_from(&methods);
            }
        });
        Ok(methods)
    }

    /// Select a quoted shipping method.
    ///
    /// Any payment or loyalty selection is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::UnknownQuote`] if the method/quote pair was
    /// not offered, [`CheckoutError::WarehouseRequired`] if a pickup point is
    /// missing, or the backend error.
    #[instrument(
        skip(self, selection),
        fields(token = %self.cart.token(), method = %selection.method_code)
    )]
    pub async fn set_shipping(
        &self,
        selection: ShippingSelection,
    ) -> Result<CheckoutState, CheckoutError> {
        let ticket = self.begin(Transition::SetShipping)?;
        let session = ticket.session(Transition::SetShipping)?;
        let destination = ticket.destination(Transition::SetShipping)?;

        let method = destination
            .methods
            .iter()
            .find(|m| m.code == selection.method_code && m.quote_id == selection.quote_id)
            .ok_or(CheckoutError::UnknownQuote)?;
        let has_warehouse = selection
            .warehouse_ref
            .as_deref()
            .is_some_and(|w| !w.trim().is_empty());
        if method.requires_warehouse && !has_warehouse {
            return Err(CheckoutError::WarehouseRequired(method.name.clone()));
        }

        let request =
            ApiRequest::put(step_path(&session.id, "shipping-method")).json(&selection)?;
        let session = self.call(ticket.epoch, request).await?;

        self.commit(
            ticket.epoch,
            CheckoutState::ShippingSet {
                session,
                destination,
                shipping: selection,
            },
        )
    }

    /// Select a payment provider.
    ///
    /// A loyalty redemption is released on the backend first, since the
    /// points are tied to the previous provider. If that release fails the
    /// machine stays in `LoyaltyApplied`.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the provider is rejected.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn set_payment(&self, provider: &str) -> Result<CheckoutState, CheckoutError> {
        let provider = provider.trim();
        if provider.is_empty() {
            return Err(ApiError::InvalidRequest("payment provider is required".to_string()).into());
        }

        let ticket = self.begin(Transition::SetPayment)?;
        let session = ticket.session(Transition::SetPayment)?;
        let destination = ticket.destination(Transition::SetPayment)?;
        let shipping = ticket
            .state
            .shipping()
            .cloned()
            .ok_or(CheckoutError::IllegalTransition {
                from: ticket.state.step(),
                transition: Transition::SetPayment,
            })?;

        if let Some(points) = ticket.state.loyalty_points() {
            debug!(points, "Releasing loyalty points before payment change");
            self.call(ticket.epoch, ApiRequest::delete(step_path(&session.id, "loyalty")))
                .await?;
        }

        let request = ApiRequest::put(step_path(&session.id, "payment-provider"))
            .json(&json!({ "provider": provider }))?;
        let session = self.call(ticket.epoch, request).await?;

        self.commit(
            ticket.epoch,
            CheckoutState::PaymentSet {
                session,
                destination,
                ready: ReadySelection::new(shipping, provider.to_string()),
            },
        )
    }

    /// Redeem loyalty points against the order.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::LoyaltyLimit`] when `points` exceeds what the
    /// cart allows, or the backend error.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn apply_loyalty(&self, points: u64) -> Result<CheckoutState, CheckoutError> {
        if points == 0 {
            return Err(ApiError::InvalidRequest("points must be positive".to_string()).into());
        }
        if let Some(max) = self
            .cart
            .snapshot()
            .and_then(|cart| cart.loyalty)
            .map(|loyalty| loyalty.max_redeemable_points)
            && points > max
        {
            return Err(CheckoutError::LoyaltyLimit {
                requested: points,
                max,
            });
        }

        let ticket = self.begin(Transition::ApplyLoyalty)?;
        let session = ticket.session(Transition::ApplyLoyalty)?;
        let destination = ticket.destination(Transition::ApplyLoyalty)?;
        let ready = ticket.ready(Transition::ApplyLoyalty)?;

        let request =
            ApiRequest::post(step_path(&session.id, "loyalty")).json(&json!({ "points": points }))?;
        let session = self.call(ticket.epoch, request).await?;

        self.commit(
            ticket.epoch,
            CheckoutState::LoyaltyApplied {
                session,
                destination,
                ready,
                points,
            },
        )
    }

    /// Undo a loyalty redemption.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn remove_loyalty(&self) -> Result<CheckoutState, CheckoutError> {
        let ticket = self.begin(Transition::RemoveLoyalty)?;
        let session = ticket.session(Transition::RemoveLoyalty)?;
        let destination = ticket.destination(Transition::RemoveLoyalty)?;
        let ready = ticket.ready(Transition::RemoveLoyalty)?;

        let request = ApiRequest::delete(step_path(&session.id, "loyalty"));
        let session = self.call(ticket.epoch, request).await?;

        self.commit(
            ticket.epoch,
            CheckoutState::PaymentSet {
                session,
                destination,
                ready,
            },
        )
    }

    /// Place the order.
    ///
    /// Nothing is sent unless address, shipping, and payment are all set.
    /// Retrying after a failure reuses the idempotency key of the selection,
    /// so the backend places at most one order per selection. On success the
    /// local cart is forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotReady`] listing what is missing, or the
    /// backend error.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn confirm(&self) -> Result<PlacedOrder, CheckoutError> {
        let ticket = match self.begin(Transition::Confirm) {
            Err(CheckoutError::IllegalTransition { from, .. }) if !from.is_terminal() => {
                return Err(CheckoutError::NotReady {
                    missing: self.state.with(CheckoutState::missing),
                });
            }
            other => other?,
        };
        let session = ticket.session(Transition::Confirm)?;
        let ready = ticket.ready(Transition::Confirm)?;

        let request = ApiRequest::post(step_path(&session.id, "confirm"))
            .cart_token(self.cart.token())
            .idempotency_key(ready.key())
            .json(&json!({ "provider": ready.provider() }))?;

        let order = match self.api.send::<PlacedOrder>(request).await {
            Ok(response) => response.data,
            Err(e) => return Err(self.fail(ticket.epoch, e)),
        };
        info!(
            order_id = %order.order_id,
            number = %order.number,
            "Order placed"
        );

        // The backend consumed the cart whether or not this result is kept.
        self.cart.forget();
        self.commit(
            ticket.epoch,
            CheckoutState::Confirmed {
                order: order.clone(),
            },
        )?;
        Ok(order)
    }

    /// Initialise online payment for the placed order.
    ///
    /// Returns `None` when the order needs no online payment (cash on
    /// delivery).
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::NotReady`] before an order is placed, or the
    /// backend error.
    #[instrument(skip(self), fields(token = %self.cart.token()))]
    pub async fn init_payment(&self) -> Result<Option<PaymentInit>, CheckoutError> {
        let order = self
            .state
            .with(|s| s.order().cloned())
            .ok_or_else(|| CheckoutError::NotReady {
                missing: vec!["order"],
            })?;
        if !order.payment.required {
            return Ok(None);
        }

        let init = self
            .payments
            .init(order.order_id, &order.payment.provider)
            .await?;
        Ok(Some(init))
    }

    /// Check preconditions for `transition` and take a new epoch.
    fn begin(&self, transition: Transition) -> Result<Ticket, CheckoutError> {
        let mut epoch = lock(&self.epoch);

        if self.check_cart() {
            *epoch += 1;
            self.state.set(CheckoutState::Idle);
            info!(token = %self.cart.token(), "Cart changed, checkout reset");
            if transition != Transition::Start {
                return Err(CheckoutError::CartChanged);
            }
        }

        let state = self.state.get();
        if transition != Transition::Start
            && let Some(session) = state.session()
            && session.is_expired(Utc::now())
        {
            *epoch += 1;
            self.state.set(CheckoutState::Idle);
            info!(checkout_id = %session.id, "Checkout session expired");
            return Err(CheckoutError::Expired);
        }

        let from = state.step();
        if !from.accepts(transition) {
            return Err(CheckoutError::IllegalTransition { from, transition });
        }

        *epoch += 1;
        debug!(%from, %transition, epoch = *epoch, "Checkout transition");
        Ok(Ticket {
            epoch: *epoch,
            state,
        })
    }

    /// Drain pending cart events; true if the bound cart moved on.
    fn check_cart(&self) -> bool {
        let bound = self.state.with(CheckoutState::bound_version);
        let mut events = lock(&self.cart_events);
        let mut moved = false;

        loop {
            match events.try_recv() {
                Ok(CartEvent::Changed { token, version }) if &token == self.cart.token() => {
                    moved |= bound.is_some_and(|bound| version > bound);
                }
                Ok(CartEvent::Cleared { token }) if &token == self.cart.token() => {
                    moved |= bound.is_some();
                }
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cart events lagged, comparing versions");
                    if let Some(bound) = bound {
                        moved |= self.cart.version() != Some(bound);
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        moved
    }

    /// Send a step request returning the session.
    async fn call(&self, epoch: u64, request: ApiRequest) -> Result<CheckoutSession, CheckoutError> {
        match self.api.send::<CheckoutSession>(request).await {
            Ok(response) => Ok(response.data),
            Err(e) => Err(self.fail(epoch, e)),
        }
    }

    /// Store `next` if no other transition began since `epoch`.
    fn commit(&self, epoch: u64, next: CheckoutState) -> Result<CheckoutState, CheckoutError> {
        let current = lock(&self.epoch);
        if *current != epoch {
            debug!(epoch, current = *current, "Discarding superseded checkout result");
            return Err(CheckoutError::Superseded);
        }
        self.state.set(next.clone());
        Ok(next)
    }

    /// Map a failed call, resetting to `Idle` if the session is gone.
    fn fail(&self, epoch: u64, err: ApiError) -> CheckoutError {
        if *lock(&self.epoch) != epoch {
            return CheckoutError::Superseded;
        }
        if err.ends_checkout() {
            info!(error = %err, "Checkout session ended by backend");
            self.reset_if_current(epoch);
        }
        err.into()
    }

    fn reset_if_current(&self, epoch: u64) {
        let mut current = lock(&self.epoch);
        if *current == epoch {
            *current += 1;
            self.state.set(CheckoutState::Idle);
        }
    }
}
