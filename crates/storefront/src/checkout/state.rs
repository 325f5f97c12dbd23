//! Checkout state machine.
//!
//! Each state carries exactly the data collected up to that step, so a later
//! selection cannot outlive an earlier one being changed: moving back to
//! `AddressSet` simply has nowhere to keep a shipping choice.

use emporium_core::{CartVersion, CheckoutStep, IdempotencyKey};
use serde::Serialize;

use super::types::{Address, CheckoutSession, PlacedOrder, ShippingSelection};
use crate::shipping::ShippingMethod;

/// Where the order goes and how it can get there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    /// Accepted address.
    pub address: Address,
    /// Methods quoted for the address.
    pub methods: Vec<ShippingMethod>,
}

/// Everything needed to place an order.
///
/// Only built by selecting a payment provider on top of a shipping choice,
/// so holding one proves the order is complete. The idempotency key is fixed
/// when the selection is made and reused by every confirm attempt for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadySelection {
    shipping: ShippingSelection,
    provider: String,
    #[serde(skip)]
    key: IdempotencyKey,
}

impl ReadySelection {
    pub(super) fn new(shipping: ShippingSelection, provider: String) -> Self {
        Self {
            shipping,
            provider,
            key: IdempotencyKey::generate(),
        }
    }

    /// Chosen shipping method.
    #[must_use]
    pub const fn shipping(&self) -> &ShippingSelection {
        &self.shipping
    }

    /// Chosen payment provider code.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub(super) const fn key(&self) -> &IdempotencyKey {
        &self.key
    }
}

/// Checkout state with the data held at each step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CheckoutState {
    /// No session.
    #[default]
    Idle,
    /// Session opened.
    Started {
        /// Backend session.
        session: CheckoutSession,
    },
    /// Address accepted, methods quoted.
    AddressSet {
        /// Backend session.
        session: CheckoutSession,
        /// Address and quoted methods.
        destination: Destination,
    },
    /// Shipping chosen.
    ShippingSet {
        /// Backend session.
        session: CheckoutSession,
        /// Address and quoted methods.
        destination: Destination,
        /// Chosen method.
        shipping: ShippingSelection,
    },
    /// Payment chosen; ready to confirm.
    PaymentSet {
        /// Backend session.
        session: CheckoutSession,
        /// Address and quoted methods.
        destination: Destination,
        /// Shipping and payment choices.
        ready: ReadySelection,
    },
    /// Loyalty points redeemed; ready to confirm.
    LoyaltyApplied {
        /// Backend session.
        session: CheckoutSession,
        /// Address and quoted methods.
        destination: Destination,
        /// Shipping and payment choices.
        ready: ReadySelection,
        /// Points redeemed.
        points: u64,
    },
    /// Order placed.
    Confirmed {
        /// The placed order.
        order: PlacedOrder,
    },
}

impl CheckoutState {
    /// Step this state represents.
    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        match self {
            Self::Idle => CheckoutStep::Idle,
            Self::Started { .. } => CheckoutStep::Started,
            Self::AddressSet { .. } => CheckoutStep::AddressSet,
            Self::ShippingSet { .. } => CheckoutStep::ShippingSet,
            Self::PaymentSet { .. } => CheckoutStep::PaymentSet,
            Self::LoyaltyApplied { .. } => CheckoutStep::LoyaltyApplied,
            Self::Confirmed { .. } => CheckoutStep::Confirmed,
        }
    }

    /// Open backend session, if any.
    #[must_use]
    pub const fn session(&self) -> Option<&CheckoutSession> {
        match self {
            Self::Started { session }
            | Self::AddressSet { session, .. }
            | Self::ShippingSet { session, .. }
            | Self::PaymentSet { session, .. }
            | Self::LoyaltyApplied { session, .. } => Some(session),
            Self::Idle | Self::Confirmed { .. } => None,
        }
    }

    /// Cart version the open session is bound to.
    #[must_use]
    pub fn bound_version(&self) -> Option<CartVersion> {
        self.session().map(|s| s.cart_version)
    }

    /// Accepted address and quoted methods.
    #[must_use]
    pub const fn destination(&self) -> Option<&Destination> {
        match self {
            Self::AddressSet { destination, .. }
            | Self::ShippingSet { destination, .. }
            | Self::PaymentSet { destination, .. }
            | Self::LoyaltyApplied { destination, .. } => Some(destination),
            _ => None,
        }
    }

    pub(super) const fn destination_mut(&mut self) -> Option<&mut Destination> {
        match self {
            Self::AddressSet { destination, .. }
            | Self::ShippingSet { destination, .. }
            | Self::PaymentSet { destination, .. }
            | Self::LoyaltyApplied { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Chosen shipping method.
    #[must_use]
    pub const fn shipping(&self) -> Option<&ShippingSelection> {
        match self {
            Self::ShippingSet { shipping, .. } => Some(shipping),
            Self::PaymentSet { ready, .. } | Self::LoyaltyApplied { ready, .. } => {
                Some(ready.shipping())
            }
            _ => None,
        }
    }

    /// Complete selection, once the order can be placed.
    #[must_use]
    pub const fn ready(&self) -> Option<&ReadySelection> {
        match self {
            Self::PaymentSet { ready, .. } | Self::LoyaltyApplied { ready, .. } => Some(ready),
            _ => None,
        }
    }

    /// Redeemed loyalty points.
    #[must_use]
    pub const fn loyalty_points(&self) -> Option<u64> {
        match self {
            Self::LoyaltyApplied { points, .. } => Some(*points),
            _ => None,
        }
    }

    /// The placed order, once confirmed.
    #[must_use]
    pub const fn order(&self) -> Option<&PlacedOrder> {
        match self {
            Self::Confirmed { order } => Some(order),
            _ => None,
        }
    }

    /// Selections still needed before the order can be placed.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        if self.ready().is_some() {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if self.session().is_none() {
            missing.push("session");
        }
        if self.destination().is_none() {
            missing.push("address");
        }
        if self.shipping().is_none() {
            missing.push("shipping");
        }
        missing.push("payment");
        missing
    }

    /// Same state with a refreshed backend session.
    pub(super) fn with_session(self, session: CheckoutSession) -> Self {
        match self {
            Self::Started { .. } => Self::Started { session },
            Self::AddressSet { destination, .. } => Self::AddressSet {
                session,
                destination,
            },
            Self::ShippingSet {
                destination,
                shipping,
                ..
            } => Self::ShippingSet {
                session,
                destination,
                shipping,
            },
            Self::PaymentSet {
                destination, ready, ..
            } => Self::PaymentSet {
                session,
                destination,
                ready,
            },
            Self::LoyaltyApplied {
                destination,
                ready,
                points,
                ..
            } => Self::LoyaltyApplied {
                session,
                destination,
                ready,
                points,
            },
            other @ (Self::Idle | Self::Confirmed { .. }) => other,
        }
    }
}
