//! Checkout progress steps.

use serde::{Deserialize, Serialize};

/// Step of the checkout state machine.
///
/// Steps are ordered: each one requires every step before it (loyalty is the
/// only optional step, between payment and confirmation).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    /// No checkout session.
    #[default]
    Idle,
    /// Session started from a cart.
    Started,
    /// Shipping address accepted.
    AddressSet,
    /// Shipping method selected from a quote.
    ShippingSet,
    /// Payment provider selected.
    PaymentSet,
    /// Loyalty points redeemed against the order.
    LoyaltyApplied,
    /// Order placed; terminal.
    Confirmed,
}

impl CheckoutStep {
    /// Whether an order can be placed from this step.
    #[must_use]
    pub const fn is_ready_to_confirm(self) -> bool {
        matches!(self, Self::PaymentSet | Self::LoyaltyApplied)
    }

    /// Whether `transition` may be attempted from this step.
    ///
    /// Starting over is always allowed. Every other transition needs the
    /// steps before it; re-running an earlier step from a later one is
    /// allowed and moves the machine back.
    #[must_use]
    pub const fn accepts(self, transition: Transition) -> bool {
        match transition {
            Transition::Start => true,
            Transition::SetAddress => !matches!(self, Self::Idle | Self::Confirmed),
            Transition::SetShipping => matches!(
                self,
                Self::AddressSet | Self::ShippingSet | Self::PaymentSet | Self::LoyaltyApplied
            ),
            Transition::SetPayment => matches!(
                self,
                Self::ShippingSet | Self::PaymentSet | Self::LoyaltyApplied
            ),
            Transition::ApplyLoyalty | Transition::Confirm => self.is_ready_to_confirm(),
            Transition::RemoveLoyalty => matches!(self, Self::LoyaltyApplied),
        }
    }

    /// Whether this step is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed)
    }

    /// Stable string form used in logs and view models.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Started => "started",
            Self::AddressSet => "address_set",
            Self::ShippingSet => "shipping_set",
            Self::PaymentSet => "payment_set",
            Self::LoyaltyApplied => "loyalty_applied",
            Self::Confirmed => "confirmed",
        }
    }
}

impl std::fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckoutStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "started" => Ok(Self::Started),
            "address_set" => Ok(Self::AddressSet),
            "shipping_set" => Ok(Self::ShippingSet),
            "payment_set" => Ok(Self::PaymentSet),
            "loyalty_applied" => Ok(Self::LoyaltyApplied),
            "confirmed" => Ok(Self::Confirmed),
            _ => Err(format!("invalid checkout step: {s}")),
        }
    }
}

/// An action that moves the checkout machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Open a session from the cart.
    Start,
    /// Submit the shipping address.
    SetAddress,
    /// Pick a quoted shipping method.
    SetShipping,
    /// Pick a payment provider.
    SetPayment,
    /// Redeem loyalty points.
    ApplyLoyalty,
    /// Undo a loyalty redemption.
    RemoveLoyalty,
    /// Place the order.
    Confirm,
}

impl Transition {
    /// Step the machine is in after this transition succeeds.
    #[must_use]
    pub const fn target(self) -> CheckoutStep {
        match self {
            Self::Start => CheckoutStep::Started,
            Self::SetAddress => CheckoutStep::AddressSet,
            Self::SetShipping => CheckoutStep::ShippingSet,
            Self::SetPayment | Self::RemoveLoyalty => CheckoutStep::PaymentSet,
            Self::ApplyLoyalty => CheckoutStep::LoyaltyApplied,
            Self::Confirm => CheckoutStep::Confirmed,
        }
    }

    /// Stable string form used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::SetAddress => "set_address",
            Self::SetShipping => "set_shipping",
            Self::SetPayment => "set_payment",
            Self::ApplyLoyalty => "apply_loyalty",
            Self::RemoveLoyalty => "remove_loyalty",
            Self::Confirm => "confirm",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_ordered() {
        assert!(CheckoutStep::Idle < CheckoutStep::Started);
        assert!(CheckoutStep::ShippingSet < CheckoutStep::PaymentSet);
        assert!(CheckoutStep::LoyaltyApplied < CheckoutStep::Confirmed);
    }

    #[test]
    fn test_ready_to_confirm() {
        assert!(!CheckoutStep::ShippingSet.is_ready_to_confirm());
        assert!(CheckoutStep::PaymentSet.is_ready_to_confirm());
        assert!(CheckoutStep::LoyaltyApplied.is_ready_to_confirm());
        assert!(!CheckoutStep::Confirmed.is_ready_to_confirm());
    }

    #[test]
    fn test_start_always_accepted() {
        assert!(CheckoutStep::Idle.accepts(Transition::Start));
        assert!(CheckoutStep::PaymentSet.accepts(Transition::Start));
        assert!(CheckoutStep::Confirmed.accepts(Transition::Start));
    }

    #[test]
    fn test_steps_cannot_be_skipped() {
        assert!(!CheckoutStep::Idle.accepts(Transition::SetAddress));
        assert!(!CheckoutStep::Started.accepts(Transition::SetShipping));
        assert!(!CheckoutStep::AddressSet.accepts(Transition::SetPayment));
        assert!(!CheckoutStep::ShippingSet.accepts(Transition::Confirm));
        assert!(!CheckoutStep::ShippingSet.accepts(Transition::ApplyLoyalty));
        assert!(!CheckoutStep::PaymentSet.accepts(Transition::RemoveLoyalty));
    }

    #[test]
    fn test_earlier_steps_can_be_revisited() {
        assert!(CheckoutStep::PaymentSet.accepts(Transition::SetAddress));
        assert!(CheckoutStep::LoyaltyApplied.accepts(Transition::SetShipping));
        assert!(CheckoutStep::LoyaltyApplied.accepts(Transition::SetPayment));
        assert_eq!(Transition::SetAddress.target(), CheckoutStep::AddressSet);
    }

    #[test]
    fn test_confirmed_only_restarts() {
        for transition in [
            Transition::SetAddress,
            Transition::SetShipping,
            Transition::SetPayment,
            Transition::ApplyLoyalty,
            Transition::RemoveLoyalty,
            Transition::Confirm,
        ] {
            assert!(!CheckoutStep::Confirmed.accepts(transition), "{transition}");
        }
    }

    #[test]
    fn test_string_roundtrip() {
        for step in [
            CheckoutStep::Idle,
            CheckoutStep::Started,
            CheckoutStep::AddressSet,
            CheckoutStep::ShippingSet,
            CheckoutStep::PaymentSet,
            CheckoutStep::LoyaltyApplied,
            CheckoutStep::Confirmed,
        ] {
            assert_eq!(step.to_string().parse::<CheckoutStep>().unwrap(), step);
        }
        assert!("shipping".parse::<CheckoutStep>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&CheckoutStep::AddressSet).unwrap();
        assert_eq!(json, "\"address_set\"");
    }
}
