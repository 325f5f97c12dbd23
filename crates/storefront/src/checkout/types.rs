//! Checkout wire types.

use chrono::{DateTime, Utc};
use emporium_core::{CartVersion, CheckoutSessionId, CurrencyCode, Email, OrderId, Phone, QuoteId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::FieldErrors;

/// Country assumed when the shopper does not pick one.
pub const DEFAULT_COUNTRY: &str = "UA";

/// Longest accepted free-text address field.
const MAX_FIELD_LENGTH: usize = 255;

/// Server-side checkout session, returned by every checkout step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Session identity.
    pub id: CheckoutSessionId,
    /// When the backend stops accepting calls for this session.
    pub expires_at: DateTime<Utc>,
    /// Currency of the pricing snapshot.
    #[serde(default)]
    pub currency: CurrencyCode,
    /// Locale the session was opened with.
    #[serde(default)]
    pub locale: Option<String>,
    /// Cart version the session was opened against.
    pub cart_version: CartVersion,
    /// Pricing as of the last step.
    #[serde(default)]
    pub pricing: Pricing,
}

impl CheckoutSession {
    /// Whether the session has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Backend-computed order pricing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    /// Sum of line totals.
    pub subtotal: Decimal,
    /// Shipping cost, once a method is chosen.
    pub shipping: Decimal,
    /// Promotion discount.
    pub discount: Decimal,
    /// Discount from redeemed loyalty points.
    pub loyalty_discount: Decimal,
    /// Amount payable.
    pub total: Decimal,
}

/// Shipping/contact address for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Recipient first name.
    pub first_name: String,
    /// Recipient last name.
    pub last_name: String,
    /// Contact email.
    pub email: Email,
    /// Contact phone.
    pub phone: Phone,
    /// City name.
    pub city: String,
    /// Carrier settlement reference, when delivering via a carrier.
    #[serde(default)]
    pub settlement_ref: Option<String>,
    /// Street address, for courier delivery.
    #[serde(default)]
    pub line1: Option<String>,
    /// Postal code.
    #[serde(default)]
    pub postcode: Option<String>,
    /// ISO country code.
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

impl Address {
    /// Field-level problems the backend would reject anyway.
    ///
    /// Email and phone are validated by their types.
    #[must_use]
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let mut check = |field: &str, value: &str| {
            let value = value.trim();
            if value.is_empty() {
                errors
                    .entry(field.to_string())
                    .or_default()
                    .push(format!("The {} field is required.", field.replace('_', " ")));
            } else if value.chars().count() > MAX_FIELD_LENGTH {
                errors
                    .entry(field.to_string())
                    .or_default()
                    .push(format!("The {} field is too long.", field.replace('_', " ")));
            }
        };

        check("first_name", &self.first_name);
        check("last_name", &self.last_name);
        check("city", &self.city);
        check("country", &self.country);
        errors
    }
}

/// The chosen shipping method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingSelection {
    /// Method code from the quoted list.
    pub method_code: String,
    /// Quote the method was priced under.
    pub quote_id: QuoteId,
    /// Pickup point, for warehouse delivery.
    #[serde(default)]
    pub warehouse_ref: Option<String>,
}

/// An order created by confirming a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// Numeric order id.
    pub order_id: OrderId,
    /// Human-facing order number.
    pub number: String,
    /// How the order is paid.
    pub payment: OrderPayment,
}

/// Payment state of a freshly placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayment {
    /// Provider selected at checkout.
    pub provider: String,
    /// Whether the shopper still has to pay online.
    #[serde(default)]
    pub required: bool,
}
