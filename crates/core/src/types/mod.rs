//! Core types for Emporium.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod contact;
pub mod id;
pub mod price;
pub mod status;
pub mod version;

pub use contact::{ContactError, Email, Phone};
pub use id::*;
pub use price::{CurrencyCode, Money};
pub use status::{CheckoutStep, Transition};
pub use version::{CartVersion, IdempotencyKey};
