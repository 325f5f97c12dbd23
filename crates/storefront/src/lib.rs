//! Emporium storefront library.
//!
//! The storefront sits between the browser and the backend REST API. It
//! owns the shopper's session, mirrors backend cart and checkout responses
//! into typed state, keeps catalog filters in sync with the page URL, and
//! answers page requests with JSON view models.
//!
//! The binary in `main.rs` wires this library into an HTTP server; tests
//! and the CLI use the clients directly.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod routes;
pub mod shipping;
pub mod state;
pub mod store;
