//! Integration tests for the Emporium storefront.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p emporium-integration-tests
//! ```
//!
//! No external services are needed: [`MockBackend`] serves the backend REST
//! API from memory on an ephemeral port, and [`Storefront`] runs the real
//! storefront router against it.
//!
//! # Test Categories
//!
//! - `cart` - Versioned cart mutations, conflicts, idempotency
//! - `checkout` - Checkout state machine against the backend
//! - `catalog` - Listing query round trips and backend parameters
//! - `api` - Rate limiting and CSRF refresh
//! - `storefront` - End-to-end HTTP flows through the storefront routes

mod mock;

pub use mock::MockBackend;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use emporium_storefront::config::StorefrontConfig;
use emporium_storefront::routes;
use emporium_storefront::state::AppState;
use tokio::net::TcpListener;

/// Storefront configuration pointing at `backend`, served on `port`.
#[must_use]
pub fn storefront_config(backend: &MockBackend, port: u16) -> StorefrontConfig {
    StorefrontConfig {
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        base_url: format!("http://127.0.0.1:{port}"),
        backend: backend.backend_config(),
        page_size: 24,
        sentry_dsn: None,
        sentry_environment: None,
        sentry_traces_sample_rate: 0.0,
    }
}

/// Storefront server running against a [`MockBackend`].
pub struct Storefront {
    addr: SocketAddr,
    /// Client with a cookie store, so the storefront session sticks.
    pub client: reqwest::Client,
}

impl Storefront {
    /// Start the storefront router on an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the application
    /// state cannot be built.
    pub async fn start(backend: &MockBackend) -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;

        let state = AppState::new(storefront_config(backend, addr.port()))
            .map_err(std::io::Error::other)?;
        let app = routes::router(state);

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self { addr, client })
    }

    /// Absolute URL for a storefront path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}
