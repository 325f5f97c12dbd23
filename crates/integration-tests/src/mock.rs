//! In-memory stand-in for the commerce backend REST API.
//!
//! Implements the subset of `/api/v1` the storefront calls, with the same
//! envelope, headers and error bodies:
//!
//! - carts keyed by `X-Cart-Token`, versioned, guarded by `If-Match`
//! - `Idempotency-Key` replay for cart mutations and order confirmation
//! - checkout sessions bound to the cart version they were opened against
//! - shipping quotes, settlements, warehouses, payment providers
//! - a read-only catalog that records the listing query it was sent
//!
//! Knobs on [`MockBackend`] simulate a concurrent cart edit, session expiry,
//! slow responses, rate limiting and CSRF rejection. Every request is counted by method and
//! path.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
};
use chrono::{DateTime, Duration, Utc};
use emporium_core::CurrencyCode;
use emporium_storefront::config::BackendConfig;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Loyalty points any mock cart may redeem.
const MAX_REDEEMABLE_POINTS: u64 = 100;
/// Promo code the mock accepts, worth a fixed discount.
const PROMO_CODE: &str = "SAVE50";
const PROMO_DISCOUNT: i64 = 50;
/// First order id handed out.
const FIRST_ORDER_ID: i64 = 1001;
/// Session lifetime.
const SESSION_TTL_MINUTES: i64 = 30;

/// `(variant_id, product_id, name, price)`.
const VARIANTS: &[(i64, i64, &str, i64)] = &[
    (1, 10, "Linen shirt", 1200),
    (2, 11, "Wool socks", 350),
    (3, 12, "Canvas tote", 500),
];

const SETTLEMENTS: &[(&str, &str, &str)] = &[
    ("s-kyiv", "Kyiv", "Kyiv"),
    ("s-kharkiv", "Kharkiv", "Kharkiv"),
    ("s-lviv", "Lviv", "Lviv"),
];

type Shared = Mutex<MockState>;

fn lock(shared: &Shared) -> MutexGuard<'_, MockState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MockState {
    carts: HashMap<String, MockCart>,
    sessions: HashMap<String, MockSession>,
    replays: HashMap<String, (Value, u64)>,
    next_id: i64,
    orders: usize,
    hits: HashMap<String, usize>,
    csrf_expected: Option<String>,
    csrf_broken: bool,
    rate_limit_next: Option<u64>,
    delay_next: Option<(String, String, std::time::Duration)>,
    last_listing_query: Vec<(String, String)>,
}

impl MockState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

struct MockCart {
    token: String,
    version: u64,
    items: Vec<MockItem>,
    promos: Vec<String>,
}

struct MockItem {
    id: i64,
    variant_id: i64,
    quantity: u32,
}

impl MockCart {
    fn subtotal(&self) -> Decimal {
        self.items
            .iter()
            .filter_map(|item| {
                variant(item.variant_id).map(|(_, _, price)| price * Decimal::from(item.quantity))
            })
            .sum()
    }

    fn discount(&self) -> Decimal {
        if self.promos.iter().any(|p| p == PROMO_CODE) {
            Decimal::from(PROMO_DISCOUNT).min(self.subtotal())
        } else {
            Decimal::ZERO
        }
    }

    fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .filter_map(|item| {
                let (product_id, name, price) = variant(item.variant_id)?;
                Some(json!({
                    "id": item.id,
                    "variant_id": item.variant_id,
                    "product_id": product_id,
                    "name": name,
                    "sku": format!("SKU-{}", item.variant_id),
                    "quantity": item.quantity,
                    "unit_price": price,
                    "line_total": price * Decimal::from(item.quantity),
                }))
            })
            .collect();
        let promotions: Vec<Value> = self
            .promos
            .iter()
            .map(|code| json!({ "code": code, "name": "Fifty off", "discount": self.discount() }))
            .collect();

        json!({
            "token": self.token,
            "version": self.version,
            "currency": "UAH",
            "items": items,
            "promotions": promotions,
            "loyalty": {
                "points_balance": 500,
                "max_redeemable_points": MAX_REDEEMABLE_POINTS,
                "point_value": Decimal::ONE,
            },
            "totals": {
                "subtotal": self.subtotal(),
                "discount": self.discount(),
                "total": self.subtotal() - self.discount(),
            },
        })
    }
}

struct MockSession {
    id: String,
    cart_token: String,
    cart_version: u64,
    expires_at: DateTime<Utc>,
    subtotal: Decimal,
    discount: Decimal,
    address: bool,
    shipping: Option<Decimal>,
    provider: Option<String>,
    loyalty_points: u64,
}

impl MockSession {
    fn to_json(&self) -> Value {
        let shipping = self.shipping.unwrap_or_default();
        let loyalty = Decimal::from(self.loyalty_points);
        json!({
            "id": self.id,
            "expires_at": self.expires_at,
            "currency": "UAH",
            "locale": "uk",
            "cart_version": self.cart_version,
            "pricing": {
                "subtotal": self.subtotal,
                "shipping": shipping,
                "discount": self.discount,
                "loyalty_discount": loyalty,
                "total": self.subtotal + shipping - self.discount - loyalty,
            },
        })
    }
}

fn variant(id: i64) -> Option<(i64, &'static str, Decimal)> {
    VARIANTS
        .iter()
        .find(|(variant_id, ..)| *variant_id == id)
        .map(|&(_, product_id, name, price)| (product_id, name, Decimal::from(price)))
}

/// `(code, name, price, requires_warehouse, quote_id)` quoted for every session.
fn quotes(session_id: &str) -> Vec<(String, &'static str, Decimal, bool, String)> {
    vec![
        (
            "courier".to_string(),
            "Courier",
            Decimal::from(90),
            false,
            format!("q-courier-{session_id}"),
        ),
        (
            "branch".to_string(),
            "Pickup point",
            Decimal::from(60),
            true,
            format!("q-branch-{session_id}"),
        ),
    ]
}

// =============================================================================
// MockBackend
// =============================================================================

/// Mock backend server.
///
/// The server runs on the test's tokio runtime and stops with it.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<Shared>,
}

impl MockBackend {
    /// Bind an ephemeral port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(MockState {
            next_id: FIRST_ORDER_ID * 10,
            ..MockState::default()
        }));
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let app = router(Arc::clone(&state));

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, state })
    }

    /// Base URL of the mock.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Backend configuration pointing at the mock.
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.url(),
            api_token: None,
            timeout_secs: 5,
            locale: "uk".to_string(),
            currency: CurrencyCode::UAH,
        }
    }

    /// Requests received for `method` on paths ending with `path_suffix`.
    #[must_use]
    pub fn hits(&self, method: &str, path_suffix: &str) -> usize {
        let prefix = format!("{method} ");
        lock(&self.state)
            .hits
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix) && key.ends_with(path_suffix))
            .map(|(_, count)| count)
            .sum()
    }

    /// Every request received.
    #[must_use]
    pub fn total_hits(&self) -> usize {
        lock(&self.state).hits.values().sum()
    }

    /// Answer the next request with 429 and `Retry-After: retry_after`.
    pub fn rate_limit_next(&self, retry_after: u64) {
        lock(&self.state).rate_limit_next = Some(retry_after);
    }

    /// Hold the next `method` request on a path ending with `path_suffix`
    /// for `delay` before handling it.
    pub fn delay_next(&self, method: &str, path_suffix: &str, delay: std::time::Duration) {
        lock(&self.state).delay_next =
            Some((method.to_string(), path_suffix.to_string(), delay));
    }

    /// Reject mutating requests until the client fetches a fresh CSRF cookie.
    pub fn require_csrf(&self) {
        let mut state = lock(&self.state);
        state.csrf_expected = Some(format!("expected-{}", uuid::Uuid::new_v4()));
        state.csrf_broken = false;
    }

    /// Reject mutating requests even after a CSRF cookie refresh.
    pub fn break_csrf(&self) {
        let mut state = lock(&self.state);
        state.csrf_expected = Some(format!("unreachable-{}", uuid::Uuid::new_v4()));
        state.csrf_broken = true;
    }

    /// Change a cart behind the client's back, as another tab would.
    ///
    /// Returns the new version, or `None` for an unknown cart.
    pub fn touch_cart(&self, token: &str) -> Option<u64> {
        let mut state = lock(&self.state);
        let cart = state.carts.get_mut(token)?;
        cart.version += 1;
        Some(cart.version)
    }

    /// Tokens of every cart the backend holds.
    #[must_use]
    pub fn cart_tokens(&self) -> Vec<String> {
        lock(&self.state).carts.keys().cloned().collect()
    }

    /// Current version of a cart.
    #[must_use]
    pub fn cart_version(&self, token: &str) -> Option<u64> {
        lock(&self.state).carts.get(token).map(|c| c.version)
    }

    /// Whether the backend still holds a cart.
    #[must_use]
    pub fn cart_exists(&self, token: &str) -> bool {
        lock(&self.state).carts.contains_key(token)
    }

    /// Move every session's expiry into the past.
    pub fn expire_sessions(&self) {
        let past = Utc::now() - Duration::minutes(1);
        for session in lock(&self.state).sessions.values_mut() {
            session.expires_at = past;
        }
    }

    /// Orders placed so far.
    #[must_use]
    pub fn orders_placed(&self) -> usize {
        lock(&self.state).orders
    }

    /// Query parameters of the last product listing request.
    #[must_use]
    pub fn last_listing_query(&self) -> Vec<(String, String)> {
        lock(&self.state).last_listing_query.clone()
    }
}

fn router(state: Arc<Shared>) -> Router {
    Router::new()
        .route("/sanctum/csrf-cookie", get(csrf_cookie))
        .route("/api/v1/cart", get(show_cart).delete(clear_cart))
        .route("/api/v1/cart/items", post(add_item))
        .route(
            "/api/v1/cart/items/{id}",
            patch(update_item).delete(remove_item),
        )
        .route("/api/v1/cart/promo", post(apply_promo))
        .route("/api/v1/cart/promo/{code}", delete(remove_promo))
        .route("/api/v1/checkout/start", post(start_checkout))
        .route("/api/v1/checkout/{id}", get(show_checkout))
        .route("/api/v1/checkout/{id}/address", put(set_address))
        .route("/api/v1/checkout/{id}/shipping-method", put(set_shipping))
        .route("/api/v1/checkout/{id}/payment-provider", put(set_payment))
        .route(
            "/api/v1/checkout/{id}/loyalty",
            post(apply_loyalty).delete(remove_loyalty),
        )
        .route("/api/v1/checkout/{id}/confirm", post(confirm))
        .route("/api/v1/shipping/methods", get(shipping_methods))
        .route("/api/v1/shipping/settlements", get(settlements))
        .route("/api/v1/shipping/warehouses", get(warehouses))
        .route("/api/v1/payments/providers", get(providers))
        .route("/api/v1/payments/init", post(init_payment))
        .route("/api/v1/catalog/products", get(list_products))
        .route("/api/v1/catalog/products/{slug}", get(show_product))
        .route("/api/v1/catalog/categories/{slug}", get(show_category))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), gatekeeper))
        .with_state(state)
}

// =============================================================================
// Responses
// =============================================================================

fn data(value: Value) -> Response {
    Json(json!({ "data": value })).into_response()
}

fn data_with_etag(value: Value, version: u64) -> Response {
    let mut response = data(value);
    response
        .headers_mut()
        .insert(header::ETAG, HeaderValue::from(version));
    response
}

fn failure(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn not_found(what: &str) -> Response {
    failure(
        StatusCode::NOT_FOUND,
        json!({ "message": format!("{what} not found.") }),
    )
}

fn invalid(field: &str, message: &str) -> Response {
    failure(
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({
            "message": "The given data was invalid.",
            "errors": { field: [message] },
        }),
    )
}

fn cart_changed() -> Response {
    failure(
        StatusCode::CONFLICT,
        json!({ "code": "CART_CHANGED", "message": "The cart changed since checkout started." }),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn if_match(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, "if-match").and_then(|v| v.trim().trim_matches('"').parse().ok())
}

// =============================================================================
// Middleware
// =============================================================================

/// Count the request, then apply delays, rate limiting and CSRF checks.
async fn gatekeeper(State(mock): State<Arc<Shared>>, request: Request, next: Next) -> Response {
    let delay = {
        let mut state = lock(&mock);
        let key = format!("{} {}", request.method(), request.uri().path());
        *state.hits.entry(key).or_default() += 1;

        let delay = state
            .delay_next
            .take_if(|held| {
                request.method().as_str() == held.0
                    && request.uri().path().ends_with(held.1.as_str())
            })
            .map(|(_, _, delay)| delay);

        if let Some(retry_after) = state.rate_limit_next.take() {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(json!({ "message": "Too Many Attempts." })),
            )
                .into_response();
        }

        if let Some(expected) = &state.csrf_expected
            && request.method() != Method::GET
            && header_str(request.headers(), "x-xsrf-token") != Some(expected.as_str())
        {
            return failure(
                StatusCode::from_u16(419).unwrap_or(StatusCode::FORBIDDEN),
                json!({ "message": "CSRF token mismatch." }),
            );
        }
        delay
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    next.run(request).await
}

async fn csrf_cookie(State(mock): State<Arc<Shared>>) -> Response {
    let mut state = lock(&mock);
    let token = format!("fresh-{}==", uuid::Uuid::new_v4());
    if state.csrf_expected.is_some() && !state.csrf_broken {
        state.csrf_expected = Some(token.clone());
    }
    (
        StatusCode::NO_CONTENT,
        [(
            header::SET_COOKIE,
            format!("XSRF-TOKEN={}; path=/", urlencoding::encode(&token)),
        )],
    )
        .into_response()
}

// =============================================================================
// Cart
// =============================================================================

/// Run a versioned, idempotent mutation on the cart named by the headers.
fn mutate_cart(
    state: &mut MockState,
    headers: &HeaderMap,
    apply: impl FnOnce(&mut MockCart, &mut i64) -> Result<(), Response>,
) -> Response {
    let key = header_str(headers, "idempotency-key").map(str::to_owned);
    if let Some(key) = &key
        && let Some((body, version)) = state.replays.get(key)
    {
        return data_with_etag(body.clone(), *version);
    }

    let Some(token) = header_str(headers, "x-cart-token") else {
        return failure(
            StatusCode::BAD_REQUEST,
            json!({ "message": "Missing cart token." }),
        );
    };
    let Some(cart) = state.carts.get_mut(token) else {
        return not_found("Cart");
    };
    if if_match(headers) != Some(cart.version) {
        return failure(
            StatusCode::CONFLICT,
            json!({ "message": "The cart was modified.", "current_version": cart.version }),
        );
    }

    if let Err(response) = apply(cart, &mut state.next_id) {
        return response;
    }
    cart.version += 1;
    let (body, version) = (cart.to_json(), cart.version);

    if let Some(key) = key {
        state.replays.insert(key, (body.clone(), version));
    }
    data_with_etag(body, version)
}

fn quantity_of(body: &Value) -> Option<u32> {
    body.get("quantity")
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
}

async fn show_cart(State(mock): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    let state = lock(&mock);
    match header_str(&headers, "x-cart-token").and_then(|t| state.carts.get(t)) {
        Some(cart) => data_with_etag(cart.to_json(), cart.version),
        None => not_found("Cart"),
    }
}

async fn clear_cart(State(mock): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    let mut state = lock(&mock);
    mutate_cart(&mut state, &headers, |cart, _| {
        cart.items.clear();
        cart.promos.clear();
        Ok(())
    })
}

async fn add_item(
    State(mock): State<Arc<Shared>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let variant_id = body.get("variant_id").and_then(Value::as_i64).unwrap_or(0);
    let quantity = quantity_of(&body).unwrap_or(0);
    if variant(variant_id).is_none() {
        return invalid("variant_id", "The selected variant id is invalid.");
    }
    if quantity == 0 {
        return invalid("quantity", "The quantity must be at least 1.");
    }

    let mut state = lock(&mock);
    if header_str(&headers, "x-cart-token").is_some() {
        return mutate_cart(&mut state, &headers, |cart, next_id| {
            match cart.items.iter_mut().find(|i| i.variant_id == variant_id) {
                Some(item) => item.quantity += quantity,
                None => {
                    *next_id += 1;
                    cart.items.push(MockItem {
                        id: *next_id,
                        variant_id,
                        quantity,
                    });
                }
            }
            Ok(())
        });
    }

    let key = header_str(&headers, "idempotency-key").map(str::to_owned);
    if let Some(key) = &key
        && let Some((body, version)) = state.replays.get(key)
    {
        return data_with_etag(body.clone(), *version);
    }

    let cart = MockCart {
        token: format!("cart-{}", uuid::Uuid::new_v4()),
        version: 1,
        items: vec![MockItem {
            id: state.next_id(),
            variant_id,
            quantity,
        }],
        promos: Vec::new(),
    };
    let body = cart.to_json();
    if let Some(key) = key {
        state.replays.insert(key, (body.clone(), cart.version));
    }
    state.carts.insert(cart.token.clone(), cart);
    data_with_etag(body, 1)
}

async fn update_item(
    State(mock): State<Arc<Shared>>,
    Path(item_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(quantity) = quantity_of(&body) else {
        return invalid("quantity", "The quantity field is required.");
    };
    let mut state = lock(&mock);
    mutate_cart(&mut state, &headers, |cart, _| {
        let item = cart
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| not_found("Cart item"))?;
        item.quantity = quantity;
        cart.items.retain(|i| i.quantity > 0);
        Ok(())
    })
}

async fn remove_item(
    State(mock): State<Arc<Shared>>,
    Path(item_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    let mut state = lock(&mock);
    mutate_cart(&mut state, &headers, |cart, _| {
        let before = cart.items.len();
        cart.items.retain(|i| i.id != item_id);
        if cart.items.len() == before {
            return Err(not_found("Cart item"));
        }
        Ok(())
    })
}

async fn apply_promo(
    State(mock): State<Arc<Shared>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let code = body
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_uppercase();
    if code != PROMO_CODE {
        return invalid("code", "The promo code is invalid.");
    }
    let mut state = lock(&mock);
    mutate_cart(&mut state, &headers, |cart, _| {
        if !cart.promos.contains(&code) {
            cart.promos.push(code);
        }
        Ok(())
    })
}

async fn remove_promo(
    State(mock): State<Arc<Shared>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut state = lock(&mock);
    mutate_cart(&mut state, &headers, |cart, _| {
        cart.promos.retain(|p| !p.eq_ignore_ascii_case(&code));
        Ok(())
    })
}

// =============================================================================
// Checkout
// =============================================================================

/// Find a live session whose cart has not moved on.
fn live_session<'a>(state: &'a mut MockState, id: &str) -> Result<&'a mut MockSession, Response> {
    let session = state.sessions.get_mut(id).ok_or_else(|| not_found("Checkout"))?;
    if session.expires_at <= Utc::now() {
        return Err(failure(
            StatusCode::GONE,
            json!({ "code": "CHECKOUT_EXPIRED", "message": "The checkout session expired." }),
        ));
    }
    let cart_version = state.carts.get(&session.cart_token).map(|c| c.version);
    if cart_version != Some(session.cart_version) {
        return Err(cart_changed());
    }
    Ok(session)
}

async fn start_checkout(State(mock): State<Arc<Shared>>, headers: HeaderMap) -> Response {
    let mut state = lock(&mock);
    let Some(token) = header_str(&headers, "x-cart-token") else {
        return not_found("Cart");
    };
    let Some(cart) = state.carts.get(token) else {
        return not_found("Cart");
    };
    if if_match(&headers) != Some(cart.version) {
        return cart_changed();
    }
    if cart.items.is_empty() {
        return invalid("cart", "The cart is empty.");
    }

    let session = MockSession {
        id: format!("chk-{}", uuid::Uuid::new_v4()),
        cart_token: cart.token.clone(),
        cart_version: cart.version,
        expires_at: Utc::now() + Duration::minutes(SESSION_TTL_MINUTES),
        subtotal: cart.subtotal(),
        discount: cart.discount(),
        address: false,
        shipping: None,
        provider: None,
        loyalty_points: 0,
    };
    let body = session.to_json();
    state.sessions.insert(session.id.clone(), session);
    data(body)
}

async fn show_checkout(State(mock): State<Arc<Shared>>, Path(id): Path<String>) -> Response {
    let mut state = lock(&mock);
    match live_session(&mut state, &id) {
        Ok(session) => data(session.to_json()),
        Err(response) => response,
    }
}

async fn set_address(
    State(mock): State<Arc<Shared>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let city = body.get("city").and_then(Value::as_str).unwrap_or_default();
    if city.trim().is_empty() {
        return invalid("city", "The city field is required.");
    }
    let mut state = lock(&mock);
    match live_session(&mut state, &id) {
        Ok(session) => {
            session.address = true;
            session.shipping = None;
            session.provider = None;
            session.loyalty_points = 0;
            data(session.to_json())
        }
        Err(response) => response,
    }
}

async fn set_shipping(
    State(mock): State<Arc<Shared>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let code = body.get("method_code").and_then(Value::as_str).unwrap_or_default();
    let quote = body.get("quote_id").and_then(Value::as_str).unwrap_or_default();
    let Some((_, _, price, requires_warehouse, _)) = quotes(&id)
        .into_iter()
        .find(|(c, _, _, _, q)| c == code && q == quote)
    else {
        return invalid("quote_id", "The shipping quote is invalid.");
    };
    if requires_warehouse && body.get("warehouse_ref").is_none_or(Value::is_null) {
        return invalid("warehouse_ref", "A pickup point is required.");
    }

    let mut state = lock(&mock);
    match live_session(&mut state, &id) {
        Ok(session) if !session.address => invalid("address", "Set the address first."),
        Ok(session) => {
            session.shipping = Some(price);
            session.provider = None;
            session.loyalty_points = 0;
            data(session.to_json())
        }
        Err(response) => response,
    }
}

async fn set_payment(
    State(mock): State<Arc<Shared>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let provider = body.get("provider").and_then(Value::as_str).unwrap_or_default();
    if !matches!(provider, "cod" | "liqpay") {
        return invalid("provider", "The selected provider is invalid.");
    }
    let mut state = lock(&mock);
    match live_session(&mut state, &id) {
        Ok(session) if session.shipping.is_none() => {
            invalid("shipping", "Select a shipping method first.")
        }
        Ok(session) => {
            session.provider = Some(provider.to_string());
            data(session.to_json())
        }
        Err(response) => response,
    }
}

async fn apply_loyalty(
    State(mock): State<Arc<Shared>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let points = body.get("points").and_then(Value::as_u64).unwrap_or(0);
    if points == 0 || points > MAX_REDEEMABLE_POINTS {
        return invalid("points", "The points value is out of range.");
    }
    let mut state = lock(&mock);
    match live_session(&mut state, &id) {
        Ok(session) => {
            session.loyalty_points = points;
            data(session.to_json())
        }
        Err(response) => response,
    }
}

async fn remove_loyalty(State(mock): State<Arc<Shared>>, Path(id): Path<String>) -> Response {
    let mut state = lock(&mock);
    match live_session(&mut state, &id) {
        Ok(session) => {
            session.loyalty_points = 0;
            data(session.to_json())
        }
        Err(response) => response,
    }
}

async fn confirm(
    State(mock): State<Arc<Shared>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut state = lock(&mock);
    let key = header_str(&headers, "idempotency-key").map(str::to_owned);
    if let Some(key) = &key
        && let Some((body, _)) = state.replays.get(key)
    {
        return data(body.clone());
    }

    let (provider, cart_token) = match live_session(&mut state, &id) {
        Ok(session) => match (&session.provider, session.address) {
            (Some(provider), true) => (provider.clone(), session.cart_token.clone()),
            _ => return invalid("checkout", "The checkout is incomplete."),
        },
        Err(response) => return response,
    };

    state.orders += 1;
    let order_id = FIRST_ORDER_ID + i64::try_from(state.orders).unwrap_or(0) - 1;
    let body = json!({
        "order_id": order_id,
        "number": format!("EM-{order_id}"),
        "payment": { "provider": provider, "required": provider != "cod" },
    });

    state.carts.remove(&cart_token);
    state.sessions.remove(&id);
    if let Some(key) = key {
        state.replays.insert(key, (body.clone(), 0));
    }
    data(body)
}

// =============================================================================
// Shipping & payments
// =============================================================================

async fn shipping_methods(
    State(mock): State<Arc<Shared>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let id = query.get("checkout_id").cloned().unwrap_or_default();
    if !lock(&mock).sessions.contains_key(&id) {
        return not_found("Checkout");
    }
    let methods: Vec<Value> = quotes(&id)
        .into_iter()
        .map(|(code, name, price, requires_warehouse, quote_id)| {
            json!({
                "code": code,
                "name": name,
                "price": price,
                "quote_id": quote_id,
                "eta_days": 2,
                "requires_warehouse": requires_warehouse,
            })
        })
        .collect();
    data(Value::Array(methods))
}

async fn settlements(Query(query): Query<HashMap<String, String>>) -> Response {
    let q = query.get("q").map(|q| q.to_lowercase()).unwrap_or_default();
    let found: Vec<Value> = SETTLEMENTS
        .iter()
        .filter(|(_, name, _)| name.to_lowercase().contains(&q))
        .map(|(reference, name, region)| json!({ "ref": reference, "name": name, "region": region }))
        .collect();
    data(Value::Array(found))
}

async fn warehouses(Query(query): Query<HashMap<String, String>>) -> Response {
    let Some(settlement) = query.get("settlement_ref") else {
        return invalid("settlement_ref", "The settlement ref field is required.");
    };
    let q = query.get("q").map(|q| q.to_lowercase()).unwrap_or_default();
    let found: Vec<Value> = (1..=3)
        .map(|n| (format!("{settlement}-w{n}"), format!("Branch #{n}")))
        .filter(|(_, name)| name.to_lowercase().contains(&q))
        .map(|(reference, name)| json!({ "ref": reference, "name": name, "number": reference }))
        .collect();
    data(Value::Array(found))
}

async fn providers() -> Response {
    data(json!([
        { "code": "cod", "name": "Cash on delivery", "online": false },
        { "code": "liqpay", "name": "LiqPay", "online": true },
    ]))
}

async fn init_payment(Json(body): Json<Value>) -> Response {
    let order_id = body.get("order_id").and_then(Value::as_i64).unwrap_or(0);
    data(json!({
        "redirect_url": format!("https://pay.example.test/orders/{order_id}"),
        "status": "pending",
    }))
}

// =============================================================================
// Catalog
// =============================================================================

async fn list_products(
    State(mock): State<Arc<Shared>>,
    Query(query): Query<Vec<(String, String)>>,
) -> Response {
    let param = |name: &str| {
        query
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.parse::<u32>().ok())
    };
    let page = param("page").unwrap_or(1);
    let per_page = param("per_page").unwrap_or(24);
    lock(&mock).last_listing_query.clone_from(&query);

    let items: Vec<Value> = VARIANTS
        .iter()
        .map(|&(_, product_id, name, price)| {
            json!({
                "id": product_id,
                "slug": name.to_lowercase().replace(' ', "-"),
                "name": name,
                "price": Decimal::from(price),
                "currency": "UAH",
                "in_stock": true,
            })
        })
        .collect();

    data(json!({
        "items": items,
        "meta": { "current_page": page, "last_page": 3, "per_page": per_page, "total": 60 },
        "facets": [{
            "key": "brand",
            "name": "Brand",
            "values": [
                { "value": "1", "label": "Northwind", "count": 12 },
                { "value": "3", "label": "Fjord", "count": 4 },
            ],
        }],
    }))
}

async fn show_product(Path(slug): Path<String>) -> Response {
    let Some(&(variant_id, product_id, name, price)) = VARIANTS
        .iter()
        .find(|(_, _, name, _)| name.to_lowercase().replace(' ', "-") == slug)
    else {
        return not_found("Product");
    };
    data(json!({
        "id": product_id,
        "slug": slug,
        "name": name,
        "currency": "UAH",
        "category_id": 7,
        "variants": [{
            "id": variant_id,
            "sku": format!("SKU-{variant_id}"),
            "name": "One size",
            "price": Decimal::from(price),
            "in_stock": true,
        }],
    }))
}

async fn show_category(Path(slug): Path<String>) -> Response {
    if slug != "shirts" {
        return not_found("Category");
    }
    data(json!({ "id": 7, "slug": "shirts", "name": "Shirts" }))
}
