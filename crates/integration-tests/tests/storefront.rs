//! End-to-end flows through the storefront HTTP routes.

#![allow(clippy::unwrap_used)]

use emporium_integration_tests::{MockBackend, Storefront};
use reqwest::StatusCode;
use serde_json::{Value, json};

async fn setup() -> (MockBackend, Storefront) {
    let backend = MockBackend::start().await.unwrap();
    let storefront = Storefront::start(&backend).await.unwrap();
    (backend, storefront)
}

async fn send(request: reqwest::RequestBuilder) -> (StatusCode, Value) {
    let response = request.send().await.unwrap();
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let (_backend, sf) = setup().await;
    let response = sf.client.get(sf.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_cart_without_session_is_empty() {
    let (_backend, sf) = setup().await;
    let (status, body) = send(sf.client.get(sf.url("/cart"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item_count"], 0);
    assert_eq!(body["version"], Value::Null);
}

#[tokio::test]
async fn test_cart_shows_changes_made_elsewhere() {
    let (backend, sf) = setup().await;
    send(
        sf.client
            .post(sf.url("/cart/items"))
            .json(&json!({ "variant_id": 1 })),
    )
    .await;
    let token = backend.cart_tokens().pop().unwrap();
    let server = backend.touch_cart(&token).unwrap();

    let (status, cart) = send(sf.client.get(sf.url("/cart"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cart["version"], server);

    // Checkout starts against the refreshed cart.
    let (status, view) = send(sf.client.post(sf.url("/checkout/start"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "started");
}

#[tokio::test]
async fn test_checkout_without_cart_is_not_found() {
    let (_backend, sf) = setup().await;
    let (status, body) = send(sf.client.get(sf.url("/checkout"))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_two_item_cash_on_delivery_checkout() {
    let (backend, sf) = setup().await;

    for variant_id in [1, 2] {
        let (status, _) = send(
            sf.client
                .post(sf.url("/cart/items"))
                .json(&json!({ "variant_id": variant_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, cart) = send(sf.client.get(sf.url("/cart"))).await;
    assert_eq!(cart["item_count"], 2);
    assert_eq!(cart["version"], 2);

    let (status, view) = send(sf.client.post(sf.url("/checkout/start"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "started");

    let (status, view) = send(sf.client.put(sf.url("/checkout/address")).json(&json!({
        "first_name": "Olena",
        "last_name": "Koval",
        "email": "olena@example.com",
        "phone": "+380501234567",
        "city": "Kyiv",
        "settlement_ref": "s-kyiv",
    })))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "address_set");
    let courier = view["shipping_methods"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["code"] == "courier")
        .unwrap()
        .clone();

    let (status, view) = send(sf.client.put(sf.url("/checkout/shipping")).json(&json!({
        "method_code": "courier",
        "quote_id": courier["quote_id"],
    })))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["step"], "shipping_set");

    let (status, providers) = send(sf.client.get(sf.url("/checkout/payment-providers"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(providers.as_array().unwrap().iter().any(|p| p["code"] == "cod"));

    let (status, view) = send(
        sf.client
            .put(sf.url("/checkout/payment"))
            .json(&json!({ "provider": "cod" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["can_confirm"], true);

    let (status, confirmation) = send(sf.client.post(sf.url("/checkout/confirm"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(confirmation["order"]["order_id"].is_i64());
    assert_eq!(confirmation["order"]["order_id"], 1001);
    assert_eq!(confirmation["payment_url"], Value::Null);

    // The session forgot the cart and the backend consumed it.
    let (_, cart) = send(sf.client.get(sf.url("/cart"))).await;
    assert_eq!(cart["item_count"], 0);
    assert_eq!(backend.orders_placed(), 1);
    assert_eq!(backend.hits("POST", "/api/v1/payments/init"), 0);
}

#[tokio::test]
async fn test_confirm_before_ready_is_conflict() {
    let (backend, sf) = setup().await;
    send(
        sf.client
            .post(sf.url("/cart/items"))
            .json(&json!({ "variant_id": 1 })),
    )
    .await;
    send(sf.client.post(sf.url("/checkout/start"))).await;
    let before = backend.total_hits();

    let (status, body) = send(sf.client.post(sf.url("/checkout/confirm"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].is_string());
    assert_eq!(backend.hits("POST", "/confirm"), 0);
    // Only the cart lookup for the session may reach the backend.
    assert!(backend.total_hits() - before <= 1);
}

#[tokio::test]
async fn test_invalid_address_lists_fields() {
    let (_backend, sf) = setup().await;
    send(
        sf.client
            .post(sf.url("/cart/items"))
            .json(&json!({ "variant_id": 1 })),
    )
    .await;
    send(sf.client.post(sf.url("/checkout/start"))).await;

    let (status, body) = send(sf.client.put(sf.url("/checkout/address")).json(&json!({
        "first_name": " ",
        "last_name": "Koval",
        "email": "olena@example.com",
        "phone": "+380501234567",
        "city": "",
    })))
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["fields"]["first_name"].is_array());
    assert!(body["fields"]["city"].is_array());
}

#[tokio::test]
async fn test_rate_limit_maps_to_429() {
    let (backend, sf) = setup().await;
    backend.rate_limit_next(3);

    let response = sf
        .client
        .post(sf.url("/cart/items"))
        .json(&json!({ "variant_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "3");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["retry_after"], 3);
}

#[tokio::test]
async fn test_catalog_listing_canonical_url() {
    let (_backend, sf) = setup().await;
    let (status, view) = send(
        sf.client
            .get(sf.url("/catalog?page=2&brand=3,1&sort=price_asc&currency=UAH")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["url"], "/catalog?brand=1,3&sort=price_asc&page=2");
    assert_eq!(view["products"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_category_listing_hides_pinned_category() {
    let (backend, sf) = setup().await;
    let (status, view) = send(sf.client.get(sf.url("/category/shirts?category=7,9"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["url"], "/category/shirts?category=9");
    let sent = backend.last_listing_query();
    assert!(sent.contains(&("category".to_string(), "7,9".to_string())));
}

#[tokio::test]
async fn test_settlement_search() {
    let (backend, sf) = setup().await;

    let (status, found) = send(sf.client.get(sf.url("/shipping/settlements?q=ky"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found[0]["ref"], "s-kyiv");

    let (_, short) = send(sf.client.get(sf.url("/shipping/settlements?q=k"))).await;
    assert_eq!(short, json!([]));
    assert_eq!(backend.hits("GET", "/settlements"), 1);
}
