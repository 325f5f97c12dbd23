//! Checkout state machine against the mock backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use emporium_core::{CartVersion, CheckoutStep, Email, Phone, VariantId};
use emporium_integration_tests::{MockBackend, storefront_config};
use emporium_storefront::api::ApiClient;
use emporium_storefront::cart::{CartClient, CartOp, CartRegistry, CartStore, ConflictPolicy};
use emporium_storefront::checkout::{
    Address, CheckoutController, CheckoutError, CheckoutState, DEFAULT_COUNTRY, ShippingSelection,
};
use emporium_storefront::state::AppState;

struct Fixture {
    backend: MockBackend,
    cart: Arc<CartStore>,
    checkout: CheckoutController,
}

fn add(variant: i64, quantity: u32) -> CartOp {
    CartOp::AddItem {
        variant_id: VariantId::new(variant),
        quantity,
    }
}

/// A cart with a shirt (1200) and socks (350), and an idle checkout for it.
async fn fixture() -> Fixture {
    let backend = MockBackend::start().await.unwrap();
    let api = ApiClient::new(&backend.backend_config()).unwrap();
    let carts = CartRegistry::new(CartClient::new(api.clone()));

    let cart = carts.create(add(1, 1)).await.unwrap();
    cart.mutate(add(2, 1), ConflictPolicy::Abort).await.unwrap();
    let checkout = CheckoutController::new(api, Arc::clone(&cart), carts.subscribe());

    Fixture {
        backend,
        cart,
        checkout,
    }
}

fn address() -> Address {
    Address {
        first_name: "Olena".to_string(),
        last_name: "Koval".to_string(),
        email: Email::parse("olena@example.com").unwrap(),
        phone: Phone::parse("+380 50 123 4567").unwrap(),
        city: "Kyiv".to_string(),
        settlement_ref: Some("s-kyiv".to_string()),
        line1: None,
        postcode: None,
        country: DEFAULT_COUNTRY.to_string(),
    }
}

fn quoted(state: &CheckoutState, code: &str) -> ShippingSelection {
    let method = state
        .destination()
        .unwrap()
        .methods
        .iter()
        .find(|m| m.code == code)
        .unwrap();
    ShippingSelection {
        method_code: method.code.clone(),
        quote_id: method.quote_id.clone(),
        warehouse_ref: None,
    }
}

/// Drive the checkout up to `PaymentSet` with courier delivery.
async fn ready(f: &Fixture, provider: &str) -> CheckoutState {
    f.checkout.start().await.unwrap();
    let state = f.checkout.set_address(address()).await.unwrap();
    f.checkout.set_shipping(quoted(&state, "courier")).await.unwrap();
    f.checkout.set_payment(provider).await.unwrap()
}

#[tokio::test]
async fn test_full_cash_on_delivery_checkout() {
    let f = fixture().await;

    let state = f.checkout.start().await.unwrap();
    assert_eq!(state.step(), CheckoutStep::Started);
    assert_eq!(state.session().unwrap().pricing.subtotal.to_string(), "1550");

    let state = f.checkout.set_address(address()).await.unwrap();
    assert_eq!(state.step(), CheckoutStep::AddressSet);
    assert_eq!(state.destination().unwrap().methods.len(), 2);

    let state = f
        .checkout
        .set_shipping(quoted(&state, "courier"))
        .await
        .unwrap();
    assert_eq!(state.step(), CheckoutStep::ShippingSet);
    assert_eq!(state.session().unwrap().pricing.total.to_string(), "1640");

    let state = f.checkout.set_payment("cod").await.unwrap();
    assert_eq!(state.step(), CheckoutStep::PaymentSet);
    assert!(state.missing().is_empty());

    let order = f.checkout.confirm().await.unwrap();
    assert_eq!(order.order_id.as_i64(), 1001);
    assert_eq!(order.number, "EM-1001");
    assert!(!order.payment.required);

    assert_eq!(f.checkout.step(), CheckoutStep::Confirmed);
    assert!(f.cart.snapshot().is_none());
    assert!(!f.backend.cart_exists(f.cart.token().as_str()));

    assert!(f.checkout.init_payment().await.unwrap().is_none());
    assert_eq!(f.backend.hits("POST", "/api/v1/payments/init"), 0);
    assert_eq!(f.backend.orders_placed(), 1);
}

#[tokio::test]
async fn test_online_payment_returns_redirect() {
    let f = fixture().await;
    ready(&f, "liqpay").await;

    let order = f.checkout.confirm().await.unwrap();
    assert!(order.payment.required);

    let init = f.checkout.init_payment().await.unwrap().unwrap();
    assert_eq!(
        init.redirect_url.as_deref(),
        Some("https://pay.example.test/orders/1001")
    );
}

#[tokio::test]
async fn test_confirm_before_ready_sends_nothing() {
    let f = fixture().await;

    let err = f.checkout.confirm().await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::NotReady { ref missing } if missing == &["session", "address", "shipping", "payment"]
    ));

    f.checkout.start().await.unwrap();
    f.checkout.set_address(address()).await.unwrap();
    let before = f.backend.total_hits();

    let err = f.checkout.confirm().await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::NotReady { ref missing } if missing == &["shipping", "payment"]
    ));
    assert_eq!(f.backend.total_hits(), before);
    assert_eq!(f.checkout.step(), CheckoutStep::AddressSet);
}

#[tokio::test]
async fn test_address_change_clears_later_selections() {
    let f = fixture().await;
    let state = ready(&f, "cod").await;
    assert!(state.shipping().is_some());
    assert!(state.ready().is_some());

    let mut moved = address();
    moved.city = "Lviv".to_string();
    moved.settlement_ref = Some("s-lviv".to_string());
    let state = f.checkout.set_address(moved).await.unwrap();

    assert_eq!(state.step(), CheckoutStep::AddressSet);
    assert!(state.shipping().is_none());
    assert!(state.ready().is_none());
    assert_eq!(state.destination().unwrap().address.city, "Lviv");
}

#[tokio::test]
async fn test_shipping_before_address_is_illegal() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();

    let selection = ShippingSelection {
        method_code: "courier".to_string(),
        quote_id: emporium_core::QuoteId::new("q-courier-x").unwrap(),
        warehouse_ref: None,
    };
    let err = f.checkout.set_shipping(selection).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::IllegalTransition {
            from: CheckoutStep::Started,
            ..
        }
    ));
}

#[tokio::test]
async fn test_local_cart_change_forces_restart() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();

    f.cart.mutate(add(3, 1), ConflictPolicy::Abort).await.unwrap();

    let err = f.checkout.set_address(address()).await.unwrap_err();
    assert!(matches!(err, CheckoutError::CartChanged));
    assert_eq!(f.checkout.step(), CheckoutStep::Idle);
    assert_eq!(f.backend.hits("PUT", "/address"), 0);

    // A fresh start binds to the new version.
    let state = f.checkout.start().await.unwrap();
    assert_eq!(state.session().unwrap().cart_version.as_u64(), 3);
}

#[tokio::test]
async fn test_remote_cart_change_resets_checkout() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    f.backend.touch_cart(f.cart.token().as_str()).unwrap();

    let err = f.checkout.set_address(address()).await.unwrap_err();
    assert!(matches!(err, CheckoutError::CartChanged));
    assert_eq!(f.checkout.step(), CheckoutStep::Idle);
}

#[tokio::test]
async fn test_stale_cart_snapshot_recovers_on_next_start() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    let server = f.backend.touch_cart(f.cart.token().as_str()).unwrap();

    let err = f.checkout.start().await.unwrap_err();
    assert!(matches!(err, CheckoutError::CartChanged));
    assert_eq!(f.checkout.step(), CheckoutStep::Idle);
    assert_eq!(f.cart.version(), Some(CartVersion::new(server)));

    let state = f.checkout.start().await.unwrap();
    assert_eq!(state.session().unwrap().cart_version.as_u64(), server);
    assert_eq!(f.backend.hits("POST", "/checkout/start"), 3);
}

#[tokio::test]
async fn test_in_flight_result_discarded_after_restart() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    f.backend
        .delay_next("PUT", "/address", Duration::from_millis(300));

    let (address_set, restarted) = tokio::join!(f.checkout.set_address(address()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.checkout.start().await
    });

    assert!(matches!(address_set, Err(CheckoutError::Superseded)));
    let restarted = restarted.unwrap();
    let state = f.checkout.state();
    assert_eq!(state.step(), CheckoutStep::Started);
    assert_eq!(state.session().unwrap().id, restarted.session().unwrap().id);
    assert!(state.destination().is_none());
    // The slow request did reach the backend; only its result was dropped.
    assert_eq!(f.backend.hits("PUT", "/address"), 1);
}

#[tokio::test]
async fn test_in_flight_result_discarded_after_invalidate() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    f.backend
        .delay_next("PUT", "/address", Duration::from_millis(300));

    let (address_set, ()) = tokio::join!(f.checkout.set_address(address()), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.checkout.invalidate();
    });

    assert!(matches!(address_set, Err(CheckoutError::Superseded)));
    assert_eq!(f.checkout.step(), CheckoutStep::Idle);
}

#[tokio::test]
async fn test_replaced_cart_store_rebuilds_controller() {
    let backend = MockBackend::start().await.unwrap();
    let state = AppState::new(storefront_config(&backend, 0)).unwrap();
    let cart = state.carts().create(add(1, 1)).await.unwrap();

    let first = state.checkout(Arc::clone(&cart)).await;
    let again = state.checkout(Arc::clone(&cart)).await;
    assert!(Arc::ptr_eq(&first, &again));

    // A store rebuilt for the same token, as after the registry evicted it.
    let api = ApiClient::new(&backend.backend_config()).unwrap();
    let rebuilt = CartRegistry::new(CartClient::new(api))
        .open(cart.token())
        .await;
    assert!(!Arc::ptr_eq(&rebuilt, &cart));

    let second = state.checkout(Arc::clone(&rebuilt)).await;
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(second.cart(), &rebuilt));
    assert!(Arc::ptr_eq(&state.checkout(Arc::clone(&rebuilt)).await, &second));

    let started = second.start().await.unwrap();
    assert_eq!(started.session().unwrap().cart_version.as_u64(), 1);
}

#[tokio::test]
async fn test_expired_session_resets_checkout() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    f.backend.expire_sessions();

    let err = f.checkout.refresh().await.unwrap_err();
    assert!(matches!(err, CheckoutError::Expired));
    assert_eq!(f.checkout.step(), CheckoutStep::Idle);
}

#[tokio::test]
async fn test_unknown_quote_rejected_locally() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    let state = f.checkout.set_address(address()).await.unwrap();

    let mut selection = quoted(&state, "courier");
    selection.quote_id = emporium_core::QuoteId::new("q-forged").unwrap();
    let err = f.checkout.set_shipping(selection).await.unwrap_err();

    assert!(matches!(err, CheckoutError::UnknownQuote));
    assert_eq!(f.backend.hits("PUT", "/shipping-method"), 0);
}

#[tokio::test]
async fn test_pickup_point_requires_warehouse() {
    let f = fixture().await;
    f.checkout.start().await.unwrap();
    let state = f.checkout.set_address(address()).await.unwrap();

    let mut selection = quoted(&state, "branch");
    let err = f.checkout.set_shipping(selection.clone()).await.unwrap_err();
    assert!(matches!(err, CheckoutError::WarehouseRequired(_)));

    selection.warehouse_ref = Some("s-kyiv-w1".to_string());
    let state = f.checkout.set_shipping(selection).await.unwrap();
    assert_eq!(state.session().unwrap().pricing.shipping.to_string(), "60");
}

#[tokio::test]
async fn test_loyalty_apply_and_remove() {
    let f = fixture().await;
    ready(&f, "cod").await;

    let err = f.checkout.apply_loyalty(150).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::LoyaltyLimit {
            requested: 150,
            max: 100
        }
    ));

    let state = f.checkout.apply_loyalty(40).await.unwrap();
    assert_eq!(state.step(), CheckoutStep::LoyaltyApplied);
    assert_eq!(state.loyalty_points(), Some(40));
    assert_eq!(
        state.session().unwrap().pricing.loyalty_discount.to_string(),
        "40"
    );

    let state = f.checkout.remove_loyalty().await.unwrap();
    assert_eq!(state.step(), CheckoutStep::PaymentSet);
    assert_eq!(state.loyalty_points(), None);
}

#[tokio::test]
async fn test_payment_change_drops_loyalty() {
    let f = fixture().await;
    ready(&f, "cod").await;
    f.checkout.apply_loyalty(10).await.unwrap();

    let state = f.checkout.set_payment("liqpay").await.unwrap();
    assert_eq!(state.step(), CheckoutStep::PaymentSet);
    assert_eq!(state.ready().unwrap().provider(), "liqpay");
    assert_eq!(state.loyalty_points(), None);

    // The points are released on the backend, not just forgotten locally.
    assert_eq!(f.backend.hits("DELETE", "/loyalty"), 1);
    assert_eq!(
        state.session().unwrap().pricing.loyalty_discount.to_string(),
        "0"
    );
}

#[tokio::test]
async fn test_payment_change_without_loyalty_sends_no_release() {
    let f = fixture().await;
    ready(&f, "cod").await;

    f.checkout.set_payment("liqpay").await.unwrap();
    assert_eq!(f.backend.hits("DELETE", "/loyalty"), 0);
}

#[tokio::test]
async fn test_empty_cart_cannot_start() {
    let f = fixture().await;
    for item in f.cart.snapshot().unwrap().items {
        f.cart
            .mutate(CartOp::RemoveItem { item_id: item.id }, ConflictPolicy::Abort)
            .await
            .unwrap();
    }

    let err = f.checkout.start().await.unwrap_err();
    assert!(matches!(err, CheckoutError::EmptyCart));
    assert_eq!(f.backend.hits("POST", "/checkout/start"), 0);
}

#[tokio::test]
async fn test_confirmed_checkout_is_terminal() {
    let f = fixture().await;
    ready(&f, "cod").await;
    f.checkout.confirm().await.unwrap();

    let err = f.checkout.confirm().await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::IllegalTransition {
            from: CheckoutStep::Confirmed,
            ..
        }
    ));
    assert_eq!(f.backend.orders_placed(), 1);
}
