//! Versioned cart mutations against the mock backend.

#![allow(clippy::unwrap_used)]

use emporium_core::{CartVersion, IdempotencyKey, VariantId};
use emporium_integration_tests::MockBackend;
use emporium_storefront::api::{ApiClient, ApiError};
use emporium_storefront::cart::{CartClient, CartEvent, CartOp, CartRegistry, ConflictPolicy};

fn registry(backend: &MockBackend) -> CartRegistry {
    let api = ApiClient::new(&backend.backend_config()).unwrap();
    CartRegistry::new(CartClient::new(api))
}

fn add(variant: i64, quantity: u32) -> CartOp {
    CartOp::AddItem {
        variant_id: VariantId::new(variant),
        quantity,
    }
}

#[tokio::test]
async fn test_first_add_creates_cart() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);

    let store = carts.create(add(1, 2)).await.unwrap();
    let cart = store.snapshot().unwrap();

    assert_eq!(cart.version, CartVersion::new(1));
    assert_eq!(cart.item_count(), 2);
    assert_eq!(cart.totals.subtotal.to_string(), "2400");
    assert!(backend.cart_exists(store.token().as_str()));
}

#[tokio::test]
async fn test_stale_version_conflict_is_surfaced() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let store = carts.create(add(1, 1)).await.unwrap();

    // Another tab edits the cart.
    let server = backend.touch_cart(store.token().as_str()).unwrap();

    let err = store
        .mutate(add(2, 1), ConflictPolicy::Abort)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::VersionConflict { current: Some(v) } if v == CartVersion::new(server)
    ));

    // Nothing merged; the snapshot now mirrors the server.
    let snapshot = store.snapshot().unwrap();
    assert_eq!(snapshot.version, CartVersion::new(server));
    assert_eq!(snapshot.items.len(), 1);
    assert_eq!(backend.cart_version(store.token().as_str()), Some(server));
}

#[tokio::test]
async fn test_retry_once_applies_on_fresh_version() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let store = carts.create(add(1, 1)).await.unwrap();
    backend.touch_cart(store.token().as_str()).unwrap();

    let cart = store
        .mutate(add(2, 1), ConflictPolicy::RetryOnce)
        .await
        .unwrap();

    assert_eq!(cart.version, CartVersion::new(3));
    assert_eq!(cart.items.len(), 2);
    // create, rejected attempt, retry
    assert_eq!(backend.hits("POST", "/api/v1/cart/items"), 3);
}

#[tokio::test]
async fn test_each_mutation_bumps_version() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let store = carts.create(add(1, 1)).await.unwrap();

    let cart = store.mutate(add(2, 1), ConflictPolicy::Abort).await.unwrap();
    assert_eq!(cart.version, CartVersion::new(2));

    let socks = cart.items.iter().find(|i| i.variant_id == VariantId::new(2)).unwrap();
    let cart = store
        .mutate(
            CartOp::UpdateQuantity {
                item_id: socks.id,
                quantity: 3,
            },
            ConflictPolicy::Abort,
        )
        .await
        .unwrap();
    assert_eq!(cart.version, CartVersion::new(3));
    assert_eq!(cart.item_count(), 4);

    let cart = store
        .mutate(
            CartOp::ApplyPromo {
                code: " save50 ".to_string(),
            },
            ConflictPolicy::Abort,
        )
        .await
        .unwrap();
    assert_eq!(cart.version, CartVersion::new(4));
    assert_eq!(cart.totals.discount.to_string(), "50");
}

#[tokio::test]
async fn test_zero_quantity_is_sent_as_removal() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let store = carts.create(add(1, 1)).await.unwrap();
    store.mutate(add(2, 1), ConflictPolicy::Abort).await.unwrap();
    let line = store.snapshot().unwrap().items[0].id;

    let cart = store
        .mutate(
            CartOp::UpdateQuantity {
                item_id: line,
                quantity: 0,
            },
            ConflictPolicy::Abort,
        )
        .await
        .unwrap();

    assert!(cart.item(line).is_none());
    assert_eq!(backend.hits("DELETE", &format!("/items/{line}")), 1);
    assert_eq!(backend.hits("PATCH", "/items"), 0);
}

#[tokio::test]
async fn test_replayed_key_does_not_apply_twice() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let store = carts.create(add(1, 1)).await.unwrap();
    let client = carts.client();

    let key = IdempotencyKey::generate();
    let version = CartVersion::new(1);
    let first = client
        .mutate(Some((store.token(), version)), &add(1, 1), &key)
        .await
        .unwrap();
    let second = client
        .mutate(Some((store.token(), version)), &add(1, 1), &key)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.item_count(), 2);
    assert_eq!(backend.cart_version(store.token().as_str()), Some(2));
}

#[tokio::test]
async fn test_validation_errors_keep_fields() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);

    let err = carts.create(add(99, 1)).await.err().unwrap();
    let fields = err.field_errors().unwrap();
    assert!(fields.contains_key("variant_id"));
}

#[tokio::test]
async fn test_accepted_mutations_are_announced() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let mut events = carts.subscribe();

    let store = carts.create(add(1, 1)).await.unwrap();
    store.mutate(add(3, 1), ConflictPolicy::Abort).await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        CartEvent::Changed {
            token: store.token().clone(),
            version: CartVersion::new(1),
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        CartEvent::Changed {
            token: store.token().clone(),
            version: CartVersion::new(2),
        }
    );
}

#[tokio::test]
async fn test_unknown_cart_is_not_found() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let token = emporium_core::CartToken::new("cart-missing").unwrap();

    let err = carts.open(&token).await.load().await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_mutations_are_serialised() {
    let backend = MockBackend::start().await.unwrap();
    let carts = registry(&backend);
    let store = carts.create(add(1, 1)).await.unwrap();
    let start = store.version().unwrap();

    // Abort would surface a conflict if both requests carried the same version.
    let (a, b) = tokio::join!(
        store.mutate(add(2, 1), ConflictPolicy::Abort),
        store.mutate(add(3, 1), ConflictPolicy::Abort),
    );
    let mut versions = vec![a.unwrap().version, b.unwrap().version];
    versions.sort();

    assert_eq!(
        versions,
        vec![
            CartVersion::new(start.as_u64() + 1),
            CartVersion::new(start.as_u64() + 2)
        ]
    );
    assert_eq!(store.version(), Some(CartVersion::new(start.as_u64() + 2)));
    assert_eq!(store.snapshot().unwrap().items.len(), 3);
    assert_eq!(backend.hits("GET", "/api/v1/cart"), 0);
}
