//! Listing queries and catalog lookups against the mock backend.

#![allow(clippy::unwrap_used)]

use emporium_core::{BrandId, CategoryId};
use emporium_integration_tests::MockBackend;
use emporium_storefront::api::{ApiClient, ApiError};
use emporium_storefront::catalog::{CatalogClient, CatalogFilter, FilterKey, ListingScope, SortKey};

fn catalog(backend: &MockBackend) -> CatalogClient {
    CatalogClient::new(ApiClient::new(&backend.backend_config()).unwrap())
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[test]
fn test_query_round_trip_through_changes() {
    let mut filter = CatalogFilter::from_query("", ListingScope::Catalog);
    filter.toggle_brand(BrandId::new(3));
    filter.toggle_brand(BrandId::new(1));
    filter.toggle_attribute("color", "dark blue");
    filter.set_sort(SortKey::PriceAsc);
    filter.set_page(2);

    let query = filter.to_query_string();
    assert_eq!(query, "brand=1,3&attr[color]=dark%20blue&sort=price_asc&page=2");

    let parsed = CatalogFilter::from_query(&query, ListingScope::Catalog);
    assert_eq!(parsed, filter);
    assert_eq!(parsed.to_query_string(), query);
}

#[test]
fn test_pinned_category_removal_is_noop() {
    let scope = ListingScope::Category(CategoryId::new(7));
    let mut filter = CatalogFilter::from_query("brand=2&page=3", scope);
    let before = filter.to_query_string();

    filter.remove(&FilterKey::Category(CategoryId::new(7)));

    assert_eq!(filter.to_query_string(), before);
    assert_eq!(filter.page(), 3);
}

#[tokio::test]
async fn test_listing_sends_pinned_category_and_paging() {
    let backend = MockBackend::start().await.unwrap();
    let client = catalog(&backend);
    let filter =
        CatalogFilter::from_query("brand=3,1&sort=price_desc&page=2", ListingScope::Category(CategoryId::new(7)));

    let listing = client.list_products(&filter, 24).await.unwrap();
    assert_eq!(listing.meta.current_page, 2);
    assert_eq!(listing.items.len(), 3);

    let sent = backend.last_listing_query();
    assert_eq!(param(&sent, "category"), Some("7"));
    assert_eq!(param(&sent, "brand"), Some("1,3"));
    assert_eq!(param(&sent, "sort"), Some("price_desc"));
    assert_eq!(param(&sent, "page"), Some("2"));
    assert_eq!(param(&sent, "per_page"), Some("24"));
}

#[tokio::test]
async fn test_listings_are_cached_except_searches() {
    let backend = MockBackend::start().await.unwrap();
    let client = catalog(&backend);

    let browse = CatalogFilter::from_query("brand=1", ListingScope::Catalog);
    client.list_products(&browse, 24).await.unwrap();
    client.list_products(&browse, 24).await.unwrap();
    assert_eq!(backend.hits("GET", "/api/v1/catalog/products"), 1);

    let search = CatalogFilter::from_query("q=shirt", ListingScope::Catalog);
    client.list_products(&search, 24).await.unwrap();
    client.list_products(&search, 24).await.unwrap();
    assert_eq!(backend.hits("GET", "/api/v1/catalog/products"), 3);
}

#[tokio::test]
async fn test_product_and_category_lookup() {
    let backend = MockBackend::start().await.unwrap();
    let client = catalog(&backend);

    let product = client.product("linen-shirt").await.unwrap();
    assert_eq!(product.variants.len(), 1);
    assert_eq!(product.category_id, Some(CategoryId::new(7)));

    let category = client.category("shirts").await.unwrap();
    assert_eq!(category.id, CategoryId::new(7));

    let err = client.product("no-such-thing").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}
