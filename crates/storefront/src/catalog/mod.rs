//! Catalog client.
//!
//! Read-only product and category lookups against `/api/v1/catalog`.
//! Responses are cached for 5 minutes with `moka`; search results are not
//! cached.

mod cache;
pub mod query;

pub use query::{CatalogFilter, FilterKey, ListingScope, SortKey};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use emporium_core::{BrandId, CategoryId, CurrencyCode, ProductId, VariantId};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::{ApiClient, ApiError, ApiRequest};
use cache::{CacheKey, CacheValue};

const CATALOG_PATH: &str = "/api/v1/catalog";

// =============================================================================
// Catalog Types
// =============================================================================

/// A product as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    /// Product id.
    pub id: ProductId,
    /// URL slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Current price.
    pub price: Decimal,
    /// Price before discount, when discounted.
    #[serde(default)]
    pub old_price: Option<Decimal>,
    /// Currency of the prices.
    #[serde(default)]
    pub currency: CurrencyCode,
    /// Primary image.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Brand name.
    #[serde(default)]
    pub brand: Option<String>,
    /// Whether any variant can be ordered.
    #[serde(default)]
    pub in_stock: bool,
}

/// Pagination figures for a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    /// Current page, from 1.
    pub current_page: u32,
    /// Last page, from 1.
    pub last_page: u32,
    /// Items per page.
    pub per_page: u32,
    /// Total matching items.
    pub total: u64,
}

/// Filterable dimension offered for a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    /// Query key the facet maps to, e.g. `brand` or `attr[color]`.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Selectable values.
    #[serde(default)]
    pub values: Vec<FacetValue>,
}

/// One selectable facet value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    /// Value as written in the query.
    pub value: String,
    /// Display label.
    pub label: String,
    /// Products matching the value.
    #[serde(default)]
    pub count: u64,
}

/// One page of products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductListing {
    /// Products on this page.
    pub items: Vec<ProductSummary>,
    /// Pagination.
    pub meta: PageMeta,
    /// Facets for narrowing the listing.
    #[serde(default)]
    pub facets: Vec<Facet>,
}

/// A purchasable variant of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Variant id, used for add-to-cart.
    pub id: VariantId,
    /// Stock keeping unit.
    pub sku: String,
    /// Variant label.
    pub name: String,
    /// Current price.
    pub price: Decimal,
    /// Price before discount.
    #[serde(default)]
    pub old_price: Option<Decimal>,
    /// Whether the variant can be ordered.
    #[serde(default)]
    pub in_stock: bool,
    /// Attribute values, e.g. `color: red`.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Brand reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    /// Brand id.
    pub id: BrandId,
    /// Display name.
    pub name: String,
}

/// Full product page data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id.
    pub id: ProductId,
    /// URL slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Description (HTML from the backend).
    #[serde(default)]
    pub description: Option<String>,
    /// Brand.
    #[serde(default)]
    pub brand: Option<Brand>,
    /// Primary category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Currency of the prices.
    #[serde(default)]
    pub currency: CurrencyCode,
    /// Image URLs.
    #[serde(default)]
    pub images: Vec<String>,
    /// Variants.
    pub variants: Vec<Variant>,
}

impl Product {
    /// Variant with the given id.
    #[must_use]
    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Lowest price across in-stock variants.
    #[must_use]
    pub fn from_price(&self) -> Option<Decimal> {
        self.variants
            .iter()
            .filter(|v| v.in_stock)
            .map(|v| v.price)
            .min()
    }
}

/// A catalog category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category id.
    pub id: CategoryId,
    /// URL slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Parent category.
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
}

// =============================================================================
// CatalogClient
// =============================================================================

/// Client for the catalog endpoints.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct CatalogClient {
    inner: Arc<CatalogClientInner>,
}

struct CatalogClientInner {
    api: ApiClient,
    cache: Cache<CacheKey, CacheValue>,
}

impl CatalogClient {
    /// Create a catalog client.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            inner: Arc::new(CatalogClientInner { api, cache }),
        }
    }

    /// One page of products matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self, filter), fields(query = %filter.to_query_string()))]
    pub async fn list_products(
        &self,
        filter: &CatalogFilter,
        per_page: u32,
    ) -> Result<ProductListing, ApiError> {
        let params = filter.backend_params(per_page);
        let cache_key = CacheKey::Products(params.clone());
        let cacheable = filter.search().is_none();

        if cacheable
            && let Some(CacheValue::Products(listing)) = self.inner.cache.get(&cache_key).await
        {
            debug!("Cache hit for products");
            return Ok(listing);
        }

        let request = ApiRequest::get(format!("{CATALOG_PATH}/products")).query_pairs(params);
        let listing: ProductListing = self.inner.api.send(request).await?.data;

        if cacheable {
            self.inner
                .cache
                .insert(cache_key, CacheValue::Products(listing.clone()))
                .await;
        }
        Ok(listing)
    }

    /// Product by slug.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown slug.
    #[instrument(skip(self))]
    pub async fn product(&self, slug: &str) -> Result<Product, ApiError> {
        let cache_key = CacheKey::Product(slug.to_string());
        if let Some(CacheValue::Product(product)) = self.inner.cache.get(&cache_key).await {
            debug!("Cache hit for product");
            return Ok(*product);
        }

        let request = ApiRequest::get(format!(
            "{CATALOG_PATH}/products/{}",
            urlencoding::encode(slug)
        ));
        let product: Product = self.inner.api.send(request).await?.data;

        self.inner
            .cache
            .insert(cache_key, CacheValue::Product(Box::new(product.clone())))
            .await;
        Ok(product)
    }

    /// Category by slug.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] for an unknown slug.
    #[instrument(skip(self))]
    pub async fn category(&self, slug: &str) -> Result<Category, ApiError> {
        let cache_key = CacheKey::Category(slug.to_string());
        if let Some(CacheValue::Category(category)) = self.inner.cache.get(&cache_key).await {
            debug!("Cache hit for category");
            return Ok(category);
        }

        let request = ApiRequest::get(format!(
            "{CATALOG_PATH}/categories/{}",
            urlencoding::encode(slug)
        ));
        let category: Category = self.inner.api.send(request).await?.data;

        self.inner
            .cache
            .insert(cache_key, CacheValue::Category(category.clone()))
            .await;
        Ok(category)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_price_ignores_out_of_stock() {
        let product: Product = serde_json::from_value(serde_json::json!({
            "id": 1,
            "slug": "mug",
            "name": "Mug",
            "variants": [
                {"id": 10, "sku": "MUG-S", "name": "S", "price": "90.00", "in_stock": false},
                {"id": 11, "sku": "MUG-M", "name": "M", "price": "120.00", "in_stock": true},
                {"id": 12, "sku": "MUG-L", "name": "L", "price": "150.00", "in_stock": true}
            ]
        }))
        .unwrap();

        assert_eq!(product.from_price(), Some(Decimal::new(12000, 2)));
        assert_eq!(product.variant(VariantId::new(12)).unwrap().sku, "MUG-L");
        assert!(product.variant(VariantId::new(99)).is_none());
    }

    #[test]
    fn test_listing_facets_default_empty() {
        let listing: ProductListing = serde_json::from_value(serde_json::json!({
            "items": [],
            "meta": {"current_page": 1, "last_page": 1, "per_page": 24, "total": 0}
        }))
        .unwrap();
        assert!(listing.facets.is_empty());
    }
}
