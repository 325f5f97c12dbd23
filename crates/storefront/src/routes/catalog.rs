//! Catalog route handlers: listings, category pages, product pages.
//!
//! Listing pages read their whole state from the query string through
//! [`CatalogFilter`] and hand back canonical URLs for every follow-up
//! action (remove a filter, change sort, next page), so links and the
//! browser's back button always agree with what is shown.

use axum::{
    Json,
    extract::{Path, RawQuery, State},
};
use emporium_core::{CurrencyCode, Money, ProductId, VariantId};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::instrument;

use crate::catalog::{
    CatalogFilter, Category, Facet, FilterKey, ListingScope, Product, ProductListing,
    ProductSummary, SortKey,
};
use crate::error::Result;
use crate::state::AppState;

/// Product card in a listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProductCardView {
    pub id: ProductId,
    pub name: String,
    pub url: String,
    pub price: String,
    pub old_price: Option<String>,
    pub image_url: Option<String>,
    pub brand: Option<String>,
    pub in_stock: bool,
}

impl From<&ProductSummary> for ProductCardView {
    fn from(product: &ProductSummary) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            url: format!("/product/{}", product.slug),
            price: Money::new(product.price, product.currency).display(),
            old_price: product
                .old_price
                .map(|p| Money::new(p, product.currency).display()),
            image_url: product.image_url.clone(),
            brand: product.brand.clone(),
            in_stock: product.in_stock,
        }
    }
}

/// An applied filter with the link that removes it.
#[derive(Debug, Clone, Serialize)]
pub struct FilterChipView {
    pub filter: FilterKey,
    pub remove_url: String,
}

/// A sort choice with the link that applies it.
#[derive(Debug, Clone, Serialize)]
pub struct SortOptionView {
    pub key: SortKey,
    pub selected: bool,
    pub url: String,
}

/// Pagination links.
#[derive(Debug, Clone, Serialize)]
pub struct PaginationView {
    pub current_page: u32,
    pub last_page: u32,
    pub total: u64,
    pub prev_url: Option<String>,
    pub next_url: Option<String>,
}

/// A product listing page.
#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    pub url: String,
    pub category: Option<Category>,
    pub filter: CatalogFilter,
    pub active_filters: Vec<FilterChipView>,
    pub clear_url: String,
    pub sort_options: Vec<SortOptionView>,
    pub products: Vec<ProductCardView>,
    pub facets: Vec<Facet>,
    pub pagination: PaginationView,
}

/// Variant row on a product page.
#[derive(Debug, Clone, Serialize)]
pub struct VariantView {
    pub id: VariantId,
    pub sku: String,
    pub name: String,
    pub price: String,
    pub old_price: Option<String>,
    pub in_stock: bool,
}

/// A product page.
#[derive(Debug, Clone, Serialize)]
pub struct ProductView {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub images: Vec<String>,
    pub from_price: Option<String>,
    pub variants: Vec<VariantView>,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        let display = |amount: Decimal| Money::new(amount, product.currency).display();
        Self {
            id: product.id,
            name: product.name.clone(),
            description: product.description.clone(),
            brand: product.brand.as_ref().map(|b| b.name.clone()),
            images: product.images.clone(),
            from_price: product.from_price().map(display),
            variants: product
                .variants
                .iter()
                .map(|v| VariantView {
                    id: v.id,
                    sku: v.sku.clone(),
                    name: v.name.clone(),
                    price: display(v.price),
                    old_price: v.old_price.map(display),
                    in_stock: v.in_stock,
                })
                .collect(),
        }
    }
}

/// `path?query`, or just `path` when the filter is at its defaults.
fn listing_url(path: &str, filter: &CatalogFilter) -> String {
    let query = filter.to_query_string();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{query}")
    }
}

fn listing_view(
    path: &str,
    category: Option<Category>,
    filter: CatalogFilter,
    listing: &ProductListing,
) -> ListingView {
    let active_filters = filter
        .active_filters()
        .into_iter()
        .map(|key| {
            let mut without = filter.clone();
            without.remove(&key);
            FilterChipView {
                remove_url: listing_url(path, &without),
                filter: key,
            }
        })
        .collect();

    let mut cleared = filter.clone();
    cleared.clear();

    let sort_options = SortKey::ALL
        .into_iter()
        .map(|key| {
            let mut sorted = filter.clone();
            sorted.set_sort(key);
            SortOptionView {
                key,
                selected: key == filter.sort(),
                url: listing_url(path, &sorted),
            }
        })
        .collect();

    let page_url = |page: u32| {
        let mut paged = filter.clone();
        paged.set_page(page);
        listing_url(path, &paged)
    };
    let meta = listing.meta;
    let pagination = PaginationView {
        current_page: meta.current_page,
        last_page: meta.last_page,
        total: meta.total,
        prev_url: (meta.current_page > 1).then(|| page_url(meta.current_page - 1)),
        next_url: (meta.current_page < meta.last_page).then(|| page_url(meta.current_page + 1)),
    };

    ListingView {
        url: listing_url(path, &filter),
        category,
        active_filters,
        clear_url: listing_url(path, &cleared),
        sort_options,
        products: listing.items.iter().map(ProductCardView::from).collect(),
        facets: listing.facets.clone(),
        pagination,
        filter,
    }
}

fn apply_default_currency(filter: &mut CatalogFilter, default: CurrencyCode) {
    if filter.currency() == Some(default) {
        filter.set_currency(None);
    }
}

/// Full catalog listing.
#[instrument(skip(state))]
pub async fn index(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<ListingView>> {
    let mut filter = CatalogFilter::from_query(query.as_deref().unwrap_or(""), ListingScope::Catalog);
    apply_default_currency(&mut filter, state.config().backend.currency);

    let listing = state
        .catalog()
        .list_products(&filter, state.config().page_size)
        .await?;
    Ok(Json(listing_view("/catalog", None, filter, &listing)))
}

/// Category listing. The category is pinned and never appears in the query.
#[instrument(skip(state))]
pub async fn category(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<ListingView>> {
    let category = state.catalog().category(&slug).await?;
    let mut filter = CatalogFilter::from_query(
        query.as_deref().unwrap_or(""),
        ListingScope::Category(category.id),
    );
    apply_default_currency(&mut filter, state.config().backend.currency);

    let listing = state
        .catalog()
        .list_products(&filter, state.config().page_size)
        .await?;
    let path = format!("/category/{}", category.slug);
    Ok(Json(listing_view(&path, Some(category), filter, &listing)))
}

/// Product page.
#[instrument(skip(state))]
pub async fn product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ProductView>> {
    let product = state.catalog().product(&slug).await?;
    Ok(Json(ProductView::from(&product)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::PageMeta;
    use emporium_core::{BrandId, CategoryId};

    fn listing(current_page: u32, last_page: u32) -> ProductListing {
        ProductListing {
            items: Vec::new(),
            meta: PageMeta {
                current_page,
                last_page,
                per_page: 24,
                total: 100,
            },
            facets: Vec::new(),
        }
    }

    #[test]
    fn test_remove_urls_reset_page() {
        let filter = CatalogFilter::from_query("brand=2,3&page=2", ListingScope::Catalog);
        let view = listing_view("/catalog", None, filter, &listing(2, 5));

        let chip = view
            .active_filters
            .iter()
            .find(|c| c.filter == FilterKey::Brand(BrandId::new(2)))
            .unwrap();
        assert_eq!(chip.remove_url, "/catalog?brand=3");
        assert_eq!(view.clear_url, "/catalog");
        assert_eq!(view.url, "/catalog?brand=2,3&page=2");
    }

    #[test]
    fn test_pagination_links_keep_filters() {
        let filter = CatalogFilter::from_query("q=mug&page=2", ListingScope::Catalog);
        let view = listing_view("/catalog", None, filter, &listing(2, 3));
        assert_eq!(view.pagination.prev_url.as_deref(), Some("/catalog?q=mug"));
        assert_eq!(
            view.pagination.next_url.as_deref(),
            Some("/catalog?q=mug&page=3")
        );
    }

    #[test]
    fn test_category_listing_has_no_pinned_chip() {
        let scope = ListingScope::Category(CategoryId::new(9));
        let filter = CatalogFilter::from_query("", scope);
        let view = listing_view("/category/mugs", None, filter, &listing(1, 1));
        assert!(view.active_filters.is_empty());
        assert_eq!(view.url, "/category/mugs");
        assert!(view.pagination.next_url.is_none());
    }

    #[test]
    fn test_sort_options_mark_selected() {
        let filter = CatalogFilter::from_query("sort=rating", ListingScope::Catalog);
        let view = listing_view("/catalog", None, filter, &listing(1, 1));
        let selected: Vec<_> = view.sort_options.iter().filter(|o| o.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].key, SortKey::Rating);
        let newest = view
            .sort_options
            .iter()
            .find(|o| o.key == SortKey::Newest)
            .unwrap();
        assert_eq!(newest.url, "/catalog");
    }
}
