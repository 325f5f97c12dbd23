//! Listing query commands.
//!
//! # Usage
//!
//! ```bash
//! em-cli filters normalize "brand=3,1&sort=price_asc"
//! ```

use emporium_core::CategoryId;
use emporium_storefront::catalog::query::{CatalogFilter, ListingScope};
use serde_json::json;

use super::{CommandError, print_json};

/// Default page size used when printing backend parameters.
const PER_PAGE: u32 = 24;

/// Parse a raw query and print its canonical form with the backend parameters.
pub fn normalize(query: &str, category: Option<i64>) -> Result<(), CommandError> {
    let scope = category.map_or(ListingScope::Catalog, |id| {
        ListingScope::Category(CategoryId::new(id))
    });
    let filter = CatalogFilter::from_query(query.trim_start_matches('?'), scope);

    let params: serde_json::Map<String, serde_json::Value> = filter
        .backend_params(PER_PAGE)
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect();

    print_json(&json!({
        "query": filter.to_query_string(),
        "backend_params": params,
        "has_filters": filter.has_filters(),
    }))
}
