//! Listing filters and their query-string form.
//!
//! A [`CatalogFilter`] is the whole state of a product listing page and is
//! projected to and from the page URL's query string. The projection is
//! canonical: keys in a fixed order, multi-valued keys comma-joined in
//! ascending order without duplicates, defaults left out. Parsing a canonical
//! string and writing it back yields the same string.
//!
//! | Key | Value |
//! |---|---|
//! | `q` | search text |
//! | `category` | category ids |
//! | `brand` | brand ids |
//! | `price_min`, `price_max` | decimal bounds |
//! | `attr[<name>]` | attribute values, keys sorted by name |
//! | `sort` | sort key, omitted for `newest` |
//! | `page` | page number, omitted for 1 |
//! | `currency` | display currency |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use emporium_core::{BrandId, CategoryId, CurrencyCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const ATTR_PREFIX: &str = "attr[";

/// Which listing the filter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "category_id", rename_all = "snake_case")]
pub enum ListingScope {
    /// The full catalog.
    #[default]
    Catalog,
    /// A category page. The category lives in the path and is always applied.
    Category(CategoryId),
}

impl ListingScope {
    /// The pinned category, on category pages.
    #[must_use]
    pub const fn pinned(self) -> Option<CategoryId> {
        match self {
            Self::Catalog => None,
            Self::Category(id) => Some(id),
        }
    }
}

/// Listing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Newest first.
    #[default]
    Newest,
    /// Cheapest first.
    PriceAsc,
    /// Most expensive first.
    PriceDesc,
    /// Best sellers first.
    Popular,
    /// Best rated first.
    Rating,
    /// Alphabetical.
    NameAsc,
}

impl SortKey {
    /// Every sort key, in display order.
    pub const ALL: [Self; 6] = [
        Self::Newest,
        Self::PriceAsc,
        Self::PriceDesc,
        Self::Popular,
        Self::Rating,
        Self::NameAsc,
    ];

    /// Query-string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
            Self::Popular => "popular",
            Self::Rating => "rating",
            Self::NameAsc => "name_asc",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| format!("unknown sort key: {s}"))
    }
}

/// One removable filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "key", content = "value", rename_all = "snake_case")]
pub enum FilterKey {
    /// Search text.
    Search,
    /// One category.
    Category(CategoryId),
    /// One brand.
    Brand(BrandId),
    /// Lower price bound.
    PriceMin,
    /// Upper price bound.
    PriceMax,
    /// Both price bounds.
    Price,
    /// One attribute value.
    Attribute {
        /// Attribute name.
        name: String,
        /// Attribute value.
        value: String,
    },
    /// Every value of an attribute.
    AttributeAll(String),
}

/// Filter, sort, and pagination state of a product listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogFilter {
    scope: ListingScope,
    search: Option<String>,
    categories: BTreeSet<CategoryId>,
    brands: BTreeSet<BrandId>,
    price_min: Option<Decimal>,
    price_max: Option<Decimal>,
    attributes: BTreeMap<String, BTreeSet<String>>,
    sort: SortKey,
    page: u32,
    currency: Option<CurrencyCode>,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self::new(ListingScope::Catalog)
    }
}

impl CatalogFilter {
    /// Empty filter for `scope`.
    #[must_use]
    pub const fn new(scope: ListingScope) -> Self {
        Self {
            scope,
            search: None,
            categories: BTreeSet::new(),
            brands: BTreeSet::new(),
            price_min: None,
            price_max: None,
            attributes: BTreeMap::new(),
            sort: SortKey::Newest,
            page: 1,
            currency: None,
        }
    }

    /// Parse a query string (with or without a leading `?`).
    ///
    /// Unknown keys and malformed values are dropped. Repeated multi-valued
    /// keys are merged; for single-valued keys the last one wins.
    #[must_use]
    pub fn from_query(query: &str, scope: ListingScope) -> Self {
        let mut filter = Self::new(scope);
        let query = query.strip_prefix('?').unwrap_or(query);

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            if let Some(key) = decode(raw_key) {
                filter.apply_pair(&key, raw_value);
            }
        }
        filter
    }

    /// List values are split before decoding so encoded commas stay inside
    /// their value.
    fn apply_pair(&mut self, key: &str, raw: &str) {
        let value = || decode(raw).unwrap_or_default();
        match key {
            "q" => self.search = normalize_search(&value()),
            "category" => {
                let pinned = self.scope.pinned();
                self.categories.extend(
                    parse_ids::<CategoryId>(raw).filter(|id| Some(*id) != pinned),
                );
            }
            "brand" => self.brands.extend(parse_ids::<BrandId>(raw)),
            "price_min" => self.price_min = parse_price(&value()),
            "price_max" => self.price_max = parse_price(&value()),
            "sort" => self.sort = value().parse().unwrap_or_default(),
            "page" => {
                self.page = value()
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .filter(|p| *p >= 1)
                    .unwrap_or(1);
            }
            "currency" => self.currency = value().parse().ok(),
            _ => {
                if let Some(name) = key
                    .strip_prefix(ATTR_PREFIX)
                    .and_then(|rest| rest.strip_suffix(']'))
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                {
                    let values: BTreeSet<String> = split_list(raw)
                        .filter_map(decode)
                        .map(|v| v.trim().to_string())
                        .filter(|v| !v.is_empty())
                        .collect();
                    if !values.is_empty() {
                        self.attributes
                            .entry(name.to_string())
                            .or_default()
                            .extend(values);
                    }
                }
            }
        }
    }

    /// Canonical query string, without a leading `?`. Empty for the default
    /// filter.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();

        if let Some(search) = &self.search {
            parts.push(format!("q={}", urlencoding::encode(search)));
        }
        if !self.categories.is_empty() {
            parts.push(format!("category={}", join(&self.categories)));
        }
        if !self.brands.is_empty() {
            parts.push(format!("brand={}", join(&self.brands)));
        }
        if let Some(min) = self.price_min {
            parts.push(format!("price_min={min}"));
        }
        if let Some(max) = self.price_max {
            parts.push(format!("price_max={max}"));
        }
        for (name, values) in &self.attributes {
            let values: Vec<_> = values.iter().map(|v| urlencoding::encode(v)).collect();
            parts.push(format!(
                "{ATTR_PREFIX}{}]={}",
                urlencoding::encode(name),
                values.join(",")
            ));
        }
        if self.sort != SortKey::Newest {
            parts.push(format!("sort={}", self.sort));
        }
        if self.page > 1 {
            parts.push(format!("page={}", self.page));
        }
        if let Some(currency) = self.currency {
            parts.push(format!("currency={}", currency.code()));
        }

        parts.join("&")
    }

    /// Parameters for `GET /api/v1/catalog/products`. The pinned category is
    /// always included.
    #[must_use]
    pub fn backend_params(&self, per_page: u32) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let mut categories = self.categories.clone();
        categories.extend(self.scope.pinned());

        if let Some(search) = &self.search {
            params.push(("q".to_string(), search.clone()));
        }
        if !categories.is_empty() {
            params.push(("category".to_string(), join(&categories)));
        }
        if !self.brands.is_empty() {
            params.push(("brand".to_string(), join(&self.brands)));
        }
        if let Some(min) = self.price_min {
            params.push(("price_min".to_string(), min.to_string()));
        }
        if let Some(max) = self.price_max {
            params.push(("price_max".to_string(), max.to_string()));
        }
        for (name, values) in &self.attributes {
            params.push((format!("{ATTR_PREFIX}{name}]"), join(values)));
        }
        params.push(("sort".to_string(), self.sort.to_string()));
        params.push(("page".to_string(), self.page.to_string()));
        params.push(("per_page".to_string(), per_page.to_string()));
        if let Some(currency) = self.currency {
            params.push(("currency".to_string(), currency.code().to_string()));
        }
        params
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Listing this filter applies to.
    #[must_use]
    pub const fn scope(&self) -> ListingScope {
        self.scope
    }

    /// Search text.
    #[must_use]
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Selected categories, excluding the pinned one.
    #[must_use]
    pub const fn categories(&self) -> &BTreeSet<CategoryId> {
        &self.categories
    }

    /// Selected brands.
    #[must_use]
    pub const fn brands(&self) -> &BTreeSet<BrandId> {
        &self.brands
    }

    /// Price bounds.
    #[must_use]
    pub const fn price(&self) -> (Option<Decimal>, Option<Decimal>) {
        (self.price_min, self.price_max)
    }

    /// Selected attribute values by attribute name.
    #[must_use]
    pub const fn attributes(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.attributes
    }

    /// Sort order.
    #[must_use]
    pub const fn sort(&self) -> SortKey {
        self.sort
    }

    /// Current page, starting at 1.
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    /// Display currency override.
    #[must_use]
    pub const fn currency(&self) -> Option<CurrencyCode> {
        self.currency
    }

    /// Whether any removable filter is set.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        !self.active_filters().is_empty()
    }

    /// Every removable filter currently set, in query order.
    #[must_use]
    pub fn active_filters(&self) -> Vec<FilterKey> {
        let mut active = Vec::new();
        if self.search.is_some() {
            active.push(FilterKey::Search);
        }
        active.extend(self.categories.iter().copied().map(FilterKey::Category));
        active.extend(self.brands.iter().copied().map(FilterKey::Brand));
        if self.price_min.is_some() {
            active.push(FilterKey::PriceMin);
        }
        if self.price_max.is_some() {
            active.push(FilterKey::PriceMax);
        }
        for (name, values) in &self.attributes {
            active.extend(values.iter().map(|value| FilterKey::Attribute {
                name: name.clone(),
                value: value.clone(),
            }));
        }
        active
    }

    // =========================================================================
    // Changes (every filter change goes back to page 1)
    // =========================================================================

    /// Set or clear the search text.
    pub fn set_search(&mut self, search: Option<&str>) {
        self.search = search.and_then(normalize_search);
        self.page = 1;
    }

    /// Add or remove a category. The pinned category cannot be toggled.
    pub fn toggle_category(&mut self, id: CategoryId) {
        if Some(id) == self.scope.pinned() {
            return;
        }
        if !self.categories.remove(&id) {
            self.categories.insert(id);
        }
        self.page = 1;
    }

    /// Add or remove a brand.
    pub fn toggle_brand(&mut self, id: BrandId) {
        if !self.brands.remove(&id) {
            self.brands.insert(id);
        }
        self.page = 1;
    }

    /// Set both price bounds. Negative bounds are ignored.
    pub fn set_price(&mut self, min: Option<Decimal>, max: Option<Decimal>) {
        self.price_min = min.filter(|m| !m.is_sign_negative());
        self.price_max = max.filter(|m| !m.is_sign_negative());
        self.page = 1;
    }

    /// Add or remove one attribute value.
    pub fn toggle_attribute(&mut self, name: &str, value: &str) {
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            return;
        }
        let values = self.attributes.entry(name.to_string()).or_default();
        if !values.remove(value) {
            values.insert(value.to_string());
        }
        if values.is_empty() {
            self.attributes.remove(name);
        }
        self.page = 1;
    }

    /// Change the sort order.
    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
        self.page = 1;
    }

    /// Go to a page. Page numbers start at 1.
    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    /// Change the display currency.
    pub const fn set_currency(&mut self, currency: Option<CurrencyCode>) {
        self.currency = currency;
    }

    /// Remove one filter. Removing the pinned category does nothing.
    pub fn remove(&mut self, key: &FilterKey) {
        match key {
            FilterKey::Category(id) if Some(*id) == self.scope.pinned() => return,
            FilterKey::Search => self.search = None,
            FilterKey::Category(id) => {
                self.categories.remove(id);
            }
            FilterKey::Brand(id) => {
                self.brands.remove(id);
            }
            FilterKey::PriceMin => self.price_min = None,
            FilterKey::PriceMax => self.price_max = None,
            FilterKey::Price => {
                self.price_min = None;
                self.price_max = None;
            }
            FilterKey::Attribute { name, value } => {
                if let Some(values) = self.attributes.get_mut(name) {
                    values.remove(value);
                    if values.is_empty() {
                        self.attributes.remove(name);
                    }
                }
            }
            FilterKey::AttributeAll(name) => {
                self.attributes.remove(name);
            }
        }
        self.page = 1;
    }

    /// Remove every filter. Sort order and currency are kept.
    pub fn clear(&mut self) {
        self.search = None;
        self.categories.clear();
        self.brands.clear();
        self.price_min = None;
        self.price_max = None;
        self.attributes.clear();
        self.page = 1;
    }
}

fn decode(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|s| s.into_owned())
}

fn normalize_search(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|v| !v.is_empty())
}

fn parse_ids<T: FromStr>(raw: &str) -> impl Iterator<Item = T> {
    split_list(raw).filter_map(|v| decode(v)?.trim().parse().ok())
}

fn parse_price(value: &str) -> Option<Decimal> {
    value
        .trim()
        .parse::<Decimal>()
        .ok()
        .filter(|p| !p.is_sign_negative())
}

fn join<T: ToString>(values: &BTreeSet<T>) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_roundtrip() {
        for query in [
            "",
            "q=red%20mug",
            "category=3,12&brand=7",
            "price_min=100&price_max=250.50",
            "attr[color]=blue,red&attr[size]=XL&sort=price_asc&page=3",
            "q=tea&brand=1,2&attr[material]=clay&sort=rating&currency=USD",
        ] {
            let filter = CatalogFilter::from_query(query, ListingScope::Catalog);
            assert_eq!(filter.to_query_string(), query);
        }
    }

    #[test]
    fn test_canonicalises_order_and_duplicates() {
        let filter = CatalogFilter::from_query(
            "?page=2&brand=9,2,9&q=red+mug&attr[size]=M&attr[color]=red",
            ListingScope::Catalog,
        );
        assert_eq!(
            filter.to_query_string(),
            "q=red%20mug&brand=2,9&attr[color]=red&attr[size]=M&page=2"
        );
    }

    #[test]
    fn test_defaults_are_omitted() {
        let filter = CatalogFilter::from_query("sort=newest&page=1&q=", ListingScope::Catalog);
        assert_eq!(filter.to_query_string(), "");
        assert!(!filter.has_filters());
    }

    #[test]
    fn test_malformed_values_dropped() {
        let filter = CatalogFilter::from_query(
            "category=abc,4&price_min=-5&price_max=x&sort=cheapest&page=0&currency=XYZ&utm_source=ad",
            ListingScope::Catalog,
        );
        assert_eq!(filter.to_query_string(), "category=4");
    }

    #[test]
    fn test_pinned_category_never_in_query() {
        let scope = ListingScope::Category(CategoryId::new(5));
        let filter = CatalogFilter::from_query("category=5,8", scope);
        assert_eq!(filter.to_query_string(), "category=8");
        assert_eq!(filter.categories().len(), 1);
    }

    #[test]
    fn test_removing_pinned_category_is_noop() {
        let scope = ListingScope::Category(CategoryId::new(5));
        let mut filter = CatalogFilter::from_query("brand=2&page=4", scope);
        let before = filter.clone();

        filter.remove(&FilterKey::Category(CategoryId::new(5)));
        assert_eq!(filter, before);
        assert_eq!(filter.page(), 4);

        filter.toggle_category(CategoryId::new(5));
        assert_eq!(filter, before);
    }

    #[test]
    fn test_backend_params_include_pinned_category() {
        let scope = ListingScope::Category(CategoryId::new(5));
        let filter = CatalogFilter::from_query("category=8&attr[color]=red", scope);
        let params = filter.backend_params(24);

        assert!(params.contains(&("category".to_string(), "5,8".to_string())));
        assert!(params.contains(&("attr[color]".to_string(), "red".to_string())));
        assert!(params.contains(&("per_page".to_string(), "24".to_string())));
        assert!(params.contains(&("page".to_string(), "1".to_string())));
    }

    #[test]
    fn test_every_change_resets_page() {
        let base = CatalogFilter::from_query("brand=2&q=mug&page=5", ListingScope::Catalog);

        let mut f = base.clone();
        f.toggle_brand(BrandId::new(3));
        assert_eq!(f.page(), 1);

        let mut f = base.clone();
        f.set_search(Some("cup"));
        assert_eq!(f.page(), 1);

        let mut f = base.clone();
        f.remove(&FilterKey::Search);
        assert_eq!(f.page(), 1);

        let mut f = base.clone();
        f.set_sort(SortKey::PriceDesc);
        assert_eq!(f.page(), 1);

        let mut f = base;
        f.clear();
        assert_eq!(f.to_query_string(), "");
    }

    #[test]
    fn test_set_page_does_not_reset() {
        let mut filter = CatalogFilter::default();
        filter.set_page(3);
        assert_eq!(filter.to_query_string(), "page=3");
        filter.set_page(0);
        assert_eq!(filter.page(), 1);
    }

    #[test]
    fn test_attribute_toggle_and_remove() {
        let mut filter = CatalogFilter::default();
        filter.toggle_attribute("color", "red");
        filter.toggle_attribute("color", "blue");
        assert_eq!(filter.to_query_string(), "attr[color]=blue,red");

        filter.toggle_attribute("color", "red");
        filter.remove(&FilterKey::Attribute {
            name: "color".to_string(),
            value: "blue".to_string(),
        });
        assert!(filter.attributes().is_empty());
    }

    #[test]
    fn test_active_filters_in_query_order() {
        let filter = CatalogFilter::from_query(
            "q=mug&brand=2&price_max=100&attr[color]=red",
            ListingScope::Catalog,
        );
        assert_eq!(
            filter.active_filters(),
            vec![
                FilterKey::Search,
                FilterKey::Brand(BrandId::new(2)),
                FilterKey::PriceMax,
                FilterKey::Attribute {
                    name: "color".to_string(),
                    value: "red".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_special_characters_roundtrip() {
        let mut filter = CatalogFilter::default();
        filter.set_search(Some("50% off & more"));
        filter.toggle_attribute("fit", "slim, tall");
        let query = filter.to_query_string();
        let parsed = CatalogFilter::from_query(&query, ListingScope::Catalog);
        assert_eq!(parsed.search(), Some("50% off & more"));
        assert_eq!(parsed.to_query_string(), query);
    }
}
