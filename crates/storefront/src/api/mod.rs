//! Client for the backend REST API (`/api/v1`).
//!
//! # Architecture
//!
//! - One `reqwest::Client` shared by every domain client (cart, checkout,
//!   catalog, shipping, payments)
//! - Responses are wrapped in a `{"data": ...}` envelope
//! - Non-success responses are classified into [`ApiError`] in one place
//! - A rejected CSRF token (HTTP 419) triggers one refresh of the
//!   `XSRF-TOKEN` cookie and one retry; nothing else is retried here
//!
//! # Example
//!
//! ```rust,ignore
//! let api = ApiClient::new(&config.api)?;
//! let cart: ApiResponse<Cart> = api
//!     .send(ApiRequest::get("/api/v1/cart").cart_token(&token))
//!     .await?;
//! ```

mod error;

pub use error::{
    ApiError, CODE_CART_CHANGED, CODE_CHECKOUT_EXPIRED, CSRF_MISMATCH_STATUS, FieldErrors,
};

use std::sync::{Arc, RwLock};
use std::time::Duration;

use emporium_core::{CartToken, CartVersion, IdempotencyKey};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, ETAG, HeaderMap, HeaderValue, SET_COOKIE,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::config::BackendConfig;

/// Header carrying the cart token.
pub const X_CART_TOKEN: &str = "X-Cart-Token";
/// Header carrying the idempotency key of a mutating request.
pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
/// Header carrying the display currency.
pub const X_CURRENCY: &str = "X-Currency";
/// Header echoing the CSRF cookie value.
pub const X_XSRF_TOKEN: &str = "X-XSRF-TOKEN";

/// Path that (re)issues the `XSRF-TOKEN` cookie.
const CSRF_COOKIE_PATH: &str = "/sanctum/csrf-cookie";
/// Name of the CSRF cookie.
const XSRF_COOKIE: &str = "XSRF-TOKEN";

// =============================================================================
// Request / Response
// =============================================================================

/// A backend request that can be sent more than once.
///
/// Built up front (instead of a `reqwest::RequestBuilder`) so the CSRF
/// refresh path can replay it unchanged.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT` request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH` request.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add several query parameters.
    #[must_use]
    pub fn query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Scope the request to a cart.
    #[must_use]
    pub fn cart_token(self, token: &CartToken) -> Self {
        self.header(X_CART_TOKEN, token.as_str())
    }

    /// Require the cart to still be at `version`.
    #[must_use]
    pub fn if_match(self, version: CartVersion) -> Self {
        self.header("If-Match", version.to_if_match())
    }

    /// Make the request safe to replay.
    #[must_use]
    pub fn idempotency_key(self, key: &IdempotencyKey) -> Self {
        self.header(IDEMPOTENCY_KEY, key.as_str())
    }

    /// Attach a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Path relative to the backend base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value of a header set on this request.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A decoded backend response.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// Contents of the `data` envelope.
    pub data: T,
    /// Response headers.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Version carried in the `ETag` header, if any.
    #[must_use]
    pub fn etag_version(&self) -> Option<CartVersion> {
        self.headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .and_then(CartVersion::parse_etag)
    }
}

#[derive(serde::Deserialize)]
struct Envelope<T> {
    data: T,
}

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the backend REST API.
///
/// Cheap to clone; clones share the connection pool and CSRF token.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: String,
    xsrf_token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns an error if a default header is invalid or the HTTP client
    /// fails to build.
    pub fn new(config: &BackendConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.locale)
                .map_err(|e| ApiError::InvalidRequest(format!("invalid locale: {e}")))?,
        );
        headers.insert(X_CURRENCY, HeaderValue::from_static(config.currency.code()));

        if let Some(token) = config.api_token() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ApiError::InvalidRequest(format!("invalid API token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                xsrf_token: RwLock::new(None),
            }),
        })
    }

    /// Backend base URL (no trailing slash).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Send a request and decode the `data` envelope of the response.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ApiError`] for non-success statuses, transport
    /// failures, or bodies that do not decode as `T`.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<ApiResponse<T>, ApiError> {
        let response = self.dispatch(&request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        if !status.is_success() {
            let err = error::classify(status, &headers, &body);
            warn!(status = %status, error = %err, "Backend request failed");
            return Err(err);
        }

        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %body.chars().take(500).collect::<String>(),
                "Failed to parse backend response"
            );
            ApiError::Parse(e)
        })?;

        Ok(ApiResponse {
            data: envelope.data,
            headers,
        })
    }

    /// Send a request whose response body is irrelevant.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ApiError`] for non-success statuses.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send_empty(&self, request: ApiRequest) -> Result<HeaderMap, ApiError> {
        let response = self.dispatch(&request).await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            return Ok(headers);
        }

        let body = response.text().await?;
        let err = error::classify(status, &headers, &body);
        warn!(status = %status, error = %err, "Backend request failed");
        Err(err)
    }

    /// Send once; on a CSRF rejection refresh the token and send once more.
    async fn dispatch(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let response = self.send_once(request).await?;
        if response.status().as_u16() != CSRF_MISMATCH_STATUS {
            return Ok(response);
        }

        debug!("CSRF token rejected, refreshing and retrying once");
        self.refresh_csrf_token().await?;
        self.send_once(request).await
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.inner.base_url, request.path);
        let mut builder = self.inner.client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(token) = self.xsrf_token() {
            builder = builder.header(X_XSRF_TOKEN, token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }

    fn xsrf_token(&self) -> Option<String> {
        self.inner
            .xsrf_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Fetch a fresh `XSRF-TOKEN` cookie and remember its value.
    async fn refresh_csrf_token(&self) -> Result<(), ApiError> {
        let url = format!("{}{CSRF_COOKIE_PATH}", self.inner.base_url);
        let response = self.inner.client.get(&url).send().await?;

        if response.status() != StatusCode::NO_CONTENT && !response.status().is_success() {
            return Err(ApiError::CsrfMismatch);
        }

        let token = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(xsrf_from_set_cookie)
            .ok_or(ApiError::CsrfMismatch)?;

        if let Ok(mut guard) = self.inner.xsrf_token.write() {
            *guard = Some(token);
        }
        Ok(())
    }
}

/// Extract the decoded `XSRF-TOKEN` value from a `Set-Cookie` header.
fn xsrf_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    if name != XSRF_COOKIE || value.is_empty() {
        return None;
    }
    urlencoding::decode(value).ok().map(|v| v.into_owned())
}
