//! Per-cart state containers and the cart change bus.
//!
//! A [`CartStore`] mirrors one cart's latest snapshot and is the only path
//! through which that cart is mutated: mutations are serialised behind an
//! async mutex, so two mutating requests for the same token are never in
//! flight at once and each one carries the version returned by the previous.
//!
//! Every accepted mutation is announced on a broadcast bus as a
//! [`CartEvent`]; checkout controllers bound to the cart listen there and
//! throw their session away when the cart moves on.

use std::sync::Arc;
use std::time::Duration;

use emporium_core::{CartToken, CartVersion, IdempotencyKey};
use moka::future::Cache;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{info, instrument, warn};

use super::{Cart, CartClient, CartOp};
use crate::api::ApiError;
use crate::store::Store;

/// Capacity of the cart event bus before slow receivers start lagging.
const EVENT_BUS_CAPACITY: usize = 256;

/// Carts idle for longer than this are dropped from memory.
const STORE_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A change to a cart, as seen by other components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEvent {
    /// A mutation was accepted and the cart is now at `version`.
    Changed {
        /// Cart that changed.
        token: CartToken,
        /// New version.
        version: CartVersion,
    },
    /// The cart was discarded locally (an order was placed from it).
    Cleared {
        /// Cart that was discarded.
        token: CartToken,
    },
}

impl CartEvent {
    /// Cart the event is about.
    #[must_use]
    pub const fn token(&self) -> &CartToken {
        match self {
            Self::Changed { token, .. } | Self::Cleared { token } => token,
        }
    }
}

/// What to do when a mutation hits a version conflict.
///
/// In both cases the latest snapshot is fetched first; no merge is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Surface the conflict to the caller.
    #[default]
    Abort,
    /// Re-send the same operation once against the fresh version.
    RetryOnce,
}

// =============================================================================
// CartStore
// =============================================================================

/// Client-side state container for one cart.
pub struct CartStore {
    token: CartToken,
    client: CartClient,
    events: broadcast::Sender<CartEvent>,
    snapshot: Store<Option<Cart>>,
    mutation: Mutex<()>,
}

impl CartStore {
    fn new(
        token: CartToken,
        client: CartClient,
        events: broadcast::Sender<CartEvent>,
        snapshot: Option<Cart>,
    ) -> Self {
        Self {
            token,
            client,
            events,
            snapshot: Store::new(snapshot),
            mutation: Mutex::new(()),
        }
    }

    /// Token of the cart this store mirrors.
    #[must_use]
    pub const fn token(&self) -> &CartToken {
        &self.token
    }

    /// Latest known snapshot, if one has been loaded.
    #[must_use]
    pub fn snapshot(&self) -> Option<Cart> {
        self.snapshot.get()
    }

    /// Latest known version, if a snapshot has been loaded.
    #[must_use]
    pub fn version(&self) -> Option<CartVersion> {
        self.snapshot.with(|cart| cart.as_ref().map(|c| c.version))
    }

    /// Observe snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Cart>> {
        self.snapshot.subscribe()
    }

    /// Fetch the latest snapshot from the backend.
    ///
    /// A response older than the snapshot already held (possible when a
    /// mutation finished while this request was in flight) is not stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails.
    #[instrument(skip(self), fields(token = %self.token))]
    pub async fn load(&self) -> Result<Cart, ApiError> {
        let cart = self.client.get_cart(&self.token).await?;
        self.snapshot.update(|current| {
            let newer = current
                .as_ref()
                .is_none_or(|held| held.version <= cart.version);
            if newer {
                *current = Some(cart.clone());
            }
        });
        Ok(cart)
    }

    /// Apply a mutation with the last-known version as precondition.
    ///
    /// Mutations on the same store run one at a time. On a version conflict
    /// the latest snapshot is fetched and stored, then `policy` decides
    /// whether to surface the conflict or retry once with the fresh version
    /// (reusing the same idempotency key).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::VersionConflict`] when the conflict is not
    /// resolved, or any other backend error. The stored snapshot is left
    /// untouched by failed mutations other than conflicts.
    #[instrument(skip(self, op), fields(token = %self.token, op = op.name()))]
    pub async fn mutate(&self, op: CartOp, policy: ConflictPolicy) -> Result<Cart, ApiError> {
        let op = op.normalized();
        let _serialised = self.mutation.lock().await;

        let version = match self.version() {
            Some(version) => version,
            None => self.load().await?.version,
        };
        let key = IdempotencyKey::generate();

        match self
            .client
            .mutate(Some((&self.token, version)), &op, &key)
            .await
        {
            Ok(cart) => Ok(self.accept(cart)),
            Err(ApiError::VersionConflict { current }) => {
                warn!(
                    sent = %version,
                    server = ?current.map(|v| v.as_u64()),
                    "Cart version conflict, refetching"
                );
                let latest = self.refetch().await?;

                if policy == ConflictPolicy::Abort {
                    return Err(ApiError::VersionConflict {
                        current: Some(latest.version),
                    });
                }

                match self
                    .client
                    .mutate(Some((&self.token, latest.version)), &op, &key)
                    .await
                {
                    Ok(cart) => Ok(self.accept(cart)),
                    Err(ApiError::VersionConflict { .. }) => {
                        let latest = self.refetch().await?;
                        Err(ApiError::VersionConflict {
                            current: Some(latest.version),
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the local snapshot and announce that the cart is gone.
    ///
    /// Called once an order has been placed from this cart.
    pub fn forget(&self) {
        self.snapshot.set(None);
        info!(token = %self.token, "Cart cleared after order");
        let _ = self.events.send(CartEvent::Cleared {
            token: self.token.clone(),
        });
    }

    /// Unconditionally replace the snapshot with the backend's.
    async fn refetch(&self) -> Result<Cart, ApiError> {
        let cart = self.client.get_cart(&self.token).await?;
        self.snapshot.set(Some(cart.clone()));
        Ok(cart)
    }

    fn accept(&self, cart: Cart) -> Cart {
        self.snapshot.set(Some(cart.clone()));
        // No receivers is fine: nothing is bound to this cart yet.
        let _ = self.events.send(CartEvent::Changed {
            token: self.token.clone(),
            version: cart.version,
        });
        cart
    }
}

// =============================================================================
// CartRegistry
// =============================================================================

/// Process-wide registry of cart stores, keyed by token.
///
/// Cheap to clone. Holds the cart event bus.
#[derive(Clone)]
pub struct CartRegistry {
    inner: Arc<CartRegistryInner>,
}

struct CartRegistryInner {
    client: CartClient,
    events: broadcast::Sender<CartEvent>,
    stores: Cache<CartToken, Arc<CartStore>>,
}

impl CartRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(client: CartClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let stores = Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(STORE_IDLE_TIMEOUT)
            .build();

        Self {
            inner: Arc::new(CartRegistryInner {
                client,
                events,
                stores,
            }),
        }
    }

    /// Store for an existing cart. The snapshot is loaded lazily.
    pub async fn open(&self, token: &CartToken) -> Arc<CartStore> {
        let inner = &self.inner;
        inner
            .stores
            .get_with(token.clone(), async {
                Arc::new(CartStore::new(
                    token.clone(),
                    inner.client.clone(),
                    inner.events.clone(),
                    None,
                ))
            })
            .await
    }

    /// Create a cart with its first item and register its store.
    ///
    /// # Errors
    ///
    /// Returns an error if `op` cannot create a cart or the backend rejects it.
    #[instrument(skip(self, op), fields(op = op.name()))]
    pub async fn create(&self, op: CartOp) -> Result<Arc<CartStore>, ApiError> {
        let key = IdempotencyKey::generate();
        let cart = self.inner.client.mutate(None, &op, &key).await?;
        let token = cart.token.clone();
        info!(token = %token, "Cart created");

        let store = Arc::new(CartStore::new(
            token.clone(),
            self.inner.client.clone(),
            self.inner.events.clone(),
            None,
        ));
        store.accept(cart);
        self.inner.stores.insert(token, Arc::clone(&store)).await;
        Ok(store)
    }

    /// Subscribe to cart events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.inner.events.subscribe()
    }

    /// The underlying cart client.
    #[must_use]
    pub fn client(&self) -> &CartClient {
        &self.inner.client
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_token() {
        let token = CartToken::new("t").unwrap();
        let changed = CartEvent::Changed {
            token: token.clone(),
            version: CartVersion::new(2),
        };
        let cleared = CartEvent::Cleared {
            token: token.clone(),
        };
        assert_eq!(changed.token(), &token);
        assert_eq!(cleared.token(), &token);
    }

    #[test]
    fn test_default_policy_aborts() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Abort);
    }
}
