//! Session module: the persisted token pair, its cookie-boundary carrier,
//! and the coalesced refresh machinery, partitioned per user identity.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::cache::ListingCache;
use crate::error::GatewayResult;

pub mod carrier;
pub mod google;
pub mod refresh;
pub mod store;
pub mod types;

pub use carrier::{CarrierError, MemoryCarrier, SessionCarrier};
pub use google::GoogleOAuth;
pub use refresh::{OAuthProvider, ProviderError, RefreshedToken, TokenRefresher};
pub use store::TokenStore;
pub use types::Session;

/// Everything owned by one logical user session: the token store, its
/// refresher, and the listing cache. No state is shared across sessions.
pub struct SessionState {
    pub store: TokenStore,
    pub refresher: TokenRefresher,
    pub cache: ListingCache,
}

/// Per-identity session lifecycle: created on login, dropped (with its cache
/// and persisted fields) on logout or account deletion.
pub struct SessionRegistry {
    provider: Arc<dyn OAuthProvider>,
    refresh_margin_secs: i64,
    refresh_timeout: Duration,
    sessions: DashMap<String, Arc<SessionState>>,
}

impl SessionRegistry {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        refresh_margin_secs: i64,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            refresh_margin_secs,
            refresh_timeout,
            sessions: DashMap::new(),
        }
    }

    /// Get or create the session state for `identity`, backed by `carrier`.
    pub fn open(&self, identity: &str, carrier: Arc<dyn SessionCarrier>) -> Arc<SessionState> {
        if let Some(existing) = self.sessions.get(identity) {
            return Arc::clone(existing.value());
        }

        let store = TokenStore::new(carrier);
        let refresher = TokenRefresher::new(
            store.clone(),
            Arc::clone(&self.provider),
            self.refresh_margin_secs,
            self.refresh_timeout,
        );
        let state = Arc::new(SessionState {
            store,
            refresher,
            cache: ListingCache::new(),
        });

        self.sessions
            .entry(identity.to_string())
            .or_insert_with(|| Arc::clone(&state))
            .value()
            .clone()
    }

    pub fn get(&self, identity: &str) -> Option<Arc<SessionState>> {
        self.sessions.get(identity).map(|e| Arc::clone(e.value()))
    }

    /// Destroy the session: persisted fields expired, cache dropped, entry
    /// removed. Used by logout and account deletion.
    pub fn close(&self, identity: &str) -> GatewayResult<()> {
        if let Some((_, state)) = self.sessions.remove(identity) {
            state.cache.invalidate_all();
            state.store.clear()?;
            log::info!("session for {} closed", identity);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopProvider;

    #[async_trait]
    impl OAuthProvider for NoopProvider {
        async fn exchange_refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshedToken, ProviderError> {
            Err(ProviderError::Http("unreachable in this test".into()))
        }
    }

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(NoopProvider), 30, Duration::from_secs(10))
    }

    #[test]
    fn open_is_idempotent_per_identity() {
        let registry = registry();
        let a = registry.open("user@example.com", Arc::new(MemoryCarrier::new()));
        let b = registry.open("user@example.com", Arc::new(MemoryCarrier::new()));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn close_clears_the_persisted_session() {
        let registry = registry();
        let carrier = Arc::new(MemoryCarrier::new());
        let state = registry.open("user@example.com", carrier);
        state
            .store
            .set(&Session {
                user_email: "user@example.com".into(),
                access_token: String::new(),
                access_token_expires_at: None,
                refresh_token: "ref".into(),
            })
            .unwrap();

        registry.close("user@example.com").unwrap();
        assert!(registry.get("user@example.com").is_none());
        assert!(state.store.get().unwrap().is_none());
    }
}
