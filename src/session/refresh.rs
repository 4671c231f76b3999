//! Access-token refresh with per-session coalescing.
//!
//! Refresh tokens are single-use or tightly rate-limited with most providers;
//! concurrent duplicate refresh calls risk invalidating each other. All
//! callers that find the access token expired therefore share one in-flight
//! exchange: the first caller spawns it, everyone else suspends on the same
//! watch channel and observes the same outcome. The exchange runs in a
//! detached task so a caller abandoning its request never tears down a
//! refresh other callers are waiting on.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::{GatewayError, GatewayResult};
use crate::session::store::TokenStore;
use crate::session::types::Session;

/// Token pair returned by the upstream token endpoint.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in_secs: u64,
    /// Some providers rotate the refresh token on every exchange.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The refresh token was rejected. The session is unrecoverable.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("token endpoint request failed: {0}")]
    Http(String),
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Upstream OAuth token endpoint.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    async fn exchange_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, ProviderError>;
}

/// Settled result of one refresh, shared by every waiter.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Token(String),
    Expired,
    Transient(String),
    Persistence(String),
}

impl RefreshOutcome {
    fn into_result(self) -> GatewayResult<String> {
        match self {
            RefreshOutcome::Token(token) => Ok(token),
            RefreshOutcome::Expired => Err(GatewayError::AuthExpired),
            RefreshOutcome::Transient(msg) => Err(GatewayError::AuthTransient(msg)),
            RefreshOutcome::Persistence(msg) => Err(GatewayError::Persistence(msg)),
        }
    }
}

type OutcomeReceiver = watch::Receiver<Option<RefreshOutcome>>;

pub struct TokenRefresher {
    store: TokenStore,
    provider: Arc<dyn OAuthProvider>,
    refresh_margin_secs: i64,
    refresh_timeout: StdDuration,
    inflight: Arc<Mutex<Option<OutcomeReceiver>>>,
}

impl TokenRefresher {
    pub fn new(
        store: TokenStore,
        provider: Arc<dyn OAuthProvider>,
        refresh_margin_secs: i64,
        refresh_timeout: StdDuration,
    ) -> Self {
        Self {
            store,
            provider,
            refresh_margin_secs,
            refresh_timeout,
            inflight: Arc::new(Mutex::new(None)),
        }
    }

    /// Return a currently-valid access token, refreshing if needed.
    ///
    /// With `force`, the cached token is ignored and a refresh happens (or is
    /// joined) regardless of the stored expiry; the dispatcher uses this
    /// after an upstream 401.
    pub async fn ensure_valid_token(&self, force: bool) -> GatewayResult<String> {
        let session = self.store.get()?.ok_or(GatewayError::AuthExpired)?;

        if !force && session.access_token_fresh_at(Utc::now(), self.refresh_margin_secs) {
            return Ok(session.access_token);
        }

        let rx = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx.clone());
                    self.spawn_refresh(session, tx);
                    rx
                }
            }
        };

        Self::await_outcome(rx).await
    }

    fn spawn_refresh(&self, session: Session, tx: watch::Sender<Option<RefreshOutcome>>) {
        let store = self.store.clone();
        let provider = Arc::clone(&self.provider);
        let inflight = Arc::clone(&self.inflight);
        let timeout = self.refresh_timeout;

        tokio::spawn(async move {
            let outcome = run_refresh(&store, provider.as_ref(), timeout, session).await;
            // Clear the slot before publishing so a waiter that immediately
            // retries starts a fresh exchange instead of re-joining this one.
            *inflight.lock() = None;
            let _ = tx.send(Some(outcome));
        });
    }

    async fn await_outcome(mut rx: OutcomeReceiver) -> GatewayResult<String> {
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome.into_result();
            }
            if rx.changed().await.is_err() {
                return Err(GatewayError::AuthTransient(
                    "token refresh task aborted".into(),
                ));
            }
        }
    }
}

async fn run_refresh(
    store: &TokenStore,
    provider: &dyn OAuthProvider,
    timeout: StdDuration,
    session: Session,
) -> RefreshOutcome {
    let exchange = provider.exchange_refresh_token(&session.refresh_token);

    match tokio::time::timeout(timeout, exchange).await {
        Err(_) => {
            log::warn!(
                "token refresh for {} timed out after {:?}",
                session.user_email,
                timeout
            );
            RefreshOutcome::Transient("token refresh timed out".into())
        }
        Ok(Err(ProviderError::InvalidGrant(msg))) => {
            log::warn!(
                "refresh token for {} rejected ({}), clearing session",
                session.user_email,
                msg
            );
            if let Err(err) = store.clear() {
                log::error!("failed to clear session after invalid_grant: {}", err);
            }
            RefreshOutcome::Expired
        }
        Ok(Err(err)) => {
            log::warn!("token refresh for {} failed: {}", session.user_email, err);
            RefreshOutcome::Transient(err.to_string())
        }
        Ok(Ok(tokens)) => {
            let mut updated = session;
            updated.access_token = tokens.access_token;
            updated.access_token_expires_at =
                Some(Utc::now() + Duration::seconds(tokens.expires_in_secs as i64));
            if let Some(rotated) = tokens.refresh_token {
                updated.refresh_token = rotated;
            }
            match store.set(&updated) {
                Ok(()) => {
                    log::debug!("access token for {} refreshed", updated.user_email);
                    RefreshOutcome::Token(updated.access_token)
                }
                Err(err) => RefreshOutcome::Persistence(err.to_string()),
            }
        }
    }
}
