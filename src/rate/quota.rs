//! Daily usage quota for LLM-backed chat.
//!
//! One counter per `(identity, UTC day)`. The counter is created lazily,
//! incremented through a single guarded update, never decremented; it expires
//! by day-key rotation rather than deletion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::error::GatewayError;

#[derive(Debug, Error)]
#[error("usage store error: {0}")]
pub struct UsageStoreError(pub String);

impl From<UsageStoreError> for GatewayError {
    fn from(err: UsageStoreError) -> Self {
        GatewayError::Upstream {
            status: 500,
            message: err.0,
        }
    }
}

/// Result of one guarded increment.
#[derive(Debug, Clone, Copy)]
pub struct UsageCount {
    /// Counter value after the call.
    pub count: u32,
    /// Whether this call performed the increment (i.e. was under the limit).
    pub incremented: bool,
}

/// Durable counter capability. `increment_if_below` must be atomic: a
/// read-then-write race must not let two concurrent requests both pass a
/// check only one of them should have passed.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn increment_if_below(
        &self,
        identity: &str,
        day_key: &str,
        limit: u32,
    ) -> Result<UsageCount, UsageStoreError>;

    /// Current counter value without incrementing (the "remaining" query).
    async fn current(&self, identity: &str, day_key: &str) -> Result<u32, UsageStoreError>;
}

/// In-memory usage store. The DashMap entry guard gives the same atomicity a
/// production deployment gets from a conditional single-document update.
#[derive(Default)]
pub struct MemoryUsageStore {
    counters: DashMap<(String, String), u32>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn increment_if_below(
        &self,
        identity: &str,
        day_key: &str,
        limit: u32,
    ) -> Result<UsageCount, UsageStoreError> {
        let mut entry = self
            .counters
            .entry((identity.to_string(), day_key.to_string()))
            .or_insert(0);

        if *entry >= limit {
            return Ok(UsageCount {
                count: *entry,
                incremented: false,
            });
        }

        *entry += 1;
        Ok(UsageCount {
            count: *entry,
            incremented: true,
        })
    }

    async fn current(&self, identity: &str, day_key: &str) -> Result<u32, UsageStoreError> {
        Ok(self
            .counters
            .get(&(identity.to_string(), day_key.to_string()))
            .map(|e| *e)
            .unwrap_or(0))
    }
}

#[async_trait]
impl<T: UsageStore + ?Sized> UsageStore for std::sync::Arc<T> {
    async fn increment_if_below(
        &self,
        identity: &str,
        day_key: &str,
        limit: u32,
    ) -> Result<UsageCount, UsageStoreError> {
        (**self).increment_if_below(identity, day_key, limit).await
    }

    async fn current(&self, identity: &str, day_key: &str) -> Result<u32, UsageStoreError> {
        (**self).current(identity, day_key).await
    }
}

/// Decision returned to the dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Daily quota keyed by UTC date.
pub struct DailyQuota<S> {
    store: S,
}

impl<S: UsageStore> DailyQuota<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn check_and_increment(
        &self,
        identity: &str,
        limit: u32,
    ) -> Result<QuotaDecision, UsageStoreError> {
        self.check_and_increment_at(identity, limit, Utc::now())
            .await
    }

    pub async fn check_and_increment_at(
        &self,
        identity: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, UsageStoreError> {
        let day = day_key(now);
        let usage = self.store.increment_if_below(identity, &day, limit).await?;

        Ok(QuotaDecision {
            allowed: usage.incremented,
            remaining: limit.saturating_sub(usage.count),
        })
    }

    pub async fn remaining(&self, identity: &str, limit: u32) -> Result<u32, UsageStoreError> {
        self.remaining_at(identity, limit, Utc::now()).await
    }

    pub async fn remaining_at(
        &self,
        identity: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, UsageStoreError> {
        let count = self.store.current(identity, &day_key(now)).await?;
        Ok(limit.saturating_sub(count))
    }
}

/// UTC day key, `YYYY-MM-DD`.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}
