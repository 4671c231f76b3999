//! Request dispatcher: the one place that sequences admission, token
//! freshness, the upstream call, and cache coherence.
//!
//! The retry policy is deliberately explicit rather than buried in a
//! transport interceptor: an unauthenticated upstream response triggers
//! exactly one refresh-and-retry per logical request, no matter how many
//! internal suspensions happened waiting on a shared refresh. A second 401
//! is terminal for the request.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::cache::{ListingEntry, ListingKey};
use crate::error::{GatewayError, GatewayResult, UpstreamError};
use crate::gmail::{ListPage, MailAction, MailApi};
use crate::llm::{ChatMessage, CompletionApi};
use crate::rate::{DailyQuota, FixedWindowLimiter, RateClass, UsageStore};
use crate::session::SessionState;

pub struct Dispatcher<S: UsageStore> {
    session: Arc<SessionState>,
    mail: Arc<dyn MailApi>,
    chat: Arc<dyn CompletionApi>,
    limiter: Arc<FixedWindowLimiter>,
    quota: Arc<DailyQuota<S>>,
    daily_chat_limit: u32,
}

impl<S: UsageStore> Dispatcher<S> {
    pub fn new(
        session: Arc<SessionState>,
        mail: Arc<dyn MailApi>,
        chat: Arc<dyn CompletionApi>,
        limiter: Arc<FixedWindowLimiter>,
        quota: Arc<DailyQuota<S>>,
        daily_chat_limit: u32,
    ) -> Self {
        Self {
            session,
            mail,
            chat,
            limiter,
            quota,
            daily_chat_limit,
        }
    }

    /// List one page of a folder or search. Consults the listing cache
    /// first; a miss fetches upstream and populates the cache.
    pub async fn list_messages(
        &self,
        folder: &str,
        query: Option<&str>,
        page_token: Option<&str>,
    ) -> GatewayResult<ListPage> {
        let identity = self.identity()?;
        self.admit(RateClass::Default, &identity)?;

        let key = ListingKey::new(folder, query, page_token);
        if let Some(hit) = self.session.cache.lookup(&key) {
            log::debug!("listing cache hit for {}/{:?}", key.folder, key.page_token);
            return Ok(ListPage {
                messages: hit.messages,
                next_page_token: hit.next_page_token,
            });
        }

        let request_id = Uuid::new_v4();
        log::debug!(
            "[{}] fetching listing folder={} query={:?} page={:?}",
            request_id,
            folder,
            query,
            page_token
        );

        let mail = Arc::clone(&self.mail);
        let page = self
            .with_mail_auth(|token| {
                let mail = Arc::clone(&mail);
                async move {
                    mail.list_messages(&token, folder, query, page_token)
                        .await
                }
            })
            .await?;

        self.session.cache.store(
            key,
            ListingEntry {
                messages: page.messages.clone(),
                next_page_token: page.next_page_token.clone(),
                fetched_at: Utc::now(),
            },
        );

        Ok(page)
    }

    /// Apply a mutation and drop every cached listing it could have made
    /// stale.
    pub async fn mutate_message(
        &self,
        message_id: &str,
        action: MailAction,
    ) -> GatewayResult<()> {
        let identity = self.identity()?;
        self.admit(RateClass::Email, &identity)?;

        let request_id = Uuid::new_v4();
        log::debug!(
            "[{}] mutation {} on message {}",
            request_id,
            action.as_str(),
            message_id
        );

        let mail = Arc::clone(&self.mail);
        self.with_mail_auth(|token| {
            let mail = Arc::clone(&mail);
            async move { mail.mutate_message(&token, message_id, action).await }
        })
        .await?;

        self.session.cache.invalidate_for_mutation(message_id, action);
        Ok(())
    }

    /// Run a chat completion under the AI window and the daily quota. The
    /// LLM authenticates with the gateway's own key, so there is no 401
    /// retry dance here; the session just has to exist.
    pub async fn chat_completion(&self, messages: &[ChatMessage]) -> GatewayResult<String> {
        let identity = self.identity()?;
        self.admit(RateClass::Ai, &identity)?;

        let now = Utc::now();
        let decision = self
            .quota
            .check_and_increment_at(&identity, self.daily_chat_limit, now)
            .await?;
        if !decision.allowed {
            log::debug!("daily chat quota exhausted for {}", identity);
            return Err(GatewayError::RateLimited {
                retry_after_secs: secs_until_utc_midnight(now),
            });
        }

        self.chat.complete(messages).await.map_err(GatewayError::from)
    }

    /// Chat completions left today for this session's user.
    pub async fn chat_remaining(&self) -> GatewayResult<u32> {
        let identity = self.identity()?;
        Ok(self
            .quota
            .remaining(&identity, self.daily_chat_limit)
            .await?)
    }

    fn identity(&self) -> GatewayResult<String> {
        let session = self.session.store.get()?.ok_or(GatewayError::AuthExpired)?;
        Ok(session.user_email)
    }

    fn admit(&self, class: RateClass, identity: &str) -> GatewayResult<()> {
        let decision = self.limiter.allow(class, identity);
        if decision.allowed {
            Ok(())
        } else {
            Err(GatewayError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            })
        }
    }

    /// Run an authenticated mail call with the single-retry-on-401 policy.
    async fn with_mail_auth<T, F, Fut>(&self, call: F) -> GatewayResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let token = self.session.refresher.ensure_valid_token(false).await?;
        match call(token).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_unauthenticated() => {
                log::debug!("upstream rejected the access token, refreshing and retrying once");
                self.session.store.clear_access_token()?;
                let token = self.session.refresher.ensure_valid_token(true).await?;
                match call(token).await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_unauthenticated() => Err(GatewayError::AuthExpired),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn secs_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    let tomorrow = (now + Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();
    (tomorrow - now).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn quota_retry_hint_points_at_the_next_utc_day() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 23, 59, 0).single().unwrap();
        assert_eq!(secs_until_utc_midnight(now), 60);

        let midday = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).single().unwrap();
        assert_eq!(secs_until_utc_midnight(midday), 12 * 3600);
    }
}
