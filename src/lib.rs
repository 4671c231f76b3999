//! mail-gateway: the session, rate-admission, and cache-coherence core
//! behind a webmail client that proxies an upstream mail API and an LLM
//! completion API.
//!
//! The crate is the library a thin API-route layer calls into. It owns:
//!
//! - OAuth2 access/refresh token lifecycle with cookie-backed persistence
//!   and coalesced, exactly-once-in-flight refresh ([`session`]);
//! - per-identity admission control: fixed-window limits per route class
//!   plus a daily LLM quota ([`rate`]);
//! - a per-session read cache for paginated mail listings, kept coherent
//!   with mail mutations ([`cache`]);
//! - the dispatcher sequencing admission, token freshness, the upstream
//!   call, and the single retry on 401 ([`dispatch`]).

use std::sync::{Arc, Once};
use std::time::Duration;

use env_logger::Env;

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gmail;
pub mod llm;
pub mod rate;
pub mod session;

use crate::config::GatewayConfig;
use crate::dispatch::Dispatcher;
use crate::error::{GatewayError, GatewayResult};
use crate::gmail::{GmailClient, MailApi};
use crate::llm::{CompletionApi, GroqClient};
use crate::rate::{DailyQuota, FixedWindowLimiter, MemoryUsageStore, UsageStore};
use crate::session::{GoogleOAuth, OAuthProvider, SessionCarrier, SessionRegistry};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}

pub type GatewayDispatcher = Dispatcher<Arc<dyn UsageStore>>;

/// Composition root: owns the shared collaborators and the per-identity
/// session registry, and hands out dispatchers bound to one session.
pub struct Gateway {
    config: GatewayConfig,
    registry: SessionRegistry,
    mail: Arc<dyn MailApi>,
    chat: Arc<dyn CompletionApi>,
    limiter: Arc<FixedWindowLimiter>,
    quota: Arc<DailyQuota<Arc<dyn UsageStore>>>,
}

impl Gateway {
    /// Wire the production collaborators: Google's token endpoint, the Gmail
    /// REST API, the Groq completion API, and an in-memory usage store.
    /// Deployments with a durable counter use [`Gateway::from_parts`].
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        let refresh_timeout = Duration::from_secs(config.refresh_timeout_secs);
        let upstream_timeout = Duration::from_secs(config.upstream_timeout_secs);

        let provider = GoogleOAuth::new(config.google.clone(), refresh_timeout)
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let mail = GmailClient::new(upstream_timeout)
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        let chat = GroqClient::new(config.llm.clone(), upstream_timeout)
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self::from_parts(
            config,
            Arc::new(provider),
            Arc::new(mail),
            Arc::new(chat),
            Arc::new(MemoryUsageStore::new()),
        ))
    }

    pub fn from_parts(
        config: GatewayConfig,
        provider: Arc<dyn OAuthProvider>,
        mail: Arc<dyn MailApi>,
        chat: Arc<dyn CompletionApi>,
        usage: Arc<dyn UsageStore>,
    ) -> Self {
        let registry = SessionRegistry::new(
            provider,
            config.refresh_margin_secs,
            Duration::from_secs(config.refresh_timeout_secs),
        );

        Self {
            config,
            registry,
            mail,
            chat,
            limiter: Arc::new(FixedWindowLimiter::new()),
            quota: Arc::new(DailyQuota::new(usage)),
        }
    }

    /// Open (or rejoin) the session for `identity` and return a dispatcher
    /// bound to it.
    pub fn open_session(
        &self,
        identity: &str,
        carrier: Arc<dyn SessionCarrier>,
    ) -> GatewayDispatcher {
        let state = self.registry.open(identity, carrier);
        Dispatcher::new(
            state,
            Arc::clone(&self.mail),
            Arc::clone(&self.chat),
            Arc::clone(&self.limiter),
            Arc::clone(&self.quota),
            self.config.daily_chat_limit,
        )
    }

    /// Logout / account deletion: expire the persisted session and drop its
    /// cache.
    pub fn close_session(&self, identity: &str) -> GatewayResult<()> {
        self.registry.close(identity)
    }

    /// Periodic maintenance: drop rate windows that have rolled over.
    pub fn purge_expired_rate_windows(&self) -> usize {
        self.limiter.purge_expired(chrono::Utc::now())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Test doubles for the capability seams, shared by the integration tests.
pub mod test_support {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;

    use crate::error::UpstreamError;
    use crate::gmail::{ListPage, MailAction, MailApi, MessageSummary};
    use crate::llm::{ChatMessage, CompletionApi};
    use crate::session::{
        MemoryCarrier, OAuthProvider, ProviderError, RefreshedToken, Session, TokenStore,
    };

    pub fn summary(id: &str) -> MessageSummary {
        MessageSummary {
            id: id.into(),
            thread_id: None,
            from: "sender@example.com".into(),
            subject: format!("message {}", id),
            date: "Mon, 3 Mar 2025 09:00:00 +0000".into(),
            snippet: String::new(),
            body: String::new(),
            starred: false,
            attachments: Vec::new(),
        }
    }

    pub fn page(ids: &[&str]) -> ListPage {
        ListPage {
            messages: ids.iter().map(|id| summary(id)).collect(),
            next_page_token: None,
        }
    }

    /// One scripted upstream answer.
    pub enum Scripted {
        Page(ListPage),
        Ok,
        Unauthorized,
        Error(u16, String),
    }

    /// Mail API double that answers from a scripted queue and counts calls.
    /// An optional barrier holds calls until enough requests have arrived,
    /// for tests that need overlapping fetches.
    pub struct ScriptedMailApi {
        responses: Mutex<VecDeque<Scripted>>,
        calls: AtomicU32,
        barrier: Option<tokio::sync::Barrier>,
    }

    impl ScriptedMailApi {
        pub fn new(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
                barrier: None,
            })
        }

        pub fn with_barrier(responses: Vec<Scripted>, parties: usize) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
                barrier: Some(tokio::sync::Barrier::new(parties)),
            })
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        async fn next(&self) -> Result<ListPage, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            match self.responses.lock().pop_front() {
                Some(Scripted::Page(page)) => Ok(page),
                Some(Scripted::Ok) => Ok(ListPage {
                    messages: Vec::new(),
                    next_page_token: None,
                }),
                Some(Scripted::Unauthorized) => Err(UpstreamError::Status {
                    status: 401,
                    body: "Invalid Credentials".into(),
                }),
                Some(Scripted::Error(status, body)) => {
                    Err(UpstreamError::Status { status, body })
                }
                None => Err(UpstreamError::Http("script exhausted".into())),
            }
        }
    }

    #[async_trait]
    impl MailApi for ScriptedMailApi {
        async fn list_messages(
            &self,
            _access_token: &str,
            _folder: &str,
            _query: Option<&str>,
            _page_token: Option<&str>,
        ) -> Result<ListPage, UpstreamError> {
            self.next().await
        }

        async fn mutate_message(
            &self,
            _access_token: &str,
            _message_id: &str,
            _action: MailAction,
        ) -> Result<(), UpstreamError> {
            self.next().await.map(|_| ())
        }
    }

    /// OAuth provider double issuing sequential tokens, or failing.
    pub struct CountingProvider {
        calls: AtomicU32,
        invalid_grant: bool,
    }

    impl CountingProvider {
        pub fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                invalid_grant: false,
            })
        }

        pub fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                invalid_grant: true,
            })
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OAuthProvider for CountingProvider {
        async fn exchange_refresh_token(
            &self,
            _refresh_token: &str,
        ) -> Result<RefreshedToken, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.invalid_grant {
                return Err(ProviderError::InvalidGrant("token revoked".into()));
            }
            Ok(RefreshedToken {
                access_token: format!("refreshed-{}", call),
                expires_in_secs: 3600,
                refresh_token: None,
            })
        }
    }

    /// Completion double returning a canned reply.
    pub struct CannedCompletion {
        pub reply: String,
        calls: AtomicU32,
    }

    impl CannedCompletion {
        pub fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.into(),
                calls: AtomicU32::new(0),
            })
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionApi for CannedCompletion {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    /// A token store over a fresh in-memory carrier, seeded with a session
    /// whose access token expires `expiry_offset_secs` from now.
    pub fn seeded_store(user_email: &str, expiry_offset_secs: i64) -> TokenStore {
        let store = TokenStore::new(Arc::new(MemoryCarrier::new()));
        store
            .set(&Session {
                user_email: user_email.into(),
                access_token: "seeded-token".into(),
                access_token_expires_at: Some(Utc::now() + Duration::seconds(expiry_offset_secs)),
                refresh_token: "seeded-refresh".into(),
            })
            .expect("seed session");
        store
    }
}
