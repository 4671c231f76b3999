//! Upstream mail API: the capability the dispatcher calls through, plus the
//! Gmail REST implementation.

use async_trait::async_trait;

use crate::error::UpstreamError;

pub mod client;
pub mod types;

pub use client::GmailClient;
pub use types::{Attachment, ListPage, MailAction, MessageSummary};

/// The mail API as the core sees it. A 401 from either operation is the
/// dispatcher's cue to refresh and retry once; everything else passes
/// through untouched.
#[async_trait]
pub trait MailApi: Send + Sync {
    async fn list_messages(
        &self,
        access_token: &str,
        folder: &str,
        query: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ListPage, UpstreamError>;

    async fn mutate_message(
        &self,
        access_token: &str,
        message_id: &str,
        action: MailAction,
    ) -> Result<(), UpstreamError>;
}
