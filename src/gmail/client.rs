//! Gmail REST v1 client.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;

use crate::error::UpstreamError;
use crate::gmail::MailApi;
use crate::gmail::types::{
    ListPage, MailAction, MessageSummary, RawMessage, label_for_folder, parse_summary,
};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";
const PAGE_SIZE: u32 = 20;

pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl GmailClient {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        Self::with_base_url(DEFAULT_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("mail-gateway/0.1")
            .build()
            .map_err(UpstreamError::from)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_message(
        &self,
        access_token: &str,
        id: &str,
    ) -> Result<MessageSummary, UpstreamError> {
        let url = format!("{}/users/me/messages/{}", self.base_url, id);
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await?;

        let raw: RawMessage = success_json(response).await?;
        Ok(parse_summary(&raw))
    }
}

#[async_trait]
impl MailApi for GmailClient {
    async fn list_messages(
        &self,
        access_token: &str,
        folder: &str,
        query: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ListPage, UpstreamError> {
        let url = format!("{}/users/me/messages", self.base_url);
        let mut params: Vec<(&str, String)> = vec![("maxResults", PAGE_SIZE.to_string())];

        // A search query runs unscoped across the mailbox; folder browsing
        // filters by label.
        match query.filter(|q| !q.is_empty()) {
            Some(q) => params.push(("q", q.to_string())),
            None => params.push(("labelIds", label_for_folder(folder).to_string())),
        }
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            params.push(("pageToken", token.to_string()));
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .query(&params)
            .send()
            .await?;

        let listing: ListResponse = success_json(response).await?;

        let ids: Vec<String> = listing
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.id)
            .collect();

        let messages = try_join_all(
            ids.iter()
                .map(|id| self.get_message(access_token, id)),
        )
        .await?;

        Ok(ListPage {
            messages,
            next_page_token: listing.next_page_token,
        })
    }

    async fn mutate_message(
        &self,
        access_token: &str,
        message_id: &str,
        action: MailAction,
    ) -> Result<(), UpstreamError> {
        let request = match action {
            MailAction::Star => self
                .http
                .post(format!(
                    "{}/users/me/messages/{}/modify",
                    self.base_url, message_id
                ))
                .json(&serde_json::json!({ "addLabelIds": ["STARRED"] })),
            MailAction::Unstar => self
                .http
                .post(format!(
                    "{}/users/me/messages/{}/modify",
                    self.base_url, message_id
                ))
                .json(&serde_json::json!({ "removeLabelIds": ["STARRED"] })),
            MailAction::Trash => self.http.post(format!(
                "{}/users/me/messages/{}/trash",
                self.base_url, message_id
            )),
            MailAction::Restore => self.http.post(format!(
                "{}/users/me/messages/{}/untrash",
                self.base_url, message_id
            )),
            MailAction::PermanentDelete => self
                .http
                .delete(format!("{}/users/me/messages/{}", self.base_url, message_id)),
        };

        let response = request.bearer_auth(access_token).send().await?;
        success(response).await?;
        Ok(())
    }
}

async fn success(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn success_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, UpstreamError> {
    let response = success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    messages: Option<Vec<MessageRef>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}
