//! Mail API data model and Gmail payload decoding.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Message summary as rendered in a listing. Carries the decoded body the
/// way the listing endpoint serves it, so a cached page can be replayed
/// without refetching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: Option<String>,
    pub from: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    pub body: String,
    pub starred: bool,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

/// One page of a listing, with the continuation token for the next.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub messages: Vec<MessageSummary>,
    pub next_page_token: Option<String>,
}

/// Mutations the dispatcher forwards to the mail API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailAction {
    Star,
    Unstar,
    Trash,
    PermanentDelete,
    Restore,
}

impl MailAction {
    /// Folders whose listings a successful mutation makes stale. Trash and
    /// restore move the message between inbox and trash; starring changes
    /// the starred listing.
    pub fn affected_folders(self) -> &'static [&'static str] {
        match self {
            MailAction::Star | MailAction::Unstar => &["starred"],
            MailAction::Trash | MailAction::Restore => &["inbox", "trash"],
            MailAction::PermanentDelete => &["trash"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MailAction::Star => "star",
            MailAction::Unstar => "unstar",
            MailAction::Trash => "trash",
            MailAction::PermanentDelete => "permanent-delete",
            MailAction::Restore => "restore",
        }
    }
}

/// Gmail label for a folder name; searches run unscoped, matching the
/// upstream behavior of dropping the label filter when a query is present.
pub fn label_for_folder(folder: &str) -> &'static str {
    match folder.to_ascii_lowercase().as_str() {
        "sent" => "SENT",
        "starred" => "STARRED",
        "trash" => "TRASH",
        _ => "INBOX",
    }
}

// Raw Gmail REST v1 message shapes, only the fields the gateway reads.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    pub payload: Option<RawPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    #[serde(default)]
    pub headers: Vec<RawHeader>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    pub body: Option<RawBody>,
    pub parts: Option<Vec<RawPayload>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBody {
    pub data: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub attachment_id: Option<String>,
}

/// Flatten a raw Gmail message into a listing summary: headers looked up
/// case-insensitively, HTML body preferred over plain text, attachments
/// collected from the (possibly nested) part tree.
pub fn parse_summary(raw: &RawMessage) -> MessageSummary {
    let header = |name: &str| -> String {
        raw.payload
            .as_ref()
            .map(|p| p.headers.as_slice())
            .unwrap_or_default()
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    let body = raw
        .payload
        .as_ref()
        .and_then(body_data)
        .and_then(|data| decode_body(&data))
        .unwrap_or_default();

    let mut attachments = Vec::new();
    if let Some(parts) = raw.payload.as_ref().and_then(|p| p.parts.as_ref()) {
        collect_attachments(parts, &mut attachments);
    }

    MessageSummary {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        from: header("From"),
        subject: header("Subject"),
        date: header("Date"),
        snippet: raw.snippet.clone(),
        body,
        starred: raw.label_ids.iter().any(|l| l == "STARRED"),
        attachments,
    }
}

fn body_data(payload: &RawPayload) -> Option<String> {
    if let Some(parts) = payload.parts.as_ref() {
        let find = |mime: &str| {
            parts
                .iter()
                .find(|p| p.mime_type.as_deref() == Some(mime))
                .and_then(|p| p.body.as_ref())
                .and_then(|b| b.data.clone())
        };
        if let Some(data) = find("text/html").or_else(|| find("text/plain")) {
            return Some(data);
        }
    }
    payload.body.as_ref().and_then(|b| b.data.clone())
}

fn decode_body(data: &str) -> Option<String> {
    // Gmail body data is URL-safe base64, sometimes padded.
    let trimmed = data.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(trimmed).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn collect_attachments(parts: &[RawPayload], out: &mut Vec<Attachment>) {
    for part in parts {
        let filename = part.filename.as_deref().unwrap_or_default();
        if !filename.is_empty() {
            if let Some(body) = part.body.as_ref() {
                if let Some(attachment_id) = body.attachment_id.as_deref() {
                    out.push(Attachment {
                        id: attachment_id.to_string(),
                        filename: filename.to_string(),
                        mime_type: part.mime_type.clone().unwrap_or_default(),
                        size: body.size,
                    });
                }
            }
        }
        if let Some(nested) = part.parts.as_ref() {
            collect_attachments(nested, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: serde_json::Value) -> RawMessage {
        serde_json::from_value(json).unwrap()
    }

    fn encode(text: &str) -> String {
        URL_SAFE_NO_PAD.encode(text.as_bytes())
    }

    #[test]
    fn folder_label_mapping() {
        assert_eq!(label_for_folder("inbox"), "INBOX");
        assert_eq!(label_for_folder("Sent"), "SENT");
        assert_eq!(label_for_folder("starred"), "STARRED");
        assert_eq!(label_for_folder("trash"), "TRASH");
        assert_eq!(label_for_folder("anything-else"), "INBOX");
    }

    #[test]
    fn parses_headers_case_insensitively() {
        let msg = raw(serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX"],
            "snippet": "hi there",
            "payload": {
                "headers": [
                    { "name": "from", "value": "Alice <alice@example.com>" },
                    { "name": "SUBJECT", "value": "Greetings" },
                    { "name": "Date", "value": "Mon, 3 Mar 2025 09:00:00 +0000" }
                ]
            }
        }));

        let summary = parse_summary(&msg);
        assert_eq!(summary.from, "Alice <alice@example.com>");
        assert_eq!(summary.subject, "Greetings");
        assert_eq!(summary.snippet, "hi there");
        assert!(!summary.starred);
    }

    #[test]
    fn prefers_the_html_part_over_plain_text() {
        let msg = raw(serde_json::json!({
            "id": "m1",
            "payload": {
                "mimeType": "multipart/alternative",
                "parts": [
                    { "mimeType": "text/plain", "body": { "data": encode("plain") } },
                    { "mimeType": "text/html", "body": { "data": encode("<p>html</p>") } }
                ]
            }
        }));

        assert_eq!(parse_summary(&msg).body, "<p>html</p>");
    }

    #[test]
    fn falls_back_to_the_top_level_body() {
        let msg = raw(serde_json::json!({
            "id": "m1",
            "payload": {
                "mimeType": "text/plain",
                "body": { "data": encode("just text") }
            }
        }));

        assert_eq!(parse_summary(&msg).body, "just text");
    }

    #[test]
    fn decodes_padded_body_data() {
        let padded = base64::engine::general_purpose::URL_SAFE.encode("padded!".as_bytes());
        let msg = raw(serde_json::json!({
            "id": "m1",
            "payload": { "body": { "data": padded } }
        }));

        assert_eq!(parse_summary(&msg).body, "padded!");
    }

    #[test]
    fn collects_nested_attachments() {
        let msg = raw(serde_json::json!({
            "id": "m1",
            "payload": {
                "parts": [
                    { "mimeType": "text/html", "body": { "data": encode("x") } },
                    {
                        "mimeType": "multipart/mixed",
                        "parts": [
                            {
                                "mimeType": "application/pdf",
                                "filename": "report.pdf",
                                "body": { "attachmentId": "att-1", "size": 1024 }
                            }
                        ]
                    }
                ]
            }
        }));

        let summary = parse_summary(&msg);
        assert_eq!(summary.attachments.len(), 1);
        assert_eq!(summary.attachments[0].filename, "report.pdf");
        assert_eq!(summary.attachments[0].id, "att-1");
        assert_eq!(summary.attachments[0].size, 1024);
    }

    #[test]
    fn starred_flag_comes_from_labels() {
        let msg = raw(serde_json::json!({
            "id": "m1",
            "labelIds": ["INBOX", "STARRED"]
        }));
        assert!(parse_summary(&msg).starred);
    }
}
