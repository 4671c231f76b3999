//! Read cache for paginated mail listings.
//!
//! The upstream mail API paginates with opaque continuation tokens, so a
//! cached page is only valid for reproducing the exact same listing request:
//! entries are keyed by (folder, search query, page token) and never
//! re-sliced. Mutations invalidate by folder scope plus a membership check:
//! an entry that contains the mutated message is stale wherever it lives,
//! because the summaries embed the starred flag and folder membership.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::gmail::types::{MailAction, MessageSummary};

/// Identity of one listing request. `page_token == None` is the first page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub folder: String,
    pub query: Option<String>,
    pub page_token: Option<String>,
}

impl ListingKey {
    pub fn new(folder: &str, query: Option<&str>, page_token: Option<&str>) -> Self {
        Self {
            folder: folder.to_ascii_lowercase(),
            query: query.filter(|q| !q.is_empty()).map(str::to_string),
            page_token: page_token.filter(|t| !t.is_empty()).map(str::to_string),
        }
    }
}

/// One cached page. Entries are independent; there are no cross-entry
/// references.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub messages: Vec<MessageSummary>,
    pub next_page_token: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

pub struct ListingCache {
    entries: DashMap<ListingKey, ListingEntry>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Pure read; an invalidated entry is never returned regardless of age.
    pub fn lookup(&self, key: &ListingKey) -> Option<ListingEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Unconditional overwrite, last fetch wins. No merging with a prior
    /// entry for the same key.
    pub fn store(&self, key: ListingKey, entry: ListingEntry) {
        self.entries.insert(key, entry);
    }

    pub fn invalidate_all(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        if dropped > 0 {
            log::debug!("listing cache fully invalidated ({} entries)", dropped);
        }
    }

    /// Drop every entry matching the predicate; returns the number dropped.
    pub fn invalidate_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&ListingKey, &ListingEntry) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, entry| !predicate(key, entry));
        before - self.entries.len()
    }

    /// Invalidation after a successful mutation on `message_id`: entries in
    /// the action's affected folders, and any entry listing the message.
    pub fn invalidate_for_mutation(&self, message_id: &str, action: MailAction) -> usize {
        let folders = action.affected_folders();
        let dropped = self.invalidate_where(|key, entry| {
            folders.contains(&key.folder.as_str())
                || entry.messages.iter().any(|m| m.id == message_id)
        });
        log::debug!(
            "mutation {:?} on {} invalidated {} cached listings",
            action,
            message_id,
            dropped
        );
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ListingCache {
    fn default() -> Self {
        Self::new()
    }
}
