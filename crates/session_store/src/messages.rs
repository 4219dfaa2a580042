use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::{Message, Role};

/// Ordered message sequence of one session.
///
/// Every operation returns a new log; entries are shared, so an entry the
/// operation does not touch is the same allocation in both versions.
/// Array position is the only ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog(Vec<Arc<Message>>);

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn append(&self, message: Message) -> Self {
        let mut entries = self.0.clone();
        entries.push(Arc::new(message));
        Self(entries)
    }

    /// Rewrites the entry with `id`. Returns `None` when no entry matches.
    #[must_use]
    pub fn replace_by_id<F>(&self, id: &str, update: F) -> Option<Self>
    where
        F: FnOnce(&Message) -> Message,
    {
        let index = self.position(id)?;
        let updated = update(&self.0[index]);
        let mut entries = self.0.clone();
        entries[index] = Arc::new(updated);
        Some(Self(entries))
    }

    /// Removes `count` entries starting at `start`, clamped to the log bounds.
    #[must_use]
    pub fn remove_range(&self, start: usize, count: usize) -> Self {
        let start = start.min(self.0.len());
        let end = start.saturating_add(count).min(self.0.len());
        let mut entries = self.0.clone();
        entries.drain(start..end);
        Self(entries)
    }

    /// Keeps entries `[0, index)`.
    #[must_use]
    pub fn truncate_from(&self, index: usize) -> Self {
        let end = index.min(self.0.len());
        Self(self.0[..end].to_vec())
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.0.get(index).map(Arc::as_ref)
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Message> {
        self.position(id).and_then(|index| self.get(index))
    }

    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.0.iter().position(|message| message.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.0.iter().map(Arc::as_ref)
    }

    /// Shared entries, for identity checks across versions.
    #[must_use]
    pub fn entries(&self) -> &[Arc<Message>] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.0.last().map(Arc::as_ref)
    }

    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        self.0.iter().map(|message| message.role).collect()
    }

    /// Id of the entry still receiving streamed text, if any.
    #[must_use]
    pub fn streaming_id(&self) -> Option<&str> {
        self.0
            .iter()
            .find(|message| message.is_streaming)
            .map(|message| message.id.as_str())
    }
}

impl FromIterator<Message> for MessageLog {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        Self(iter.into_iter().map(Arc::new).collect())
    }
}
