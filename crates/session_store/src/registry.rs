use crate::error::SessionStoreError;
use crate::messages::MessageLog;
use crate::schema::{new_id, now_ms, Feedback, Message, Session, Timestamp};
use crate::storage::SessionStorage;

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Every session across all agents, plus the current selection.
///
/// The whole collection is written to storage after each mutation. Save
/// failures are logged and the in-memory mutation stands.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    selected: Option<String>,
    storage: Box<dyn SessionStorage>,
    last_stamp: Timestamp,
}

impl SessionRegistry {
    /// Loads the collection once. Unreadable state starts empty.
    pub fn load(storage: Box<dyn SessionStorage>) -> Self {
        let sessions = match storage.load() {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(%error, "session state unreadable, starting with no sessions");
                Vec::new()
            }
        };
        let last_stamp = sessions
            .iter()
            .map(|session| session.last_modified)
            .max()
            .unwrap_or(0);

        Self {
            sessions,
            selected: None,
            storage,
            last_stamp,
        }
    }

    /// Next modification stamp, strictly greater than every earlier one.
    fn next_stamp(&mut self) -> Timestamp {
        self.last_stamp = now_ms().max(self.last_stamp.saturating_add(1));
        self.last_stamp
    }

    fn persist(&self) {
        if let Err(error) = self.storage.save(&self.sessions) {
            tracing::warn!(%error, "failed to persist sessions");
        }
    }

    fn index_of(&self, id: &str) -> Result<usize, SessionStoreError> {
        self.sessions
            .iter()
            .position(|session| session.id == id)
            .ok_or_else(|| SessionStoreError::unknown_session(id))
    }

    #[must_use]
    pub fn all(&self) -> &[Session] {
        &self.sessions
    }

    /// Sessions owned by `agent_id`, most recently modified first.
    #[must_use]
    pub fn list_for_agent(&self, agent_id: &str) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self
            .sessions
            .iter()
            .filter(|session| session.agent_id == agent_id)
            .collect();
        sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        sessions
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|session| session.id == id)
    }

    #[must_use]
    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    #[must_use]
    pub fn selected(&self) -> Option<&Session> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    pub fn select(&mut self, id: &str) -> Result<(), SessionStoreError> {
        self.index_of(id)?;
        self.selected = Some(id.to_string());
        Ok(())
    }

    /// Creates an empty session for `agent_id`, selects it, and returns its id.
    pub fn create(&mut self, agent_id: &str, title: &str) -> String {
        let id = new_id();
        let last_modified = self.next_stamp();
        self.sessions.push(Session {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            title: title.to_string(),
            messages: MessageLog::new(),
            last_modified,
        });
        self.selected = Some(id.clone());
        self.persist();
        id
    }

    /// Removes a session and its messages. Clears the selection if it
    /// pointed at the removed session.
    pub fn delete(&mut self, id: &str) -> Result<Session, SessionStoreError> {
        let index = self.index_of(id)?;
        let removed = self.sessions.remove(index);
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
        }
        self.persist();
        Ok(removed)
    }

    /// Replaces the message log of `id` and bumps `last_modified`.
    pub fn update_messages<F>(&mut self, id: &str, update: F) -> Result<(), SessionStoreError>
    where
        F: FnOnce(&MessageLog) -> MessageLog,
    {
        let index = self.index_of(id)?;
        let messages = update(&self.sessions[index].messages);
        let last_modified = self.next_stamp();
        let session = &mut self.sessions[index];
        session.messages = messages;
        session.last_modified = last_modified;
        self.persist();
        Ok(())
    }

    /// Rewrites one message of `session_id`; bumps `last_modified`.
    pub fn update_message<F>(
        &mut self,
        session_id: &str,
        message_id: &str,
        update: F,
    ) -> Result<(), SessionStoreError>
    where
        F: FnOnce(&Message) -> Message,
    {
        let index = self.index_of(session_id)?;
        let messages = self.sessions[index]
            .messages
            .replace_by_id(message_id, update)
            .ok_or_else(|| SessionStoreError::UnknownMessage {
                session_id: session_id.to_string(),
                message_id: message_id.to_string(),
            })?;
        self.update_messages(session_id, |_| messages)
    }

    /// Sets the title without touching `last_modified`.
    pub fn set_title(&mut self, id: &str, title: &str) -> Result<(), SessionStoreError> {
        let index = self.index_of(id)?;
        self.sessions[index].title = title.to_string();
        self.persist();
        Ok(())
    }

    /// User-facing rename; rejects blank titles.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<(), SessionStoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SessionStoreError::EmptyTitle);
        }
        self.set_title(id, title)
    }

    pub fn clear_messages(&mut self, id: &str) -> Result<(), SessionStoreError> {
        self.update_messages(id, |_| MessageLog::new())
    }

    pub fn set_feedback(
        &mut self,
        session_id: &str,
        message_id: &str,
        feedback: Option<Feedback>,
    ) -> Result<(), SessionStoreError> {
        self.update_message(session_id, message_id, |message| Message {
            feedback,
            ..message.clone()
        })
    }

    /// Ensures the selection belongs to `active_agent` and returns it.
    ///
    /// Falls back to the agent's most recently modified session, or creates
    /// a fresh one when the agent has none.
    pub fn repair_selection(&mut self, active_agent: &str) -> String {
        if let Some(selected) = self.selected() {
            if selected.agent_id == active_agent {
                return selected.id.clone();
            }
        }

        let fallback = self
            .list_for_agent(active_agent)
            .first()
            .map(|session| session.id.clone());
        match fallback {
            Some(id) => {
                self.selected = Some(id.clone());
                id
            }
            None => self.create(active_agent, DEFAULT_SESSION_TITLE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionRegistry, DEFAULT_SESSION_TITLE};
    use crate::schema::{Message, Role};
    use crate::storage::MemoryStorage;

    fn registry() -> (SessionRegistry, MemoryStorage) {
        let storage = MemoryStorage::new();
        (SessionRegistry::load(Box::new(storage.clone())), storage)
    }

    #[test]
    fn stamps_are_strictly_increasing() {
        let (mut registry, _) = registry();
        let a = registry.create("general", "a");
        let created_a = registry.get(&a).map(|s| s.last_modified);
        let b = registry.create("general", "b");
        registry
            .update_messages(&a, |log| log.append(Message::new(Role::User, "x")))
            .expect("update");

        let stamp = |id: &str| registry.get(id).map(|s| s.last_modified);
        assert!(stamp(&b) > created_a);
        assert!(stamp(&a) > stamp(&b));
    }

    #[test]
    fn list_for_agent_orders_by_recency_and_filters_agent() {
        let (mut registry, _) = registry();
        let first = registry.create("general", "first");
        let _other = registry.create("developer", "other");
        let second = registry.create("general", "second");

        let ids: Vec<&str> = registry
            .list_for_agent("general")
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);
    }

    #[test]
    fn set_title_does_not_bump_last_modified() {
        let (mut registry, _) = registry();
        let id = registry.create("general", DEFAULT_SESSION_TITLE);
        let before = registry.get(&id).map(|s| s.last_modified);

        registry.rename(&id, "  Renamed ").expect("rename");

        let session = registry.get(&id).expect("session");
        assert_eq!(session.title, "Renamed");
        assert_eq!(Some(session.last_modified), before);
        assert!(registry.rename(&id, "   ").is_err());
    }

    #[test]
    fn repair_selection_prefers_most_recent_session_of_agent() {
        let (mut registry, _) = registry();
        let older = registry.create("general", "older");
        let newer = registry.create("general", "newer");
        registry
            .update_messages(&older, |log| log.append(Message::new(Role::User, "bump")))
            .expect("update");
        registry.create("developer", "dev");

        assert_eq!(registry.repair_selection("general"), older);
        assert_ne!(registry.repair_selection("general"), newer);
    }

    #[test]
    fn repair_selection_creates_default_session_for_agent_without_sessions() {
        let (mut registry, storage) = registry();

        let id = registry.repair_selection("analyst");

        let session = registry.get(&id).expect("session created");
        assert_eq!(session.title, DEFAULT_SESSION_TITLE);
        assert_eq!(session.agent_id, "analyst");
        assert_eq!(registry.selected_id(), Some(id.as_str()));
        assert_eq!(storage.saved_sessions().len(), 1);
    }
}
