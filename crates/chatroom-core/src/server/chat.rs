//! Chatroom history: the public log and per-user private logs.
//!
//! Every log is bounded and FIFO-evicted. Private conversations are
//! stored symmetrically: a message between A and B lands in A's log for
//! B and in B's log for A with one shared timestamp, so either side's
//! fetch returns the same conversation.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::protocol::payload::{ChatEntry, EntryKind};

/// Default bound for every log.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct BoundedLog {
    entries: VecDeque<ChatEntry>,
}

impl BoundedLog {
    fn push(&mut self, entry: ChatEntry, limit: usize) {
        if self.entries.len() == limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn to_vec(&self) -> Vec<ChatEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// All chat history held by the server.
///
/// Shares a guard with the session registry so presence entries and
/// messages observe one global order.
#[derive(Debug)]
pub struct ChatroomState {
    limit: usize,
    public: BoundedLog,
    // username -> peer username -> conversation as seen by `username`.
    private: HashMap<String, HashMap<String, BoundedLog>>,
}

impl ChatroomState {
    /// State with the given per-log bound.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            public: BoundedLog::default(),
            private: HashMap::new(),
        }
    }

    /// Number of entries currently in the public log.
    pub fn public_len(&self) -> usize {
        self.public.entries.len()
    }

    /// Record a private message in both participants' logs.
    pub fn post_private(&mut self, from: &str, to: &str, text: &str, now: DateTime<Utc>) {
        let entry = ChatEntry {
            timestamp: now,
            speaker: from.to_string(),
            kind: EntryKind::Message(text.to_string()),
        };
        let limit = self.limit;
        self.private
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_default()
            .push(entry.clone(), limit);
        // A note-to-self conversation is one log, not two.
        if from != to {
            self.private
                .entry(to.to_string())
                .or_default()
                .entry(from.to_string())
                .or_default()
                .push(entry, limit);
        }
    }

    /// Record a public message.
    pub fn post_public(&mut self, from: &str, text: &str, now: DateTime<Utc>) {
        let entry = ChatEntry {
            timestamp: now,
            speaker: from.to_string(),
            kind: EntryKind::Message(text.to_string()),
        };
        self.public.push(entry, self.limit);
    }

    /// Record a presence transition in the public log and in every
    /// private log that already holds a conversation with `user`.
    pub fn post_presence(&mut self, user: &str, kind: EntryKind, now: DateTime<Utc>) {
        let entry = ChatEntry {
            timestamp: now,
            speaker: user.to_string(),
            kind,
        };
        self.public.push(entry.clone(), self.limit);
        let limit = self.limit;
        for (owner, logs) in self.private.iter_mut() {
            if owner == user {
                continue;
            }
            if let Some(log) = logs.get_mut(user) {
                log.push(entry.clone(), limit);
            }
        }
    }

    /// Fetch history: the public log, or `user`'s conversation with
    /// `peer`.
    pub fn get_chats(&self, user: &str, peer: Option<&str>) -> Vec<ChatEntry> {
        match peer {
            None => self.public.to_vec(),
            Some(peer) => self
                .private
                .get(user)
                .and_then(|logs| logs.get(peer))
                .map(BoundedLog::to_vec)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::wall_now;

    #[test]
    fn test_private_message_lands_in_both_logs() {
        let mut chat = ChatroomState::new(DEFAULT_HISTORY_LIMIT);
        let now = wall_now();
        chat.post_private("alice", "bob", "hi", now);

        let from_alice = chat.get_chats("alice", Some("bob"));
        let from_bob = chat.get_chats("bob", Some("alice"));
        assert_eq!(from_alice, from_bob);
        assert_eq!(from_alice.len(), 1);
        assert_eq!(from_alice[0].speaker, "alice");
        assert_eq!(from_alice[0].kind, EntryKind::Message("hi".into()));
        assert_eq!(from_alice[0].timestamp, now);
    }

    #[test]
    fn test_public_ordering_preserved() {
        let mut chat = ChatroomState::new(DEFAULT_HISTORY_LIMIT);
        chat.post_public("alice", "1", wall_now());
        chat.post_public("bob", "2", wall_now());

        let log = chat.get_chats("carol", None);
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].speaker.as_str(), &log[0].kind), ("alice", &EntryKind::Message("1".into())));
        assert_eq!((log[1].speaker.as_str(), &log[1].kind), ("bob", &EntryKind::Message("2".into())));
    }

    #[test]
    fn test_fifo_eviction_at_bound() {
        let mut chat = ChatroomState::new(2);
        chat.post_public("alice", "1", wall_now());
        chat.post_public("alice", "2", wall_now());
        chat.post_public("alice", "3", wall_now());

        let log = chat.get_chats("alice", None);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].kind, EntryKind::Message("2".into()));
        assert_eq!(log[1].kind, EntryKind::Message("3".into()));
    }

    #[test]
    fn test_presence_reaches_existing_conversations_only() {
        let mut chat = ChatroomState::new(DEFAULT_HISTORY_LIMIT);
        chat.post_private("alice", "bob", "hi", wall_now());
        chat.post_presence("alice", EntryKind::Offline, wall_now());

        // Bob has chatted with alice: he sees the transition.
        let bob = chat.get_chats("bob", Some("alice"));
        assert_eq!(bob.last().map(|e| &e.kind), Some(&EntryKind::Offline));

        // Carol never chatted with alice: her log stays empty.
        assert!(chat.get_chats("carol", Some("alice")).is_empty());

        // The public log always records presence.
        let public = chat.get_chats("carol", None);
        assert_eq!(public.last().map(|e| &e.kind), Some(&EntryKind::Offline));
    }

    #[test]
    fn test_unknown_conversation_is_empty() {
        let chat = ChatroomState::new(DEFAULT_HISTORY_LIMIT);
        assert!(chat.get_chats("alice", Some("nobody")).is_empty());
    }
}
