// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Namespace classification
//!
//! Every key stored through the facade belongs to a namespace. The namespace
//! decides which tier-B collection holds the record after migration and
//! which retention bound applies to it. Namespaces migrate and truncate as a
//! unit.

use serde::{Deserialize, Serialize};

use crate::config::RetentionConfig;

/// Key prefix for per-conversation message logs
pub const CONVERSATION_PREFIX: &str = "chat_messages_";
/// Key prefix for per-group message logs
pub const GROUP_PREFIX: &str = "group_messages_";
/// Key for the social feed
pub const FEED_KEY: &str = "feed_posts";
/// Key for the reusable emoji/sticker blobs
pub const EMOJI_KEY: &str = "custom_emojis";

/// Which tier currently holds the authoritative copy of a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// Small synchronous quota-bounded store
    A,
    /// Large asynchronous record store
    B,
}

/// Logical grouping of records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// One conversation's message log
    Conversation(String),
    /// One group's message log
    Group(String),
    /// Social-feed entries
    Feed,
    /// Small reusable media blobs
    Emoji,
    /// Everything else: settings and miscellaneous scalars
    Misc(String),
}

impl Namespace {
    /// Classify a storage key into its namespace.
    pub fn classify(key: &str) -> Self {
        if let Some(id) = key.strip_prefix(CONVERSATION_PREFIX) {
            return Namespace::Conversation(id.to_string());
        }
        if let Some(id) = key.strip_prefix(GROUP_PREFIX) {
            return Namespace::Group(id.to_string());
        }
        if key == FEED_KEY {
            return Namespace::Feed;
        }
        if key == EMOJI_KEY {
            return Namespace::Emoji;
        }
        Namespace::Misc(key.to_string())
    }

    /// The flat storage key this namespace lives under.
    pub fn key(&self) -> String {
        match self {
            Namespace::Conversation(id) => format!("{}{}", CONVERSATION_PREFIX, id),
            Namespace::Group(id) => format!("{}{}", GROUP_PREFIX, id),
            Namespace::Feed => FEED_KEY.to_string(),
            Namespace::Emoji => EMOJI_KEY.to_string(),
            Namespace::Misc(key) => key.clone(),
        }
    }

    /// The tier-B collection this namespace maps to.
    pub fn collection(&self) -> &'static str {
        match self {
            Namespace::Conversation(_) => "messages",
            Namespace::Group(_) => "group_messages",
            Namespace::Feed => "feed",
            Namespace::Emoji => "emoji",
            Namespace::Misc(_) => "settings",
        }
    }

    /// Whether the value is an ordered collection of entries (subject to
    /// retention truncation) rather than a scalar.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Namespace::Conversation(_) | Namespace::Group(_) | Namespace::Feed | Namespace::Emoji
        )
    }

    /// Whether this namespace is one of the known large collections targeted
    /// by emergency recovery.
    pub fn is_large_collection(&self) -> bool {
        matches!(
            self,
            Namespace::Conversation(_) | Namespace::Group(_) | Namespace::Feed
        )
    }

    /// Retention bound under normal operation. `None` means unbounded.
    pub fn retention_bound(&self, retention: &RetentionConfig) -> Option<usize> {
        match self {
            Namespace::Conversation(_) => Some(retention.conversation),
            Namespace::Group(_) => Some(retention.group),
            Namespace::Feed => Some(retention.feed),
            Namespace::Emoji | Namespace::Misc(_) => None,
        }
    }

    /// Retention bound under emergency recovery, tighter than the default.
    pub fn aggressive_bound(&self, retention: &RetentionConfig) -> Option<usize> {
        match self {
            Namespace::Conversation(_) => Some(retention.aggressive_conversation),
            Namespace::Group(_) => Some(retention.aggressive_group),
            Namespace::Feed => Some(retention.aggressive_feed),
            Namespace::Emoji | Namespace::Misc(_) => None,
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_conversation() {
        let ns = Namespace::classify("chat_messages_alice");
        assert_eq!(ns, Namespace::Conversation("alice".to_string()));
        assert_eq!(ns.collection(), "messages");
        assert!(ns.is_collection());
        assert!(ns.is_large_collection());
    }

    #[test]
    fn test_classify_group() {
        let ns = Namespace::classify("group_messages_42");
        assert_eq!(ns, Namespace::Group("42".to_string()));
        assert_eq!(ns.collection(), "group_messages");
    }

    #[test]
    fn test_classify_feed() {
        assert_eq!(Namespace::classify("feed_posts"), Namespace::Feed);
        // A prefix match is not enough; derived caches are their own keys.
        assert!(matches!(
            Namespace::classify("feed_posts_cache"),
            Namespace::Misc(_)
        ));
    }

    #[test]
    fn test_classify_emoji() {
        let ns = Namespace::classify("custom_emojis");
        assert_eq!(ns, Namespace::Emoji);
        assert!(ns.is_collection());
        assert!(!ns.is_large_collection());
    }

    #[test]
    fn test_classify_misc() {
        let ns = Namespace::classify("apiSettings");
        assert_eq!(ns, Namespace::Misc("apiSettings".to_string()));
        assert_eq!(ns.collection(), "settings");
        assert!(!ns.is_collection());
    }

    #[test]
    fn test_key_roundtrip() {
        for key in [
            "chat_messages_bob",
            "group_messages_7",
            "feed_posts",
            "custom_emojis",
            "theme",
        ] {
            assert_eq!(Namespace::classify(key).key(), key);
        }
    }

    #[test]
    fn test_retention_bounds() {
        let retention = RetentionConfig::default();

        let conv = Namespace::classify("chat_messages_x");
        assert_eq!(conv.retention_bound(&retention), Some(500));
        assert_eq!(conv.aggressive_bound(&retention), Some(200));

        let feed = Namespace::Feed;
        assert_eq!(feed.retention_bound(&retention), Some(200));
        assert_eq!(feed.aggressive_bound(&retention), Some(100));

        let misc = Namespace::classify("theme");
        assert_eq!(misc.retention_bound(&retention), None);
        assert_eq!(misc.aggressive_bound(&retention), None);
    }

    #[test]
    fn test_display() {
        let ns = Namespace::Conversation("a".to_string());
        assert_eq!(ns.to_string(), "chat_messages_a");
    }
}
