//! Content tags and tracking of observed version tokens.
//!
//! A content tag is a SHA-256 digest of a document's deterministic CBOR
//! encoding, base64 encoded. It identifies a body independently of the
//! store token: two writes of the same content get different tokens but
//! the same tag.
//!
//! [`TagTracker`] remembers the last token and tag observed per document
//! so that later reads can send the token as `if_none_match`.

use crate::error::{CoreError, CoreResult};
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use optidoc_codec::{to_cbor, DocumentKey, Fields, VersionToken, VersionedDocument};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Base64 SHA-256 digest of a document body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentTag(String);

impl ContentTag {
    /// Computes the tag of a field map.
    pub fn of(fields: &Fields) -> CoreResult<Self> {
        let bytes = to_cbor(fields).map_err(CoreError::Codec)?;
        let digest = Sha256::digest(&bytes);
        Ok(Self(base64::engine::general_purpose::STANDARD.encode(digest)))
    }

    /// Returns the encoded digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the tracker remembers about one document.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedTag {
    /// Last observed store token.
    pub token: VersionToken,
    /// Tag of the body observed with that token.
    pub content: ContentTag,
    /// When the observation was recorded.
    pub observed_at: DateTime<Utc>,
}

/// Concurrent map of last observed tokens and tags.
#[derive(Debug, Default)]
pub struct TagTracker {
    entries: DashMap<DocumentKey, TrackedTag>,
}

impl TagTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a snapshot observed now. Returns true if its content differs
    /// from the previously tracked content.
    pub fn observe(&self, snapshot: &VersionedDocument) -> CoreResult<bool> {
        self.observe_at(snapshot, Utc::now())
    }

    /// Records a snapshot observed at the given time.
    pub fn observe_at(&self, snapshot: &VersionedDocument, at: DateTime<Utc>) -> CoreResult<bool> {
        let content = ContentTag::of(&snapshot.document.fields)?;
        let previous = self.entries.insert(
            snapshot.key().clone(),
            TrackedTag {
                token: snapshot.token.clone(),
                content: content.clone(),
                observed_at: at,
            },
        );
        Ok(!matches!(previous, Some(old) if old.content == content))
    }

    /// Refreshes the observation time of a document whose token was
    /// confirmed current.
    pub fn touch(&self, key: &DocumentKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.observed_at = Utc::now();
        }
    }

    /// Last observed token of a document.
    pub fn token(&self, key: &DocumentKey) -> Option<VersionToken> {
        self.entries.get(key).map(|entry| entry.token.clone())
    }

    /// Full tracked entry of a document.
    pub fn get(&self, key: &DocumentKey) -> Option<TrackedTag> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stops tracking a document.
    pub fn forget(&self, key: &DocumentKey) -> Option<TrackedTag> {
        self.entries.remove(key).map(|(_, tag)| tag)
    }

    /// Removes entries observed more than `ttl` ago. Returns how many were removed.
    pub fn prune_older_than(&self, ttl: Duration) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - ttl;
        let before = self.entries.len();
        self.entries.retain(|_, tag| tag.observed_at >= cutoff);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked documents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
