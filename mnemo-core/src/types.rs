//! Core type definitions for the MNEMO retrieval pipeline.
//!
//! Candidates flow through the pipeline as typed records: a small fixed set
//! of known fields the reranker reads, plus one open-ended metadata map for
//! everything else the storage layer attaches.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identifier of a stored memory, as returned by the retrieval engines.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Create an identifier from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MemoryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Memory Type
// ---------------------------------------------------------------------------

/// Category tag of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Something said in conversation.
    Dialogue,
    /// Quest given, progressed or completed.
    Quest,
    /// Buying or selling.
    Trade,
    /// An item given or received.
    Gift,
    /// A fight the character took part in or witnessed.
    Combat,
    /// A feeling attached to the player.
    Emotion,
}

impl MemoryType {
    /// All memory types.
    #[must_use]
    pub fn all() -> &'static [MemoryType] {
        &[
            Self::Dialogue,
            Self::Quest,
            Self::Trade,
            Self::Gift,
            Self::Combat,
            Self::Emotion,
        ]
    }

    /// Canonical lowercase tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dialogue => "dialogue",
            Self::Quest => "quest",
            Self::Trade => "trade",
            Self::Gift => "gift",
            Self::Combat => "combat",
            Self::Emotion => "emotion",
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dialogue" => Ok(Self::Dialogue),
            "quest" => Ok(Self::Quest),
            "trade" => Ok(Self::Trade),
            "gift" => Ok(Self::Gift),
            "combat" => Ok(Self::Combat),
            "emotion" => Ok(Self::Emotion),
            other => Err(format!("unknown memory type: '{other}'")),
        }
    }
}

/// Unknown or malformed tags deserialize to `None` instead of failing the record.
fn lenient_memory_type<'de, D>(deserializer: D) -> Result<Option<MemoryType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| s.parse().ok()))
}

// ---------------------------------------------------------------------------
// Payload & Candidates
// ---------------------------------------------------------------------------

/// The stored memory record carried alongside a candidate.
///
/// Every field the reranker reads is optional: a malformed record is ranked
/// with safe defaults rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPayload {
    /// Natural language content of the memory.
    #[serde(default)]
    pub content: String,
    /// Category tag; `None` when missing or unrecognised.
    #[serde(default, deserialize_with = "lenient_memory_type")]
    pub memory_type: Option<MemoryType>,
    /// Stored importance in `[0, 1]`.
    #[serde(default)]
    pub importance: Option<f64>,
    /// When the memory was formed.
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// Player the memory is about.
    #[serde(default)]
    pub player_id: String,
    /// NPC owning the memory.
    #[serde(default)]
    pub npc_id: String,
    /// Emotion tags attached at write time.
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    /// Free-form game context.
    #[serde(default, alias = "game_context")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl MemoryPayload {
    /// Create a payload with content, type, importance and creation time.
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        memory_type: MemoryType,
        importance: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            content: content.into(),
            memory_type: Some(memory_type),
            importance: Some(importance),
            created_at: Some(created_at),
            ..Self::default()
        }
    }

    /// Attach emotion tags.
    #[must_use]
    pub fn with_emotions<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.emotion_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach the owning player and NPC.
    #[must_use]
    pub fn with_owner(mut self, player_id: impl Into<String>, npc_id: impl Into<String>) -> Self {
        self.player_id = player_id.into();
        self.npc_id = npc_id.into();
        self
    }
}

/// One entry of a retrieval channel's result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Memory identifier.
    pub id: MemoryId,
    /// Engine-native relevance score (informational only; fusion uses rank).
    pub engine_score: f64,
    /// The stored record.
    pub payload: MemoryPayload,
}

impl Candidate {
    /// Create a candidate.
    #[must_use]
    pub fn new(id: impl Into<MemoryId>, engine_score: f64, payload: MemoryPayload) -> Self {
        Self {
            id: id.into(),
            engine_score,
            payload,
        }
    }
}

/// An ordered candidate list produced by one retrieval channel.
///
/// Rank is the 1-based position in the list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedList(Vec<Candidate>);

impl RankedList {
    /// Wrap an already-ordered candidate vector.
    #[must_use]
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self(candidates)
    }

    /// An empty list (used when a channel is unavailable).
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate candidates in rank order.
    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.0.iter()
    }

    /// Iterate `(rank, candidate)` pairs, rank starting at 1.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Candidate)> {
        self.0.iter().enumerate().map(|(i, c)| (i + 1, c))
    }

    /// Borrow the candidates as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Candidate] {
        &self.0
    }

    /// Consume the list.
    #[must_use]
    pub fn into_inner(self) -> Vec<Candidate> {
        self.0
    }
}

impl From<Vec<Candidate>> for RankedList {
    fn from(candidates: Vec<Candidate>) -> Self {
        Self(candidates)
    }
}

impl FromIterator<Candidate> for RankedList {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RankedList {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A candidate after reciprocal-rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate {
    /// Memory identifier.
    pub id: MemoryId,
    /// Fusion score (≥ 0), derived from ranks only.
    pub fusion_score: f64,
    /// The stored record (taken from the first list when present in both).
    pub payload: MemoryPayload,
}
