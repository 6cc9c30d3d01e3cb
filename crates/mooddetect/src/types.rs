//! Values that flow between the session components.

use bytes::Bytes;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Frame dimensions reported by a ready video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

/// One captured video frame. The pixel layout is opaque to the session;
/// it is handed to the inference capability as-is.
#[derive(Debug, Clone)]
pub struct Frame {
    pub dimensions: FrameDimensions,
    pub data: Bytes,
}

/// Expression name to confidence (0..=1), in the order the detector
/// produced them.
///
/// Insertion order is kept so callers can inspect exactly what the detector
/// returned; mood resolution does not depend on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpressionScoreSet {
    entries: Vec<(String, f32)>,
}

impl ExpressionScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score for an expression. Re-inserting a name keeps its
    /// original position.
    pub fn insert(&mut self, name: impl Into<String>, score: f32) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((name, score)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, score)| *score)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, f32)> for ExpressionScoreSet {
    fn from_iter<I: IntoIterator<Item = (N, f32)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, score) in iter {
            set.insert(name, score);
        }
        set
    }
}

// serde_json maps are sorted unless `preserve_order` is on, so read the
// object entry by entry to keep the detector's order.
impl<'de> Deserialize<'de> for ExpressionScoreSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScoreVisitor;

        impl<'de> Visitor<'de> for ScoreVisitor {
            type Value = ExpressionScoreSet;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of expression names to scores")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut set = ExpressionScoreSet::new();
                while let Some((name, score)) = map.next_entry::<String, f32>()? {
                    set.insert(name, score);
                }
                Ok(set)
            }
        }

        deserializer.deserialize_map(ScoreVisitor)
    }
}

/// Stable identity of a track within one fetched sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for one playable item returned by the recommendation backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    /// Where the audio lives. `None` when the backend listed the song
    /// without a location; such a track cannot be played.
    pub audio_url: Option<String>,
    /// Position in the fetched list, starting at 0.
    pub display_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
