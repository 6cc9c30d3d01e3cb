//! Mood resolution: reduce an expression score set to one label.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ExpressionScoreSet;

/// Canonical enumeration order of the expression names the detector emits.
///
/// Ties are broken by this order rather than by whatever order a score set
/// happens to carry, so the same scores always produce the same mood.
/// Names not listed here rank after all of these, alphabetically.
pub const EXPRESSION_ORDER: [&str; 7] = [
    "neutral",
    "happy",
    "sad",
    "angry",
    "fearful",
    "disgusted",
    "surprised",
];

/// Discrete label derived from the dominant expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mood(String);

impl Mood {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label with its first letter capitalised, e.g. `Happy`.
    pub fn display_name(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn canonical_rank(name: &str) -> (usize, &str) {
    match EXPRESSION_ORDER.iter().position(|known| *known == name) {
        Some(idx) => (idx, ""),
        None => (EXPRESSION_ORDER.len(), name),
    }
}

/// Pick the expression with the highest confidence.
///
/// Entries are visited in canonical order and only a strictly greater score
/// replaces the current best, so on an exact tie the canonically earlier
/// name wins. NaN scores are skipped. Returns `None` for an empty set (or one
/// holding only NaN), which a detector that found a face never produces.
pub fn resolve(scores: &ExpressionScoreSet) -> Option<Mood> {
    let mut entries: Vec<(&str, f32)> = scores.iter().collect();
    entries.sort_by(|a, b| canonical_rank(a.0).cmp(&canonical_rank(b.0)));

    let mut best: Option<(&str, f32)> = None;
    for (name, score) in entries {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((name, score)),
        }
    }

    best.map(|(name, _)| Mood::new(name))
}
