use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Content ---

/// A post observed on the upstream content source. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable permalink of the post.
    pub locator: String,
    /// Author handle as the platform reports it (original casing).
    pub author: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Origin channel, e.g. a subreddit name.
    pub channel: String,
}

impl ContentItem {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(&self.author, &self.locator)
    }
}

// --- Identity ---

/// Placeholder authors the platform reports for removed accounts.
const DELETED_AUTHORS: &[&str] = &["[deleted]", "[removed]"];

/// Normalize a contact handle: trimmed, lowercase, without a `u/` prefix.
pub fn normalize_handle(raw: &str) -> String {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("/u/")
        .or_else(|| trimmed.strip_prefix("u/"))
        .unwrap_or(trimmed);
    stripped.trim().to_lowercase()
}

/// Normalize a content locator: trimmed, otherwise exact.
pub fn normalize_locator(raw: &str) -> String {
    raw.trim().to_string()
}

/// The (handle, locator) pair used for deduplication. Either half alone is
/// enough to suppress a repeat attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub handle: String,
    pub locator: String,
}

impl IdentityKey {
    pub fn new(handle: &str, locator: &str) -> Self {
        Self {
            handle: normalize_handle(handle),
            locator: normalize_locator(locator),
        }
    }

    /// Both halves present and the handle is a real account.
    pub fn is_complete(&self) -> bool {
        !self.handle.is_empty()
            && !self.locator.is_empty()
            && !DELETED_AUTHORS.contains(&self.handle.as_str())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u/{} ({})", self.handle, self.locator)
    }
}

// --- Leads ---

/// One rule class that fired, with the literal substrings that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedSignal {
    pub class: String,
    pub matches: Vec<String>,
}

/// Render matched signals as `hire="developer"; payment="$500"` for audit.
pub fn render_signals(signals: &[MatchedSignal]) -> String {
    signals
        .iter()
        .map(|s| {
            let quoted: Vec<String> = s.matches.iter().map(|m| format!("{m:?}")).collect();
            format!("{}={}", s.class, quoted.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// A classified candidate worth contacting. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lead {
    pub key: IdentityKey,
    pub category: String,
    /// Human-readable explanation of which rules fired. Never empty.
    pub matched_signal: String,
    pub signals: Vec<MatchedSignal>,
    /// Ordering within a cycle only, never a filter.
    pub priority: i64,
}

/// A lead together with the item it was classified from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub item: ContentItem,
    pub lead: Lead,
}

impl Candidate {
    pub fn key(&self) -> &IdentityKey {
        &self.lead.key
    }
}

// --- Outcomes ---

/// Terminal result stored for an identity. Ordered by precedence when
/// reconciliation has to choose between two entries recorded at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Contacted,
    PermanentlySkipped,
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contacted => write!(f, "contacted"),
            Self::PermanentlySkipped => write!(f, "permanently_skipped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_normalization_strips_prefix_and_case() {
        assert_eq!(normalize_handle("  Alice "), "alice");
        assert_eq!(normalize_handle("u/Alice"), "alice");
        assert_eq!(normalize_handle("/u/ALICE"), "alice");
    }

    #[test]
    fn locator_normalization_keeps_case() {
        assert_eq!(
            normalize_locator(" https://reddit.com/r/X/comments/Ab1/ "),
            "https://reddit.com/r/X/comments/Ab1/"
        );
    }

    #[test]
    fn deleted_authors_are_incomplete() {
        assert!(!IdentityKey::new("[deleted]", "https://reddit.com/x").is_complete());
        assert!(!IdentityKey::new("alice", "  ").is_complete());
        assert!(IdentityKey::new("alice", "https://reddit.com/x").is_complete());
    }

    #[test]
    fn signals_render_with_literal_matches() {
        let rendered = render_signals(&[
            MatchedSignal {
                class: "hire".into(),
                matches: vec!["developer".into()],
            },
            MatchedSignal {
                class: "payment".into(),
                matches: vec!["$500".into(), "paid".into()],
            },
        ]);
        assert_eq!(rendered, r#"hire="developer"; payment="$500", "paid""#);
    }
}
