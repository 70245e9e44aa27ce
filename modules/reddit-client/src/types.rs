use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Response of `POST /api/v1/access_token`. Failed grants come back with a
/// 200 status and only `error` set.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<u64>,
    pub error: Option<String>,
}

/// `{ "kind": "Listing", "data": { "children": [...] } }`
#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thing {
    pub kind: String,
    pub data: serde_json::Value,
}

/// Host prefix of every stored post locator.
pub const PERMALINK_BASE: &str = "https://reddit.com";

/// A submission (`t3`) as returned by listing and search endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub id: String,
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub permalink: String,
    pub subreddit: String,
    pub created_utc: f64,
}

impl RedditPost {
    /// Absolute permalink, stable across edits. Uses the bare `reddit.com`
    /// host so it matches locators already stored in history files.
    pub fn url(&self) -> String {
        format!("{}{}", PERMALINK_BASE, self.permalink)
    }

    /// `None` when `created_utc` is not a representable timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if !self.created_utc.is_finite() {
            return None;
        }
        Utc.timestamp_opt(self.created_utc as i64, 0).single()
    }
}

impl Listing {
    /// Submissions only; comments and malformed children are dropped.
    pub fn into_posts(self) -> Vec<RedditPost> {
        self.data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t3")
            .filter_map(|thing| match serde_json::from_value(thing.data) {
                Ok(post) => Some(post),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed listing child");
                    None
                }
            })
            .collect()
    }
}

/// Response of `POST /api/compose` with `api_type=json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeResponse {
    pub json: ComposeBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComposeBody {
    /// Each error is `[CODE, message, field]`.
    #[serde(default)]
    pub errors: Vec<Vec<serde_json::Value>>,
}

impl ComposeBody {
    /// First `(code, message)` pair, if Reddit reported any error.
    pub fn first_error(&self) -> Option<(String, String)> {
        let error = self.errors.first()?;
        let field = |i: usize| {
            error
                .get(i)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Some((field(0), field(1)))
    }
}
