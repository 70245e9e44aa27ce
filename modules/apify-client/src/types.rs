use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// A start URL entry for scraper input.
#[derive(Debug, Clone, Serialize)]
pub struct StartUrl {
    pub url: String,
}

/// Input for the trudax/reddit-scraper actor.
///
/// Either `start_urls` (listing pages) or `searches` (keyword search scoped
/// to `community`) drives the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RedditScraperInput {
    #[serde(rename = "startUrls", skip_serializing_if = "Vec::is_empty")]
    pub start_urls: Vec<StartUrl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub searches: Vec<String>,
    #[serde(rename = "searchCommunityName", skip_serializing_if = "Option::is_none")]
    pub community: Option<String>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    pub sort: String,
    /// Restrict to posts; comments and community records are not needed.
    #[serde(rename = "skipComments")]
    pub skip_comments: bool,
    #[serde(rename = "skipCommunity")]
    pub skip_community: bool,
}

/// A single Reddit post from the Apify dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct RedditPost {
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub username: Option<String>,
    #[serde(rename = "parsedCommunityName")]
    pub community: Option<String>,
    #[serde(rename = "upVotes")]
    pub up_votes: Option<i64>,
    #[serde(rename = "numberOfComments")]
    pub number_of_comments: Option<i64>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    /// Apify returns "community", "post", or "comment". Used to filter out non-posts.
    #[serde(rename = "dataType")]
    pub data_type: Option<String>,
}

impl RedditPost {
    /// True unless the actor explicitly tagged this record as something else.
    pub fn is_post(&self) -> bool {
        !matches!(self.data_type.as_deref(), Some(t) if t != "post")
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reddit_post_parses_dataset_item() {
        let raw = r#"{
            "url": "https://www.reddit.com/r/forhire/comments/abc/hiring/",
            "title": "[Hiring] Rust dev",
            "body": "Paying $500",
            "username": "SomeClient",
            "parsedCommunityName": "forhire",
            "createdAt": "2025-03-01T12:00:00.000Z",
            "dataType": "post"
        }"#;
        let post: RedditPost = serde_json::from_str(raw).unwrap();
        assert!(post.is_post());
        assert_eq!(post.username.as_deref(), Some("SomeClient"));
        assert!(post.created_at().is_some());
    }

    #[test]
    fn comments_are_not_posts() {
        let post: RedditPost = serde_json::from_str(r#"{"dataType": "comment"}"#).unwrap();
        assert!(!post.is_post());
        assert!(post.created_at().is_none());
    }

    #[test]
    fn search_input_omits_empty_start_urls() {
        let input = RedditScraperInput {
            searches: vec!["need a developer".into()],
            community: Some("forhire".into()),
            max_items: 25,
            sort: "new".into(),
            skip_comments: true,
            skip_community: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&input).unwrap();
        assert!(json.get("startUrls").is_none());
        assert_eq!(json["searchCommunityName"], "forhire");
        assert_eq!(json["maxItems"], 25);
    }
}
