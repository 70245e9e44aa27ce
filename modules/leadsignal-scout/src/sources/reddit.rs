use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use leadsignal_common::ContentItem;
use reddit_client::{RedditClient, RedditPost};

use crate::source::ContentSource;

/// Reads posts through the Reddit OAuth API.
pub struct RedditSource {
    client: Arc<RedditClient>,
}

impl RedditSource {
    pub fn new(client: Arc<RedditClient>) -> Self {
        Self { client }
    }
}

/// Posts without a usable creation time are dropped; they could not pass the
/// freshness gate honestly.
fn to_item(post: RedditPost) -> Option<ContentItem> {
    let Some(created_at) = post.created_at() else {
        debug!(id = %post.id, created_utc = post.created_utc, "Skipping post with invalid timestamp");
        return None;
    };
    Some(ContentItem {
        locator: post.url(),
        created_at,
        author: post.author,
        title: post.title,
        body: post.selftext,
        channel: post.subreddit,
    })
}

fn to_items(posts: Vec<RedditPost>) -> Vec<ContentItem> {
    posts.into_iter().filter_map(to_item).collect()
}

#[async_trait]
impl ContentSource for RedditSource {
    async fn newest(&self, channel: &str, limit: u32) -> Result<Vec<ContentItem>> {
        Ok(to_items(self.client.new_posts(channel, limit).await?))
    }

    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        Ok(to_items(self.client.search(channel, query, limit).await?))
    }

    async fn search_top(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        Ok(to_items(self.client.search_top(channel, query, limit).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(created_utc: f64) -> RedditPost {
        serde_json::from_value(serde_json::json!({
            "id": "abc", "author": "Client1", "title": "Need a dev", "selftext": "",
            "permalink": "/r/forhire/comments/abc/need_a_dev/", "subreddit": "forhire",
            "created_utc": created_utc
        }))
        .unwrap()
    }

    #[test]
    fn locator_uses_bare_reddit_host() {
        let item = to_item(post(1_700_000_000.0)).unwrap();
        assert_eq!(item.locator, "https://reddit.com/r/forhire/comments/abc/need_a_dev/");
    }

    #[test]
    fn post_with_bad_timestamp_is_dropped() {
        assert!(to_item(post(f64::MAX)).is_none());
    }
}
