use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use apify_client::{ApifyClient, RedditPost};
use leadsignal_common::ContentItem;
use reddit_client::PERMALINK_BASE;

use crate::source::ContentSource;

/// Reads posts through the Apify Reddit scraper actor. Slower than the API
/// (one actor run per request) but needs no Reddit app credentials for reads.
pub struct ApifySource {
    client: ApifyClient,
}

impl ApifySource {
    pub fn new(client: ApifyClient) -> Self {
        Self { client }
    }
}

/// Rewrite the scraper's `www.`/`old.` permalinks to the bare host used by
/// stored locators.
fn canonical_locator(url: &str) -> String {
    let url = url.trim();
    for host in ["https://www.reddit.com", "https://old.reddit.com", "http://www.reddit.com"] {
        if let Some(path) = url.strip_prefix(host) {
            return format!("{PERMALINK_BASE}{path}");
        }
    }
    url.to_string()
}

/// Dataset items missing a permalink, author or timestamp cannot become
/// content items.
fn to_item(post: RedditPost, channel: &str) -> Option<ContentItem> {
    let created_at = post.created_at()?;
    let (Some(locator), Some(author)) = (post.url, post.username) else {
        debug!(channel, "Skipping dataset item without url or author");
        return None;
    };
    Some(ContentItem {
        locator: canonical_locator(&locator),
        author,
        title: post.title.unwrap_or_default(),
        body: post.body.unwrap_or_default(),
        created_at,
        channel: post.community.unwrap_or_else(|| channel.to_string()),
    })
}

#[async_trait]
impl ContentSource for ApifySource {
    async fn newest(&self, channel: &str, limit: u32) -> Result<Vec<ContentItem>> {
        let posts = self.client.scrape_subreddit(channel, limit).await?;
        Ok(posts.into_iter().filter_map(|p| to_item(p, channel)).collect())
    }

    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        let posts = self.client.search_subreddit(channel, query, limit).await?;
        Ok(posts.into_iter().filter_map(|p| to_item(p, channel)).collect())
    }
}
