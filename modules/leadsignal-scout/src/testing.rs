// Test mocks for discovery.
//
// MockContentSource answers from in-memory tables keyed by channel (and
// query), records every call, and can be told to fail specific requests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use leadsignal_common::ContentItem;

use crate::source::ContentSource;

/// Build a content item with sensible defaults for tests.
pub fn content_item(
    author: &str,
    locator: &str,
    title: &str,
    body: &str,
    created_at: DateTime<Utc>,
) -> ContentItem {
    ContentItem {
        locator: locator.to_string(),
        author: author.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        created_at,
        channel: "forhire".to_string(),
    }
}

/// In-memory content source. Unregistered requests return no items.
/// Builder pattern: `.on_newest()`, `.on_search()`, `.on_search_top()`, `.failing()`.
#[derive(Default)]
pub struct MockContentSource {
    newest: HashMap<String, Vec<ContentItem>>,
    searches: HashMap<(String, String), Vec<ContentItem>>,
    top_searches: HashMap<(String, String), Vec<ContentItem>>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl MockContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_newest(mut self, channel: &str, items: Vec<ContentItem>) -> Self {
        self.newest.insert(channel.to_string(), items);
        self
    }

    pub fn on_search(mut self, channel: &str, query: &str, items: Vec<ContentItem>) -> Self {
        self.searches
            .insert((channel.to_string(), query.to_string()), items);
        self
    }

    pub fn on_search_top(mut self, channel: &str, query: &str, items: Vec<ContentItem>) -> Self {
        self.top_searches
            .insert((channel.to_string(), query.to_string()), items);
        self
    }

    /// Every request against `channel` fails.
    pub fn failing(mut self, channel: &str) -> Self {
        self.failing.insert(channel.to_string());
        self
    }

    /// Requests made so far, as `newest:<channel>`, `search:<channel>:<query>`
    /// or `top:<channel>:<query>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn newest(&self, channel: &str, _limit: u32) -> Result<Vec<ContentItem>> {
        self.record(format!("newest:{channel}"));
        if self.failing.contains(channel) {
            bail!("MockContentSource: r/{channel} is failing");
        }
        Ok(self.newest.get(channel).cloned().unwrap_or_default())
    }

    async fn search(&self, channel: &str, query: &str, _limit: u32) -> Result<Vec<ContentItem>> {
        self.record(format!("search:{channel}:{query}"));
        if self.failing.contains(channel) {
            bail!("MockContentSource: r/{channel} is failing");
        }
        Ok(self
            .searches
            .get(&(channel.to_string(), query.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn search_top(&self, channel: &str, query: &str, _limit: u32) -> Result<Vec<ContentItem>> {
        self.record(format!("top:{channel}:{query}"));
        if self.failing.contains(channel) {
            bail!("MockContentSource: r/{channel} is failing");
        }
        Ok(self
            .top_searches
            .get(&(channel.to_string(), query.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
