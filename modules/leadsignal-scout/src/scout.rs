use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use leadsignal_common::{Candidate, ContentItem};

use crate::ruleset::Ruleset;
use crate::source::ContentSource;

/// Counters for one discovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub requests: u64,
    pub failed_requests: u64,
    pub items_fetched: u64,
    pub duplicate_items: u64,
    pub deleted_authors: u64,
    pub leads: u64,
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} failed={} fetched={} duplicates={} deleted_authors={} leads={}",
            self.requests,
            self.failed_requests,
            self.items_fetched,
            self.duplicate_items,
            self.deleted_authors,
            self.leads,
        )
    }
}

/// One upstream request of a discovery pass.
#[derive(Debug, Clone, Copy)]
enum Request<'a> {
    Newest,
    Search(&'a str),
    Top(&'a str),
}

/// Fetches everything a ruleset's discovery plan covers and classifies it.
pub struct Scout {
    source: Arc<dyn ContentSource>,
    ruleset: Arc<Ruleset>,
}

impl Scout {
    pub fn new(source: Arc<dyn ContentSource>, ruleset: Arc<Ruleset>) -> Self {
        Self { source, ruleset }
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    async fn fetch(&self, request: Request<'_>, channel: &str, limit: u32) -> Result<Vec<ContentItem>> {
        match request {
            Request::Newest => self.source.newest(channel, limit).await,
            Request::Search(query) => self.source.search(channel, query, limit).await,
            Request::Top(query) => self.source.search_top(channel, query, limit).await,
        }
    }

    /// Walk every (channel, query) pair of the plan, or the newest listing of
    /// each channel when the plan has no queries. A search with no results is
    /// followed by a top-of-month search, issued as its own request so the
    /// source's pacing applies to it.
    ///
    /// Individual request failures are logged and skipped; the pass fails only
    /// when every request failed. Items are deduplicated by locator in
    /// first-seen order, and items without a usable author are dropped.
    pub async fn discover(&self, stats: &mut ScanStats) -> Result<Vec<ContentItem>> {
        let plan = &self.ruleset.source;
        let mut items = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_error = None;

        for channel in &plan.channels {
            let requests: Vec<Request<'_>> = if plan.queries.is_empty() {
                vec![Request::Newest]
            } else {
                plan.queries.iter().map(|q| Request::Search(q)).collect()
            };

            for first in requests {
                let mut pending = Some(first);
                while let Some(request) = pending.take() {
                    stats.requests += 1;
                    debug!(channel = %channel, request = ?request, "Fetching");
                    let batch = match self.fetch(request, channel, plan.limit).await {
                        Ok(batch) => batch,
                        Err(e) => {
                            stats.failed_requests += 1;
                            warn!(channel = %channel, request = ?request, error = %e, "Content request failed, skipping");
                            last_error = Some(e);
                            continue;
                        }
                    };

                    if let (true, Request::Search(query)) = (batch.is_empty(), request) {
                        debug!(channel = %channel, query, "No recent results, trying top of month");
                        pending = Some(Request::Top(query));
                        continue;
                    }

                    stats.items_fetched += batch.len() as u64;
                    for item in batch {
                        if !item.key().is_complete() {
                            stats.deleted_authors += 1;
                            continue;
                        }
                        if !seen.insert(item.locator.trim().to_string()) {
                            stats.duplicate_items += 1;
                            continue;
                        }
                        items.push(item);
                    }
                }
            }
        }

        if stats.requests > 0 && stats.failed_requests == stats.requests {
            match last_error {
                Some(e) => bail!("every content request failed, last error: {e:#}"),
                None => bail!("every content request failed"),
            }
        }

        Ok(items)
    }

    /// One full pass: discover, then classify against `now`.
    pub async fn scan(&self, now: DateTime<Utc>) -> Result<(Vec<Candidate>, ScanStats)> {
        let mut stats = ScanStats::default();
        let items = self.discover(&mut stats).await?;

        let candidates: Vec<Candidate> = items
            .into_iter()
            .filter_map(|item| {
                let lead = self.ruleset.classify(&item, now)?;
                debug!(
                    handle = %lead.key.handle,
                    category = %lead.category,
                    signal = %lead.matched_signal,
                    "Lead classified"
                );
                Some(Candidate { item, lead })
            })
            .collect();
        stats.leads = candidates.len() as u64;

        info!(ruleset = %self.ruleset.id, "Scan complete. {stats}");
        Ok((candidates, stats))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::source::{ThrottledSource, SOURCE_REQUEST_INTERVAL};
    use crate::testing::{content_item, MockContentSource};

    const RULES: &str = r#"
        id = "t"

        [source]
        channels = ["forhire", "slavelabour"]
        queries = ["need developer"]
        limit = 10

        [[pipelines]]
        category = "Buyer"
        [[pipelines.classes]]
        name = "need"
        keywords = ["need"]

        [[templates]]
        subject = "s"
        body = "b"
    "#;

    fn ruleset(raw: &str) -> Arc<Ruleset> {
        Arc::new(Ruleset::from_toml(raw, "inline").unwrap())
    }

    #[tokio::test]
    async fn failed_channel_is_skipped_and_items_deduped() {
        let now = Utc::now();
        let post = content_item("alice", "https://r/1", "I need a developer", "", now);
        let source = MockContentSource::new()
            .on_search("forhire", "need developer", vec![post.clone(), post.clone()])
            .failing("slavelabour");

        let scout = Scout::new(Arc::new(source), ruleset(RULES));
        let (candidates, stats) = scout.scan(now).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.duplicate_items, 1);
    }

    #[tokio::test]
    async fn all_requests_failing_is_an_error() {
        let source = MockContentSource::new()
            .failing("forhire")
            .failing("slavelabour");
        let scout = Scout::new(Arc::new(source), ruleset(RULES));
        assert!(scout.scan(Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn empty_search_falls_back_to_top_of_month() {
        let now = Utc::now();
        let raw = RULES.replace(r#"channels = ["forhire", "slavelabour"]"#, r#"channels = ["forhire"]"#);
        let source = Arc::new(MockContentSource::new().on_search_top(
            "forhire",
            "need developer",
            vec![content_item("carol", "https://r/9", "need a hand", "", now)],
        ));

        let scout = Scout::new(source.clone(), ruleset(&raw));
        let (candidates, stats) = scout.scan(now).await.unwrap();

        assert_eq!(
            source.calls(),
            vec!["search:forhire:need developer", "top:forhire:need developer"]
        );
        assert_eq!(stats.requests, 2);
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_search_waits_for_the_request_interval() {
        let raw = RULES.replace(r#"channels = ["forhire", "slavelabour"]"#, r#"channels = ["forhire"]"#);
        let source = Arc::new(MockContentSource::new());
        let throttled: Arc<dyn ContentSource> = Arc::new(ThrottledSource::new(source.clone()));

        let start = tokio::time::Instant::now();
        Scout::new(throttled, ruleset(&raw)).scan(Utc::now()).await.unwrap();

        assert_eq!(source.calls().len(), 2);
        assert!(tokio::time::Instant::now() - start >= SOURCE_REQUEST_INTERVAL);
    }

    #[tokio::test]
    async fn plan_without_queries_reads_newest() {
        let now = Utc::now();
        let raw = RULES.replace(r#"queries = ["need developer"]"#, "");
        let source = Arc::new(MockContentSource::new().on_newest(
            "forhire",
            vec![
                content_item("[deleted]", "https://r/2", "need help", "", now),
                content_item("bob", "https://r/3", "need help", "", now - Duration::hours(1)),
            ],
        ));

        let scout = Scout::new(source.clone(), ruleset(&raw));
        let (candidates, stats) = scout.scan(now).await.unwrap();

        assert_eq!(source.calls(), vec!["newest:forhire", "newest:slavelabour"]);
        assert_eq!(stats.deleted_authors, 1);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].lead.key.handle, "bob");
    }
}
