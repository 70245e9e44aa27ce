// ContentSource: the one seam between discovery and the upstream platform.
//
// Production wraps the Reddit or Apify adapter in ThrottledSource; tests use
// MockContentSource from `testing`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use leadsignal_common::ContentItem;

/// Minimum spacing between two upstream requests.
pub const SOURCE_REQUEST_INTERVAL: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Newest items in a channel.
    async fn newest(&self, channel: &str, limit: u32) -> Result<Vec<ContentItem>>;

    /// Items in a channel matching a search query.
    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>>;

    /// Wider fallback for a search that found nothing recent. Sources without
    /// one return nothing.
    async fn search_top(&self, _channel: &str, _query: &str, _limit: u32) -> Result<Vec<ContentItem>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl<T: ContentSource + ?Sized> ContentSource for Arc<T> {
    async fn newest(&self, channel: &str, limit: u32) -> Result<Vec<ContentItem>> {
        (**self).newest(channel, limit).await
    }

    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        (**self).search(channel, query, limit).await
    }

    async fn search_top(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        (**self).search_top(channel, query, limit).await
    }
}

/// Serializes requests to an inner source and keeps at least `interval`
/// between the end of one request and the start of the next.
pub struct ThrottledSource<S> {
    inner: S,
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl<S: ContentSource> ThrottledSource<S> {
    pub fn new(inner: S) -> Self {
        Self::with_interval(inner, SOURCE_REQUEST_INTERVAL)
    }

    pub fn with_interval(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_request: Mutex::new(None),
        }
    }

    /// Run one request while holding the pacing lock.
    async fn paced<F, T>(&self, request: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        let result = request.await;
        *last = Some(Instant::now());
        result
    }
}

#[async_trait]
impl<S: ContentSource> ContentSource for ThrottledSource<S> {
    async fn newest(&self, channel: &str, limit: u32) -> Result<Vec<ContentItem>> {
        self.paced(self.inner.newest(channel, limit)).await
    }

    async fn search(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        self.paced(self.inner.search(channel, query, limit)).await
    }

    async fn search_top(&self, channel: &str, query: &str, limit: u32) -> Result<Vec<ContentItem>> {
        self.paced(self.inner.search_top(channel, query, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContentSource;

    #[tokio::test(start_paused = true)]
    async fn requests_are_spaced_by_interval() {
        let source = ThrottledSource::new(MockContentSource::new());

        let start = Instant::now();
        source.newest("a", 10).await.unwrap();
        let first_done = Instant::now();
        source.search("a", "q", 10).await.unwrap();
        source.newest("b", 10).await.unwrap();

        assert_eq!(first_done - start, Duration::ZERO);
        assert!(Instant::now() - start >= SOURCE_REQUEST_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_once_interval_has_passed() {
        let source = ThrottledSource::with_interval(MockContentSource::new(), Duration::from_secs(1));
        source.newest("a", 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = Instant::now();
        source.newest("a", 1).await.unwrap();
        assert_eq!(Instant::now() - before, Duration::ZERO);
    }
}
