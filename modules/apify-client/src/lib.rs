//! Apify REST client, narrowed to what discovery needs from the
//! trudax/reddit-scraper actor: start a run, wait for it, read its dataset.

pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{RedditPost, RedditScraperInput, RunData, StartUrl};

use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for trudax/reddit-scraper.
const REDDIT_SCRAPER: &str = "FgJtjDwJCLhRH9saM";

/// Each poll long-waits up to 60 s server-side, so this bounds a run at
/// roughly half an hour.
const MAX_WAIT_POLLS: u32 = 30;

pub struct ApifyClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

/// Turn a non-2xx response into `ApifyError::Api` with the body as message.
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApifyError::Api {
        status: status.as_u16(),
        message: body,
    })
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.client.get(url).bearer_auth(&self.token).send().await?;
        Ok(check_status(resp).await?.json().await?)
    }

    /// Start an actor run. Returns immediately with run metadata.
    pub async fn start_run<I: Serialize>(&self, actor_id: &str, input: &I) -> Result<RunData> {
        let url = format!("{}/acts/{}/runs", self.base_url, actor_id);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;
        let api_resp: ApiResponse<RunData> = check_status(resp).await?.json().await?;
        Ok(api_resp.data)
    }

    /// Poll until a run reaches a terminal status, using `waitForFinish=60`
    /// long-polling.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!("{}/actor-runs/{}?waitForFinish=60", self.base_url, run_id);
        for _ in 0..MAX_WAIT_POLLS {
            let run: ApiResponse<RunData> = self.get_json(&url).await?;
            match run.data.status.as_str() {
                "SUCCEEDED" => return Ok(run.data),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed {
                        run_id: run_id.to_string(),
                        status: run.data.status,
                    });
                }
                status => tracing::debug!(run_id, status, "Run still in progress"),
            }
        }
        Err(ApifyError::StillRunning {
            run_id: run_id.to_string(),
            polls: MAX_WAIT_POLLS,
        })
    }

    /// Fetch dataset items from a completed run.
    pub async fn get_dataset_items<T: DeserializeOwned>(&self, dataset_id: &str) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items?format=json", self.base_url, dataset_id);
        self.get_json(&url).await
    }

    /// Start a reddit-scraper run, wait for it, and return only post records.
    async fn run_reddit_scraper(&self, input: &RedditScraperInput) -> Result<Vec<RedditPost>> {
        let run = self.start_run(REDDIT_SCRAPER, input).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        let items: Vec<RedditPost> = self
            .get_dataset_items(&completed.default_dataset_id)
            .await?;
        let total = items.len();
        let posts: Vec<RedditPost> = items.into_iter().filter(RedditPost::is_post).collect();
        tracing::info!(
            run_id = %completed.id,
            posts = posts.len(),
            skipped = total - posts.len(),
            "Fetched Reddit posts from dataset"
        );

        Ok(posts)
    }

    /// Newest posts of a subreddit.
    pub async fn scrape_subreddit(&self, subreddit: &str, limit: u32) -> Result<Vec<RedditPost>> {
        tracing::info!(subreddit, limit, "Starting subreddit scrape");
        let input = RedditScraperInput {
            start_urls: vec![StartUrl {
                url: format!("https://www.reddit.com/r/{}/new/", subreddit),
            }],
            max_items: limit,
            sort: "new".to_string(),
            skip_comments: true,
            skip_community: true,
            ..Default::default()
        };
        self.run_reddit_scraper(&input).await
    }

    /// Keyword search scoped to one subreddit, newest first.
    pub async fn search_subreddit(
        &self,
        subreddit: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>> {
        tracing::info!(subreddit, query, limit, "Starting subreddit search");
        let input = RedditScraperInput {
            searches: vec![query.to_string()],
            community: Some(subreddit.to_string()),
            max_items: limit,
            sort: "new".to_string(),
            skip_comments: true,
            skip_community: true,
            ..Default::default()
        };
        self.run_reddit_scraper(&input).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer) -> ApifyClient {
        ApifyClient::new("apify_token".into()).with_base_url(server.base_url())
    }

    fn run(status: &str) -> serde_json::Value {
        json!({"data": {"id": "run1", "status": status, "defaultDatasetId": "ds1"}})
    }

    #[tokio::test]
    async fn search_runs_actor_and_keeps_only_posts() {
        let server = MockServer::start();
        let start = server.mock(|when, then| {
            when.method(POST)
                .path(format!("/acts/{REDDIT_SCRAPER}/runs"))
                .header("authorization", "Bearer apify_token")
                .body_includes("\"searchCommunityName\":\"forhire\"");
            then.status(201).json_body(run("RUNNING"));
        });
        server.mock(|when, then| {
            when.method(GET).path("/actor-runs/run1");
            then.status(200).json_body(run("SUCCEEDED"));
        });
        server.mock(|when, then| {
            when.method(GET).path("/datasets/ds1/items");
            then.status(200).json_body(json!([
                {"url": "https://www.reddit.com/r/forhire/comments/a/", "username": "client",
                 "title": "Need a dev", "createdAt": "2025-03-01T12:00:00.000Z", "dataType": "post"},
                {"url": "https://www.reddit.com/r/forhire/comments/a/c/", "dataType": "comment"}
            ]));
        });

        let posts = client(&server)
            .search_subreddit("forhire", "need developer", 10)
            .await
            .unwrap();

        assert_eq!(start.calls(), 1);
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].username.as_deref(), Some("client"));
    }

    #[tokio::test]
    async fn failed_run_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(format!("/acts/{REDDIT_SCRAPER}/runs"));
            then.status(201).json_body(run("READY"));
        });
        server.mock(|when, then| {
            when.method(GET).path("/actor-runs/run1");
            then.status(200).json_body(run("ABORTED"));
        });

        let err = client(&server).scrape_subreddit("forhire", 5).await.unwrap_err();
        assert!(matches!(err, ApifyError::RunFailed { ref status, .. } if status == "ABORTED"));
    }

    #[tokio::test]
    async fn http_error_keeps_status_and_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(format!("/acts/{REDDIT_SCRAPER}/runs"));
            then.status(402).body("monthly usage exceeded");
        });

        let err = client(&server).scrape_subreddit("forhire", 5).await.unwrap_err();
        match err {
            ApifyError::Api { status, message } => {
                assert_eq!(status, 402);
                assert!(message.contains("usage"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
