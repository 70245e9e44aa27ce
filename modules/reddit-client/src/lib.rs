//! Minimal Reddit API client for a script-type OAuth app: password-grant
//! authentication, subreddit listings and search, and private messages.

pub mod error;
pub mod types;

pub use error::{RedditError, Result};
pub use types::{RedditPost, PERMALINK_BASE};

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use tokio::sync::Mutex;
use types::{ComposeResponse, Listing, TokenResponse};

const AUTH_BASE_URL: &str = "https://www.reddit.com";
const API_BASE_URL: &str = "https://oauth.reddit.com";

/// Refresh this long before Reddit's stated expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RedditOptions {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    client: Client,
    options: RedditOptions,
    auth_base: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl RedditClient {
    pub fn new(options: RedditOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            options,
            auth_base: AUTH_BASE_URL.to_string(),
            api_base: API_BASE_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point both the token endpoint and the API at another host.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.auth_base = base.clone();
        self.api_base = base;
        self
    }

    /// Return a cached bearer token, fetching a new one when it is missing or
    /// about to expire.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let url = format!("{}/api/v1/access_token", self.auth_base);
        let form = [
            ("grant_type", "password"),
            ("username", self.options.username.as_str()),
            ("password", self.options.password.as_str()),
        ];
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.options.client_id, Some(&self.options.client_secret))
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Auth(format!("status {}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = resp.json().await?;
        let value = match (token.access_token, token.error) {
            (Some(value), _) => value,
            (None, Some(error)) => return Err(RedditError::Auth(error)),
            (None, None) => return Err(RedditError::Auth("no access_token in response".into())),
        };

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(3600));
        tracing::debug!(expires_in_secs = ttl.as_secs(), "Obtained Reddit access token");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    async fn get_listing(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<RedditPost>> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .query(&[("raw_json", "1")])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let listing: Listing = resp.json().await?;
        Ok(listing.into_posts())
    }

    /// Newest submissions in a subreddit.
    pub async fn new_posts(&self, subreddit: &str, limit: u32) -> Result<Vec<RedditPost>> {
        let path = format!("/r/{}/new", subreddit);
        let posts = self
            .get_listing(&path, &[("limit", limit.to_string())])
            .await?;
        tracing::debug!(subreddit, count = posts.len(), "Fetched newest posts");
        Ok(posts)
    }

    fn search_params(query: &str, sort: &str, window: &str, limit: u32) -> Vec<(&'static str, String)> {
        vec![
            ("q", query.to_string()),
            ("restrict_sr", "1".to_string()),
            ("sort", sort.to_string()),
            ("t", window.to_string()),
            ("limit", limit.to_string()),
        ]
    }

    /// Search one subreddit, newest first.
    pub async fn search(&self, subreddit: &str, query: &str, limit: u32) -> Result<Vec<RedditPost>> {
        let path = format!("/r/{}/search", subreddit);
        let posts = self
            .get_listing(&path, &Self::search_params(query, "new", "all", limit))
            .await?;
        tracing::debug!(subreddit, query, count = posts.len(), "Search returned posts");
        Ok(posts)
    }

    /// Search one subreddit for the top posts of the past month. Used as the
    /// fallback when [`search`](Self::search) finds nothing recent.
    pub async fn search_top(
        &self,
        subreddit: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>> {
        let path = format!("/r/{}/search", subreddit);
        let posts = self
            .get_listing(&path, &Self::search_params(query, "top", "month", limit))
            .await?;
        tracing::debug!(subreddit, query, count = posts.len(), "Top-of-month search returned posts");
        Ok(posts)
    }

    /// Send a private message. Reddit reports refusals in the body of a 200
    /// response; those surface as [`RedditError::Rejected`].
    pub async fn compose(&self, to: &str, subject: &str, text: &str) -> Result<()> {
        let token = self.access_token().await?;
        let url = format!("{}/api/compose", self.api_base);
        let form = [
            ("api_type", "json"),
            ("to", to),
            ("subject", subject),
            ("text", text),
        ];
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            self.forget_token().await;
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: ComposeResponse = resp.json().await?;
        if let Some((code, message)) = body.json.first_error() {
            return Err(RedditError::Rejected { code, message });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer) -> RedditClient {
        RedditClient::new(RedditOptions {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            username: "bot".into(),
            password: "pw".into(),
            user_agent: "leadsignal-test/0.1".into(),
        })
        .unwrap()
        .with_base_url(server.base_url())
    }

    fn mock_token(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/access_token")
                .body_includes("grant_type=password");
            then.status(200)
                .json_body(json!({"access_token": "tok", "token_type": "bearer", "expires_in": 3600}));
        })
    }

    fn post(id: &str) -> serde_json::Value {
        json!({"kind": "t3", "data": {
            "id": id, "author": "someone", "title": "Need help", "selftext": "",
            "permalink": format!("/r/forhire/comments/{id}/x/"), "subreddit": "forhire",
            "created_utc": 1700000000.0
        }})
    }

    #[tokio::test]
    async fn compose_succeeds_and_token_is_cached() {
        let server = MockServer::start();
        let token = mock_token(&server);
        let compose = server.mock(|when, then| {
            when.method(POST)
                .path("/api/compose")
                .header("authorization", "Bearer tok")
                .body_includes("to=alice");
            then.status(200).json_body(json!({"json": {"errors": []}}));
        });

        let reddit = client(&server);
        reddit.compose("alice", "Hi", "Hello there").await.unwrap();
        reddit.compose("alice", "Hi again", "Hello").await.unwrap();

        assert_eq!(token.calls(), 1);
        assert_eq!(compose.calls(), 2);
    }

    #[tokio::test]
    async fn compose_refusal_carries_reason_code() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/api/compose");
            then.status(200).json_body(json!({"json": {"errors": [
                ["USER_DOESNT_EXIST", "that user doesn't exist", "to"]
            ]}}));
        });

        let err = client(&server).compose("ghost", "s", "t").await.unwrap_err();
        assert_eq!(err.code(), Some("USER_DOESNT_EXIST"));
    }

    #[tokio::test]
    async fn http_429_maps_to_ratelimit_code() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(POST).path("/api/compose");
            then.status(429).body("slow down");
        });

        let err = client(&server).compose("bob", "s", "t").await.unwrap_err();
        assert_eq!(err.code(), Some("RATELIMIT"));
    }

    #[tokio::test]
    async fn failed_grant_is_an_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/v1/access_token");
            then.status(200).json_body(json!({"error": "invalid_grant"}));
        });

        let err = client(&server).new_posts("forhire", 10).await.unwrap_err();
        assert!(matches!(err, RedditError::Auth(ref e) if e == "invalid_grant"));
    }

    #[tokio::test]
    async fn search_and_search_top_use_their_own_sort() {
        let server = MockServer::start();
        mock_token(&server);
        let newest = server.mock(|when, then| {
            when.method(GET)
                .path("/r/forhire/search")
                .query_param("sort", "new")
                .query_param("restrict_sr", "1");
            then.status(200)
                .json_body(json!({"kind": "Listing", "data": {"children": []}}));
        });
        let top = server.mock(|when, then| {
            when.method(GET)
                .path("/r/forhire/search")
                .query_param("sort", "top")
                .query_param("t", "month");
            then.status(200)
                .json_body(json!({"kind": "Listing", "data": {"children": [post("a1")]}}));
        });

        let reddit = client(&server);
        assert!(reddit.search("forhire", "need developer", 25).await.unwrap().is_empty());
        assert_eq!(top.calls(), 0);

        let posts = reddit.search_top("forhire", "need developer", 25).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(newest.calls(), 1);
        assert_eq!(top.calls(), 1);
    }

    #[tokio::test]
    async fn new_posts_reads_listing() {
        let server = MockServer::start();
        mock_token(&server);
        server.mock(|when, then| {
            when.method(GET).path("/r/forhire/new").query_param("limit", "5");
            then.status(200).json_body(
                json!({"kind": "Listing", "data": {"children": [post("p1"), post("p2")]}}),
            );
        });

        let posts = client(&server).new_posts("forhire", 5).await.unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }
}
