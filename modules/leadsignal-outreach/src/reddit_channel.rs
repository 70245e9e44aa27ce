use std::sync::Arc;

use async_trait::async_trait;

use reddit_client::{RedditClient, RedditError};

use crate::channel::{ChannelError, ContactChannel};

/// Private messages through `/api/compose`.
pub struct RedditChannel {
    client: Arc<RedditClient>,
}

impl RedditChannel {
    pub fn new(client: Arc<RedditClient>) -> Self {
        Self { client }
    }
}

fn to_channel_error(err: RedditError) -> ChannelError {
    match err.code() {
        Some(code) => ChannelError::new(code, err.to_string()),
        None => ChannelError::uncoded(err.to_string()),
    }
}

#[async_trait]
impl ContactChannel for RedditChannel {
    async fn send(&self, handle: &str, subject: &str, body: &str) -> Result<(), ChannelError> {
        self.client
            .compose(handle, subject, body)
            .await
            .map_err(to_channel_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_keeps_reddit_code() {
        let err = to_channel_error(RedditError::Rejected {
            code: "USER_BLOCKED_MESSAGE".into(),
            message: "blocked".into(),
        });
        assert_eq!(err.code.as_deref(), Some("USER_BLOCKED_MESSAGE"));
    }

    #[test]
    fn network_error_has_no_code() {
        let err = to_channel_error(RedditError::Network("reset".into()));
        assert_eq!(err.code, None);
        assert!(err.message.contains("reset"));
    }
}
