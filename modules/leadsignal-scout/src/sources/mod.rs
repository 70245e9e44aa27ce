//! Adapters from concrete platform clients to [`ContentSource`](crate::ContentSource).

mod apify;
mod reddit;

pub use apify::ApifySource;
pub use reddit::RedditSource;
