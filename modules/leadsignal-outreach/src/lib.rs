//! Outreach: contact channels, message composition, and the cycle scheduler.

pub mod channel;
pub mod composer;
pub mod lead_source;
pub mod reddit_channel;
pub mod scheduler;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use channel::{ChannelError, ContactChannel, Delivery, FailureClassifier};
pub use composer::{ComposedMessage, MessageComposer};
pub use lead_source::LeadSource;
pub use reddit_channel::RedditChannel;
pub use scheduler::{select_candidates, CycleStats, CyclePhase, Outreach, OutreachSettings};
