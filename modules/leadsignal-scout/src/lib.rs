//! Lead discovery: rulesets, classification, and content sources.

pub mod classifier;
pub mod ruleset;
pub mod scout;
pub mod source;
pub mod sources;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use ruleset::{
    load_ruleset, MessageTemplate, Pipeline, Ruleset, RulesetError, SignalClass, SourcePlan,
};
pub use scout::{ScanStats, Scout};
pub use source::{ContentSource, ThrottledSource, SOURCE_REQUEST_INTERVAL};
pub use sources::{ApifySource, RedditSource};
