pub mod config;
pub mod error;
pub mod template;
pub mod types;

pub use config::{Config, DelayWindow, RedditCredentials, SourceKind};
pub use error::LeadSignalError;
pub use template::{render_template, validate_template, TEMPLATE_VARS};
pub use types::*;
