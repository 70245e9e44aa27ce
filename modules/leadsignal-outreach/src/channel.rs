//! The contact channel seam and the rule that splits its failures into
//! permanent and transient.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;

/// A failed send. `code` is the channel's machine-readable reason, when it
/// gave one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
    pub code: Option<String>,
    pub message: String,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}: {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ChannelError {}

impl ChannelError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// A failure with no reason code (network errors, 5xx and the like).
    pub fn uncoded(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ContactChannel: Send + Sync {
    /// Deliver one message to `handle`. `Ok` means the channel accepted it.
    async fn send(&self, handle: &str, subject: &str, body: &str) -> Result<(), ChannelError>;
}

/// Result of one contact attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The target will never accept a message; record and move on.
    Permanent { code: String },
    /// Worth retrying in a later cycle.
    Transient { reason: String },
}

/// Maps channel errors to [`Delivery`] by reason code. Codes outside the
/// permanent set, and errors without a code, are transient.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    permanent: HashSet<String>,
}

impl FailureClassifier {
    pub fn new<I, S>(permanent_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            permanent: permanent_codes
                .into_iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, error: &ChannelError) -> Delivery {
        match &error.code {
            Some(code) if self.permanent.contains(&code.to_ascii_uppercase()) => {
                Delivery::Permanent { code: code.clone() }
            }
            _ => Delivery::Transient {
                reason: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use leadsignal_common::config::DEFAULT_PERMANENT_FAILURE_CODES;

    use super::*;

    #[test]
    fn known_codes_are_permanent() {
        let classifier = FailureClassifier::new(DEFAULT_PERMANENT_FAILURE_CODES);
        assert_eq!(
            classifier.classify(&ChannelError::new("USER_DOESNT_EXIST", "gone")),
            Delivery::Permanent {
                code: "USER_DOESNT_EXIST".into()
            }
        );
        assert_eq!(
            classifier.classify(&ChannelError::new("not_whitelisted_by_user_message", "nope")),
            Delivery::Permanent {
                code: "not_whitelisted_by_user_message".into()
            }
        );
    }

    #[test]
    fn unknown_and_missing_codes_are_transient() {
        let classifier = FailureClassifier::new(["USER_DOESNT_EXIST"]);
        assert!(matches!(
            classifier.classify(&ChannelError::new("SOMETHING_NEW", "huh")),
            Delivery::Transient { .. }
        ));
        assert_eq!(
            classifier.classify(&ChannelError::uncoded("connection reset")),
            Delivery::Transient {
                reason: "connection reset".into()
            }
        );
    }
}
