use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

use crate::error::LeadSignalError;

/// Reason codes the contact channel reports for targets that will never accept
/// a message. Anything else is treated as transient.
pub const DEFAULT_PERMANENT_FAILURE_CODES: &[&str] = &[
    "USER_DOESNT_EXIST",
    "NOT_WHITELISTED_BY_USER_MESSAGE",
    "USER_BLOCKED_MESSAGE",
    "INVALID_USER",
    "RATELIMIT",
];

/// A `[min, max]` window a pacing delay is drawn from, uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    pub min: Duration,
    pub max: Duration,
}

impl DelayWindow {
    pub fn new(min: Duration, max: Duration) -> Result<Self, LeadSignalError> {
        if min > max {
            return Err(LeadSignalError::Config(format!(
                "delay window min ({min:?}) exceeds max ({max:?})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    pub fn zero() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Draw one delay from the window.
    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min >= max {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Reddit,
    Apify,
}

impl FromStr for SourceKind {
    type Err = LeadSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Ok(Self::Reddit),
            "apify" => Ok(Self::Apify),
            other => Err(LeadSignalError::Config(format!(
                "CONTENT_SOURCE must be 'reddit' or 'apify', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

/// Process configuration loaded from environment variables (and `.env`).
/// Keyword vocabularies and templates live in the ruleset TOML instead.
#[derive(Debug, Clone)]
pub struct Config {
    pub reddit: RedditCredentials,

    // Content source
    pub content_source: SourceKind,
    pub apify_api_key: Option<String>,

    // Ruleset selection
    pub ruleset: String,
    pub rulesets_dir: PathBuf,

    // Persisted state
    pub state_dir: PathBuf,

    // Cycle budget
    pub max_attempts_per_cycle: u32,
    pub attempt_delay: DelayWindow,
    pub cycle_delay: DelayWindow,

    /// Overrides the ruleset's age ceiling when set.
    pub freshness: Option<chrono::Duration>,
    pub send_timeout: Duration,
    /// Record an identity as `error` after this many transient failures.
    pub escalate_after_transient: Option<u32>,
    pub permanent_failure_codes: Vec<String>,
}

impl Config {
    /// Load configuration from the environment. Missing credentials and
    /// malformed values are fatal.
    pub fn from_env() -> Result<Self, LeadSignalError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LeadSignalError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                LeadSignalError::Config(format!("{key} environment variable is required"))
            })
        };

        let reddit = RedditCredentials {
            client_id: required("REDDIT_CLIENT_ID")?,
            client_secret: required("REDDIT_CLIENT_SECRET")?,
            username: required("REDDIT_USERNAME")?,
            password: required("REDDIT_PASSWORD")?,
            user_agent: var("REDDIT_USER_AGENT").unwrap_or_else(|| "leadsignal/0.1".to_string()),
        };

        let content_source = match var("CONTENT_SOURCE") {
            Some(v) => v.parse()?,
            None => SourceKind::Reddit,
        };
        let apify_api_key = var("APIFY_API_KEY");
        if content_source == SourceKind::Apify && apify_api_key.is_none() {
            return Err(LeadSignalError::Config(
                "APIFY_API_KEY is required when CONTENT_SOURCE=apify".to_string(),
            ));
        }

        let attempt_delay = DelayWindow::new(
            Duration::from_secs(parse_var(&var, "ATTEMPT_DELAY_MIN_SECS", 60)?),
            Duration::from_secs(parse_var(&var, "ATTEMPT_DELAY_MAX_SECS", 120)?),
        )?;
        let cycle_delay = DelayWindow::new(
            Duration::from_secs(parse_var(&var, "CYCLE_DELAY_MIN_SECS", 25 * 60)?),
            Duration::from_secs(parse_var(&var, "CYCLE_DELAY_MAX_SECS", 40 * 60)?),
        )?;

        let freshness = match var("FRESHNESS_HOURS") {
            Some(v) => Some(parse_freshness(&v)?),
            None => None,
        };

        let escalate_after_transient = match parse_var(&var, "ESCALATE_AFTER_TRANSIENT", 0u32)? {
            0 => None,
            n => Some(n),
        };

        let permanent_failure_codes = match var("PERMANENT_FAILURE_CODES") {
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_PERMANENT_FAILURE_CODES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        let max_attempts_per_cycle = parse_var(&var, "MAX_ATTEMPTS_PER_CYCLE", 8u32)?;
        if max_attempts_per_cycle == 0 {
            return Err(LeadSignalError::Config(
                "MAX_ATTEMPTS_PER_CYCLE must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            reddit,
            content_source,
            apify_api_key,
            ruleset: var("RULESET").unwrap_or_else(|| "lead_finder_buyers".to_string()),
            rulesets_dir: PathBuf::from(var("RULESETS_DIR").unwrap_or_else(|| "rulesets".into())),
            state_dir: PathBuf::from(var("STATE_DIR").unwrap_or_else(|| "logs".into())),
            max_attempts_per_cycle,
            attempt_delay,
            cycle_delay,
            freshness,
            send_timeout: Duration::from_secs(parse_var(&var, "SEND_TIMEOUT_SECS", 30)?),
            escalate_after_transient,
            permanent_failure_codes,
        })
    }

    /// `{RULESETS_DIR}/{RULESET}.toml`
    pub fn ruleset_path(&self) -> PathBuf {
        self.rulesets_dir.join(format!("{}.toml", self.ruleset))
    }

    /// Snapshot file of the record store for the selected ruleset.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}_sentState.json", self.ruleset))
    }

    /// Append-only audit log for the selected ruleset.
    pub fn audit_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}_dmed.csv", self.ruleset))
    }

    /// Log the effective configuration with secrets reduced to previews.
    pub fn log_redacted(&self) {
        fn preview(val: &str) -> String {
            let n = val.chars().count().min(4);
            let head: String = val.chars().take(n).collect();
            format!("{}...({} chars)", head, val.len())
        }

        tracing::info!("Config loaded:");
        tracing::info!("  REDDIT_USERNAME: {}", self.reddit.username);
        tracing::info!("  REDDIT_CLIENT_ID: {}", preview(&self.reddit.client_id));
        tracing::info!("  REDDIT_CLIENT_SECRET: {}", preview(&self.reddit.client_secret));
        tracing::info!("  CONTENT_SOURCE: {:?}", self.content_source);
        tracing::info!(
            "  APIFY_API_KEY: {}",
            self.apify_api_key
                .as_deref()
                .map(preview)
                .unwrap_or_else(|| "<not set>".to_string())
        );
        tracing::info!("  RULESET: {} ({})", self.ruleset, self.ruleset_path().display());
        tracing::info!("  STATE_DIR: {}", self.state_dir.display());
        tracing::info!(
            max_attempts = self.max_attempts_per_cycle,
            attempt_delay = ?self.attempt_delay,
            cycle_delay = ?self.cycle_delay,
            send_timeout_secs = self.send_timeout.as_secs(),
            escalate_after = ?self.escalate_after_transient,
            "  Cycle budget"
        );
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T, LeadSignalError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, LeadSignalError> {
    raw.trim()
        .parse()
        .map_err(|_| LeadSignalError::Config(format!("{key} must be a number, got '{raw}'")))
}

/// A positive number of hours that fits a `chrono::Duration`.
fn parse_freshness(raw: &str) -> Result<chrono::Duration, LeadSignalError> {
    let hours = parse_value::<i64>("FRESHNESS_HOURS", raw)?;
    if hours <= 0 {
        return Err(LeadSignalError::Config(format!(
            "FRESHNESS_HOURS must be positive, got {hours}"
        )));
    }
    chrono::Duration::try_hours(hours).ok_or_else(|| {
        LeadSignalError::Config(format!("FRESHNESS_HOURS={hours} is out of range"))
    })
}
