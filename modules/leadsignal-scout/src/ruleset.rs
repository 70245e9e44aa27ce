//! Ruleset files: what to fetch, how to classify it, and what to send.
//!
//! A ruleset is a TOML document under `rulesets/<id>.toml`. Loading it
//! validates everything and compiles patterns once, so a ruleset that loads
//! can never fail at classification time.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use thiserror::Error;

use leadsignal_common::{validate_template, TEMPLATE_VARS};

/// Default age ceiling when a ruleset does not declare one.
pub const DEFAULT_MAX_AGE_HOURS: i64 = 48;

/// Default per-request item limit for the discovery plan.
pub const DEFAULT_SOURCE_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("failed to read ruleset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ruleset {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid pattern {pattern:?} in class '{class}': {source}")]
    Pattern {
        class: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid ruleset: {0}")]
    Invalid(String),
}

// --- On-disk shape ---

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesetFile {
    pub id: String,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    #[serde(default)]
    pub min_text_length: usize,
    #[serde(default)]
    pub source: SourceFile,
    #[serde(default)]
    pub exclude: Vec<ClassFile>,
    #[serde(default)]
    pub pipelines: Vec<PipelineFile>,
    #[serde(default)]
    pub templates: Vec<TemplateFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceFile {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub queries: Vec<String>,
    #[serde(default = "default_source_limit")]
    pub limit: u32,
}

impl Default for SourceFile {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            queries: Vec::new(),
            limit: DEFAULT_SOURCE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassFile {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: i64,
    #[serde(default = "default_required")]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    pub category: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub min_score: i64,
    #[serde(default)]
    pub exclude: Vec<ClassFile>,
    #[serde(default)]
    pub classes: Vec<ClassFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateFile {
    pub subject: String,
    pub body: String,
}

fn default_max_age_hours() -> i64 {
    DEFAULT_MAX_AGE_HOURS
}

fn default_source_limit() -> u32 {
    DEFAULT_SOURCE_LIMIT
}

fn default_weight() -> i64 {
    1
}

fn default_required() -> bool {
    true
}

// --- Compiled form ---

/// A named group of keywords and patterns. Keywords are stored lowercase and
/// matched as literal substrings; patterns are case-insensitive.
#[derive(Debug, Clone)]
pub struct SignalClass {
    pub name: String,
    pub keywords: Vec<String>,
    pub patterns: Vec<Regex>,
    pub weight: i64,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub category: String,
    pub priority: i64,
    pub min_score: i64,
    pub exclude: Vec<SignalClass>,
    pub classes: Vec<SignalClass>,
}

/// Which channels and queries one discovery pass covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePlan {
    pub channels: Vec<String>,
    pub queries: Vec<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Ruleset {
    pub id: String,
    pub max_age: chrono::Duration,
    pub min_text_length: usize,
    pub exclude: Vec<SignalClass>,
    pub pipelines: Vec<Pipeline>,
    pub source: SourcePlan,
    pub templates: Vec<MessageTemplate>,
}

impl Ruleset {
    /// Parse and validate a ruleset from TOML text.
    pub fn from_toml(raw: &str, origin: &str) -> Result<Self, RulesetError> {
        let file: RulesetFile = toml::from_str(raw).map_err(|e| RulesetError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        Self::compile(file)
    }

    /// Validate the on-disk shape and compile every pattern.
    pub fn compile(file: RulesetFile) -> Result<Self, RulesetError> {
        if file.id.trim().is_empty() {
            return Err(RulesetError::Invalid("ruleset id is empty".into()));
        }
        if file.max_age_hours <= 0 {
            return Err(RulesetError::Invalid(format!(
                "max_age_hours must be positive, got {}",
                file.max_age_hours
            )));
        }
        let max_age = chrono::Duration::try_hours(file.max_age_hours).ok_or_else(|| {
            RulesetError::Invalid(format!("max_age_hours={} is out of range", file.max_age_hours))
        })?;
        if file.pipelines.is_empty() {
            return Err(RulesetError::Invalid("at least one pipeline is required".into()));
        }
        if file.templates.is_empty() {
            return Err(RulesetError::Invalid("at least one template is required".into()));
        }
        if file.source.limit == 0 {
            return Err(RulesetError::Invalid("source.limit must be at least 1".into()));
        }

        let exclude = compile_classes(&file.exclude)?;

        let mut pipelines = Vec::with_capacity(file.pipelines.len());
        for pipeline in &file.pipelines {
            if pipeline.classes.is_empty() {
                return Err(RulesetError::Invalid(format!(
                    "pipeline '{}' has no signal classes",
                    pipeline.category
                )));
            }
            pipelines.push(Pipeline {
                category: pipeline.category.clone(),
                priority: pipeline.priority,
                min_score: pipeline.min_score,
                exclude: compile_classes(&pipeline.exclude)?,
                classes: compile_classes(&pipeline.classes)?,
            });
        }

        let mut templates = Vec::with_capacity(file.templates.len());
        for (i, template) in file.templates.iter().enumerate() {
            if template.subject.trim().is_empty() || template.body.trim().is_empty() {
                return Err(RulesetError::Invalid(format!(
                    "template #{} needs a subject and a body",
                    i + 1
                )));
            }
            for part in [&template.subject, &template.body] {
                validate_template(part, TEMPLATE_VARS).map_err(|e| {
                    RulesetError::Invalid(format!("template #{}: {e}", i + 1))
                })?;
            }
            templates.push(MessageTemplate {
                subject: template.subject.clone(),
                body: template.body.clone(),
            });
        }

        Ok(Self {
            id: file.id,
            max_age,
            min_text_length: file.min_text_length,
            exclude,
            pipelines,
            source: SourcePlan {
                channels: file.source.channels,
                queries: file.source.queries,
                limit: file.source.limit,
            },
            templates,
        })
    }

    /// Replace the age ceiling, e.g. from `FRESHNESS_HOURS`.
    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }
}

fn compile_classes(classes: &[ClassFile]) -> Result<Vec<SignalClass>, RulesetError> {
    classes.iter().map(compile_class).collect()
}

fn compile_class(class: &ClassFile) -> Result<SignalClass, RulesetError> {
    let keywords: Vec<String> = class
        .keywords
        .iter()
        .map(|k| k.to_lowercase())
        .filter(|k| !k.trim().is_empty())
        .collect();

    if keywords.is_empty() && class.patterns.is_empty() {
        return Err(RulesetError::Invalid(format!(
            "class '{}' has no keywords or patterns",
            class.name
        )));
    }

    let patterns = class
        .patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|source| RulesetError::Pattern {
                    class: class.name.clone(),
                    pattern: p.clone(),
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SignalClass {
        name: class.name.clone(),
        keywords,
        patterns,
        weight: class.weight,
        required: class.required,
    })
}

/// Load and validate a ruleset file.
pub fn load_ruleset(path: &Path) -> Result<Ruleset, RulesetError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RulesetError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let ruleset = Ruleset::from_toml(&raw, &path.display().to_string())?;
    tracing::info!(
        path = %path.display(),
        id = %ruleset.id,
        pipelines = ruleset.pipelines.len(),
        templates = ruleset.templates.len(),
        channels = ruleset.source.channels.len(),
        queries = ruleset.source.queries.len(),
        "Ruleset loaded"
    );
    Ok(ruleset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        id = "t"

        [[pipelines]]
        category = "Buyer"
        [[pipelines.classes]]
        name = "need"
        keywords = ["Need"]

        [[templates]]
        subject = "Hi {{handle}}"
        body = "Saw your post"
    "#;

    #[test]
    fn minimal_ruleset_gets_defaults() {
        let ruleset = Ruleset::from_toml(MINIMAL, "inline").unwrap();
        assert_eq!(ruleset.max_age, chrono::Duration::hours(48));
        assert_eq!(ruleset.min_text_length, 0);
        assert_eq!(ruleset.source.limit, DEFAULT_SOURCE_LIMIT);
        assert_eq!(ruleset.pipelines[0].classes[0].keywords, vec!["need"]);
        assert!(ruleset.pipelines[0].classes[0].required);
    }

    #[test]
    fn bad_regex_is_fatal() {
        let raw = MINIMAL.replace(r#"keywords = ["Need"]"#, r#"patterns = ["(unclosed"]"#);
        let err = Ruleset::from_toml(&raw, "inline").unwrap_err();
        assert!(matches!(err, RulesetError::Pattern { .. }));
    }

    #[test]
    fn class_without_terms_is_fatal() {
        let raw = MINIMAL.replace(r#"keywords = ["Need"]"#, "keywords = []");
        assert!(matches!(
            Ruleset::from_toml(&raw, "inline"),
            Err(RulesetError::Invalid(_))
        ));
    }

    #[test]
    fn missing_templates_or_pipelines_are_fatal() {
        let no_templates = MINIMAL.split("[[templates]]").next().unwrap();
        assert!(Ruleset::from_toml(no_templates, "inline").is_err());
        assert!(Ruleset::from_toml("id = \"x\"\n", "inline").is_err());
    }

    #[test]
    fn max_age_must_be_positive_and_in_range() {
        for hours in ["0", "-1", "9223372036854775807"] {
            let header = format!("id = \"t\"\nmax_age_hours = {hours}");
            let raw = MINIMAL.replacen(r#"id = "t""#, &header, 1);
            assert!(
                matches!(Ruleset::from_toml(&raw, "inline"), Err(RulesetError::Invalid(_))),
                "{hours}"
            );
        }
    }

    #[test]
    fn unknown_template_variable_is_fatal() {
        let raw = MINIMAL.replace("{{handle}}", "{{budget}}");
        assert!(Ruleset::from_toml(&raw, "inline").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = format!("{MINIMAL}\nsurprise = 1\n");
        assert!(matches!(
            Ruleset::from_toml(&raw, "inline"),
            Err(RulesetError::Parse { .. })
        ));
    }

    #[test]
    fn load_reads_file_and_reports_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        assert_eq!(load_ruleset(&path).unwrap().id, "t");

        let missing = dir.path().join("nope.toml");
        assert!(matches!(load_ruleset(&missing), Err(RulesetError::Io { .. })));
    }
}
