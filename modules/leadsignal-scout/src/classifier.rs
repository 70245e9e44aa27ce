use chrono::{DateTime, Utc};

use leadsignal_common::{render_signals, ContentItem, Lead, MatchedSignal};

use crate::ruleset::{Pipeline, Ruleset, SignalClass};

impl SignalClass {
    /// Every distinct matched substring, keywords first, in declaration order.
    /// `text` must already be lowercase.
    pub fn find_matches(&self, text: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut push = |m: &str| {
            if !found.iter().any(|f| f == m) {
                found.push(m.to_string());
            }
        };

        for keyword in &self.keywords {
            if text.contains(keyword.as_str()) {
                push(keyword);
            }
        }
        for pattern in &self.patterns {
            for m in pattern.find_iter(text) {
                if !m.as_str().is_empty() {
                    push(m.as_str());
                }
            }
        }
        found
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
            || self.patterns.iter().any(|p| p.is_match(text))
    }
}

impl Pipeline {
    /// Matched signals and score, or `None` when this pipeline does not fire.
    fn evaluate(&self, text: &str) -> Option<(Vec<MatchedSignal>, i64)> {
        if self.exclude.iter().any(|class| class.is_match(text)) {
            return None;
        }

        let mut signals = Vec::new();
        let mut score = 0;
        for class in &self.classes {
            let matches = class.find_matches(text);
            if matches.is_empty() {
                if class.required {
                    return None;
                }
                continue;
            }
            score += class.weight;
            signals.push(MatchedSignal {
                class: class.name.clone(),
                matches,
            });
        }

        if signals.is_empty() || score < self.min_score {
            return None;
        }
        Some((signals, score))
    }
}

impl Ruleset {
    /// Classify one item. Pure: the same item, ruleset and `now` always give
    /// the same answer.
    ///
    /// Gates run in order: freshness, minimum length, ruleset-wide
    /// exclusions, then pipelines in declared order (first match wins).
    pub fn classify(&self, item: &ContentItem, now: DateTime<Utc>) -> Option<Lead> {
        if now.signed_duration_since(item.created_at) > self.max_age {
            return None;
        }

        let text = format!("{} {}", item.title, item.body).to_lowercase();
        if text.chars().count() < self.min_text_length {
            return None;
        }

        if self.exclude.iter().any(|class| class.is_match(&text)) {
            return None;
        }

        self.pipelines.iter().find_map(|pipeline| {
            let (signals, score) = pipeline.evaluate(&text)?;
            Some(Lead {
                key: item.key(),
                category: pipeline.category.clone(),
                matched_signal: render_signals(&signals),
                signals,
                priority: pipeline.priority + score,
            })
        })
    }
}
