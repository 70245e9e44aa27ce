use std::collections::HashMap;

use rand::Rng;

use leadsignal_common::{render_template, Candidate, LeadSignalError};
use leadsignal_scout::MessageTemplate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub subject: String,
    pub body: String,
}

/// Renders one of the ruleset's templates for a candidate, chosen uniformly
/// at random per message.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    templates: Vec<MessageTemplate>,
}

impl MessageComposer {
    pub fn new(templates: Vec<MessageTemplate>) -> Result<Self, LeadSignalError> {
        if templates.is_empty() {
            return Err(LeadSignalError::Template(
                "at least one message template is required".to_string(),
            ));
        }
        Ok(Self { templates })
    }

    pub fn compose(&self, candidate: &Candidate) -> ComposedMessage {
        let index = rand::rng().random_range(0..self.templates.len());
        self.render(&self.templates[index], candidate)
    }

    fn render(&self, template: &MessageTemplate, candidate: &Candidate) -> ComposedMessage {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("handle", candidate.item.author.trim()),
            ("channel", candidate.item.channel.as_str()),
            ("title", candidate.item.title.trim()),
            ("category", candidate.lead.category.as_str()),
        ]);
        ComposedMessage {
            subject: render_template(&template.subject, &vars),
            body: render_template(&template.body, &vars),
        }
    }
}
