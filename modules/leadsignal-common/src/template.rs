use std::collections::HashMap;

use anyhow::{bail, Result};

/// Placeholders a message template may use.
pub const TEMPLATE_VARS: &[&str] = &["handle", "channel", "title", "category"];

enum Piece {
    Text(String),
    Var(String),
}

/// Split `template` into literal text and `{{name}}` placeholders.
/// `\{{` is a literal `{{`.
fn parse(template: &str) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'{') {
            chars.next();
            if chars.peek() == Some(&'{') {
                chars.next();
                text.push_str("{{");
            } else {
                text.push_str("\\{");
            }
        } else if c == '{' && chars.peek() == Some(&'{') {
            chars.next();

            let mut var_name = String::new();
            loop {
                match chars.next() {
                    Some('}') if chars.peek() == Some(&'}') => {
                        chars.next();
                        break;
                    }
                    Some(ch) => var_name.push(ch),
                    None => bail!("Unclosed template variable: {{{{{}", var_name),
                }
            }
            if !text.is_empty() {
                pieces.push(Piece::Text(std::mem::take(&mut text)));
            }
            pieces.push(Piece::Var(var_name.trim().to_string()));
        } else {
            text.push(c);
        }
    }

    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

/// Fail on unclosed placeholders or names outside `allowed`.
pub fn validate_template(template: &str, allowed: &[&str]) -> Result<()> {
    for piece in parse(template)? {
        if let Piece::Var(name) = piece {
            if !allowed.contains(&name.as_str()) {
                bail!(
                    "Unknown template variable: {{{{{}}}}}. Allowed vars: {:?}",
                    name,
                    allowed
                );
            }
        }
    }
    Ok(())
}

/// Substitute `{{var}}` placeholders. Unknown names are left as-is. A
/// template with an unclosed placeholder is returned unchanged.
pub fn render_template(template: &str, vars: &HashMap<&str, &str>) -> String {
    let Ok(pieces) = parse(template) else {
        return template.to_string();
    };

    let mut result = String::with_capacity(template.len());
    for piece in pieces {
        match piece {
            Piece::Text(text) => result.push_str(&text),
            Piece::Var(name) => match vars.get(name.as_str()) {
                Some(value) => result.push_str(value),
                None => {
                    result.push_str("{{");
                    result.push_str(&name);
                    result.push_str("}}");
                }
            },
        }
    }
    result
}
