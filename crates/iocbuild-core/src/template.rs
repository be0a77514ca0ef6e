//! Placeholder substitution for script hook lines and record addresses
//!
//! Placeholders are written `{key}`; `{{` and `}}` produce literal braces.

use crate::error::{BuildError, Result};

/// Render `template`, resolving each placeholder through `lookup`.
///
/// `context` names the template's owner in error messages.
pub fn render<F>(template: &str, context: &str, mut lookup: F) -> Result<String>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => {
                            return Err(BuildError::MalformedTemplate {
                                context: context.to_string(),
                                reason: format!("unterminated placeholder in {:?}", template),
                            })
                        }
                        Some(k) => key.push(k),
                    }
                }
                let key = key.trim();
                let value = lookup(key).ok_or_else(|| BuildError::UnknownParameter {
                    context: context.to_string(),
                    name: key.to_string(),
                })?;
                out.push_str(&value);
            }
            '}' => {
                return Err(BuildError::MalformedTemplate {
                    context: context.to_string(),
                    reason: format!("unmatched '}}' in {:?}", template),
                })
            }
            _ => out.push(c),
        }
    }

    Ok(out)
}

/// Collect the placeholder keys used by `template`, ignoring escaped braces
pub fn placeholders(template: &str, context: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    // Rendering with a recording lookup gives the same tokenisation as render().
    render(template, context, |key| {
        keys.push(key.to_string());
        Some(String::new())
    })?;
    Ok(keys)
}
