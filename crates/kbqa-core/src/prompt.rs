//! Prompt templates with `{name}` placeholders

use serde::{Deserialize, Serialize};

use crate::{ChatMessage, Error, Result};

/// A format string with named placeholders.
///
/// `{name}` is substituted at format time; `{{` and `}}` produce literal braces.
/// Chat models receive the optional system prompt followed by the formatted
/// template as a single user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    template: String,
    system_prompt: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(String),
}

impl PromptTemplate {
    /// Create a template. Syntax is checked by [`PromptTemplate::validate`] and at format time.
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into(), system_prompt: None }
    }

    /// Reject unbalanced braces and malformed placeholder names
    pub fn validate(&self) -> Result<()> {
        parse(&self.template).map(|_| ())
    }

    /// Attach a system message sent ahead of the formatted template
    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Placeholder names in order of first appearance
    pub fn template_vars(&self) -> Result<Vec<String>> {
        let mut vars: Vec<String> = Vec::new();
        for segment in parse(&self.template)? {
            if let Segment::Var(name) = segment {
                if !vars.contains(&name) {
                    vars.push(name);
                }
            }
        }
        Ok(vars)
    }

    /// Substitute every placeholder. Extra values are ignored.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        for segment in parse(&self.template)? {
            match segment {
                Segment::Literal(text) => out.push_str(&text),
                Segment::Var(name) => {
                    let value = values
                        .iter()
                        .find(|(key, _)| *key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| Error::Prompt(format!("Missing value for placeholder '{{{}}}'", name)))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Format into chat messages
    pub fn format_messages(&self, values: &[(&str, &str)]) -> Result<Vec<ChatMessage>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.format(values)?));
        Ok(messages)
    }
}

fn parse(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::Prompt(format!("Unclosed placeholder '{{{}'", name)));
                        }
                    }
                }
                if !is_identifier(&name) {
                    return Err(Error::Prompt(format!("Invalid placeholder name '{{{}}}'", name)));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Var(name));
            }
            '}' => return Err(Error::Prompt("Single '}' encountered in template".to_string())),
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => chars.all(|c| c == '_' || c.is_alphanumeric()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;

    #[test]
    fn test_template_vars_in_order() {
        let tmpl = PromptTemplate::new("{context_str}\nQ: {query_str}\nAgain: {context_str}");
        assert_eq!(tmpl.template_vars().unwrap(), vec!["context_str", "query_str"]);
    }

    #[test]
    fn test_format_substitutes_and_unescapes() {
        let tmpl = PromptTemplate::new("Use {{json}}: {context_str} -> {query_str}");
        let out = tmpl
            .format(&[("query_str", "why?"), ("context_str", "because"), ("unused", "x")])
            .unwrap();
        assert_eq!(out, "Use {json}: because -> why?");
    }

    #[test]
    fn test_format_missing_value() {
        let tmpl = PromptTemplate::new("{context_str} {query_str}");
        let err = tmpl.format(&[("context_str", "c")]).unwrap_err();
        assert!(err.to_string().contains("query_str"));
    }

    #[test]
    fn test_rejects_malformed_templates() {
        assert!(PromptTemplate::new("open {context_str").validate().is_err());
        assert!(PromptTemplate::new("stray } brace").validate().is_err());
        assert!(PromptTemplate::new("{not a name}").validate().is_err());
        assert!(PromptTemplate::new("{}").validate().is_err());
        assert!(PromptTemplate::new("{}").format(&[]).is_err());
        assert!(PromptTemplate::new("{{literal}} {query_str}").validate().is_ok());
    }

    #[test]
    fn test_cjk_text_passes_through() {
        let tmpl = PromptTemplate::new("参考信息：{context_str}\n问题：{query_str}\n回答：");
        let out = tmpl.format(&[("context_str", "工具下载"), ("query_str", "在哪里？")]).unwrap();
        assert_eq!(out, "参考信息：工具下载\n问题：在哪里？\n回答：");
    }

    #[test]
    fn test_format_messages_with_system() {
        let tmpl = PromptTemplate::new("Q: {query_str}").with_system("Be concise.");
        let messages = tmpl.format_messages(&[("query_str", "hi")]).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[1], ChatMessage::user("Q: hi"));
    }
}
