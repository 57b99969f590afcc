//! Input and output parameter declarations, and the bindings that feed them.

use crate::types::TypeSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*$").unwrap()
});

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z_][A-Za-z0-9_]*\s*$").unwrap());

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(?:\d+\.\d*|\.\d+|\d+)(?:[eE][+-]?\d+)?$").unwrap());

/// The value side of a call input or an input default.
///
/// Literals are kept as JSON values so that both languages can render them
/// natively; everything else is an expression kept as source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Binding {
    Literal(JsonValue),
    /// An identifier, a `call.output` reference, or any other expression text
    Expression(String),
}

impl Binding {
    pub fn literal(value: impl Into<JsonValue>) -> Self {
        Binding::Literal(value.into())
    }

    pub fn expression(text: impl Into<String>) -> Self {
        Binding::Expression(text.into())
    }

    /// Classify a WDL right-hand side: plain string, number and boolean
    /// literals become [`Binding::Literal`], the rest stays an expression.
    pub fn parse_wdl(text: &str) -> Self {
        let text = text.trim();
        if let Some(s) = unquote(text) {
            if !s.contains("~{") && !s.contains("${") {
                return Binding::Literal(JsonValue::String(unescape(s)));
            }
        }
        match text {
            "true" => return Binding::Literal(JsonValue::Bool(true)),
            "false" => return Binding::Literal(JsonValue::Bool(false)),
            _ => {}
        }
        if NUMBER.is_match(text) {
            if let Ok(n) = serde_json::from_str::<serde_json::Number>(normalize_number(text).as_str()) {
                return Binding::Literal(JsonValue::Number(n));
            }
        }
        Binding::Expression(text.to_string())
    }

    /// Render as a WDL right-hand side.
    pub fn to_wdl(&self) -> String {
        match self {
            Binding::Literal(JsonValue::String(s)) => quote(s),
            Binding::Literal(JsonValue::Null) => "None".to_string(),
            Binding::Literal(other) => other.to_string(),
            Binding::Expression(text) => text.clone(),
        }
    }

    pub fn as_expression(&self) -> Option<&str> {
        match self {
            Binding::Expression(text) => Some(text),
            Binding::Literal(_) => None,
        }
    }

    pub fn as_literal(&self) -> Option<&JsonValue> {
        match self {
            Binding::Literal(value) => Some(value),
            Binding::Expression(_) => None,
        }
    }

    /// The `(call_id, output)` pair when this is exactly a `call.output` reference.
    pub fn reference(&self) -> Option<(&str, &str)> {
        let text = self.as_expression()?;
        let caps = REFERENCE.captures(text)?;
        match (caps.get(1), caps.get(2)) {
            (Some(call), Some(output)) => Some((call.as_str(), output.as_str())),
            _ => None,
        }
    }

    /// The identifier when this is a bare name such as a workflow input.
    pub fn identifier(&self) -> Option<&str> {
        let text = self.as_expression()?;
        if IDENTIFIER.is_match(text) {
            Some(text.trim())
        } else {
            None
        }
    }
}

fn normalize_number(text: &str) -> String {
    // JSON rejects `1.` and `.5`
    let mut s = text.to_string();
    if s.ends_with('.') {
        s.push('0');
    }
    if let Some(rest) = s.strip_prefix("-.") {
        s = format!("-0.{}", rest);
    } else if s.starts_with('.') {
        s.insert(0, '0');
    }
    s
}

/// Strip matching single or double quotes.
pub(crate) fn unquote(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            let inner = &text[1..text.len() - 1];
            let quote_char = first as char;
            // reject "a" + "b"
            let mut escaped = false;
            for c in inner.chars() {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote_char {
                    return None;
                }
            }
            return Some(inner);
        }
    }
    None
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Double-quote a string for WDL source.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Input parameter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    pub type_spec: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Binding>,
    #[serde(default)]
    pub optional: bool,
}

impl Input {
    /// Create an input whose `optional` flag follows the type.
    pub fn new(name: impl Into<String>, type_spec: TypeSpec) -> Self {
        let optional = type_spec.is_optional();
        Self {
            name: name.into(),
            type_spec,
            description: None,
            default: None,
            optional,
        }
    }

    pub fn with_default(mut self, default: Binding) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether a caller must supply this input.
    pub fn is_required(&self) -> bool {
        !self.optional && !self.type_spec.is_optional() && self.default.is_none()
    }
}

/// Output parameter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub type_spec: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How the value is computed: a glob, a `call.output` reference or a WDL expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Output {
    pub fn new(name: impl Into<String>, type_spec: TypeSpec) -> Self {
        Self {
            name: name.into(),
            type_spec,
            description: None,
            expression: None,
        }
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_binding_literals() {
        assert_eq!(Binding::parse_wdl("\"hello\""), Binding::literal("hello"));
        assert_eq!(Binding::parse_wdl("'single'"), Binding::literal("single"));
        assert_eq!(Binding::parse_wdl("4"), Binding::literal(4));
        assert_eq!(Binding::parse_wdl("-2.5"), Binding::Literal(json!(-2.5)));
        assert_eq!(Binding::parse_wdl("true"), Binding::literal(true));
    }

    #[test]
    fn test_binding_expressions() {
        assert_eq!(
            Binding::parse_wdl("\"~{sample}.bam\""),
            Binding::expression("\"~{sample}.bam\"")
        );
        assert_eq!(Binding::parse_wdl(" files "), Binding::expression("files"));
        assert_eq!(
            Binding::parse_wdl("\"a\" + \"b\""),
            Binding::expression("\"a\" + \"b\"")
        );
    }

    #[test]
    fn test_binding_reference() {
        let binding = Binding::parse_wdl("align.bam");
        assert_eq!(binding.reference(), Some(("align", "bam")));
        assert_eq!(binding.identifier(), None);

        let binding = Binding::parse_wdl("reads");
        assert_eq!(binding.reference(), None);
        assert_eq!(binding.identifier(), Some("reads"));

        assert_eq!(Binding::literal("a.b").reference(), None);
    }

    #[test]
    fn test_binding_to_wdl() {
        assert_eq!(Binding::literal("say \"hi\"").to_wdl(), "\"say \\\"hi\\\"\"");
        assert_eq!(Binding::literal(3).to_wdl(), "3");
        assert_eq!(Binding::literal(false).to_wdl(), "false");
        assert_eq!(Binding::expression("a.b").to_wdl(), "a.b");
    }

    #[test]
    fn test_string_literal_round_trip() {
        let original = Binding::literal("tab\there");
        assert_eq!(Binding::parse_wdl(&original.to_wdl()), original);
    }

    #[test]
    fn test_input_optional_follows_type() {
        let input = Input::new("x", TypeSpec::string().with_optional(true));
        assert!(input.optional);
        assert!(!input.is_required());

        let input = Input::new("y", TypeSpec::int());
        assert!(input.is_required());
        assert!(!input.with_default(Binding::literal(1)).is_required());
    }
}
