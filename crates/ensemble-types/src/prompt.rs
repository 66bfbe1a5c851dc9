//! The prompt value that threads between workflow steps.
//!
//! A `PromptValue` is either a single string or an ordered sequence of
//! strings. The variant is decided by the producing step, so downstream
//! fan-out and loop dispatch can match on the type instead of sniffing
//! the text for list syntax.

use serde::{Deserialize, Serialize};

/// The in-flight value threaded between steps: task description on the
/// way in, running result on the way out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptValue {
    /// A single string value.
    Scalar(String),
    /// An ordered sequence of string items, e.g. a fan-out aggregate.
    Sequence(Vec<String>),
}

impl PromptValue {
    /// Empty scalar prompt.
    pub fn empty() -> Self {
        PromptValue::Scalar(String::new())
    }

    /// Whether this is the empty scalar.
    pub fn is_empty(&self) -> bool {
        match self {
            PromptValue::Scalar(s) => s.is_empty(),
            PromptValue::Sequence(items) => items.is_empty(),
        }
    }

    /// Display form. A sequence renders as a JSON-style list so the
    /// aggregate stays readable when fed to a downstream agent.
    pub fn text(&self) -> String {
        match self {
            PromptValue::Scalar(s) => s.clone(),
            PromptValue::Sequence(items) => {
                serde_json::to_string(items).unwrap_or_default()
            }
        }
    }

    /// The sequence items, if this is a sequence.
    pub fn items(&self) -> Option<&[String]> {
        match self {
            PromptValue::Scalar(_) => None,
            PromptValue::Sequence(items) => Some(items),
        }
    }

    /// Convert to a JSON value for expression evaluation: a scalar binds
    /// as a string, a sequence binds as an array.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PromptValue::Scalar(s) => serde_json::Value::String(s.clone()),
            PromptValue::Sequence(items) => serde_json::json!(items),
        }
    }
}

impl Default for PromptValue {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<String> for PromptValue {
    fn from(s: String) -> Self {
        PromptValue::Scalar(s)
    }
}

impl From<&str> for PromptValue {
    fn from(s: &str) -> Self {
        PromptValue::Scalar(s.to_string())
    }
}

impl From<Vec<String>> for PromptValue {
    fn from(items: Vec<String>) -> Self {
        PromptValue::Sequence(items)
    }
}

impl std::fmt::Display for PromptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}
