//! Output parsers for semloop.
//!
//! Each parser turns raw model text into exactly one [`ParseResult`]
//! variant. Parsers are total: malformed input degrades to
//! [`ParseResult::Failure`] carrying a reason and the original text.
//!
//! Parsers are looked up by name through a [`ParserSet`] built once at
//! startup and shared read-only.

pub mod action;
pub mod datetime;
pub mod lists;
pub mod repair;
pub mod scalar;
pub mod structured;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use action::{ActionParser, NoMarkerPolicy};
pub use datetime::DateTimeParser;
pub use lists::{LastLineParser, ListParser, NumberedListParser};
pub use repair::{Repaired, balance_brackets, fix_bools};
pub use scalar::BooleanParser;
pub use structured::{CodeParser, Fenced, JsonParser, extract_fenced};

/// A parse that did not yield a usable result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    /// Human-readable explanation, suitable for feeding back to the model.
    pub reason: String,
    /// Whether the loop may ask the model to try again.
    pub retriable: bool,
    /// The original text, for diagnostics.
    pub text: String,
}

impl ParseFailure {
    pub fn retriable(reason: impl Into<String>, text: &str) -> Self {
        Self {
            reason: reason.into(),
            retriable: true,
            text: text.to_string(),
        }
    }

    pub fn fatal(reason: impl Into<String>, text: &str) -> Self {
        Self {
            reason: reason.into(),
            retriable: false,
            text: text.to_string(),
        }
    }
}

/// The outcome of parsing one model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseResult {
    /// A typed value from a scalar or structured parser.
    Value {
        value: serde_json::Value,
        /// Whether repair was needed to obtain the value.
        repaired: bool,
        /// Text outside the first fenced block, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// A tool request from the action parser.
    Action {
        name: String,
        raw_input: Option<String>,
    },
    /// A terminal answer.
    Final { content: String },
    Failure(ParseFailure),
}

impl ParseResult {
    /// Plain value with no repair and no context.
    pub fn value(value: serde_json::Value) -> Self {
        Self::Value {
            value,
            repaired: false,
            context: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value { .. } => "value",
            Self::Action { .. } => "action",
            Self::Final { .. } => "final",
            Self::Failure(_) => "failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// A parser converting raw model text into a [`ParseResult`].
pub trait OutputParser: Send + Sync {
    /// Lookup name (e.g. "json", "action").
    fn name(&self) -> &str;

    /// Parse `text`. Must not panic.
    fn parse(&self, text: &str) -> ParseResult;
}

/// Name-indexed table of parsers.
pub struct ParserSet {
    parsers: BTreeMap<String, Box<dyn OutputParser>>,
}

impl ParserSet {
    pub fn new() -> Self {
        Self {
            parsers: BTreeMap::new(),
        }
    }

    /// Every built-in parser, with the action parser using `NoMarkerPolicy::Retry`.
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.register(Box::new(JsonParser));
        set.register(Box::new(ActionParser::default()));
        set.register(Box::new(BooleanParser));
        set.register(Box::new(CodeParser));
        set.register(Box::new(ListParser));
        set.register(Box::new(NumberedListParser));
        set.register(Box::new(LastLineParser));
        set.register(Box::new(DateTimeParser::default()));
        set
    }

    /// Add a parser, replacing any parser registered under the same name.
    pub fn register(&mut self, parser: Box<dyn OutputParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    pub fn get(&self, name: &str) -> Option<&dyn OutputParser> {
        self.parsers.get(name).map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserSet {
    fn default() -> Self {
        Self::standard()
    }
}
