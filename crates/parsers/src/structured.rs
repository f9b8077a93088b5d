//! Structured-data and code parsers, plus fenced-block extraction.

use crate::repair::{balance_brackets, fix_bools};
use crate::{OutputParser, ParseFailure, ParseResult};
use tracing::debug;

const FENCE: &str = "```";

/// The first fenced block of a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fenced<'a> {
    /// Language tag on the opening line, if any.
    pub language: Option<&'a str>,
    /// Content between the fences.
    pub inner: &'a str,
    /// Text before the opening fence and after the closing one, trimmed.
    pub outside: String,
}

fn is_language_tag(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '.'))
}

/// Locate the first ```` ``` ```` block. An unterminated block runs to the
/// end of the text.
pub fn extract_fenced(text: &str) -> Option<Fenced<'_>> {
    let open = text.find(FENCE)?;
    let after_open = open + FENCE.len();
    let rest = &text[after_open..];

    let first_line = rest.split('\n').next().unwrap_or_default();
    let tag = first_line.trim();
    let (language, body_start) = if tag.is_empty() || is_language_tag(tag) {
        let skip = (first_line.len() + 1).min(rest.len());
        ((!tag.is_empty()).then_some(tag), after_open + skip)
    } else {
        // Content starts on the opening line.
        (None, after_open)
    };

    let (inner, tail) = match text[body_start..].find(FENCE) {
        Some(close) => {
            let close = body_start + close;
            (&text[body_start..close], &text[close + FENCE.len()..])
        }
        None => (&text[body_start..], ""),
    };

    let before = text[..open].trim();
    let after = tail.trim();
    let outside = match (before.is_empty(), after.is_empty()) {
        (true, true) => String::new(),
        (false, true) => before.to_string(),
        (true, false) => after.to_string(),
        (false, false) => format!("{before}\n{after}"),
    };

    Some(Fenced {
        language,
        inner,
        outside,
    })
}

/// Parses JSON out of prose, fenced blocks and truncated output.
pub struct JsonParser;

impl OutputParser for JsonParser {
    fn name(&self) -> &str {
        "json"
    }

    fn parse(&self, text: &str) -> ParseResult {
        let (body, context) = match extract_fenced(text) {
            Some(fenced) => (
                fenced.inner,
                (!fenced.outside.is_empty()).then_some(fenced.outside),
            ),
            None => (text, None),
        };
        if body.trim().is_empty() {
            return ParseResult::Failure(ParseFailure::retriable("no structured data found", text));
        }

        let balanced = balance_brackets(body);
        let candidate = balanced.text.trim();
        let error = match serde_json::from_str(candidate) {
            Ok(value) => {
                return ParseResult::Value {
                    value,
                    repaired: balanced.fixed,
                    context,
                };
            }
            Err(e) => e,
        };

        let bools = fix_bools(candidate);
        if bools.fixed {
            if let Ok(value) = serde_json::from_str(bools.text.trim()) {
                debug!("Structured output needed boolean normalisation");
                return ParseResult::Value {
                    value,
                    repaired: true,
                    context,
                };
            }
        }

        ParseResult::Failure(ParseFailure::retriable(
            format!("output is not valid JSON: {error}"),
            text,
        ))
    }
}

/// Returns the content of the first fenced block.
pub struct CodeParser;

impl OutputParser for CodeParser {
    fn name(&self) -> &str {
        "code"
    }

    fn parse(&self, text: &str) -> ParseResult {
        match extract_fenced(text) {
            Some(fenced) => {
                let context = (!fenced.outside.is_empty()).then_some(fenced.outside);
                ParseResult::Value {
                    value: serde_json::Value::String(fenced.inner.trim().to_string()),
                    repaired: false,
                    context,
                }
            }
            None => ParseResult::Failure(ParseFailure::retriable("no fenced code block found", text)),
        }
    }
}
