//! ReAct action parser.
//!
//! Recognises `Action: <name>`, an optional `Action Input: <input>` and
//! `Final Answer: <content>`. Markers are case-sensitive and may carry a
//! step number (`Action 2:`) or whitespace before the colon.

use crate::{OutputParser, ParseFailure, ParseResult};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Action[ \t]*\d*[ \t]*:").expect("action marker pattern"));

static ACTION_INPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Action[ \t]*\d*[ \t]+Input[ \t]*\d*[ \t]*:").expect("action input marker pattern")
});

static FINAL_ANSWER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Final[ \t]+Answer[ \t]*:").expect("final answer marker pattern"));

/// Anything that ends an action name or action input span.
static SPAN_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:Action|Observation|Thought)[ \t]*\d*[ \t]*(?:Input[ \t]*\d*[ \t]*)?:|Final[ \t]+Answer[ \t]*:")
        .expect("span end pattern")
});

const QUERY_KEYWORDS: [&str; 9] = [
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "MATCH", "MERGE", "CREATE", "RETURN",
];

/// What to do with output that carries neither an action nor a final answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMarkerPolicy {
    /// Treat it as malformed and ask the model again.
    #[default]
    Retry,
    /// Accept the whole text as the final answer.
    #[serde(rename = "final")]
    AcceptAsFinal,
}

#[derive(Debug, Clone, Default)]
pub struct ActionParser {
    no_marker: NoMarkerPolicy,
}

impl ActionParser {
    pub fn new(no_marker: NoMarkerPolicy) -> Self {
        Self { no_marker }
    }

    pub fn no_marker_policy(&self) -> NoMarkerPolicy {
        self.no_marker
    }
}

/// Whether the input reads like a query against a data source, whose
/// quoting must be preserved.
fn looks_like_query(input: &str) -> bool {
    let first = input
        .trim_start_matches(['"', '\'', '`'])
        .split_whitespace()
        .next()
        .unwrap_or_default();
    QUERY_KEYWORDS.iter().any(|k| first.eq_ignore_ascii_case(k))
}

fn strip_quotes(input: &str) -> &str {
    for quote in ['"', '\''] {
        if input.len() >= 2 && input.starts_with(quote) && input.ends_with(quote) {
            return &input[1..input.len() - 1];
        }
    }
    input
}

/// End of the span starting at `from`: the next marker, or end of text.
fn span_end(text: &str, from: usize) -> usize {
    SPAN_END.find_at(text, from).map_or(text.len(), |m| m.start())
}

impl OutputParser for ActionParser {
    fn name(&self) -> &str {
        "action"
    }

    fn parse(&self, text: &str) -> ParseResult {
        if text.trim().is_empty() {
            return ParseResult::Failure(ParseFailure::retriable("the model returned no output", text));
        }

        let action = ACTION.find(text);
        let final_answer = FINAL_ANSWER.find(text);

        match (action, final_answer) {
            (Some(_), Some(_)) => ParseResult::Failure(ParseFailure::retriable(
                "output contains both an Action and a Final Answer; reply with exactly one of them",
                text,
            )),
            (None, Some(marker)) => {
                let content = text[marker.end()..].trim();
                if content.is_empty() {
                    return ParseResult::Failure(ParseFailure::retriable(
                        "the Final Answer is empty",
                        text,
                    ));
                }
                ParseResult::Final {
                    content: content.to_string(),
                }
            }
            (Some(marker), None) => {
                let name_end = span_end(text, marker.end());
                let name = text[marker.end()..name_end]
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or_default()
                    .trim_matches(['`', '[', ']', '*'])
                    .trim();
                if name.is_empty() {
                    return ParseResult::Failure(ParseFailure::retriable(
                        "the Action marker is not followed by a tool name",
                        text,
                    ));
                }

                let raw_input = ACTION_INPUT
                    .find_at(text, name_end)
                    .filter(|input| input.start() == name_end)
                    .map(|input| text[input.end()..span_end(text, input.end())].trim())
                    .filter(|input| !input.is_empty())
                    .map(|input| {
                        if looks_like_query(input) {
                            input.to_string()
                        } else {
                            strip_quotes(input).to_string()
                        }
                    });

                ParseResult::Action {
                    name: name.to_string(),
                    raw_input,
                }
            }
            (None, None) => match self.no_marker {
                NoMarkerPolicy::Retry => ParseResult::Failure(ParseFailure::retriable(
                    "output has neither an Action nor a Final Answer; use the required format",
                    text,
                )),
                NoMarkerPolicy::AcceptAsFinal => ParseResult::Final {
                    content: text.trim().to_string(),
                },
            },
        }
    }
}
