//! Boolean parser.

use crate::repair::fix_bools;
use crate::{OutputParser, ParseFailure, ParseResult};

/// Strictly parses a `true`/`false` literal after boolean-case normalisation.
pub struct BooleanParser;

impl OutputParser for BooleanParser {
    fn name(&self) -> &str {
        "boolean"
    }

    fn parse(&self, text: &str) -> ParseResult {
        let normalised = fix_bools(text.trim());
        let value = match normalised.text.as_str() {
            "true" => true,
            "false" => false,
            other => {
                return ParseResult::Failure(ParseFailure::retriable(
                    format!("expected `true` or `false`, got `{other}`"),
                    text,
                ));
            }
        };
        ParseResult::Value {
            value: serde_json::Value::Bool(value),
            repaired: normalised.fixed,
            context: None,
        }
    }
}
