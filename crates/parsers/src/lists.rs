//! Parsers that read the deliverable off the end of a chain of thought.

use crate::{OutputParser, ParseFailure, ParseResult};
use regex_lite::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d+\.[ \t]*([^\n]*)").expect("numbered item pattern"));

fn last_non_blank_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|l| !l.is_empty())
}

/// Comma-separated items on the last non-blank line.
pub struct ListParser;

impl OutputParser for ListParser {
    fn name(&self) -> &str {
        "list"
    }

    fn parse(&self, text: &str) -> ParseResult {
        let Some(line) = last_non_blank_line(text) else {
            return ParseResult::Failure(ParseFailure::retriable("no list found in empty output", text));
        };
        let items: Vec<Value> = line
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect();
        if items.is_empty() {
            return ParseResult::Failure(ParseFailure::retriable("the last line has no list items", text));
        }
        ParseResult::value(Value::Array(items))
    }
}

/// `1. …` items, each ending at its line break.
pub struct NumberedListParser;

impl OutputParser for NumberedListParser {
    fn name(&self) -> &str {
        "numbered_list"
    }

    fn parse(&self, text: &str) -> ParseResult {
        let items: Vec<Value> = NUMBERED_ITEM
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect();
        if items.is_empty() {
            return ParseResult::Failure(ParseFailure::retriable("no numbered items found", text));
        }
        ParseResult::value(Value::Array(items))
    }
}

/// The last non-blank line, trimmed.
pub struct LastLineParser;

impl OutputParser for LastLineParser {
    fn name(&self) -> &str {
        "last_line"
    }

    fn parse(&self, text: &str) -> ParseResult {
        match last_non_blank_line(text) {
            Some(line) => ParseResult::value(Value::String(line.to_string())),
            None => ParseResult::Failure(ParseFailure::retriable("output is empty", text)),
        }
    }
}
