//! `semloop parse`: Run one output parser over text from a file or stdin.

use semloop_parsers::{ParseResult, ParserSet};
use std::io::Read;
use std::path::Path;

pub fn run(parser: &str, file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let result = parse_with(&ParserSet::standard(), parser, &text)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if let ParseResult::Failure(failure) = &result {
        let kind = if failure.retriable { "retriable" } else { "fatal" };
        return Err(format!("parse failed ({kind}): {}", failure.reason).into());
    }
    Ok(())
}

fn parse_with(set: &ParserSet, name: &str, text: &str) -> Result<ParseResult, String> {
    let parser = set
        .get(name)
        .ok_or_else(|| format!("Unknown parser '{name}' (available: {})", set.names().join(", ")))?;
    Ok(parser.parse(text))
}
