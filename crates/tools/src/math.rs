//! `math` multitool: expression evaluation and rounding.
//!
//! Sub-actions:
//! - `math__evaluate` `{ "expression": "(2 + 3) * 4" }`
//! - `math__round` `{ "value": 3.14159, "digits": 2 }`

use async_trait::async_trait;
use semloop_core::error::ToolError;
use semloop_core::tool::{SubAction, Tool, ToolCall, ToolResult};
use serde_json::json;
use thiserror::Error;

pub struct MathTool;

#[async_trait]
impl Tool for MathTool {
    fn name(&self) -> &str {
        "math"
    }

    fn description(&self) -> &str {
        "Arithmetic helpers"
    }

    fn sub_actions(&self) -> Vec<SubAction> {
        vec![
            SubAction {
                name: "evaluate".into(),
                description: "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, \
                              pi, e and the functions sqrt, abs, floor, ceil."
                    .into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "expression": {
                            "type": "string",
                            "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                        }
                    },
                    "required": ["expression"],
                    "additionalProperties": false
                }),
            },
            SubAction {
                name: "round".into(),
                description: "Round a number to a number of decimal digits.".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "value": { "type": "number" },
                        "digits": { "type": "integer", "minimum": 0, "maximum": 12, "default": 0 }
                    },
                    "required": ["value"],
                    "additionalProperties": false
                }),
            },
        ]
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        match call.sub_action.as_deref() {
            Some("evaluate") => {
                let expression = call.arguments["expression"].as_str().ok_or_else(|| {
                    ToolError::InvalidArguments("Missing 'expression' argument".into())
                })?;
                let value = evaluate(expression).map_err(|e| ToolError::ExecutionFailed {
                    tool_name: "math__evaluate".into(),
                    reason: e.to_string(),
                })?;
                Ok(ToolResult::ok(&call.id, format_number(value)).with_data(json!({ "result": value })))
            }
            Some("round") => {
                let value = call.arguments["value"]
                    .as_f64()
                    .ok_or_else(|| ToolError::InvalidArguments("Missing 'value' argument".into()))?;
                let digits = call.arguments["digits"].as_u64().unwrap_or(0).min(12) as i32;
                let factor = 10f64.powi(digits);
                let rounded = (value * factor).round() / factor;
                Ok(ToolResult::ok(&call.id, format_number(rounded)).with_data(json!({ "result": rounded })))
            }
            other => Err(ToolError::UnknownSubAction {
                tool_name: "math".into(),
                sub_action: other.unwrap_or_default().into(),
            }),
        }
    }
}

/// Integers print without a trailing `.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NotFinite,
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Nesting limit for parentheses, unary signs and exponent chains.
const MAX_DEPTH: usize = 128;

/// Evaluate an arithmetic expression.
///
/// Precedence, lowest first: `+ -`, `* / %`, unary sign, `^` (right
/// associative, so `-2 ^ 2` is `-4`).
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let mut cursor = Cursor {
        src: expression,
        pos: 0,
        depth: 0,
    };
    let value = cursor.sum()?;
    cursor.skip_ws();
    if let Some(c) = cursor.peek() {
        return Err(EvalError::UnexpectedChar(c, cursor.pos));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }
    Ok(value)
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    /// Consume `c` if it is the next non-blank character.
    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn sum(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.product()?;
        loop {
            if self.eat('+') {
                acc += self.product()?;
            } else if self.eat('-') {
                acc -= self.product()?;
            } else {
                return Ok(acc);
            }
        }
    }

    fn product(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.signed()?;
        loop {
            if self.eat('*') {
                acc *= self.signed()?;
            } else if self.eat('/') {
                let rhs = self.signed()?;
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                acc /= rhs;
            } else if self.eat('%') {
                let rhs = self.signed()?;
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    /// Every recursive path passes through here.
    fn signed(&mut self) -> Result<f64, EvalError> {
        if self.depth == MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = self.unary();
        self.depth -= 1;
        value
    }

    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.eat('-') {
            return Ok(-self.signed()?);
        }
        if self.eat('+') {
            return self.signed();
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.atom()?;
        if self.eat('^') {
            let exponent = self.signed()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, EvalError> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            None => Err(EvalError::UnexpectedEnd),
            Some('(') => {
                self.pos += 1;
                let value = self.sum()?;
                if self.eat(')') {
                    Ok(value)
                } else {
                    self.skip_ws();
                    match self.peek() {
                        Some(c) => Err(EvalError::UnexpectedChar(c, self.pos)),
                        None => Err(EvalError::UnexpectedEnd),
                    }
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                self.src[start..self.pos]
                    .parse()
                    .map_err(|_| EvalError::UnexpectedChar(c, start))
            }
            Some(c) if c.is_ascii_alphabetic() => {
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
                    self.pos += 1;
                }
                let ident = &self.src[start..self.pos];
                match ident {
                    "pi" => return Ok(std::f64::consts::PI),
                    "e" => return Ok(std::f64::consts::E),
                    _ => {}
                }
                let function: fn(f64) -> f64 = match ident {
                    "sqrt" => f64::sqrt,
                    "abs" => f64::abs,
                    "floor" => f64::floor,
                    "ceil" => f64::ceil,
                    _ => return Err(EvalError::UnknownIdentifier(ident.to_string())),
                };
                if !self.eat('(') {
                    return Err(EvalError::UnknownIdentifier(ident.to_string()));
                }
                let arg = self.sum()?;
                if !self.eat(')') {
                    return Err(EvalError::UnexpectedEnd);
                }
                Ok(function(arg))
            }
            Some(c) => Err(EvalError::UnexpectedChar(c, start)),
        }
    }
}
