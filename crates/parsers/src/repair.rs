//! Text repair utilities.
//!
//! Stateless functions that normalize malformed structured-text fragments
//! before a strict parse. They never fail: anything they cannot fix is
//! left for the strict parser to reject.
//!
//! Both functions share the same quoting rule: a `"` toggles string state
//! unless it is preceded by an unescaped backslash.

/// A best-effort corrected fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repaired {
    pub text: String,
    /// Whether any correction was applied.
    pub fixed: bool,
}

/// Tracks whether a scan position is inside a quoted string.
#[derive(Default)]
struct QuoteState {
    in_string: bool,
    escaped: bool,
}

impl QuoteState {
    /// Feed one character. Returns `true` if the character belongs to a
    /// string literal (including its delimiting quotes).
    fn feed(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            return true;
        }
        if c == '"' {
            self.in_string = true;
            return true;
        }
        false
    }
}

/// Keep only the first top-level `{…}`/`[…]` structure and close it if
/// the fragment was truncated.
///
/// Content before the first opening bracket and after its matching close
/// is discarded; that alone does not count as a fix. A closer that does not
/// match the innermost open bracket is replaced by the one that does. When
/// input ends with brackets still open, trailing commas are trimmed, an
/// unterminated string is closed, a dangling `key:` gets a `null` value,
/// and the open brackets are closed last-opened first.
pub fn balance_brackets(fragment: &str) -> Repaired {
    let mut out = String::with_capacity(fragment.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut quotes = QuoteState::default();
    let mut started = false;
    let mut mismatched = false;

    for c in fragment.chars() {
        if !started {
            if c != '{' && c != '[' {
                continue;
            }
            started = true;
        }
        out.push(c);
        if quotes.feed(c) {
            continue;
        }
        match c {
            '{' | '[' => stack.push(c),
            '}' | ']' => {
                let expected = if stack.pop() == Some('[') { ']' } else { '}' };
                if c != expected {
                    out.pop();
                    out.push(expected);
                    mismatched = true;
                }
                if stack.is_empty() {
                    break;
                }
            }
            _ => {}
        }
    }

    if !started {
        return Repaired {
            text: fragment.to_string(),
            fixed: false,
        };
    }
    if stack.is_empty() {
        return Repaired {
            text: out,
            fixed: mismatched,
        };
    }

    if quotes.in_string {
        if quotes.escaped {
            // A lone trailing backslash would escape the synthetic quote.
            out.pop();
        }
        out.push('"');
    } else {
        let trimmed_len = out.trim_end_matches(|c: char| c == ',' || c.is_whitespace()).len();
        out.truncate(trimmed_len);
        if out.ends_with(':') {
            out.push_str(" null");
        }
    }

    for open in stack.iter().rev() {
        out.push(if *open == '[' { ']' } else { '}' });
    }

    Repaired {
        text: out,
        fixed: true,
    }
}

/// Replace `True`/`False` with `true`/`false` outside string literals.
pub fn fix_bools(fragment: &str) -> Repaired {
    let mut out = String::with_capacity(fragment.len());
    let mut quotes = QuoteState::default();
    let mut fixed = false;
    let mut rest = fragment;

    while let Some(c) = rest.chars().next() {
        if !quotes.in_string {
            if let Some(after) = rest.strip_prefix("True") {
                out.push_str("true");
                rest = after;
                fixed = true;
                continue;
            }
            if let Some(after) = rest.strip_prefix("False") {
                out.push_str("false");
                rest = after;
                fixed = true;
                continue;
            }
        }
        quotes.feed(c);
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }

    Repaired { text: out, fixed }
}
