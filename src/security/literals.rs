//! Literal-aware escaping of percent signs, and the comment/literal-blind
//! view of a query that structural checks run against.
//!
//! Literal spans are found by splitting on single quotes: every odd-indexed
//! piece lies inside a literal. A doubled quote (`''`) inside a literal closes
//! and reopens the span around an empty outside piece, so it is handled
//! correctly; backslash-escaped quotes are not recognized and usually leave an
//! odd quote count, which is rejected.

use crate::constants::ESCAPED_PERCENT;
use std::fmt;
use thiserror::Error;

/// The query text has an unbalanced number of single quotes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unbalanced string literal ({quote_count} single quotes)")]
pub struct MalformedLiteral {
    pub quote_count: usize,
}

/// One piece of query text, classified by whether it lies inside a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralSpan<'a> {
    Outside(&'a str),
    Literal(&'a str),
}

impl<'a> LiteralSpan<'a> {
    /// Split text on single quotes into alternating outside/literal spans.
    ///
    /// The quotes themselves are not part of any span; re-joining the spans
    /// with `'` reproduces the input.
    pub fn split(text: &'a str) -> impl Iterator<Item = LiteralSpan<'a>> + 'a {
        text.split('\'').enumerate().map(|(idx, piece)| {
            if idx % 2 == 0 {
                LiteralSpan::Outside(piece)
            } else {
                LiteralSpan::Literal(piece)
            }
        })
    }

    /// Get the text of this span.
    pub fn text(&self) -> &'a str {
        match *self {
            LiteralSpan::Outside(text) | LiteralSpan::Literal(text) => text,
        }
    }
}

/// Query text with every `%` inside a single-quoted literal doubled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapedQuery(pub(super) String);

impl EscapedQuery {
    /// Get the escaped text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the escaped text.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for EscapedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Double every `%` inside single-quoted literals, leaving the rest untouched.
///
/// This is a plain doubling: applying it twice turns one `%` into four.
pub fn escape(query: &str) -> Result<EscapedQuery, MalformedLiteral> {
    let quote_count = query.matches('\'').count();
    if quote_count % 2 != 0 {
        return Err(MalformedLiteral { quote_count });
    }

    let mut escaped = String::with_capacity(query.len() + 8);
    for (idx, span) in LiteralSpan::split(query).enumerate() {
        if idx > 0 {
            escaped.push('\'');
        }
        match span {
            LiteralSpan::Outside(text) => escaped.push_str(text),
            LiteralSpan::Literal(text) => escaped.push_str(&text.replace('%', ESCAPED_PERCENT)),
        }
    }

    Ok(EscapedQuery(escaped))
}

/// Query text as the server parses it: comments removed and literal bodies
/// blanked.
///
/// Each comment becomes a single space and each literal keeps its quotes
/// with every inner character replaced by a space, so nothing hidden in
/// either can satisfy a token search. `/* */` comments nest. An unterminated
/// comment or literal runs to the end of the text.
pub fn code_view(query: &str) -> String {
    let mut view = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                view.push('\'');
                while let Some(inner) = chars.next() {
                    if inner != '\'' {
                        view.push(' ');
                    } else if chars.peek() == Some(&'\'') {
                        chars.next();
                        view.push_str("  ");
                    } else {
                        view.push('\'');
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                view.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut depth = 1usize;
                while depth > 0 {
                    match chars.next() {
                        Some('/') if chars.peek() == Some(&'*') => {
                            chars.next();
                            depth += 1;
                        }
                        Some('*') if chars.peek() == Some(&'/') => {
                            chars.next();
                            depth -= 1;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
                view.push(' ');
            }
            other => view.push(other),
        }
    }

    view
}
