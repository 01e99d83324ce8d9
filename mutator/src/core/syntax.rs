//! Static syntax checks that run in-process.
//!
//! Language-specific parsers are external commands (see `io::validator`);
//! this module covers the checks that need no toolchain.

use serde::{Deserialize, Serialize};

/// Syntax check configured for one file extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyntaxCheck {
    /// External parser; `{path}` is replaced by the absolute file path.
    Command { command: Vec<String> },
    Json,
    Toml,
    /// Bracket balance scan that skips string literals and line comments.
    Delimiters {
        #[serde(default = "default_line_comment")]
        line_comment: Option<String>,
    },
}

fn default_line_comment() -> Option<String> {
    Some("#".to_string())
}

/// Check `text` with an in-process checker.
///
/// Returns `None` for command checks, which must be run by the caller.
pub fn check_in_process(check: &SyntaxCheck, text: &str) -> Option<Result<(), String>> {
    match check {
        SyntaxCheck::Command { .. } => None,
        SyntaxCheck::Json => Some(
            serde_json::from_str::<serde_json::Value>(text)
                .map(|_| ())
                .map_err(|err| format!("invalid json: {err}")),
        ),
        SyntaxCheck::Toml => Some(
            toml::from_str::<toml::Table>(text)
                .map(|_| ())
                .map_err(|err| format!("invalid toml: {}", err.message())),
        ),
        SyntaxCheck::Delimiters { line_comment } => {
            Some(check_delimiters(text, line_comment.as_deref()))
        }
    }
}

/// Verify that `()`, `[]` and `{}` are balanced outside strings and comments.
pub fn check_delimiters(text: &str, line_comment: Option<&str>) -> Result<(), String> {
    let chars: Vec<char> = text.chars().collect();
    let comment: Vec<char> = line_comment.unwrap_or("").chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if !comment.is_empty() && chars[i..].starts_with(&comment) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if c == '"' || c == '\'' {
            i = skip_string(&chars, i, &mut line)?;
            continue;
        }
        match c {
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(format!(
                            "line {line}: '{c}' does not match '{open}' opened on line {open_line}"
                        ));
                    }
                    None => return Err(format!("line {line}: unmatched '{c}'")),
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some((open, open_line)) = stack.pop() {
        return Err(format!("line {open_line}: '{open}' was never closed"));
    }
    Ok(())
}

/// Skip a string literal starting at `start`; returns the index after it.
fn skip_string(chars: &[char], start: usize, line: &mut usize) -> Result<usize, String> {
    let quote = chars[start];
    let start_line = *line;
    let triple = chars.len() >= start + 3 && chars[start + 1] == quote && chars[start + 2] == quote;
    let mut i = if triple { start + 3 } else { start + 1 };

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if chars.get(i + 1) == Some(&'\n') {
                *line += 1;
            }
            i += 2;
            continue;
        }
        if c == '\n' {
            if !triple {
                return Err(format!("line {start_line}: unterminated string literal"));
            }
            *line += 1;
        }
        if c == quote {
            if !triple {
                return Ok(i + 1);
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok(i + 3);
            }
        }
        i += 1;
    }
    Err(format!("line {start_line}: unterminated string literal"))
}
