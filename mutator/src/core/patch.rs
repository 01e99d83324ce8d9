//! Regex substitution used by `TextPatch` proposals.
//!
//! Patterns are compiled in multi-line mode so `^` and `$` anchor at line
//! boundaries. Replacements reference groups Python-style (`\1`, `\g<name>`);
//! every other character, `$` included, is literal.

use regex::RegexBuilder;

/// Result of substituting inside one text buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchResult {
    pub text: String,
    /// Number of matches replaced (bounded by `count` when non-zero).
    pub replaced: usize,
}

/// Replace up to `count` matches of `search` (`0` = all) with `replace`.
pub fn apply_patch(
    text: &str,
    search: &str,
    replace: &str,
    count: usize,
) -> Result<PatchResult, regex::Error> {
    let re = RegexBuilder::new(search).multi_line(true).build()?;
    let matches = re.find_iter(text).count();
    let replaced = if count == 0 {
        matches
    } else {
        matches.min(count)
    };
    if replaced == 0 {
        return Ok(PatchResult {
            text: text.to_string(),
            replaced: 0,
        });
    }
    let template = expansion_template(replace);
    let patched = re.replacen(text, count, template.as_str()).into_owned();
    Ok(PatchResult {
        text: patched,
        replaced,
    })
}

/// Translate a Python-style replacement into `regex` expansion syntax.
///
/// `\N` and `\g<name>` become group references, `\\` a single backslash, and
/// `$` is escaped so it is never expanded.
fn expansion_template(replace: &str) -> String {
    let mut out = String::with_capacity(replace.len());
    let mut chars = replace.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    let rest: String = chars.clone().skip(1).collect();
                    match rest
                        .strip_prefix('<')
                        .and_then(|r| r.split_once('>'))
                        .filter(|(name, _)| is_group_name(name))
                    {
                        Some((name, _)) => {
                            out.push_str(&format!("${{{name}}}"));
                            // Skip `g<name>`.
                            for _ in 0..name.chars().count() + 3 {
                                chars.next();
                            }
                        }
                        None => out.push('\\'),
                    }
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                }
                _ => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

fn is_group_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_all_when_count_is_zero() {
        let out = apply_patch("a a a", "a", "b", 0).expect("patch");
        assert_eq!(out.text, "b b b");
        assert_eq!(out.replaced, 3);
    }

    #[test]
    fn respects_occurrence_limit() {
        let out = apply_patch("a a a", "a", "b", 2).expect("patch");
        assert_eq!(out.text, "b b a");
        assert_eq!(out.replaced, 2);
    }

    #[test]
    fn no_match_leaves_text_untouched() {
        let out = apply_patch("x = 1\n", "ZZZ", "YYY", 0).expect("patch");
        assert_eq!(out.text, "x = 1\n");
        assert_eq!(out.replaced, 0);
    }

    #[test]
    fn expands_python_style_group_references() {
        let out = apply_patch("x = 1\n", r"(\w+) = (?P<v>\d+)", r"\1 = \g<v>0", 0).expect("patch");
        assert_eq!(out.text, "x = 10\n");
    }

    #[test]
    fn dollar_signs_are_literal() {
        let out = apply_patch("price = 0\n", "0", "'$price'", 0).expect("patch");
        assert_eq!(out.text, "price = '$price'\n");
        let out = apply_patch("a\n", "a", "$1 ${x} $$", 0).expect("patch");
        assert_eq!(out.text, "$1 ${x} $$\n");
    }

    #[test]
    fn escaped_and_unknown_backslashes_are_kept() {
        let out = apply_patch("a\n", "a", r"C:\\temp\n\g<>", 0).expect("patch");
        assert_eq!(out.text, "C:\\temp\\n\\g<>\n");
    }

    #[test]
    fn line_anchors_match_inside_text() {
        let out = apply_patch("x = 1\ny = 2\n", "^y = 2$", "y = 3", 0).expect("patch");
        assert_eq!(out.replaced, 1);
        assert_eq!(out.text, "x = 1\ny = 3\n");
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(apply_patch("x", "(", "y", 0).is_err());
    }
}
