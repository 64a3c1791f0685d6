//! `glob:` and `regex:` path matching.

use std::fmt;

use regex::Regex;

use crate::error::{Result, SmbFsError};
use crate::path::SmbPath;

const GLOB_PREFIX: &str = "glob:";
const REGEX_PREFIX: &str = "regex:";

/// Matches the normalized, rendered form of a path against a pattern.
///
/// The whole path has to match. A pattern without a syntax prefix is a
/// regular expression.
#[derive(Clone)]
pub struct PathMatcher {
    source: String,
    regex: Regex,
}

impl PathMatcher {
    /// Compiles `glob:<pattern>`, `regex:<pattern>` or a bare regular expression.
    pub fn new(syntax_and_pattern: &str) -> Result<Self> {
        let expression = if let Some(glob) = syntax_and_pattern.strip_prefix(GLOB_PREFIX) {
            glob_to_regex(glob)?
        } else if let Some(regex) = syntax_and_pattern.strip_prefix(REGEX_PREFIX) {
            regex.to_string()
        } else {
            syntax_and_pattern.to_string()
        };
        let regex = Regex::new(&format!("^(?:{})$", expression)).map_err(|e| {
            SmbFsError::invalid(format!("invalid pattern '{}': {}", syntax_and_pattern, e))
        })?;
        Ok(Self {
            source: syntax_and_pattern.to_string(),
            regex,
        })
    }

    /// True if the whole normalized path matches.
    pub fn matches(&self, path: &SmbPath) -> bool {
        self.regex.is_match(&path.normalize().to_string())
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathMatcher({:?})", self.source)
    }
}

/// Translates a glob into an unanchored regular expression.
///
/// `*` stays within one component, `**` crosses separators, `?` is one
/// non-separator character, `{a,b}` is an alternation and `[...]` a
/// character class (`[!...]` negated). `\` escapes the next character.
pub fn glob_to_regex(glob: &str) -> Result<String> {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut chars = glob.chars().peekable();
    let mut groups = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| SmbFsError::invalid(format!("glob '{}' ends with an escape", glob)))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '{' => {
                groups += 1;
                out.push_str("(?:");
            }
            '}' if groups > 0 => {
                groups -= 1;
                out.push(')');
            }
            ',' if groups > 0 => out.push('|'),
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for class_char in chars.by_ref() {
                    if class_char == ']' {
                        closed = true;
                        break;
                    }
                    if class_char == '\\' || class_char == '[' || class_char == '^' {
                        out.push('\\');
                    }
                    out.push(class_char);
                }
                if !closed {
                    return Err(SmbFsError::invalid(format!(
                        "glob '{}' has an unclosed character class",
                        glob
                    )));
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    if groups > 0 {
        return Err(SmbFsError::invalid(format!("glob '{}' has an unclosed group", glob)));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FsIdentity;
    use std::sync::{Arc, Weak};

    fn p(raw: &str) -> SmbPath {
        let identity = Arc::new(FsIdentity::new("host", None, "share").unwrap());
        SmbPath::parse_in(identity, Weak::new(), raw)
    }

    fn matches(pattern: &str, raw: &str) -> bool {
        PathMatcher::new(pattern).unwrap().matches(&p(raw))
    }

    #[test]
    fn test_star_stays_within_component() {
        assert!(matches("glob:/dir/*.txt", "/dir/a.txt"));
        assert!(!matches("glob:/dir/*.txt", "/dir/sub/a.txt"));
        assert!(!matches("glob:/dir/*.txt", "/dir/a.txt.bak"));
    }

    #[test]
    fn test_double_star_crosses_components() {
        assert!(matches("glob:/dir/**.txt", "/dir/sub/a.txt"));
        assert!(matches("glob:**", "/anything/at/all"));
    }

    #[test]
    fn test_question_mark_and_literal_dot() {
        assert!(matches("glob:/a?.log", "/ab.log"));
        assert!(!matches("glob:/a?.log", "/abxlog"));
        assert!(!matches("glob:/a?.log", "/a/.log"));
    }

    #[test]
    fn test_alternation_and_class() {
        assert!(matches("glob:/x.{txt,log}", "/x.log"));
        assert!(!matches("glob:/x.{txt,log}", "/x.csv"));
        assert!(matches("glob:/file[0-9]", "/file7"));
        assert!(!matches("glob:/file[!0-9]", "/file7"));
    }

    #[test]
    fn test_glob_escape() {
        assert!(matches("glob:/a\\*b", "/a*b"));
        assert!(!matches("glob:/a\\*b", "/axxb"));
    }

    #[test]
    fn test_regex_syntax_and_default() {
        assert!(matches("regex:/a/.*", "/a/b/c"));
        assert!(matches("/a/[bc]", "/a/c"));
        assert!(!matches("regex:/a", "/a/b"));
    }

    #[test]
    fn test_matches_normalized_path() {
        assert!(matches("glob:/a/c", "/a/b/../c"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathMatcher::new("regex:(").is_err());
        assert!(PathMatcher::new("glob:{a,b").is_err());
        assert!(PathMatcher::new("glob:[ab").is_err());
        assert!(PathMatcher::new("glob:a\\").is_err());
    }
}
