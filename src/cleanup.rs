//! Post-render cleanup of SQL text.
//!
//! Disabled directives leave behind empty lines, a connective right after
//! `WHERE`, or a comma with nothing before it. Each rule here is textual and
//! can be switched off in [`TransformOptions`]. Quoted literals, quoted
//! identifiers and comments are masked before the rules run and restored
//! afterwards, so their contents never change.

use regex::{Captures, Regex};

use crate::config::TransformOptions;
use crate::parser::quoted_len;

/// Delimits the index of a masked span. NUL never appears in valid SQL text.
const MASK: char = '\0';

/// Regex-based SQL tidier applied after a transform pass.
#[derive(Debug, Clone)]
pub struct SqlCleaner {
    blank_line_pattern: Regex,
    /// `WHERE AND x` / `HAVING OR x`
    dangling_connective_pattern: Regex,
    /// `SELECT , a` / `SET , a = 1` / `ORDER BY , a`
    leading_comma_pattern: Regex,
    open_paren_comma_pattern: Regex,
    close_paren_comma_pattern: Regex,
    /// `a, FROM` / `a = 1, WHERE`
    trailing_comma_pattern: Regex,
    mask_pattern: Regex,
}

impl Default for SqlCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCleaner {
    pub fn new() -> Self {
        Self {
            blank_line_pattern: Regex::new(r"(?m)^[ \t]*\r?\n").unwrap(),
            dangling_connective_pattern: Regex::new(r"(?i)\b(WHERE|HAVING)(\s+)(?:AND|OR)\b\s*")
                .unwrap(),
            leading_comma_pattern: Regex::new(
                r"(?i)\b(SELECT(?:\s+DISTINCT)?|SET|ORDER\s+BY|GROUP\s+BY)(\s+),\s*",
            )
            .unwrap(),
            open_paren_comma_pattern: Regex::new(r"\(\s*,\s*").unwrap(),
            close_paren_comma_pattern: Regex::new(r",\s*\)").unwrap(),
            trailing_comma_pattern: Regex::new(r"(?i),(\s+)(FROM|WHERE)\b").unwrap(),
            mask_pattern: Regex::new(r"\x00(\d+)\x00").unwrap(),
        }
    }

    /// Apply the enabled rules, then trim surrounding whitespace.
    pub fn clean(&self, sql: &str, options: &TransformOptions) -> String {
        let (mut sql, masked) = mask_opaque_spans(sql);
        if options.remove_blank_lines {
            sql = self.blank_line_pattern.replace_all(&sql, "").into_owned();
        }
        if options.trim_dangling_connectives {
            sql = self
                .dangling_connective_pattern
                .replace_all(&sql, "${1}${2}")
                .into_owned();
        }
        if options.trim_stray_commas {
            sql = self
                .leading_comma_pattern
                .replace_all(&sql, "${1}${2}")
                .into_owned();
            sql = self.open_paren_comma_pattern.replace_all(&sql, "(").into_owned();
            sql = self.close_paren_comma_pattern.replace_all(&sql, ")").into_owned();
            sql = self
                .trailing_comma_pattern
                .replace_all(&sql, "${1}${2}")
                .into_owned();
        }
        if !masked.is_empty() {
            sql = self
                .mask_pattern
                .replace_all(&sql, |caps: &Captures| {
                    caps[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| masked.get(i).copied())
                        .unwrap_or_default()
                })
                .into_owned();
        }
        sql.trim().to_string()
    }
}

/// Replace quoted spans and comments with numbered markers.
///
/// Returns the masked text and the original spans by marker number. Input
/// that already contains the marker character is returned unmasked.
fn mask_opaque_spans(sql: &str) -> (String, Vec<&str>) {
    if sql.contains(MASK) {
        return (sql.to_string(), Vec::new());
    }
    let bytes = sql.as_bytes();
    let mut masked = String::with_capacity(sql.len());
    let mut spans = Vec::new();
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        let len = match (bytes[i], bytes.get(i + 1)) {
            (quote @ (b'\'' | b'"'), _) => quoted_len(&sql[i..], quote),
            (b'/', Some(b'*')) => sql[i + 2..].find("*/").map_or(sql.len() - i, |end| end + 4),
            (b'-', Some(b'-')) => sql[i..].find('\n').unwrap_or(sql.len() - i),
            _ => {
                i += 1;
                continue;
            }
        };
        masked.push_str(&sql[copied..i]);
        masked.push(MASK);
        masked.push_str(&spans.len().to_string());
        masked.push(MASK);
        spans.push(&sql[i..i + len]);
        i += len;
        copied = i;
    }
    masked.push_str(&sql[copied..]);
    (masked, spans)
}
