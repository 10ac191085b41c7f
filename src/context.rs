//! Per-execution transform state.
//!
//! A [`TransformContext`] accumulates the SQL text, bind names, bind values
//! and coverage of one pass. `BEGIN` blocks render into a [`fork`] of the
//! context and are either [`merge`]d back or [`discard`]ed.
//!
//! [`fork`]: TransformContext::fork
//! [`merge`]: TransformContext::merge
//! [`discard`]: TransformContext::discard

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::TransformOptions;
use crate::coverage::CoverageRecord;
use crate::value::{resolve_in, Params, Scope, Value};

/// Keywords after which a block's leading `AND`/`OR` is redundant.
const CLAUSE_KEYWORDS: &[&str] = &["WHERE", "HAVING", "ON", "WHEN"];

/// How a bind value came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindKind {
    Scalar,
    /// One element of a list expanded by `PAREN#`.
    ListElement,
    Null,
}

/// A value destined for positional binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindValue {
    pub kind: BindKind,
    pub value: Value,
}

impl BindValue {
    pub fn scalar(value: Value) -> Self {
        let kind = if value.is_null() {
            BindKind::Null
        } else {
            BindKind::Scalar
        };
        Self { kind, value }
    }

    pub fn list_element(value: Value) -> Self {
        Self {
            kind: BindKind::ListElement,
            value,
        }
    }
}

/// The finished output of a context.
pub(crate) struct ContextParts {
    pub sql: String,
    pub bind_names: Vec<String>,
    pub bind_values: Vec<BindValue>,
    pub coverage: CoverageRecord,
}

/// Mutable accumulator for one transform pass.
#[derive(Debug)]
pub struct TransformContext<'a> {
    params: &'a Params,
    options: &'a TransformOptions,
    /// Loop-variable overlays, innermost last.
    frames: Vec<BTreeMap<String, Value>>,
    sql: String,
    bind_names: Vec<String>,
    bind_values: Vec<BindValue>,
    /// Binds emitted by enclosing contexts before this one was forked.
    bind_offset: usize,
    enabled: bool,
    /// Whether an empty buffer here sits at the start of a clause.
    clause_start: bool,
    coverage: CoverageRecord,
}

impl<'a> TransformContext<'a> {
    pub fn new(params: &'a Params, options: &'a TransformOptions) -> Self {
        Self {
            params,
            options,
            frames: Vec::new(),
            sql: String::new(),
            bind_names: Vec::new(),
            bind_values: Vec::new(),
            bind_offset: 0,
            enabled: false,
            clause_start: true,
            coverage: CoverageRecord::new(),
        }
    }

    /// Create a child context: same parameters and loop variables, empty output.
    pub fn fork(&self) -> TransformContext<'a> {
        TransformContext {
            params: self.params,
            options: self.options,
            frames: self.frames.clone(),
            sql: String::new(),
            bind_names: Vec::new(),
            bind_values: Vec::new(),
            bind_offset: self.bind_offset + self.bind_values.len(),
            enabled: false,
            clause_start: self.at_clause_start(),
            coverage: CoverageRecord::new(),
        }
    }

    /// Append a child's output, binds and coverage, and mark this context enabled.
    ///
    /// When this buffer already ends in whitespace, the child's leading
    /// spaces and tabs are dropped so the seam keeps a single gap.
    pub fn merge(&mut self, child: TransformContext<'a>) {
        let TransformContext {
            sql,
            bind_names,
            bind_values,
            coverage,
            ..
        } = child;
        let mut text = sql.as_str();
        if self.sql.is_empty() || self.sql.ends_with(char::is_whitespace) {
            text = text.trim_start_matches([' ', '\t']);
        }
        self.sql.push_str(text);
        self.bind_names.extend(bind_names);
        self.bind_values.extend(bind_values);
        self.coverage.absorb(coverage);
        self.enabled = true;
    }

    /// Drop a child's output, keeping only its coverage.
    pub fn discard(&mut self, child: TransformContext<'a>) {
        self.coverage.absorb(child.coverage);
    }

    /// True when the buffer is empty or ends a clause keyword or `(`.
    ///
    /// Trailing block comments are skipped.
    pub fn at_clause_start(&self) -> bool {
        let mut head = self.sql.trim_end();
        while head.ends_with("*/") {
            match head.rfind("/*") {
                Some(start) => head = head[..start].trim_end(),
                None => break,
            }
        }
        if head.is_empty() {
            return self.clause_start;
        }
        if head.ends_with('(') {
            return true;
        }
        let last_word = head
            .rsplit(|c: char| !(c.is_alphanumeric() || c == '_'))
            .next()
            .unwrap_or("");
        CLAUSE_KEYWORDS
            .iter()
            .any(|kw| kw.eq_ignore_ascii_case(last_word))
    }

    /// Remove a leading `AND`/`OR` from the buffer, keeping leading whitespace.
    pub fn strip_leading_connective(&mut self) {
        let body = self.sql.trim_start();
        let lead = self.sql.len() - body.len();
        let word_end = body
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(body.len());
        let word = &body[..word_end];
        if word.eq_ignore_ascii_case("AND") || word.eq_ignore_ascii_case("OR") {
            let rest = body[word_end..].trim_start();
            self.sql = format!("{}{}", &self.sql[..lead], rest);
        }
    }

    pub fn push_sql(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    /// Emit one placeholder bound to `value`.
    pub fn push_bind(&mut self, name: &str, value: Value) {
        self.push_placeholder();
        self.bind_names.push(name.to_string());
        self.bind_values.push(BindValue::scalar(value));
        self.enabled = true;
    }

    /// Emit `(?, ?, ...)` with one placeholder per element.
    pub fn push_bind_list(&mut self, name: &str, items: Vec<Value>) {
        self.sql.push('(');
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_placeholder();
            self.bind_names.push(name.to_string());
            self.bind_values.push(BindValue::list_element(item));
        }
        self.sql.push(')');
        self.enabled = true;
    }

    fn push_placeholder(&mut self) {
        let index = self.bind_offset + self.bind_values.len();
        let placeholder = self.options.placeholder.render(index);
        self.sql.push_str(&placeholder);
    }

    pub fn push_frame(&mut self, frame: BTreeMap<String, Value>) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self) {
        self.enabled = true;
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bind_names(&self) -> &[String] {
        &self.bind_names
    }

    pub fn bind_values(&self) -> &[BindValue] {
        &self.bind_values
    }

    pub fn coverage(&self) -> &CoverageRecord {
        &self.coverage
    }

    pub fn coverage_mut(&mut self) -> &mut CoverageRecord {
        &mut self.coverage
    }

    pub(crate) fn into_parts(self) -> ContextParts {
        ContextParts {
            sql: self.sql,
            bind_names: self.bind_names,
            bind_values: self.bind_values,
            coverage: self.coverage,
        }
    }
}

impl Scope for TransformContext<'_> {
    fn resolve(&self, path: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| resolve_in(frame, path))
            .or_else(|| self.params.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlaceholderStyle;

    #[test]
    fn test_fork_merge() {
        let params = Params::new();
        let options = TransformOptions::default();
        let mut ctx = TransformContext::new(&params, &options);
        ctx.push_sql("SELECT * FROM t WHERE a = ");
        ctx.push_bind("a", Value::Int(1));
        ctx.push_sql(" ");

        let mut child = ctx.fork();
        assert!(!child.is_enabled());
        assert!(child.sql().is_empty());
        child.push_sql(" AND b = ");
        child.push_bind("b", Value::Int(2));
        child.coverage_mut().record_branch(40, true);
        ctx.merge(child);

        assert_eq!(ctx.sql(), "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(ctx.bind_names(), &["a".to_string(), "b".to_string()]);
        assert_eq!(ctx.bind_values().len(), 2);
        assert!(ctx.coverage().branch(40).is_some());
    }

    #[test]
    fn test_discard_keeps_only_coverage() {
        let params = Params::new();
        let options = TransformOptions::default();
        let mut ctx = TransformContext::new(&params, &options);
        let mut child = ctx.fork();
        child.push_sql("AND x = 1");
        child.coverage_mut().record_branch(3, false);
        ctx.discard(child);
        assert!(ctx.sql().is_empty());
        assert!(!ctx.is_enabled());
        assert!(ctx.coverage().branch(3).is_some());
    }

    #[test]
    fn test_numbered_placeholders_continue_across_fork() {
        let params = Params::new();
        let options = TransformOptions {
            placeholder: PlaceholderStyle::Numbered,
            ..TransformOptions::default()
        };
        let mut ctx = TransformContext::new(&params, &options);
        ctx.push_bind("a", Value::Int(1));
        ctx.push_sql(" ");
        let mut child = ctx.fork();
        child.push_bind_list("ids", vec![Value::Int(2), Value::Int(3)]);
        ctx.merge(child);
        assert_eq!(ctx.sql(), "$1 ($2, $3)");
    }

    #[test]
    fn test_clause_start() {
        let params = Params::new();
        let options = TransformOptions::default();
        let mut ctx = TransformContext::new(&params, &options);
        assert!(ctx.at_clause_start());
        ctx.push_sql("SELECT * FROM t WHERE\n  ");
        assert!(ctx.at_clause_start());
        assert!(ctx.fork().at_clause_start());
        ctx.push_sql("1=1 ");
        assert!(!ctx.at_clause_start());
        assert!(!ctx.fork().at_clause_start());
        ctx.push_sql("AND (");
        assert!(ctx.at_clause_start());
    }

    #[test]
    fn test_clause_start_skips_trailing_comments() {
        let params = Params::new();
        let options = TransformOptions::default();
        let mut ctx = TransformContext::new(&params, &options);
        ctx.push_sql("SELECT * FROM t WHERE /* filters */ /* more */\n  ");
        assert!(ctx.at_clause_start());

        let mut ctx = TransformContext::new(&params, &options);
        ctx.push_sql("WHERE 1=1 /* filters */ ");
        assert!(!ctx.at_clause_start());
    }

    #[test]
    fn test_strip_leading_connective() {
        let params = Params::new();
        let options = TransformOptions::default();
        let mut ctx = TransformContext::new(&params, &options);
        ctx.push_sql("\n  and a = 1");
        ctx.strip_leading_connective();
        assert_eq!(ctx.sql(), "\n  a = 1");

        let mut ctx = TransformContext::new(&params, &options);
        ctx.push_sql(" ORDER_ID = 1");
        ctx.strip_leading_connective();
        assert_eq!(ctx.sql(), " ORDER_ID = 1");
    }

    #[test]
    fn test_loop_frames_shadow_params() {
        let params = Params::new().param("x", "outer");
        let options = TransformOptions::default();
        let mut ctx = TransformContext::new(&params, &options);
        assert_eq!(ctx.resolve("x"), Some(&Value::from("outer")));
        let mut frame = BTreeMap::new();
        frame.insert("x".to_string(), Value::from("inner"));
        ctx.push_frame(frame);
        assert_eq!(ctx.resolve("x"), Some(&Value::from("inner")));
        ctx.pop_frame();
        assert_eq!(ctx.resolve("x"), Some(&Value::from("outer")));
    }
}
