//! The embedded expression language used by `IF`, `ELSEIF`, `FOR` and `$`
//! directives.
//!
//! Expressions are compiled once into an [`Expression`] when the template is
//! parsed, then evaluated against a [`Scope`] on every transform.
//!
//! ```
//! use twosql::expr::evaluate;
//! use twosql::value::{Params, Value};
//!
//! let params = Params::new().param("age", 20);
//! let v = evaluate("age >= 18 && name == null", &params).unwrap();
//! assert_eq!(v, Value::Bool(true));
//! ```

mod grammar;

use std::cmp::Ordering;
use std::fmt;

use nom::{character::complete::multispace0, combinator::all_consuming, error::ErrorKind, sequence::terminated};

use crate::error::{TwoSqlError, TwoSqlResult};
use crate::value::{Scope, Value};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Built-in functions, callable with or without an `SF.` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    IsEmpty,
    IsNotEmpty,
    IsBlank,
    IsNotBlank,
    Size,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("SF.").unwrap_or(name);
        match name {
            "isEmpty" => Some(Function::IsEmpty),
            "isNotEmpty" => Some(Function::IsNotEmpty),
            "isBlank" => Some(Function::IsBlank),
            "isNotBlank" => Some(Function::IsNotBlank),
            "size" | "length" => Some(Function::Size),
            _ => None,
        }
    }

    fn call(self, arg: &Value) -> TwoSqlResult<Value> {
        let empty = || match arg {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            Value::Object(members) => members.is_empty(),
            _ => false,
        };
        let blank = || match arg {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        };
        match self {
            Function::IsEmpty => Ok(Value::Bool(empty())),
            Function::IsNotEmpty => Ok(Value::Bool(!empty())),
            Function::IsBlank => Ok(Value::Bool(blank())),
            Function::IsNotBlank => Ok(Value::Bool(!blank())),
            Function::Size => match arg {
                Value::Null => Ok(Value::Int(0)),
                Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                Value::List(items) => Ok(Value::Int(items.len() as i64)),
                Value::Object(members) => Ok(Value::Int(members.len() as i64)),
                other => Err(TwoSqlError::mismatch(format!(
                    "size() is not defined for {}",
                    other.kind()
                ))),
            },
        }
    }
}

/// A parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    /// A parameter name or dotted path.
    Ref(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `left ?? right`: `right` when `left` is null or absent.
    Coalesce(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negated: bool,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Evaluate in a value position: absent references are errors.
    pub fn eval(&self, scope: &dyn Scope) -> TwoSqlResult<Value> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::List(items) => items
                .iter()
                .map(|item| item.eval(scope))
                .collect::<TwoSqlResult<Vec<_>>>()
                .map(Value::List),
            Expr::Ref(path) => scope
                .resolve(path)
                .cloned()
                .ok_or_else(|| TwoSqlError::UnresolvedReference(path.clone())),
            Expr::Not(operand) => Ok(Value::Bool(!operand.eval_lenient(scope)?.is_truthy())),
            Expr::And(left, right) => {
                if !left.eval_lenient(scope)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(right.eval_lenient(scope)?.is_truthy()))
            }
            Expr::Or(left, right) => {
                if left.eval_lenient(scope)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(right.eval_lenient(scope)?.is_truthy()))
            }
            Expr::Coalesce(left, right) => {
                let v = left.eval_lenient(scope)?;
                if v.is_null() { right.eval(scope) } else { Ok(v) }
            }
            Expr::Compare { op, left, right } => {
                let null_test = matches!(op, CompareOp::Eq | CompareOp::Ne)
                    && (left.is_null_literal() || right.is_null_literal());
                let (l, r) = if null_test {
                    (left.eval_lenient(scope)?, right.eval_lenient(scope)?)
                } else {
                    (left.eval(scope)?, right.eval(scope)?)
                };
                compare(*op, &l, &r).map(Value::Bool)
            }
            Expr::In {
                needle,
                haystack,
                negated,
            } => {
                let n = needle.eval(scope)?;
                let h = haystack.eval(scope)?;
                let Some(items) = h.as_list() else {
                    return Err(TwoSqlError::mismatch(format!(
                        "IN requires a sequence on the right, got {}",
                        h.kind()
                    )));
                };
                let found = items.iter().any(|item| item.loose_eq(&n));
                Ok(Value::Bool(found != *negated))
            }
            Expr::IsNull { operand, negated } => {
                let v = operand.eval_lenient(scope)?;
                Ok(Value::Bool(v.is_null() != *negated))
            }
            Expr::Call { function, args } => {
                let arg = match (function, args.first()) {
                    (_, None) => Value::Null,
                    (Function::Size, Some(a)) => a.eval(scope)?,
                    (_, Some(a)) => a.eval_lenient(scope)?,
                };
                function.call(&arg)
            }
        }
    }

    /// Evaluate in a boolean or null-test position: absent references read as null.
    fn eval_lenient(&self, scope: &dyn Scope) -> TwoSqlResult<Value> {
        match self {
            Expr::Ref(path) => Ok(scope.resolve(path).cloned().unwrap_or(Value::Null)),
            other => other.eval(scope),
        }
    }

    fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(Value::Null))
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> TwoSqlResult<bool> {
    match op {
        CompareOp::Eq => Ok(left.loose_eq(right)),
        CompareOp::Ne => Ok(!left.loose_eq(right)),
        _ => {
            let ordering = left.compare(right).ok_or_else(|| {
                TwoSqlError::mismatch(format!(
                    "cannot compare {} {} {}",
                    left.kind(),
                    op,
                    right.kind()
                ))
            })?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Eq | CompareOp::Ne => unreachable!("handled above"),
            })
        }
    }
}

/// A compiled expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Compile an expression.
    pub fn parse(source: &str) -> TwoSqlResult<Self> {
        match all_consuming(terminated(grammar::parse_expression, multispace0))(source) {
            Ok((_, root)) => Ok(Self {
                source: source.trim().to_string(),
                root,
            }),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let offset = source.len() - e.input.len();
                let message = match e.code {
                    ErrorKind::Verify => "unknown function".to_string(),
                    ErrorKind::Count => "functions take exactly one argument".to_string(),
                    _ if e.input.trim().is_empty() => "unexpected end of expression".to_string(),
                    _ => format!("unexpected input '{}'", e.input.trim()),
                };
                Err(TwoSqlError::expression(source.trim(), offset, message))
            }
            Err(nom::Err::Incomplete(_)) => Err(TwoSqlError::expression(
                source.trim(),
                source.len(),
                "incomplete expression",
            )),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Evaluate to a value; absent references fail with `UnresolvedReference`.
    pub fn evaluate(&self, scope: &dyn Scope) -> TwoSqlResult<Value> {
        self.root.eval(scope)
    }

    /// Evaluate as an `IF` guard; absent and null values are false.
    pub fn test(&self, scope: &dyn Scope) -> TwoSqlResult<bool> {
        Ok(self.root.eval_lenient(scope)?.is_truthy())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate an expression in one step.
pub fn evaluate(expr: &str, scope: &dyn Scope) -> TwoSqlResult<Value> {
    Expression::parse(expr)?.evaluate(scope)
}
