//! Error types for twosql.

use thiserror::Error;

use crate::value::ValueKind;

/// The main error type for parsing and transforming templates.
#[derive(Debug, Error)]
pub enum TwoSqlError {
    /// Malformed directive nesting or an unknown directive.
    #[error("Template syntax error at position {position}: {message}")]
    TemplateSyntax { position: usize, message: String },

    /// An embedded expression could not be parsed.
    #[error("Expression syntax error in '{expression}' at offset {offset}: {message}")]
    ExpressionSyntax {
        expression: String,
        offset: usize,
        message: String,
    },

    /// An expression referenced a name missing from the parameters.
    #[error("Unresolved reference: '{0}'")]
    UnresolvedReference(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// A `#name` or `PAREN#name` marker has no matching parameter.
    #[error("Unbound parameter '{name}' at position {position}")]
    UnboundParameter { name: String, position: usize },

    /// `PAREN#name` resolved to an empty list, which would render `IN ()`.
    #[error("Empty list bound to '{name}' at position {position}")]
    EmptyListBind { name: String, position: usize },

    /// The collection of a `FOR` loop is not a list.
    #[error("FOR collection '{expression}' at position {position} is not iterable (got {kind})")]
    NotIterable {
        expression: String,
        position: usize,
        kind: ValueKind,
    },

    #[error("Unknown template: '{0}'")]
    UnknownTemplate(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TwoSqlError {
    /// Create a template syntax error at the given position.
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::TemplateSyntax {
            position,
            message: message.into(),
        }
    }

    /// Create an expression syntax error.
    pub fn expression(expression: &str, offset: usize, message: impl Into<String>) -> Self {
        Self::ExpressionSyntax {
            expression: expression.to_string(),
            offset,
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch(message.into())
    }

    /// True for errors raised while parsing, before any transform ran.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Self::TemplateSyntax { .. } | Self::ExpressionSyntax { .. }
        )
    }
}

/// Result type alias for twosql operations.
pub type TwoSqlResult<T> = Result<T, TwoSqlError>;
