//! # twosql: two-way SQL templates
//!
//! > **SQL that still runs as SQL.**
//!
//! Templates are plain SQL with directives hidden in comments. Run as-is,
//! the placeholder literals make the statement executable for testing; run
//! through twosql, the directives pick branches, unroll loops and turn the
//! placeholders into bind markers.
//!
//! ## Quick Example
//!
//! ```
//! use twosql::prelude::*;
//!
//! let tree = twosql::parse(
//!     "SELECT * FROM users WHERE 1=1 /*BEGIN*//*IF id != null*/AND id = /*#id*/1/*END*//*END*/",
//! )?;
//!
//! let out = twosql::transform(&tree, &Params::new().param("id", 5))?;
//! assert_eq!(out.sql, "SELECT * FROM users WHERE 1=1 AND id = ?");
//! assert_eq!(out.values(), vec![&Value::Int(5)]);
//!
//! let out = twosql::transform(&tree, &Params::new())?;
//! assert_eq!(out.sql, "SELECT * FROM users WHERE 1=1");
//! # Ok::<(), twosql::error::TwoSqlError>(())
//! ```
//!
//! ## Directives
//!
//! | Directive | Form | Effect |
//! |-----------|------|--------|
//! | Bind | `/*#name*/1` | one placeholder, one bind value |
//! | Paren bind | `/*PAREN#ids*/(1, 2)` | `(?, ?, ...)` sized to the list |
//! | Embed | `/*$expr*/x` | splices the value as SQL text |
//! | If | `/*IF e*/ ... /*ELSEIF e*/ ... /*ELSE*/ ... /*END*/` | picks one branch |
//! | Begin | `/*BEGIN*/ ... /*END*/` | kept only when something inside is active |
//! | For | `/*FOR v IN expr*/ ... /*END*/` | repeats the body per element |

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod expr;
pub mod node;
pub mod parser;
pub mod value;

pub use engine::transform;

pub mod prelude {
    pub use crate::config::{Config, PlaceholderStyle, TransformOptions};
    pub use crate::context::{BindKind, BindValue};
    pub use crate::coverage::{CoverageCollector, CoverageHandler, CoverageRecord, CoverageSummary};
    pub use crate::engine::{SqlEngine, SqlOutput, Transformer};
    pub use crate::error::*;
    pub use crate::node::NodeTree;
    pub use crate::value::{Params, Value};
}

/// Parse a template into a reusable node tree.
///
/// # Example
///
/// ```
/// use twosql::parse;
///
/// let tree = parse("SELECT * FROM t /*IF a*/WHERE a/*END*/").unwrap();
/// assert_eq!(tree.coverage_points().len(), 1);
/// ```
pub fn parse(template: &str) -> error::TwoSqlResult<node::NodeTree> {
    parser::parse(template)
}
