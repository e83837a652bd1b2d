//! Template expression language for workflow documents.
//!
//! Expressions appear embedded in string values as `${{ ... }}` templates:
//!
//! - `${{ inputs.name }}` — workflow input reference
//! - `${{ steps.x.output }}` — prior step output reference
//! - `${{ item }}` / `${{ index }}` — current for_each iteration variables
//! - `${{ not inputs.dry_run }}` — negated reference
//! - `${{ steps.x.output.field[0] }}` — nested field / index access
//! - `${{ a and b }}` / `${{ a or b }}` — short-circuiting boolean chains
//! - `${{ a if b else c }}` — ternary selection
//!
//! The pipeline is lexer → recursive-descent parser → AST → evaluator over
//! JSON values, plus a resolver that substitutes templates inside arbitrary
//! value trees.

mod ast;
mod eval;
mod lexer;
mod parser;
mod template;

pub use ast::{Accessor, BoolOp, Expr, ReferenceExpr};
pub use eval::{evaluate, truthy};
pub use parser::parse_expression;
pub use template::{
    canonical_string, extract_all, find_templates, is_single_template, parse_for_each,
    resolve_map, resolve_string, resolve_value,
};

use thiserror::Error;

/// Errors produced while parsing or evaluating template expressions.
#[derive(Debug, Clone, Error)]
pub enum ExpressionError {
    /// The expression text does not conform to the grammar.
    #[error("syntax error in '{expression}' at {position}: {message}")]
    Syntax {
        expression: String,
        position: usize,
        message: String,
    },

    /// An input (or item) reference path does not exist in the context.
    #[error("reference not found: {path}")]
    ReferenceNotFound { path: String },

    /// `item` or `index` was referenced outside a for_each loop.
    #[error("'{reference}' is only defined inside a for_each loop")]
    NoIteration { reference: String },

    /// A value had the wrong shape for the requested operation.
    #[error("type error: {0}")]
    Type(String),
}

impl ExpressionError {
    pub(crate) fn syntax(
        expression: impl Into<String>,
        position: usize,
        message: impl Into<String>,
    ) -> Self {
        ExpressionError::Syntax {
            expression: expression.into(),
            position,
            message: message.into(),
        }
    }
}
