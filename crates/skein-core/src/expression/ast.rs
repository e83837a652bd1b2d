//! Expression AST.

/// One accessor in a reference path: `.ident` or `["key"]` descend into a
/// map, `[i]` (negatives allowed) indexes a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Key(String),
    Index(i64),
}

impl std::fmt::Display for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Accessor::Key(key) => write!(f, ".{key}"),
            Accessor::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// A single reference with an optional `not` prefix.
///
/// `not` applies only to simple references; the grammar has no parentheses,
/// so compound boolean expressions cannot be negated.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceExpr {
    /// `inputs.<path>` — at least one accessor required.
    Input { path: Vec<Accessor>, negated: bool },
    /// `steps.<name>.output[.<path>]` — `path` holds the accessors after
    /// `output`.
    Step {
        step: String,
        path: Vec<Accessor>,
        negated: bool,
    },
    /// `item[.<path>]` — current for_each item.
    Item { path: Vec<Accessor>, negated: bool },
    /// `index` — current for_each position; takes no accessors.
    Index { negated: bool },
}

impl ReferenceExpr {
    pub fn negated(&self) -> bool {
        match self {
            ReferenceExpr::Input { negated, .. }
            | ReferenceExpr::Step { negated, .. }
            | ReferenceExpr::Item { negated, .. }
            | ReferenceExpr::Index { negated } => *negated,
        }
    }

    /// Dotted rendering of the full path, for error messages.
    pub fn path_display(&self) -> String {
        let (head, path) = match self {
            ReferenceExpr::Input { path, .. } => ("inputs".to_string(), path.as_slice()),
            ReferenceExpr::Step { step, path, .. } => {
                (format!("steps.{step}.output"), path.as_slice())
            }
            ReferenceExpr::Item { path, .. } => ("item".to_string(), path.as_slice()),
            ReferenceExpr::Index { .. } => ("index".to_string(), [].as_slice()),
        };
        let mut out = head;
        for accessor in path {
            out.push_str(&accessor.to_string());
        }
        out
    }
}

/// Boolean combination operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Reference(ReferenceExpr),
    /// `a and b [and c ...]` / `a or b [or c ...]`, short-circuiting.
    Bool { op: BoolOp, operands: Vec<Expr> },
    /// `value_if_true if condition else value_if_false`.
    Ternary {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
}
