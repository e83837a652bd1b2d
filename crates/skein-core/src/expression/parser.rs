//! Recursive-descent parser for the expression grammar.
//!
//! ```text
//! expr        := ternary
//! ternary     := bool_or ('if' bool_or 'else' ternary)?
//! bool_or     := bool_and ('or' bool_and)*
//! bool_and    := unary    ('and' unary)*
//! unary       := 'not' reference | reference
//! reference   := 'inputs' accessor+
//!              | 'steps' '.' IDENT '.' 'output' accessor*
//!              | 'item' accessor*
//!              | 'index'
//! accessor    := '.' IDENT | '[' (INT | STRING) ']'
//! ```
//!
//! Parse-time constraints: `inputs` needs at least one accessor, `steps`
//! requires the `output` field, `index` permits no accessors, `not` applies
//! only to simple references, and double negation is rejected.

use super::ExpressionError;
use super::ast::{Accessor, BoolOp, Expr, ReferenceExpr};
use super::lexer::{Token, tokenize};

/// Strip a `${{ ... }}` wrapper if present.
fn strip_wrapper(expression: &str) -> &str {
    let stripped = expression.trim();
    if let Some(rest) = stripped.strip_prefix("${{") {
        if let Some(inner) = rest.strip_suffix("}}") {
            return inner.trim();
        }
    }
    stripped
}

/// Parse an expression string (with or without its `${{ }}` wrapper) into
/// an AST.
pub fn parse_expression(expression: &str) -> Result<Expr, ExpressionError> {
    let inner = strip_wrapper(expression);
    if inner.is_empty() {
        return Err(ExpressionError::syntax(expression, 0, "empty expression"));
    }

    let tokens = tokenize(inner)?;
    let mut parser = Parser { raw: expression, tokens: &tokens, pos: 0 };
    let expr = parser.parse_ternary()?;
    if parser.pos < parser.tokens.len() {
        return Err(ExpressionError::syntax(
            expression,
            0,
            "unexpected token after expression",
        ));
    }
    Ok(expr)
}

struct Parser<'a> {
    raw: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::syntax(self.raw, 0, message)
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExpressionError> {
        let if_true = self.parse_or()?;
        if self.peek_keyword("if") {
            self.bump();
            let condition = self.parse_or()?;
            if !self.peek_keyword("else") {
                return Err(self.error("ternary expression requires 'else'"));
            }
            self.bump();
            let if_false = self.parse_ternary()?;
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            });
        }
        Ok(if_true)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.parse_and()?;
        if !self.peek_keyword("or") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.peek_keyword("or") {
            self.bump();
            operands.push(self.parse_and()?);
        }
        Ok(Expr::Bool { op: BoolOp::Or, operands })
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let first = self.parse_unary()?;
        if !self.peek_keyword("and") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.peek_keyword("and") {
            self.bump();
            operands.push(self.parse_unary()?);
        }
        Ok(Expr::Bool { op: BoolOp::And, operands })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek_keyword("not") {
            self.bump();
            if self.peek_keyword("not") {
                return Err(self.error("double negation is not allowed"));
            }
            let reference = self.parse_reference(true)?;
            return Ok(Expr::Reference(reference));
        }
        Ok(Expr::Reference(self.parse_reference(false)?))
    }

    fn parse_reference(&mut self, negated: bool) -> Result<ReferenceExpr, ExpressionError> {
        let head = match self.bump() {
            Some(Token::Ident(name)) => name.clone(),
            Some(_) => return Err(self.error("expected a reference")),
            None => return Err(self.error("expected a reference, found end of expression")),
        };

        match head.as_str() {
            "inputs" => {
                let path = self.parse_accessors()?;
                if path.is_empty() {
                    return Err(self.error(
                        "input reference requires a property name (e.g., inputs.name)",
                    ));
                }
                Ok(ReferenceExpr::Input { path, negated })
            }
            "steps" => {
                if !matches!(self.peek(), Some(Token::Dot)) {
                    return Err(self.error(
                        "step reference requires step name and 'output' (e.g., steps.x.output)",
                    ));
                }
                self.bump();
                let step = match self.bump() {
                    Some(Token::Ident(name)) => name.clone(),
                    _ => return Err(self.error("expected a step name after 'steps.'")),
                };
                if !matches!(self.peek(), Some(Token::Dot)) {
                    return Err(self.error(
                        "step reference requires step name and 'output' (e.g., steps.x.output)",
                    ));
                }
                self.bump();
                match self.bump() {
                    Some(Token::Ident(field)) if field == "output" => {}
                    _ => {
                        return Err(self.error(
                            "step reference must include 'output' (e.g., steps.x.output)",
                        ));
                    }
                }
                let path = self.parse_accessors()?;
                Ok(ReferenceExpr::Step { step, path, negated })
            }
            "item" => {
                let path = self.parse_accessors()?;
                Ok(ReferenceExpr::Item { path, negated })
            }
            "index" => {
                if matches!(self.peek(), Some(Token::Dot) | Some(Token::LBracket)) {
                    return Err(self.error(
                        "index reference must be a single element (e.g., ${{ index }})",
                    ));
                }
                Ok(ReferenceExpr::Index { negated })
            }
            other => Err(self.error(format!(
                "expression must start with 'inputs', 'steps', 'item', or 'index', got '{other}'"
            ))),
        }
    }

    fn parse_accessors(&mut self) -> Result<Vec<Accessor>, ExpressionError> {
        let mut accessors = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(name)) => accessors.push(Accessor::Key(name.clone())),
                        _ => return Err(self.error("expected an identifier after '.'")),
                    }
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let accessor = match self.bump() {
                        Some(Token::Int(index)) => Accessor::Index(*index),
                        Some(Token::Str(key)) => Accessor::Key(key.clone()),
                        _ => return Err(self.error("expected an index or string key in brackets")),
                    };
                    match self.bump() {
                        Some(Token::RBracket) => accessors.push(accessor),
                        _ => return Err(self.error("expected ']'")),
                    }
                }
                _ => break,
            }
        }
        Ok(accessors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        parse_expression(input).unwrap_or_else(|e| panic!("parse of '{input}' failed: {e}"))
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    #[test]
    fn parses_input_reference() {
        let expr = parse("${{ inputs.name }}");
        assert_eq!(
            expr,
            Expr::Reference(ReferenceExpr::Input {
                path: vec![Accessor::Key("name".to_string())],
                negated: false,
            })
        );
    }

    #[test]
    fn parses_without_wrapper() {
        assert_eq!(parse("inputs.name"), parse("${{ inputs.name }}"));
    }

    #[test]
    fn parses_step_reference_with_accessors() {
        let expr = parse("${{ steps.gather.output.items[0] }}");
        assert_eq!(
            expr,
            Expr::Reference(ReferenceExpr::Step {
                step: "gather".to_string(),
                path: vec![Accessor::Key("items".to_string()), Accessor::Index(0)],
                negated: false,
            })
        );
    }

    #[test]
    fn parses_item_and_index() {
        assert_eq!(
            parse("${{ item.name }}"),
            Expr::Reference(ReferenceExpr::Item {
                path: vec![Accessor::Key("name".to_string())],
                negated: false,
            })
        );
        assert_eq!(
            parse("${{ index }}"),
            Expr::Reference(ReferenceExpr::Index { negated: false })
        );
    }

    #[test]
    fn parses_bracket_string_key() {
        let expr = parse(r#"${{ inputs["key name"] }}"#);
        assert_eq!(
            expr,
            Expr::Reference(ReferenceExpr::Input {
                path: vec![Accessor::Key("key name".to_string())],
                negated: false,
            })
        );
    }

    #[test]
    fn parses_negated_reference() {
        let expr = parse("${{ not inputs.dry_run }}");
        assert!(matches!(
            expr,
            Expr::Reference(ReferenceExpr::Input { negated: true, .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Boolean chains and ternary
    // -----------------------------------------------------------------------

    #[test]
    fn parses_and_chain() {
        let expr = parse("${{ inputs.a and inputs.b and inputs.c }}");
        match expr {
            Expr::Bool { op: BoolOp::And, operands } => assert_eq!(operands.len(), 3),
            other => panic!("expected and-chain, got {other:?}"),
        }
    }

    #[test]
    fn parses_or_of_ands_with_precedence() {
        // a and b or c == (a and b) or c
        let expr = parse("${{ inputs.a and inputs.b or inputs.c }}");
        match expr {
            Expr::Bool { op: BoolOp::Or, operands } => {
                assert_eq!(operands.len(), 2);
                assert!(matches!(operands[0], Expr::Bool { op: BoolOp::And, .. }));
            }
            other => panic!("expected or at the top, got {other:?}"),
        }
    }

    #[test]
    fn parses_ternary() {
        let expr = parse("${{ inputs.title if inputs.title else steps.gen.output }}");
        match expr {
            Expr::Ternary { condition, if_true, if_false } => {
                assert!(matches!(*condition, Expr::Reference(ReferenceExpr::Input { .. })));
                assert!(matches!(*if_true, Expr::Reference(ReferenceExpr::Input { .. })));
                assert!(matches!(*if_false, Expr::Reference(ReferenceExpr::Step { .. })));
            }
            other => panic!("expected ternary, got {other:?}"),
        }
    }

    #[test]
    fn parses_nested_ternary_right_associative() {
        let expr = parse("${{ inputs.a if inputs.x else inputs.b if inputs.y else inputs.c }}");
        match expr {
            Expr::Ternary { if_false, .. } => {
                assert!(matches!(*if_false, Expr::Ternary { .. }));
            }
            other => panic!("expected ternary, got {other:?}"),
        }
    }

    #[test]
    fn not_binds_to_single_reference_in_chain() {
        // not a and b == (not a) and b
        let expr = parse("${{ not inputs.a and inputs.b }}");
        match expr {
            Expr::Bool { op: BoolOp::And, operands } => {
                assert!(matches!(
                    &operands[0],
                    Expr::Reference(ReferenceExpr::Input { negated: true, .. })
                ));
                assert!(matches!(
                    &operands[1],
                    Expr::Reference(ReferenceExpr::Input { negated: false, .. })
                ));
            }
            other => panic!("expected and-chain, got {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    fn parse_err(input: &str) -> String {
        parse_expression(input)
            .expect_err(&format!("'{input}' should not parse"))
            .to_string()
    }

    #[test]
    fn rejects_empty_expression() {
        assert!(parse_err("${{ }}").contains("empty expression"));
        assert!(parse_err("").contains("empty expression"));
    }

    #[test]
    fn rejects_bare_inputs() {
        assert!(parse_err("${{ inputs }}").contains("requires a property name"));
    }

    #[test]
    fn rejects_step_without_output() {
        assert!(parse_err("${{ steps.gather }}").contains("'output'"));
        assert!(parse_err("${{ steps.gather.result }}").contains("'output'"));
    }

    #[test]
    fn rejects_index_with_accessors() {
        assert!(parse_err("${{ index.field }}").contains("single element"));
        assert!(parse_err("${{ index[0] }}").contains("single element"));
    }

    #[test]
    fn rejects_double_negation() {
        assert!(parse_err("${{ not not inputs.a }}").contains("double negation"));
    }

    #[test]
    fn rejects_unknown_head() {
        let msg = parse_err("${{ outputs.a }}");
        assert!(msg.contains("must start with"), "got: {msg}");
        assert!(msg.contains("outputs"), "got: {msg}");
    }

    #[test]
    fn rejects_leading_operator() {
        assert!(parse_err("${{ and inputs.a }}").contains("must start with"));
    }

    #[test]
    fn rejects_trailing_tokens() {
        assert!(parse_err("${{ inputs.a inputs.b }}").contains("unexpected token"));
    }

    #[test]
    fn rejects_ternary_without_else() {
        assert!(parse_err("${{ inputs.a if inputs.b }}").contains("'else'"));
    }
}
