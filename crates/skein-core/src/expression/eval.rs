//! Expression evaluator over JSON values.
//!
//! Reference lookup rules:
//! - a missing **input** path is a hard `ReferenceNotFound` error;
//! - a missing **step** (or a missing path inside a step's output) resolves
//!   to null, so context builders and argument expressions can probe for
//!   outputs of steps that have not run;
//! - `item` / `index` error outside a for_each iteration.
//!
//! Truthiness: null, false, zero, and empty strings/arrays/maps are falsy.
//! `and`/`or` short-circuit and yield the deciding operand's value; `not`
//! yields a boolean; a ternary evaluates its condition and then exactly one
//! branch.

use serde_json::Value;

use super::ExpressionError;
use super::ast::{Accessor, BoolOp, Expr, ReferenceExpr};
use crate::context::WorkflowContext;

/// Truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate an expression against the current context.
pub fn evaluate(expr: &Expr, ctx: &WorkflowContext) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Reference(reference) => {
            let value = eval_reference(reference, ctx)?;
            if reference.negated() {
                Ok(Value::Bool(!truthy(&value)))
            } else {
                Ok(value)
            }
        }
        Expr::Bool { op, operands } => {
            let mut last = Value::Null;
            for operand in operands {
                let value = evaluate(operand, ctx)?;
                let decided = match op {
                    BoolOp::And => !truthy(&value),
                    BoolOp::Or => truthy(&value),
                };
                if decided {
                    return Ok(value);
                }
                last = value;
            }
            Ok(last)
        }
        Expr::Ternary { condition, if_true, if_false } => {
            let condition = evaluate(condition, ctx)?;
            if truthy(&condition) {
                evaluate(if_true, ctx)
            } else {
                evaluate(if_false, ctx)
            }
        }
    }
}

fn eval_reference(
    reference: &ReferenceExpr,
    ctx: &WorkflowContext,
) -> Result<Value, ExpressionError> {
    match reference {
        ReferenceExpr::Input { path, .. } => {
            // The parser guarantees at least one accessor.
            let Some((first, rest)) = path.split_first() else {
                return Err(ExpressionError::Type(
                    "input reference requires a property name".to_string(),
                ));
            };
            let mut current = match first {
                Accessor::Key(key) => ctx.inputs.get(key),
                Accessor::Index(_) => {
                    return Err(ExpressionError::Type(
                        "inputs cannot be indexed with an integer".to_string(),
                    ));
                }
            }
            .ok_or_else(|| ExpressionError::ReferenceNotFound {
                path: reference.path_display(),
            })?;
            for accessor in rest {
                current = descend(current, accessor).ok_or_else(|| {
                    ExpressionError::ReferenceNotFound { path: reference.path_display() }
                })?;
            }
            Ok(current.clone())
        }
        ReferenceExpr::Step { step, path, .. } => {
            let Some(result) = ctx.results.get(step) else {
                return Ok(Value::Null);
            };
            let mut current = &result.output;
            for accessor in path {
                match descend(current, accessor) {
                    Some(next) => current = next,
                    None => return Ok(Value::Null),
                }
            }
            Ok(current.clone())
        }
        ReferenceExpr::Item { path, .. } => {
            let iteration = ctx.iteration.as_ref().ok_or_else(|| {
                ExpressionError::NoIteration { reference: "item".to_string() }
            })?;
            let mut current = &iteration.item;
            for accessor in path {
                current = descend(current, accessor).ok_or_else(|| {
                    ExpressionError::ReferenceNotFound { path: reference.path_display() }
                })?;
            }
            Ok(current.clone())
        }
        ReferenceExpr::Index { .. } => {
            let iteration = ctx.iteration.as_ref().ok_or_else(|| {
                ExpressionError::NoIteration { reference: "index".to_string() }
            })?;
            Ok(Value::from(iteration.index as u64))
        }
    }
}

/// One accessor step: key lookup on maps, (negative-capable) index on
/// sequences. Anything else is a miss.
fn descend<'v>(value: &'v Value, accessor: &Accessor) -> Option<&'v Value> {
    match accessor {
        Accessor::Key(key) => value.as_object()?.get(key),
        Accessor::Index(index) => {
            let array = value.as_array()?;
            let position = if *index < 0 {
                array.len().checked_sub(index.unsigned_abs() as usize)?
            } else {
                *index as usize
            };
            array.get(position)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse_expression;
    use serde_json::json;
    use skein_types::result::{StepResult, StepType};

    fn ctx_with(
        inputs: &[(&str, Value)],
        steps: &[(&str, Value)],
    ) -> WorkflowContext {
        let mut ctx = WorkflowContext::new(
            inputs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            None,
        );
        for (name, output) in steps {
            ctx.store_result(StepResult::success(*name, StepType::Python, output.clone(), 1));
        }
        ctx
    }

    fn eval(input: &str, ctx: &WorkflowContext) -> Value {
        evaluate(&parse_expression(input).unwrap(), ctx)
            .unwrap_or_else(|e| panic!("eval of '{input}' failed: {e}"))
    }

    // -----------------------------------------------------------------------
    // Truthiness
    // -----------------------------------------------------------------------

    #[test]
    fn truthiness_rules() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(-1)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([0])));
        assert!(truthy(&json!({"k": 0})));
    }

    // -----------------------------------------------------------------------
    // Reference lookup
    // -----------------------------------------------------------------------

    #[test]
    fn input_reference_returns_native_value() {
        let ctx = ctx_with(&[("count", json!(3)), ("items", json!(["a", "b"]))], &[]);
        assert_eq!(eval("${{ inputs.count }}", &ctx), json!(3));
        assert_eq!(eval("${{ inputs.items }}", &ctx), json!(["a", "b"]));
        assert_eq!(eval("${{ inputs.items[1] }}", &ctx), json!("b"));
        assert_eq!(eval("${{ inputs.items[-1] }}", &ctx), json!("b"));
    }

    #[test]
    fn missing_input_is_a_hard_error() {
        let ctx = ctx_with(&[], &[]);
        let err = evaluate(&parse_expression("${{ inputs.absent }}").unwrap(), &ctx).unwrap_err();
        assert!(matches!(err, ExpressionError::ReferenceNotFound { .. }));
        assert!(err.to_string().contains("inputs.absent"));
    }

    #[test]
    fn missing_nested_input_path_is_a_hard_error() {
        let ctx = ctx_with(&[("cfg", json!({"a": 1}))], &[]);
        let err = evaluate(&parse_expression("${{ inputs.cfg.b }}").unwrap(), &ctx).unwrap_err();
        assert!(err.to_string().contains("inputs.cfg.b"));
    }

    #[test]
    fn step_reference_descends_into_output() {
        let ctx = ctx_with(&[], &[("gather", json!({"items": ["x", "y"]}))]);
        assert_eq!(eval("${{ steps.gather.output.items[0] }}", &ctx), json!("x"));
        assert_eq!(eval("${{ steps.gather.output }}", &ctx), json!({"items": ["x", "y"]}));
    }

    #[test]
    fn missing_step_resolves_to_null() {
        let ctx = ctx_with(&[], &[]);
        assert_eq!(eval("${{ steps.never_ran.output }}", &ctx), Value::Null);
        // Missing path inside an existing output is also soft
        let ctx = ctx_with(&[], &[("gather", json!({"a": 1}))]);
        assert_eq!(eval("${{ steps.gather.output.b.c }}", &ctx), Value::Null);
    }

    #[test]
    fn item_and_index_require_an_iteration() {
        let ctx = ctx_with(&[], &[]);
        let err = evaluate(&parse_expression("${{ item }}").unwrap(), &ctx).unwrap_err();
        assert!(matches!(err, ExpressionError::NoIteration { .. }));

        let iter = ctx.for_iteration(json!({"name": "build"}), 4, "loop");
        assert_eq!(eval("${{ item.name }}", &iter), json!("build"));
        assert_eq!(eval("${{ index }}", &iter), json!(4));
    }

    #[test]
    fn missing_item_path_is_a_hard_error() {
        let ctx = ctx_with(&[], &[]).for_iteration(json!({"a": 1}), 0, "loop");
        let err = evaluate(&parse_expression("${{ item.b }}").unwrap(), &ctx).unwrap_err();
        assert!(matches!(err, ExpressionError::ReferenceNotFound { .. }));
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    #[test]
    fn negation_inverts_truthiness() {
        let ctx = ctx_with(&[("dry_run", json!(false)), ("name", json!("x"))], &[]);
        assert_eq!(eval("${{ not inputs.dry_run }}", &ctx), json!(true));
        assert_eq!(eval("${{ not inputs.name }}", &ctx), json!(false));
    }

    #[test]
    fn and_returns_first_falsy_or_last_value() {
        let ctx = ctx_with(&[("a", json!("yes")), ("b", json!("")), ("c", json!("end"))], &[]);
        assert_eq!(eval("${{ inputs.a and inputs.c }}", &ctx), json!("end"));
        assert_eq!(eval("${{ inputs.b and inputs.c }}", &ctx), json!(""));
    }

    #[test]
    fn or_returns_first_truthy_or_last_value() {
        let ctx = ctx_with(&[("a", json!("")), ("b", json!("found")), ("c", json!(0))], &[]);
        assert_eq!(eval("${{ inputs.a or inputs.b }}", &ctx), json!("found"));
        assert_eq!(eval("${{ inputs.a or inputs.c }}", &ctx), json!(0));
    }

    #[test]
    fn and_short_circuits_on_falsy_operand() {
        // inputs.b is absent; with short-circuit the second operand is
        // never evaluated, so no ReferenceNotFound surfaces.
        let ctx = ctx_with(&[("a", json!(""))], &[]);
        assert_eq!(eval("${{ inputs.a and inputs.b }}", &ctx), json!(""));
    }

    #[test]
    fn or_short_circuits_on_truthy_operand() {
        let ctx = ctx_with(&[("a", json!("hit"))], &[]);
        assert_eq!(eval("${{ inputs.a or inputs.b }}", &ctx), json!("hit"));
    }

    #[test]
    fn ternary_evaluates_exactly_one_branch() {
        // The untaken branch references an absent input; it must not be
        // evaluated.
        let ctx = ctx_with(&[("title", json!("given"))], &[]);
        assert_eq!(
            eval("${{ inputs.title if inputs.title else inputs.absent }}", &ctx),
            json!("given")
        );

        let ctx = ctx_with(&[("title", json!(""))], &[("gen", json!("auto"))]);
        assert_eq!(
            eval("${{ inputs.title if inputs.title else steps.gen.output }}", &ctx),
            json!("auto")
        );
    }

    #[test]
    fn evaluation_is_idempotent() {
        let ctx = ctx_with(&[("x", json!([1, 2, 3]))], &[]);
        let expr = parse_expression("${{ inputs.x[1] }}").unwrap();
        let first = evaluate(&expr, &ctx).unwrap();
        let second = evaluate(&expr, &ctx).unwrap();
        assert_eq!(first, second);
    }
}
