//! Template resolution: substitute `${{ ... }}` occurrences inside value
//! trees.
//!
//! A string that is exactly one template evaluates to the expression's
//! native value (a number stays a number, an array stays an array). A mixed
//! string interpolates each embedded expression with the canonical string
//! form. Strings without templates pass through unchanged.

use serde_json::Value;

use super::ExpressionError;
use super::ast::Expr;
use super::eval::evaluate;
use super::parser::parse_expression;
use crate::context::WorkflowContext;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

/// Locate every `${{ ... }}` occurrence in `text`.
///
/// Returns `(start, end_exclusive, inner)` triples in order of appearance.
/// An unterminated opener is treated as literal text.
pub fn find_templates(text: &str) -> Vec<(usize, usize, &str)> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find(OPEN) {
        let start = from + offset;
        let Some(close_offset) = text[start + OPEN.len()..].find(CLOSE) else {
            break;
        };
        let inner_start = start + OPEN.len();
        let end = inner_start + close_offset + CLOSE.len();
        found.push((start, end, text[inner_start..inner_start + close_offset].trim()));
        from = end;
    }
    found
}

/// If the whole (trimmed) string is a single template, return its inner
/// expression text.
pub fn is_single_template(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix(OPEN)?;
    let close = rest.find(CLOSE)?;
    if close + CLOSE.len() == rest.len() {
        Some(rest[..close].trim())
    } else {
        None
    }
}

/// Find and parse every template in `text`, in order of appearance.
pub fn extract_all(text: &str) -> Result<Vec<Expr>, ExpressionError> {
    find_templates(text)
        .into_iter()
        .map(|(_, _, inner)| parse_expression(inner))
        .collect()
}

/// Parse a `for_each` specification: either a fully wrapped template or a
/// bare expression string.
pub fn parse_for_each(spec: &str) -> Result<Expr, ExpressionError> {
    match is_single_template(spec) {
        Some(inner) => parse_expression(inner),
        None => parse_expression(spec),
    }
}

/// Resolve all templates in a single string.
pub fn resolve_string(text: &str, ctx: &WorkflowContext) -> Result<Value, ExpressionError> {
    if let Some(inner) = is_single_template(text) {
        let expr = parse_expression(inner)?;
        return evaluate(&expr, ctx);
    }

    let templates = find_templates(text);
    if templates.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    let mut rendered = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, inner) in templates {
        rendered.push_str(&text[cursor..start]);
        let expr = parse_expression(inner)?;
        let value = evaluate(&expr, ctx)?;
        rendered.push_str(&canonical_string(&value));
        cursor = end;
    }
    rendered.push_str(&text[cursor..]);
    Ok(Value::String(rendered))
}

/// Recursively resolve templates in an arbitrary value tree.
pub fn resolve_value(value: &Value, ctx: &WorkflowContext) -> Result<Value, ExpressionError> {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(key, item)| Ok((key.clone(), resolve_value(item, ctx)?)))
            .collect::<Result<serde_json::Map<_, _>, ExpressionError>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve templates in every value of a map (step kwargs, static agent
/// contexts, subworkflow input bindings).
pub fn resolve_map(
    map: &serde_json::Map<String, Value>,
    ctx: &WorkflowContext,
) -> Result<serde_json::Map<String, Value>, ExpressionError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, ctx)?)))
        .collect()
}

/// Canonical string form used when interpolating a non-string value into a
/// mixed string: booleans render `True`/`False`, null renders `None`,
/// numbers as decimals, sequences and maps as compact JSON.
pub fn canonical_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}
