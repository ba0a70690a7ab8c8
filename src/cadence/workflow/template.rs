// SPDX-License-Identifier: MIT

//! `${expr}` templates in step parameters and schedule contexts
//!
//! A string that is exactly one `${expr}` takes the expression's value with
//! its type intact. Text mixed with placeholders renders to a string, with
//! string values inserted as-is and anything else as JSON.

use serde_json::{Map, Value};

use super::expression;
use super::state::Context;
use crate::kit::error::ExpressionError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Expr(&'a str),
}

fn segments(input: &str) -> Result<Vec<Segment<'_>>, ExpressionError> {
    let mut out = Vec::new();
    let mut rest = input;
    let mut offset = 0;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        let body = &rest[start + 2..];
        let end = body.find('}').ok_or_else(|| {
            ExpressionError::syntax("unterminated '${' placeholder", offset + start)
        })?;
        out.push(Segment::Expr(body[..end].trim()));
        let consumed = start + 2 + end + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    Ok(out)
}

/// Resolve every template inside `value`, recursing into lists and maps
pub fn render(value: &Value, ctx: &Context) -> Result<Value, ExpressionError> {
    match value {
        Value::String(s) => render_str(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| render(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => render_map(map, ctx).map(Value::Object),
        other => Ok(other.clone()),
    }
}

pub fn render_map(map: &Map<String, Value>, ctx: &Context) -> Result<Map<String, Value>, ExpressionError> {
    map.iter()
        .map(|(k, v)| render(v, ctx).map(|v| (k.clone(), v)))
        .collect()
}

fn render_str(s: &str, ctx: &Context) -> Result<Value, ExpressionError> {
    let parts = segments(s)?;
    if let [Segment::Expr(expr)] = parts.as_slice() {
        return expression::evaluate_str(expr, ctx);
    }
    if !parts.iter().any(|p| matches!(p, Segment::Expr(_))) {
        return Ok(Value::String(s.to_string()));
    }

    let mut rendered = String::new();
    for part in parts {
        match part {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Expr(expr) => match expression::evaluate_str(expr, ctx)? {
                Value::String(v) => rendered.push_str(&v),
                other => rendered.push_str(&other.to_string()),
            },
        }
    }
    Ok(Value::String(rendered))
}

/// Every placeholder expression inside `value`, for registration checks
pub fn expressions(value: &Value) -> Result<Vec<&str>, ExpressionError> {
    let mut found = Vec::new();
    collect(value, &mut found)?;
    Ok(found)
}

fn collect<'a>(value: &'a Value, found: &mut Vec<&'a str>) -> Result<(), ExpressionError> {
    match value {
        Value::String(s) => {
            for part in segments(s)? {
                if let Segment::Expr(expr) = part {
                    found.push(expr);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, found)?;
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect(v, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}
