// SPDX-License-Identifier: MIT

//! Expression evaluator
//!
//! Coercion rules, per operator:
//! - `+` number+number, string+string (concatenation), list+list
//! - `- * / %` numbers only; integer operands stay integers when exact
//! - `< <= > >=` number/number or string/string
//! - `== !=` structural; numbers compare numerically, other type pairs are unequal
//! - `and or not` booleans only, short-circuiting
//! - `contains` / `in` string/substring, list/element, map/key
//!
//! Anything else is a type mismatch. Nothing is coerced implicitly.

use serde_json::{Number, Value};
use std::cmp::Ordering;

use super::ast::{BinaryOp, Expression, LogicalOp, UnaryOp};
use super::functions;
use super::parser::parse;
use crate::cadence::workflow::state::Context;
use crate::kit::error::ExpressionError;

/// Evaluate a parsed expression against a variable context
pub fn evaluate(expr: &Expression, ctx: &Context) -> Result<Value, ExpressionError> {
    match expr {
        Expression::Literal(v) => Ok(v.clone()),
        Expression::Path(segments) => resolve_path(segments, ctx).cloned(),
        Expression::List(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expression::Unary { op, operand } => {
            let value = evaluate(operand, ctx)?;
            evaluate_unary(*op, value)
        }
        Expression::Logical { op, left, right } => {
            let left = expect_bool(&evaluate(left, ctx)?, *op)?;
            match (op, left) {
                (LogicalOp::And, false) => Ok(Value::Bool(false)),
                (LogicalOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(expect_bool(&evaluate(right, ctx)?, *op)?)),
            }
        }
        Expression::Binary { op, left, right } => {
            let left = evaluate(left, ctx)?;
            let right = evaluate(right, ctx)?;
            evaluate_binary(*op, &left, &right)
        }
        Expression::Call { name, args } => {
            // Fail on the name before spending time on the arguments
            if !functions::is_builtin(name) {
                return Err(ExpressionError::UnknownFunction(name.clone()));
            }
            let args = args
                .iter()
                .map(|a| evaluate(a, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            functions::call(name, &args)
        }
    }
}

/// Parse and evaluate in one go
pub fn evaluate_str(source: &str, ctx: &Context) -> Result<Value, ExpressionError> {
    evaluate(&parse(source)?, ctx)
}

/// Name of a value's type as it appears in error messages
pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Structural equality with numeric comparison for numbers
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

fn resolve_path<'a>(segments: &[String], ctx: &'a Context) -> Result<&'a Value, ExpressionError> {
    let unknown = |upto: usize| ExpressionError::UnknownIdentifier(segments[..=upto].join("."));

    let mut current = ctx.get(&segments[0]).ok_or_else(|| unknown(0))?;
    for (i, segment) in segments.iter().enumerate().skip(1) {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
            _ => None,
        }
        .ok_or_else(|| unknown(i))?;
    }
    Ok(current)
}

fn expect_bool(v: &Value, op: LogicalOp) -> Result<bool, ExpressionError> {
    v.as_bool().ok_or_else(|| {
        let name = match op {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        };
        ExpressionError::mismatch(format!("'{}' expects booleans, got {}", name, type_name(v)))
    })
}

fn evaluate_unary(op: UnaryOp, value: Value) -> Result<Value, ExpressionError> {
    match (op, &value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Not, other) => Err(ExpressionError::mismatch(format!(
            "'not' expects a boolean, got {}",
            type_name(other)
        ))),
        (UnaryOp::Neg, Value::Number(n)) => match n.as_i64().and_then(i64::checked_neg) {
            Some(i) => Ok(Value::from(i)),
            None => number(-n.as_f64().unwrap_or(f64::NAN)),
        },
        (UnaryOp::Neg, other) => Err(ExpressionError::mismatch(format!(
            "cannot negate {}",
            type_name(other)
        ))),
    }
}

fn evaluate_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right)
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte => {
            let ordering = order(op, left, right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::Gte => ordering != Ordering::Less,
                BinaryOp::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }))
        }
        BinaryOp::Contains => contains(op, left, right),
        BinaryOp::In => contains(op, right, left),
    }
}

fn number(f: f64) -> Result<Value, ExpressionError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::Evaluation("result is not a finite number".to_string()))
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    if op == BinaryOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => {}
        }
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(ExpressionError::mismatch(format!(
            "cannot apply '{}' to {} and {}",
            op,
            type_name(left),
            type_name(right)
        )));
    };

    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b.as_f64() == Some(0.0) {
        return Err(ExpressionError::Evaluation("division by zero".to_string()));
    }

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div if x.checked_rem(y) == Some(0) => x.checked_div(y),
            BinaryOp::Rem => x.checked_rem(y),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::from(v));
        }
    }

    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
    number(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        _ => x % y,
    })
}

fn order(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y)),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(ExpressionError::mismatch(format!(
                "cannot compare {} {} {}",
                type_name(left),
                op,
                type_name(right)
            )))
        }
    };
    ordering.ok_or_else(|| ExpressionError::Evaluation("numbers are not comparable".to_string()))
}

fn contains(op: BinaryOp, haystack: &Value, needle: &Value) -> Result<Value, ExpressionError> {
    match (haystack, needle) {
        (Value::String(s), Value::String(sub)) => Ok(Value::Bool(s.contains(sub.as_str()))),
        (Value::Array(items), v) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, v)))),
        (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
        _ => Err(ExpressionError::mismatch(format!(
            "'{}' does not apply to {} and {}",
            op,
            type_name(haystack),
            type_name(needle)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        Context::from_value(value).unwrap()
    }

    fn eval(src: &str, context: &Context) -> Result<Value, ExpressionError> {
        evaluate_str(src, context)
    }

    #[test]
    fn test_string_equality() {
        let state = ctx(json!({"intent": "search"}));
        assert_eq!(eval("intent == 'search'", &state).unwrap(), json!(true));
        assert_eq!(eval("intent == 'code'", &state).unwrap(), json!(false));
        assert_eq!(eval("intent != 'code'", &state).unwrap(), json!(true));
    }

    #[test]
    fn test_number_comparison() {
        let state = ctx(json!({"score": 7.5}));

        assert_eq!(eval("score > 5", &state).unwrap(), json!(true));
        assert_eq!(eval("score > 10", &state).unwrap(), json!(false));
        assert_eq!(eval("score >= 7.5", &state).unwrap(), json!(true));
        assert_eq!(eval("score < 10", &state).unwrap(), json!(true));
        assert_eq!(eval("score <= 7", &state).unwrap(), json!(false));
    }

    #[test]
    fn test_int_and_float_compare_numerically() {
        let state = ctx(json!({"n": 3}));
        assert_eq!(eval("n == 3.0", &state).unwrap(), json!(true));
    }

    #[test]
    fn test_nested_path() {
        let state = ctx(json!({"result": {"data": {"intent": "search"}}, "lines": [{"sku": "A"}]}));

        assert_eq!(
            eval("result.data.intent == 'search'", &state).unwrap(),
            json!(true)
        );
        assert_eq!(eval("lines.0.sku", &state).unwrap(), json!("A"));
    }

    #[test]
    fn test_unknown_identifier() {
        let state = ctx(json!({"invoice": {"total": 1}}));

        assert_eq!(
            eval("missing == null", &state),
            Err(ExpressionError::UnknownIdentifier("missing".to_string()))
        );
        assert_eq!(
            eval("invoice.vendor.name", &state),
            Err(ExpressionError::UnknownIdentifier(
                "invoice.vendor".to_string()
            ))
        );
    }

    #[test]
    fn test_explicit_null_is_resolvable() {
        let state = ctx(json!({"result": null}));
        assert_eq!(eval("result == null", &state).unwrap(), json!(true));
    }

    #[test]
    fn test_arithmetic() {
        let state = ctx(json!({"net": 100, "rate": 0.2}));

        assert_eq!(eval("net + net * 2", &state).unwrap(), json!(300));
        assert_eq!(eval("net * rate", &state).unwrap(), json!(20.0));
        assert_eq!(eval("net / 4", &state).unwrap(), json!(25));
        assert_eq!(eval("net / 8", &state).unwrap(), json!(12.5));
        assert_eq!(eval("net % 7", &state).unwrap(), json!(2));
        assert_eq!(eval("-net", &state).unwrap(), json!(-100));
    }

    #[test]
    fn test_division_by_zero() {
        let state = ctx(json!({"n": 1}));
        assert_eq!(
            eval("n / 0", &state),
            Err(ExpressionError::Evaluation("division by zero".to_string()))
        );
        assert!(matches!(
            eval("n % 0.0", &state),
            Err(ExpressionError::Evaluation(_))
        ));
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let state = ctx(json!({"n": i64::MIN}));
        let expected = -(i64::MIN as f64);
        assert_eq!(
            eval("n / -1", &state).unwrap().as_f64(),
            Some(expected)
        );
        assert_eq!(
            eval("(0 - 9223372036854775807 - 1) / -1", &state).unwrap().as_f64(),
            Some(expected)
        );
        assert!(eval("n % -1", &state).is_ok());
    }

    #[test]
    fn test_string_plus_number_is_a_type_mismatch() {
        let state = ctx(json!({"id": 7}));
        assert!(matches!(
            eval("'INV-' + id", &state),
            Err(ExpressionError::TypeMismatch(_))
        ));
        assert_eq!(eval("'a' + 'b'", &state).unwrap(), json!("ab"));
        assert_eq!(eval("[1] + [2]", &state).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_ordering_string_against_number_fails() {
        let state = ctx(json!({"code": "A1"}));
        assert!(matches!(
            eval("code > 5", &state),
            Err(ExpressionError::TypeMismatch(_))
        ));
        // equality across types is simply false
        assert_eq!(eval("code == 5", &state).unwrap(), json!(false));
    }

    #[test]
    fn test_short_circuit_skips_failing_right_side() {
        let state = ctx(json!({"flag": false}));
        assert_eq!(eval("flag and missing > 1", &state).unwrap(), json!(false));
        assert_eq!(eval("not flag or 1 / 0 > 1", &state).unwrap(), json!(true));
        assert!(eval("flag or missing > 1", &state).is_err());
    }

    #[test]
    fn test_boolean_operators_require_booleans() {
        let state = ctx(json!({"n": 1}));
        assert!(matches!(
            eval("n and true", &state),
            Err(ExpressionError::TypeMismatch(_))
        ));
        assert!(matches!(
            eval("not n", &state),
            Err(ExpressionError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_contains_and_in() {
        let state = ctx(json!({
            "message": "hello world",
            "tags": ["bug", "urgent"],
            "doc": {"po": 1}
        }));

        assert_eq!(eval("message contains 'world'", &state).unwrap(), json!(true));
        assert_eq!(eval("tags contains 'bug'", &state).unwrap(), json!(true));
        assert_eq!(eval("'frontend' in tags", &state).unwrap(), json!(false));
        assert_eq!(eval("'po' in doc", &state).unwrap(), json!(true));
        assert_eq!(
            eval("lower('URGENT') in ['low', 'urgent']", &state).unwrap(),
            json!(true)
        );
        assert!(eval("1 in 2", &state).is_err());
    }

    #[test]
    fn test_unknown_function_fails() {
        let state = Context::new();
        assert_eq!(
            eval("now()", &state),
            Err(ExpressionError::UnknownFunction("now".to_string()))
        );
    }

    #[test]
    fn test_function_calls() {
        let state = ctx(json!({"name": "  Alice ", "approvers": ["a", "b"]}));
        assert_eq!(eval("trim(name) == 'Alice'", &state).unwrap(), json!(true));
        assert_eq!(eval("len(approvers) >= 2", &state).unwrap(), json!(true));
    }

    #[test]
    fn test_evaluation_does_not_mutate_context() {
        let state = ctx(json!({"a": [1, 2]}));
        let before = state.clone();
        let _ = eval("a + [3]", &state).unwrap();
        assert_eq!(state, before);
    }
}
