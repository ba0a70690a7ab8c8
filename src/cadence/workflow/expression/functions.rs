// SPDX-License-Identifier: MIT

//! Fixed registry of built-in functions callable from expressions
//!
//! Every function is pure. Arguments are evaluated before the call, so
//! `coalesce(a.b, 1)` still fails when `a.b` cannot be resolved; use
//! `get(a, 'b', 1)` for optional fields.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde_json::{Number, Value};
use std::collections::HashMap;

use super::evaluator::{type_name, values_equal};
use crate::kit::error::ExpressionError;

type BuiltinFn = fn(&str, &[Value]) -> Result<Value, ExpressionError>;

#[derive(Debug, Clone, Copy)]
enum Arity {
    Exact(usize),
    Between(usize, usize),
    AtLeast(usize),
}

impl Arity {
    fn check(&self, name: &str, got: usize) -> Result<(), ExpressionError> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&got),
            Arity::AtLeast(n) => got >= n,
        };
        if ok {
            return Ok(());
        }
        let expected = match *self {
            Arity::Exact(n) => format!("{}", n),
            Arity::Between(lo, hi) => format!("{} to {}", lo, hi),
            Arity::AtLeast(n) => format!("at least {}", n),
        };
        Err(ExpressionError::invalid_args(
            name,
            format!("expected {} argument(s), got {}", expected, got),
        ))
    }
}

struct Builtin {
    arity: Arity,
    func: BuiltinFn,
}

static BUILTINS: Lazy<HashMap<&'static str, Builtin>> = Lazy::new(|| {
    let entries: [(&'static str, Arity, BuiltinFn); 24] = [
        // strings
        ("len", Arity::Exact(1), len),
        ("lower", Arity::Exact(1), lower),
        ("upper", Arity::Exact(1), upper),
        ("trim", Arity::Exact(1), trim),
        ("starts_with", Arity::Exact(2), starts_with),
        ("ends_with", Arity::Exact(2), ends_with),
        ("concat", Arity::AtLeast(1), concat),
        ("str", Arity::Exact(1), to_str),
        // math
        ("abs", Arity::Exact(1), abs),
        ("min", Arity::AtLeast(1), min),
        ("max", Arity::AtLeast(1), max),
        ("round", Arity::Between(1, 2), round),
        ("floor", Arity::Exact(1), floor),
        ("ceil", Arity::Exact(1), ceil),
        ("number", Arity::Exact(1), number),
        // dates
        ("days_between", Arity::Exact(2), days_between),
        ("add_days", Arity::Exact(2), add_days),
        ("year", Arity::Exact(1), year),
        ("month", Arity::Exact(1), month),
        ("day", Arity::Exact(1), day),
        // collections
        ("has", Arity::Exact(2), has),
        ("get", Arity::Between(2, 3), get),
        ("coalesce", Arity::AtLeast(1), coalesce),
        ("is_null", Arity::Exact(1), is_null),
    ];
    entries
        .into_iter()
        .map(|(name, arity, func)| (name, Builtin { arity, func }))
        .collect()
});

/// Whether `name` is a registered built-in
pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains_key(name)
}

/// Sorted names of all built-ins
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BUILTINS.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Invoke a built-in with already-evaluated arguments
pub fn call(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let builtin = BUILTINS
        .get(name)
        .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
    builtin.arity.check(name, args.len())?;
    (builtin.func)(name, args)
}

fn string_arg<'a>(name: &str, v: &'a Value) -> Result<&'a str, ExpressionError> {
    v.as_str().ok_or_else(|| {
        ExpressionError::invalid_args(name, format!("expected string, got {}", type_name(v)))
    })
}

fn number_arg(name: &str, v: &Value) -> Result<f64, ExpressionError> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            ExpressionError::invalid_args(name, "number is out of range".to_string())
        }),
        other => Err(ExpressionError::invalid_args(
            name,
            format!("expected number, got {}", type_name(other)),
        )),
    }
}

fn integer_arg(name: &str, v: &Value) -> Result<i64, ExpressionError> {
    v.as_i64().ok_or_else(|| {
        ExpressionError::invalid_args(name, format!("expected integer, got {}", v))
    })
}

fn float_value(name: &str, f: f64) -> Result<Value, ExpressionError> {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Ok(Value::from(f as i64));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::invalid_args(name, "result is not a finite number"))
}

/// Display form used by `str` and `concat`
fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn len(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match &args[0] {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(a) => Ok(Value::from(a.len())),
        Value::Object(o) => Ok(Value::from(o.len())),
        other => Err(ExpressionError::invalid_args(
            name,
            format!("expected string, list or map, got {}", type_name(other)),
        )),
    }
}

fn lower(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::String(string_arg(name, &args[0])?.to_lowercase()))
}

fn upper(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::String(string_arg(name, &args[0])?.to_uppercase()))
}

fn trim(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::String(string_arg(name, &args[0])?.trim().to_string()))
}

fn starts_with(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let s = string_arg(name, &args[0])?;
    Ok(Value::Bool(s.starts_with(string_arg(name, &args[1])?)))
}

fn ends_with(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let s = string_arg(name, &args[0])?;
    Ok(Value::Bool(s.ends_with(string_arg(name, &args[1])?)))
}

fn concat(_name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::String(args.iter().map(text).collect()))
}

fn to_str(_name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::String(text(&args[0])))
}

fn abs(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    if let Some(n) = args[0].as_i64() {
        if let Some(a) = n.checked_abs() {
            return Ok(Value::from(a));
        }
    }
    float_value(name, number_arg(name, &args[0])?.abs())
}

/// Numbers passed either as arguments or as a single list argument
fn numbers(name: &str, args: &[Value]) -> Result<Vec<Value>, ExpressionError> {
    let items: Vec<Value> = match args {
        [Value::Array(items)] => items.clone(),
        _ => args.to_vec(),
    };
    if items.is_empty() {
        return Err(ExpressionError::invalid_args(name, "no values given"));
    }
    for item in &items {
        number_arg(name, item)?;
    }
    Ok(items)
}

fn min(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let items = numbers(name, args)?;
    let mut best = items[0].clone();
    for item in &items[1..] {
        if number_arg(name, item)? < number_arg(name, &best)? {
            best = item.clone();
        }
    }
    Ok(best)
}

fn max(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let items = numbers(name, args)?;
    let mut best = items[0].clone();
    for item in &items[1..] {
        if number_arg(name, item)? > number_arg(name, &best)? {
            best = item.clone();
        }
    }
    Ok(best)
}

fn round(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let n = number_arg(name, &args[0])?;
    let digits = match args.get(1) {
        Some(d) => integer_arg(name, d)?,
        None => 0,
    };
    if !(0..=15).contains(&digits) {
        return Err(ExpressionError::invalid_args(name, "digits must be 0..=15"));
    }
    let factor = 10f64.powi(digits as i32);
    float_value(name, (n * factor).round() / factor)
}

fn floor(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    float_value(name, number_arg(name, &args[0])?.floor())
}

fn ceil(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    float_value(name, number_arg(name, &args[0])?.ceil())
}

fn number(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(n.clone())),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| {
                    ExpressionError::invalid_args(name, format!("'{}' is not a number", s))
                })
        }
        other => Err(ExpressionError::invalid_args(
            name,
            format!("cannot convert {} to number", type_name(other)),
        )),
    }
}

/// A calendar date or a full timestamp, remembering which form was given
enum DateArg {
    Day(NaiveDate),
    Instant(DateTime<Utc>),
}

impl DateArg {
    fn parse(name: &str, v: &Value) -> Result<Self, ExpressionError> {
        let s = string_arg(name, v)?;
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(DateArg::Day(d));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| DateArg::Instant(dt.with_timezone(&Utc)))
            .map_err(|_| {
                ExpressionError::invalid_args(
                    name,
                    format!("'{}' is not a YYYY-MM-DD or RFC 3339 date", s),
                )
            })
    }

    fn instant(&self) -> DateTime<Utc> {
        match self {
            DateArg::Day(d) => Utc.from_utc_datetime(&d.and_time(chrono::NaiveTime::MIN)),
            DateArg::Instant(dt) => *dt,
        }
    }

    fn date(&self) -> NaiveDate {
        match self {
            DateArg::Day(d) => *d,
            DateArg::Instant(dt) => dt.date_naive(),
        }
    }
}

fn days_between(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let from = DateArg::parse(name, &args[0])?;
    let to = DateArg::parse(name, &args[1])?;
    Ok(Value::from((to.instant() - from.instant()).num_days()))
}

fn add_days(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let date = DateArg::parse(name, &args[0])?;
    let days = Duration::try_days(integer_arg(name, &args[1])?)
        .ok_or_else(|| ExpressionError::invalid_args(name, "day count out of range"))?;
    let shifted = match date {
        DateArg::Day(d) => d
            .checked_add_signed(days)
            .map(|d| d.format("%Y-%m-%d").to_string()),
        DateArg::Instant(dt) => dt.checked_add_signed(days).map(|dt| dt.to_rfc3339()),
    };
    shifted
        .map(Value::String)
        .ok_or_else(|| ExpressionError::invalid_args(name, "date out of range"))
}

fn year(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::from(DateArg::parse(name, &args[0])?.date().year()))
}

fn month(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::from(DateArg::parse(name, &args[0])?.date().month()))
}

fn day(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::from(DateArg::parse(name, &args[0])?.date().day()))
}

fn has(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match (&args[0], &args[1]) {
        (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
        (Value::Array(items), idx) => Ok(Value::Bool(
            idx.as_u64().is_some_and(|i| (i as usize) < items.len()),
        )),
        (Value::Null, _) => Ok(Value::Bool(false)),
        (container, _) => Err(ExpressionError::invalid_args(
            name,
            format!("expected map or list, got {}", type_name(container)),
        )),
    }
}

fn get(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let fallback = args.get(2).cloned().unwrap_or(Value::Null);
    let found = match (&args[0], &args[1]) {
        (Value::Object(map), Value::String(key)) => map.get(key).cloned(),
        (Value::Array(items), idx) => idx.as_u64().and_then(|i| items.get(i as usize).cloned()),
        (Value::Null, _) => None,
        (container, _) => {
            return Err(ExpressionError::invalid_args(
                name,
                format!("expected map or list, got {}", type_name(container)),
            ))
        }
    };
    Ok(found.unwrap_or(fallback))
}

fn coalesce(_name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(args
        .iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null))
}

fn is_null(_name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    Ok(Value::Bool(values_equal(&args[0], &Value::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_function() {
        assert_eq!(
            call("explode", &[]),
            Err(ExpressionError::UnknownFunction("explode".to_string()))
        );
    }

    #[test]
    fn test_arity_is_checked() {
        let err = call("lower", &[json!("a"), json!("b")]).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidArguments { .. }));
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(call("len", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("upper", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("trim", &[json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(
            call("starts_with", &[json!("INV-001"), json!("INV")]).unwrap(),
            json!(true)
        );
        assert_eq!(
            call("concat", &[json!("INV-"), json!(7), json!(null)]).unwrap(),
            json!("INV-7")
        );
        assert!(call("lower", &[json!(1)]).is_err());
    }

    #[test]
    fn test_math_helpers() {
        assert_eq!(call("abs", &[json!(-4)]).unwrap(), json!(4));
        assert_eq!(call("min", &[json!(3), json!(1.5), json!(2)]).unwrap(), json!(1.5));
        assert_eq!(call("max", &[json!([3, 9, 2])]).unwrap(), json!(9));
        assert_eq!(call("round", &[json!(2.346), json!(2)]).unwrap(), json!(2.35));
        assert_eq!(call("round", &[json!(2.5)]).unwrap(), json!(3));
        assert_eq!(call("floor", &[json!(2.9)]).unwrap(), json!(2));
        assert_eq!(call("ceil", &[json!(2.1)]).unwrap(), json!(3));
        assert_eq!(call("number", &[json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(call("number", &[json!("1.5")]).unwrap(), json!(1.5));
        assert!(call("number", &[json!("abc")]).is_err());
    }

    #[test]
    fn test_date_helpers() {
        assert_eq!(
            call("days_between", &[json!("2024-01-01"), json!("2024-03-01")]).unwrap(),
            json!(60)
        );
        assert_eq!(
            call("add_days", &[json!("2024-02-28"), json!(2)]).unwrap(),
            json!("2024-03-01")
        );
        assert_eq!(
            call("add_days", &[json!("2024-01-01T10:00:00+00:00"), json!(1)]).unwrap(),
            json!("2024-01-02T10:00:00+00:00")
        );
        assert_eq!(call("year", &[json!("2024-07-15")]).unwrap(), json!(2024));
        assert_eq!(call("month", &[json!("2024-07-15")]).unwrap(), json!(7));
        assert_eq!(call("day", &[json!("2024-07-15T23:00:00Z")]).unwrap(), json!(15));
        assert!(call("year", &[json!("yesterday")]).is_err());
    }

    #[test]
    fn test_collection_helpers() {
        let doc = json!({"po": "PO-1", "lines": [1, 2]});
        assert_eq!(call("has", &[doc.clone(), json!("po")]).unwrap(), json!(true));
        assert_eq!(call("has", &[doc.clone(), json!("vendor")]).unwrap(), json!(false));
        assert_eq!(
            call("get", &[doc.clone(), json!("vendor"), json!("n/a")]).unwrap(),
            json!("n/a")
        );
        assert_eq!(call("get", &[doc["lines"].clone(), json!(1)]).unwrap(), json!(2));
        assert_eq!(
            call("coalesce", &[json!(null), json!(null), json!("x")]).unwrap(),
            json!("x")
        );
        assert_eq!(call("is_null", &[json!(null)]).unwrap(), json!(true));
    }

    #[test]
    fn test_builtin_names_are_sorted_and_complete() {
        let names = builtin_names();
        assert_eq!(names.len(), 24);
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(is_builtin("days_between"));
        assert!(!is_builtin("now"));
    }
}
