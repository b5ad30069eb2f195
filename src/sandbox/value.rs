// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Runtime values and their conversions.
//!
//! Values are single-threaded (`Rc`) and never outlive the execution that
//! created them.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::ast::FunctionDecl;
use super::builtins::Builtin;

/// Index of a scope in the interpreter's scope arena.
pub type ScopeId = usize;

/// Nesting limit for JSON conversion; deeper structures are treated as cyclic.
pub const MAX_JSON_DEPTH: usize = 128;

/// Insertion-ordered property map.
#[derive(Debug, Default)]
pub struct ObjectMap {
    entries: Vec<(Rc<str>, Value)>,
    frozen: bool,
}

impl ObjectMap {
    pub fn frozen(entries: Vec<(Rc<str>, Value)>) -> Self {
        Self {
            entries,
            frozen: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    /// Set a property. Returns `false` if the object is frozen.
    pub fn set(&mut self, key: &str, value: Value) -> bool {
        if self.frozen {
            return false;
        }
        match self.entries.iter_mut().find(|(k, _)| &**k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((Rc::from(key), value)),
        }
        true
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn entries(&self) -> &[(Rc<str>, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A script function closed over its defining scope.
#[derive(Debug)]
pub struct Closure {
    pub decl: Arc<FunctionDecl>,
    pub scope: ScopeId,
}

/// A host-provided function, optionally bound to a receiver (`arr.push`).
#[derive(Debug)]
pub struct NativeFn {
    pub builtin: Builtin,
    pub receiver: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectMap>>),
    Function(Rc<Closure>),
    Native(Rc<NativeFn>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(map: ObjectMap) -> Self {
        Value::Object(Rc::new(RefCell::new(map)))
    }

    pub fn native(builtin: Builtin) -> Self {
        Value::Native(Rc::new(NativeFn {
            builtin,
            receiver: None,
        }))
    }

    pub fn bound(builtin: Builtin, receiver: Value) -> Self {
        Value::Native(Rc::new(NativeFn {
            builtin,
            receiver: Some(receiver),
        }))
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Array(items) => {
                let items = items.borrow();
                match items.as_slice() {
                    [] => 0.0,
                    [single] => single.to_number(),
                    _ => f64::NAN,
                }
            }
            _ => f64::NAN,
        }
    }

    /// `ToString` for concatenation and property keys.
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_js_string()
                    }
                })
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(_) | Value::Native(_) => "function".to_string(),
        }
    }

    /// Human-readable rendering used by `log` and `console.*`.
    pub fn display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Array(_) | Value::Object(_) => match self.to_json() {
                Ok(json) => json.to_string(),
                Err(_) => self.to_js_string(),
            },
            other => other.to_js_string(),
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Number(_), Value::Str(_))
            | (Value::Str(_), Value::Number(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => {
                if matches!(self, Value::Array(_) | Value::Object(_))
                    || matches!(other, Value::Array(_) | Value::Object(_))
                {
                    return self.to_js_string() == other.to_js_string();
                }
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                let mut object = ObjectMap::default();
                for (k, v) in map {
                    object.set(k, Value::from_json(v));
                }
                Value::object(object)
            }
        }
    }

    /// Convert to JSON. Top-level `undefined` and functions become `null`,
    /// non-finite numbers become `null`, and `undefined` properties are
    /// omitted, all as `JSON.stringify` does.
    pub fn to_json(&self) -> Result<serde_json::Value, String> {
        Ok(self.to_json_at(0)?.unwrap_or(serde_json::Value::Null))
    }

    fn to_json_at(&self, depth: usize) -> Result<Option<serde_json::Value>, String> {
        if depth > MAX_JSON_DEPTH {
            return Err("structure is cyclic or too deeply nested".to_string());
        }
        let json = match self {
            Value::Undefined | Value::Function(_) | Value::Native(_) => return Ok(None),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .borrow()
                    .iter()
                    .map(|v| Ok(v.to_json_at(depth + 1)?.unwrap_or(serde_json::Value::Null)))
                    .collect::<Result<_, String>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map.borrow().entries() {
                    if let Some(json) = v.to_json_at(depth + 1)? {
                        out.insert(k.to_string(), json);
                    }
                }
                serde_json::Value::Object(out)
            }
        };
        Ok(Some(json))
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    // Integral values serialize without a trailing `.0`.
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Render a number the way script code expects (`42`, not `42.0`).
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{n}")
    }
}

/// `ToNumber` for strings: whitespace-trimmed, empty is zero.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|v| v as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust accepts spellings like "inf" and "nan" that scripts should not.
        t if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        t => t.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// `ToInt32` for bitwise operators.
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4_294_967_296.0);
    wrapped as u32 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_render_like_scripts_expect() {
        assert_eq!(number_to_string(42.0), "42");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn string_coercion() {
        assert_eq!(string_to_number(" 12 "), 12.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("abc").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert_eq!(string_to_number("1e3"), 1000.0);
    }

    #[test]
    fn equality_rules() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::Number(1.0).loose_equals(&Value::str("1")));
        assert!(Value::Bool(true).loose_equals(&Value::Number(1.0)));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
        let a = Value::array(vec![]);
        assert!(a.strict_equals(&a.clone()));
        assert!(!a.strict_equals(&Value::array(vec![])));
    }

    #[test]
    fn json_conversion_follows_stringify_rules() {
        let mut map = ObjectMap::default();
        map.set("b", Value::Number(2.0));
        map.set("a", Value::Undefined);
        map.set("c", Value::array(vec![Value::Undefined, Value::Number(1.5)]));
        let json = Value::object(map).to_json().unwrap();
        assert_eq!(json.to_string(), r#"{"b":2,"c":[null,1.5]}"#);
        assert_eq!(Value::Undefined.to_json().unwrap(), serde_json::Value::Null);
        assert_eq!(
            Value::Number(f64::INFINITY).to_json().unwrap(),
            serde_json::Value::Null
        );
    }

    #[test]
    fn cyclic_structures_fail_to_serialize() {
        let array = Rc::new(RefCell::new(Vec::new()));
        let value = Value::Array(array.clone());
        array.borrow_mut().push(value.clone());
        assert!(value.to_json().is_err());
        // Break the cycle so the test does not leak.
        array.borrow_mut().clear();
    }

    #[test]
    fn frozen_objects_reject_writes() {
        let mut map = ObjectMap::frozen(vec![(Rc::from("k"), Value::Number(1.0))]);
        assert!(!map.set("k", Value::Number(2.0)));
        assert_eq!(map.get("k").map(Value::to_number), Some(1.0));
    }

    #[test]
    fn int32_wraps() {
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(f64::NAN), 0);
    }
}
