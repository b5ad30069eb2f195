// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Host-provided globals and methods visible to scripts.
//!
//! Scripts see a fixed set of capabilities: the language built-ins,
//! `console` and `log`, the read-only `context`, `secrets.get` and the
//! `blockchain` queries. Nothing here reaches the filesystem, the network
//! or the process environment except through [`ScriptHost`].

use std::cmp::Ordering;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::crypto;
use crate::error::{EnclaveError, ErrorKind};

use super::interpreter::{Control, Flow, Interpreter, VALUE_SIZE};
use super::limits::Abort;
use super::value::{number_to_string, string_to_number, NativeFn, ObjectMap, Value};
use super::ScriptHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // Globals.
    Log,
    Assert,
    Require,
    StringFn,
    NumberFn,
    BooleanFn,
    ErrorFn,
    ParseInt,
    ParseFloat,
    IsNaN,
    IsFinite,
    // console.*
    ConsoleLog,
    ConsoleInfo,
    ConsoleWarn,
    ConsoleError,
    // Math.*
    MathAbs,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathSign,
    MathMin,
    MathMax,
    MathPow,
    MathSqrt,
    MathRandom,
    // JSON, Object, Array statics.
    JsonStringify,
    JsonParse,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ArrayIsArray,
    // Host capabilities.
    SecretsGet,
    BlockchainCallContract,
    BlockchainGetBalance,
    BlockchainGetStorage,
    // Array methods.
    ArrayPush,
    ArrayPop,
    ArrayShift,
    ArrayMap,
    ArrayFilter,
    ArrayForEach,
    ArrayReduce,
    ArrayFind,
    ArrayFindIndex,
    ArraySome,
    ArrayEvery,
    ArrayJoin,
    ArraySlice,
    ArrayIndexOf,
    ArrayIncludes,
    ArrayConcat,
    ArrayReverse,
    ArraySort,
    // String methods.
    StrToUpperCase,
    StrToLowerCase,
    StrTrim,
    StrSlice,
    StrSubstring,
    StrSplit,
    StrIndexOf,
    StrIncludes,
    StrStartsWith,
    StrEndsWith,
    StrReplace,
    StrReplaceAll,
    StrCharAt,
    StrRepeat,
    StrPadStart,
    StrPadEnd,
    // Number methods.
    NumToFixed,
    NumToString,
}

impl Builtin {
    pub fn array_method(name: &str) -> Option<Builtin> {
        use Builtin::*;
        Some(match name {
            "push" => ArrayPush,
            "pop" => ArrayPop,
            "shift" => ArrayShift,
            "map" => ArrayMap,
            "filter" => ArrayFilter,
            "forEach" => ArrayForEach,
            "reduce" => ArrayReduce,
            "find" => ArrayFind,
            "findIndex" => ArrayFindIndex,
            "some" => ArraySome,
            "every" => ArrayEvery,
            "join" => ArrayJoin,
            "slice" => ArraySlice,
            "indexOf" => ArrayIndexOf,
            "includes" => ArrayIncludes,
            "concat" => ArrayConcat,
            "reverse" => ArrayReverse,
            "sort" => ArraySort,
            _ => return None,
        })
    }

    pub fn string_method(name: &str) -> Option<Builtin> {
        use Builtin::*;
        Some(match name {
            "toUpperCase" => StrToUpperCase,
            "toLowerCase" => StrToLowerCase,
            "trim" => StrTrim,
            "slice" => StrSlice,
            "substring" => StrSubstring,
            "split" => StrSplit,
            "indexOf" => StrIndexOf,
            "includes" => StrIncludes,
            "startsWith" => StrStartsWith,
            "endsWith" => StrEndsWith,
            "replace" => StrReplace,
            "replaceAll" => StrReplaceAll,
            "charAt" => StrCharAt,
            "repeat" => StrRepeat,
            "padStart" => StrPadStart,
            "padEnd" => StrPadEnd,
            _ => return None,
        })
    }

    pub fn number_method(name: &str) -> Option<Builtin> {
        match name {
            "toFixed" => Some(Builtin::NumToFixed),
            "toString" => Some(Builtin::NumToString),
            _ => None,
        }
    }
}

// =============================================================================
// Installation
// =============================================================================

fn namespace(interp: &mut Interpreter<'_>, entries: &[(&str, Value)]) -> Flow<Value> {
    let entries = entries
        .iter()
        .map(|(k, v)| (Rc::from(*k), v.clone()))
        .collect();
    interp.new_object(ObjectMap::frozen(entries))
}

/// Install every global binding, with `context` as the read-only caller
/// context object.
pub fn install_globals(interp: &mut Interpreter<'_>, mut context: ObjectMap) -> Flow<()> {
    use Builtin::*;
    let n = Value::native;

    for (name, builtin) in [
        ("log", Log),
        ("assert", Assert),
        ("require", Require),
        ("String", StringFn),
        ("Number", NumberFn),
        ("Boolean", BooleanFn),
        ("Error", ErrorFn),
        ("parseInt", ParseInt),
        ("parseFloat", ParseFloat),
        ("isNaN", IsNaN),
        ("isFinite", IsFinite),
    ] {
        interp.define_builtin(name, n(builtin))?;
    }
    interp.define_builtin("undefined", Value::Undefined)?;
    interp.define_builtin("NaN", Value::Number(f64::NAN))?;
    interp.define_builtin("Infinity", Value::Number(f64::INFINITY))?;

    let console = namespace(
        interp,
        &[
            ("log", n(ConsoleLog)),
            ("info", n(ConsoleInfo)),
            ("warn", n(ConsoleWarn)),
            ("error", n(ConsoleError)),
        ],
    )?;
    interp.define_builtin("console", console)?;

    let math = namespace(
        interp,
        &[
            ("abs", n(MathAbs)),
            ("floor", n(MathFloor)),
            ("ceil", n(MathCeil)),
            ("round", n(MathRound)),
            ("trunc", n(MathTrunc)),
            ("sign", n(MathSign)),
            ("min", n(MathMin)),
            ("max", n(MathMax)),
            ("pow", n(MathPow)),
            ("sqrt", n(MathSqrt)),
            ("random", n(MathRandom)),
            ("PI", Value::Number(std::f64::consts::PI)),
            ("E", Value::Number(std::f64::consts::E)),
        ],
    )?;
    interp.define_builtin("Math", math)?;

    let json = namespace(
        interp,
        &[("stringify", n(JsonStringify)), ("parse", n(JsonParse))],
    )?;
    interp.define_builtin("JSON", json)?;

    let object = namespace(
        interp,
        &[
            ("keys", n(ObjectKeys)),
            ("values", n(ObjectValues)),
            ("entries", n(ObjectEntries)),
        ],
    )?;
    interp.define_builtin("Object", object)?;

    let array = namespace(interp, &[("isArray", n(ArrayIsArray))])?;
    interp.define_builtin("Array", array)?;

    let secrets = namespace(interp, &[("get", n(SecretsGet))])?;
    interp.define_builtin("secrets", secrets)?;

    let blockchain = namespace(
        interp,
        &[
            ("callContract", n(BlockchainCallContract)),
            ("getBalance", n(BlockchainGetBalance)),
            ("getStorage", n(BlockchainGetStorage)),
        ],
    )?;
    interp.define_builtin("blockchain", blockchain)?;

    context.freeze();
    let context = interp.new_object(context)?;
    interp.define_builtin("context", context)
}

/// Own enumerable keys, as `Object.keys` and `for...in` see them.
pub fn own_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => map.borrow().keys().map(|k| k.to_string()).collect(),
        Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
        Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
        _ => Vec::new(),
    }
}

// =============================================================================
// Dispatch
// =============================================================================

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

fn join_display(args: &[Value]) -> String {
    args.iter().map(Value::display).collect::<Vec<_>>().join(" ")
}

pub fn call(interp: &mut Interpreter<'_>, native: &NativeFn, args: Vec<Value>) -> Flow<Value> {
    use Builtin::*;

    if let Some(receiver) = &native.receiver {
        return match receiver {
            Value::Array(_) => array_method(interp, native.builtin, receiver, args),
            Value::Str(s) => string_method(interp, native.builtin, s.clone(), args),
            Value::Number(n) => number_method(interp, native.builtin, *n, args),
            _ => Err(interp.type_error("method called on an unsupported receiver")),
        };
    }

    let a0 = arg(&args, 0);
    match native.builtin {
        Log | ConsoleLog => {
            interp.push_log(join_display(&args))?;
            Ok(Value::Undefined)
        }
        ConsoleInfo | ConsoleWarn | ConsoleError => {
            let level = match native.builtin {
                ConsoleInfo => "info",
                ConsoleWarn => "warn",
                _ => "error",
            };
            interp.push_log(format!("[{level}] {}", join_display(&args)))?;
            Ok(Value::Undefined)
        }
        Assert => {
            if a0.truthy() {
                return Ok(Value::Undefined);
            }
            let message = match args.get(1) {
                Some(m) => m.to_js_string(),
                None => "assertion failed".to_string(),
            };
            Err(interp.error("AssertionError", message))
        }
        Require => {
            if a0.truthy() {
                return Ok(Value::Undefined);
            }
            let message = match args.get(1) {
                Some(m) => m.to_js_string(),
                None => "condition not met".to_string(),
            };
            Err(Abort::RequirementFailed(message).into())
        }
        StringFn => {
            let text = if args.is_empty() {
                String::new()
            } else {
                a0.to_js_string()
            };
            interp.new_string(&text)
        }
        NumberFn => Ok(Value::Number(if args.is_empty() { 0.0 } else { a0.to_number() })),
        BooleanFn => Ok(Value::Bool(a0.truthy())),
        ErrorFn => {
            let message = if a0.is_nullish() {
                String::new()
            } else {
                a0.to_js_string()
            };
            match interp.error("Error", message) {
                Control::Throw(value) => Ok(value),
                other => Err(other),
            }
        }
        ParseInt => {
            let radix = arg(&args, 1).to_number();
            Ok(Value::Number(parse_int(&a0.to_js_string(), radix)))
        }
        ParseFloat => Ok(Value::Number(parse_float(&a0.to_js_string()))),
        IsNaN => Ok(Value::Bool(a0.to_number().is_nan())),
        IsFinite => Ok(Value::Bool(a0.to_number().is_finite())),

        MathAbs => Ok(Value::Number(a0.to_number().abs())),
        MathFloor => Ok(Value::Number(a0.to_number().floor())),
        MathCeil => Ok(Value::Number(a0.to_number().ceil())),
        MathRound => Ok(Value::Number((a0.to_number() + 0.5).floor())),
        MathTrunc => Ok(Value::Number(a0.to_number().trunc())),
        MathSign => {
            let x = a0.to_number();
            Ok(Value::Number(if x.is_nan() || x == 0.0 { x } else { x.signum() }))
        }
        MathMin | MathMax => {
            let is_max = native.builtin == MathMax;
            let mut acc = if is_max { f64::NEG_INFINITY } else { f64::INFINITY };
            for value in &args {
                let x = value.to_number();
                if x.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                acc = if is_max { acc.max(x) } else { acc.min(x) };
            }
            Ok(Value::Number(acc))
        }
        MathPow => Ok(Value::Number(a0.to_number().powf(arg(&args, 1).to_number()))),
        MathSqrt => Ok(Value::Number(a0.to_number().sqrt())),
        MathRandom => crypto::random_f64().map(Value::Number).map_err(|e| {
            Abort::Host(EnclaveError::new(e.kind(), "random source unavailable")).into()
        }),

        JsonStringify => {
            if matches!(a0, Value::Undefined | Value::Function(_) | Value::Native(_)) {
                return Ok(Value::Undefined);
            }
            let json = match a0.to_json() {
                Ok(json) => json,
                Err(message) => return Err(interp.type_error(message)),
            };
            let pretty = arg(&args, 2).to_number() > 0.0;
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            match text {
                Ok(text) => interp.new_string(&text),
                Err(e) => Err(interp.type_error(e.to_string())),
            }
        }
        JsonParse => {
            let text = a0.to_js_string();
            interp.reserve(text.len() * 2)?;
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(json) => interp.value_from_json(&json),
                Err(_) => Err(interp.error("SyntaxError", "JSON.parse: invalid JSON")),
            }
        }
        ObjectKeys | ObjectValues | ObjectEntries => {
            if a0.is_nullish() {
                return Err(interp.type_error("Cannot convert undefined or null to object"));
            }
            let mut out = Vec::new();
            for key in own_keys(&a0) {
                let value = match native.builtin {
                    ObjectKeys => interp.new_string(&key)?,
                    ObjectValues => interp.get_property(&a0, &Value::str(&key))?,
                    _ => {
                        let k = interp.new_string(&key)?;
                        let v = interp.get_property(&a0, &Value::str(&key))?;
                        interp.new_array(vec![k, v])?
                    }
                };
                out.push(value);
            }
            interp.new_array(out)
        }
        ArrayIsArray => Ok(Value::Bool(matches!(a0, Value::Array(_)))),

        SecretsGet => {
            let Value::Str(secret_id) = a0 else {
                return Err(interp.type_error("secrets.get expects a secret id string"));
            };
            interp.budget.checkpoint()?;
            let secret = interp
                .host
                .secret(&secret_id)
                .map_err(|e| Control::Abort(Abort::Host(e)))?;
            interp.budget.checkpoint()?;
            interp.reveal_secret(secret)
        }
        BlockchainGetBalance => {
            let address = a0.to_js_string();
            let balance = host_call(interp, |host, timeout| host.get_balance(&address, timeout))?;
            interp.new_string(&balance)
        }
        BlockchainGetStorage => {
            let address = a0.to_js_string();
            let slot = arg(&args, 1).to_js_string();
            let value =
                host_call(interp, |host, timeout| host.get_storage(&address, &slot, timeout))?;
            interp.new_string(&value)
        }
        BlockchainCallContract => {
            let address = a0.to_js_string();
            let method = arg(&args, 1).to_js_string();
            let params = match args.get(2) {
                None | Some(Value::Undefined) => serde_json::Value::Array(Vec::new()),
                Some(value) => match value.to_json() {
                    Ok(json) => json,
                    Err(message) => return Err(interp.type_error(message)),
                },
            };
            let result = host_call(interp, |host, timeout| {
                host.call_contract(&address, &method, &params, timeout)
            })?;
            interp.value_from_json(&result)
        }

        _ => Err(interp.type_error("method called without a receiver")),
    }
}

/// Run a blockchain callback under the execution deadline. A callback that
/// overruns its own deadline is reported as unavailable, unless the whole
/// execution has timed out meanwhile.
fn host_call<T>(
    interp: &mut Interpreter<'_>,
    f: impl FnOnce(&dyn ScriptHost, Duration) -> Result<T, EnclaveError>,
) -> Flow<T> {
    interp.budget.checkpoint()?;
    let (timeout, deadline) = interp.budget.host_call_deadline();
    let result = f(interp.host, timeout);
    interp.budget.checkpoint()?;
    if Instant::now() > deadline {
        return Err(Abort::Host(EnclaveError::new(
            ErrorKind::BlockchainUnavailable,
            "blockchain query exceeded its deadline",
        ))
        .into());
    }
    result.map_err(|e| Control::Abort(Abort::Host(e)))
}

// =============================================================================
// Array methods
// =============================================================================

fn array_method(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    receiver: &Value,
    args: Vec<Value>,
) -> Flow<Value> {
    use Builtin::*;
    let Value::Array(items) = receiver else {
        return Err(interp.type_error("not an array"));
    };
    let a0 = arg(&args, 0);

    match builtin {
        ArrayPush => {
            interp.charge(args.len() * VALUE_SIZE)?;
            let mut items = items.borrow_mut();
            items.extend(args);
            Ok(Value::Number(items.len() as f64))
        }
        ArrayPop => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
        ArrayShift => {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                Ok(Value::Undefined)
            } else {
                Ok(items.remove(0))
            }
        }
        ArrayMap | ArrayFilter | ArrayForEach | ArrayFind | ArrayFindIndex | ArraySome
        | ArrayEvery => {
            if !a0.is_callable() {
                return Err(interp.type_error("callback is not a function"));
            }
            let snapshot = items.borrow().clone();
            interp.reserve(snapshot.len() * VALUE_SIZE)?;
            let mut out = Vec::new();
            for (index, item) in snapshot.into_iter().enumerate() {
                let result = interp.call_value(
                    &a0,
                    vec![item.clone(), Value::Number(index as f64), receiver.clone()],
                )?;
                match builtin {
                    ArrayMap => out.push(result),
                    ArrayFilter if result.truthy() => out.push(item),
                    ArrayFind if result.truthy() => return Ok(item),
                    ArrayFindIndex if result.truthy() => return Ok(Value::Number(index as f64)),
                    ArraySome if result.truthy() => return Ok(Value::Bool(true)),
                    ArrayEvery if !result.truthy() => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }
            match builtin {
                ArrayMap | ArrayFilter => interp.new_array(out),
                ArrayFindIndex => Ok(Value::Number(-1.0)),
                ArraySome => Ok(Value::Bool(false)),
                ArrayEvery => Ok(Value::Bool(true)),
                _ => Ok(Value::Undefined),
            }
        }
        ArrayReduce => {
            if !a0.is_callable() {
                return Err(interp.type_error("callback is not a function"));
            }
            let snapshot = items.borrow().clone();
            let mut iter = snapshot.into_iter().enumerate();
            let mut acc = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match iter.next() {
                    Some((_, first)) => first,
                    None => {
                        return Err(
                            interp.type_error("Reduce of empty array with no initial value")
                        )
                    }
                },
            };
            for (index, item) in iter {
                acc = interp.call_value(
                    &a0,
                    vec![acc, item, Value::Number(index as f64), receiver.clone()],
                )?;
            }
            Ok(acc)
        }
        ArrayJoin => {
            let separator = if a0.is_nullish() {
                ",".to_string()
            } else {
                a0.to_js_string()
            };
            let joined = items
                .borrow()
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_js_string() })
                .collect::<Vec<_>>()
                .join(&separator);
            interp.new_string(&joined)
        }
        ArraySlice => {
            let len = items.borrow().len();
            let (start, end) = slice_bounds(len, &a0, &arg(&args, 1));
            let slice = items.borrow().get(start..end).map(<[Value]>::to_vec).unwrap_or_default();
            interp.new_array(slice)
        }
        ArrayIndexOf => Ok(Value::Number(
            items
                .borrow()
                .iter()
                .position(|v| v.strict_equals(&a0))
                .map(|i| i as f64)
                .unwrap_or(-1.0),
        )),
        ArrayIncludes => Ok(Value::Bool(items.borrow().iter().any(|v| {
            v.strict_equals(&a0)
                || matches!((v, &a0), (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan())
        }))),
        ArrayConcat => {
            let mut out = items.borrow().clone();
            for value in args {
                match value {
                    Value::Array(other) => out.extend(other.borrow().iter().cloned()),
                    other => out.push(other),
                }
            }
            interp.new_array(out)
        }
        ArrayReverse => {
            items.borrow_mut().reverse();
            Ok(receiver.clone())
        }
        ArraySort => {
            let comparator = if a0.is_callable() { Some(a0) } else { None };
            let snapshot = items.borrow().clone();
            interp.reserve(snapshot.len() * VALUE_SIZE)?;
            let sorted = merge_sort(interp, snapshot, comparator.as_ref())?;
            *items.borrow_mut() = sorted;
            Ok(receiver.clone())
        }
        _ => Err(interp.type_error("unsupported array method")),
    }
}

fn compare(interp: &mut Interpreter<'_>, a: &Value, b: &Value, cmp: Option<&Value>) -> Flow<Ordering> {
    // `undefined` always sorts last.
    match (a, b) {
        (Value::Undefined, Value::Undefined) => return Ok(Ordering::Equal),
        (Value::Undefined, _) => return Ok(Ordering::Greater),
        (_, Value::Undefined) => return Ok(Ordering::Less),
        _ => {}
    }
    match cmp {
        Some(cmp) => {
            let result = interp.call_value(cmp, vec![a.clone(), b.clone()])?.to_number();
            Ok(result.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
        }
        None => Ok(a.to_js_string().cmp(&b.to_js_string())),
    }
}

/// Stable merge sort with a fallible comparator.
fn merge_sort(interp: &mut Interpreter<'_>, mut items: Vec<Value>, cmp: Option<&Value>) -> Flow<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, cmp)?;
    let right = merge_sort(interp, right, cmp)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(interp, l, r, cmp)? != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        out.extend(next);
    }
    Ok(out)
}

/// Resolve relative `slice` bounds against `len`.
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |value: &Value, default: usize| -> usize {
        if matches!(value, Value::Undefined) {
            return default;
        }
        let n = value.to_number();
        if n.is_nan() {
            return 0;
        }
        let n = n.trunc();
        if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            n.min(len as f64) as usize
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start, end.max(start))
}

// =============================================================================
// String and number methods
// =============================================================================

fn string_method(
    interp: &mut Interpreter<'_>,
    builtin: Builtin,
    s: Rc<str>,
    args: Vec<Value>,
) -> Flow<Value> {
    use Builtin::*;
    let a0 = arg(&args, 0);
    let a1 = arg(&args, 1);
    let chars = || s.chars().collect::<Vec<char>>();

    match builtin {
        StrToUpperCase => interp.new_string(&s.to_uppercase()),
        StrToLowerCase => interp.new_string(&s.to_lowercase()),
        StrTrim => interp.new_string(s.trim()),
        StrSlice => {
            let chars = chars();
            let (start, end) = slice_bounds(chars.len(), &a0, &a1);
            let out: String = chars.get(start..end).unwrap_or_default().iter().collect();
            interp.new_string(&out)
        }
        StrSubstring => {
            let chars = chars();
            let clamp = |v: &Value, default: usize| -> usize {
                if matches!(v, Value::Undefined) {
                    return default;
                }
                let n = v.to_number();
                if n.is_nan() || n < 0.0 {
                    0
                } else {
                    n.min(chars.len() as f64) as usize
                }
            };
            let (a, b) = (clamp(&a0, 0), clamp(&a1, chars.len()));
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            let out: String = chars.get(start..end).unwrap_or_default().iter().collect();
            interp.new_string(&out)
        }
        StrSplit => {
            let parts: Vec<String> = match &a0 {
                Value::Undefined => vec![s.to_string()],
                sep => {
                    let sep = sep.to_js_string();
                    if sep.is_empty() {
                        s.chars().map(String::from).collect()
                    } else {
                        s.split(sep.as_str()).map(String::from).collect()
                    }
                }
            };
            let limit = match a1 {
                Value::Undefined => usize::MAX,
                v => v.to_number().max(0.0) as usize,
            };
            let mut values = Vec::new();
            for part in parts.into_iter().take(limit) {
                values.push(interp.new_string(&part)?);
            }
            interp.new_array(values)
        }
        StrIndexOf => {
            let needle = a0.to_js_string();
            let index = s
                .find(needle.as_str())
                .map(|byte| s[..byte].chars().count() as f64)
                .unwrap_or(-1.0);
            Ok(Value::Number(index))
        }
        StrIncludes => Ok(Value::Bool(s.contains(a0.to_js_string().as_str()))),
        StrStartsWith => Ok(Value::Bool(s.starts_with(a0.to_js_string().as_str()))),
        StrEndsWith => Ok(Value::Bool(s.ends_with(a0.to_js_string().as_str()))),
        StrReplace | StrReplaceAll => {
            let pattern = a0.to_js_string();
            let all = builtin == StrReplaceAll;
            let mut out = String::new();
            let mut rest: &str = &s;
            loop {
                let Some(at) = rest.find(pattern.as_str()) else {
                    break;
                };
                out.push_str(&rest[..at]);
                let replacement = if a1.is_callable() {
                    interp
                        .call_value(&a1, vec![Value::str(&pattern)])?
                        .to_js_string()
                } else {
                    a1.to_js_string()
                };
                out.push_str(&replacement);
                interp.reserve(out.len())?;
                rest = &rest[at + pattern.len()..];
                if !all || pattern.is_empty() {
                    break;
                }
            }
            out.push_str(rest);
            interp.new_string(&out)
        }
        StrCharAt => {
            let index = if matches!(a0, Value::Undefined) { 0.0 } else { a0.to_number() };
            let c = if index >= 0.0 && index.fract() == 0.0 {
                s.chars().nth(index as usize)
            } else {
                None
            };
            interp.new_string(&c.map(String::from).unwrap_or_default())
        }
        StrRepeat => {
            let count = a0.to_number();
            if count < 0.0 || !count.is_finite() {
                return Err(interp.error("RangeError", "Invalid count value"));
            }
            let count = count as usize;
            interp.reserve(s.len().saturating_mul(count))?;
            interp.new_string(&s.repeat(count))
        }
        StrPadStart | StrPadEnd => {
            let target = a0.to_number();
            let fill = match a1 {
                Value::Undefined => " ".to_string(),
                v => v.to_js_string(),
            };
            let len = s.chars().count();
            if target.is_nan() || target <= len as f64 || fill.is_empty() {
                return Ok(Value::Str(s));
            }
            let missing = target as usize - len;
            interp.reserve(missing)?;
            let pad: String = fill.chars().cycle().take(missing).collect();
            let out = if builtin == StrPadStart {
                format!("{pad}{s}")
            } else {
                format!("{s}{pad}")
            };
            interp.new_string(&out)
        }
        _ => Err(interp.type_error("unsupported string method")),
    }
}

fn number_method(interp: &mut Interpreter<'_>, builtin: Builtin, n: f64, args: Vec<Value>) -> Flow<Value> {
    let a0 = arg(&args, 0);
    match builtin {
        Builtin::NumToFixed => {
            let digits = if matches!(a0, Value::Undefined) { 0.0 } else { a0.to_number() };
            if !(0.0..=100.0).contains(&digits) {
                return Err(interp.error("RangeError", "toFixed() digits argument must be between 0 and 100"));
            }
            let text = if n.is_finite() {
                format!("{:.*}", digits as usize, n)
            } else {
                number_to_string(n)
            };
            interp.new_string(&text)
        }
        Builtin::NumToString => {
            let radix = if matches!(a0, Value::Undefined) { 10.0 } else { a0.to_number() };
            let text = match radix as u32 {
                10 => number_to_string(n),
                16 if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                    let v = n as i64;
                    if v < 0 {
                        format!("-{:x}", -v)
                    } else {
                        format!("{v:x}")
                    }
                }
                2 if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                    let v = n as i64;
                    if v < 0 {
                        format!("-{:b}", -v)
                    } else {
                        format!("{v:b}")
                    }
                }
                _ => return Err(interp.error("RangeError", "unsupported radix")),
            };
            interp.new_string(&text)
        }
        _ => Err(interp.type_error("unsupported number method")),
    }
}

// =============================================================================
// Number parsing
// =============================================================================

fn parse_int(text: &str, radix: f64) -> f64 {
    let mut s = text.trim_start();
    let negative = s.starts_with('-');
    if s.starts_with('-') || s.starts_with('+') {
        s = &s[1..];
    }

    let mut radix = if radix.is_nan() || radix == 0.0 { 0 } else { radix as u32 };
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let mut value = 0f64;
    let mut any = false;
    for c in s.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * f64::from(radix) + f64::from(d);
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return f64::NAN;
    }
    if negative {
        -value
    } else {
        value
    }
}

fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    for literal in ["Infinity", "+Infinity"] {
        if s.starts_with(literal) {
            return f64::INFINITY;
        }
    }
    if s.starts_with("-Infinity") {
        return f64::NEG_INFINITY;
    }

    // Longest prefix of the form [+-]digits[.digits][e[+-]digits].
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
        seen_digit = true;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
            seen_digit = true;
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }
    string_to_number(&s[..end])
}
