//! Methods on built-in value types.
//!
//! `items.join(', ')` or `name.toUpperCase()` have no function stored on the
//! receiver, so member calls that find nothing fall back to this table.

use std::cmp::Ordering;

use trellis_core::{ArrayRef, MapRef, SetRef, Value, format_number};

use crate::error::Result;

/// Call the built-in method `name` on `target`.
///
/// Returns `None` when the receiver type has no such method.
pub fn call_builtin(target: &Value, name: &str, args: &[Value]) -> Option<Result<Value>> {
    let value = match target {
        Value::String(s) => string_method(s, name, args)?,
        Value::Array(array) => array_method(array, name, args)?,
        Value::Map(map) => map_method(map, name, args)?,
        Value::Set(set) => set_method(set, name, args)?,
        Value::Number(n) => number_method(*n, name, args)?,
        _ => return None,
    };
    Some(Ok(value))
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Resolve a relative index the way `slice` does: negative counts from the
/// end, the result is clamped to `0..=len`.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    let n = if n.is_nan() { 0.0 } else { n.trunc() };
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Option<Value> {
    let text = |i| arg(args, i).to_display_string();
    let units: Vec<u16> = s.encode_utf16().collect();
    let value = match name {
        "toUpperCase" => Value::from(s.to_uppercase()),
        "toLowerCase" => Value::from(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "includes" => Value::Bool(s.contains(text(0).as_str())),
        "startsWith" => Value::Bool(s.starts_with(text(0).as_str())),
        "endsWith" => Value::Bool(s.ends_with(text(0).as_str())),
        "indexOf" => {
            let needle: Vec<u16> = text(0).encode_utf16().collect();
            let found = if needle.is_empty() {
                Some(0)
            } else {
                units.windows(needle.len()).position(|w| w == needle.as_slice())
            };
            Value::Number(found.map_or(-1.0, |i| i as f64))
        }
        "slice" => {
            let start = relative_index(&arg(args, 0), units.len(), 0);
            let end = relative_index(&arg(args, 1), units.len(), units.len());
            let slice = if start < end { &units[start..end] } else { &[][..] };
            Value::from(String::from_utf16_lossy(slice))
        }
        "charAt" => {
            let index = arg(args, 0).to_number();
            let index = if index.is_nan() { 0.0 } else { index.trunc() };
            let unit = (index >= 0.0).then(|| units.get(index as usize)).flatten();
            Value::from(unit.map_or(String::new(), |u| String::from_utf16_lossy(&[*u])))
        }
        "split" => {
            let parts: ArrayRef = match arg(args, 0) {
                Value::Undefined => [Value::from(s)].into_iter().collect(),
                separator => {
                    let separator = separator.to_display_string();
                    if separator.is_empty() {
                        s.chars().map(|c| Value::from(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::from).collect()
                    }
                }
            };
            Value::Array(parts)
        }
        _ => return None,
    };
    Some(value)
}

fn array_method(array: &ArrayRef, name: &str, args: &[Value]) -> Option<Value> {
    let value = match name {
        "join" => {
            let separator = match arg(args, 0) {
                Value::Undefined => ",".to_string(),
                v => v.to_display_string(),
            };
            Value::from(array.join(&separator))
        }
        "indexOf" => Value::Number(array.index_of(&arg(args, 0)).map_or(-1.0, |i| i as f64)),
        "includes" => Value::Bool(array.includes(&arg(args, 0))),
        "slice" => {
            let items = array.to_vec();
            let start = relative_index(&arg(args, 0), items.len(), 0);
            let end = relative_index(&arg(args, 1), items.len(), items.len());
            let slice = if start < end { items[start..end].to_vec() } else { Vec::new() };
            Value::Array(ArrayRef::from(slice))
        }
        "concat" => {
            let mut items = array.to_vec();
            for value in args {
                match value {
                    Value::Array(other) => items.extend(other.to_vec()),
                    other => items.push(other.clone()),
                }
            }
            Value::Array(ArrayRef::from(items))
        }
        "push" => Value::from(array.push(args.iter().cloned())),
        "unshift" => Value::from(array.unshift(args.iter().cloned())),
        "pop" => array.pop(),
        "shift" => array.shift(),
        "reverse" => {
            array.reverse();
            Value::Array(array.clone())
        }
        "sort" => {
            match arg(args, 0) {
                Value::Function(compare) => array.sort_by(|a, b| {
                    let result = compare
                        .call(&Value::Undefined, &[a.clone(), b.clone()])
                        .map_or(0.0, |v| v.to_number());
                    result.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
                }),
                _ => array.sort(),
            }
            Value::Array(array.clone())
        }
        "splice" => {
            let len = array.len();
            let start = relative_index(&arg(args, 0), len, 0);
            let delete_count = match args.get(1) {
                None => len - start,
                Some(count) => {
                    let count = count.to_number();
                    if count.is_nan() || count < 0.0 { 0 } else { (count as usize).min(len - start) }
                }
            };
            let inserted = args.iter().skip(2).cloned().collect();
            Value::Array(ArrayRef::from(array.splice(start, delete_count, inserted)))
        }
        _ => return None,
    };
    Some(value)
}

fn map_method(map: &MapRef, name: &str, args: &[Value]) -> Option<Value> {
    let pair = |(k, v): (Value, Value)| Value::Array(ArrayRef::from(vec![k, v]));
    let value = match name {
        "get" => map.get(&arg(args, 0)),
        "has" => Value::Bool(map.has(&arg(args, 0))),
        "set" => {
            map.set(arg(args, 0), arg(args, 1));
            Value::Map(map.clone())
        }
        "delete" => Value::Bool(map.delete(&arg(args, 0))),
        "clear" => {
            map.clear();
            Value::Undefined
        }
        "keys" => Value::Array(ArrayRef::from(map.keys())),
        "values" => Value::Array(ArrayRef::from(map.values())),
        "entries" => Value::Array(map.entries().into_iter().map(pair).collect()),
        _ => return None,
    };
    Some(value)
}

fn set_method(set: &SetRef, name: &str, args: &[Value]) -> Option<Value> {
    let value = match name {
        "has" => Value::Bool(set.has(&arg(args, 0))),
        "add" => {
            set.add(arg(args, 0));
            Value::Set(set.clone())
        }
        "delete" => Value::Bool(set.delete(&arg(args, 0))),
        "clear" => {
            set.clear();
            Value::Undefined
        }
        "values" => Value::Array(ArrayRef::from(set.values())),
        _ => return None,
    };
    Some(value)
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Option<Value> {
    let value = match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            if n.is_finite() {
                Value::from(format!("{n:.digits$}"))
            } else {
                Value::from(format_number(n))
            }
        }
        "toString" => Value::from(format_number(n)),
        _ => return None,
    };
    Some(value)
}
