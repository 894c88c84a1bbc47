//! Engine-level built-ins: the fixed-arity legacy functions, methods on
//! list/string/dict/generator values, indexing and iteration.

use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::value::{Value, format_number};
use crate::stdlib::{check_args, join_values, sort_numeric, split_value};

pub(crate) type Builtin = fn(&[Value]) -> Result<Value, SusaError>;

fn exactly(name: &str, args: &[Value], n: usize) -> Result<(), SusaError> {
    check_args(name, args, n, Some(n))
}

/// The legacy global functions callable without importing anything.
pub(crate) fn lookup(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "sqrt" => |a| {
            exactly("sqrt", a, 1)?;
            Ok(Value::Number(a[0].to_number().sqrt()))
        },
        "pow" => |a| {
            exactly("pow", a, 2)?;
            Ok(Value::Number(a[0].to_number().powf(a[1].to_number())))
        },
        "abs" => |a| {
            exactly("abs", a, 1)?;
            Ok(Value::Number(a[0].to_number().abs()))
        },
        "max" => |a| extreme("max", a, f64::max),
        "min" => |a| extreme("min", a, f64::min),
        "len" => |a| {
            exactly("len", a, 1)?;
            length(&a[0]).map(|n| Value::Number(n as f64))
        },
        "upper" => |a| {
            exactly("upper", a, 1)?;
            Ok(Value::Str(a[0].to_string().to_uppercase()))
        },
        "lower" => |a| {
            exactly("lower", a, 1)?;
            Ok(Value::Str(a[0].to_string().to_lowercase()))
        },
        "str" => |a| {
            exactly("str", a, 1)?;
            Ok(Value::Str(a[0].to_string()))
        },
        "int" => |a| {
            exactly("int", a, 1)?;
            Ok(Value::Number(a[0].to_number().trunc()))
        },
        "float" => |a| {
            exactly("float", a, 1)?;
            Ok(Value::Number(a[0].to_number()))
        },
        "bool" => |a| {
            exactly("bool", a, 1)?;
            Ok(Value::Bool(a[0].is_truthy()))
        },
        "type" => |a| {
            exactly("type", a, 1)?;
            Ok(Value::str(a[0].type_name()))
        },
        "range" => |a| range("range", a),
        "numbers" => |a| range("numbers", a),
        "sequence" => |a| range("sequence", a),
        _ => return None,
    };
    Some(f)
}

fn extreme(name: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> Result<Value, SusaError> {
    check_args(name, args, 1, None)?;
    let numbers: Vec<f64> = match args {
        [Value::List(items)] => items.borrow().iter().map(Value::to_number).collect(),
        _ => args.iter().map(Value::to_number).collect(),
    };
    Ok(numbers.into_iter().reduce(pick).map_or(Value::Null, Value::Number))
}

fn range(name: &str, args: &[Value]) -> Result<Value, SusaError> {
    check_args(name, args, 1, Some(3))?;
    let num = |i: usize| args.get(i).map_or(0.0, Value::to_number);
    let (start, stop, step) = match args.len() {
        1 => (0.0, num(0), 1.0),
        2 => (num(0), num(1), 1.0),
        _ => (num(0), num(1), num(2)),
    };
    if step == 0.0 {
        return Err(SusaError::value(format!("{name}() step must not be zero")));
    }
    let mut items = Vec::new();
    let mut n = start;
    while (step > 0.0 && n < stop) || (step < 0.0 && n > stop) {
        items.push(Value::Number(n));
        n += step;
    }
    Ok(Value::list(items))
}

fn length(value: &Value) -> Result<usize, SusaError> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Dict(entries) => Ok(entries.borrow().len()),
        Value::Generator(g) => Ok(g.borrow().values.len()),
        other => Err(SusaError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

/// Equality used by membership methods: same kind and same rendering.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) if Rc::ptr_eq(x, y) => true,
        (Value::Dict(x), Value::Dict(y)) if Rc::ptr_eq(x, y) => true,
        _ => a.type_name() == b.type_name() && a.to_string() == b.to_string(),
    }
}

fn no_method(receiver: &Value, method: &str) -> SusaError {
    SusaError::attribute(format!(
        "'{}' object has no method '{method}'",
        receiver.type_name()
    ))
}

/// Call a built-in method on a non-instance value. Method names are matched
/// case-insensitively.
pub(crate) fn call_method(receiver: &Value, method: &str, args: &[Value]) -> Result<Value, SusaError> {
    let name = method.to_ascii_lowercase();
    match receiver {
        Value::List(_) => list_method(receiver, &name, method, args),
        Value::Str(s) => string_method(s, &name, method, args),
        Value::Dict(_) => dict_method(receiver, &name, method, args),
        Value::Generator(r#gen) => match name.as_str() {
            "next" => {
                exactly(method, args, 0)?;
                Ok(r#gen.borrow_mut().next_value().unwrap_or(Value::Null))
            }
            "reset" => {
                exactly(method, args, 0)?;
                r#gen.borrow_mut().cursor = 0;
                Ok(Value::Null)
            }
            _ => Err(no_method(receiver, method)),
        },
        _ => Err(no_method(receiver, method)),
    }
}

fn list_method(receiver: &Value, name: &str, method: &str, args: &[Value]) -> Result<Value, SusaError> {
    let Value::List(items) = receiver else {
        return Err(no_method(receiver, method));
    };
    match name {
        "push" | "append" => {
            exactly(method, args, 1)?;
            items.borrow_mut().push(args[0].clone());
            Ok(Value::Null)
        }
        "pop" => {
            check_args(method, args, 0, Some(1))?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(SusaError::runtime("Cannot pop from empty list"));
            }
            match args.first() {
                None => Ok(items.pop().unwrap_or(Value::Null)),
                Some(index) => {
                    let i = list_position(index, items.len())?;
                    Ok(items.remove(i))
                }
            }
        }
        "insert" => {
            exactly(method, args, 2)?;
            let mut items = items.borrow_mut();
            let i = args[0].to_number();
            if i < 0.0 || i > items.len() as f64 {
                return Err(out_of_range(&args[0], items.len()));
            }
            items.insert(i as usize, args[1].clone());
            Ok(Value::Null)
        }
        "remove" => {
            exactly(method, args, 1)?;
            // Comparing may render the list itself, so search before mutating.
            let pos = items.borrow().iter().position(|v| same_value(v, &args[0]));
            let pos = pos.ok_or_else(|| SusaError::value("Value not found in list"))?;
            items.borrow_mut().remove(pos);
            Ok(Value::Null)
        }
        "clear" => {
            exactly(method, args, 0)?;
            items.borrow_mut().clear();
            Ok(Value::Null)
        }
        "reverse" => {
            exactly(method, args, 0)?;
            items.borrow_mut().reverse();
            Ok(Value::Null)
        }
        "sort" => {
            exactly(method, args, 0)?;
            let mut items = items.borrow_mut();
            if items.iter().all(|v| matches!(v, Value::Str(_))) {
                items.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
            } else {
                sort_numeric(&mut items);
            }
            Ok(Value::Null)
        }
        "indexof" => {
            exactly(method, args, 1)?;
            let pos = items.borrow().iter().position(|v| same_value(v, &args[0]));
            Ok(Value::Number(pos.map_or(-1.0, |p| p as f64)))
        }
        "contains" => {
            exactly(method, args, 1)?;
            let found = items.borrow().iter().any(|v| same_value(v, &args[0]));
            Ok(Value::Bool(found))
        }
        "join" => {
            check_args(method, args, 0, Some(1))?;
            let sep = args.first().map(Value::to_string).unwrap_or_default();
            Ok(Value::Str(join_values(&items.borrow(), &sep)))
        }
        "length" => {
            exactly(method, args, 0)?;
            Ok(Value::Number(items.borrow().len() as f64))
        }
        _ => Err(no_method(receiver, method)),
    }
}

fn string_method(s: &str, name: &str, method: &str, args: &[Value]) -> Result<Value, SusaError> {
    let arg = |i: usize| args.get(i).map(Value::to_string).unwrap_or_default();
    match name {
        "split" => {
            check_args(method, args, 0, Some(1))?;
            if args.is_empty() {
                return Ok(Value::list(s.split_whitespace().map(Value::str).collect()));
            }
            Ok(split_value(s, &arg(0)))
        }
        "replace" => {
            exactly(method, args, 2)?;
            let from = arg(0);
            if from.is_empty() {
                return Ok(Value::str(s));
            }
            Ok(Value::Str(s.replace(&from, &arg(1))))
        }
        "trim" => {
            exactly(method, args, 0)?;
            Ok(Value::str(s.trim()))
        }
        "startswith" => {
            exactly(method, args, 1)?;
            Ok(Value::Bool(s.starts_with(&arg(0))))
        }
        "endswith" => {
            exactly(method, args, 1)?;
            Ok(Value::Bool(s.ends_with(&arg(0))))
        }
        "indexof" => {
            exactly(method, args, 1)?;
            let pos = s.find(&arg(0)).map(|byte| s[..byte].chars().count());
            Ok(Value::Number(pos.map_or(-1.0, |p| p as f64)))
        }
        "upper" => {
            exactly(method, args, 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "lower" => {
            exactly(method, args, 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "contains" => {
            exactly(method, args, 1)?;
            Ok(Value::Bool(s.contains(&arg(0))))
        }
        "length" => {
            exactly(method, args, 0)?;
            Ok(Value::Number(s.chars().count() as f64))
        }
        _ => Err(no_method(&Value::str(s), method)),
    }
}

fn dict_method(receiver: &Value, name: &str, method: &str, args: &[Value]) -> Result<Value, SusaError> {
    let Value::Dict(entries) = receiver else {
        return Err(no_method(receiver, method));
    };
    match name {
        "keys" => {
            exactly(method, args, 0)?;
            Ok(Value::list(entries.borrow().keys().map(Value::str).collect()))
        }
        "values" => {
            exactly(method, args, 0)?;
            Ok(Value::list(entries.borrow().values().cloned().collect()))
        }
        "has_key" | "haskey" => {
            exactly(method, args, 1)?;
            Ok(Value::Bool(entries.borrow().contains_key(&args[0].to_string())))
        }
        "get" => {
            check_args(method, args, 1, Some(2))?;
            let found = entries.borrow().get(&args[0].to_string()).cloned();
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::Null))
        }
        "remove" => {
            exactly(method, args, 1)?;
            let key = args[0].to_string();
            entries
                .borrow_mut()
                .remove(&key)
                .ok_or_else(|| SusaError::missing_key(&key))
        }
        "clear" => {
            exactly(method, args, 0)?;
            entries.borrow_mut().clear();
            Ok(Value::Null)
        }
        "length" => {
            exactly(method, args, 0)?;
            Ok(Value::Number(entries.borrow().len() as f64))
        }
        _ => Err(no_method(receiver, method)),
    }
}

fn out_of_range(index: &Value, size: usize) -> SusaError {
    SusaError::index(format!(
        "List index out of range: {} (size: {size})",
        format_number(index.to_number())
    ))
}

fn list_position(index: &Value, size: usize) -> Result<usize, SusaError> {
    let i = index.to_number().trunc();
    if i < 0.0 || i >= size as f64 {
        return Err(out_of_range(index, size));
    }
    Ok(i as usize)
}

/// `target[index]` for lists, strings and dicts.
pub(crate) fn index(target: &Value, index: &Value) -> Result<Value, SusaError> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let i = list_position(index, items.len())?;
            Ok(items[i].clone())
        }
        Value::Str(s) => {
            let size = s.chars().count();
            let i = index.to_number().trunc();
            if i < 0.0 || i >= size as f64 {
                return Err(SusaError::index(format!(
                    "String index out of range: {} (size: {size})",
                    format_number(i)
                )));
            }
            Ok(s.chars().nth(i as usize).map_or(Value::Null, |c| Value::Str(c.to_string())))
        }
        Value::Dict(entries) => {
            let key = index.to_string();
            entries
                .borrow()
                .get(&key)
                .cloned()
                .ok_or_else(|| SusaError::missing_key(&key))
        }
        other => Err(SusaError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `target[index] = value` for lists and dicts.
pub(crate) fn store_index(target: &Value, index: &Value, value: Value) -> Result<(), SusaError> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = list_position(index, items.len())?;
            items[i] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            let key = index.to_string();
            entries.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::Str(_) => Err(SusaError::type_error("Strings are immutable")),
        other => Err(SusaError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// The values a `for` loop visits. Lists are snapshotted; generators are
/// drained from their cursor.
pub(crate) fn iteration_items(value: &Value) -> Result<Vec<Value>, SusaError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Generator(r#gen) => {
            let mut g = r#gen.borrow_mut();
            let rest = g.values[g.cursor.min(g.values.len())..].to_vec();
            g.cursor = g.values.len();
            Ok(rest)
        }
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(entries) => Ok(entries.borrow().keys().map(Value::str).collect()),
        other => Err(SusaError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}
