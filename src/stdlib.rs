//! Standard-library modules reachable through `add <module> [as alias]`.
//!
//! The interpreter only talks to modules through [`ModuleRegistry`]; the
//! default [`BuiltinModules`] registry bundles the math, string, array and
//! JSON helpers. Every callable validates its own arguments.

use std::collections::BTreeMap;
use std::f64::consts;
use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::stack::ensure_sufficient_stack;
use crate::interpreter::value::{ListRef, Value, container_addr};

pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, SusaError>>;

/// Name-to-callable and name-to-constant lookup, per module.
pub trait ModuleRegistry {
    fn has_module(&self, module: &str) -> bool;

    fn lookup_function(&self, module: &str, name: &str) -> Option<NativeFn>;

    fn lookup_constant(&self, module: &str, name: &str) -> Option<Value>;

    /// Modules searched for unqualified calls that match no user or
    /// built-in function.
    fn prelude(&self) -> &[&str] {
        &[]
    }
}

type Builtin = fn(&[Value]) -> Result<Value, SusaError>;

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinModules;

impl BuiltinModules {
    const MODULES: [&'static str; 4] = ["math_utils", "string_utils", "array_utils", "json_utils"];
    const PRELUDE: [&'static str; 3] = ["math_utils", "string_utils", "array_utils"];

    pub fn new() -> Self {
        Self
    }

    fn builtin(module: &str, name: &str) -> Option<Builtin> {
        match module {
            "math_utils" => math_function(name),
            "string_utils" => string_function(name),
            "array_utils" => array_function(name),
            "json_utils" => json_function(name),
            _ => None,
        }
    }
}

impl ModuleRegistry for BuiltinModules {
    fn has_module(&self, module: &str) -> bool {
        Self::MODULES.contains(&module)
    }

    fn lookup_function(&self, module: &str, name: &str) -> Option<NativeFn> {
        let f: NativeFn = Rc::new(Self::builtin(module, name)?);
        Some(f)
    }

    fn lookup_constant(&self, module: &str, name: &str) -> Option<Value> {
        let n = match (module, name) {
            ("math_utils", "PI") => consts::PI,
            ("math_utils", "E") => consts::E,
            ("math_utils", "GOLDEN_RATIO") => 1.618_033_988_749_895,
            _ => return None,
        };
        Some(Value::Number(n))
    }

    fn prelude(&self) -> &[&str] {
        &Self::PRELUDE
    }
}

// ============= Argument helpers =============

/// Arity check shared by every native function and method.
pub(crate) fn check_args(name: &str, args: &[Value], min: usize, max: Option<usize>) -> Result<(), SusaError> {
    let got = args.len();
    if got < min || max.is_some_and(|max| got > max) {
        return Err(SusaError::arity_range(name, min, max, got));
    }
    Ok(())
}

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map_or(0.0, Value::to_number)
}

fn text(args: &[Value], i: usize) -> String {
    args.get(i).map(Value::to_string).unwrap_or_default()
}

fn list_arg(name: &str, args: &[Value], i: usize) -> Result<ListRef, SusaError> {
    match args.get(i) {
        Some(Value::List(items)) => Ok(Rc::clone(items)),
        Some(other) => Err(SusaError::type_error(format!(
            "{name}() expects a list, got {}",
            other.type_name()
        ))),
        None => Err(SusaError::arity(name, i + 1, args.len())),
    }
}

fn unary(name: &str, args: &[Value], f: fn(f64) -> f64) -> Result<Value, SusaError> {
    check_args(name, args, 1, Some(1))?;
    Ok(Value::Number(f(num(args, 0))))
}

fn binary(name: &str, args: &[Value], f: fn(f64, f64) -> f64) -> Result<Value, SusaError> {
    check_args(name, args, 2, Some(2))?;
    Ok(Value::Number(f(num(args, 0), num(args, 1))))
}

fn fold(name: &str, args: &[Value], f: fn(f64, f64) -> f64) -> Result<Value, SusaError> {
    check_args(name, args, 1, None)?;
    let numbers = match args {
        [Value::List(items)] => items.borrow().iter().map(Value::to_number).collect(),
        _ => args.iter().map(Value::to_number).collect::<Vec<_>>(),
    };
    Ok(numbers.into_iter().reduce(f).map_or(Value::Null, Value::Number))
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

// ============= math_utils =============

fn math_function(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "abs" => |a| unary("abs", a, f64::abs),
        "sqrt" => |a| unary("sqrt", a, f64::sqrt),
        "cbrt" => |a| unary("cbrt", a, f64::cbrt),
        "ceil" => |a| unary("ceil", a, f64::ceil),
        "floor" => |a| unary("floor", a, f64::floor),
        "round" => |a| unary("round", a, f64::round),
        "trunc" => |a| unary("trunc", a, f64::trunc),
        "sin" => |a| unary("sin", a, f64::sin),
        "cos" => |a| unary("cos", a, f64::cos),
        "tan" => |a| unary("tan", a, f64::tan),
        "log" => |a| unary("log", a, f64::log10),
        "ln" => |a| unary("ln", a, f64::ln),
        "log2" => |a| unary("log2", a, f64::log2),
        "exp" => |a| unary("exp", a, f64::exp),
        "degrees" => |a| unary("degrees", a, f64::to_degrees),
        "radians" => |a| unary("radians", a, f64::to_radians),
        "pow" => |a| binary("pow", a, f64::powf),
        "atan2" => |a| binary("atan2", a, f64::atan2),
        "max" => |a| fold("max", a, f64::max),
        "min" => |a| fold("min", a, f64::min),
        "factorial" => |a| {
            check_args("factorial", a, 1, Some(1))?;
            let n = num(a, 0) as i64;
            Ok(Value::Number((2..=n).fold(1.0, |acc, i| acc * i as f64)))
        },
        "gcd" => |a| {
            check_args("gcd", a, 2, Some(2))?;
            Ok(Value::Number(gcd(num(a, 0) as i64, num(a, 1) as i64) as f64))
        },
        "lcm" => |a| {
            check_args("lcm", a, 2, Some(2))?;
            let (x, y) = (num(a, 0) as i64, num(a, 1) as i64);
            let g = gcd(x, y);
            let lcm = if g == 0 { 0 } else { (x / g * y).abs() };
            Ok(Value::Number(lcm as f64))
        },
        "is_prime" => |a| {
            check_args("is_prime", a, 1, Some(1))?;
            let n = num(a, 0) as i64;
            let prime = n >= 2 && (2..).take_while(|i| i * i <= n).all(|i| n % i != 0);
            Ok(Value::Bool(prime))
        },
        "clamp" => |a| {
            check_args("clamp", a, 3, Some(3))?;
            let (v, lo, hi) = (num(a, 0), num(a, 1), num(a, 2));
            Ok(Value::Number(lo.max(hi.min(v))))
        },
        "lerp" => |a| {
            check_args("lerp", a, 3, Some(3))?;
            let (x, y, t) = (num(a, 0), num(a, 1), num(a, 2));
            Ok(Value::Number(x + (y - x) * t))
        },
        _ => return None,
    };
    Some(f)
}

// ============= string_utils =============

fn string_function(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "len" => |a| {
            check_args("len", a, 1, Some(1))?;
            let n = match &a[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                _ => 0,
            };
            Ok(Value::Number(n as f64))
        },
        "upper" => |a| {
            check_args("upper", a, 1, Some(1))?;
            Ok(Value::Str(text(a, 0).to_uppercase()))
        },
        "lower" => |a| {
            check_args("lower", a, 1, Some(1))?;
            Ok(Value::Str(text(a, 0).to_lowercase()))
        },
        "capitalize" => |a| {
            check_args("capitalize", a, 1, Some(1))?;
            let s = text(a, 0);
            let mut chars = s.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            };
            Ok(Value::Str(capitalized))
        },
        "title" => |a| {
            check_args("title", a, 1, Some(1))?;
            let mut out = String::new();
            let mut new_word = true;
            for c in text(a, 0).chars() {
                if c.is_whitespace() {
                    new_word = true;
                    out.push(c);
                } else if new_word {
                    out.extend(c.to_uppercase());
                    new_word = false;
                } else {
                    out.extend(c.to_lowercase());
                }
            }
            Ok(Value::Str(out))
        },
        "strip" => |a| {
            check_args("strip", a, 1, Some(1))?;
            Ok(Value::str(text(a, 0).trim()))
        },
        "lstrip" => |a| {
            check_args("lstrip", a, 1, Some(1))?;
            Ok(Value::str(text(a, 0).trim_start()))
        },
        "rstrip" => |a| {
            check_args("rstrip", a, 1, Some(1))?;
            Ok(Value::str(text(a, 0).trim_end()))
        },
        "replace" => |a| {
            check_args("replace", a, 3, Some(3))?;
            let from = text(a, 1);
            if from.is_empty() {
                return Ok(Value::Str(text(a, 0)));
            }
            Ok(Value::Str(text(a, 0).replace(&from, &text(a, 2))))
        },
        "split" => |a| {
            check_args("split", a, 1, Some(2))?;
            let delim = if a.len() > 1 { text(a, 1) } else { " ".into() };
            Ok(split_value(&text(a, 0), &delim))
        },
        "join" => |a| {
            check_args("join", a, 2, Some(2))?;
            let items = list_arg("join", a, 1)?;
            Ok(Value::Str(join_values(&items.borrow(), &text(a, 0))))
        },
        "startswith" => |a| {
            check_args("startswith", a, 2, Some(2))?;
            Ok(Value::Bool(text(a, 0).starts_with(&text(a, 1))))
        },
        "endswith" => |a| {
            check_args("endswith", a, 2, Some(2))?;
            Ok(Value::Bool(text(a, 0).ends_with(&text(a, 1))))
        },
        "contains" => |a| {
            check_args("contains", a, 2, Some(2))?;
            Ok(Value::Bool(text(a, 0).contains(&text(a, 1))))
        },
        "count" => |a| {
            check_args("count", a, 2, Some(2))?;
            let needle = text(a, 1);
            let n = if needle.is_empty() {
                0
            } else {
                text(a, 0).matches(&needle).count()
            };
            Ok(Value::Number(n as f64))
        },
        "reverse" => |a| {
            check_args("reverse", a, 1, Some(1))?;
            Ok(Value::Str(text(a, 0).chars().rev().collect()))
        },
        "repeat" => |a| {
            check_args("repeat", a, 2, Some(2))?;
            let times = num(a, 1).max(0.0) as usize;
            Ok(Value::Str(text(a, 0).repeat(times)))
        },
        "pad_left" => |a| pad("pad_left", a, true),
        "pad_right" => |a| pad("pad_right", a, false),
        _ => return None,
    };
    Some(f)
}

fn pad(name: &str, args: &[Value], left: bool) -> Result<Value, SusaError> {
    check_args(name, args, 2, Some(3))?;
    let s = text(args, 0);
    let width = num(args, 1).max(0.0) as usize;
    let fill = if args.len() > 2 {
        text(args, 2).chars().next().unwrap_or(' ')
    } else {
        ' '
    };
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::Str(s));
    }
    let padding: String = std::iter::repeat_n(fill, width - len).collect();
    Ok(Value::Str(if left { padding + &s } else { s + &padding }))
}

/// Split on every occurrence of `delim`, keeping empty pieces. An empty
/// delimiter splits into characters.
pub fn split_value(s: &str, delim: &str) -> Value {
    let parts = if delim.is_empty() {
        s.chars().map(|c| Value::Str(c.to_string())).collect()
    } else {
        s.split(delim).map(Value::str).collect()
    };
    Value::list(parts)
}

pub fn join_values(items: &[Value], sep: &str) -> String {
    items
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

// ============= array_utils =============

fn array_function(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "length" => |a| {
            check_args("length", a, 1, Some(1))?;
            let n = match &a[0] {
                Value::List(items) => items.borrow().len(),
                _ => 0,
            };
            Ok(Value::Number(n as f64))
        },
        "push" => |a| {
            check_args("push", a, 2, Some(2))?;
            list_arg("push", a, 0)?.borrow_mut().push(a[1].clone());
            Ok(a[0].clone())
        },
        "pop" => |a| {
            check_args("pop", a, 1, Some(1))?;
            Ok(list_arg("pop", a, 0)?.borrow_mut().pop().unwrap_or(Value::Null))
        },
        "shift" => |a| {
            check_args("shift", a, 1, Some(1))?;
            let items = list_arg("shift", a, 0)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Ok(Value::Null);
            }
            Ok(items.remove(0))
        },
        "unshift" => |a| {
            check_args("unshift", a, 2, Some(2))?;
            list_arg("unshift", a, 0)?.borrow_mut().insert(0, a[1].clone());
            Ok(a[0].clone())
        },
        "reverse" => |a| {
            check_args("reverse", a, 1, Some(1))?;
            list_arg("reverse", a, 0)?.borrow_mut().reverse();
            Ok(a[0].clone())
        },
        "sort" => |a| {
            check_args("sort", a, 1, Some(1))?;
            sort_numeric(&mut list_arg("sort", a, 0)?.borrow_mut());
            Ok(a[0].clone())
        },
        "sum" => |a| {
            check_args("sum", a, 1, Some(1))?;
            let total = list_arg("sum", a, 0)?
                .borrow()
                .iter()
                .map(Value::to_number)
                .sum();
            Ok(Value::Number(total))
        },
        "average" => |a| {
            check_args("average", a, 1, Some(1))?;
            let items = list_arg("average", a, 0)?;
            let items = items.borrow();
            if items.is_empty() {
                return Ok(Value::Number(0.0));
            }
            let total: f64 = items.iter().map(Value::to_number).sum();
            Ok(Value::Number(total / items.len() as f64))
        },
        "min" => |a| {
            check_args("min", a, 1, Some(1))?;
            list_arg("min", a, 0)?;
            fold("min", a, f64::min)
        },
        "max" => |a| {
            check_args("max", a, 1, Some(1))?;
            list_arg("max", a, 0)?;
            fold("max", a, f64::max)
        },
        _ => return None,
    };
    Some(f)
}

/// Stable ascending sort by numeric value.
pub fn sort_numeric(items: &mut [Value]) {
    items.sort_by(|x, y| x.to_number().total_cmp(&y.to_number()));
}

// ============= json_utils =============

fn json_function(name: &str) -> Option<Builtin> {
    let f: Builtin = match name {
        "stringify" => |a| {
            check_args("stringify", a, 1, Some(1))?;
            serde_json::to_string(&to_json(&a[0])?)
                .map(Value::Str)
                .map_err(|e| SusaError::value(format!("stringify failed: {e}")))
        },
        "stringify_pretty" => |a| {
            check_args("stringify_pretty", a, 1, Some(1))?;
            serde_json::to_string_pretty(&to_json(&a[0])?)
                .map(Value::Str)
                .map_err(|e| SusaError::value(format!("stringify_pretty failed: {e}")))
        },
        "parse" => |a| {
            check_args("parse", a, 1, Some(1))?;
            let parsed: serde_json::Value = serde_json::from_str(&text(a, 0))
                .map_err(|e| SusaError::value(format!("Invalid JSON: {e}")))?;
            Ok(from_json(parsed))
        },
        _ => return None,
    };
    Some(f)
}

/// Convert to JSON. A container nested inside itself has no JSON form.
fn to_json(value: &Value) -> Result<serde_json::Value, SusaError> {
    to_json_in(value, &mut Vec::new())
}

fn to_json_in(value: &Value, path: &mut Vec<usize>) -> Result<serde_json::Value, SusaError> {
    let addr = match value {
        Value::List(items) => container_addr(items),
        Value::Dict(entries) => container_addr(entries),
        Value::Null => return Ok(serde_json::Value::Null),
        Value::Bool(b) => return Ok(serde_json::Value::Bool(*b)),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
            return Ok(serde_json::Value::from(*n as i64));
        }
        Value::Number(n) => {
            return Ok(serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number));
        }
        Value::Str(s) => return Ok(serde_json::Value::String(s.clone())),
        other => return Ok(serde_json::Value::String(other.to_string())),
    };
    if path.contains(&addr) {
        return Err(SusaError::value("Cannot convert a self-referencing value to JSON"));
    }
    path.push(addr);
    let json = ensure_sufficient_stack(|| match value {
        Value::List(items) => items
            .borrow()
            .iter()
            .map(|v| to_json_in(v, path))
            .collect::<Result<Vec<_>, SusaError>>()
            .map(serde_json::Value::Array),
        Value::Dict(entries) => entries
            .borrow()
            .iter()
            .map(|(k, v)| Ok((k.clone(), to_json_in(v, path)?)))
            .collect::<Result<serde_json::Map<_, _>, SusaError>>()
            .map(serde_json::Value::Object),
        _ => Ok(serde_json::Value::Null),
    });
    path.pop();
    json
}

fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(entries) => Value::dict(
            entries
                .into_iter()
                .map(|(k, v)| (k, from_json(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}
