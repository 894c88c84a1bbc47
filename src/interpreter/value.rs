use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::interpreter::stack;

pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type DictRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// A runtime value. Lists, dicts, instances and generators are shared
/// handles: mutation through one binding is visible through every alias.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Lambda(Rc<Lambda>),
    Instance(Rc<RefCell<Instance>>),
    Generator(Rc<RefCell<Generator>>),
}

/// Anonymous function: parameter names plus the body re-scanned on each call.
/// `line`/`column` locate the body in the defining source.
#[derive(Debug)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug)]
pub struct Instance {
    pub class_name: String,
    pub properties: HashMap<String, Value>,
}

impl Instance {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            properties: HashMap::new(),
        }
    }
}

/// Values collected eagerly from a function body's `yield` statements.
#[derive(Debug)]
pub struct Generator {
    pub values: Vec<Value>,
    pub cursor: usize,
}

impl Generator {
    pub fn next_value(&mut self) -> Option<Value> {
        let value = self.values.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(value)
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: BTreeMap<String, Value>) -> Self {
        Self::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn generator(values: Vec<Value>) -> Self {
        Self::Generator(Rc::new(RefCell::new(Generator { values, cursor: 0 })))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Dict(entries) => !entries.borrow().is_empty(),
            Self::Lambda(_) | Self::Instance(_) | Self::Generator(_) => true,
        }
    }

    /// Total numeric conversion; never fails.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Number(n) => *n,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Str(s) => parse_number_prefix(s),
            _ => 0.0,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Lambda(_) => "lambda",
            Self::Instance(_) => "instance",
            Self::Generator(_) => "generator",
        }
    }

    /// Copy with fresh list/dict containers at every level. Other shared
    /// handles are copied by reference.
    pub fn deep_clone(&self) -> Self {
        self.deep_clone_in(&mut Vec::new())
    }

    /// `copied` maps each container already copied to its copy, so shared
    /// and cyclic structure is reproduced rather than followed forever.
    fn deep_clone_in(&self, copied: &mut Vec<(usize, Value)>) -> Self {
        let addr = match self {
            Self::List(items) => container_addr(items),
            Self::Dict(entries) => container_addr(entries),
            other => return other.clone(),
        };
        if let Some((_, copy)) = copied.iter().find(|(seen, _)| *seen == addr) {
            return copy.clone();
        }
        stack::ensure_sufficient_stack(|| match self {
            Self::List(items) => {
                let copy = Rc::new(RefCell::new(Vec::new()));
                copied.push((addr, Self::List(Rc::clone(&copy))));
                let cloned: Vec<Value> = items.borrow().iter().map(|v| v.deep_clone_in(copied)).collect();
                *copy.borrow_mut() = cloned;
                Self::List(copy)
            }
            Self::Dict(entries) => {
                let copy = Rc::new(RefCell::new(BTreeMap::new()));
                copied.push((addr, Self::Dict(Rc::clone(&copy))));
                let cloned: BTreeMap<String, Value> = entries
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone_in(copied)))
                    .collect();
                *copy.borrow_mut() = cloned;
                Self::Dict(copy)
            }
            other => other.clone(),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Parse the longest numeric prefix of `s` (after leading whitespace),
/// yielding 0 when there is none.
pub fn parse_number_prefix(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut seen_digits = end > digits_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        if frac_end > frac_start || seen_digits {
            seen_digits |= frac_end > frac_start;
            end = frac_end;
        }
    }
    if !seen_digits {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(0.0)
}

/// Integral numbers print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Identity of a shared container, used to detect cycles.
pub(crate) fn container_addr<T>(cell: &Rc<RefCell<T>>) -> usize {
    Rc::as_ptr(cell).cast::<()>() as usize
}

thread_local! {
    /// Containers being rendered on this thread, outermost first.
    static RENDERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a container as on the rendering path until dropped.
struct Rendering(usize);

impl Rendering {
    /// `None` when the container is already being rendered further out.
    fn enter(addr: usize) -> Option<Self> {
        RENDERING.with_borrow_mut(|active| {
            if active.contains(&addr) {
                None
            } else {
                active.push(addr);
                Some(Self(addr))
            }
        })
    }
}

impl Drop for Rendering {
    fn drop(&mut self) {
        RENDERING.with_borrow_mut(|active| {
            if let Some(pos) = active.iter().rposition(|addr| *addr == self.0) {
                active.remove(pos);
            }
        });
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(*n)),
            Self::Str(s) => write!(f, "{s}"),
            Self::List(items) => {
                let Some(_rendering) = Rendering::enter(container_addr(items)) else {
                    return write!(f, "[...]");
                };
                write!(f, "[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    stack::ensure_sufficient_stack(|| write!(f, "{item}"))?;
                }
                write!(f, "]")
            }
            Self::Dict(entries) => {
                let Some(_rendering) = Rendering::enter(container_addr(entries)) else {
                    return write!(f, "{{...}}");
                };
                write!(f, "{{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    stack::ensure_sufficient_stack(|| write!(f, "{key}: {value}"))?;
                }
                write!(f, "}}")
            }
            Self::Lambda(_) => write!(f, "<lambda function>"),
            Self::Instance(inst) => write!(f, "<{} instance>", inst.borrow().class_name),
            Self::Generator(_) => write!(f, "<generator>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(4.0, "4")]
    #[case(4.5, "4.5")]
    #[case(-3.0, "-3")]
    #[case(-0.0, "0")]
    #[case(0.1 + 0.2, "0.30000000000000004")]
    #[case(1e20, "100000000000000000000")]
    fn number_display(#[case] n: f64, #[case] expected: &str) {
        assert_eq!(Value::Number(n).to_string(), expected);
    }

    #[rstest]
    #[case(Value::Null, false)]
    #[case(Value::Bool(false), false)]
    #[case(Value::Number(0.0), false)]
    #[case(Value::str(""), false)]
    #[case(Value::list(vec![]), false)]
    #[case(Value::dict(BTreeMap::new()), false)]
    #[case(Value::Number(-1.0), true)]
    #[case(Value::str("0"), true)]
    #[case(Value::list(vec![Value::Null]), true)]
    #[case(Value::generator(vec![]), true)]
    #[case(Value::Lambda(Rc::new(Lambda { params: vec![], body: String::new(), line: 1, column: 1 })), true)]
    fn truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.is_truthy(), expected);
    }

    #[rstest]
    #[case("42", 42.0)]
    #[case("  3.5kg", 3.5)]
    #[case("-7", -7.0)]
    #[case(".5", 0.5)]
    #[case("1e3x", 1000.0)]
    #[case("abc", 0.0)]
    #[case("", 0.0)]
    #[case("-", 0.0)]
    fn string_to_number(#[case] text: &str, #[case] expected: f64) {
        assert_eq!(Value::str(text).to_number(), expected);
    }

    #[test]
    fn other_kinds_to_number() {
        assert_eq!(Value::Bool(true).to_number(), 1.0);
        assert_eq!(Value::Null.to_number(), 0.0);
        assert_eq!(Value::list(vec![Value::Number(1.0)]).to_number(), 0.0);
    }

    #[test]
    fn container_display() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Value::Number(2.0));
        map.insert("a".to_string(), Value::list(vec![Value::Number(1.0), Value::str("x")]));
        assert_eq!(Value::dict(map).to_string(), "{a: [1, x], b: 2}");
        let mut inst = Instance::new("Point");
        inst.properties.insert("x".into(), Value::Null);
        assert_eq!(
            Value::Instance(Rc::new(RefCell::new(inst))).to_string(),
            "<Point instance>"
        );
    }

    #[test]
    fn deep_clone_does_not_alias_nested_containers() {
        let inner = Value::list(vec![Value::Number(1.0)]);
        let outer = Value::list(vec![inner.clone()]);
        let copy = outer.deep_clone();
        if let Value::List(items) = &inner {
            items.borrow_mut().push(Value::Number(2.0));
        }
        assert_eq!(outer.to_string(), "[[1, 2]]");
        assert_eq!(copy.to_string(), "[[1]]");
    }

    #[test]
    fn self_referential_containers_display_once() {
        let list = Value::list(vec![Value::Number(1.0)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.to_string(), "[1, [...]]");

        let dict = Value::dict(BTreeMap::new());
        if let Value::Dict(entries) = &dict {
            entries.borrow_mut().insert("me".into(), dict.clone());
            entries.borrow_mut().insert("xs".into(), list.clone());
        }
        assert_eq!(dict.to_string(), "{me: {...}, xs: [1, [...]]}");
    }

    #[test]
    fn shared_containers_are_not_cycles() {
        let inner = Value::list(vec![Value::Number(7.0)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(outer.to_string(), "[[7], [7]]");
    }

    #[test]
    fn deep_clone_reproduces_cycles() {
        let list = Value::list(vec![Value::Number(1.0)]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        let copy = list.deep_clone();
        let (Value::List(original), Value::List(cloned)) = (&list, &copy) else {
            panic!("expected lists");
        };
        assert!(!Rc::ptr_eq(original, cloned));
        let Value::List(back) = &cloned.borrow()[1] else {
            panic!("expected nested list");
        };
        assert!(Rc::ptr_eq(back, cloned));
        assert_eq!(copy.to_string(), "[1, [...]]");
    }

    #[test]
    fn generator_yields_in_order_then_stops() {
        let Value::Generator(r#gen) = Value::generator(vec![Value::Number(1.0), Value::Number(2.0)])
        else {
            panic!("expected generator");
        };
        let mut g = r#gen.borrow_mut();
        assert_eq!(g.next_value().map(|v| v.to_string()), Some("1".into()));
        assert_eq!(g.next_value().map(|v| v.to_string()), Some("2".into()));
        assert!(g.next_value().is_none());
    }
}
