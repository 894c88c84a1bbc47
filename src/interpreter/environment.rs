use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::value::Value;

/// One scope node. Lookup walks `enclosing` links outward; only the global
/// node has no parent.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    consts: HashSet<String>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Self {
            enclosing: Some(enclosing),
            ..Self::default()
        }
    }

    /// Insert or overwrite `name` in this node only. Overwriting a name
    /// declared const in this node fails.
    pub fn declare(&mut self, name: &str, value: Value, is_const: bool) -> Result<(), SusaError> {
        if self.consts.contains(name) {
            return Err(SusaError::runtime(format!(
                "Cannot reassign const variable: {name}"
            )));
        }
        if is_const {
            self.consts.insert(name.to_string());
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(val) = self.values.get(name) {
            return Some(val.clone());
        }
        self.enclosing
            .as_ref()
            .and_then(|enclosing| enclosing.borrow().get(name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.values.contains_key(name)
            || self
                .enclosing
                .as_ref()
                .is_some_and(|enclosing| enclosing.borrow().exists(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn declare_and_get() {
        let mut env = Environment::new();
        env.declare("x", Value::Number(42.0), false).unwrap();
        assert!(matches!(env.get("x"), Some(Value::Number(n)) if n == 42.0));
    }

    #[test]
    fn get_undefined_returns_none() {
        let env = Environment::new();
        assert!(env.get("x").is_none());
        assert!(!env.exists("x"));
    }

    #[test]
    fn enclosing_scope() {
        let outer = Rc::new(RefCell::new(Environment::new()));
        outer
            .borrow_mut()
            .declare("x", Value::Number(1.0), false)
            .unwrap();
        let inner = Environment::with_enclosing(Rc::clone(&outer));
        assert!(matches!(inner.get("x"), Some(Value::Number(n)) if n == 1.0));
        assert!(inner.exists("x"));
    }

    #[test]
    fn declare_shadows_without_touching_parent() {
        let outer = Rc::new(RefCell::new(Environment::new()));
        outer
            .borrow_mut()
            .declare("x", Value::Number(1.0), false)
            .unwrap();
        let mut inner = Environment::with_enclosing(Rc::clone(&outer));
        inner.declare("x", Value::Number(2.0), false).unwrap();
        assert!(matches!(inner.get("x"), Some(Value::Number(n)) if n == 2.0));
        assert!(matches!(outer.borrow().get("x"), Some(Value::Number(n)) if n == 1.0));
    }

    #[test]
    fn const_cannot_be_redeclared() {
        let mut env = Environment::new();
        env.declare("PI", Value::Number(3.14), true).unwrap();
        let err = env.declare("PI", Value::Number(3.0), false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert!(err.message.contains("PI"));
        assert!(matches!(env.get("PI"), Some(Value::Number(n)) if n == 3.14));
    }

    #[test]
    fn non_const_can_be_reassigned() {
        let mut env = Environment::new();
        env.declare("n", Value::Number(1.0), false).unwrap();
        env.declare("n", Value::Number(2.0), false).unwrap();
        assert!(matches!(env.get("n"), Some(Value::Number(n)) if n == 2.0));
    }
}
