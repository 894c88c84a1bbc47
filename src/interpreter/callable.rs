use std::collections::HashMap;
use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::value::Value;
use crate::scanner::token::Token;

/// A range of statements inside a token buffer. `start` is the first token
/// after `START:`; `end` is the index of the closing `END` token.
#[derive(Debug, Clone)]
pub struct Body {
    pub tokens: Rc<[Token]>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    /// Evaluated once, when the declaring `func` statement runs.
    pub default: Option<Value>,
}

/// A user function or method. Functions see only globals plus their own
/// parameters and locals when called.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub varargs: Option<String>,
    pub body: Body,
    pub is_async: bool,
}

impl FunctionDef {
    pub fn min_args(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    pub fn max_args(&self) -> Option<usize> {
        match self.varargs {
            Some(_) => None,
            None => Some(self.params.len()),
        }
    }

    /// Pair each parameter with its argument (or a fresh copy of its
    /// default), gathering surplus arguments into the varargs list.
    pub fn bind(&self, args: Vec<Value>) -> Result<Vec<(String, Value)>, SusaError> {
        let got = args.len();
        if got < self.min_args() || self.max_args().is_some_and(|max| got > max) {
            return Err(SusaError::arity_range(
                &self.name,
                self.min_args(),
                self.max_args(),
                got,
            ));
        }

        let mut args = args.into_iter();
        let mut bindings = Vec::with_capacity(self.params.len() + 1);
        for param in &self.params {
            let value = match (args.next(), &param.default) {
                (Some(arg), _) => arg,
                (None, Some(default)) => default.deep_clone(),
                (None, None) => {
                    return Err(SusaError::argument(format!(
                        "Function '{}' missing required argument '{}'",
                        self.name, param.name
                    )));
                }
            };
            bindings.push((param.name.clone(), value));
        }
        if let Some(rest) = &self.varargs {
            bindings.push((rest.clone(), Value::list(args.collect())));
        }
        Ok(bindings)
    }
}

#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub methods: HashMap<String, Rc<FunctionDef>>,
}

impl ClassDef {
    pub const CONSTRUCTOR: &'static str = "__init__";

    pub fn method(&self, name: &str) -> Option<Rc<FunctionDef>> {
        self.methods.get(name).cloned()
    }
}
