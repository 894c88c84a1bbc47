//! Invocation of user functions, methods, lambdas and class constructors.
//!
//! Every call saves and restores the caller's buffer, cursor and scope,
//! including when the callee fails.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::callable::{ClassDef, FunctionDef};
use crate::interpreter::environment::Environment;
use crate::interpreter::value::{Instance, Lambda, Value};
use crate::interpreter::{Flow, Interpreter, builtins, stack};
use crate::scanner::{
    self,
    token::{Token, TokenKind},
};

pub const MAX_CALL_DEPTH: usize = 200;

/// Per-call bookkeeping: values gathered by `yield` and the `static` names
/// declared in this activation. Assignments to those names are stored
/// straight into the interpreter's static table.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    pub function: String,
    pub yielded: Vec<Value>,
    pub statics: Vec<String>,
}

impl Frame {
    fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            ..Self::default()
        }
    }
}

pub(crate) fn static_key(function: &str, name: &str) -> String {
    format!("{function}::{name}")
}

impl Interpreter {
    fn enter(&mut self, name: &str) -> Result<(), SusaError> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(SusaError::runtime(format!(
                "Maximum call depth of {MAX_CALL_DEPTH} exceeded in '{name}'"
            )));
        }
        self.frames.push(Frame::new(name));
        Ok(())
    }

    /// `name(args)`: lambda variable, class, user function, legacy built-in,
    /// then the registry's prelude modules. Built-in and prelude names match
    /// case-insensitively.
    pub(crate) fn call_named(&mut self, name: &str, args: Vec<Value>) -> Result<Value, SusaError> {
        let variable = self.environment.borrow().get(name);
        if let Some(Value::Lambda(lambda)) = &variable {
            return self.call_lambda(lambda, args);
        }
        if let Some(class) = self.classes.get(name).cloned() {
            return self.instantiate(&class, args);
        }
        if let Some(function) = self.functions.get(name).cloned() {
            return self.call_function(&function, args);
        }
        let lowered = name.to_ascii_lowercase();
        if let Some(builtin) = builtins::lookup(&lowered) {
            return builtin(&args);
        }
        for module in self.modules.prelude() {
            if let Some(function) = self.modules.lookup_function(module, &lowered) {
                return function(&args);
            }
        }
        match variable {
            Some(other) => Err(SusaError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
            None => Err(SusaError::undefined_name(name)),
        }
    }

    /// Run a user function in a fresh scope whose parent is the global
    /// scope. A body that yielded produces a generator instead of its
    /// return value.
    pub(crate) fn call_function(
        &mut self,
        function: &Rc<FunctionDef>,
        args: Vec<Value>,
    ) -> Result<Value, SusaError> {
        let bindings = function.bind(args)?;
        let mut scope = Environment::with_enclosing(Rc::clone(&self.globals));
        for (name, value) in bindings {
            scope.declare(&name, value, false)?;
        }
        let scope = Rc::new(RefCell::new(scope));

        self.enter(&function.name)?;
        tracing::debug!(function = %function.name, depth = self.frames.len(), "call");
        let body = &function.body;
        let flow = stack::ensure_sufficient_stack(|| {
            self.with_environment(scope, |s| {
                s.with_buffer(Rc::clone(&body.tokens), body.start, |s| {
                    s.run_until(body.end)
                })
            })
        });
        let frame = self.frames.pop().unwrap_or_default();

        let value = match flow? {
            Flow::Return(value) => value,
            Flow::Normal => Value::Null,
            Flow::Break | Flow::Continue => return Err(self.stray_jump()),
        };
        if frame.yielded.is_empty() {
            Ok(value)
        } else {
            Ok(Value::generator(frame.yielded))
        }
    }

    /// Re-scan the lambda body and evaluate it in a child of the caller's
    /// current scope.
    pub(crate) fn call_lambda(&mut self, lambda: &Lambda, args: Vec<Value>) -> Result<Value, SusaError> {
        if args.len() != lambda.params.len() {
            return Err(SusaError::arity("lambda", lambda.params.len(), args.len()));
        }
        let tokens: Rc<[Token]> = scanner::scan(&lambda.body)?
            .into_iter()
            .map(|mut token| {
                token.line = lambda.line;
                token.column = lambda.column;
                token
            })
            .collect();
        let mut scope = Environment::with_enclosing(Rc::clone(&self.environment));
        for (param, arg) in lambda.params.iter().zip(args) {
            scope.declare(param, arg, false)?;
        }

        self.enter("<lambda>")?;
        tracing::debug!(params = lambda.params.len(), "lambda call");
        let result = stack::ensure_sufficient_stack(|| {
            self.with_environment(Rc::new(RefCell::new(scope)), |s| {
                s.with_buffer(tokens, 0, |s| {
                    let value = s.evaluate()?;
                    if !s.check(TokenKind::Eof) {
                        return Err(s.syntax_error("Unexpected token in lambda body"));
                    }
                    Ok(value)
                })
            })
        });
        self.frames.pop();
        result
    }

    /// `value.name(args)`: user methods on instances, built-in methods on
    /// everything else.
    pub(crate) fn invoke_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, SusaError> {
        match receiver {
            Value::Instance(instance) => self.call_method(instance, name, args),
            other => builtins::call_method(other, name, &args),
        }
    }

    fn call_method(
        &mut self,
        instance: &Rc<RefCell<Instance>>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, SusaError> {
        let class_name = instance.borrow().class_name.clone();
        let method = self.classes.get(&class_name).and_then(|class| class.method(name));
        let Some(method) = method else {
            let property = instance.borrow().properties.get(name).cloned();
            return match property {
                Some(Value::Lambda(lambda)) => self.call_lambda(&lambda, args),
                _ => Err(SusaError::attribute(format!(
                    "'{class_name}' object has no method '{name}'"
                ))),
            };
        };
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Instance(Rc::clone(instance)));
        full.extend(args);
        self.call_function(&method, full)
    }

    /// Create an instance and run the class's `__init__` on it, if any.
    pub(crate) fn instantiate(&mut self, class: &Rc<ClassDef>, args: Vec<Value>) -> Result<Value, SusaError> {
        let instance = Rc::new(RefCell::new(Instance::new(&class.name)));
        tracing::debug!(class = %class.name, "instantiate");
        match class.method(ClassDef::CONSTRUCTOR) {
            Some(init) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Instance(Rc::clone(&instance)));
                full.extend(args);
                self.call_function(&init, full)?;
            }
            None if !args.is_empty() => {
                return Err(SusaError::arity(&class.name, 0, args.len()));
            }
            None => {}
        }
        Ok(Value::Instance(instance))
    }
}
