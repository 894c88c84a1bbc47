pub mod builtins;
pub mod callable;
pub mod environment;
pub mod value;

mod blocks;
mod calls;
mod expr;
pub(crate) mod stack;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::diagnostics;
use crate::error::SusaError;
use crate::interpreter::blocks::Block;
use crate::interpreter::callable::{Body, ClassDef, FunctionDef, Param};
use crate::interpreter::calls::{Frame, static_key};
use crate::interpreter::environment::Environment;
use crate::interpreter::value::Value;
use crate::scanner::{
    self,
    token::{Token, TokenKind},
};
use crate::stdlib::{BuiltinModules, ModuleRegistry};

pub use calls::MAX_CALL_DEPTH;

/// Passes a single loop may run before it is stopped.
pub const MAX_LOOP_ITERATIONS: usize = 100_000;

/// How a statement finished.
#[derive(Debug, Clone)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// The last accessor of an assignment target like `a[0]` or `p.x`.
#[derive(Debug, Clone)]
enum Slot {
    Index(Value),
    Property(String),
}

/// Executes programs directly from their token stream.
///
/// All program state lives here; two interpreters never share anything.
pub struct Interpreter {
    tokens: Rc<[Token]>,
    current: usize,
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    functions: HashMap<String, Rc<FunctionDef>>,
    classes: HashMap<String, Rc<ClassDef>>,
    enums: HashMap<String, HashMap<String, Value>>,
    statics: HashMap<String, Value>,
    /// (alias, module) pairs in import order.
    imports: Vec<(String, String)>,
    modules: Box<dyn ModuleRegistry>,
    frames: Vec<Frame>,
    skip_mode: bool,
    /// The most recent `break`/`continue`, for locating one that escapes.
    last_jump: Option<Token>,
    output: Vec<String>,
    /// Optional sink that receives each printed line as it is produced.
    writer: Option<Box<dyn Write>>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// An interpreter with the bundled standard-library modules that only
    /// captures output.
    pub fn new() -> Self {
        Self::with_modules(Box::new(BuiltinModules::new()))
    }

    pub fn with_modules(modules: Box<dyn ModuleRegistry>) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        Self {
            tokens: Rc::from(vec![Token::new(TokenKind::Eof, "", 1, 1)]),
            current: 0,
            globals: Rc::clone(&globals),
            environment: globals,
            functions: HashMap::new(),
            classes: HashMap::new(),
            enums: HashMap::new(),
            statics: HashMap::new(),
            imports: Vec::new(),
            modules,
            frames: Vec::new(),
            skip_mode: false,
            last_jump: None,
            output: Vec::new(),
            writer: None,
        }
    }

    /// Also write every printed line to `writer` as it is produced.
    pub fn with_writer(mut self, writer: Box<dyn Write>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Run `source` as a fresh program: variables, definitions, imports and
    /// output from earlier runs are discarded.
    pub fn run(&mut self, source: &str) -> Result<(), SusaError> {
        self.reset();
        self.run_additional(source)
    }

    /// Run `source` on top of the current state (for the REPL).
    pub fn run_additional(&mut self, source: &str) -> Result<(), SusaError> {
        self.tokens = scanner::scan(source)?.into();
        self.current = 0;
        tracing::debug!(tokens = self.tokens.len(), "run");
        let result = self.run_program();
        if result.is_err() {
            self.environment = Rc::clone(&self.globals);
            self.frames.clear();
            self.skip_mode = false;
        }
        result
    }

    /// Run `source` and return its output as text. An uncaught failure is
    /// appended as one editor-style rendered error.
    pub fn execute(&mut self, source: &str) -> String {
        let result = self.run(source);
        let mut lines = self.output.clone();
        if let Err(err) = result {
            lines.push(diagnostics::render(&err, source, false));
        }
        lines.join("\n")
    }

    fn reset(&mut self) {
        let globals = Rc::new(RefCell::new(Environment::new()));
        self.environment = Rc::clone(&globals);
        self.globals = globals;
        self.functions.clear();
        self.classes.clear();
        self.enums.clear();
        self.statics.clear();
        self.imports.clear();
        self.frames.clear();
        self.skip_mode = false;
        self.last_jump = None;
        self.output.clear();
    }

    fn run_program(&mut self) -> Result<(), SusaError> {
        let end = self.tokens.len();
        match self.run_until(end)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break | Flow::Continue => Err(self.stray_jump()),
        }
    }

    /// Execute statements until the cursor reaches `end` or a statement
    /// finishes with anything but [`Flow::Normal`].
    pub(crate) fn run_until(&mut self, end: usize) -> Result<Flow, SusaError> {
        loop {
            self.skip_separators();
            if self.current >= end || self.check(TokenKind::Eof) {
                return Ok(Flow::Normal);
            }
            match self.statement()? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
    }

    /// Run a block, leaving the cursor where it was.
    pub(crate) fn run_block(&mut self, block: &Block) -> Result<Flow, SusaError> {
        let resume = std::mem::replace(&mut self.current, block.start);
        let flow = self.run_until(block.end);
        self.current = resume;
        flow
    }

    pub(crate) fn stray_jump(&self) -> SusaError {
        match &self.last_jump {
            Some(token) => SusaError::syntax(format!(
                "'{}' outside loop",
                token.lexeme.to_ascii_lowercase()
            ))
            .at(token.line, token.column),
            None => SusaError::syntax("'break' outside loop"),
        }
    }

    fn emit(&mut self, line: String) -> Result<(), SusaError> {
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{line}")
                .map_err(|e| SusaError::runtime(format!("Failed to write output: {e}")))?;
        }
        self.output.push(line);
        Ok(())
    }

    /// Bind `name` in the current scope. A name declared `static` in the
    /// running activation is also stored under its static key, so nested
    /// and later calls see the latest value.
    fn define(&mut self, name: &Token, value: Value, is_const: bool) -> Result<(), SusaError> {
        self.environment
            .borrow_mut()
            .declare(&name.lexeme, value.clone(), is_const)
            .map_err(|e| e.or_at(name.line, name.column))?;
        let key = match self.frames.last() {
            Some(frame) if frame.statics.contains(&name.lexeme) => {
                static_key(&frame.function, &name.lexeme)
            }
            Some(_) => return Ok(()),
            None => static_key("<main>", &name.lexeme),
        };
        if let Some(stored) = self.statics.get_mut(&key) {
            *stored = value;
        }
        Ok(())
    }

    pub(crate) fn module_for_alias(&self, alias: &str) -> Option<String> {
        self.imports
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, module)| module.clone())
    }

    fn at_statement_end(&self) -> bool {
        self.peek().kind.is_terminator() || self.at_marker(TokenKind::End)
    }

    // ============= Statements =============

    fn statement(&mut self) -> Result<Flow, SusaError> {
        stack::ensure_sufficient_stack(|| self.dispatch_statement())
    }

    fn dispatch_statement(&mut self) -> Result<Flow, SusaError> {
        use TokenKind::*;

        let kind = self.peek().kind;
        let compound = matches!(
            kind,
            If | While | Loop | Do | For | Switch | Func | Async | Class | Try | With | Enum
        );
        let flow = match kind {
            Print => self.print_statement(),
            Let | Const => self.declaration(),
            k if k.is_declaration() && self.peek_at(1).kind != LeftParen => self.declaration(),
            If => self.if_statement(),
            While => {
                self.advance();
                self.conditional_loop("while")
            }
            Loop => self.loop_statement(),
            Do => self.do_while_statement(),
            For => self.for_statement(),
            Switch => self.switch_statement(),
            Func | Async => self.function_declaration(),
            Class => self.class_declaration(),
            Return => self.return_statement(),
            Yield => self.yield_statement(),
            Break | Continue => {
                let token = self.advance();
                let flow = if token.kind == Break {
                    Flow::Break
                } else {
                    Flow::Continue
                };
                self.last_jump = Some(token);
                Ok(flow)
            }
            Try => self.try_statement(),
            With => self.with_statement(),
            Assert => self.assert_statement(),
            Static => self.static_statement(),
            Enum => self.enum_statement(),
            Add => self.import_statement(),
            Identifier => self.identifier_statement(),
            _ => self.expression_statement(),
        }
        .map_err(|e| self.locate(e))?;
        if !compound && !self.at_statement_end() {
            return Err(self.syntax_error("Expected end of statement"));
        }
        Ok(flow)
    }

    fn print_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let mut parts = Vec::new();
        if !self.at_statement_end() {
            parts.push(self.evaluate()?.to_string());
            while self.eat(TokenKind::Comma) {
                parts.push(self.evaluate()?.to_string());
            }
        }
        self.emit(parts.join(" "))?;
        Ok(Flow::Normal)
    }

    fn expression_statement(&mut self) -> Result<Flow, SusaError> {
        self.evaluate()?;
        Ok(Flow::Normal)
    }

    /// `let|const|<type> name [= expr]`, `let a, b = expr`, `let [a, b] = expr`.
    fn declaration(&mut self) -> Result<Flow, SusaError> {
        let keyword = self.advance();
        let is_const = keyword.kind == TokenKind::Const;

        if self.eat(TokenKind::LeftBracket) {
            let mut names = Vec::new();
            while !self.check(TokenKind::RightBracket) {
                names.push(self.expect(TokenKind::Identifier, "Expected name in list pattern")?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RightBracket, "Expected ']' after list pattern")?;
            self.expect(TokenKind::Equal, "Expected '=' after list pattern")?;
            let value = self.evaluate()?;
            let Value::List(items) = &value else {
                return Err(SusaError::type_error(format!(
                    "Cannot destructure a {} into a list pattern",
                    value.type_name()
                )));
            };
            let items = items.borrow().clone();
            for (i, name) in names.iter().enumerate() {
                let item = items.get(i).cloned().unwrap_or(Value::Null);
                self.define(name, item, is_const)?;
            }
            return Ok(Flow::Normal);
        }

        let first = self.expect(TokenKind::Identifier, "Expected variable name")?;
        if self.check(TokenKind::Comma) {
            let mut names = vec![first];
            while self.eat(TokenKind::Comma) {
                names.push(self.expect(TokenKind::Identifier, "Expected variable name")?);
            }
            self.expect(TokenKind::Equal, "Expected '=' after variable names")?;
            let value = self.evaluate()?;
            let items = match &value {
                Value::List(items) => Some(items.borrow().clone()),
                _ => None,
            };
            for (i, name) in names.iter().enumerate() {
                let item = match &items {
                    Some(items) => items.get(i).cloned().unwrap_or(Value::Null),
                    None => value.clone(),
                };
                self.define(name, item, is_const)?;
            }
            return Ok(Flow::Normal);
        }

        let value = if self.eat(TokenKind::Equal) {
            self.evaluate()?
        } else {
            Value::Null
        };
        self.define(&first, value, is_const)?;
        Ok(Flow::Normal)
    }

    fn identifier_statement(&mut self) -> Result<Flow, SusaError> {
        let next = self.peek_at(1).kind;
        if next == TokenKind::Equal
            || next.is_compound_assign()
            || matches!(next, TokenKind::PlusPlus | TokenKind::MinusMinus)
        {
            return self.name_assignment();
        }
        if matches!(next, TokenKind::LeftBracket | TokenKind::Dot) && self.is_target_assignment() {
            return self.target_assignment();
        }
        self.expression_statement()
    }

    /// `name = expr`, `name op= expr`, `name++`, `name--`.
    fn name_assignment(&mut self) -> Result<Flow, SusaError> {
        let name = self.advance();
        let op = self.advance();
        let value = if op.kind == TokenKind::Equal {
            self.evaluate()?
        } else {
            let current = self
                .variable(&name.lexeme)
                .map_err(|e| e.or_at(name.line, name.column))?;
            self.updated(&op, &current)?
        };
        self.define(&name, value, false)?;
        Ok(Flow::Normal)
    }

    /// New value for a compound assignment or increment of `current`.
    fn updated(&mut self, op: &Token, current: &Value) -> Result<Value, SusaError> {
        match op.kind {
            TokenKind::PlusPlus => Ok(Value::Number(current.to_number() + 1.0)),
            TokenKind::MinusMinus => Ok(Value::Number(current.to_number() - 1.0)),
            kind => {
                let rhs = self.evaluate()?;
                expr::binary(kind, current, &rhs).map_err(|e| e.or_at(op.line, op.column))
            }
        }
    }

    /// Whether the statement at the cursor assigns through `[index]` or
    /// `.property` accessors. Nothing is evaluated.
    fn is_target_assignment(&mut self) -> bool {
        let start = self.current;
        let assigns = self.skipping(|s| {
            s.advance();
            let mut accessors = 0;
            loop {
                if s.eat(TokenKind::LeftBracket) {
                    s.evaluate()?;
                    if !s.eat(TokenKind::RightBracket) {
                        return Ok(false);
                    }
                } else if s.check(TokenKind::Dot) && s.peek_at(2).kind != TokenKind::LeftParen {
                    s.current += 2;
                } else {
                    break;
                }
                accessors += 1;
            }
            let kind = s.peek().kind;
            Ok(accessors > 0
                && (kind == TokenKind::Equal
                    || kind.is_compound_assign()
                    || matches!(kind, TokenKind::PlusPlus | TokenKind::MinusMinus)))
        });
        self.current = start;
        assigns.unwrap_or(false)
    }

    fn slot(&mut self) -> Result<Slot, SusaError> {
        if self.eat(TokenKind::LeftBracket) {
            let index = self.evaluate()?;
            self.expect(TokenKind::RightBracket, "Expected ']' after index")?;
            return Ok(Slot::Index(index));
        }
        self.expect(TokenKind::Dot, "Expected '.' or '['")?;
        Ok(Slot::Property(self.advance().lexeme))
    }

    /// `a[i] = v`, `obj.field += v`, `grid[r][c]++` and similar.
    fn target_assignment(&mut self) -> Result<Flow, SusaError> {
        let name = self.advance();
        let mut container = self
            .variable(&name.lexeme)
            .map_err(|e| e.or_at(name.line, name.column))?;
        let mut at = self.peek().clone();
        let mut slot = self.slot()?;
        while self.check(TokenKind::LeftBracket) || self.check(TokenKind::Dot) {
            container = read_slot(&container, &slot).map_err(|e| e.or_at(at.line, at.column))?;
            at = self.peek().clone();
            slot = self.slot()?;
        }
        let op = self.advance();
        let value = if op.kind == TokenKind::Equal {
            self.evaluate()?
        } else {
            let current = read_slot(&container, &slot).map_err(|e| e.or_at(at.line, at.column))?;
            self.updated(&op, &current)?
        };
        write_slot(&container, slot, value).map_err(|e| e.or_at(at.line, at.column))?;
        Ok(Flow::Normal)
    }

    fn if_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let mut chosen = self.branch("if", true)?;
        loop {
            let resume = self.current;
            self.skip_newlines();
            let is_elif = if self.eat(TokenKind::Elif) {
                true
            } else if self.check(TokenKind::Else) && self.peek_at(1).kind == TokenKind::If {
                self.current += 2;
                true
            } else {
                false
            };
            if is_elif {
                let block = self.branch("elif", chosen.is_none())?;
                chosen = chosen.or(block);
                continue;
            }
            if self.eat(TokenKind::Else) {
                self.expect_header_end("else")?;
                let block = self.expect_block("else")?;
                chosen = chosen.or(Some(block));
            } else {
                self.current = resume;
            }
            break;
        }
        match chosen {
            Some(block) => self.run_block(&block),
            None => Ok(Flow::Normal),
        }
    }

    /// Condition, `:` and block of an `if`/`elif`. When `evaluate` is false
    /// the condition is only parsed.
    fn branch(&mut self, owner: &str, evaluate: bool) -> Result<Option<Block>, SusaError> {
        let taken = if evaluate {
            self.evaluate()?.is_truthy()
        } else {
            self.skip_expression()?;
            false
        };
        self.expect_header_end(&format!("{owner} condition"))?;
        let block = self.expect_block(owner)?;
        Ok(taken.then_some(block))
    }

    /// Run `body` while `next` says so, stopping silently after
    /// [`MAX_LOOP_ITERATIONS`] passes. The cursor ends where it was on entry.
    fn drive_loop(
        &mut self,
        body: &Block,
        mut next: impl FnMut(&mut Self) -> Result<bool, SusaError>,
    ) -> Result<Flow, SusaError> {
        let after = self.current;
        let mut passes = 0usize;
        let flow = loop {
            if passes == MAX_LOOP_ITERATIONS {
                let line = self.tokens.get(body.start).map_or(0, |t| t.line);
                tracing::warn!(limit = MAX_LOOP_ITERATIONS, line, "loop stopped at iteration ceiling");
                break Flow::Normal;
            }
            if !next(self)? {
                break Flow::Normal;
            }
            passes += 1;
            match self.run_block(body)? {
                Flow::Break => break Flow::Normal,
                Flow::Return(value) => break Flow::Return(value),
                Flow::Normal | Flow::Continue => {}
            }
        };
        self.current = after;
        Ok(flow)
    }

    /// `while cond:` and `loop while cond:`; the cursor is on the condition.
    fn conditional_loop(&mut self, owner: &str) -> Result<Flow, SusaError> {
        let condition = self.current;
        let mut first = Some(self.evaluate()?);
        self.expect_header_end(&format!("{owner} condition"))?;
        let body = self.expect_block(owner)?;
        self.drive_loop(&body, |s| {
            let test = match first.take() {
                Some(value) => value,
                None => {
                    s.current = condition;
                    s.evaluate()?
                }
            };
            Ok(test.is_truthy())
        })
    }

    /// `loop while cond:` or `loop [i [= start]] for N times:`.
    fn loop_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        if self.eat(TokenKind::While) {
            return self.conditional_loop("loop while");
        }
        let counter = if self.check(TokenKind::Identifier) {
            let name = self.advance();
            let start = if self.eat(TokenKind::Equal) {
                self.evaluate()?.to_number()
            } else {
                1.0
            };
            Some((name, start))
        } else {
            None
        };
        self.expect(TokenKind::For, "Expected 'for' or 'while' after 'loop'")?;
        let count = self.evaluate()?.to_number();
        self.expect(TokenKind::Times, "Expected 'times' after loop count")?;
        self.expect_header_end("loop header")?;
        let body = self.expect_block("loop")?;

        let mut pass = 0.0;
        self.drive_loop(&body, |s| {
            if pass >= count {
                return Ok(false);
            }
            if let Some((name, start)) = &counter {
                s.define(name, Value::Number(start + pass), false)?;
            }
            pass += 1.0;
            Ok(true)
        })
    }

    /// `do loop: START: ... END: while (cond):`. Body and condition run from
    /// standalone copies of their tokens.
    fn do_while_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        self.expect(TokenKind::Loop, "Expected 'loop' after 'do'")?;
        self.expect_header_end("do loop")?;
        let block = self.expect_block("do loop")?;
        self.skip_newlines();
        self.expect(TokenKind::While, "Expected 'while' after do loop block")?;
        self.expect(TokenKind::LeftParen, "Expected '(' after 'while'")?;
        let condition_start = self.current;
        self.skip_expression()?;
        let condition_end = self.current;
        self.expect(TokenKind::RightParen, "Expected ')' after do-while condition")?;
        self.eat(TokenKind::Colon);
        let after = self.current;

        let body = self.capture(block.start, block.end);
        let condition = self.capture(condition_start, condition_end);
        let whole = Block {
            start: 0,
            end: body.len().saturating_sub(1),
        };
        let mut first = true;
        let flow = self.with_buffer(body, 0, |s| {
            s.drive_loop(&whole, |s| {
                if std::mem::take(&mut first) {
                    return Ok(true);
                }
                let test = s.with_buffer(Rc::clone(&condition), 0, Self::evaluate)?;
                Ok(test.is_truthy())
            })
        })?;
        self.current = after;
        Ok(flow)
    }

    /// `for name in iterable:` over a snapshot of the iterable.
    fn for_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let var = self.expect(TokenKind::Identifier, "Expected loop variable after 'for'")?;
        self.expect(TokenKind::In, "Expected 'in' after loop variable")?;
        let iterable = self.evaluate()?;
        self.expect_header_end("for clause")?;
        let body = self.expect_block("for")?;
        let mut items = builtins::iteration_items(&iterable)
            .map_err(|e| e.or_at(var.line, var.column))?
            .into_iter();
        self.drive_loop(&body, |s| match items.next() {
            Some(item) => {
                s.define(&var, item, false)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Cases compare numerically; the first match runs, otherwise `default`.
    fn switch_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let subject = self.evaluate()?.to_number();
        self.expect_header_end("switch subject")?;
        let cases = self.expect_block("switch")?;
        let after = self.current;

        self.current = cases.start;
        let mut chosen = None;
        let mut fallback = None;
        loop {
            self.skip_separators();
            if self.current >= cases.end {
                break;
            }
            if self.eat(TokenKind::Case) {
                let matched = if chosen.is_none() {
                    self.evaluate()?.to_number() == subject
                } else {
                    self.skip_expression()?;
                    false
                };
                self.expect_header_end("case value")?;
                let block = self.expect_block("case")?;
                if matched {
                    chosen = Some(block);
                }
            } else if self.eat(TokenKind::Default) {
                self.expect_header_end("default")?;
                fallback = Some(self.expect_block("default")?);
            } else {
                return Err(self.syntax_error("Expected 'case' or 'default' in switch"));
            }
        }
        self.current = after;

        let flow = match chosen.or(fallback) {
            Some(block) => self.run_block(&block)?,
            None => Flow::Normal,
        };
        Ok(match flow {
            Flow::Break => Flow::Normal,
            other => other,
        })
    }

    fn function_declaration(&mut self) -> Result<Flow, SusaError> {
        let is_async = self.eat(TokenKind::Async);
        let (name, function) = self.function_definition(is_async, None)?;
        tracing::debug!(function = %name, params = function.params.len(), "define function");
        self.functions.insert(name, Rc::new(function));
        Ok(Flow::Normal)
    }

    /// `func name(a, b = expr, *rest): START: ... END:`. Defaults are
    /// evaluated now, in the current scope. Methods are named `Class.name`.
    fn function_definition(
        &mut self,
        is_async: bool,
        class: Option<&str>,
    ) -> Result<(String, FunctionDef), SusaError> {
        self.expect(TokenKind::Func, "Expected 'func'")?;
        let name = self.expect_identifier("Expected function name")?;
        self.expect(TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        let mut varargs = None;
        loop {
            self.skip_newlines();
            if self.check(TokenKind::RightParen) {
                break;
            }
            if self.eat(TokenKind::Star) {
                varargs = Some(self.expect_identifier("Expected name after '*'")?);
                self.skip_newlines();
                break;
            }
            let param = self.expect_identifier("Expected parameter name")?;
            let default = if self.eat(TokenKind::Equal) {
                Some(self.evaluate()?)
            } else {
                None
            };
            params.push(Param {
                name: param,
                default,
            });
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        let closing = if varargs.is_some() {
            "Varargs parameter must be last"
        } else {
            "Expected ')' after parameters"
        };
        self.expect(TokenKind::RightParen, closing)?;
        self.expect_header_end("function signature")?;
        let block = self.expect_block("function")?;

        let qualified = match class {
            Some(class) => format!("{class}.{name}"),
            None => name.clone(),
        };
        let function = FunctionDef {
            name: qualified,
            params,
            varargs,
            body: Body {
                tokens: Rc::clone(&self.tokens),
                start: block.start,
                end: block.end,
            },
            is_async,
        };
        Ok((name, function))
    }

    fn class_declaration(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let name = self.expect_identifier("Expected class name")?;
        self.expect_header_end("class name")?;
        let block = self.expect_block("class")?;
        let after = self.current;

        self.current = block.start;
        let mut methods = HashMap::new();
        loop {
            self.skip_separators();
            if self.current >= block.end {
                break;
            }
            let is_async = self.eat(TokenKind::Async);
            if !self.check(TokenKind::Func) {
                return Err(self.syntax_error("Expected method definition in class body"));
            }
            let (method, function) = self.function_definition(is_async, Some(&name))?;
            methods.insert(method, Rc::new(function));
        }
        self.current = after;

        tracing::debug!(class = %name, methods = methods.len(), "define class");
        self.classes
            .insert(name.clone(), Rc::new(ClassDef { name, methods }));
        Ok(Flow::Normal)
    }

    fn return_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let value = if self.at_statement_end() {
            Value::Null
        } else {
            self.evaluate()?
        };
        Ok(Flow::Return(value))
    }

    fn yield_statement(&mut self) -> Result<Flow, SusaError> {
        let keyword = self.advance();
        let value = if self.at_statement_end() {
            Value::Null
        } else {
            self.evaluate()?
        };
        match self.frames.last_mut() {
            Some(frame) => {
                frame.yielded.push(value);
                Ok(Flow::Normal)
            }
            None => Err(SusaError::syntax("'yield' outside function")
                .at(keyword.line, keyword.column)),
        }
    }

    /// A failure inside the try block binds its message to the catch
    /// variable (default `error`) and runs the handler.
    fn try_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        self.expect_header_end("try")?;
        let body = self.expect_block("try")?;
        self.skip_newlines();
        self.expect(TokenKind::Catch, "Expected 'catch' after try block")?;
        let name = if self.check(TokenKind::Identifier) {
            self.advance()
        } else {
            let at = self.peek();
            Token::new(TokenKind::Identifier, "error", at.line, at.column)
        };
        self.expect_header_end("catch")?;
        let handler = self.expect_block("catch")?;

        match self.run_block(&body) {
            Ok(flow) => Ok(flow),
            Err(err) => {
                tracing::debug!(kind = %err.kind, line = err.line, "caught");
                self.define(&name, Value::Str(err.message), false)?;
                self.run_block(&handler)
            }
        }
    }

    fn with_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let resource = self.evaluate()?;
        self.expect(TokenKind::As, "Expected 'as' after with expression")?;
        let name = self.expect(TokenKind::Identifier, "Expected name after 'as'")?;
        self.expect_header_end("with clause")?;
        let body = self.expect_block("with")?;
        self.define(&name, resource, false)?;
        self.run_block(&body)
    }

    /// The message is only evaluated when the assertion fails.
    fn assert_statement(&mut self) -> Result<Flow, SusaError> {
        let keyword = self.advance();
        let passed = self.evaluate()?.is_truthy();
        let mut message = None;
        if self.eat(TokenKind::Comma) {
            if passed {
                self.skip_expression()?;
            } else {
                message = Some(self.evaluate()?.to_string());
            }
        }
        if passed {
            return Ok(Flow::Normal);
        }
        let message = match message {
            Some(text) => format!("Assertion failed: {text}"),
            None => "Assertion failed".to_string(),
        };
        Err(SusaError::runtime(message).at(keyword.line, keyword.column))
    }

    /// `static name = expr`: initialised on the first execution in a given
    /// function; later executions rebind the stored value.
    fn static_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let name = self.expect(TokenKind::Identifier, "Expected variable name after 'static'")?;
        self.expect(TokenKind::Equal, "Expected '=' after static variable name")?;
        let owner = self
            .frames
            .last()
            .map_or("<main>", |frame| frame.function.as_str());
        let key = static_key(owner, &name.lexeme);
        let value = match self.statics.get(&key).cloned() {
            Some(stored) => {
                self.skip_expression()?;
                stored
            }
            None => {
                let initial = self.evaluate()?;
                self.statics.insert(key, initial.clone());
                initial
            }
        };
        if let Some(frame) = self.frames.last_mut() {
            if !frame.statics.contains(&name.lexeme) {
                frame.statics.push(name.lexeme.clone());
            }
        }
        self.define(&name, value, false)?;
        Ok(Flow::Normal)
    }

    /// Members number from 0; an explicit value restarts numbering after it.
    fn enum_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let name = self.expect_identifier("Expected enum name")?;
        self.expect_header_end("enum name")?;
        let block = self.expect_block("enum")?;
        let after = self.current;

        self.current = block.start;
        let mut members = HashMap::new();
        let mut next = 0.0;
        loop {
            loop {
                self.skip_separators();
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            if self.current >= block.end {
                break;
            }
            let member = self.expect_identifier("Expected enum member name")?;
            let value = if self.eat(TokenKind::Equal) {
                self.evaluate()?.to_number()
            } else {
                next
            };
            members.insert(member, Value::Number(value));
            next = value.trunc() + 1.0;
        }
        self.current = after;

        self.enums.insert(name, members);
        Ok(Flow::Normal)
    }

    /// `add module [as alias]`.
    fn import_statement(&mut self) -> Result<Flow, SusaError> {
        self.advance();
        let module = self.expect(TokenKind::Identifier, "Expected module name after 'add'")?;
        let alias = if self.eat(TokenKind::As) {
            self.expect_identifier("Expected alias after 'as'")?
        } else {
            module.lexeme.clone()
        };
        if !self.modules.has_module(&module.lexeme) {
            return Err(SusaError::import(format!("Module '{}' not found", module.lexeme))
                .at(module.line, module.column));
        }
        tracing::debug!(module = %module.lexeme, alias = %alias, "import");
        self.imports.retain(|(existing, _)| existing != &alias);
        self.imports.push((alias, module.lexeme));
        Ok(Flow::Normal)
    }
}

fn read_slot(container: &Value, slot: &Slot) -> Result<Value, SusaError> {
    match slot {
        Slot::Index(index) => builtins::index(container, index),
        Slot::Property(name) => expr::property(container, name),
    }
}

fn write_slot(container: &Value, slot: Slot, value: Value) -> Result<(), SusaError> {
    match slot {
        Slot::Index(index) => builtins::store_index(container, &index, value),
        Slot::Property(name) => match container {
            Value::Instance(instance) => {
                instance.borrow_mut().properties.insert(name, value);
                Ok(())
            }
            Value::Dict(entries) => {
                entries.borrow_mut().insert(name, value);
                Ok(())
            }
            other => Err(SusaError::attribute(format!(
                "Cannot set attribute '{name}' on a {}",
                other.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn run(source: &str) -> Vec<String> {
        let mut interp = Interpreter::new();
        interp.run(source).expect("program should succeed");
        interp.output().to_vec()
    }

    fn run_err(source: &str) -> SusaError {
        let mut interp = Interpreter::new();
        interp.run(source).unwrap_err()
    }

    #[test]
    fn while_counts_down() {
        let source = "let x = 5\nwhile x > 0:\nSTART:\nprint x\nx = x - 1\nEND:";
        assert_eq!(run(source), vec!["5", "4", "3", "2", "1"]);
    }

    #[test]
    fn switch_runs_only_matching_case() {
        let source = "switch 2: START: case 1: START: print \"one\" END: case 2: START: print \"two\" END: default: START: print \"other\" END: END:";
        assert_eq!(run(source), vec!["two"]);
    }

    #[rstest]
    #[case("switch 9: START:\ncase 1: START: print 1 END:\ndefault: START: print \"d\" END:\nEND:", "d")]
    #[case("switch 1: START:\ndefault: START: print \"d\" END:\ncase 1: START: print \"one\" END:\nEND:", "one")]
    #[case("switch \"2\": START:\ncase 2: START: print \"coerced\" END:\nEND:", "coerced")]
    fn switch_defaults_and_coercion(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[test]
    fn break_inside_case_ends_switch_only() {
        let source = "\
let i = 0
while i < 2:
START:
    switch i: START:
        case 0: START:
            print \"zero\"
            break
            print \"unreachable\"
        END:
    END:
    print rt\"after {i}\"
    i += 1
END:";
        assert_eq!(run(source), vec!["zero", "after 0", "after 1"]);
    }

    #[test]
    fn undefined_call_is_name_error() {
        let err = run_err("mystery()");
        assert_eq!(err.kind, ErrorKind::Name);
        assert!(err.message.contains("mystery"));
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn try_catches_zero_division() {
        let source = "try: START: print 1/0 END: catch e: START: print e END:";
        assert_eq!(run(source), vec!["Division by zero"]);
    }

    #[test]
    fn catch_variable_defaults_to_error() {
        let source = "try: START:\nlet l = [1]\nprint l[3]\nEND:\ncatch: START:\nprint error\nEND:\nprint \"done\"";
        assert_eq!(run(source), vec!["List index out of range: 3 (size: 1)", "done"]);
    }

    #[test]
    fn failure_inside_function_is_caught_by_caller() {
        let source = "\
func bad():
START:
    let x = 1
    return nope
END:
try: START:
    bad()
END: catch e: START:
    print e
END:
print \"still running\"";
        assert_eq!(run(source), vec!["Name 'nope' is not defined", "still running"]);
    }

    #[rstest]
    #[case("if 1 > 2:\nSTART:\nprint \"a\"\nEND:\nelif 2 > 1:\nSTART:\nprint \"b\"\nEND:\nelse:\nSTART:\nprint \"c\"\nEND:", "b")]
    #[case("if 0: START: print \"a\" END: else: START: print \"c\" END:", "c")]
    #[case("if 0: START: print \"a\" END: else if 1: START: print \"d\" END:", "d")]
    #[case("if 1: START: print \"a\" END: elif boom(): START: print \"b\" END:", "a")]
    fn conditionals(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[test]
    fn nested_blocks() {
        let source = "\
for i in range(3):
START:
    if i % 2 == 0:
    START:
        for j in [\"a\", \"b\"]:
        START:
            print i, j
        END:
    END:
END:";
        assert_eq!(run(source), vec!["0 a", "0 b", "2 a", "2 b"]);
    }

    #[rstest]
    #[case("loop for 3 times: START: print \"hi\" END:", vec!["hi", "hi", "hi"])]
    #[case("loop i for 3 times: START: print i END:", vec!["1", "2", "3"])]
    #[case("loop i = 0 for 2 times: START: print i END:", vec!["0", "1"])]
    #[case("let n = 2\nloop while n > 0: START: print n\nn-- END:", vec!["2", "1"])]
    #[case("let n = 0\ndo loop: START:\nprint n\nn++\nEND:\nwhile (n < 3):", vec!["0", "1", "2"])]
    #[case("let n = 10\ndo loop: START: print n END: while (n < 3):", vec!["10"])]
    fn loop_forms(#[case] source: &str, #[case] expected: Vec<&str>) {
        assert_eq!(run(source), expected);
    }

    #[test]
    fn break_and_continue() {
        let source = "\
for i in range(10):
START:
    if i == 2: START: continue END:
    if i == 5: START: break END:
    print i
END:";
        assert_eq!(run(source), vec!["0", "1", "3", "4"]);
    }

    #[test]
    fn do_while_break_and_function_definition_in_body() {
        let source = "\
let n = 0
do loop:
START:
    func twice(x): START: return x * 2 END:
    n++
    if n == 3: START: break END:
END:
while (true):
print twice(n)";
        assert_eq!(run(source), vec!["6"]);
    }

    #[test]
    fn loop_ceiling_stops_silently() {
        let source = "let n = 0\nwhile true: START: n++ END:\nprint n";
        assert_eq!(run(source), vec![MAX_LOOP_ITERATIONS.to_string()]);
    }

    #[rstest]
    #[case("break", "'break' outside loop")]
    #[case("print 1\ncontinue", "'continue' outside loop")]
    #[case("func f(): START: break END:\nfor i in [1]: START: f() END:", "'break' outside loop")]
    fn stray_jumps_are_syntax_errors(#[case] source: &str, #[case] message: &str) {
        let err = run_err(source);
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, message);
    }

    #[test]
    fn top_level_return_ends_program() {
        assert_eq!(run("print 1\nreturn\nprint 2"), vec!["1"]);
    }

    #[test]
    fn yield_outside_function() {
        let err = run_err("yield 1");
        assert_eq!(err.kind, ErrorKind::Syntax);
    }

    #[test]
    fn default_parameters() {
        let source = "\
func plus(a, b = 10): START: return a + b END:
print plus(1)
print plus(1, 2)";
        assert_eq!(run(source), vec!["11", "3"]);
        let err = run_err("func plus(a, b = 10): START: return a + b END:\nplus(1, 2, 3)");
        assert_eq!(err.kind, ErrorKind::Argument);
        assert!(err.message.contains("1 to 2 arguments"), "{}", err.message);
    }

    #[test]
    fn varargs_and_spread() {
        let source = "\
func total(first, *rest):
START:
    let sum = first
    for n in rest: START: sum += n END:
    return sum
END:
let more = [2, 3, 4]
print total(1, ...more)
print total(5)";
        assert_eq!(run(source), vec!["10", "5"]);
    }

    #[test]
    fn generators_collect_yields_in_order() {
        let source = "\
func count(limit):
START:
    let i = 0
    while i < limit: START:
        yield i * 10
        i++
    END:
    return \"ignored\"
END:
let g = count(3)
print type(g)
print g.next()
for v in g: START: print v END:
print g.next()
g.reset()
print g.next()";
        assert_eq!(run(source), vec!["generator", "0", "10", "20", "null", "0"]);
    }

    #[test]
    fn functions_see_globals_not_caller_locals() {
        let source = "\
let g = \"global\"
func show(): START: return g END:
func outer():
START:
    let g = \"local\"
    return show()
END:
print outer()";
        assert_eq!(run(source), vec!["global"]);
        let err = run_err("func peek(): START: return secret END:\nfunc outer(): START:\nlet secret = 1\nreturn peek()\nEND:\nouter()");
        assert_eq!(err.kind, ErrorKind::Name);
    }

    #[test]
    fn assignment_in_function_is_local() {
        let source = "let n = 1\nfunc bump(): START: n = n + 1\nreturn n END:\nprint bump()\nprint n";
        assert_eq!(run(source), vec!["2", "1"]);
    }

    #[test]
    fn recursion() {
        let source = "func fact(n): START:\nif n <= 1: START: return 1 END:\nreturn n * fact(n - 1)\nEND:\nprint fact(10)";
        assert_eq!(run(source), vec!["3628800"]);
    }

    #[test]
    fn runaway_recursion_is_runtime_error() {
        let err = run_err("func down(n): START: return down(n + 1) END:\ndown(0)");
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert!(err.message.contains("call depth"));
    }

    #[test]
    fn recursion_through_nested_blocks() {
        let source = "\
func dive(n):
START:
    if n == 0: START: return 0 END:
    let total = 0
    for i in [1]:
    START:
        try:
        START:
            let k = 0
            while k < 1:
            START:
                total = [dive(n - 1) for j in [1]][0] + 1
                k++
            END:
        END:
        catch e:
        START:
            total = -1
        END:
    END:
    return total
END:
print dive(150)";
        assert_eq!(run(source), vec!["150"]);
    }

    #[test]
    fn deeply_nested_expressions() {
        let parens = format!("print {}1{}", "(".repeat(3000), ")".repeat(3000));
        assert_eq!(run(&parens), vec!["1"]);
        let lists = format!("print {}{}", "[".repeat(1000), "]".repeat(1000));
        assert_eq!(run(&lists), vec![format!("{}{}", "[".repeat(1000), "]".repeat(1000))]);
        let negations = format!("print {}5", "- ".repeat(2000));
        assert_eq!(run(&negations), vec!["5"]);
    }

    #[test]
    fn list_can_remove_itself_only_by_value() {
        let source = "\
let a = [[1]]
try: START: a.remove(a) END: catch e: START: print e END:
a.remove([1])
print a";
        assert_eq!(run(source), vec!["Value not found in list", "[]"]);
    }

    #[rstest]
    #[case("let a = [1]\na.push(a)\nprint a", "[1, [...]]")]
    #[case("let d = {\"k\": 1}\nd[\"self\"] = d\nprint d", "{k: 1, self: {...}}")]
    #[case("let a = [1]\nlet d = {\"a\": a}\na.push(d)\nprint a", "[1, {a: [...]}]")]
    #[case("let a = []\na.push(a)\nprint str(a) + \"!\"", "[[...]]!")]
    fn self_referential_values_print(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[test]
    fn self_referential_json_is_value_error() {
        let err = run_err("add json_utils\nlet a = [1]\na.push(a)\nprint json_utils.stringify(a)");
        assert_eq!(err.kind, ErrorKind::Value);
    }

    #[test]
    fn const_cannot_be_reassigned() {
        let err = run_err("const LIMIT = 3\nLIMIT = 4");
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!((err.line, err.column), (2, 1));
        assert_eq!(run("let x = 3\nx = 4\nprint x"), vec!["4"]);
    }

    #[rstest]
    #[case("let [a, b, c] = [1, 2]\nprint a, b, c", "1 2 null")]
    #[case("let a, b = [7, 8]\nprint a, b", "7 8")]
    #[case("let a, b = 0\nprint a, b", "0 0")]
    #[case("int count = 4\nstring name = \"x\"\nprint name, count", "x 4")]
    #[case("let nothing\nprint nothing", "null")]
    fn declarations(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[rstest]
    #[case("let x = 5\nx += 2\nx *= 3\nx -= 1\nx /= 4\nprint x", "5")]
    #[case("let x = 7\nx %= 4\nx **= 2\nprint x", "9")]
    #[case("let s = \"a\"\ns += 1\nprint s", "a1")]
    #[case("let i = 1\ni++\ni++\ni--\nprint i", "2")]
    #[case("let l = [1, 2]\nl[0] = 9\nl[1] += 5\nprint l", "[9, 7]")]
    #[case("let d = {\"a\": 1}\nd[\"b\"] = 2\nd.a += 10\nprint d", "{a: 11, b: 2}")]
    #[case("let grid = [[0, 0], [0, 0]]\ngrid[1][0] = 5\ngrid[1][0]++\nprint grid", "[[0, 0], [6, 0]]")]
    fn assignments(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[rstest]
    #[case("let x = 1\nx /= 0", ErrorKind::ZeroDivision)]
    #[case("let l = [1]\nl[4] = 2", ErrorKind::Index)]
    #[case("let s = \"ab\"\ns[0] = \"c\"", ErrorKind::Type)]
    #[case("let n = 3\nn.x = 1", ErrorKind::Attribute)]
    #[case("y += 1", ErrorKind::Name)]
    fn assignment_failures(#[case] source: &str, #[case] kind: ErrorKind) {
        assert_eq!(run_err(source).kind, kind);
    }

    #[test]
    fn shared_lists_mutate_through_aliases() {
        let source = "let a = [1]\nlet b = a\nb.push(2)\nprint a\nfunc grow(l): START: l.append(3) END:\ngrow(a)\nprint b";
        assert_eq!(run(source), vec!["[1, 2]", "[1, 2, 3]"]);
    }

    #[test]
    fn classes_and_methods() {
        let source = "\
class Counter:
START:
    func __init__(self, initial = 0):
    START:
        self.count = initial
    END:
    func inc(self, n):
    START:
        self.count += n
        return self
    END:
END:
let c = Counter(5)
c.inc(2).inc(3)
print c.count
print c
print Counter().count";
        assert_eq!(run(source), vec!["10", "<Counter instance>", "0"]);
    }

    #[rstest]
    #[case("class A: START: func f(self): START: return 1 END: END:\nA().g()", ErrorKind::Attribute)]
    #[case("class A: START: func f(self): START: return 1 END: END:\nprint A().missing", ErrorKind::Attribute)]
    #[case("class A: START: func f(self): START: return 1 END: END:\nA(1)", ErrorKind::Argument)]
    #[case("class A: START: print 1 END:", ErrorKind::Syntax)]
    fn class_failures(#[case] source: &str, #[case] kind: ErrorKind) {
        assert_eq!(run_err(source).kind, kind);
    }

    #[test]
    fn lambdas_see_caller_scope() {
        let source = "\
let factor = 3
let triple = lambda x: x * factor
print triple(4)
let apply = lambda f, v: f(v)
print apply(triple, 2)
let pick = lambda n: n > 0 ? \"pos\" : \"neg\"
print pick(-1)";
        assert_eq!(run(source), vec!["12", "6", "neg"]);
    }

    #[test]
    fn lambda_body_stops_at_comma_and_bracket() {
        let source = "let fs = [lambda x: x + 1, lambda x: x * 2]\nprint fs[1](5), len(fs)";
        assert_eq!(run(source), vec!["10 2"]);
    }

    #[test]
    fn templates_interpolate_variables() {
        let source = "let name = \"Ada\"\nlet n = 3\nprint rt\"Hello {name}, you have { n } items\"";
        assert_eq!(run(source), vec!["Hello Ada, you have 3 items"]);
        let err = run_err("print rt\"{ghost}\"");
        assert_eq!(err.kind, ErrorKind::Name);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn enums() {
        let source = "\
enum Color:
START:
    RED
    GREEN = 5
    BLUE
END:
print Color.RED, Color.GREEN, Color.BLUE";
        assert_eq!(run(source), vec!["0 5 6"]);
        let err = run_err("enum E: START: A END:\nprint E.B");
        assert_eq!(err.kind, ErrorKind::Attribute);
    }

    #[test]
    fn statics_persist_between_calls() {
        let source = "\
func tick():
START:
    static calls = 0
    calls += 1
    return calls
END:
tick()
tick()
print tick()";
        assert_eq!(run(source), vec!["3"]);
    }

    #[test]
    fn statics_are_shared_by_recursive_activations() {
        let source = "\
func count(n):
START:
    static c = 0
    c += 1
    if n > 0: START: count(n - 1) END:
    return c
END:
count(2)
print count(-1)";
        assert_eq!(run(source), vec!["4"]);
    }

    #[test]
    fn top_level_static_keeps_assigned_value() {
        let source = "\
loop for 3 times:
START:
    static seen = 0
    seen += 1
END:
print seen";
        assert_eq!(run(source), vec!["3"]);
    }

    #[test]
    fn with_and_assert() {
        assert_eq!(run("with [1, 2] as pair: START: print pair[1] END:"), vec!["2"]);
        assert!(run("assert 1 == 1, missing_name").is_empty());
        let err = run_err("let x = 2\nassert x == 3, rt\"x was {x}\"");
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.message, "Assertion failed: x was 2");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn modules_and_prelude() {
        let source = "\
add math_utils as m
add string_utils
print m.sqrt(16)
print m.PI > 3
print string_utils.upper(\"hi\")
print factorial(5)
print PI > 3";
        assert_eq!(run(source), vec!["4", "true", "HI", "120", "true"]);
    }

    #[rstest]
    #[case("print SQRT(16)", "4")]
    #[case("print Len([1, 2])", "2")]
    #[case("print Factorial(4)", "24")]
    #[case("print CAPITALIZE(\"susa\")", "Susa")]
    #[case("func Twice(x): START: return x * 2 END:\nprint Twice(3)", "6")]
    fn builtin_names_ignore_case(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(run(source), vec![expected]);
    }

    #[rstest]
    #[case("add nonexistent", ErrorKind::Import)]
    #[case("add math_utils\nmath_utils.nothing()", ErrorKind::Attribute)]
    #[case("add math_utils\nprint math_utils.TAU", ErrorKind::Attribute)]
    fn module_failures(#[case] source: &str, #[case] kind: ErrorKind) {
        assert_eq!(run_err(source).kind, kind);
    }

    #[test]
    fn async_and_await_run_inline() {
        let source = "async func fetch(): START: return 42 END:\nlet v = await fetch()\nprint v";
        assert_eq!(run(source), vec!["42"]);
    }

    #[rstest]
    #[case("print 1 2", 1, 9)]
    #[case("let = 3", 1, 5)]
    #[case("if 1 START: print 1 END:", 1, 6)]
    #[case("while 1:\nprint 1", 2, 1)]
    #[case("if 1:\nSTART:\nprint 1\n", 2, 1)]
    #[case("print \"open", 1, 7)]
    fn syntax_errors_are_located(#[case] source: &str, #[case] line: usize, #[case] column: usize) {
        let err = run_err(source);
        assert_eq!(err.kind, ErrorKind::Syntax, "{}", err.message);
        assert_eq!((err.line, err.column), (line, column), "{}", err.message);
    }

    #[test]
    fn bare_print_emits_empty_line() {
        assert_eq!(run("print\nprint 1; print 2"), vec!["", "1", "2"]);
    }

    #[test]
    fn run_resets_state_but_run_additional_keeps_it() {
        let mut interp = Interpreter::new();
        interp.run("let x = 1\nfunc f(): START: return 7 END:").unwrap();
        interp.run_additional("print x + f()").unwrap();
        assert_eq!(interp.output(), ["8"]);
        let err = interp.run("print x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert!(interp.output().is_empty());
    }

    #[test]
    fn execute_appends_rendered_error() {
        let text = Interpreter::new().execute("print \"before\"\nprint missing");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "before");
        assert_eq!(lines[1], "[NameError] Line 2, Col 7: Name 'missing' is not defined");
        assert_eq!(Interpreter::new().execute("print 1\nprint 2"), "1\n2");
    }

    #[test]
    fn writer_receives_lines_as_printed() {
        #[derive(Clone, Default)]
        struct Shared(Rc<RefCell<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.borrow_mut().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let sink = Shared::default();
        let mut interp = Interpreter::new().with_writer(Box::new(sink.clone()));
        interp.run("print \"a\"\nprint 2").unwrap();
        assert_eq!(String::from_utf8(sink.0.borrow().clone()).unwrap(), "a\n2\n");
    }
}
