//! Expression evaluation by precedence climbing over the token cursor.
//!
//! Tiers, loosest first: `or`, ternary, `and`, `not`, comparison, `|`, `^`,
//! `&`, shifts, `+ -`, `* / %`, `**` (right-associative), unary `- ~`, then
//! postfix chains over primaries.
//!
//! Every tier honours skip mode: while `skip_mode` is set the cursor moves
//! over a well-formed expression but nothing is resolved, computed or called,
//! and the result is `Null`. Short-circuit operators, the untaken ternary arm
//! and list comprehensions rely on it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::environment::Environment;
use crate::interpreter::value::{Lambda, Value};
use crate::interpreter::{Interpreter, builtins, stack};
use crate::scanner::token::{Token, TokenKind};

type Tier = fn(&mut Interpreter) -> Result<Value, SusaError>;

/// Apply a binary or compound-assignment operator to two values.
pub(crate) fn binary(op: TokenKind, left: &Value, right: &Value) -> Result<Value, SusaError> {
    use TokenKind::*;

    if matches!(op, Plus | PlusEqual) && (left.as_str().is_some() || right.as_str().is_some()) {
        return Ok(Value::Str(format!("{left}{right}")));
    }
    let (a, b) = (left.to_number(), right.to_number());
    let int = |x: f64| x as i64;
    let value = match op {
        Plus | PlusEqual => Value::Number(a + b),
        Minus | MinusEqual => Value::Number(a - b),
        Star | StarEqual => Value::Number(a * b),
        Slash | SlashEqual => {
            if b == 0.0 {
                return Err(SusaError::zero_division("Division by zero"));
            }
            Value::Number(a / b)
        }
        Percent | PercentEqual => {
            if b == 0.0 {
                return Err(SusaError::zero_division("Modulo by zero"));
            }
            Value::Number(a % b)
        }
        Power | PowerEqual => Value::Number(a.powf(b)),
        EqualEqual => Value::Bool(a == b),
        BangEqual => Value::Bool(a != b),
        Less => Value::Bool(a < b),
        LessEqual => Value::Bool(a <= b),
        Greater => Value::Bool(a > b),
        GreaterEqual => Value::Bool(a >= b),
        Pipe => Value::Number((int(a) | int(b)) as f64),
        Caret => Value::Number((int(a) ^ int(b)) as f64),
        Ampersand => Value::Number((int(a) & int(b)) as f64),
        ShiftLeft => Value::Number(int(a).wrapping_shl(int(b) as u32) as f64),
        ShiftRight => Value::Number(int(a).wrapping_shr(int(b) as u32) as f64),
        other => {
            return Err(SusaError::syntax(format!("'{other}' is not a binary operator")));
        }
    };
    Ok(value)
}

impl Interpreter {
    pub(crate) fn evaluate(&mut self) -> Result<Value, SusaError> {
        stack::ensure_sufficient_stack(|| self.or_expr())
    }

    fn or_expr(&mut self) -> Result<Value, SusaError> {
        let mut left = self.ternary()?;
        while self.eat(TokenKind::Or) {
            self.skip_newlines();
            if self.skip_mode {
                self.ternary()?;
            } else if left.is_truthy() {
                self.skipping(Self::ternary)?;
                left = Value::Bool(true);
            } else {
                left = Value::Bool(self.ternary()?.is_truthy());
            }
        }
        Ok(left)
    }

    fn ternary(&mut self) -> Result<Value, SusaError> {
        let condition = self.and_expr()?;
        if !self.eat(TokenKind::Question) {
            return Ok(condition);
        }
        let take_then = !self.skip_mode && condition.is_truthy();
        let take_else = !self.skip_mode && !condition.is_truthy();
        let then = self.arm(take_then, Self::evaluate)?;
        self.expect(TokenKind::Colon, "Expected ':' in conditional expression")?;
        let otherwise = stack::ensure_sufficient_stack(|| self.arm(take_else, Self::ternary))?;
        Ok(if take_then { then } else { otherwise })
    }

    fn arm(&mut self, taken: bool, tier: Tier) -> Result<Value, SusaError> {
        if taken { tier(self) } else { self.skipping(tier) }
    }

    fn and_expr(&mut self) -> Result<Value, SusaError> {
        let mut left = self.not_expr()?;
        while self.eat(TokenKind::And) {
            self.skip_newlines();
            if self.skip_mode {
                self.not_expr()?;
            } else if !left.is_truthy() {
                self.skipping(Self::not_expr)?;
                left = Value::Bool(false);
            } else {
                left = Value::Bool(self.not_expr()?.is_truthy());
            }
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Value, SusaError> {
        if self.eat(TokenKind::Not) || self.eat(TokenKind::Bang) {
            let operand = stack::ensure_sufficient_stack(|| self.not_expr())?;
            return Ok(self.unless_skipping(|| Value::Bool(!operand.is_truthy())));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, SusaError> {
        use TokenKind::*;
        self.left_assoc(
            &[EqualEqual, BangEqual, Less, LessEqual, Greater, GreaterEqual],
            Self::bit_or,
        )
    }

    fn bit_or(&mut self) -> Result<Value, SusaError> {
        self.left_assoc(&[TokenKind::Pipe], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Result<Value, SusaError> {
        self.left_assoc(&[TokenKind::Caret], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Value, SusaError> {
        self.left_assoc(&[TokenKind::Ampersand], Self::shift)
    }

    fn shift(&mut self) -> Result<Value, SusaError> {
        self.left_assoc(&[TokenKind::ShiftLeft, TokenKind::ShiftRight], Self::additive)
    }

    fn additive(&mut self) -> Result<Value, SusaError> {
        self.left_assoc(&[TokenKind::Plus, TokenKind::Minus], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Value, SusaError> {
        use TokenKind::*;
        self.left_assoc(&[Star, Slash, Percent], Self::power)
    }

    fn left_assoc(&mut self, ops: &[TokenKind], next: Tier) -> Result<Value, SusaError> {
        let mut left = next(self)?;
        while ops.contains(&self.peek().kind) {
            let op = self.advance();
            let right = next(self)?;
            left = self.apply(&op, &left, &right)?;
        }
        Ok(left)
    }

    fn power(&mut self) -> Result<Value, SusaError> {
        let base = self.unary()?;
        if self.check(TokenKind::Power) {
            let op = self.advance();
            let exponent = stack::ensure_sufficient_stack(|| self.power())?;
            return self.apply(&op, &base, &exponent);
        }
        Ok(base)
    }

    fn apply(&self, op: &Token, left: &Value, right: &Value) -> Result<Value, SusaError> {
        if self.skip_mode {
            return Ok(Value::Null);
        }
        binary(op.kind, left, right).map_err(|e| e.or_at(op.line, op.column))
    }

    fn unless_skipping(&self, f: impl FnOnce() -> Value) -> Value {
        if self.skip_mode { Value::Null } else { f() }
    }

    fn unary(&mut self) -> Result<Value, SusaError> {
        if self.eat(TokenKind::Minus) {
            let operand = stack::ensure_sufficient_stack(|| self.unary())?;
            return Ok(self.unless_skipping(|| Value::Number(-operand.to_number())));
        }
        if self.eat(TokenKind::Tilde) {
            let operand = stack::ensure_sufficient_stack(|| self.unary())?;
            return Ok(self.unless_skipping(|| Value::Number(!(operand.to_number() as i64) as f64)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Value, SusaError> {
        let mut value = self.primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let member = self.member_name()?;
                    value = if self.check(TokenKind::LeftParen) {
                        let args = self.arguments()?;
                        if self.skip_mode {
                            Value::Null
                        } else {
                            self.invoke_method(&value, &member.lexeme, args)
                                .map_err(|e| e.or_at(member.line, member.column))?
                        }
                    } else if self.skip_mode {
                        Value::Null
                    } else {
                        property(&value, &member.lexeme)
                            .map_err(|e| e.or_at(member.line, member.column))?
                    };
                }
                TokenKind::LeftBracket => {
                    let open = self.advance();
                    let index = self.evaluate()?;
                    self.expect(TokenKind::RightBracket, "Expected ']' after index")?;
                    if !self.skip_mode {
                        value = builtins::index(&value, &index)
                            .map_err(|e| e.or_at(open.line, open.column))?;
                    }
                }
                TokenKind::LeftParen => {
                    let open = self.peek().clone();
                    let args = self.arguments()?;
                    if self.skip_mode {
                        continue;
                    }
                    value = match &value {
                        Value::Lambda(lambda) => self.call_lambda(lambda, args),
                        other => Err(SusaError::type_error(format!(
                            "'{}' object is not callable",
                            other.type_name()
                        ))),
                    }
                    .map_err(|e| e.or_at(open.line, open.column))?;
                }
                _ => return Ok(value),
            }
        }
    }

    /// A member name after `.`; keywords are allowed (`items.add`).
    fn member_name(&mut self) -> Result<Token, SusaError> {
        let token = self.peek();
        let word = token.kind == TokenKind::Identifier
            || (!matches!(token.kind, TokenKind::String | TokenKind::Template)
                && token
                    .lexeme
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_alphabetic() || c == '_'));
        if !word {
            return Err(self.syntax_error("Expected member name after '.'"));
        }
        Ok(self.advance())
    }

    /// Parse a parenthesised argument list, splicing `...list` spreads.
    pub(crate) fn arguments(&mut self) -> Result<Vec<Value>, SusaError> {
        self.expect(TokenKind::LeftParen, "Expected '('")?;
        let mut args = Vec::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::RightParen) {
                break;
            }
            if self.check(TokenKind::Ellipsis) {
                let spread = self.advance();
                let value = self.evaluate()?;
                if !self.skip_mode {
                    match value {
                        Value::List(items) => args.extend(items.borrow().iter().cloned()),
                        other => {
                            return Err(SusaError::type_error(format!(
                                "Cannot spread a {} into call arguments",
                                other.type_name()
                            ))
                            .at(spread.line, spread.column));
                        }
                    }
                }
            } else {
                args.push(self.evaluate()?);
            }
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "Expected ')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Value, SusaError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number => token.lexeme.parse().map(Value::Number).map_err(|_| {
                SusaError::syntax(format!("Invalid number '{}'", token.lexeme))
                    .at(token.line, token.column)
            }),
            TokenKind::String => Ok(Value::Str(token.lexeme)),
            TokenKind::Template if self.skip_mode => Ok(Value::Null),
            TokenKind::Template => self.interpolate(&token),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::Null => Ok(Value::Null),
            TokenKind::Identifier => self.identifier(&token),
            TokenKind::LeftParen => {
                self.skip_newlines();
                let value = self.evaluate()?;
                self.skip_newlines();
                self.expect(TokenKind::RightParen, "Expected ')' after expression")?;
                Ok(value)
            }
            TokenKind::LeftBracket => self.list_literal(),
            TokenKind::LeftBrace => self.dict_literal(),
            TokenKind::Lambda => self.lambda_literal(),
            TokenKind::Await => self.unary(),
            kind if conversion_name(kind).is_some() && self.check(TokenKind::LeftParen) => {
                let args = self.arguments()?;
                if self.skip_mode {
                    return Ok(Value::Null);
                }
                let name = conversion_name(kind).unwrap_or("str");
                self.call_named(name, args)
                    .map_err(|e| e.or_at(token.line, token.column))
            }
            _ => {
                let shown = match token.kind {
                    TokenKind::Eof => "end of input".to_string(),
                    TokenKind::Newline => "end of line".to_string(),
                    _ => format!("'{}'", token.lexeme),
                };
                Err(SusaError::syntax(format!("Unexpected {shown} in expression"))
                    .at(token.line, token.column))
            }
        }
    }

    fn identifier(&mut self, token: &Token) -> Result<Value, SusaError> {
        let name = token.lexeme.as_str();
        let locate = |e: SusaError| e.or_at(token.line, token.column);

        if self.check(TokenKind::LeftParen) {
            let args = self.arguments()?;
            if self.skip_mode {
                return Ok(Value::Null);
            }
            return self.call_named(name, args).map_err(locate);
        }
        if self.skip_mode {
            return Ok(Value::Null);
        }
        if self.check(TokenKind::Dot) {
            if let Some(members) = self.enums.get(name) {
                let members = members.clone();
                self.advance();
                let member = self.member_name()?;
                return members.get(&member.lexeme).cloned().ok_or_else(|| {
                    SusaError::attribute(format!(
                        "Enum '{name}' has no member '{}'",
                        member.lexeme
                    ))
                    .at(member.line, member.column)
                });
            }
            let variable = self.environment.borrow().get(name);
            if let Some(value) = variable {
                return Ok(value);
            }
            if let Some(module) = self.module_for_alias(name) {
                self.advance();
                let member = self.member_name()?;
                return self
                    .module_member(&module, &member.lexeme)
                    .map_err(|e| e.or_at(member.line, member.column));
            }
            return Err(locate(SusaError::undefined_name(name)));
        }
        self.variable(name).map_err(locate)
    }

    /// Bare name read: variables first, then constants of imported modules.
    pub(crate) fn variable(&self, name: &str) -> Result<Value, SusaError> {
        if let Some(value) = self.environment.borrow().get(name) {
            return Ok(value);
        }
        self.imports
            .iter()
            .find_map(|(_, module)| self.modules.lookup_constant(module, name))
            .ok_or_else(|| SusaError::undefined_name(name))
    }

    /// `alias.member` or `alias.member(args)` on an imported module; the
    /// cursor sits after the member name.
    fn module_member(&mut self, module: &str, member: &str) -> Result<Value, SusaError> {
        if self.check(TokenKind::LeftParen) {
            let args = self.arguments()?;
            let function = self.modules.lookup_function(module, member).ok_or_else(|| {
                SusaError::attribute(format!("Module '{module}' has no function '{member}'"))
            })?;
            tracing::debug!(module, function = member, "module call");
            return function(&args);
        }
        self.modules.lookup_constant(module, member).ok_or_else(|| {
            SusaError::attribute(format!("Module '{module}' has no attribute '{member}'"))
        })
    }

    fn list_literal(&mut self) -> Result<Value, SusaError> {
        self.skip_newlines();
        // Scan the first element to tell a comprehension from a literal.
        // In skip mode the lookahead doubles as the parse of that element.
        let mut first_parsed = false;
        if !self.check(TokenKind::Ellipsis) && !self.check(TokenKind::RightBracket) {
            let first = self.current;
            self.skip_expression()?;
            if self.check(TokenKind::For) {
                return self.comprehension(first);
            }
            if self.skip_mode {
                first_parsed = true;
            } else {
                self.current = first;
            }
        }

        let mut items = Vec::new();
        loop {
            if !std::mem::take(&mut first_parsed) {
                self.skip_newlines();
                if self.check(TokenKind::RightBracket) {
                    break;
                }
                self.list_element(&mut items)?;
            }
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.skip_newlines();
        self.expect(TokenKind::RightBracket, "Expected ']' after list elements")?;
        Ok(self.unless_skipping(|| Value::list(items)))
    }

    fn list_element(&mut self, items: &mut Vec<Value>) -> Result<(), SusaError> {
        if !self.check(TokenKind::Ellipsis) {
            items.push(self.evaluate()?);
            return Ok(());
        }
        let spread = self.advance();
        let value = self.evaluate()?;
        if self.skip_mode {
            return Ok(());
        }
        match value {
            Value::List(source) => {
                items.extend(source.borrow().iter().cloned());
                Ok(())
            }
            other => Err(SusaError::type_error(format!(
                "Cannot spread a {} into a list",
                other.type_name()
            ))
            .at(spread.line, spread.column)),
        }
    }

    /// `[expr for name in iterable if cond]`, evaluated eagerly in a child
    /// scope of the current one. `element` is where `expr` starts; the
    /// cursor sits on `for`.
    fn comprehension(&mut self, element: usize) -> Result<Value, SusaError> {
        self.expect(TokenKind::For, "Expected 'for' in list comprehension")?;
        let var = self.expect_identifier("Expected loop variable in list comprehension")?;
        self.expect(TokenKind::In, "Expected 'in' in list comprehension")?;
        let iterable = self.evaluate()?;
        let filter = if self.eat(TokenKind::If) {
            let start = self.current;
            self.skip_expression()?;
            Some(start)
        } else {
            None
        };
        self.skip_newlines();
        self.expect(TokenKind::RightBracket, "Expected ']' after list comprehension")?;
        if self.skip_mode {
            return Ok(Value::Null);
        }

        let after = self.current;
        let items = builtins::iteration_items(&iterable)?;
        let scope = Rc::new(RefCell::new(Environment::with_enclosing(Rc::clone(
            &self.environment,
        ))));
        let collected = self.with_environment(scope, |s| {
            let mut out = Vec::new();
            for item in items {
                s.environment.borrow_mut().declare(&var, item, false)?;
                if let Some(start) = filter {
                    s.current = start;
                    if !s.evaluate()?.is_truthy() {
                        continue;
                    }
                }
                s.current = element;
                out.push(s.evaluate()?);
            }
            Ok(out)
        });
        self.current = after;
        Ok(Value::list(collected?))
    }

    fn dict_literal(&mut self) -> Result<Value, SusaError> {
        let mut entries = BTreeMap::new();
        loop {
            self.skip_newlines();
            if self.check(TokenKind::RightBrace) {
                break;
            }
            if self.check(TokenKind::Ellipsis) {
                let spread = self.advance();
                let value = self.evaluate()?;
                if !self.skip_mode {
                    match value {
                        Value::Dict(source) => entries.extend(
                            source.borrow().iter().map(|(k, v)| (k.clone(), v.clone())),
                        ),
                        other => {
                            return Err(SusaError::type_error(format!(
                                "Cannot spread a {} into a dict",
                                other.type_name()
                            ))
                            .at(spread.line, spread.column));
                        }
                    }
                }
            } else {
                let key = self.expect(TokenKind::String, "Dictionary keys must be string literals")?;
                self.expect(TokenKind::Colon, "Expected ':' after dictionary key")?;
                self.skip_newlines();
                let value = self.evaluate()?;
                entries.insert(key.lexeme, value);
            }
            self.skip_newlines();
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "Expected '}' after dictionary entries")?;
        Ok(self.unless_skipping(|| Value::dict(entries)))
    }

    /// `lambda a, b: body`. The body runs to the end of the line, a `;`, a
    /// top-level `,`, an unbalanced closing bracket or a same-line `END:`,
    /// and is kept as source text.
    fn lambda_literal(&mut self) -> Result<Value, SusaError> {
        let mut params = Vec::new();
        if !self.check(TokenKind::Colon) {
            loop {
                params.push(self.expect_identifier("Expected lambda parameter name")?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::Colon, "Expected ':' after lambda parameters")?;

        let (line, column) = (self.peek().line, self.peek().column);
        let mut depth = 0usize;
        let mut parts = Vec::new();
        loop {
            let token = self.peek();
            match token.kind {
                TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof => break,
                TokenKind::Comma if depth == 0 => break,
                TokenKind::End if depth == 0 && self.peek_at(1).kind == TokenKind::Colon => break,
                TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => depth += 1,
                TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            parts.push(token.to_source());
            self.current += 1;
        }
        if parts.is_empty() {
            return Err(self.syntax_error("Expected lambda body"));
        }
        Ok(Value::Lambda(Rc::new(Lambda {
            params,
            body: parts.join(" "),
            line,
            column,
        })))
    }

    /// Replace `{name}` placeholders with the named variables' values.
    fn interpolate(&self, template: &Token) -> Result<Value, SusaError> {
        let mut out = String::with_capacity(template.lexeme.len());
        let mut rest = template.lexeme.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            let name = rest[open + 1..close].trim();
            out.push_str(&rest[..open]);
            if name.is_empty() {
                out.push_str("{}");
            } else {
                let value = self
                    .environment
                    .borrow()
                    .get(name)
                    .ok_or_else(|| {
                        SusaError::undefined_name(name).at(template.line, template.column)
                    })?;
                out.push_str(&value.to_string());
            }
            rest = &rest[close + 1..];
        }
        out.push_str(rest);
        Ok(Value::Str(out))
    }
}

/// `value.name` without a call.
pub(crate) fn property(value: &Value, name: &str) -> Result<Value, SusaError> {
    match value {
        Value::Instance(instance) => {
            let instance = instance.borrow();
            instance.properties.get(name).cloned().ok_or_else(|| {
                SusaError::attribute(format!(
                    "'{}' object has no attribute '{name}'",
                    instance.class_name
                ))
            })
        }
        Value::Dict(entries) => entries
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| SusaError::missing_key(name)),
        Value::List(_) | Value::Str(_) if name.eq_ignore_ascii_case("length") => {
            builtins::call_method(value, name, &[])
        }
        other => Err(SusaError::attribute(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

/// Built-in conversion invoked by a type keyword followed by `(`.
fn conversion_name(kind: TokenKind) -> Option<&'static str> {
    match kind {
        TokenKind::Int => Some("int"),
        TokenKind::Float | TokenKind::Double => Some("float"),
        TokenKind::BoolType => Some("bool"),
        TokenKind::StringType | TokenKind::Char => Some("str"),
        _ => None,
    }
}
