//! Cursor movement over the active token buffer, `START:`/`END:` block
//! discovery, and the save/restore helpers used to run code in another
//! buffer or scope.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::SusaError;
use crate::interpreter::Interpreter;
use crate::interpreter::environment::Environment;
use crate::scanner::token::{Token, TokenKind};

/// Statement range of a block: `start` is the first token after `START:`,
/// `end` is the index of the matching `END` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    pub start: usize,
    pub end: usize,
}

impl Interpreter {
    pub(crate) fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    /// Token `offset` places ahead of the cursor, clamped to the trailing EOF.
    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.current + offset).min(last)]
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        token
    }

    /// Consume the next token if it has `kind`.
    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, message: &str) -> Result<Token, SusaError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.syntax_error(message))
        }
    }

    pub(crate) fn expect_identifier(&mut self, message: &str) -> Result<String, SusaError> {
        Ok(self.expect(TokenKind::Identifier, message)?.lexeme)
    }

    /// A syntax error located at the current token.
    pub(crate) fn syntax_error(&self, message: &str) -> SusaError {
        let found = self.peek();
        let found = match found.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            _ => format!("'{}'", found.lexeme),
        };
        self.locate(SusaError::syntax(format!("{message}, found {found}")))
    }

    /// Attach the current token's position unless `err` already has one.
    pub(crate) fn locate(&self, err: SusaError) -> SusaError {
        let token = self.peek();
        err.or_at(token.line, token.column)
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.current += 1;
        }
    }

    /// Skip statement separators: newlines and semicolons.
    pub(crate) fn skip_separators(&mut self) {
        while self.check(TokenKind::Newline) || self.check(TokenKind::Semicolon) {
            self.current += 1;
        }
    }

    pub(crate) fn at_marker(&self, marker: TokenKind) -> bool {
        self.check(marker) && self.peek_at(1).kind == TokenKind::Colon
    }

    /// Expect `:` ending a compound statement header.
    pub(crate) fn expect_header_end(&mut self, owner: &str) -> Result<(), SusaError> {
        self.expect(TokenKind::Colon, &format!("Expected ':' after {owner}"))?;
        Ok(())
    }

    /// Locate the block introduced at the cursor. Nested `START:`/`END:`
    /// pairs are balanced by depth; the cursor is left after the `END:`
    /// that closes this block.
    pub(crate) fn expect_block(&mut self, owner: &str) -> Result<Block, SusaError> {
        self.skip_newlines();
        if !self.at_marker(TokenKind::Start) {
            return Err(self.syntax_error(&format!("Expected 'START:' after {owner}")));
        }
        let opening = self.peek().clone();
        self.current += 2;
        let start = self.current;
        let mut depth = 1usize;
        loop {
            match self.peek().kind {
                TokenKind::Eof => {
                    return Err(SusaError::syntax(format!("Missing 'END:' for {owner} block"))
                        .at(opening.line, opening.column));
                }
                TokenKind::Start if self.at_marker(TokenKind::Start) => depth += 1,
                TokenKind::End if self.at_marker(TokenKind::End) => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            self.current += 1;
        }
        let end = self.current;
        self.current += 2;
        Ok(Block { start, end })
    }

    /// Copy `tokens[start..end]` into a standalone buffer ending in EOF.
    pub(crate) fn capture(&self, start: usize, end: usize) -> Rc<[Token]> {
        let end = end.min(self.tokens.len());
        let mut captured: Vec<Token> = self.tokens[start.min(end)..end].to_vec();
        let (line, column) = captured
            .last()
            .map_or((0, 0), |t| (t.line, t.column + t.lexeme.chars().count()));
        captured.push(Token::new(TokenKind::Eof, "", line, column));
        captured.into()
    }

    /// Run `f` with `tokens` as the active buffer, restoring the previous
    /// buffer and cursor afterwards whether or not `f` fails.
    pub(crate) fn with_buffer<T>(
        &mut self,
        tokens: Rc<[Token]>,
        start: usize,
        f: impl FnOnce(&mut Self) -> Result<T, SusaError>,
    ) -> Result<T, SusaError> {
        let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
        let saved_current = std::mem::replace(&mut self.current, start);
        let result = f(self);
        self.tokens = saved_tokens;
        self.current = saved_current;
        result
    }

    /// Run `f` with `env` as the current scope, restoring the previous scope
    /// afterwards whether or not `f` fails.
    pub(crate) fn with_environment<T>(
        &mut self,
        env: Rc<RefCell<Environment>>,
        f: impl FnOnce(&mut Self) -> Result<T, SusaError>,
    ) -> Result<T, SusaError> {
        let previous = std::mem::replace(&mut self.environment, env);
        let result = f(self);
        self.environment = previous;
        result
    }

    /// Parse an expression without evaluating it, leaving the cursor after it.
    pub(crate) fn skip_expression(&mut self) -> Result<(), SusaError> {
        self.skipping(|s| s.evaluate().map(drop))
    }

    /// Run `f` in parse-only mode: operands are consumed but no value is
    /// computed, no name is resolved and nothing is called.
    pub(crate) fn skipping<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SusaError>,
    ) -> Result<T, SusaError> {
        let was = std::mem::replace(&mut self.skip_mode, true);
        let result = f(self);
        self.skip_mode = was;
        result
    }
}
