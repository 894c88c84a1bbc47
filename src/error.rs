use thiserror::Error;

/// Classification of every failure the engine can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    #[strum(serialize = "SyntaxError")]
    Syntax,
    #[strum(serialize = "RuntimeError")]
    Runtime,
    #[strum(serialize = "TypeError")]
    Type,
    #[strum(serialize = "NameError")]
    Name,
    #[strum(serialize = "IndexError")]
    Index,
    #[strum(serialize = "ImportError")]
    Import,
    #[strum(serialize = "AttributeError")]
    Attribute,
    #[strum(serialize = "ValueError")]
    Value,
    #[strum(serialize = "ZeroDivisionError")]
    ZeroDivision,
    #[strum(serialize = "KeyError")]
    Key,
    #[strum(serialize = "ArgumentError")]
    Argument,
}

/// A classified failure with the 1-based source position of the token being
/// processed when it was detected. A line of 0 means "not yet located".
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct SusaError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl SusaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: 0,
            column: 0,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn undefined_name(name: &str) -> Self {
        Self::new(ErrorKind::Name, format!("Name '{name}' is not defined"))
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import, message)
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Attribute, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZeroDivision, message)
    }

    pub fn missing_key(key: &str) -> Self {
        Self::new(ErrorKind::Key, format!("Key '{key}' not found"))
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, message)
    }

    /// Arity failure for a callable taking exactly `expected` arguments.
    pub fn arity(name: &str, expected: usize, got: usize) -> Self {
        Self::argument(format!(
            "Function '{name}' expects {expected} {}, got {got}",
            plural_args(expected)
        ))
    }

    /// Arity failure for a callable taking between `min` and `max` arguments.
    /// `max` of `None` means variadic.
    pub fn arity_range(name: &str, min: usize, max: Option<usize>, got: usize) -> Self {
        let expected = match max {
            None => format!("at least {min} {}", plural_args(min)),
            Some(max) if max == min => format!("{min} {}", plural_args(min)),
            Some(max) => format!("{min} to {max} arguments"),
        };
        Self::argument(format!("Function '{name}' expects {expected}, got {got}"))
    }

    /// Attach a position.
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Attach a position only if the error was raised away from the token
    /// stream and has none yet.
    pub fn or_at(self, line: usize, column: usize) -> Self {
        if self.has_position() {
            self
        } else {
            self.at(line, column)
        }
    }

    pub fn has_position(&self) -> bool {
        self.line > 0
    }
}

fn plural_args(n: usize) -> &'static str {
    if n == 1 { "argument" } else { "arguments" }
}

/// Return the text of the 1-based `line` of `source`, without its terminator.
pub fn source_line(source: &str, line: usize) -> Option<&str> {
    if line == 0 {
        return None;
    }
    source
        .split('\n')
        .nth(line - 1)
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// Convert a 1-based line/column into a byte offset into `source`, clamped
/// to the source length.
pub fn position_to_offset(source: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut offset = 0;
    for (i, text) in source.split('\n').enumerate() {
        if i + 1 == line {
            let col_offset = text
                .char_indices()
                .nth(column.saturating_sub(1))
                .map_or(text.len(), |(idx, _)| idx);
            return (offset + col_offset).min(source.len());
        }
        offset += text.len() + 1;
    }
    source.len()
}
