use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum TokenKind {
    // Literals
    #[strum(serialize = "NUMBER")]
    Number,
    #[strum(serialize = "STRING")]
    String,
    /// `rt"..."` literal, interpolated at evaluation time.
    #[strum(serialize = "TEMPLATE")]
    Template,
    #[strum(serialize = "IDENTIFIER")]
    Identifier,

    // Keywords
    #[strum(serialize = "print")]
    Print,
    #[strum(serialize = "let")]
    Let,
    #[strum(serialize = "const")]
    Const,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "string")]
    StringType,
    #[strum(serialize = "bool")]
    BoolType,
    #[strum(serialize = "float")]
    Float,
    #[strum(serialize = "double")]
    Double,
    #[strum(serialize = "char")]
    Char,
    #[strum(serialize = "if")]
    If,
    #[strum(serialize = "else")]
    Else,
    #[strum(serialize = "elif")]
    Elif,
    #[strum(serialize = "while")]
    While,
    #[strum(serialize = "for")]
    For,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "do")]
    Do,
    #[strum(serialize = "func")]
    Func,
    #[strum(serialize = "return")]
    Return,
    #[strum(serialize = "class")]
    Class,
    #[strum(serialize = "static")]
    Static,
    #[strum(serialize = "start")]
    Start,
    #[strum(serialize = "end")]
    End,
    #[strum(serialize = "loop")]
    Loop,
    #[strum(serialize = "times")]
    Times,
    #[strum(serialize = "break")]
    Break,
    #[strum(serialize = "continue")]
    Continue,
    #[strum(serialize = "try")]
    Try,
    #[strum(serialize = "catch")]
    Catch,
    #[strum(serialize = "install")]
    Install,
    #[strum(serialize = "from")]
    From,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "share")]
    Share,
    #[strum(serialize = "as")]
    As,
    #[strum(serialize = "use")]
    Use,
    #[strum(serialize = "python")]
    Python,
    #[strum(serialize = "true")]
    True,
    #[strum(serialize = "false")]
    False,
    #[strum(serialize = "null")]
    Null,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "case")]
    Case,
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "lambda")]
    Lambda,
    #[strum(serialize = "async")]
    Async,
    #[strum(serialize = "await")]
    Await,
    #[strum(serialize = "yield")]
    Yield,
    #[strum(serialize = "with")]
    With,
    #[strum(serialize = "assert")]
    Assert,
    #[strum(serialize = "enum")]
    Enum,

    // Operators
    #[strum(serialize = "+")]
    Plus,
    #[strum(serialize = "-")]
    Minus,
    #[strum(serialize = "*")]
    Star,
    #[strum(serialize = "/")]
    Slash,
    #[strum(serialize = "%")]
    Percent,
    #[strum(serialize = "**")]
    Power,
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "+=")]
    PlusEqual,
    #[strum(serialize = "-=")]
    MinusEqual,
    #[strum(serialize = "*=")]
    StarEqual,
    #[strum(serialize = "/=")]
    SlashEqual,
    #[strum(serialize = "%=")]
    PercentEqual,
    #[strum(serialize = "**=")]
    PowerEqual,
    #[strum(serialize = "++")]
    PlusPlus,
    #[strum(serialize = "--")]
    MinusMinus,
    #[strum(serialize = "==")]
    EqualEqual,
    #[strum(serialize = "!=")]
    BangEqual,
    #[strum(serialize = "<")]
    Less,
    #[strum(serialize = "<=")]
    LessEqual,
    #[strum(serialize = ">")]
    Greater,
    #[strum(serialize = ">=")]
    GreaterEqual,
    #[strum(serialize = "!")]
    Bang,
    #[strum(serialize = "?")]
    Question,
    #[strum(serialize = "&")]
    Ampersand,
    #[strum(serialize = "|")]
    Pipe,
    #[strum(serialize = "^")]
    Caret,
    #[strum(serialize = "~")]
    Tilde,
    #[strum(serialize = "<<")]
    ShiftLeft,
    #[strum(serialize = ">>")]
    ShiftRight,
    #[strum(serialize = "...")]
    Ellipsis,

    // Delimiters
    #[strum(serialize = "(")]
    LeftParen,
    #[strum(serialize = ")")]
    RightParen,
    #[strum(serialize = "[")]
    LeftBracket,
    #[strum(serialize = "]")]
    RightBracket,
    #[strum(serialize = "{")]
    LeftBrace,
    #[strum(serialize = "}")]
    RightBrace,
    #[strum(serialize = ",")]
    Comma,
    #[strum(serialize = ":")]
    Colon,
    #[strum(serialize = ".")]
    Dot,
    #[strum(serialize = ";")]
    Semicolon,

    #[strum(serialize = "NEWLINE")]
    Newline,
    #[strum(serialize = "EOF")]
    Eof,
}

impl TokenKind {
    /// Declaration keywords that may introduce a variable (`let x = ...`,
    /// `int x = ...`).
    pub fn is_declaration(self) -> bool {
        matches!(
            self,
            Self::Let
                | Self::Const
                | Self::Int
                | Self::StringType
                | Self::BoolType
                | Self::Float
                | Self::Double
                | Self::Char
        )
    }

    /// Tokens that end a simple statement.
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Newline | Self::Semicolon | Self::Eof)
    }

    pub fn is_compound_assign(self) -> bool {
        matches!(
            self,
            Self::PlusEqual
                | Self::MinusEqual
                | Self::StarEqual
                | Self::SlashEqual
                | Self::PercentEqual
                | Self::PowerEqual
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text for keywords, identifiers and operators; the decoded
    /// payload for string and template literals.
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    /// Reconstruct source text that scans back to this token.
    pub fn to_source(&self) -> String {
        match self.kind {
            TokenKind::String => quote(&self.lexeme),
            TokenKind::Template => format!("rt{}", quote(&self.lexeme)),
            TokenKind::Newline => "\n".to_string(),
            TokenKind::Eof => String::new(),
            _ => self.lexeme.clone(),
        }
    }
}

fn quote(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 2);
    out.push('"');
    for c in payload.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} '{}' @{}:{}",
            self.kind,
            self.lexeme.escape_debug(),
            self.line,
            self.column
        )
    }
}

/// Keywords are matched case-insensitively.
pub fn keyword_kind(ident: &str) -> Option<TokenKind> {
    let kind = match ident.to_ascii_lowercase().as_str() {
        "print" => TokenKind::Print,
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "int" => TokenKind::Int,
        "string" => TokenKind::StringType,
        "bool" => TokenKind::BoolType,
        "float" => TokenKind::Float,
        "double" => TokenKind::Double,
        "char" => TokenKind::Char,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "elif" => TokenKind::Elif,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "do" => TokenKind::Do,
        "func" => TokenKind::Func,
        "return" => TokenKind::Return,
        "class" => TokenKind::Class,
        "static" => TokenKind::Static,
        "start" => TokenKind::Start,
        "end" => TokenKind::End,
        "loop" => TokenKind::Loop,
        "times" => TokenKind::Times,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "try" => TokenKind::Try,
        "catch" => TokenKind::Catch,
        "install" => TokenKind::Install,
        "from" => TokenKind::From,
        "add" => TokenKind::Add,
        "share" => TokenKind::Share,
        "as" => TokenKind::As,
        "use" => TokenKind::Use,
        "python" => TokenKind::Python,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "switch" => TokenKind::Switch,
        "case" => TokenKind::Case,
        "default" => TokenKind::Default,
        "lambda" => TokenKind::Lambda,
        "async" => TokenKind::Async,
        "await" => TokenKind::Await,
        "yield" => TokenKind::Yield,
        "with" => TokenKind::With,
        "assert" => TokenKind::Assert,
        "enum" => TokenKind::Enum,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("print", Some(TokenKind::Print))]
    #[case("PRINT", Some(TokenKind::Print))]
    #[case("Start", Some(TokenKind::Start))]
    #[case("string", Some(TokenKind::StringType))]
    #[case("printer", None)]
    fn keywords_fold_case(#[case] ident: &str, #[case] expected: Option<TokenKind>) {
        assert_eq!(keyword_kind(ident), expected);
    }

    #[test]
    fn string_tokens_requote() {
        let tok = Token::new(TokenKind::String, "a \"b\"\n", 1, 1);
        assert_eq!(tok.to_source(), r#""a \"b\"\n""#);
        let tok = Token::new(TokenKind::Template, "hi {x}", 1, 1);
        assert_eq!(tok.to_source(), r#"rt"hi {x}""#);
    }

    #[test]
    fn kind_display_matches_source() {
        assert_eq!(TokenKind::PowerEqual.to_string(), "**=");
        assert_eq!(TokenKind::Ellipsis.to_string(), "...");
        assert_eq!(TokenKind::Eof.to_string(), "EOF");
    }
}
