use winnow::combinator::{alt, cut_err};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::stream::{LocatingSlice, Location};
use winnow::token::{any, one_of, take_till, take_until, take_while};

use crate::error::SusaError;
use crate::scanner::token::{Token, TokenKind, keyword_kind};

type Input<'a> = LocatingSlice<&'a str>;

/// Maps byte offsets to 1-based line/column pairs.
struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    fn position(&self, offset: usize) -> (usize, usize) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let column = self.source[start..offset].chars().count() + 1;
        (line + 1, column)
    }
}

/// Spaces, tabs, carriage returns and `#` comments. Newlines are tokens.
fn blanks_and_comments<'a>(input: &mut Input<'a>) -> ModalResult<()> {
    loop {
        take_while(0.., |c: char| c == ' ' || c == '\t' || c == '\r')
            .void()
            .parse_next(input)?;
        if input.starts_with('#') {
            take_till(0.., '\n').void().parse_next(input)?;
        } else {
            break;
        }
    }
    Ok(())
}

fn next_char<'a>(input: &mut Input<'a>) -> ModalResult<char> {
    cut_err(any).parse_next(input)
}

/// Body of a quoted literal after its opening quote, decoding escapes.
/// Unknown escapes keep the escaped character.
fn quoted_body<'a>(input: &mut Input<'a>, quote: char) -> ModalResult<String> {
    let mut s = String::new();
    loop {
        match next_char(input)? {
            c if c == quote => break,
            '\\' => match next_char(input)? {
                'n' => s.push('\n'),
                't' => s.push('\t'),
                'r' => s.push('\r'),
                other => s.push(other),
            },
            other => s.push(other),
        }
    }
    Ok(s)
}

fn newline<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    '\n'.parse_next(input)?;
    Ok((TokenKind::Newline, "\n".to_string()))
}

/// `"""..."""` literals are raw and may span lines.
fn triple_quoted<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    "\"\"\"".parse_next(input)?;
    let body: &str = cut_err(take_until(0.., "\"\"\"")).parse_next(input)?;
    let body = body.to_string();
    "\"\"\"".parse_next(input)?;
    Ok((TokenKind::String, body))
}

fn template_literal<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    "rt".parse_next(input)?;
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let body = quoted_body(input, quote)?;
    Ok((TokenKind::Template, body))
}

fn string_literal<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let body = quoted_body(input, quote)?;
    Ok((TokenKind::String, body))
}

/// Digits with at most one decimal point; the point is only consumed when
/// digits follow it.
fn number_literal<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    let whole: &str = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let mut lexeme = whole.to_string();

    let checkpoint = input.checkpoint();
    let dot: Result<char, winnow::error::ErrMode<ContextError>> = '.'.parse_next(input);
    if dot.is_ok() {
        match take_while::<_, _, ContextError>(1.., |c: char| c.is_ascii_digit()).parse_next(input)
        {
            Ok(frac) => {
                lexeme.push('.');
                lexeme.push_str(frac);
            }
            Err(_) => input.reset(&checkpoint),
        }
    }
    Ok((TokenKind::Number, lexeme))
}

fn identifier_or_keyword<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    let lexeme: &str = (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)?;
    let kind = keyword_kind(lexeme).unwrap_or(TokenKind::Identifier);
    Ok((kind, lexeme.to_string()))
}

fn operator<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    let (kind, lexeme) = alt((
        alt((
            "**=".value((TokenKind::PowerEqual, "**=")),
            "...".value((TokenKind::Ellipsis, "...")),
        )),
        alt((
            "==".value((TokenKind::EqualEqual, "==")),
            "!=".value((TokenKind::BangEqual, "!=")),
            "<=".value((TokenKind::LessEqual, "<=")),
            ">=".value((TokenKind::GreaterEqual, ">=")),
            "<<".value((TokenKind::ShiftLeft, "<<")),
            ">>".value((TokenKind::ShiftRight, ">>")),
            "**".value((TokenKind::Power, "**")),
            "++".value((TokenKind::PlusPlus, "++")),
            "--".value((TokenKind::MinusMinus, "--")),
            "+=".value((TokenKind::PlusEqual, "+=")),
            "-=".value((TokenKind::MinusEqual, "-=")),
            "*=".value((TokenKind::StarEqual, "*=")),
            "/=".value((TokenKind::SlashEqual, "/=")),
            "%=".value((TokenKind::PercentEqual, "%=")),
        )),
        single_char,
    ))
    .parse_next(input)?;
    Ok((kind, lexeme.to_string()))
}

fn single_char<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, &'static str)> {
    let c = any
        .verify(|c: &char| "+-*/%=<>!?&|^~()[]{},:.;".contains(*c))
        .parse_next(input)?;
    let pair = match c {
        '+' => (TokenKind::Plus, "+"),
        '-' => (TokenKind::Minus, "-"),
        '*' => (TokenKind::Star, "*"),
        '/' => (TokenKind::Slash, "/"),
        '%' => (TokenKind::Percent, "%"),
        '=' => (TokenKind::Equal, "="),
        '<' => (TokenKind::Less, "<"),
        '>' => (TokenKind::Greater, ">"),
        '!' => (TokenKind::Bang, "!"),
        '?' => (TokenKind::Question, "?"),
        '&' => (TokenKind::Ampersand, "&"),
        '|' => (TokenKind::Pipe, "|"),
        '^' => (TokenKind::Caret, "^"),
        '~' => (TokenKind::Tilde, "~"),
        '(' => (TokenKind::LeftParen, "("),
        ')' => (TokenKind::RightParen, ")"),
        '[' => (TokenKind::LeftBracket, "["),
        ']' => (TokenKind::RightBracket, "]"),
        '{' => (TokenKind::LeftBrace, "{"),
        '}' => (TokenKind::RightBrace, "}"),
        ',' => (TokenKind::Comma, ","),
        ':' => (TokenKind::Colon, ":"),
        '.' => (TokenKind::Dot, "."),
        ';' => (TokenKind::Semicolon, ";"),
        _ => unreachable!("verify guarantees valid char"),
    };
    Ok(pair)
}

fn scan_token<'a>(input: &mut Input<'a>) -> ModalResult<(TokenKind, String)> {
    alt((
        newline,
        triple_quoted,
        template_literal,
        string_literal,
        number_literal,
        identifier_or_keyword,
        operator,
    ))
    .parse_next(input)
}

/// Scan all tokens from source. The sequence always ends with an EOF token.
pub fn scan_all(source: &str) -> Result<Vec<Token>, SusaError> {
    let lines = LineIndex::new(source);
    let mut input = LocatingSlice::new(source);
    let mut tokens = Vec::new();

    loop {
        if blanks_and_comments(&mut input).is_err() || input.is_empty() {
            break;
        }
        let offset = input.current_token_start();
        let (line, column) = lines.position(offset);
        match scan_token(&mut input) {
            Ok((kind, lexeme)) => tokens.push(Token::new(kind, lexeme, line, column)),
            Err(_) => {
                let rest = &source[offset..];
                let unterminated = ["\"", "'", "rt\"", "rt'"]
                    .iter()
                    .any(|prefix| rest.starts_with(prefix));
                let message = if unterminated {
                    "Unterminated string literal".to_string()
                } else {
                    let ch = rest.chars().next().unwrap_or('?');
                    format!("Unexpected character '{ch}'")
                };
                return Err(SusaError::syntax(message).at(line, column));
            }
        }
    }

    let (line, column) = lines.position(source.len());
    tokens.push(Token::new(TokenKind::Eof, "", line, column));
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn scan_ok(source: &str) -> Vec<Token> {
        scan_all(source).expect("scan should succeed")
    }

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn delimiters() {
        let tokens = scan_ok("()[]{},:.;");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Comma,
                TokenKind::Colon,
                TokenKind::Dot,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[rstest]
    #[case("**=", TokenKind::PowerEqual)]
    #[case("...", TokenKind::Ellipsis)]
    #[case("**", TokenKind::Power)]
    #[case("<<", TokenKind::ShiftLeft)]
    #[case(">>", TokenKind::ShiftRight)]
    #[case("++", TokenKind::PlusPlus)]
    #[case("--", TokenKind::MinusMinus)]
    #[case("%=", TokenKind::PercentEqual)]
    #[case("!=", TokenKind::BangEqual)]
    #[case("!", TokenKind::Bang)]
    #[case("~", TokenKind::Tilde)]
    #[case("?", TokenKind::Question)]
    fn operators(#[case] source: &str, #[case] expected: TokenKind) {
        let tokens = scan_ok(source);
        assert_eq!(kinds(&tokens), vec![expected, TokenKind::Eof]);
        assert_eq!(tokens[0].lexeme, source);
    }

    #[test]
    fn longest_operator_wins() {
        let tokens = scan_ok("a**=2");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Identifier,
                TokenKind::PowerEqual,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_are_tokens() {
        let tokens = scan_ok("let x = 1\nprint x");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Let,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::Print,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_case_insensitive_keep_text() {
        let tokens = scan_ok("PRINT Start END While");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Print,
                TokenKind::Start,
                TokenKind::End,
                TokenKind::While,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[0].lexeme, "PRINT");
    }

    #[rstest]
    #[case(r#""hello""#, "hello")]
    #[case("'single'", "single")]
    #[case(r#""a\nb\t""#, "a\nb\t")]
    #[case(r#""say \"hi\"""#, "say \"hi\"")]
    #[case(r#""back\\slash""#, "back\\slash")]
    #[case(r#""odd \q""#, "odd q")]
    fn string_literals(#[case] source: &str, #[case] expected: &str) {
        let tokens = scan_ok(source);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, expected);
    }

    #[test]
    fn triple_quoted_is_raw_and_multiline() {
        let tokens = scan_ok("\"\"\"line one\nline \\n two\"\"\" x");
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme, "line one\nline \\n two");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn template_literal_is_tagged() {
        let tokens = scan_ok("rt\"Hi {name}\" rtx");
        assert_eq!(tokens[0].kind, TokenKind::Template);
        assert_eq!(tokens[0].lexeme, "Hi {name}");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].lexeme, "rtx");
    }

    #[rstest]
    #[case("42", "42")]
    #[case("3.14", "3.14")]
    fn numbers(#[case] source: &str, #[case] expected: &str) {
        let tokens = scan_ok(source);
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].lexeme, expected);
    }

    #[test]
    fn number_no_trailing_dot() {
        let tokens = scan_ok("42.foo");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Number,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[0].lexeme, "42");
    }

    #[test]
    fn single_decimal_point() {
        let tokens = scan_ok("1.2.3");
        assert_eq!(tokens[0].lexeme, "1.2");
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].lexeme, "3");
    }

    #[test]
    fn comments_ignored() {
        let tokens = scan_ok("let x # note\nprint x # trailing");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Let,
                TokenKind::Identifier,
                TokenKind::Newline,
                TokenKind::Print,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = scan_ok("let x = 42\n  print x");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[3].line, tokens[3].column), (1, 9));
        assert_eq!((tokens[5].line, tokens[5].column), (2, 3));
        assert_eq!((tokens[6].line, tokens[6].column), (2, 9));
    }

    #[test]
    fn unexpected_character_error() {
        let err = scan_all("let x = @").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains('@'));
        assert_eq!((err.line, err.column), (1, 9));
    }

    #[rstest]
    #[case("\"unterminated")]
    #[case("'open")]
    #[case("rt\"open {x}")]
    #[case("\"\"\"never closed")]
    fn unterminated_string_error(#[case] source: &str) {
        let err = scan_all(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert!(err.message.contains("Unterminated"));
    }

    #[test]
    fn empty_source_is_just_eof() {
        assert_eq!(kinds(&scan_ok("")), vec![TokenKind::Eof]);
    }
}
