use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::diagnostics;
use crate::interpreter::Interpreter;
use crate::scanner::{self, token::TokenKind};

/// Run the interactive REPL. Variables and definitions persist across
/// inputs; lines are buffered until every `START:` has its `END:`.
pub fn run_repl(colored: bool) -> Result<(), ReadlineError> {
    let mut editor = DefaultEditor::new()?;
    let mut interpreter = Interpreter::new().with_writer(Box::new(std::io::stdout()));
    let mut pending = String::new();
    let mut depth = 0isize;

    loop {
        let prompt = if pending.is_empty() { "susa> " } else { "...   " };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                depth = 0;
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        };
        if pending.is_empty() && line.trim().is_empty() {
            continue;
        }
        if pending.is_empty() && matches!(line.trim(), "exit" | "quit") {
            break;
        }
        editor.add_history_entry(line.as_str())?;

        depth += block_depth(&line);
        pending.push_str(&line);
        pending.push('\n');
        if depth > 0 {
            continue;
        }

        let source = std::mem::take(&mut pending);
        depth = 0;
        if let Err(e) = interpreter.run_additional(&source) {
            eprintln!("{}", diagnostics::render(&e, &source, colored));
        }
    }
    Ok(())
}

/// Net change in block nesting contributed by `line`: `START:` opens,
/// `END:` closes. A line that does not scan contributes nothing.
fn block_depth(line: &str) -> isize {
    let Ok(tokens) = scanner::scan(line) else {
        return 0;
    };
    tokens
        .windows(2)
        .map(|pair| match (pair[0].kind, pair[1].kind) {
            (TokenKind::Start, TokenKind::Colon) => 1,
            (TokenKind::End, TokenKind::Colon) => -1,
            _ => 0,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("print 1", 0)]
    #[case("while x > 0:", 0)]
    #[case("START:", 1)]
    #[case("if x: START: print x END:", 0)]
    #[case("func f(): START: if y: START:", 2)]
    #[case("END:", -1)]
    #[case("print \"START:\"", 0)]
    #[case("let start = 1", 0)]
    fn block_depth_counts_markers(#[case] line: &str, #[case] expected: isize) {
        assert_eq!(block_depth(line), expected);
    }
}
