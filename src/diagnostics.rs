use std::fmt;

use miette::{
    Diagnostic, GraphicalReportHandler, GraphicalTheme, LabeledSpan, SourceCode, SourceSpan,
};

use crate::error::{SusaError, position_to_offset, source_line};

/// Render `error` against the program `source`.
///
/// `colored` selects the terminal rendering (a miette report with the
/// offending column underlined); otherwise the plain editor rendering is
/// produced:
///
/// ```text
/// [NameError] Line 2, Col 7: Name 'x' is not defined
///   > print x
///   >       ^
/// ```
pub fn render(error: &SusaError, source: &str, colored: bool) -> String {
    if colored {
        render_terminal(error, source)
    } else {
        render_editor(error, source)
    }
}

pub fn render_editor(error: &SusaError, source: &str) -> String {
    let mut out = format!("[{}]", error.kind);
    if error.has_position() {
        out.push_str(&format!(" Line {}", error.line));
        if error.column > 0 {
            out.push_str(&format!(", Col {}", error.column));
        }
    }
    out.push_str(": ");
    out.push_str(&error.message);
    if let Some(line) = source_line(source, error.line).filter(|l| !l.is_empty()) {
        out.push_str("\n  > ");
        out.push_str(line);
        if error.column > 0 {
            out.push_str("\n  > ");
            out.push_str(&" ".repeat(error.column - 1));
            out.push('^');
        }
    }
    out
}

pub fn render_terminal(error: &SusaError, source: &str) -> String {
    let report = SourceReport::new(error, source);
    let mut out = String::new();
    match GraphicalReportHandler::new_themed(GraphicalTheme::unicode())
        .render_report(&mut out, &report)
    {
        Ok(()) => out,
        Err(_) => render_editor(error, source),
    }
}

/// Adapter presenting a positioned [`SusaError`] as a miette diagnostic.
#[derive(Debug)]
struct SourceReport<'a> {
    error: &'a SusaError,
    source: String,
    span: Option<SourceSpan>,
}

impl<'a> SourceReport<'a> {
    fn new(error: &'a SusaError, source: &'a str) -> Self {
        let span = error.has_position().then(|| {
            let offset = position_to_offset(source, error.line, error.column);
            let len = usize::from(offset < source.len());
            SourceSpan::new(offset.into(), len)
        });
        Self {
            error,
            source: source.to_string(),
            span,
        }
    }
}

impl fmt::Display for SourceReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error.kind)?;
        if self.error.has_position() {
            write!(
                f,
                " at line {}, column {}",
                self.error.line, self.error.column
            )?;
        }
        write!(f, ": {}", self.error.message)
    }
}

impl std::error::Error for SourceReport<'_> {}

impl Diagnostic for SourceReport<'_> {
    fn code<'b>(&'b self) -> Option<Box<dyn fmt::Display + 'b>> {
        Some(Box::new(self.error.kind))
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.span.map(|_| &self.source as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let span = self.span?;
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some(self.error.message.clone()),
            span,
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn editor_rendering_with_caret() {
        let err = SusaError::undefined_name("x").at(2, 7);
        let rendered = render(&err, "let a = 1\nprint x", false);
        assert_eq!(
            rendered,
            "[NameError] Line 2, Col 7: Name 'x' is not defined\n  > print x\n  >       ^"
        );
    }

    #[test]
    fn editor_rendering_without_position() {
        let err = SusaError::new(ErrorKind::Value, "bad value");
        assert_eq!(render(&err, "print 1", false), "[ValueError]: bad value");
    }

    #[test]
    fn terminal_rendering_mentions_kind_and_message() {
        let err = SusaError::zero_division("Division by zero").at(1, 9);
        let rendered = render(&err, "print 1 / 0", true);
        assert!(rendered.contains("ZeroDivisionError"));
        assert!(rendered.contains("Division by zero"));
    }

    #[test]
    fn terminal_rendering_clamps_out_of_range_column() {
        let err = SusaError::syntax("Unexpected end").at(1, 80);
        let rendered = render(&err, "print", true);
        assert!(rendered.contains("SyntaxError"));
    }
}
