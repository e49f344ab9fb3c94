use std::fmt;
use std::fmt::Write;

use parking_lot::{RwLock, RwLockReadGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct InputPosition {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl InputPosition {
    pub(crate) fn with_offset(&self, offset: u32) -> Self {
        InputPosition { line: self.line, column: self.column + offset, offset: self.offset + offset }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSpan {
    pub begin: InputPosition,
    pub end: InputPosition,
}

impl InputSpan {
    #[inline]
    pub fn from_positions(begin: InputPosition, end: InputPosition) -> Self {
        Self { begin, end }
    }
}

/// Wrapper around source text with a file name. Ensures that the text is
/// only scanned once.
pub struct InputSource {
    pub(crate) filename: String,
    pub(crate) input: Vec<u8>,
    // Iteration
    line: u32,
    column: u32,
    offset: usize,
    // State tracking
    pub(crate) had_error: Option<ParseError>,
    // The line start lookup is built on-demand upon attempting to report an
    // error. Only one caller will actually create the lookup, afterwards only
    // read locks will be held.
    offset_lookup: RwLock<Vec<u32>>,
}

impl InputSource {
    pub fn new(filename: String, input: Vec<u8>) -> Self {
        Self {
            filename,
            input,
            line: 1,
            column: 1,
            offset: 0,
            had_error: None,
            offset_lookup: RwLock::new(Vec::new()),
        }
    }

    #[cfg(test)]
    pub fn new_test(input: &str) -> Self {
        Self::new(String::from("test.go"), Vec::from(input.as_bytes()))
    }

    #[inline]
    pub fn pos(&self) -> InputPosition {
        InputPosition { line: self.line, column: self.column, offset: self.offset as u32 }
    }

    pub fn next(&self) -> Option<u8> {
        self.input.get(self.offset).copied()
    }

    pub fn lookahead(&self, offset: usize) -> Option<u8> {
        self.input.get(self.offset + offset).copied()
    }

    #[inline]
    pub fn section_at_span(&self, span: InputSpan) -> &[u8] {
        &self.input[span.begin.offset as usize..span.end.offset as usize]
    }

    /// Text covered by the span, as long as it is valid UTF-8.
    pub fn text_at_span(&self, span: InputSpan) -> &str {
        std::str::from_utf8(self.section_at_span(span)).unwrap_or("")
    }

    // Consumes the next character. Will check well-formedness of newlines: \r
    // must be followed by a \n, because this is used for error reporting.
    pub fn consume(&mut self) {
        match self.next() {
            Some(b'\r') => {
                self.offset += 1;
                self.column += 1;
                if Some(b'\n') != self.next() {
                    self.set_error("encountered carriage return without a following newline");
                }
            }
            Some(b'\n') => {
                self.line += 1;
                self.column = 1;
                self.offset += 1;
            }
            Some(c) => {
                self.offset += 1;
                // Continuation bytes of a multi-byte character do not start
                // a new column.
                if c & 0xC0 != 0x80 {
                    self.column += 1;
                }
            }
            None => {}
        }

        debug_assert!(self.offset < u32::max_value() as usize);
    }

    fn set_error(&mut self, msg: &str) {
        if self.had_error.is_none() {
            self.had_error = Some(ParseError::new_error_str_at_pos(self, self.pos(), msg));
        }
    }

    fn get_lookup(&self) -> RwLockReadGuard<'_, Vec<u32>> {
        // Once constructed the lookup always contains at least two elements.
        {
            let lookup = self.offset_lookup.read();
            if !lookup.is_empty() {
                return lookup;
            }
        }

        let mut lookup = self.offset_lookup.write();
        if lookup.is_empty() {
            // Line number (!) to offset lookup, so offset by 1
            lookup.push(0); // line 0: never used
            lookup.push(0); // first line: first character
            for (char_idx, c) in self.input.iter().enumerate() {
                if *c == b'\n' {
                    lookup.push(char_idx as u32 + 1);
                }
            }
        }
        drop(lookup);
        self.offset_lookup.read()
    }

    /// Retrieves offset at which line starts (right after newline)
    fn lookup_line_start_offset(&self, line_number: u32) -> u32 {
        let lookup = self.get_lookup();
        let idx = (line_number as usize).min(lookup.len() - 1);
        lookup[idx]
    }

    /// Retrieves offset at which line ends (at the newline character or the
    /// preceding carriage return for \r\n-encoded newlines)
    fn lookup_line_end_offset(&self, line_number: u32) -> u32 {
        let next_start = {
            let lookup = self.get_lookup();
            let next = line_number as usize + 1;
            if next < lookup.len() {
                lookup[next] - 1 // at the newline
            } else {
                self.input.len() as u32
            }
        };

        let mut end = next_start;
        if end > 0 && (end as usize) <= self.input.len() && self.input.get(end as usize - 1) == Some(&b'\r') {
            end -= 1;
        }
        end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    SingleLine,
    MultiLine,
}

#[derive(Debug, Clone)]
pub struct ParseErrorStatement {
    pub(crate) statement_kind: StatementKind,
    pub(crate) context_kind: ContextKind,
    pub(crate) start_line: u32,
    pub(crate) start_column: u32,
    pub(crate) end_line: u32,
    pub(crate) end_column: u32,
    pub(crate) filename: String,
    pub(crate) context: String,
    pub(crate) message: String,
}

impl ParseErrorStatement {
    fn from_source_at_pos(statement_kind: StatementKind, source: &InputSource, position: InputPosition, message: String) -> Self {
        let line_start = source.lookup_line_start_offset(position.line);
        let line_end = source.lookup_line_end_offset(position.line).max(line_start);
        let context = Self::create_context(source, line_start as usize, line_end as usize);
        let column = position.offset.saturating_sub(line_start) + 1;

        Self {
            statement_kind,
            context_kind: ContextKind::SingleLine,
            start_line: position.line,
            start_column: column,
            end_line: position.line,
            end_column: column + 1,
            filename: source.filename.clone(),
            context,
            message,
        }
    }

    fn from_source_at_span(statement_kind: StatementKind, source: &InputSource, span: InputSpan, message: String) -> Self {
        debug_assert!(span.end.line >= span.begin.line);
        debug_assert!(span.end.offset >= span.begin.offset);

        let first_line_start = source.lookup_line_start_offset(span.begin.line);
        let last_line_start = source.lookup_line_start_offset(span.end.line);
        let last_line_end = source.lookup_line_end_offset(span.end.line).max(last_line_start);
        let context = Self::create_context(source, first_line_start as usize, last_line_end as usize);
        let start_column = span.begin.offset.saturating_sub(first_line_start) + 1;
        let end_column = span.end.offset.saturating_sub(last_line_start) + 1;

        let context_kind = if span.begin.line == span.end.line {
            ContextKind::SingleLine
        } else {
            ContextKind::MultiLine
        };

        Self {
            statement_kind,
            context_kind,
            start_line: span.begin.line,
            start_column,
            end_line: span.end.line,
            end_column: end_column.max(start_column + 1),
            filename: source.filename.clone(),
            context,
            message,
        }
    }

    /// Produces context from source
    fn create_context(source: &InputSource, start: usize, end: usize) -> String {
        let end = end.min(source.input.len());
        let start = start.min(end);
        String::from_utf8_lossy(&source.input[start..end]).to_string()
    }
}

impl fmt::Display for ParseErrorStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Write kind of statement and message
        match self.statement_kind {
            StatementKind::Info => f.write_str(" INFO: ")?,
            StatementKind::Error => f.write_str("ERROR: ")?,
        }
        f.write_str(&self.message)?;
        f.write_char('\n')?;

        // Write originating file/line/column
        f.write_str(" +- ")?;
        if !self.filename.is_empty() {
            write!(f, "in {} ", self.filename)?;
        }

        match self.context_kind {
            ContextKind::SingleLine => writeln!(f, "at {}:{}", self.start_line, self.start_column),
            ContextKind::MultiLine => writeln!(
                f, "from {}:{} to {}:{}",
                self.start_line, self.start_column, self.end_line, self.end_column
            ),
        }?;

        // Tabs become 4 spaces, both in the context and in the annotation
        fn transform_context(source: &str, target: &mut String) {
            for char in source.chars() {
                if char == '\t' {
                    target.push_str("    ");
                } else {
                    target.push(char);
                }
            }
        }

        // Extends the annotation for columns [first_col, last_col)
        fn extend_annotation(first_col: u32, last_col: u32, source: &str, target: &mut String, extend_char: char) {
            let mut col = 1;
            for char in source.chars() {
                if col >= last_col {
                    break;
                }
                if col >= first_col {
                    if char == '\t' {
                        for _ in 0..4 { target.push(extend_char); }
                    } else {
                        target.push(extend_char);
                    }
                }
                col += 1;
            }
            // Annotating past the end of the line (e.g. at end of input)
            while col < last_col {
                if col >= first_col {
                    target.push(extend_char);
                }
                col += 1;
            }
        }

        writeln!(f, " | ")?;

        let mut context = String::with_capacity(128);
        let mut annotation = String::with_capacity(128);

        match self.context_kind {
            ContextKind::SingleLine => {
                context.push_str(" | ");
                transform_context(&self.context, &mut context);
                context.push('\n');
                f.write_str(&context)?;

                annotation.push_str(" | ");
                extend_annotation(1, self.start_column, &self.context, &mut annotation, ' ');
                extend_annotation(self.start_column, self.end_column, &self.context, &mut annotation, '~');
                annotation.push('\n');
                f.write_str(&annotation)?;
            }
            ContextKind::MultiLine => {
                let mut lines = self.context.lines();
                let first_line = lines.next().unwrap_or("");
                transform_context(first_line, &mut context);
                writeln!(f, " |- {}", &context)?;

                let mut last_line = first_line;
                for cur_line in lines {
                    context.clear();
                    transform_context(cur_line, &mut context);
                    writeln!(f, " |  {}", &context)?;
                    last_line = cur_line;
                }

                annotation.push_str(" \\__");
                extend_annotation(1, self.end_column, last_line, &mut annotation, '_');
                annotation.push_str("/\n");
                f.write_str(&annotation)?;
            }
        }

        Ok(())
    }
}

/// Error produced while turning source text into an executable node graph:
/// syntax errors, unresolved names, type errors and failed instantiations.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub(crate) statements: Vec<ParseErrorStatement>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.statements.is_empty() {
            return Ok(());
        }

        self.statements[0].fmt(f)?;
        for statement in self.statements.iter().skip(1) {
            writeln!(f)?;
            statement.fmt(f)?;
        }

        Ok(())
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    pub fn new_error_at_pos(source: &InputSource, position: InputPosition, message: String) -> Self {
        Self { statements: vec![ParseErrorStatement::from_source_at_pos(
            StatementKind::Error, source, position, message,
        )] }
    }

    pub fn new_error_str_at_pos(source: &InputSource, position: InputPosition, message: &str) -> Self {
        Self::new_error_at_pos(source, position, message.to_string())
    }

    pub fn new_error_at_span(source: &InputSource, span: InputSpan, message: String) -> Self {
        Self { statements: vec![ParseErrorStatement::from_source_at_span(
            StatementKind::Error, source, span, message,
        )] }
    }

    pub fn new_error_str_at_span(source: &InputSource, span: InputSpan, message: &str) -> Self {
        Self::new_error_at_span(source, span, message.to_string())
    }

    /// An error without any source context, used for text that is not part
    /// of an evaluated unit (e.g. a native function signature).
    pub fn new_detached(filename: &str, message: String) -> Self {
        Self { statements: vec![ParseErrorStatement {
            statement_kind: StatementKind::Error,
            context_kind: ContextKind::SingleLine,
            start_line: 0,
            start_column: 1,
            end_line: 0,
            end_column: 2,
            filename: filename.to_string(),
            context: String::new(),
            message,
        }] }
    }

    pub fn with_at_pos(mut self, error_type: StatementKind, source: &InputSource, position: InputPosition, message: String) -> Self {
        self.statements.push(ParseErrorStatement::from_source_at_pos(error_type, source, position, message));
        self
    }

    pub fn with_info_at_pos(self, source: &InputSource, position: InputPosition, msg: String) -> Self {
        self.with_at_pos(StatementKind::Info, source, position, msg)
    }

    pub fn with_info_str_at_pos(self, source: &InputSource, position: InputPosition, msg: &str) -> Self {
        self.with_at_pos(StatementKind::Info, source, position, msg.to_string())
    }

    /// Message of the first (primary) statement.
    pub fn message(&self) -> &str {
        self.statements.first().map(|s| s.message.as_str()).unwrap_or("")
    }

    /// Line and column of the primary statement.
    pub fn line_column(&self) -> (u32, u32) {
        self.statements.first().map(|s| (s.start_line, s.start_column)).unwrap_or((0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_points_at_column() {
        let mut source = InputSource::new_test("x := 1\ny := @\n");
        while source.pos().line < 2 {
            source.consume();
        }
        for _ in 0..5 {
            source.consume();
        }
        let err = ParseError::new_error_str_at_pos(&source, source.pos(), "unexpected '@'");
        let rendered = err.to_string();
        assert!(rendered.starts_with("ERROR: unexpected '@'\n"));
        assert!(rendered.contains("in test.go at 2:6"));
        assert!(rendered.contains(" | y := @\n"));
        assert!(rendered.contains(" |      ~\n"));
        assert_eq!(err.line_column(), (2, 6));
    }

    #[test]
    fn error_at_end_of_input() {
        let mut source = InputSource::new_test("func main() {");
        while source.next().is_some() {
            source.consume();
        }
        let err = ParseError::new_error_str_at_pos(&source, source.pos(), "expected '}', found 'EOF'");
        assert_eq!(err.message(), "expected '}', found 'EOF'");
        assert!(err.to_string().contains("at 1:14"));
    }
}
