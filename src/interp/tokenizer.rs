use super::input_source::{InputPosition, InputSource, ParseError};
use super::tokens::*;

/// Tokenizer for a single unit of source text. Besides splitting the input
/// into tokens it inserts the statement terminators that the language leaves
/// implicit: a newline (or the end of input) after a token that may end a
/// statement produces a `SemiColon` token.
pub(crate) struct Tokenizer {
    // Whether the last emitted token may end a statement
    may_end_statement: bool,
}

impl Tokenizer {
    pub(crate) fn new() -> Self {
        Self{ may_end_statement: false }
    }

    pub(crate) fn tokenize(&mut self, source: &mut InputSource, target: &mut TokenBuffer) -> Result<(), ParseError> {
        debug_assert_eq!(source.pos().offset, 0);
        debug_assert!(target.tokens.is_empty());
        self.may_end_statement = false;

        while let Some(c) = source.next() {
            if c == b'\n' {
                let pos = source.pos();
                source.consume();
                self.maybe_insert_semicolon(pos, target);
            } else if is_whitespace(c) {
                source.consume();
            } else if c == b'/' && source.lookahead(1) == Some(b'/') {
                // Line comment, behaves like the newline that ends it
                while let Some(c) = source.next() {
                    if c == b'\n' {
                        break;
                    }
                    source.consume();
                }
            } else if c == b'/' && source.lookahead(1) == Some(b'*') {
                let had_newline = self.consume_block_comment(source)?;
                if had_newline {
                    self.maybe_insert_semicolon(source.pos(), target);
                }
            } else if is_identifier_start(c) {
                self.consume_identifier(source, target);
            } else if is_digit(c) || (c == b'.' && source.lookahead(1).map_or(false, is_digit)) {
                self.consume_number(source, target)?;
            } else if c == b'"' {
                self.consume_string_literal(source, target)?;
            } else if c == b'`' {
                self.consume_raw_string_literal(source, target)?;
            } else if c == b'\'' {
                self.consume_char_literal(source, target)?;
            } else {
                self.consume_punctuation(c, source, target)?;
            }
        }

        if let Some(error) = source.had_error.take() {
            return Err(error);
        }

        let end = source.pos();
        self.maybe_insert_semicolon(end, target);
        target.tokens.push(Token::new(TokenKind::Eof, end, end));
        Ok(())
    }

    fn maybe_insert_semicolon(&mut self, pos: InputPosition, target: &mut TokenBuffer) {
        if self.may_end_statement {
            let mut token = Token::new(TokenKind::SemiColon, pos, pos.with_offset(1));
            token.implicit = true;
            target.tokens.push(token);
            self.may_end_statement = false;
        }
    }

    fn push(&mut self, target: &mut TokenBuffer, token: Token, may_end_statement: bool) {
        target.tokens.push(token);
        self.may_end_statement = may_end_statement;
    }

    fn consume_block_comment(&mut self, source: &mut InputSource) -> Result<bool, ParseError> {
        let begin = source.pos();
        source.consume();
        source.consume();
        let mut had_newline = false;
        loop {
            match source.next() {
                Some(b'*') if source.lookahead(1) == Some(b'/') => {
                    source.consume();
                    source.consume();
                    return Ok(had_newline);
                }
                Some(c) => {
                    had_newline |= c == b'\n';
                    source.consume();
                }
                None => {
                    return Err(ParseError::new_error_str_at_pos(source, begin, "comment not terminated"));
                }
            }
        }
    }

    fn consume_identifier(&mut self, source: &mut InputSource, target: &mut TokenBuffer) {
        let begin = source.pos();
        while let Some(c) = source.next() {
            if !is_identifier_char(c) {
                break;
            }
            source.consume();
        }
        let end = source.pos();
        let ident = &source.input[begin.offset as usize..end.offset as usize];
        let may_end = !is_keyword(ident) || matches!(ident, KW_BREAK | KW_CONTINUE | KW_RETURN);
        self.push(target, Token::new(TokenKind::Ident, begin, end), may_end);
    }

    fn consume_number(&mut self, source: &mut InputSource, target: &mut TokenBuffer) -> Result<(), ParseError> {
        let begin = source.pos();
        let mut kind = TokenKind::Integer;

        let first = source.next();
        let second = source.lookahead(1).map(|c| c.to_ascii_lowercase());
        if first == Some(b'0') && matches!(second, Some(b'x') | Some(b'b') | Some(b'o')) {
            source.consume();
            source.consume();
            while let Some(c) = source.next() {
                if !(c.is_ascii_hexdigit() || c == b'_') {
                    break;
                }
                source.consume();
            }
        } else {
            self.consume_digits(source);
            if source.next() == Some(b'.') {
                kind = TokenKind::Float;
                source.consume();
                self.consume_digits(source);
            }
            if matches!(source.next(), Some(b'e') | Some(b'E')) {
                kind = TokenKind::Float;
                source.consume();
                if matches!(source.next(), Some(b'+') | Some(b'-')) {
                    source.consume();
                }
                if !source.next().map_or(false, is_digit) {
                    return Err(ParseError::new_error_str_at_pos(source, source.pos(), "exponent has no digits"));
                }
                self.consume_digits(source);
            }
        }

        if source.next().map_or(false, is_identifier_char) {
            return Err(ParseError::new_error_str_at_pos(source, source.pos(), "invalid character in number literal"));
        }

        let end = source.pos();
        self.push(target, Token::new(kind, begin, end), true);
        Ok(())
    }

    fn consume_digits(&mut self, source: &mut InputSource) {
        while let Some(c) = source.next() {
            if !(is_digit(c) || c == b'_') {
                break;
            }
            source.consume();
        }
    }

    fn consume_string_literal(&mut self, source: &mut InputSource, target: &mut TokenBuffer) -> Result<(), ParseError> {
        let begin = source.pos();
        source.consume();
        let mut prev_escape = false;
        loop {
            match source.next() {
                Some(b'"') if !prev_escape => {
                    source.consume();
                    break;
                }
                Some(b'\n') | None => {
                    return Err(ParseError::new_error_str_at_pos(source, begin, "string literal not terminated"));
                }
                Some(c) => {
                    prev_escape = c == b'\\' && !prev_escape;
                    source.consume();
                }
            }
        }
        let end = source.pos();
        self.push(target, Token::new(TokenKind::String, begin, end), true);
        Ok(())
    }

    fn consume_raw_string_literal(&mut self, source: &mut InputSource, target: &mut TokenBuffer) -> Result<(), ParseError> {
        let begin = source.pos();
        source.consume();
        loop {
            match source.next() {
                Some(b'`') => {
                    source.consume();
                    break;
                }
                Some(_) => source.consume(),
                None => {
                    return Err(ParseError::new_error_str_at_pos(source, begin, "raw string literal not terminated"));
                }
            }
        }
        let end = source.pos();
        self.push(target, Token::new(TokenKind::RawString, begin, end), true);
        Ok(())
    }

    fn consume_char_literal(&mut self, source: &mut InputSource, target: &mut TokenBuffer) -> Result<(), ParseError> {
        let begin = source.pos();
        source.consume();
        let mut prev_escape = false;
        loop {
            match source.next() {
                Some(b'\'') if !prev_escape => {
                    source.consume();
                    break;
                }
                Some(b'\n') | None => {
                    return Err(ParseError::new_error_str_at_pos(source, begin, "rune literal not terminated"));
                }
                Some(c) => {
                    prev_escape = c == b'\\' && !prev_escape;
                    source.consume();
                }
            }
        }
        let end = source.pos();
        self.push(target, Token::new(TokenKind::Char, begin, end), true);
        Ok(())
    }

    fn consume_punctuation(&mut self, first_char: u8, source: &mut InputSource, target: &mut TokenBuffer) -> Result<(), ParseError> {
        let begin = source.pos();
        let second = source.lookahead(1);
        let third = source.lookahead(2);

        use TokenKind as TK;
        let (kind, len) = match first_char {
            b'(' => (TK::OpenParen, 1),
            b')' => (TK::CloseParen, 1),
            b'[' => (TK::OpenSquare, 1),
            b']' => (TK::CloseSquare, 1),
            b'{' => (TK::OpenCurly, 1),
            b'}' => (TK::CloseCurly, 1),
            b',' => (TK::Comma, 1),
            b';' => (TK::SemiColon, 1),
            b'~' => (TK::Tilde, 1),
            b'.' => {
                if second == Some(b'.') && third == Some(b'.') { (TK::Ellipsis, 3) } else { (TK::Dot, 1) }
            }
            b':' => {
                if second == Some(b'=') { (TK::ColonEquals, 2) } else { (TK::Colon, 1) }
            }
            b'+' => match second {
                Some(b'+') => (TK::PlusPlus, 2),
                Some(b'=') => (TK::PlusEquals, 2),
                _ => (TK::Plus, 1),
            },
            b'-' => match second {
                Some(b'-') => (TK::MinusMinus, 2),
                Some(b'=') => (TK::MinusEquals, 2),
                _ => (TK::Minus, 1),
            },
            b'*' => if second == Some(b'=') { (TK::StarEquals, 2) } else { (TK::Star, 1) },
            b'/' => if second == Some(b'=') { (TK::SlashEquals, 2) } else { (TK::Slash, 1) },
            b'%' => if second == Some(b'=') { (TK::PercentEquals, 2) } else { (TK::Percent, 1) },
            b'^' => if second == Some(b'=') { (TK::CaretEquals, 2) } else { (TK::Caret, 1) },
            b'=' => if second == Some(b'=') { (TK::EqualEqual, 2) } else { (TK::Equal, 1) },
            b'!' => if second == Some(b'=') { (TK::NotEqual, 2) } else { (TK::Exclamation, 1) },
            b'&' => match (second, third) {
                (Some(b'&'), _) => (TK::AndAnd, 2),
                (Some(b'^'), Some(b'=')) => (TK::AndNotEquals, 3),
                (Some(b'^'), _) => (TK::AndNot, 2),
                (Some(b'='), _) => (TK::AndEquals, 2),
                _ => (TK::And, 1),
            },
            b'|' => match second {
                Some(b'|') => (TK::OrOr, 2),
                Some(b'=') => (TK::OrEquals, 2),
                _ => (TK::Or, 1),
            },
            b'<' => match (second, third) {
                (Some(b'<'), Some(b'=')) => (TK::ShiftLeftEquals, 3),
                (Some(b'<'), _) => (TK::ShiftLeft, 2),
                (Some(b'='), _) => (TK::LessEqual, 2),
                (Some(b'-'), _) => (TK::ArrowLeft, 2),
                _ => (TK::Less, 1),
            },
            b'>' => match (second, third) {
                (Some(b'>'), Some(b'=')) => (TK::ShiftRightEquals, 3),
                (Some(b'>'), _) => (TK::ShiftRight, 2),
                (Some(b'='), _) => (TK::GreaterEqual, 2),
                _ => (TK::Greater, 1),
            },
            c => {
                let msg = if c.is_ascii_graphic() {
                    format!("invalid character '{}'", c as char)
                } else {
                    format!("invalid character {:#04x}", c)
                };
                return Err(ParseError::new_error_at_pos(source, begin, msg));
            }
        };

        for _ in 0..len {
            source.consume();
        }
        let end = source.pos();
        let may_end = matches!(kind, TK::CloseParen | TK::CloseSquare | TK::CloseCurly | TK::PlusPlus | TK::MinusMinus);
        self.push(target, Token::new(kind, begin, end), may_end);
        Ok(())
    }
}

#[inline]
fn is_whitespace(c: u8) -> bool {
    c == b' ' || c == b'\t' || c == b'\r'
}

#[inline]
fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

#[inline]
fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

#[inline]
fn is_identifier_char(c: u8) -> bool {
    is_identifier_start(c) || is_digit(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut source = InputSource::new_test(src);
        let mut buffer = TokenBuffer::new();
        Tokenizer::new().tokenize(&mut source, &mut buffer).expect("tokenize");
        buffer.tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn inserts_statement_terminators() {
        use TokenKind as TK;
        assert_eq!(
            kinds("x := 1\nx++\nif x {\n}"),
            vec![
                TK::Ident, TK::ColonEquals, TK::Integer, TK::SemiColon,
                TK::Ident, TK::PlusPlus, TK::SemiColon,
                TK::Ident, TK::Ident, TK::OpenCurly, TK::CloseCurly, TK::SemiColon,
                TK::Eof,
            ]
        );
        // No terminator after an operator or an opening brace
        assert_eq!(kinds("a +\nb"), vec![TK::Ident, TK::Plus, TK::Ident, TK::SemiColon, TK::Eof]);
        assert_eq!(kinds("return // done\n"), vec![TK::Ident, TK::SemiColon, TK::Eof]);
    }

    #[test]
    fn maximal_munch_operators() {
        use TokenKind as TK;
        assert_eq!(
            kinds("a &^= b <<= c <- d ... :="),
            vec![
                TK::Ident, TK::AndNotEquals, TK::Ident, TK::ShiftLeftEquals, TK::Ident,
                TK::ArrowLeft, TK::Ident, TK::Ellipsis, TK::ColonEquals, TK::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_strings() {
        use TokenKind as TK;
        assert_eq!(
            kinds("0x1F 1_000 3.5 1e9 .5 'a' \"s\\\"\" `raw\nline`"),
            vec![
                TK::Integer, TK::Integer, TK::Float, TK::Float, TK::Float,
                TK::Char, TK::String, TK::RawString, TK::SemiColon, TK::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_raw_string() {
        let mut source = InputSource::new_test("s := `abc");
        let mut buffer = TokenBuffer::new();
        let err = Tokenizer::new().tokenize(&mut source, &mut buffer).unwrap_err();
        assert_eq!(err.message(), "raw string literal not terminated");
    }
}
