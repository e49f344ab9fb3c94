use super::input_source::{InputPosition, InputSpan};

/// Represents a particular kind of token. Tokens up to and including
/// `TokenKind::Char` have a variable length, the text they cover is found
/// through the token's span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum TokenKind {
    // Variable-character tokens
    Ident,          // identifier or keyword
    Integer,        // integer literal (decimal, hex, octal, binary)
    Float,          // floating point literal
    String,         // interpreted string literal, range includes `"`
    RawString,      // raw string literal, range includes the backquotes
    Char,           // rune literal, range includes `'`
    // Punctuation
    OpenParen,      // (
    CloseParen,     // )
    OpenSquare,     // [
    CloseSquare,    // ]
    OpenCurly,      // {
    CloseCurly,     // }
    Comma,          // ,
    Dot,            // .
    Ellipsis,       // ...
    SemiColon,      // ; (explicit or inserted at a newline)
    Colon,          // :
    // Operators
    Plus,           // +
    Minus,          // -
    Star,           // *
    Slash,          // /
    Percent,        // %
    And,            // &
    Or,             // |
    Caret,          // ^
    ShiftLeft,      // <<
    ShiftRight,     // >>
    AndNot,         // &^
    PlusEquals,     // +=
    MinusEquals,    // -=
    StarEquals,     // *=
    SlashEquals,    // /=
    PercentEquals,  // %=
    AndEquals,      // &=
    OrEquals,       // |=
    CaretEquals,    // ^=
    ShiftLeftEquals,  // <<=
    ShiftRightEquals, // >>=
    AndNotEquals,   // &^=
    AndAnd,         // &&
    OrOr,           // ||
    ArrowLeft,      // <-
    PlusPlus,       // ++
    MinusMinus,     // --
    EqualEqual,     // ==
    NotEqual,       // !=
    Less,           // <
    LessEqual,      // <=
    Greater,        // >
    GreaterEqual,   // >=
    Equal,          // =
    ColonEquals,    // :=
    Exclamation,    // !
    Tilde,          // ~
    // End of input, always the last token in a buffer
    Eof,
}

impl TokenKind {
    pub fn has_variable_length(&self) -> bool {
        *self <= TokenKind::Char
    }

    /// Returns the characters that are represented by the token, may only be
    /// called on tokens that do not have a variable length.
    pub fn token_chars(&self) -> &'static str {
        use TokenKind as TK;
        match self {
            TK::OpenParen => "(",
            TK::CloseParen => ")",
            TK::OpenSquare => "[",
            TK::CloseSquare => "]",
            TK::OpenCurly => "{",
            TK::CloseCurly => "}",
            TK::Comma => ",",
            TK::Dot => ".",
            TK::Ellipsis => "...",
            TK::SemiColon => ";",
            TK::Colon => ":",
            TK::Plus => "+",
            TK::Minus => "-",
            TK::Star => "*",
            TK::Slash => "/",
            TK::Percent => "%",
            TK::And => "&",
            TK::Or => "|",
            TK::Caret => "^",
            TK::ShiftLeft => "<<",
            TK::ShiftRight => ">>",
            TK::AndNot => "&^",
            TK::PlusEquals => "+=",
            TK::MinusEquals => "-=",
            TK::StarEquals => "*=",
            TK::SlashEquals => "/=",
            TK::PercentEquals => "%=",
            TK::AndEquals => "&=",
            TK::OrEquals => "|=",
            TK::CaretEquals => "^=",
            TK::ShiftLeftEquals => "<<=",
            TK::ShiftRightEquals => ">>=",
            TK::AndNotEquals => "&^=",
            TK::AndAnd => "&&",
            TK::OrOr => "||",
            TK::ArrowLeft => "<-",
            TK::PlusPlus => "++",
            TK::MinusMinus => "--",
            TK::EqualEqual => "==",
            TK::NotEqual => "!=",
            TK::Less => "<",
            TK::LessEqual => "<=",
            TK::Greater => ">",
            TK::GreaterEqual => ">=",
            TK::Equal => "=",
            TK::ColonEquals => ":=",
            TK::Exclamation => "!",
            TK::Tilde => "~",
            TK::Eof => "EOF",
            TK::Ident | TK::Integer | TK::Float | TK::String | TK::RawString | TK::Char => unreachable!(),
        }
    }
}

/// Represents a single token at a particular position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: InputSpan,
    /// Semicolon inserted by the tokenizer at a newline or at the end of the
    /// input, rather than written in the source.
    pub implicit: bool,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, begin: InputPosition, end: InputPosition) -> Self {
        Self{ kind, span: InputSpan::from_positions(begin, end), implicit: false }
    }

    pub(crate) fn pos(&self) -> InputPosition {
        self.span.begin
    }
}

pub(crate) struct TokenBuffer {
    pub tokens: Vec<Token>,
}

impl TokenBuffer {
    pub(crate) fn new() -> Self {
        Self{ tokens: Vec::new() }
    }
}

// Keywords
pub(crate) const KW_BREAK:     &'static [u8] = b"break";
pub(crate) const KW_CASE:      &'static [u8] = b"case";
pub(crate) const KW_CHAN:      &'static [u8] = b"chan";
pub(crate) const KW_CONST:     &'static [u8] = b"const";
pub(crate) const KW_CONTINUE:  &'static [u8] = b"continue";
pub(crate) const KW_DEFAULT:   &'static [u8] = b"default";
pub(crate) const KW_DEFER:     &'static [u8] = b"defer";
pub(crate) const KW_ELSE:      &'static [u8] = b"else";
pub(crate) const KW_FOR:       &'static [u8] = b"for";
pub(crate) const KW_FUNC:      &'static [u8] = b"func";
pub(crate) const KW_GO:        &'static [u8] = b"go";
pub(crate) const KW_GOTO:      &'static [u8] = b"goto";
pub(crate) const KW_IF:        &'static [u8] = b"if";
pub(crate) const KW_IMPORT:    &'static [u8] = b"import";
pub(crate) const KW_INTERFACE: &'static [u8] = b"interface";
pub(crate) const KW_MAP:       &'static [u8] = b"map";
pub(crate) const KW_PACKAGE:   &'static [u8] = b"package";
pub(crate) const KW_RANGE:     &'static [u8] = b"range";
pub(crate) const KW_RETURN:    &'static [u8] = b"return";
pub(crate) const KW_SELECT:    &'static [u8] = b"select";
pub(crate) const KW_STRUCT:    &'static [u8] = b"struct";
pub(crate) const KW_SWITCH:    &'static [u8] = b"switch";
pub(crate) const KW_TYPE:      &'static [u8] = b"type";
pub(crate) const KW_VAR:       &'static [u8] = b"var";

pub(crate) fn is_keyword(ident: &[u8]) -> bool {
    matches!(
        ident,
        KW_BREAK | KW_CASE | KW_CHAN | KW_CONST | KW_CONTINUE | KW_DEFAULT | KW_DEFER |
        KW_ELSE | KW_FOR | KW_FUNC | KW_GO | KW_GOTO | KW_IF | KW_IMPORT | KW_INTERFACE |
        KW_MAP | KW_PACKAGE | KW_RANGE | KW_RETURN | KW_SELECT | KW_STRUCT | KW_SWITCH |
        KW_TYPE | KW_VAR
    )
}
