use super::ast::*;
use super::input_source::{InputPosition, InputSource, ParseError};
use super::tokenizer::Tokenizer;
use super::tokens::*;

use crate::common::*;

/// Tokenizes and parses a unit of source text into a `File` node of the
/// graph. Nodes allocated for a unit that fails to parse remain in the graph
/// but are never reachable.
pub(crate) fn parse_unit(graph: &mut NodeGraph, unit: u32, source: &mut InputSource) -> Result<NodeId, ParseError> {
    let mut buffer = TokenBuffer::new();
    Tokenizer::new().tokenize(source, &mut buffer)?;
    let mut parser = Parser{
        source,
        tokens: &buffer.tokens,
        cur: 0,
        graph,
        unit,
        no_composite: false,
    };
    parser.consume_file()
}

/// Parses a type written as text, such as the signature of a native function
/// (`func(int, string) error`) or the declared type of a native value.
pub(crate) fn parse_type_text(graph: &mut NodeGraph, unit: u32, source: &mut InputSource) -> Result<NodeId, ParseError> {
    let mut buffer = TokenBuffer::new();
    Tokenizer::new().tokenize(source, &mut buffer)?;
    let mut parser = Parser{
        source,
        tokens: &buffer.tokens,
        cur: 0,
        graph,
        unit,
        no_composite: false,
    };
    let typ = parser.consume_type()?;
    if parser.peek() == TokenKind::SemiColon {
        parser.consume();
    }
    parser.expect(TokenKind::Eof)?;
    Ok(typ)
}

struct Parser<'a> {
    source: &'a InputSource,
    tokens: &'a [Token],
    cur: usize,
    graph: &'a mut NodeGraph,
    unit: u32,
    // Set while parsing the header of an `if` or `for` statement, where a
    // `{` after an identifier opens the body rather than a composite literal
    no_composite: bool,
}

impl<'a> Parser<'a> {
    // --- Token access

    fn token(&self) -> &Token {
        &self.tokens[self.cur.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> TokenKind {
        self.token().kind
    }

    fn peek_at(&self, offset: usize) -> TokenKind {
        let idx = (self.cur + offset).min(self.tokens.len() - 1);
        self.tokens[idx].kind
    }

    fn pos(&self) -> InputPosition {
        self.token().pos()
    }

    fn consume(&mut self) {
        if self.cur < self.tokens.len() - 1 {
            self.cur += 1;
        }
    }

    fn text(&self, token: &Token) -> &'a [u8] {
        let source: &'a InputSource = self.source;
        source.section_at_span(token.span)
    }

    fn has_keyword(&self, keyword: &[u8]) -> bool {
        let token = self.token();
        token.kind == TokenKind::Ident && self.text(token) == keyword
    }

    fn has_keyword_at(&self, offset: usize, keyword: &[u8]) -> bool {
        let idx = (self.cur + offset).min(self.tokens.len() - 1);
        let token = &self.tokens[idx];
        token.kind == TokenKind::Ident && self.text(token) == keyword
    }

    fn describe(&self, token: &Token) -> String {
        if token.kind == TokenKind::SemiColon && token.implicit {
            if token.span.begin.offset as usize >= self.source.input.len() {
                return String::from("'EOF'");
            }
            return String::from("newline");
        }
        if token.kind.has_variable_length() {
            return format!("'{}'", String::from_utf8_lossy(self.text(token)));
        }
        format!("'{}'", token.kind.token_chars())
    }

    fn error_expected(&self, what: &str) -> ParseError {
        let token = *self.token();
        let msg = format!("expected {}, found {}", what, self.describe(&token));
        ParseError::new_error_at_pos(self.source, token.pos(), msg)
    }

    fn error_at(&self, pos: InputPosition, msg: String) -> ParseError {
        ParseError::new_error_at_pos(self.source, pos, msg)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<InputPosition, ParseError> {
        if self.peek() != kind {
            return Err(self.error_expected(&format!("'{}'", kind.token_chars())));
        }
        let pos = self.pos();
        self.consume();
        Ok(pos)
    }

    /// Statement terminator: a semicolon, or nothing before a closing brace
    /// or parenthesis.
    fn expect_terminator(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            TokenKind::SemiColon => {
                self.consume();
                Ok(())
            }
            TokenKind::CloseCurly | TokenKind::CloseParen | TokenKind::Eof => Ok(()),
            _ => Err(self.error_expected("';'")),
        }
    }

    // --- Node construction

    fn node(&mut self, kind: NodeKind, pos: InputPosition) -> NodeId {
        self.graph.alloc(kind, self.unit, pos)
    }

    fn node_with(&mut self, kind: NodeKind, pos: InputPosition, children: Vec<NodeId>) -> NodeId {
        let id = self.node(kind, pos);
        self.graph.set_children(id, children);
        id
    }

    fn empty(&mut self) -> NodeId {
        let pos = self.pos();
        self.node(NodeKind::Empty, pos)
    }

    fn consume_ident(&mut self) -> Result<NodeId, ParseError> {
        let token = *self.token();
        if token.kind != TokenKind::Ident || is_keyword(self.text(&token)) {
            return Err(self.error_expected("identifier"));
        }
        self.consume();
        let id = self.node(NodeKind::Ident, token.pos());
        self.graph[id].ident = String::from_utf8_lossy(self.text(&token)).to_string();
        Ok(id)
    }

    // --- Units and declarations

    fn consume_file(&mut self) -> Result<NodeId, ParseError> {
        let file = self.node(NodeKind::File, self.pos());
        let mut decls = Vec::new();

        if self.has_keyword(KW_PACKAGE) {
            self.consume();
            let name = self.consume_ident()?;
            self.graph[file].ident = self.graph[name].ident.clone();
            self.expect_terminator()?;
        }

        while self.peek() != TokenKind::Eof {
            if self.peek() == TokenKind::SemiColon {
                self.consume();
                continue;
            }
            if self.has_keyword(KW_IMPORT) {
                self.consume_import_decl(&mut decls)?;
            } else if self.has_keyword(KW_FUNC) && self.is_func_decl() {
                decls.push(self.consume_func_decl()?);
            } else {
                self.consume_stmt_into(&mut decls)?;
            }
            if self.peek() == TokenKind::CloseCurly || self.peek() == TokenKind::CloseParen {
                return Err(self.error_expected("statement"));
            }
            self.expect_terminator()?;
        }

        self.graph.set_children(file, decls);
        Ok(file)
    }

    fn consume_import_decl(&mut self, decls: &mut Vec<NodeId>) -> Result<(), ParseError> {
        self.consume();
        if self.peek() == TokenKind::OpenParen {
            self.consume();
            while self.peek() != TokenKind::CloseParen {
                decls.push(self.consume_import_spec()?);
                self.expect_terminator()?;
                if self.peek() == TokenKind::Eof {
                    return Err(self.error_expected("')'"));
                }
            }
            self.consume();
        } else {
            decls.push(self.consume_import_spec()?);
        }
        Ok(())
    }

    fn consume_import_spec(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        let mut alias = String::new();
        if self.peek() == TokenKind::Dot {
            self.consume();
            alias = String::from(".");
        } else if self.peek() == TokenKind::Ident {
            let name = self.consume_ident()?;
            alias = self.graph[name].ident.clone();
        }
        let token = *self.token();
        if token.kind != TokenKind::String && token.kind != TokenKind::RawString {
            return Err(self.error_expected("import path"));
        }
        let path = self.consume_string_value()?;
        let id = self.node(NodeKind::Import, pos);
        self.graph[id].ident = alias;
        self.graph[id].lit = Some(Literal::String(Arc::from(path)));
        Ok(id)
    }

    /// A `func` at the top level starts a declaration when it is followed by
    /// a name, or by a receiver and then a name.
    fn is_func_decl(&self) -> bool {
        match self.peek_at(1) {
            TokenKind::Ident => true,
            TokenKind::OpenParen => {
                let mut depth = 0;
                let mut idx = self.cur + 1;
                while idx < self.tokens.len() {
                    match self.tokens[idx].kind {
                        TokenKind::OpenParen => depth += 1,
                        TokenKind::CloseParen => {
                            depth -= 1;
                            if depth == 0 {
                                return self.tokens.get(idx + 1).map_or(false, |t| t.kind == TokenKind::Ident);
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    idx += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn consume_func_decl(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        self.consume(); // func

        let recv = if self.peek() == TokenKind::OpenParen {
            self.consume_field_list(TokenKind::OpenParen, TokenKind::CloseParen)?
        } else {
            let pos = self.pos();
            self.node(NodeKind::FieldList, pos)
        };
        let name = self.consume_ident()?;
        let tparams = if self.peek() == TokenKind::OpenSquare {
            self.consume_field_list(TokenKind::OpenSquare, TokenKind::CloseSquare)?
        } else {
            let pos = self.pos();
            self.node(NodeKind::FieldList, pos)
        };
        let ftype = self.consume_signature(pos)?;
        let body = if self.peek() == TokenKind::OpenCurly {
            self.consume_block()?
        } else {
            return Err(self.error_expected("'{'"));
        };

        let decl = self.node_with(NodeKind::FuncDecl, pos, vec![recv, name, tparams, ftype, body]);
        self.graph[decl].ident = self.graph[name].ident.clone();
        let params = self.graph[tparams].children.clone();
        self.graph[decl].params = params;
        Ok(decl)
    }

    /// Parameters and results following `func` or a function name.
    fn consume_signature(&mut self, pos: InputPosition) -> Result<NodeId, ParseError> {
        let params = self.consume_field_list(TokenKind::OpenParen, TokenKind::CloseParen)?;
        let results = match self.peek() {
            TokenKind::OpenParen => self.consume_field_list(TokenKind::OpenParen, TokenKind::CloseParen)?,
            kind if self.starts_type(kind) => {
                let pos = self.pos();
                let typ = self.consume_type()?;
                let field = self.node_with(NodeKind::Field, pos, vec![typ]);
                self.node_with(NodeKind::FieldList, pos, vec![field])
            }
            _ => {
                let pos = self.pos();
                self.node(NodeKind::FieldList, pos)
            }
        };
        Ok(self.node_with(NodeKind::FuncType, pos, vec![params, results]))
    }

    fn starts_type(&self, kind: TokenKind) -> bool {
        match kind {
            TokenKind::Ident => {
                let text = self.text(self.token());
                !is_keyword(text) || matches!(text, KW_FUNC | KW_CHAN | KW_STRUCT | KW_INTERFACE | KW_MAP)
            }
            TokenKind::Star | TokenKind::OpenSquare | TokenKind::ArrowLeft => true,
            _ => false,
        }
    }

    /// Parameter, result, receiver or type parameter list. Entries are either
    /// all named (`a, b int, c string`) or all unnamed (`int, string`).
    fn consume_field_list(&mut self, open: TokenKind, close: TokenKind) -> Result<NodeId, ParseError> {
        let pos = self.expect(open)?;
        // (name, type) per entry, an unnamed entry has only a type
        let mut entries: Vec<(Option<NodeId>, Option<NodeId>)> = Vec::new();

        while self.peek() != close {
            let is_named = self.peek() == TokenKind::Ident
                && !is_keyword(self.text(self.token()))
                && !matches!(self.peek_at(1), TokenKind::Comma | TokenKind::Dot)
                && self.peek_at(1) != close;
            if is_named {
                let name = self.consume_ident()?;
                let typ = self.consume_param_type(open == TokenKind::OpenSquare)?;
                entries.push((Some(name), Some(typ)));
            } else {
                let typ = self.consume_param_type(open == TokenKind::OpenSquare)?;
                entries.push((None, Some(typ)));
            }
            if self.peek() == TokenKind::Comma {
                self.consume();
            } else if self.peek() != close {
                return Err(self.error_expected(&format!("'{}'", close.token_chars())));
            }
        }
        self.consume();

        let mut fields = Vec::new();
        if entries.iter().any(|(name, _)| name.is_some()) {
            // Unnamed entries before a named one are names sharing its type
            let mut names = Vec::new();
            for (name, typ) in entries {
                match (name, typ) {
                    (None, Some(typ)) => {
                        if self.graph[typ].kind != NodeKind::Ident {
                            let pos = self.graph[typ].pos;
                            return Err(self.error_at(pos, String::from("mixed named and unnamed parameters")));
                        }
                        names.push(typ);
                    }
                    (Some(name), Some(typ)) => {
                        names.push(name);
                        let field_pos = self.graph[names[0]].pos;
                        let mut children = std::mem::take(&mut names);
                        children.push(typ);
                        fields.push(self.node_with(NodeKind::Field, field_pos, children));
                    }
                    _ => unreachable!(),
                }
            }
            if let Some(name) = names.first() {
                let pos = self.graph[*name].pos;
                return Err(self.error_at(pos, String::from("mixed named and unnamed parameters")));
            }
        } else {
            for (_, typ) in entries {
                if let Some(typ) = typ {
                    let field_pos = self.graph[typ].pos;
                    fields.push(self.node_with(NodeKind::Field, field_pos, vec![typ]));
                }
            }
        }

        Ok(self.node_with(NodeKind::FieldList, pos, fields))
    }

    fn consume_param_type(&mut self, constraint: bool) -> Result<NodeId, ParseError> {
        if self.peek() == TokenKind::Ellipsis {
            let pos = self.pos();
            self.consume();
            let elem = self.consume_type()?;
            return Ok(self.node_with(NodeKind::Ellipsis, pos, vec![elem]));
        }
        if constraint {
            return self.consume_constraint();
        }
        self.consume_type()
    }

    /// Type constraint: a type, or a union of (approximate) types which is
    /// kept as an interface.
    fn consume_constraint(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        let mut terms = Vec::new();
        loop {
            if self.peek() == TokenKind::Tilde {
                self.consume();
            }
            terms.push(self.consume_type()?);
            if self.peek() != TokenKind::Or {
                break;
            }
            self.consume();
        }
        if terms.len() == 1 {
            return Ok(terms[0]);
        }
        Ok(self.node_with(NodeKind::InterfaceType, pos, terms))
    }

    fn consume_var_spec(&mut self, kind: NodeKind) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        let mut names = vec![self.consume_ident()?];
        while self.peek() == TokenKind::Comma {
            self.consume();
            names.push(self.consume_ident()?);
        }
        let typ = if self.peek() != TokenKind::Equal && self.starts_type(self.peek()) {
            self.consume_type()?
        } else {
            self.empty()
        };
        let mut values = Vec::new();
        if self.peek() == TokenKind::Equal {
            self.consume();
            values = self.consume_expression_list()?;
        } else if kind == NodeKind::ConstDecl {
            return Err(self.error_expected("'='"));
        }

        let nleft = names.len();
        let nright = values.len();
        let mut children = names;
        children.push(typ);
        children.extend(values);
        let id = self.node_with(kind, pos, children);
        self.graph[id].nleft = nleft;
        self.graph[id].nright = nright;
        Ok(id)
    }

    fn consume_type_spec(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        let name = self.consume_ident()?;
        if self.peek() == TokenKind::OpenSquare && self.peek_at(1) != TokenKind::CloseSquare {
            return Err(self.error_at(pos, String::from("generic types are not supported")));
        }
        let mut alias = false;
        if self.peek() == TokenKind::Equal {
            self.consume();
            alias = true;
        }
        let typ = self.consume_type()?;
        let tparams = self.node(NodeKind::FieldList, pos);
        let id = self.node_with(NodeKind::TypeSpec, pos, vec![name, tparams, typ]);
        self.graph[id].ident = self.graph[name].ident.clone();
        if alias {
            self.graph[id].op = Op::Eql;
        }
        Ok(id)
    }

    /// `var`, `const` and `type` declarations, possibly grouped. Each spec
    /// becomes its own node.
    fn consume_decl_into(&mut self, target: &mut Vec<NodeId>) -> Result<(), ParseError> {
        let kind = if self.has_keyword(KW_VAR) {
            NodeKind::VarDecl
        } else if self.has_keyword(KW_CONST) {
            NodeKind::ConstDecl
        } else {
            NodeKind::TypeSpec
        };
        self.consume();

        let spec = |p: &mut Self| -> Result<NodeId, ParseError> {
            if kind == NodeKind::TypeSpec {
                p.consume_type_spec()
            } else {
                p.consume_var_spec(kind)
            }
        };

        if self.peek() == TokenKind::OpenParen {
            self.consume();
            while self.peek() != TokenKind::CloseParen {
                target.push(spec(self)?);
                self.expect_terminator()?;
                if self.peek() == TokenKind::Eof {
                    return Err(self.error_expected("')'"));
                }
            }
            self.consume();
        } else {
            target.push(spec(self)?);
        }
        Ok(())
    }

    // --- Statements

    fn consume_block(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.expect(TokenKind::OpenCurly)?;
        let mut stmts = Vec::new();
        while self.peek() != TokenKind::CloseCurly {
            if self.peek() == TokenKind::Eof {
                return Err(self.error_expected("'}'"));
            }
            if self.peek() == TokenKind::SemiColon {
                self.consume();
                continue;
            }
            self.consume_stmt_into(&mut stmts)?;
            if self.peek() != TokenKind::CloseCurly {
                if self.peek() == TokenKind::Eof {
                    return Err(self.error_expected("'}'"));
                }
                self.expect_terminator()?;
            }
        }
        self.consume();
        Ok(self.node_with(NodeKind::Block, pos, stmts))
    }

    fn consume_stmt_into(&mut self, target: &mut Vec<NodeId>) -> Result<(), ParseError> {
        if self.has_keyword(KW_VAR) || self.has_keyword(KW_CONST) || self.has_keyword(KW_TYPE) {
            return self.consume_decl_into(target);
        }
        let stmt = self.consume_stmt()?;
        target.push(stmt);
        Ok(())
    }

    fn consume_stmt(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        if self.peek() == TokenKind::Ident {
            let text = self.text(self.token());
            match text {
                KW_IF => return self.consume_if_stmt(),
                KW_FOR => return self.consume_for_stmt(),
                KW_RETURN => {
                    self.consume();
                    let values = match self.peek() {
                        TokenKind::SemiColon | TokenKind::CloseCurly | TokenKind::Eof => Vec::new(),
                        _ => self.consume_expression_list()?,
                    };
                    return Ok(self.node_with(NodeKind::Return, pos, values));
                }
                KW_BREAK | KW_CONTINUE => {
                    let kind = if text == KW_BREAK { NodeKind::Break } else { NodeKind::Continue };
                    self.consume();
                    if self.peek() == TokenKind::Ident {
                        return Err(self.error_at(self.pos(), String::from("labels are not supported")));
                    }
                    return Ok(self.node(kind, pos));
                }
                KW_DEFER | KW_GO => {
                    let kind = if text == KW_DEFER { NodeKind::Defer } else { NodeKind::Go };
                    let what = if text == KW_DEFER { "defer" } else { "go" };
                    self.consume();
                    let call = self.consume_expression()?;
                    if self.graph[call].kind != NodeKind::Call {
                        let pos = self.graph[call].pos;
                        return Err(self.error_at(pos, format!("expression in {} must be function call", what)));
                    }
                    return Ok(self.node_with(kind, pos, vec![call]));
                }
                KW_SWITCH | KW_SELECT | KW_GOTO | KW_CASE | KW_DEFAULT | KW_RANGE => {
                    let msg = format!("'{}' statements are not supported", String::from_utf8_lossy(text));
                    return Err(self.error_at(pos, msg));
                }
                KW_VAR | KW_CONST | KW_TYPE => {
                    let mut decls = Vec::new();
                    self.consume_decl_into(&mut decls)?;
                    if decls.len() == 1 {
                        return Ok(decls[0]);
                    }
                    return Ok(self.node_with(NodeKind::Block, pos, decls));
                }
                _ => {}
            }
        }
        match self.peek() {
            TokenKind::OpenCurly => self.consume_block(),
            TokenKind::SemiColon => Ok(self.node(NodeKind::Empty, pos)),
            _ => self.consume_simple_stmt(),
        }
    }

    fn consume_simple_stmt(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        let lhs = self.consume_expression_list()?;

        let kind = self.peek();
        let op = match kind {
            TokenKind::ColonEquals | TokenKind::Equal => {
                self.consume();
                if self.has_keyword(KW_RANGE) {
                    return Err(self.error_at(self.pos(), String::from("'range' clauses are not supported")));
                }
                let rhs = self.consume_expression_list()?;
                let nleft = lhs.len();
                let nright = rhs.len();
                let mut children = lhs;
                children.extend(rhs);
                let node_kind = if kind == TokenKind::ColonEquals { NodeKind::Define } else { NodeKind::Assign };
                let id = self.node_with(node_kind, pos, children);
                self.graph[id].nleft = nleft;
                self.graph[id].nright = nright;
                return Ok(id);
            }
            TokenKind::PlusEquals => Op::Add,
            TokenKind::MinusEquals => Op::Sub,
            TokenKind::StarEquals => Op::Mul,
            TokenKind::SlashEquals => Op::Quo,
            TokenKind::PercentEquals => Op::Rem,
            TokenKind::AndEquals => Op::And,
            TokenKind::OrEquals => Op::Or,
            TokenKind::CaretEquals => Op::Xor,
            TokenKind::ShiftLeftEquals => Op::Shl,
            TokenKind::ShiftRightEquals => Op::Shr,
            TokenKind::AndNotEquals => Op::AndNot,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                self.consume();
                let op = if kind == TokenKind::PlusPlus { Op::Inc } else { Op::Dec };
                let id = self.node_with(NodeKind::IncDec, pos, vec![lhs[0]]);
                self.graph[id].op = op;
                return Ok(id);
            }
            TokenKind::ArrowLeft => {
                self.consume();
                let value = self.consume_expression()?;
                return Ok(self.node_with(NodeKind::Send, pos, vec![lhs[0], value]));
            }
            _ => {
                if lhs.len() > 1 {
                    return Err(self.error_expected("':=' or '=' or ','"));
                }
                return Ok(self.node_with(NodeKind::ExprStmt, pos, lhs));
            }
        };

        self.consume();
        let rhs = self.consume_expression()?;
        let id = self.node_with(NodeKind::OpAssign, pos, vec![lhs[0], rhs]);
        self.graph[id].op = op;
        Ok(id)
    }

    fn consume_if_stmt(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        self.consume(); // if

        let prev = std::mem::replace(&mut self.no_composite, true);
        let first = self.consume_simple_stmt()?;
        let (init, cond_stmt) = if self.peek() == TokenKind::SemiColon && !self.token().implicit {
            self.consume();
            (first, self.consume_simple_stmt()?)
        } else {
            (self.empty(), first)
        };
        self.no_composite = prev;

        if self.graph[cond_stmt].kind != NodeKind::ExprStmt {
            let pos = self.graph[cond_stmt].pos;
            return Err(self.error_at(pos, String::from("cannot use statement as value")));
        }
        let cond = self.graph[cond_stmt].child(0);
        let body = self.consume_block()?;
        let else_branch = if self.has_keyword(KW_ELSE) {
            self.consume();
            if self.has_keyword(KW_IF) {
                self.consume_if_stmt()?
            } else if self.peek() == TokenKind::OpenCurly {
                self.consume_block()?
            } else {
                return Err(self.error_expected("if statement or block"));
            }
        } else {
            self.empty()
        };

        Ok(self.node_with(NodeKind::If, pos, vec![init, cond, body, else_branch]))
    }

    fn consume_for_stmt(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        self.consume(); // for

        let prev = std::mem::replace(&mut self.no_composite, true);
        let (init, cond, post) = if self.peek() == TokenKind::OpenCurly {
            (self.empty(), self.empty(), self.empty())
        } else {
            let first = if self.peek() == TokenKind::SemiColon {
                self.empty()
            } else {
                if self.has_keyword(KW_RANGE) {
                    return Err(self.error_at(self.pos(), String::from("'range' clauses are not supported")));
                }
                self.consume_simple_stmt()?
            };
            if self.peek() == TokenKind::SemiColon {
                self.consume();
                let cond = if self.peek() == TokenKind::SemiColon {
                    self.empty()
                } else {
                    let stmt = self.consume_simple_stmt()?;
                    if self.graph[stmt].kind != NodeKind::ExprStmt {
                        let pos = self.graph[stmt].pos;
                        return Err(self.error_at(pos, String::from("cannot use statement as value")));
                    }
                    self.graph[stmt].child(0)
                };
                self.expect(TokenKind::SemiColon)?;
                let post = if self.peek() == TokenKind::OpenCurly {
                    self.empty()
                } else {
                    self.consume_simple_stmt()?
                };
                (first, cond, post)
            } else {
                if self.graph[first].kind != NodeKind::ExprStmt {
                    let pos = self.graph[first].pos;
                    return Err(self.error_at(pos, String::from("expected for loop condition")));
                }
                let cond = self.graph[first].child(0);
                (self.empty(), cond, self.empty())
            }
        };
        self.no_composite = prev;

        let body = self.consume_block()?;
        Ok(self.node_with(NodeKind::For, pos, vec![init, cond, post, body]))
    }

    // --- Expressions

    fn consume_expression_list(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut list = vec![self.consume_expression()?];
        while self.peek() == TokenKind::Comma {
            self.consume();
            list.push(self.consume_expression()?);
        }
        Ok(list)
    }

    fn consume_expression(&mut self) -> Result<NodeId, ParseError> {
        stacker::maybe_grow(64 * 1024, 1024 * 1024, || self.consume_lor_expression())
    }

    fn binary(&mut self, op: Op, pos: InputPosition, left: NodeId, right: NodeId) -> NodeId {
        let id = self.node_with(NodeKind::Binary, pos, vec![left, right]);
        self.graph[id].op = op;
        id
    }

    fn consume_lor_expression(&mut self) -> Result<NodeId, ParseError> {
        let mut result = self.consume_land_expression()?;
        while self.peek() == TokenKind::OrOr {
            let pos = self.pos();
            self.consume();
            let right = self.consume_land_expression()?;
            result = self.binary(Op::LOr, pos, result, right);
        }
        Ok(result)
    }

    fn consume_land_expression(&mut self) -> Result<NodeId, ParseError> {
        let mut result = self.consume_rel_expression()?;
        while self.peek() == TokenKind::AndAnd {
            let pos = self.pos();
            self.consume();
            let right = self.consume_rel_expression()?;
            result = self.binary(Op::LAnd, pos, result, right);
        }
        Ok(result)
    }

    fn consume_rel_expression(&mut self) -> Result<NodeId, ParseError> {
        let mut result = self.consume_add_expression()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqualEqual => Op::Eql,
                TokenKind::NotEqual => Op::Neq,
                TokenKind::Less => Op::Lss,
                TokenKind::LessEqual => Op::Leq,
                TokenKind::Greater => Op::Gtr,
                TokenKind::GreaterEqual => Op::Geq,
                _ => break,
            };
            let pos = self.pos();
            self.consume();
            let right = self.consume_add_expression()?;
            result = self.binary(op, pos, result, right);
        }
        Ok(result)
    }

    fn consume_add_expression(&mut self) -> Result<NodeId, ParseError> {
        let mut result = self.consume_mul_expression()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => Op::Add,
                TokenKind::Minus => Op::Sub,
                TokenKind::Or => Op::Or,
                TokenKind::Caret => Op::Xor,
                _ => break,
            };
            let pos = self.pos();
            self.consume();
            let right = self.consume_mul_expression()?;
            result = self.binary(op, pos, result, right);
        }
        Ok(result)
    }

    fn consume_mul_expression(&mut self) -> Result<NodeId, ParseError> {
        let mut result = self.consume_prefix_expression()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => Op::Mul,
                TokenKind::Slash => Op::Quo,
                TokenKind::Percent => Op::Rem,
                TokenKind::ShiftLeft => Op::Shl,
                TokenKind::ShiftRight => Op::Shr,
                TokenKind::And => Op::And,
                TokenKind::AndNot => Op::AndNot,
                _ => break,
            };
            let pos = self.pos();
            self.consume();
            let right = self.consume_prefix_expression()?;
            result = self.binary(op, pos, result, right);
        }
        Ok(result)
    }

    fn consume_prefix_expression(&mut self) -> Result<NodeId, ParseError> {
        let pos = self.pos();
        let op = match self.peek() {
            TokenKind::Plus => Op::Pos,
            TokenKind::Minus => Op::Neg,
            TokenKind::Exclamation => Op::Not,
            TokenKind::Caret => Op::BitNot,
            TokenKind::And => Op::Addr,
            TokenKind::ArrowLeft => {
                if self.has_keyword_at(1, KW_CHAN) {
                    return self.consume_postfix_expression();
                }
                Op::Arrow
            }
            TokenKind::Star => {
                self.consume();
                let operand = self.consume_prefix_expression()?;
                return Ok(self.node_with(NodeKind::Star, pos, vec![operand]));
            }
            _ => return self.consume_postfix_expression(),
        };
        self.consume();
        let operand = self.consume_prefix_expression()?;
        let id = self.node_with(NodeKind::Unary, pos, vec![operand]);
        self.graph[id].op = op;
        Ok(id)
    }

    fn consume_postfix_expression(&mut self) -> Result<NodeId, ParseError> {
        let mut result = self.consume_operand()?;
        loop {
            let pos = self.pos();
            match self.peek() {
                TokenKind::Dot => {
                    self.consume();
                    if self.peek() == TokenKind::OpenParen {
                        return Err(self.error_at(pos, String::from("type assertions are not supported")));
                    }
                    let sel = self.consume_ident()?;
                    result = self.node_with(NodeKind::Selector, pos, vec![result, sel]);
                    let name = self.graph[sel].ident.clone();
                    self.graph[result].ident = name;
                }
                TokenKind::OpenSquare => {
                    self.consume();
                    let prev = std::mem::replace(&mut self.no_composite, false);
                    result = self.consume_index_suffix(result, pos)?;
                    self.no_composite = prev;
                }
                TokenKind::OpenParen => {
                    self.consume();
                    let prev = std::mem::replace(&mut self.no_composite, false);
                    let mut children = vec![result];
                    let mut ellipsis = false;
                    while self.peek() != TokenKind::CloseParen {
                        children.push(self.consume_type_or_expression()?);
                        if self.peek() == TokenKind::Ellipsis {
                            self.consume();
                            ellipsis = true;
                        }
                        if self.peek() == TokenKind::Comma {
                            self.consume();
                        } else if self.peek() != TokenKind::CloseParen {
                            return Err(self.error_expected("')'"));
                        }
                    }
                    self.consume();
                    self.no_composite = prev;
                    result = self.node_with(NodeKind::Call, pos, children);
                    self.graph[result].ellipsis = ellipsis;
                }
                TokenKind::OpenCurly if self.may_start_composite(result) => {
                    result = self.consume_composite_literal(result)?;
                }
                _ => break,
            }
        }
        Ok(result)
    }

    fn may_start_composite(&self, typ: NodeId) -> bool {
        match self.graph[typ].kind {
            NodeKind::SliceType | NodeKind::StructType => true,
            NodeKind::Ident | NodeKind::Selector | NodeKind::IndexList => !self.no_composite,
            _ => false,
        }
    }

    fn consume_index_suffix(&mut self, x: NodeId, pos: InputPosition) -> Result<NodeId, ParseError> {
        // Slice expression with omitted low bound
        if self.peek() == TokenKind::Colon {
            self.consume();
            let low = self.empty();
            let high = if self.peek() == TokenKind::CloseSquare { self.empty() } else { self.consume_expression()? };
            self.expect(TokenKind::CloseSquare)?;
            return Ok(self.node_with(NodeKind::SliceExpr, pos, vec![x, low, high]));
        }

        let first = self.consume_type_or_expression()?;
        match self.peek() {
            TokenKind::Colon => {
                self.consume();
                let high = if self.peek() == TokenKind::CloseSquare { self.empty() } else { self.consume_expression()? };
                self.expect(TokenKind::CloseSquare)?;
                Ok(self.node_with(NodeKind::SliceExpr, pos, vec![x, first, high]))
            }
            TokenKind::Comma => {
                let mut children = vec![x, first];
                while self.peek() == TokenKind::Comma {
                    self.consume();
                    if self.peek() == TokenKind::CloseSquare {
                        break;
                    }
                    children.push(self.consume_type_or_expression()?);
                }
                self.expect(TokenKind::CloseSquare)?;
                Ok(self.node_with(NodeKind::IndexList, pos, children))
            }
            _ => {
                self.expect(TokenKind::CloseSquare)?;
                Ok(self.node_with(NodeKind::Index, pos, vec![x, first]))
            }
        }
    }

    /// Call arguments and index operands may be types (`make([]int, 3)`,
    /// `F[[]string]`). Type expressions parse as operands, so a plain
    /// expression covers both.
    fn consume_type_or_expression(&mut self) -> Result<NodeId, ParseError> {
        self.consume_expression()
    }

    fn consume_composite_literal(&mut self, typ: NodeId) -> Result<NodeId, ParseError> {
        let pos = self.expect(TokenKind::OpenCurly)?;
        let prev = std::mem::replace(&mut self.no_composite, false);
        let mut children = vec![typ];
        while self.peek() != TokenKind::CloseCurly {
            let elem = self.consume_element()?;
            let elem = if self.peek() == TokenKind::Colon {
                let kv_pos = self.pos();
                self.consume();
                let value = self.consume_element()?;
                self.node_with(NodeKind::KeyValue, kv_pos, vec![elem, value])
            } else {
                elem
            };
            children.push(elem);
            if self.peek() == TokenKind::Comma {
                self.consume();
            } else if self.peek() != TokenKind::CloseCurly {
                return Err(self.error_expected("',' or '}'"));
            }
        }
        self.consume();
        self.no_composite = prev;
        Ok(self.node_with(NodeKind::CompositeLit, pos, children))
    }

    /// Element of a composite literal; nested literals may elide their type.
    fn consume_element(&mut self) -> Result<NodeId, ParseError> {
        if self.peek() == TokenKind::OpenCurly {
            let elided = self.empty();
            return self.consume_composite_literal(elided);
        }
        self.consume_expression()
    }

    fn consume_operand(&mut self) -> Result<NodeId, ParseError> {
        let token = *self.token();
        let pos = token.pos();
        match token.kind {
            TokenKind::Ident => {
                let text = self.text(&token);
                match text {
                    KW_FUNC => {
                        self.consume();
                        let ftype = self.consume_signature(pos)?;
                        if self.peek() != TokenKind::OpenCurly {
                            return Ok(ftype);
                        }
                        let prev = std::mem::replace(&mut self.no_composite, false);
                        let body = self.consume_block()?;
                        self.no_composite = prev;
                        Ok(self.node_with(NodeKind::FuncLit, pos, vec![ftype, body]))
                    }
                    KW_STRUCT | KW_CHAN | KW_INTERFACE | KW_MAP => self.consume_type(),
                    _ => self.consume_ident(),
                }
            }
            TokenKind::Integer | TokenKind::Float | TokenKind::Char | TokenKind::String | TokenKind::RawString => {
                let lit = self.consume_literal()?;
                let id = self.node(NodeKind::BasicLit, pos);
                self.graph[id].lit = Some(lit);
                Ok(id)
            }
            TokenKind::OpenParen => {
                self.consume();
                let prev = std::mem::replace(&mut self.no_composite, false);
                let inner = self.consume_type_or_expression()?;
                self.no_composite = prev;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            TokenKind::OpenSquare => self.consume_type(),
            TokenKind::ArrowLeft if self.has_keyword_at(1, KW_CHAN) => self.consume_type(),
            _ => Err(self.error_expected("operand")),
        }
    }

    // --- Types

    fn consume_type(&mut self) -> Result<NodeId, ParseError> {
        let token = *self.token();
        let pos = token.pos();
        match token.kind {
            TokenKind::Ident => {
                let text = self.text(&token);
                match text {
                    KW_FUNC => {
                        self.consume();
                        self.consume_signature(pos)
                    }
                    KW_CHAN => {
                        self.consume();
                        let mut op = Op::None;
                        if self.peek() == TokenKind::ArrowLeft {
                            self.consume();
                            op = Op::SendOnly;
                        }
                        let elem = self.consume_type()?;
                        let id = self.node_with(NodeKind::ChanType, pos, vec![elem]);
                        self.graph[id].op = op;
                        Ok(id)
                    }
                    KW_STRUCT => {
                        self.consume();
                        self.expect(TokenKind::OpenCurly)?;
                        let mut fields = Vec::new();
                        while self.peek() != TokenKind::CloseCurly {
                            if self.peek() == TokenKind::SemiColon {
                                self.consume();
                                continue;
                            }
                            let field_pos = self.pos();
                            let mut children = vec![self.consume_ident()?];
                            while self.peek() == TokenKind::Comma {
                                self.consume();
                                children.push(self.consume_ident()?);
                            }
                            if !self.starts_type(self.peek()) {
                                return Err(self.error_at(field_pos, String::from("embedded fields are not supported")));
                            }
                            children.push(self.consume_type()?);
                            fields.push(self.node_with(NodeKind::Field, field_pos, children));
                            if self.peek() != TokenKind::CloseCurly {
                                self.expect_terminator()?;
                            }
                        }
                        self.consume();
                        Ok(self.node_with(NodeKind::StructType, pos, fields))
                    }
                    KW_INTERFACE => {
                        self.consume();
                        self.expect(TokenKind::OpenCurly)?;
                        let mut elems = Vec::new();
                        while self.peek() != TokenKind::CloseCurly {
                            if self.peek() == TokenKind::SemiColon {
                                self.consume();
                                continue;
                            }
                            if self.peek() == TokenKind::Ident && self.peek_at(1) == TokenKind::OpenParen {
                                // Method: only its name is kept
                                let name = self.consume_ident()?;
                                let _ = self.consume_signature(pos)?;
                                elems.push(name);
                            } else {
                                elems.push(self.consume_constraint()?);
                            }
                            if self.peek() != TokenKind::CloseCurly {
                                self.expect_terminator()?;
                            }
                            if self.peek() == TokenKind::Eof {
                                return Err(self.error_expected("'}'"));
                            }
                        }
                        self.consume();
                        Ok(self.node_with(NodeKind::InterfaceType, pos, elems))
                    }
                    KW_MAP => Err(self.error_at(pos, String::from("map types are not supported"))),
                    _ => {
                        let mut id = self.consume_ident()?;
                        if self.peek() == TokenKind::Dot {
                            let sel_pos = self.pos();
                            self.consume();
                            let sel = self.consume_ident()?;
                            let name = self.graph[sel].ident.clone();
                            id = self.node_with(NodeKind::Selector, sel_pos, vec![id, sel]);
                            self.graph[id].ident = name;
                        }
                        Ok(id)
                    }
                }
            }
            TokenKind::Star => {
                self.consume();
                let elem = self.consume_type()?;
                Ok(self.node_with(NodeKind::PointerType, pos, vec![elem]))
            }
            TokenKind::OpenSquare => {
                self.consume();
                if self.peek() != TokenKind::CloseSquare {
                    return Err(self.error_at(pos, String::from("array types are not supported")));
                }
                self.consume();
                let elem = self.consume_type()?;
                Ok(self.node_with(NodeKind::SliceType, pos, vec![elem]))
            }
            TokenKind::ArrowLeft => {
                self.consume();
                if !self.has_keyword(KW_CHAN) {
                    return Err(self.error_expected("'chan'"));
                }
                self.consume();
                let elem = self.consume_type()?;
                let id = self.node_with(NodeKind::ChanType, pos, vec![elem]);
                self.graph[id].op = Op::RecvOnly;
                Ok(id)
            }
            TokenKind::OpenParen => {
                self.consume();
                let inner = self.consume_type()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(inner)
            }
            _ => Err(self.error_expected("type")),
        }
    }

    // --- Literals

    fn consume_string_value(&mut self) -> Result<String, ParseError> {
        match self.consume_literal()? {
            Literal::String(s) => Ok(s.to_string()),
            _ => Err(self.error_expected("string literal")),
        }
    }

    fn consume_literal(&mut self) -> Result<Literal, ParseError> {
        let token = *self.token();
        let text = self.text(&token);
        let pos = token.pos();
        let as_str = String::from_utf8_lossy(text).replace('_', "");
        let lit = match token.kind {
            TokenKind::Integer => {
                let lower = as_str.to_ascii_lowercase();
                let parsed = if let Some(hex) = lower.strip_prefix("0x") {
                    i128::from_str_radix(hex, 16)
                } else if let Some(bin) = lower.strip_prefix("0b") {
                    i128::from_str_radix(bin, 2)
                } else if let Some(oct) = lower.strip_prefix("0o") {
                    i128::from_str_radix(oct, 8)
                } else if lower.len() > 1 && lower.starts_with('0') {
                    i128::from_str_radix(&lower[1..], 8)
                } else {
                    lower.parse::<i128>()
                };
                match parsed {
                    Ok(v) => Literal::Int(v),
                    Err(_) => return Err(self.error_at(pos, format!("invalid integer literal {}", as_str))),
                }
            }
            TokenKind::Float => match as_str.parse::<f64>() {
                Ok(v) => Literal::Float(v),
                Err(_) => return Err(self.error_at(pos, format!("invalid floating point literal {}", as_str))),
            },
            TokenKind::Char => {
                let inner = &text[1..text.len() - 1];
                let bytes = unescape(inner, b'\'').map_err(|msg| self.error_at(pos, msg))?;
                let s = String::from_utf8_lossy(&bytes).to_string();
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Literal::Rune(c),
                    _ => return Err(self.error_at(pos, String::from("more than one character in rune literal"))),
                }
            }
            TokenKind::String => {
                let inner = &text[1..text.len() - 1];
                let bytes = unescape(inner, b'"').map_err(|msg| self.error_at(pos, msg))?;
                Literal::String(Arc::from(String::from_utf8_lossy(&bytes).as_ref()))
            }
            TokenKind::RawString => {
                let inner = &text[1..text.len() - 1];
                let s: String = String::from_utf8_lossy(inner).chars().filter(|c| *c != '\r').collect();
                Literal::String(Arc::from(s))
            }
            _ => return Err(self.error_expected("literal")),
        };
        self.consume();
        Ok(lit)
    }
}

fn unescape(text: &[u8], quote: u8) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(text.len());
    let mut idx = 0;
    let hex = |digits: &[u8]| -> Result<u32, String> {
        let s = std::str::from_utf8(digits).map_err(|_| String::from("invalid escape sequence"))?;
        u32::from_str_radix(s, 16).map_err(|_| String::from("invalid escape sequence"))
    };
    let push_char = |out: &mut Vec<u8>, code: u32| -> Result<(), String> {
        let c = char::from_u32(code).ok_or_else(|| String::from("escape sequence is invalid Unicode code point"))?;
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        Ok(())
    };
    while idx < text.len() {
        let c = text[idx];
        if c != b'\\' {
            out.push(c);
            idx += 1;
            continue;
        }
        let next = *text.get(idx + 1).ok_or_else(|| String::from("escape sequence not terminated"))?;
        idx += 2;
        match next {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'\\' => out.push(b'\\'),
            c if c == quote => out.push(c),
            b'x' => {
                let digits = text.get(idx..idx + 2).ok_or_else(|| String::from("escape sequence not terminated"))?;
                out.push(hex(digits)? as u8);
                idx += 2;
            }
            b'u' => {
                let digits = text.get(idx..idx + 4).ok_or_else(|| String::from("escape sequence not terminated"))?;
                push_char(&mut out, hex(digits)?)?;
                idx += 4;
            }
            b'U' => {
                let digits = text.get(idx..idx + 8).ok_or_else(|| String::from("escape sequence not terminated"))?;
                push_char(&mut out, hex(digits)?)?;
                idx += 8;
            }
            b'0'..=b'7' => {
                let digits = text.get(idx - 1..idx + 2).ok_or_else(|| String::from("escape sequence not terminated"))?;
                let s = std::str::from_utf8(digits).map_err(|_| String::from("invalid escape sequence"))?;
                let v = u32::from_str_radix(s, 8).map_err(|_| String::from("invalid escape sequence"))?;
                out.push(v as u8);
                idx += 2;
            }
            _ => return Err(String::from("unknown escape sequence")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<(NodeGraph, NodeId), ParseError> {
        let mut graph = NodeGraph::new();
        let mut source = InputSource::new_test(src);
        let file = parse_unit(&mut graph, 0, &mut source)?;
        Ok((graph, file))
    }

    fn kinds_of(graph: &NodeGraph, ids: &[NodeId]) -> Vec<NodeKind> {
        ids.iter().map(|id| graph[*id].kind).collect()
    }

    #[test]
    fn parses_generic_declaration() {
        let (graph, file) = parse("func Hello[T comparable, F any](v T, f func(a T) F) *T {\n\treturn &v\n}").unwrap();
        let decl = graph[file].child(0);
        assert_eq!(graph[decl].kind, NodeKind::FuncDecl);
        assert_eq!(graph[decl].ident, "Hello");
        assert_eq!(graph[decl].params.len(), 2);
        let ftype = graph[decl].child(3);
        let params = graph[ftype].child(0);
        assert_eq!(graph[params].children.len(), 2);
        let callback = graph[graph[params].child(1)].child(1);
        assert_eq!(graph[callback].kind, NodeKind::FuncType);
    }

    #[test]
    fn parses_statements_at_top_level() {
        let (graph, file) = parse("x := 1\nif x > 0 { x++ } else { x-- }\nfor i := 0; i < 3; i++ {}\nx").unwrap();
        assert_eq!(
            kinds_of(&graph, &graph[file].children),
            vec![NodeKind::Define, NodeKind::If, NodeKind::For, NodeKind::ExprStmt]
        );
    }

    #[test]
    fn explicit_instantiation_and_composites() {
        let (graph, file) = parse("generic.Hello[int, bool](3, f)\np := &Point{X: 1}\ns := []int{1, 2}").unwrap();
        let call = graph[graph[file].child(0)].child(0);
        assert_eq!(graph[call].kind, NodeKind::Call);
        assert_eq!(graph[graph[call].child(0)].kind, NodeKind::IndexList);
        let addr = graph[graph[file].child(1)].child(1);
        assert_eq!(graph[addr].op, Op::Addr);
        assert_eq!(graph[graph[addr].child(0)].kind, NodeKind::CompositeLit);
    }

    #[test]
    fn composite_not_allowed_in_if_header() {
        let (graph, file) = parse("if x == y { z() }").unwrap();
        let stmt = graph[file].child(0);
        assert_eq!(graph[stmt].kind, NodeKind::If);
        assert_eq!(graph[graph[stmt].child(1)].kind, NodeKind::Binary);
    }

    #[test]
    fn partial_input_messages() {
        let err = parse("func main() {").err().unwrap();
        assert_eq!(err.message(), "expected '}', found 'EOF'");
        let err = parse("x := 1 +").err().unwrap();
        assert_eq!(err.message(), "expected operand, found 'EOF'");
        let err = parse("x := []int{1, }\ny := (}").err().unwrap();
        assert_eq!(err.message(), "expected operand, found '}'");
    }

    #[test]
    fn unescapes_literals() {
        let (graph, file) = parse("\"a\\tb\\u00e9\\x41\"").unwrap();
        let lit = graph[graph[file].child(0)].child(0);
        assert_eq!(graph[lit].lit, Some(Literal::String(Arc::from("a\tbéA"))));
    }
}
