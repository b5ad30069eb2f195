// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Recursive-descent parser producing [`Program`] trees.
//!
//! Nesting is capped so hostile sources cannot exhaust the native stack
//! while parsing or, later, while evaluating.

use std::sync::Arc;

use super::ast::*;
use super::lexer::{SyntaxError, Token, TokenKind};

/// Maximum syntactic nesting of statements and expressions.
pub const MAX_NESTING: usize = 128;

/// Words that cannot be used as binding names.
const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "default", "delete", "do", "else",
    "export", "false", "finally", "for", "function", "if", "import", "in", "instanceof", "let",
    "new", "null", "return", "switch", "this", "throw", "true", "try", "typeof", "var", "void",
    "while", "with", "yield",
];

static EOF_TOKEN: Token = Token {
    kind: TokenKind::Eof,
    pos: Pos { line: 0, col: 0 },
};

type ParseResult<T> = Result<T, SyntaxError>;

/// Parse a token stream (ending in `Eof`) into a program.
pub fn parse_program(tokens: Vec<Token>, source_hash: String) -> ParseResult<Program> {
    let mut parser = Parser::new(tokens);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    let functions = body
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Function(decl) => decl.name.clone(),
            _ => None,
        })
        .collect();
    Ok(Program {
        body,
        functions,
        source_hash,
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    prev_line: u32,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            prev_line: 1,
        }
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .unwrap_or(&EOF_TOKEN)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        self.prev_line = token.pos.line;
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Punct(q) if q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> ParseResult<Pos> {
        if self.is_punct(p) {
            Ok(self.advance().pos)
        } else {
            Err(self.unexpected(&format!("`{p}`")))
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{word}`")))
        }
    }

    /// A binding name: any identifier that is not reserved.
    fn binding_name(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let token = self.peek();
        SyntaxError::new(
            format!("expected {expected}, found {}", token.kind.describe()),
            token.pos,
        )
    }

    /// Automatic semicolon insertion: a `;`, a closing brace, end of input or
    /// a line break ends a statement.
    fn end_statement(&mut self) -> ParseResult<()> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() {
            return Ok(());
        }
        if self.peek().pos.line > self.prev_line {
            return Ok(());
        }
        Err(self.unexpected("`;`"))
    }

    fn enter(&mut self) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new("nesting too deep", self.peek().pos));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> ParseResult<Stmt> {
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }

        let word = match &self.peek().kind {
            TokenKind::Ident(word) => word.clone(),
            _ => return self.expression_statement(),
        };
        match word.as_str() {
            "function" if matches!(self.peek_at(1).kind, TokenKind::Ident(_)) => {
                self.advance();
                let pos = self.peek().pos;
                let name = self.binding_name()?;
                Ok(Stmt::Function(self.function_rest(Some(name), pos)?))
            }
            "var" | "let" | "const" => {
                let stmt = self.var_decl()?;
                self.end_statement()?;
                Ok(stmt)
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    then,
                    otherwise,
                })
            }
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            "do" => {
                self.advance();
                let body = Box::new(self.statement()?);
                self.expect_keyword("while")?;
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, test })
            }
            "for" => self.for_statement(),
            "break" => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.end_statement()?;
                Ok(Stmt::Continue)
            }
            "return" => {
                let line = self.advance().pos.line;
                let has_value = !self.is_punct(";")
                    && !self.is_punct("}")
                    && !self.at_eof()
                    && self.peek().pos.line == line;
                let value = if has_value {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            "throw" => {
                self.advance();
                let value = self.expression()?;
                self.end_statement()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "switch" => self.switch_statement(),
            "class" | "new" | "this" | "delete" | "void" | "with" | "import" | "export"
            | "yield" | "instanceof" => Err(SyntaxError::new(
                format!("`{word}` is not supported"),
                self.peek().pos,
            )),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        self.end_statement()?;
        Ok(Stmt::Expr(expr))
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected("`}`"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn decl_kind(&mut self) -> ParseResult<DeclKind> {
        let kind = match &self.peek().kind {
            TokenKind::Ident(w) if w == "var" => DeclKind::Var,
            TokenKind::Ident(w) if w == "let" => DeclKind::Let,
            TokenKind::Ident(w) if w == "const" => DeclKind::Const,
            _ => return Err(self.unexpected("declaration")),
        };
        self.advance();
        Ok(kind)
    }

    fn var_decl(&mut self) -> ParseResult<Stmt> {
        let kind = self.decl_kind()?;
        let first = self.binding_name()?;
        self.var_decl_rest(kind, first)
    }

    fn var_decl_rest(&mut self, kind: DeclKind, first: String) -> ParseResult<Stmt> {
        let mut decls = Vec::new();
        let mut name = first;
        loop {
            let pos = self.peek().pos;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if kind == DeclKind::Const && init.is_none() {
                return Err(SyntaxError::new("missing initializer in const declaration", pos));
            }
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
            name = self.binding_name()?;
        }
        Ok(Stmt::VarDecl { kind, decls })
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        self.expect_keyword("for")?;
        self.expect_punct("(")?;

        let init = if self.is_punct(";") {
            None
        } else if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            let kind = self.decl_kind()?;
            let name = self.binding_name()?;
            if self.eat_keyword("of") {
                let iterable = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForOf {
                    kind,
                    name,
                    iterable,
                    body,
                });
            }
            if self.eat_keyword("in") {
                let object = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                return Ok(Stmt::ForIn {
                    kind,
                    name,
                    object,
                    body,
                });
            }
            Some(Box::new(self.var_decl_rest(kind, name)?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;

        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;

        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        let pos = self.peek().pos;
        self.expect_keyword("try")?;
        let block = self.block()?;

        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.binding_name()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(SyntaxError::new("try without catch or finally", pos));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn switch_statement(&mut self) -> ParseResult<Stmt> {
        self.expect_keyword("switch")?;
        self.expect_punct("(")?;
        let discriminant = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;

        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_keyword("case") {
                Some(self.expression()?)
            } else if self.eat_keyword("default") {
                None
            } else {
                return Err(self.unexpected("`case` or `default`"));
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !self.is_keyword("case") && !self.is_keyword("default") && !self.is_punct("}")
            {
                if self.at_eof() {
                    return Err(self.unexpected("`}`"));
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn params(&mut self) -> ParseResult<Vec<String>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.binding_name()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(params)
    }

    fn function_rest(&mut self, name: Option<String>, pos: Pos) -> ParseResult<Arc<FunctionDecl>> {
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Arc::new(FunctionDecl {
            name,
            params,
            body,
            pos,
        }))
    }

    /// Whether the tokens at the cursor start an arrow function.
    fn at_arrow(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_at(1).kind, TokenKind::Punct("=>"))
            }
            TokenKind::Punct("(") => {
                let mut depth = 0usize;
                let mut offset = 0;
                loop {
                    match self.peek_at(offset).kind {
                        TokenKind::Punct("(") => depth += 1,
                        TokenKind::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(
                                    self.peek_at(offset + 1).kind,
                                    TokenKind::Punct("=>")
                                );
                            }
                        }
                        TokenKind::Eof => return false,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> ParseResult<Expr> {
        let pos = self.peek().pos;
        let params = if self.is_punct("(") {
            self.params()?
        } else {
            vec![self.binding_name()?]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(Box::new(self.assignment()?))
        };
        Ok(Expr::Function(Arc::new(FunctionDecl {
            name: None,
            params,
            body,
            pos,
        })))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> ParseResult<Expr> {
        if self.at_arrow() {
            return self.arrow();
        }

        let target = self.conditional()?;
        let op = match self.peek().kind {
            TokenKind::Punct("=") => None,
            TokenKind::Punct("+=") => Some(BinaryOp::Add),
            TokenKind::Punct("-=") => Some(BinaryOp::Sub),
            TokenKind::Punct("*=") => Some(BinaryOp::Mul),
            TokenKind::Punct("/=") => Some(BinaryOp::Div),
            TokenKind::Punct("%=") => Some(BinaryOp::Mod),
            _ => return Ok(target),
        };
        let pos = self.advance().pos;
        if !is_assignable(&target) {
            return Err(SyntaxError::new("invalid assignment target", pos));
        }
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let TokenKind::Punct(p) = self.peek().kind else {
                break;
            };
            let Some((prec, op)) = binary_operator(p) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            // `**` is right-associative.
            let next = if p == "**" { prec } else { prec + 1 };
            let right = Box::new(self.binary(next)?);
            let left_box = Box::new(left);
            left = match op {
                Operator::Logical(op) => Expr::Logical {
                    op,
                    left: left_box,
                    right,
                },
                Operator::Binary(op) => Expr::Binary {
                    op,
                    left: left_box,
                    right,
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> ParseResult<Expr> {
        let op = match &self.peek().kind {
            TokenKind::Punct("!") => Some(UnaryOp::Not),
            TokenKind::Punct("-") => Some(UnaryOp::Neg),
            TokenKind::Punct("+") => Some(UnaryOp::Plus),
            TokenKind::Punct("~") => Some(UnaryOp::BitNot),
            TokenKind::Ident(w) if w == "typeof" => Some(UnaryOp::TypeOf),
            TokenKind::Punct(p @ ("++" | "--")) => {
                let increment = *p == "++";
                let pos = self.advance().pos;
                let target = self.unary()?;
                if !is_assignable(&target) {
                    return Err(SyntaxError::new("invalid update target", pos));
                }
                return Ok(Expr::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let arg = Box::new(self.unary()?);
                Ok(Expr::Unary { op, arg })
            }
            None => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.call_member()?;
        let increment = match self.peek().kind {
            TokenKind::Punct("++") => true,
            TokenKind::Punct("--") => false,
            _ => return Ok(expr),
        };
        // A line break before `++` starts a new statement.
        if self.peek().pos.line != self.prev_line {
            return Ok(expr);
        }
        let pos = self.advance().pos;
        if !is_assignable(&expr) {
            return Err(SyntaxError::new("invalid update target", pos));
        }
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.peek().pos;
            if self.eat_punct(".") {
                let property = match &self.peek().kind {
                    TokenKind::Ident(name) => name.clone(),
                    _ => return Err(self.unexpected("property name")),
                };
                self.advance();
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    pos,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    pos,
                };
            } else if self.is_punct("(") {
                self.advance();
                let mut args = Vec::new();
                while !self.eat_punct(")") {
                    if self.is_punct("...") {
                        return Err(SyntaxError::new(
                            "spread arguments are not supported",
                            self.peek().pos,
                        ));
                    }
                    args.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct(")")?;
                        break;
                    }
                }
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(Arc::from(s)))
            }
            TokenKind::Template { quasis, exprs } => {
                self.advance();
                let mut parsed = Vec::with_capacity(exprs.len());
                for tokens in exprs {
                    let mut inner = Parser::new(tokens);
                    inner.depth = self.depth;
                    let expr = inner.expression()?;
                    if !inner.at_eof() {
                        return Err(inner.unexpected("`}`"));
                    }
                    parsed.push(expr);
                }
                Ok(Expr::Template {
                    quasis: quasis.into_iter().map(Arc::from).collect(),
                    exprs: parsed,
                })
            }
            TokenKind::Ident(name) => {
                let literal = match name.as_str() {
                    "true" => Some(Expr::Bool(true)),
                    "false" => Some(Expr::Bool(false)),
                    "null" => Some(Expr::Null),
                    _ => None,
                };
                if let Some(literal) = literal {
                    self.advance();
                    return Ok(literal);
                }
                if name == "function" {
                    self.advance();
                    let fn_name = match self.peek().kind {
                        TokenKind::Ident(_) => Some(self.binding_name()?),
                        _ => None,
                    };
                    return Ok(Expr::Function(self.function_rest(fn_name, token.pos)?));
                }
                if RESERVED.contains(&name.as_str()) {
                    return Err(SyntaxError::new(
                        format!("unexpected keyword `{name}`"),
                        token.pos,
                    ));
                }
                self.advance();
                Ok(Expr::Ident(name, token.pos))
            }
            TokenKind::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            TokenKind::Punct("[") => {
                self.advance();
                let mut elements = Vec::new();
                while !self.eat_punct("]") {
                    elements.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(elements))
            }
            TokenKind::Punct("{") => self.object_literal(),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn object_literal(&mut self) -> ParseResult<Expr> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            let token = self.advance();
            let key = match token.kind {
                TokenKind::Ident(name) => name,
                TokenKind::Str(s) => s,
                TokenKind::Number(n) => super::value::number_to_string(n),
                other => {
                    return Err(SyntaxError::new(
                        format!("expected property name, found {}", other.describe()),
                        token.pos,
                    ))
                }
            };

            let value = if self.eat_punct(":") {
                self.assignment()?
            } else if self.is_punct("(") {
                Expr::Function(self.function_rest(Some(key.clone()), token.pos)?)
            } else if !RESERVED.contains(&key.as_str()) {
                // Shorthand `{ a }`.
                Expr::Ident(key.clone(), token.pos)
            } else {
                return Err(self.unexpected("`:`"));
            };
            props.push((key, value));

            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }
}

enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn binary_operator(p: &str) -> Option<(u8, Operator)> {
    use Operator::{Binary as B, Logical as L};
    let entry = match p {
        "??" => (1, L(LogicalOp::Nullish)),
        "||" => (2, L(LogicalOp::Or)),
        "&&" => (3, L(LogicalOp::And)),
        "|" => (4, B(BinaryOp::BitOr)),
        "^" => (5, B(BinaryOp::BitXor)),
        "&" => (6, B(BinaryOp::BitAnd)),
        "==" => (7, B(BinaryOp::Eq)),
        "!=" => (7, B(BinaryOp::NotEq)),
        "===" => (7, B(BinaryOp::StrictEq)),
        "!==" => (7, B(BinaryOp::StrictNotEq)),
        "<" => (8, B(BinaryOp::Lt)),
        ">" => (8, B(BinaryOp::Gt)),
        "<=" => (8, B(BinaryOp::LtEq)),
        ">=" => (8, B(BinaryOp::GtEq)),
        "<<" => (9, B(BinaryOp::Shl)),
        ">>" => (9, B(BinaryOp::Shr)),
        ">>>" => (9, B(BinaryOp::UShr)),
        "+" => (10, B(BinaryOp::Add)),
        "-" => (10, B(BinaryOp::Sub)),
        "*" => (11, B(BinaryOp::Mul)),
        "/" => (11, B(BinaryOp::Div)),
        "%" => (11, B(BinaryOp::Mod)),
        "**" => (12, B(BinaryOp::Exp)),
        _ => return None,
    };
    Some(entry)
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident(..) | Expr::Member { .. } | Expr::Index { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::lexer::Lexer;

    fn parse(src: &str) -> ParseResult<Program> {
        parse_program(Lexer::new(src).tokenize()?, String::new())
    }

    #[test]
    fn collects_top_level_functions() {
        let program = parse(
            "const rate = 2;\nfunction helper(x) { return x; }\nfunction main(a, b) { return helper(a) * b; }",
        )
        .unwrap();
        assert_eq!(program.functions, vec!["helper", "main"]);
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse("1 + 2 * 3;").unwrap();
        let Stmt::Expr(Expr::Binary { op, right, .. }) = &program.body[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(**right, Expr::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn arrow_functions() {
        let program = parse("const f = (a, b) => a + b; const g = x => { return x; };").unwrap();
        let Stmt::VarDecl { decls, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Function(decl)) = &decls[0].1 else {
            panic!("expected arrow");
        };
        assert_eq!(decl.params, vec!["a", "b"]);
        assert!(matches!(decl.body, FunctionBody::Expr(_)));
    }

    #[test]
    fn statements_without_semicolons() {
        let program = parse("let a = 1\nlet b = a\nreturn\n").unwrap();
        assert_eq!(program.body.len(), 3);
        assert!(matches!(program.body[2], Stmt::Return(None)));
        assert!(parse("let a = 1 let b = 2").is_err());
    }

    #[test]
    fn loops_and_control_flow() {
        parse(
            r#"
            for (let i = 0; i < 10; i++) { if (i % 2) continue; else break; }
            for (const x of [1, 2]) {}
            for (const k in {a: 1}) {}
            do { } while (false);
            switch (1) { case 1: break; default: }
            try { throw "x"; } catch (e) { } finally { }
            "#,
        )
        .unwrap();
    }

    #[test]
    fn object_literals() {
        let program = parse("const o = { a: 1, 'b c': 2, d, f(x) { return x; }, };").unwrap();
        let Stmt::VarDecl { decls, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Object(props)) = &decls[0].1 else {
            panic!("expected object");
        };
        let keys: Vec<&str> = props.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b c", "d", "f"]);
    }

    #[test]
    fn template_literals_parse_substitutions() {
        let program = parse("`a${1 + 2}b${x}`;").unwrap();
        let Stmt::Expr(Expr::Template { quasis, exprs }) = &program.body[0] else {
            panic!("expected template");
        };
        assert_eq!(quasis.len(), 3);
        assert_eq!(exprs.len(), 2);
    }

    #[test]
    fn rejects_invalid_programs() {
        assert!(parse("function (").is_err());
        assert!(parse("1 = 2;").is_err());
        assert!(parse("const x;").is_err());
        assert!(parse("try {}").is_err());
        assert!(parse("class A {}").is_err());
        assert!(parse("let if = 1;").is_err());
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse(&src).unwrap_err();
        assert!(err.message.contains("nesting"));
    }
}
