//! Script parser
//!
//! Recursive descent over the token stream. Syntactic nesting is bounded by
//! `max_nesting` so hostile source cannot exhaust the host stack.

use std::rc::Rc;

use super::ast::{BinaryOp, Expr, ExprKind, FnDef, Pos, Program, SourceText, Stmt, StmtKind, UnaryOp};
use super::lexer::{tokenize, Tok, Token};
use crate::error::{WardenError, WardenResult};

/// Parse a whole source text into a program.
pub fn parse(source: SourceText, max_nesting: usize) -> WardenResult<Program> {
    let tokens = tokenize(&source)?;
    let mut parser = Parser {
        source: &source,
        tokens,
        i: 0,
        nesting: 0,
        max_nesting,
        fn_depth: 0,
        exports: Vec::new(),
    };
    let body = parser.program()?;
    let exports = parser.exports;
    Ok(Program { source: Rc::new(source), body: body.into(), exports })
}

struct Parser<'s> {
    source: &'s SourceText,
    tokens: Vec<Token>,
    i: usize,
    nesting: usize,
    max_nesting: usize,
    fn_depth: usize,
    exports: Vec<String>,
}

impl<'s> Parser<'s> {
    fn program(&mut self) -> WardenResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while self.peek() != &Tok::Eof {
            body.push(self.statement(true)?);
        }
        Ok(body)
    }

    fn block(&mut self) -> WardenResult<Vec<Stmt>> {
        self.expect(Tok::LBrace)?;
        self.enter()?;
        let mut body = Vec::new();
        while !matches!(self.peek(), Tok::RBrace | Tok::Eof) {
            body.push(self.statement(false)?);
        }
        self.expect(Tok::RBrace)?;
        self.leave();
        Ok(body)
    }

    fn statement(&mut self, top_level: bool) -> WardenResult<Stmt> {
        let pos = self.pos();
        let kind = match self.peek().clone() {
            Tok::Let => {
                self.advance();
                let name = self.ident()?;
                let init = if self.eat(&Tok::Assign) { Some(self.expression()?) } else { None };
                self.terminator()?;
                StmtKind::Let { name, init }
            }
            Tok::Export => {
                if !top_level {
                    return Err(self.error(pos, "`export` is only allowed at the top level"));
                }
                self.advance();
                if self.peek() == &Tok::Fn {
                    let (name, def) = self.fn_declaration()?;
                    self.exports.push(name.clone());
                    let init = Expr { kind: ExprKind::Function(def), pos };
                    StmtKind::Export { name, init }
                } else {
                    let name = self.ident()?;
                    self.expect(Tok::Assign)?;
                    let init = self.expression()?;
                    self.terminator()?;
                    self.exports.push(name.clone());
                    StmtKind::Export { name, init }
                }
            }
            Tok::Fn if matches!(self.peek_at(1), Tok::Ident(_)) => {
                let (name, def) = self.fn_declaration()?;
                StmtKind::Fn { name, def }
            }
            Tok::If => self.if_statement()?,
            Tok::While => {
                self.advance();
                self.expect(Tok::LParen)?;
                let cond = self.expression()?;
                self.expect(Tok::RParen)?;
                let body = self.block()?;
                StmtKind::While { cond, body }
            }
            Tok::Return => {
                if self.fn_depth == 0 {
                    return Err(self.error(pos, "`return` outside of a function"));
                }
                self.advance();
                let value = if matches!(self.peek(), Tok::Semi | Tok::RBrace | Tok::Eof) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.terminator()?;
                StmtKind::Return(value)
            }
            Tok::Throw => {
                self.advance();
                let value = self.expression()?;
                self.terminator()?;
                StmtKind::Throw(value)
            }
            Tok::Try => {
                self.advance();
                let body = self.block()?;
                self.expect(Tok::Catch)?;
                self.expect(Tok::LParen)?;
                let binding = self.ident()?;
                self.expect(Tok::RParen)?;
                let handler = self.block()?;
                StmtKind::Try { body, binding, handler }
            }
            _ => {
                let expr = self.expression()?;
                if self.eat(&Tok::Assign) {
                    if !matches!(
                        expr.kind,
                        ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
                    ) {
                        return Err(self.error(expr.pos, "invalid assignment target"));
                    }
                    let value = self.expression()?;
                    self.terminator()?;
                    StmtKind::Assign { target: expr, value }
                } else {
                    self.terminator()?;
                    StmtKind::Expr(expr)
                }
            }
        };
        Ok(Stmt { kind, pos })
    }

    fn if_statement(&mut self) -> WardenResult<StmtKind> {
        self.expect(Tok::If)?;
        self.expect(Tok::LParen)?;
        let cond = self.expression()?;
        self.expect(Tok::RParen)?;
        let then = self.block()?;
        let otherwise = if self.eat(&Tok::Else) {
            if self.peek() == &Tok::If {
                let pos = self.pos();
                self.enter()?;
                let nested = self.if_statement()?;
                self.leave();
                Some(vec![Stmt { kind: nested, pos }])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If { cond, then, otherwise })
    }

    fn fn_declaration(&mut self) -> WardenResult<(String, Rc<FnDef>)> {
        self.expect(Tok::Fn)?;
        let name = self.ident()?;
        let def = self.fn_rest(Some(name.clone()))?;
        Ok((name, def))
    }

    /// Parameter list and body, after `fn` (and the name, if any).
    fn fn_rest(&mut self, name: Option<String>) -> WardenResult<Rc<FnDef>> {
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        if self.peek() != &Tok::RParen {
            loop {
                let pos = self.pos();
                let param = self.ident()?;
                if params.contains(&param) {
                    return Err(self.error(pos, format!("duplicate parameter `{}`", param)));
                }
                params.push(param);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;

        self.fn_depth += 1;
        let body = self.block();
        self.fn_depth -= 1;
        Ok(Rc::new(FnDef { name, params, body: body? }))
    }

    fn expression(&mut self) -> WardenResult<Expr> {
        self.enter()?;
        let expr = self.binary(0);
        self.leave();
        expr
    }

    /// Precedence climbing over binary operators.
    fn binary(&mut self, min_prec: u8) -> WardenResult<Expr> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            let pos = self.pos();
            self.advance();
            self.enter()?;
            let rhs = self.binary(prec + 1);
            self.leave();
            lhs = Expr {
                kind: ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs?) },
                pos,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> WardenResult<Expr> {
        let pos = self.pos();
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr { kind: ExprKind::Unary { op, operand: Box::new(operand?) }, pos })
    }

    fn postfix(&mut self) -> WardenResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.pos();
            expr = match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let name = self.ident()?;
                    Expr { kind: ExprKind::Member { object: Box::new(expr), name }, pos }
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Tok::RBracket)?;
                    Expr { kind: ExprKind::Index { object: Box::new(expr), index: Box::new(index) }, pos }
                }
                Tok::LParen => {
                    self.advance();
                    let args = self.list_items(Tok::RParen)?;
                    Expr { kind: ExprKind::Call { callee: Box::new(expr), args }, pos }
                }
                _ => return Ok(expr),
            };
        }
    }

    fn primary(&mut self) -> WardenResult<Expr> {
        let token = self.advance();
        let pos = token.pos;
        let kind = match token.tok {
            Tok::Number(n) => ExprKind::Number(n),
            Tok::Str(s) => ExprKind::Str(s),
            Tok::True => ExprKind::Bool(true),
            Tok::False => ExprKind::Bool(false),
            Tok::Null => ExprKind::Null,
            Tok::Ident(name) => ExprKind::Ident(name),
            Tok::LParen => {
                let inner = self.expression()?;
                self.expect(Tok::RParen)?;
                return Ok(inner);
            }
            Tok::LBracket => {
                self.enter()?;
                let items = self.list_items(Tok::RBracket);
                self.leave();
                ExprKind::List(items?)
            }
            Tok::LBrace => {
                self.enter()?;
                let fields = self.record_fields();
                self.leave();
                ExprKind::Record(fields?)
            }
            Tok::Fn => ExprKind::Function(self.fn_rest(None)?),
            other => {
                return Err(self.error(pos, format!("unexpected {}", other.describe())));
            }
        };
        Ok(Expr { kind, pos })
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn list_items(&mut self, close: Tok) -> WardenResult<Vec<Expr>> {
        let mut items = Vec::new();
        while self.peek() != &close {
            items.push(self.expression()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn record_fields(&mut self) -> WardenResult<Vec<(String, Expr)>> {
        let mut fields = Vec::new();
        while self.peek() != &Tok::RBrace {
            let token = self.advance();
            let key = match token.tok {
                Tok::Ident(name) => name,
                Tok::Str(s) => s.to_string(),
                other => {
                    return Err(self.error(token.pos, format!("expected field name, found {}", other.describe())))
                }
            };
            self.expect(Tok::Colon)?;
            fields.push((key, self.expression()?));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RBrace)?;
        Ok(fields)
    }

    /// `;` ends a simple statement; it may be omitted before `}` or end of input.
    fn terminator(&mut self) -> WardenResult<()> {
        if self.eat(&Tok::Semi) || matches!(self.peek(), Tok::RBrace | Tok::Eof) {
            Ok(())
        } else {
            let token = self.current();
            Err(self.error(token.pos, format!("expected `;`, found {}", token.tok.describe())))
        }
    }

    fn ident(&mut self) -> WardenResult<String> {
        let token = self.advance();
        match token.tok {
            Tok::Ident(name) => Ok(name),
            other => Err(self.error(token.pos, format!("expected identifier, found {}", other.describe()))),
        }
    }

    fn expect(&mut self, tok: Tok) -> WardenResult<()> {
        let token = self.current();
        if token.tok == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.error(
                token.pos,
                format!("expected {}, found {}", tok.describe(), token.tok.describe()),
            ))
        }
    }

    fn enter(&mut self) -> WardenResult<()> {
        self.nesting += 1;
        if self.nesting > self.max_nesting {
            return Err(WardenError::LimitExceeded { what: "nesting", limit: self.max_nesting });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn current(&self) -> Token {
        self.tokens
            .get(self.i)
            .or_else(|| self.tokens.last())
            .cloned()
            .unwrap_or(Token { tok: Tok::Eof, pos: Pos::default() })
    }

    fn advance(&mut self) -> Token {
        let token = self.current();
        if self.i < self.tokens.len() {
            self.i += 1;
        }
        token
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.i + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn pos(&self) -> Pos {
        self.tokens.get(self.i).map(|t| t.pos).unwrap_or_default()
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> WardenError {
        self.source.error(pos, message)
    }
}

fn binary_op(tok: &Tok) -> Option<(BinaryOp, u8)> {
    let op = match tok {
        Tok::OrOr => (BinaryOp::Or, 1),
        Tok::AndAnd => (BinaryOp::And, 2),
        Tok::EqEq => (BinaryOp::Eq, 3),
        Tok::NotEq => (BinaryOp::Ne, 3),
        Tok::Lt => (BinaryOp::Lt, 4),
        Tok::Le => (BinaryOp::Le, 4),
        Tok::Gt => (BinaryOp::Gt, 4),
        Tok::Ge => (BinaryOp::Ge, 4),
        Tok::Plus => (BinaryOp::Add, 5),
        Tok::Minus => (BinaryOp::Sub, 5),
        Tok::Star => (BinaryOp::Mul, 6),
        Tok::Slash => (BinaryOp::Div, 6),
        Tok::Percent => (BinaryOp::Rem, 6),
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(text: &str) -> Program {
        parse(SourceText::new("<test>", text), 64).expect("parses")
    }

    fn parse_err(text: &str) -> WardenError {
        parse(SourceText::new("<test>", text), 64).expect_err("rejected")
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let program = parse_ok("1 + 2 * 3");
        match &program.body[0].kind {
            StmtKind::Expr(Expr { kind: ExprKind::Binary { op: BinaryOp::Add, rhs, .. }, .. }) => {
                assert!(matches!(rhs.kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn collects_exports_in_order() {
        let program = parse_ok("export greet = fn(n) { return n; };\nexport fn twice(x) { return x * 2 }\nlet hidden = 1;");
        assert_eq!(program.exports, vec!["greet".to_string(), "twice".to_string()]);
    }

    #[test]
    fn export_is_top_level_only() {
        assert!(matches!(parse_err("if (true) { export a = 1; }"), WardenError::Source(_)));
    }

    #[test]
    fn return_needs_a_function() {
        assert!(matches!(parse_err("return 1;"), WardenError::Source(_)));
        parse_ok("fn f() { if (true) { return; } }");
    }

    #[test]
    fn assignment_targets() {
        parse_ok("let a = {}; a.b = 1; a['c'] = 2; a = 3;");
        assert!(matches!(parse_err("f() = 1;"), WardenError::Source(_)));
    }

    #[test]
    fn missing_semicolon_is_reported_with_location() {
        match parse_err("let a = 1\nlet b = 2;") {
            WardenError::Source(e) => {
                assert_eq!(e.location.line, 2);
                assert!(e.message.contains("expected `;`"), "{}", e.message);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nesting_limit_stops_deep_source() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(matches!(
            parse(SourceText::new("<test>", deep), 64),
            Err(WardenError::LimitExceeded { what: "nesting", .. })
        ));
        let negations = format!("{}true", "!".repeat(100));
        assert!(matches!(
            parse(SourceText::new("<test>", negations), 64),
            Err(WardenError::LimitExceeded { .. })
        ));
        let lists = format!("{}{}", "[".repeat(100), "]".repeat(100));
        assert!(matches!(
            parse(SourceText::new("<test>", lists), 64),
            Err(WardenError::LimitExceeded { .. })
        ));
    }

    #[test]
    fn else_if_chains() {
        let program = parse_ok("if (a) { 1 } else if (b) { 2 } else { 3 }");
        assert!(matches!(program.body[0].kind, StmtKind::If { otherwise: Some(_), .. }));
    }
}
