//! Recursive-descent parser producing [`Stmt`] lists.
//!
//! Precedence, lowest first: `||`, `&&`, equality, comparison, `+ -`,
//! `* / %`, unary `- !`, then calls and atoms.

use std::sync::Arc;

use crate::ast::{BinOp, Expr, ExprKind, FnDef, Stmt, StmtKind, UnaryOp};
use crate::error::ScriptError;
use crate::lexer::{Tok, Token};

/// Nesting bound for blocks and expressions, so hostile input cannot
/// exhaust the parser's stack.
const MAX_NESTING: usize = 128;

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    pub(crate) fn parse_program(mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut stmts = Vec::new();
        while !self.check(&Tok::Eof) {
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    // -- token helpers ------------------------------------------------------

    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, tok: &Tok) -> bool {
        &self.peek().tok == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.check(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<Token, ScriptError> {
        if self.check(tok) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match &self.peek().tok {
            Tok::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let token = self.peek();
        ScriptError::Syntax {
            line: token.line,
            column: token.column,
            message: format!("{} (found {})", message.into(), describe(&token.tok)),
        }
    }

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // -- statements ---------------------------------------------------------

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&Tok::LBrace, "'{'")?;
        self.enter()?;
        let mut stmts = Vec::new();
        while !self.check(&Tok::RBrace) {
            if self.check(&Tok::Eof) {
                return Err(self.error("expected '}'"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        self.leave();
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.peek().line;
        let kind = match self.peek().tok.clone() {
            Tok::Let => {
                self.advance();
                let name = self.ident("variable name after 'let'")?;
                self.expect(&Tok::Assign, "'='")?;
                let value = self.expression()?;
                self.end_of_statement()?;
                StmtKind::Let(name, value)
            }
            Tok::Fn => {
                self.advance();
                let name = self.ident("function name")?;
                self.expect(&Tok::LParen, "'('")?;
                let mut params = Vec::new();
                if !self.check(&Tok::RParen) {
                    loop {
                        params.push(self.ident("parameter name")?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&Tok::RParen, "')'")?;
                let body = self.block()?;
                StmtKind::Fn(Arc::new(FnDef { name, params, body }))
            }
            Tok::For => {
                self.advance();
                let var = self.ident("loop variable")?;
                self.expect(&Tok::In, "'in'")?;
                match self.ident("'range'")? {
                    name if name == "range" => {}
                    _ => return Err(self.error("for loops iterate over range(...)")),
                }
                self.expect(&Tok::LParen, "'('")?;
                let start = self.expression()?;
                self.expect(&Tok::Comma, "','")?;
                let end = self.expression()?;
                let step = if self.eat(&Tok::Comma) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(&Tok::RParen, "')'")?;
                let body = self.block()?;
                StmtKind::For {
                    var,
                    start,
                    end,
                    step,
                    body,
                }
            }
            Tok::While => {
                self.advance();
                let cond = self.expression()?;
                let body = self.block()?;
                StmtKind::While(cond, body)
            }
            Tok::If => self.if_statement()?,
            Tok::Return => {
                self.advance();
                let value = if self.check(&Tok::Semi) || self.check(&Tok::RBrace) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_of_statement()?;
                StmtKind::Return(value)
            }
            Tok::Break => {
                self.advance();
                self.end_of_statement()?;
                StmtKind::Break
            }
            Tok::Continue => {
                self.advance();
                self.end_of_statement()?;
                StmtKind::Continue
            }
            Tok::Ident(name) if self.is_assignment() => {
                self.advance();
                let op = self.advance();
                let value = self.expression()?;
                self.end_of_statement()?;
                let value = match op.tok {
                    Tok::PlusAssign => compound(&name, BinOp::Add, value, line),
                    Tok::MinusAssign => compound(&name, BinOp::Sub, value, line),
                    _ => value,
                };
                StmtKind::Assign(name, value)
            }
            _ => {
                let expr = self.expression()?;
                self.end_of_statement()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn if_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.expect(&Tok::If, "'if'")?;
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.eat(&Tok::Else) {
            if self.check(&Tok::If) {
                // Each `else if` nests one level deeper in the tree.
                let line = self.peek().line;
                self.enter()?;
                let nested = self.if_statement()?;
                self.leave();
                Some(vec![Stmt { kind: nested, line }])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If(cond, then, otherwise))
    }

    fn is_assignment(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 1).map(|t| &t.tok),
            Some(Tok::Assign | Tok::PlusAssign | Tok::MinusAssign)
        )
    }

    /// Semicolons are required except before a closing brace.
    fn end_of_statement(&mut self) -> Result<(), ScriptError> {
        if self.eat(&Tok::Semi) || self.check(&Tok::RBrace) || self.check(&Tok::Eof) {
            Ok(())
        } else {
            Err(self.error("expected ';'"))
        }
    }

    // -- expressions --------------------------------------------------------

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let expr = self.binary(0);
        self.leave();
        expr
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ScriptError> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = binary_op(&self.peek().tok) {
            if prec < min_prec {
                break;
            }
            let line = self.advance().line;
            let rhs = self.binary(prec + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                line,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.peek().line;
        let op = match self.peek().tok {
            Tok::Minus => UnaryOp::Neg,
            Tok::Bang => UnaryOp::Not,
            _ => return self.atom(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary();
        self.leave();
        Ok(Expr {
            kind: ExprKind::Unary(op, Box::new(operand?)),
            line,
        })
    }

    fn atom(&mut self) -> Result<Expr, ScriptError> {
        let token = self.advance();
        let line = token.line;
        let kind = match token.tok {
            Tok::Int(n) => ExprKind::Int(n),
            Tok::Float(f) => ExprKind::Float(f),
            Tok::Str(s) => ExprKind::Str(s),
            Tok::True => ExprKind::Bool(true),
            Tok::False => ExprKind::Bool(false),
            Tok::Nil => ExprKind::Nil,
            Tok::Ident(name) => {
                if self.eat(&Tok::LParen) {
                    let mut args = Vec::new();
                    if !self.check(&Tok::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&Tok::RParen, "')' after arguments")?;
                    ExprKind::Call(name, args)
                } else {
                    ExprKind::Var(name)
                }
            }
            Tok::LParen => {
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "')'")?;
                return Ok(inner);
            }
            Tok::LBrace => self.map_literal()?,
            other => {
                return Err(ScriptError::Syntax {
                    line,
                    column: token.column,
                    message: format!("expected expression (found {})", describe(&other)),
                })
            }
        };
        Ok(Expr { kind, line })
    }

    /// `{key: expr, "quoted key": expr}`; the opening brace is consumed.
    fn map_literal(&mut self) -> Result<ExprKind, ScriptError> {
        let mut entries = Vec::new();
        while !self.check(&Tok::RBrace) {
            let key = match self.advance().tok {
                Tok::Ident(k) | Tok::Str(k) => k,
                _ => return Err(self.error("expected map key")),
            };
            self.expect(&Tok::Colon, "':'")?;
            entries.push((key, self.expression()?));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(ExprKind::Map(entries))
    }
}

fn compound(name: &str, op: BinOp, rhs: Expr, line: usize) -> Expr {
    let lhs = Expr {
        kind: ExprKind::Var(name.to_string()),
        line,
    };
    Expr {
        kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
        line,
    }
}

fn binary_op(tok: &Tok) -> Option<(BinOp, u8)> {
    Some(match tok {
        Tok::OrOr => (BinOp::Or, 1),
        Tok::AndAnd => (BinOp::And, 2),
        Tok::Eq => (BinOp::Eq, 3),
        Tok::NotEq => (BinOp::NotEq, 3),
        Tok::Lt => (BinOp::Lt, 4),
        Tok::LtEq => (BinOp::LtEq, 4),
        Tok::Gt => (BinOp::Gt, 4),
        Tok::GtEq => (BinOp::GtEq, 4),
        Tok::Plus => (BinOp::Add, 5),
        Tok::Minus => (BinOp::Sub, 5),
        Tok::Star => (BinOp::Mul, 6),
        Tok::Slash => (BinOp::Div, 6),
        Tok::Percent => (BinOp::Rem, 6),
        _ => return None,
    })
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Eof => "end of input".to_string(),
        Tok::Ident(name) => format!("identifier '{}'", name),
        Tok::Int(n) => n.to_string(),
        Tok::Float(f) => f.to_string(),
        Tok::Str(s) => format!("string {:?}", s),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Result<Vec<Stmt>, ScriptError> {
        Parser::new(tokenize(src)?).parse_program()
    }

    #[test]
    fn test_precedence() {
        let stmts = parse("let x = 1 + 2 * 3;").unwrap();
        let StmtKind::Let(_, expr) = &stmts[0].kind else {
            panic!("expected let");
        };
        let ExprKind::Binary(BinOp::Add, _, rhs) = &expr.kind else {
            panic!("expected addition at the root, got {:?}", expr.kind);
        };
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let stmts = parse("x += 2;").unwrap();
        let StmtKind::Assign(name, expr) = &stmts[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(name, "x");
        assert!(matches!(expr.kind, ExprKind::Binary(BinOp::Add, _, _)));
    }

    #[test]
    fn test_control_flow_and_functions() {
        let src = r#"
            fn wall(x, h) {
                for y in range(0, h) { place(x, y, 0, "stone"); }
                return h
            }
            if a > 1 { wall(1, 2); } else if a < 0 { b = 1; } else { }
            while false { break; }
        "#;
        let stmts = parse(src).unwrap();
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[0].kind, StmtKind::Fn(def) if def.params == ["x", "h"]));
        assert_eq!(stmts[1].line, 6);
    }

    #[test]
    fn test_map_literal() {
        let stmts = parse(r#"place(0, 0, 0, "oak_log", {states: {axis: "y"}, "mode": "keep"});"#)
            .unwrap();
        let StmtKind::Expr(Expr {
            kind: ExprKind::Call(name, args),
            ..
        }) = &stmts[0].kind
        else {
            panic!("expected call");
        };
        assert_eq!(name, "place");
        assert!(matches!(&args[4].kind, ExprKind::Map(entries) if entries.len() == 2));
    }

    #[test]
    fn test_missing_semicolon_reports_position() {
        let err = parse("let a = 1\nlet b = 2;").unwrap_err();
        match err {
            ScriptError::Syntax { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("';'"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_for_requires_range() {
        assert!(parse("for i in items(3) { }").is_err());
    }

    #[test]
    fn test_unclosed_block() {
        assert!(parse("if true { place(0,0,0,\"stone\");").is_err());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let src = format!("let x = {}1{};", "(".repeat(500), ")".repeat(500));
        assert!(matches!(parse(&src), Err(ScriptError::Syntax { .. })));
    }

    fn else_if_chain(links: usize) -> String {
        format!(
            "if false {{ }}{} else {{ place(0, 0, 0, \"stone\"); }}",
            " else if false { }".repeat(links)
        )
    }

    #[test]
    fn test_else_if_chain_is_bounded() {
        assert!(parse(&else_if_chain(100)).is_ok());

        let err = parse(&else_if_chain(10_000)).unwrap_err();
        match err {
            ScriptError::Syntax { message, .. } => {
                assert!(message.contains("nesting too deep"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
