//! Recursive descent parser with panic-mode recovery.

use crate::ast::{ClassDecl, Expr, FunctionDecl, Lit, Program, Stmt};
use crate::error::{Diagnostic, ParseError};
use crate::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<Diagnostic>,
}

/// Internal marker for panic-mode unwinding; diagnostics are batched.
struct Panic;

type PResult<T> = Result<T, Panic>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, current: 0, errors: Vec::new() }
    }

    pub fn parse(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            if let Ok(stmt) = self.declaration() {
                statements.push(stmt);
            } else {
                self.synchronize();
            }
        }
        let next_token_id = self.tokens.iter().map(|t| t.id.0).max().unwrap_or(0) + 1;
        if self.errors.is_empty() {
            Ok(Program { statements, next_token_id })
        } else {
            Err(ParseError(self.errors))
        }
    }

    // Declarations

    fn declaration(&mut self) -> PResult<Stmt> {
        if self.matches(TokenKind::Class) {
            self.class_declaration()
        } else if self.matches(TokenKind::Fun) {
            Ok(Stmt::Function(self.function("function")?))
        } else if self.matches(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        }
    }

    fn class_declaration(&mut self) -> PResult<Stmt> {
        let name = self.consume(TokenKind::Identifier, "Expect class name.")?;

        let superclass = if self.matches(TokenKind::Less) {
            let super_name = self.consume(TokenKind::Identifier, "Expect superclass name.")?;
            Some(Expr::Variable { name: super_name })
        } else {
            None
        };

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.")?;
        let mut methods = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class(ClassDecl { name, superclass, methods }))
    }

    fn function(&mut self, kind: &str) -> PResult<FunctionDecl> {
        let name = self.consume(TokenKind::Identifier, format!("Expect {kind} name."))?;
        self.consume(TokenKind::LeftParen, format!("Expect '(' after {kind} name."))?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= 255 {
                    let token = self.peek().clone();
                    self.error(&token, "Can't have more than 255 parameters.");
                }
                params.push(self.consume(TokenKind::Identifier, "Expect parameter name.")?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.consume(TokenKind::LeftBrace, format!("Expect '{{' before {kind} body."))?;
        let body = self.block()?;
        Ok(FunctionDecl { name, params, body, is_native: false })
    }

    fn var_declaration(&mut self) -> PResult<Stmt> {
        let name = self.consume(TokenKind::Identifier, "Expect variable name.")?;
        let initializer =
            if self.matches(TokenKind::Equal) { Some(self.expression()?) } else { None };
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var { name, initializer })
    }

    // Statements

    fn statement(&mut self) -> PResult<Stmt> {
        if self.matches(TokenKind::For) {
            self.for_statement()
        } else if self.matches(TokenKind::If) {
            self.if_statement()
        } else if self.matches(TokenKind::Print) {
            let expr = self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after value.")?;
            Ok(Stmt::Print { expr })
        } else if self.matches(TokenKind::Return) {
            self.return_statement()
        } else if self.matches(TokenKind::While) {
            self.while_statement()
        } else if self.matches(TokenKind::LeftBrace) {
            Ok(Stmt::Block { statements: self.block()? })
        } else {
            let expr = self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
            Ok(Stmt::Expression { expr })
        }
    }

    /// `for` desugars into an initializer block around a while loop.
    fn for_statement(&mut self) -> PResult<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.matches(TokenKind::Var) {
            Some(self.var_declaration()?)
        } else {
            let expr = self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after loop initializer.")?;
            Some(Stmt::Expression { expr })
        };

        let condition = if self.check(TokenKind::Semicolon) {
            let line = self.peek().line;
            Expr::Literal { value: Lit::Bool(true), line }
        } else {
            self.expression()?
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;

        let increment =
            if self.check(TokenKind::RightParen) { None } else { Some(self.expression()?) };
        self.consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;
        if let Some(increment) = increment {
            body = Stmt::Block {
                statements: vec![body, Stmt::Expression { expr: increment }],
            };
        }
        body = Stmt::While { condition, body: Box::new(body) };
        if let Some(initializer) = initializer {
            body = Stmt::Block { statements: vec![initializer, body] };
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after if condition.")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If { condition, then_branch, else_branch })
    }

    fn return_statement(&mut self) -> PResult<Stmt> {
        let keyword = self.previous().clone();
        let value = if self.check(TokenKind::Semicolon) { None } else { Some(self.expression()?) };
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { keyword, value })
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenKind::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { condition, body })
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(Panic) => self.synchronize(),
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    // Expressions, lowest precedence first.

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.or()?;

        if self.matches(TokenKind::Equal) {
            let equals = self.previous().clone();
            let value = Box::new(self.assignment()?);
            return match expr {
                Expr::Variable { name } => Ok(Expr::Assign { name, value }),
                Expr::Get { object, name } => Ok(Expr::Set { object, name, value }),
                _ => {
                    self.error(&equals, "Invalid assignment target.");
                    // Not a panic: the parse can continue from here.
                    Ok(Expr::Literal { value: Lit::Nil, line: equals.line })
                }
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> PResult<Expr> {
        let mut expr = self.and()?;
        while self.matches(TokenKind::Or) {
            let op = self.previous().clone();
            let right = self.and()?;
            expr = Expr::Logical { left: Box::new(expr), op, right: Box::new(right) };
        }
        Ok(expr)
    }

    fn and(&mut self) -> PResult<Expr> {
        let mut expr = self.equality()?;
        while self.matches(TokenKind::And) {
            let op = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical { left: Box::new(expr), op, right: Box::new(right) };
        }
        Ok(expr)
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[TokenKind::BangEqual, TokenKind::EqualEqual],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> PResult<Expr> {
        self.binary_level(&[TokenKind::Minus, TokenKind::Plus], Self::factor)
    }

    fn factor(&mut self) -> PResult<Expr> {
        self.binary_level(&[TokenKind::Slash, TokenKind::Star], Self::unary)
    }

    fn binary_level(
        &mut self,
        ops: &[TokenKind],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut expr = next(self)?;
        while ops.iter().any(|&k| self.matches(k)) {
            let op = self.previous().clone();
            let right = next(self)?;
            expr = Expr::Binary { left: Box::new(expr), op, right: Box::new(right) };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.matches(TokenKind::Bang) || self.matches(TokenKind::Minus) {
            let op = self.previous().clone();
            let right = Box::new(self.unary()?);
            return Ok(Expr::Unary { op, right });
        }
        self.call()
    }

    fn call(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.matches(TokenKind::Dot) {
                let name =
                    self.consume(TokenKind::Identifier, "Expect property name after '.'.")?;
                expr = Expr::Get { object: Box::new(expr), name };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> PResult<Expr> {
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if args.len() >= 255 {
                    let token = self.peek().clone();
                    self.error(&token, "Can't have more than 255 arguments.");
                }
                args.push(self.expression()?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        let paren = self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(Expr::Call { callee: Box::new(callee), paren, args })
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Bool(false), line: token.line })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Bool(true), line: token.line })
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Literal { value: Lit::Nil, line: token.line })
            }
            TokenKind::Number => {
                self.advance();
                let value = token.lexeme.parse::<f64>().unwrap_or(0.0);
                Ok(Expr::Literal { value: Lit::Number(value), line: token.line })
            }
            TokenKind::Str => {
                self.advance();
                let text = token.lexeme[1..token.lexeme.len() - 1].to_string();
                Ok(Expr::Literal { value: Lit::Str(text), line: token.line })
            }
            TokenKind::Super => {
                self.advance();
                self.consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
                let method =
                    self.consume(TokenKind::Identifier, "Expect superclass method name.")?;
                Ok(Expr::Super { keyword: token, method })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This { keyword: token })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Variable { name: token })
            }
            TokenKind::LeftParen => {
                self.advance();
                let expr = Box::new(self.expression()?);
                self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
                Ok(Expr::Grouping { expr })
            }
            _ => {
                self.error(&token, "Expect expression.");
                Err(Panic)
            }
        }
    }

    // Token stream plumbing.

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: impl Into<String>) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            let token = self.peek().clone();
            self.error(&token, message);
            Err(Panic)
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn error(&mut self, token: &Token, message: impl Into<String>) {
        let diagnostic = if token.kind == TokenKind::Eof {
            Diagnostic::at_end(token.line, message)
        } else {
            Diagnostic::new(token.line, token.lexeme.clone(), message)
        };
        self.errors.push(diagnostic);
    }

    /// Discard tokens until a likely statement boundary.
    fn synchronize(&mut self) {
        if !self.is_at_end() {
            self.advance();
        }
        while !self.is_at_end() {
            if self.previous_kind() == Some(TokenKind::Semicolon) {
                return;
            }
            match self.peek().kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn previous_kind(&self) -> Option<TokenKind> {
        if self.current == 0 {
            None
        } else {
            Some(self.tokens[self.current - 1].kind)
        }
    }
}
