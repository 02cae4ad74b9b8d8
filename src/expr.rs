//! Expressions and Code-Tag Statements
//!
//! The small language accepted inside tags. Output tags hold one
//! expression; code tags hold one statement, and block statements (`if`,
//! `for`) stay open until a later `<% } %>` closes them.

use crate::error::{Result, TemplateError};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Ident(String),
    This,
    Locals,
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Empty,
    If(Expr),
    ElseIf(Expr),
    Else,
    For {
        binding: String,
        index: Option<String>,
        iterable: Expr,
    },
    End,
    Let(String, Expr),
    Eval(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(&'static str),
    LBrace,
    RBrace,
}

const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!", "=",
    "(", ")", "[", "]", ",", ".", "?", ":", ";",
];

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => name.clone(),
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("{:?}", s),
        Token::Op(op) => op.to_string(),
        Token::LBrace => "{".to_string(),
        Token::RBrace => "}".to_string(),
    }
}

/// Length of an `e[+-]digits` exponent at the start of `rest`, or 0.
fn exponent_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    if !matches!(bytes.first(), Some(b'e' | b'E')) {
        return 0;
    }
    let mut len = 1;
    if matches!(bytes.get(len), Some(b'+' | b'-')) {
        len += 1;
    }
    let digits = bytes[len..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        0
    } else {
        len + digits
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '{' {
            chars.next();
            tokens.push(Token::LBrace);
        } else if c == '}' {
            chars.next();
            tokens.push(Token::RBrace);
        } else if c.is_ascii_digit() {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let exponent = exponent_len(&src[end..]);
            if exponent > 0 {
                end += exponent;
                while chars.peek().map_or(false, |&(i, _)| i < end) {
                    chars.next();
                }
            }
            let literal = &src[start..end];
            let n = literal
                .parse()
                .map_err(|_| TemplateError::syntax(format!("Invalid number `{}`", literal)))?;
            tokens.push(Token::Number(n));
        } else if c == '"' || c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, d)) = chars.next() {
                match d {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, e)) => text.push(e),
                        None => break,
                    },
                    d if d == c => {
                        closed = true;
                        break;
                    }
                    d => text.push(d),
                }
            }
            if !closed {
                return Err(TemplateError::syntax(format!("Unterminated string in `{}`", src.trim())));
            }
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' || d == '$' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(src[start..end].to_string()));
        } else {
            let rest = &src[start..];
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| {
                    TemplateError::syntax(format!("Unexpected character `{}` in `{}`", c, src.trim()))
                })?;
            for _ in 0..op.len() {
                chars.next();
            }
            tokens.push(Token::Op(*op));
        }
    }
    Ok(tokens)
}

struct Parser<'s> {
    src: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Result<Self> {
        let mut tokens = tokenize(src)?;
        while tokens.last() == Some(&Token::Op(";")) {
            tokens.pop();
        }
        Ok(Self { src, tokens, pos: 0 })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(&self, expected: &str) -> TemplateError {
        let found = match self.peek() {
            Some(token) => format!("`{}`", describe(token)),
            None => "end of input".to_string(),
        };
        TemplateError::syntax(format!(
            "Expected {} but found {} in `{}`",
            expected,
            found,
            self.src.trim()
        ))
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(self.error(&format!("`{}`", op)))
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_reserved(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("a name")),
        }
    }

    fn expect_open_brace(&mut self) -> Result<()> {
        if self.peek() == Some(&Token::LBrace) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error("`{`"))
        }
    }

    fn finish<T>(&self, value: T) -> Result<T> {
        if self.is_done() {
            Ok(value)
        } else {
            Err(self.error("end of tag"))
        }
    }

    fn expression(&mut self) -> Result<Expr> {
        self.conditional()
    }

    fn conditional(&mut self) -> Result<Expr> {
        let cond = self.binary(0)?;
        if !self.eat_op("?") {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect_op(":")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    /// Precedence climbing over the binary operator table.
    fn binary(&mut self, min_level: usize) -> Result<Expr> {
        if min_level >= LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(min_level + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(o)) => LEVELS[min_level].iter().find(|(sym, _)| sym == o).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else {
                return Ok(lhs);
            };
            self.pos += 1;
            let rhs = self.binary(min_level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_op("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat_op("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_op(".") {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.error("a property name")),
                };
                expr = Expr::Member(Box::new(expr), name);
            } else if self.eat_op("[") {
                let key = self.expression()?;
                self.expect_op("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(key));
            } else if self.eat_op("(") {
                let args = self.list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to and including `close`.
    fn list(&mut self, close: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat_op(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat_op(close) {
                return Ok(items);
            }
            self.expect_op(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("an expression"));
        };
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Number(n)))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::String(s)))
            }
            Token::Ident(name) => {
                self.pos += 1;
                Ok(match name.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" | "undefined" => Expr::Literal(Value::Null),
                    "this" => Expr::This,
                    "locals" => Expr::Locals,
                    _ if is_reserved(&name) => {
                        self.pos -= 1;
                        return Err(self.error("an expression"));
                    }
                    _ => Expr::Ident(name),
                })
            }
            Token::Op("(") => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Op("[") => {
                self.pos += 1;
                Ok(Expr::Array(self.list("]")?))
            }
            _ => Err(self.error("an expression")),
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        if self.is_done() {
            return Ok(Statement::Empty);
        }

        if self.peek() == Some(&Token::RBrace) {
            self.pos += 1;
            if self.is_done() {
                return Ok(Statement::End);
            }
            if !matches!(self.peek(), Some(Token::Ident(k)) if k == "else") {
                return Err(self.error("`else` or end of tag"));
            }
        }

        if self.eat_keyword("else") {
            if self.eat_keyword("if") {
                let cond = self.expression()?;
                self.expect_open_brace()?;
                return self.finish(Statement::ElseIf(cond));
            }
            self.expect_open_brace()?;
            return self.finish(Statement::Else);
        }

        if self.eat_keyword("if") {
            let cond = self.expression()?;
            self.expect_open_brace()?;
            return self.finish(Statement::If(cond));
        }

        if self.eat_keyword("for") {
            let binding = self.expect_ident()?;
            let index = if self.eat_op(",") {
                Some(self.expect_ident()?)
            } else {
                None
            };
            if !self.eat_keyword("in") {
                return Err(self.error("`in`"));
            }
            let iterable = self.expression()?;
            self.expect_open_brace()?;
            return self.finish(Statement::For { binding, index, iterable });
        }

        if matches!(self.peek(), Some(Token::Ident(k)) if k == "let" || k == "var" || k == "const")
            && matches!(self.peek_at(1), Some(Token::Ident(_)))
        {
            self.pos += 1;
            let name = self.expect_ident()?;
            self.expect_op("=")?;
            let value = self.expression()?;
            return self.finish(Statement::Let(name, value));
        }

        let expr = self.expression()?;
        self.finish(Statement::Eval(expr))
    }
}

const LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[
        ("===", BinaryOp::StrictEq),
        ("!==", BinaryOp::StrictNe),
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::Ne),
    ],
    &[
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "if" | "else" | "for" | "in" | "let" | "var" | "const" | "include"
            | "true" | "false" | "null" | "undefined" | "this" | "locals"
    )
}

pub fn parse_expression(src: &str) -> Result<Expr> {
    let mut parser = Parser::new(src)?;
    let expr = parser.expression()?;
    parser.finish(expr)
}

/// Filter arguments: a possibly empty comma-separated list.
pub fn parse_arguments(src: &str) -> Result<Vec<Expr>> {
    let mut parser = Parser::new(src)?;
    if parser.is_done() {
        return Ok(Vec::new());
    }
    let mut args = vec![parser.expression()?];
    while parser.eat_op(",") {
        args.push(parser.expression()?);
    }
    parser.finish(args)
}

pub fn parse_statement(src: &str) -> Result<Statement> {
    let trimmed = src.trim();
    if trimmed.starts_with("//") || trimmed.starts_with('#') {
        return Ok(Statement::Empty);
    }
    Parser::new(src)?.statement()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a + b * 2 > 3 && !c").unwrap();
        let Expr::Binary(BinaryOp::And, lhs, rhs) = expr else {
            panic!("expected &&");
        };
        assert!(matches!(*lhs, Expr::Binary(BinaryOp::Gt, _, _)));
        assert_eq!(*rhs, Expr::Unary(UnaryOp::Not, ident("c")));
    }

    #[test]
    fn test_exponent_literals() {
        let number = |src: &str| parse_expression(src).unwrap();
        assert_eq!(number("1e3"), Expr::Literal(Value::Number(1000.0)));
        assert_eq!(number("2.5E-1"), Expr::Literal(Value::Number(0.25)));
        assert_eq!(number("4e+2"), Expr::Literal(Value::Number(400.0)));
        assert!(matches!(number("1e3 * 2"), Expr::Binary(BinaryOp::Mul, _, _)));
        assert!(parse_expression("1e").is_err());
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expression("users[0].name").unwrap();
        assert_eq!(
            expr,
            Expr::Member(
                Box::new(Expr::Index(ident("users"), Box::new(Expr::Literal(Value::Number(0.0))))),
                "name".to_string()
            )
        );
        assert!(matches!(parse_expression("getSum(1, 2)").unwrap(), Expr::Call(_, args) if args.len() == 2));
    }

    #[test]
    fn test_arguments() {
        let args = parse_arguments(r#" 2,"..." "#).unwrap();
        assert_eq!(
            args,
            vec![
                Expr::Literal(Value::Number(2.0)),
                Expr::Literal(Value::String("...".into()))
            ]
        );
        assert!(parse_arguments("").unwrap().is_empty());
    }

    #[test]
    fn test_block_statements() {
        assert!(matches!(parse_statement(" if (user.admin) { ").unwrap(), Statement::If(_)));
        assert!(matches!(parse_statement(" } else if x == 1 { ").unwrap(), Statement::ElseIf(_)));
        assert_eq!(parse_statement("} else {").unwrap(), Statement::Else);
        assert_eq!(parse_statement(" } ").unwrap(), Statement::End);
        assert_eq!(
            parse_statement(" for user, i in users { ").unwrap(),
            Statement::For {
                binding: "user".into(),
                index: Some("i".into()),
                iterable: Expr::Ident("users".into()),
            }
        );
    }

    #[test]
    fn test_simple_statements() {
        assert_eq!(parse_statement("  ").unwrap(), Statement::Empty);
        assert_eq!(parse_statement(" // a comment ").unwrap(), Statement::Empty);
        assert_eq!(
            parse_statement(" let total = 1; ").unwrap(),
            Statement::Let("total".into(), Expr::Literal(Value::Number(1.0)))
        );
        assert!(matches!(parse_statement(" log('x') ").unwrap(), Statement::Eval(Expr::Call(_, _))));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_expression("a +").is_err());
        assert!(parse_expression("'open").is_err());
        assert!(parse_statement("if x").is_err());
        assert!(parse_statement("} x").is_err());
        assert!(parse_expression("a b").is_err());
    }
}
