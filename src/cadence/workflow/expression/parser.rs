// SPDX-License-Identifier: MIT

//! Recursive-descent expression parser
//!
//! Parses expressions like:
//! - `invoice.total > 1000`
//! - `status != 'done' and len(approvers) >= 2`
//! - `payload.type in ['invoice.created', 'invoice.updated']`

use super::ast::{BinaryOp, Expression, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use crate::kit::error::ExpressionError;
use serde_json::Value;

/// Parse an expression string into an AST
pub fn parse(input: &str) -> Result<Expression, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::syntax("empty expression", 0));
    }

    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: input.len(),
    };
    let expr = parser.parse_or()?;

    if let Some(extra) = parser.tokens.get(parser.cursor) {
        return Err(ExpressionError::syntax(
            format!("unexpected {:?} after end of expression", extra.token),
            extra.pos,
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map(|s| s.pos)
            .unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let next = self.tokens.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        next
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(ExpressionError::syntax(
                format!("expected {}", what),
                self.position(),
            ))
        }
    }

    fn parse_or(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expression::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expression::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, ExpressionError> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression, ExpressionError> {
        let left = self.parse_additive()?;
        let Some(op) = self.peek().and_then(comparison_op) else {
            return Ok(left);
        };
        self.cursor += 1;
        let right = self.parse_additive()?;

        if self.peek().and_then(comparison_op).is_some() {
            return Err(ExpressionError::syntax(
                "comparisons cannot be chained; combine them with 'and'",
                self.position(),
            ));
        }

        Ok(Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.cursor += 1;
            let right = self.parse_multiplicative()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.cursor += 1;
            let right = self.parse_unary()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ExpressionError> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expression::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ExpressionError> {
        let Some(Spanned { token, pos }) = self.advance() else {
            return Err(ExpressionError::syntax(
                "unexpected end of expression",
                self.end,
            ));
        };

        match token {
            Token::Number(n) => Ok(Expression::Literal(n)),
            Token::Str(s) => Ok(Expression::Literal(Value::String(s))),
            Token::True => Ok(Expression::Literal(Value::Bool(true))),
            Token::False => Ok(Expression::Literal(Value::Bool(false))),
            Token::Null => Ok(Expression::Literal(Value::Null)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.parse_list(Token::RBracket, "']'")?;
                Ok(Expression::List(items))
            }
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_list(Token::RParen, "')'")?;
                    return Ok(Expression::Call { name, args });
                }
                self.parse_path(name)
            }
            other => Err(ExpressionError::syntax(
                format!("unexpected {:?}", other),
                pos,
            )),
        }
    }

    /// Comma-separated expressions up to (and consuming) `close`
    fn parse_list(&mut self, close: Token, what: &str) -> Result<Vec<Expression>, ExpressionError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_or()?);
            if self.eat(&close) {
                return Ok(items);
            }
            self.expect(Token::Comma, &format!("',' or {}", what))?;
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expression, ExpressionError> {
        let mut segments = vec![root];
        while self.eat(&Token::Dot) {
            let pos = self.position();
            match self.advance().map(|s| s.token) {
                Some(Token::Ident(field)) => segments.push(field),
                Some(Token::Number(Value::Number(n))) if n.is_u64() => segments.push(n.to_string()),
                _ => {
                    return Err(ExpressionError::syntax(
                        "expected field name or index after '.'",
                        pos,
                    ))
                }
            }
        }
        Ok(Expression::Path(segments))
    }
}

fn comparison_op(token: &Token) -> Option<BinaryOp> {
    match token {
        Token::EqEq => Some(BinaryOp::Eq),
        Token::NotEq => Some(BinaryOp::NotEq),
        Token::Gt => Some(BinaryOp::Gt),
        Token::Gte => Some(BinaryOp::Gte),
        Token::Lt => Some(BinaryOp::Lt),
        Token::Lte => Some(BinaryOp::Lte),
        Token::Contains => Some(BinaryOp::Contains),
        Token::In => Some(BinaryOp::In),
        _ => None,
    }
}
