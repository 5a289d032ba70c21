use syntrend_core::graph::resolve_reference;

use super::ExpressionError;
use super::lexer::{Spanned, Token};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Name(String),
    /// Absolute path of a `{...}` reference.
    Reference(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Attribute {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

// binding powers, loosest first
const CONDITIONAL_BP: u8 = 2;
const FILTER_BP: u8 = 3;
const OR_BP: u8 = 4;
const AND_BP: u8 = 5;
const NOT_BP: u8 = 6;
const COMPARE_BP: u8 = 7;
const CONCAT_BP: u8 = 8;
const SUM_BP: u8 = 9;
const PRODUCT_BP: u8 = 10;
const UNARY_BP: u8 = 11;
const POWER_BP: u8 = 12;
const POSTFIX_BP: u8 = 13;

enum Infix {
    Binary(BinaryOp),
    And,
    Or,
    Conditional,
    Filter,
    Call,
    Attribute,
    Index,
}

pub struct Parser<'a> {
    tokens: Vec<Spanned>,
    position: usize,
    end: usize,
    object: &'a str,
}

impl<'a> Parser<'a> {
    /// `object` expands `this` inside references.
    pub fn new(tokens: Vec<Spanned>, source_len: usize, object: &'a str) -> Self {
        Self {
            tokens,
            position: 0,
            end: source_len,
            object,
        }
    }

    pub fn parse(mut self) -> Result<Expr, ExpressionError> {
        let expr = self.expression(0)?;
        if let Some(extra) = self.tokens.get(self.position) {
            return Err(syntax(extra.position, format!("unexpected {}", describe(&extra.token))));
        }
        Ok(expr)
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        let mut left = self.prefix()?;

        while let Some((infix, bp)) = self.peek_infix() {
            if bp < min_bp {
                break;
            }
            left = self.infix(left, infix, bp)?;
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ExpressionError> {
        let Some(spanned) = self.advance() else {
            return Err(syntax(self.end, "unexpected end of expression"));
        };
        let position = spanned.position;

        match spanned.token {
            Token::Int(int) => Ok(Expr::Literal(Value::Int(int))),
            Token::Float(float) => Ok(Expr::Literal(Value::Float(float))),
            Token::Str(text) => Ok(Expr::Literal(Value::Text(text))),
            Token::Reference(path) => Ok(Expr::Reference(resolve_reference(self.object, &path))),
            Token::Ident(ident) => match ident.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" => Ok(Expr::Literal(Value::Null)),
                "not" => Ok(Expr::Not(Box::new(self.expression(NOT_BP)?))),
                "and" | "or" | "if" | "else" | "in" => {
                    Err(syntax(position, format!("unexpected keyword '{ident}'")))
                }
                _ => Ok(Expr::Name(ident)),
            },
            Token::Symbol("(") => {
                let inner = self.expression(0)?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            Token::Symbol("[") => Ok(Expr::List(self.arguments("]")?)),
            Token::Symbol("-") => Ok(Expr::Neg(Box::new(self.expression(UNARY_BP)?))),
            Token::Symbol("+") => self.expression(UNARY_BP),
            Token::Symbol(symbol) => Err(syntax(position, format!("unexpected '{symbol}'"))),
        }
    }

    fn peek_infix(&self) -> Option<(Infix, u8)> {
        let token = &self.tokens.get(self.position)?.token;
        let infix = match token {
            Token::Symbol(symbol) => match *symbol {
                "+" => (Infix::Binary(BinaryOp::Add), SUM_BP),
                "-" => (Infix::Binary(BinaryOp::Sub), SUM_BP),
                "*" => (Infix::Binary(BinaryOp::Mul), PRODUCT_BP),
                "/" => (Infix::Binary(BinaryOp::Div), PRODUCT_BP),
                "//" => (Infix::Binary(BinaryOp::FloorDiv), PRODUCT_BP),
                "%" => (Infix::Binary(BinaryOp::Rem), PRODUCT_BP),
                "**" => (Infix::Binary(BinaryOp::Pow), POWER_BP),
                "~" => (Infix::Binary(BinaryOp::Concat), CONCAT_BP),
                "==" => (Infix::Binary(BinaryOp::Eq), COMPARE_BP),
                "!=" => (Infix::Binary(BinaryOp::Ne), COMPARE_BP),
                "<" => (Infix::Binary(BinaryOp::Lt), COMPARE_BP),
                "<=" => (Infix::Binary(BinaryOp::Le), COMPARE_BP),
                ">" => (Infix::Binary(BinaryOp::Gt), COMPARE_BP),
                ">=" => (Infix::Binary(BinaryOp::Ge), COMPARE_BP),
                "|" => (Infix::Filter, FILTER_BP),
                "(" => (Infix::Call, POSTFIX_BP),
                "." => (Infix::Attribute, POSTFIX_BP),
                "[" => (Infix::Index, POSTFIX_BP),
                _ => return None,
            },
            Token::Ident(ident) => match ident.as_str() {
                "and" => (Infix::And, AND_BP),
                "or" => (Infix::Or, OR_BP),
                "if" => (Infix::Conditional, CONDITIONAL_BP),
                "in" => (Infix::Binary(BinaryOp::In), COMPARE_BP),
                "not" if self.peek_ident_at(self.position + 1, "in") => {
                    (Infix::Binary(BinaryOp::NotIn), COMPARE_BP)
                }
                _ => return None,
            },
            _ => return None,
        };
        Some(infix)
    }

    fn infix(&mut self, left: Expr, infix: Infix, bp: u8) -> Result<Expr, ExpressionError> {
        self.advance();
        let left = Box::new(left);
        match infix {
            Infix::Binary(BinaryOp::NotIn) => {
                self.advance();
                let right = Box::new(self.expression(bp + 1)?);
                Ok(Expr::Binary {
                    op: BinaryOp::NotIn,
                    left,
                    right,
                })
            }
            Infix::Binary(BinaryOp::Pow) => {
                // right associative
                let right = Box::new(self.expression(bp)?);
                Ok(Expr::Binary {
                    op: BinaryOp::Pow,
                    left,
                    right,
                })
            }
            Infix::Binary(op) => {
                let right = Box::new(self.expression(bp + 1)?);
                Ok(Expr::Binary { op, left, right })
            }
            Infix::And => Ok(Expr::And(left, Box::new(self.expression(bp + 1)?))),
            Infix::Or => Ok(Expr::Or(left, Box::new(self.expression(bp + 1)?))),
            Infix::Conditional => {
                let condition = Box::new(self.expression(bp + 1)?);
                self.expect_ident("else")?;
                let otherwise = Box::new(self.expression(bp)?);
                Ok(Expr::Conditional {
                    condition,
                    then: left,
                    otherwise,
                })
            }
            Infix::Filter => {
                let name = self.ident()?;
                let mut args = vec![*left];
                if self.peek_symbol("(") {
                    self.advance();
                    args.extend(self.arguments(")")?);
                }
                Ok(Expr::Call {
                    callee: Box::new(Expr::Name(name)),
                    args,
                })
            }
            Infix::Call => Ok(Expr::Call {
                callee: left,
                args: self.arguments(")")?,
            }),
            Infix::Attribute => Ok(Expr::Attribute {
                target: left,
                name: self.ident()?,
            }),
            Infix::Index => {
                let index = Box::new(self.expression(0)?);
                self.expect_symbol("]")?;
                Ok(Expr::Index {
                    target: left,
                    index,
                })
            }
        }
    }

    /// Comma separated expressions up to `close`, which is consumed.
    fn arguments(&mut self, close: &str) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.peek_symbol(close) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.peek_symbol(",") {
                self.advance();
                continue;
            }
            self.expect_symbol(close)?;
            return Ok(items);
        }
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.position).cloned();
        if spanned.is_some() {
            self.position += 1;
        }
        spanned
    }

    fn peek_symbol(&self, symbol: &str) -> bool {
        matches!(self.tokens.get(self.position), Some(Spanned { token: Token::Symbol(s), .. }) if *s == symbol)
    }

    fn peek_ident_at(&self, index: usize, ident: &str) -> bool {
        matches!(self.tokens.get(index), Some(Spanned { token: Token::Ident(i), .. }) if i == ident)
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(Spanned {
                token: Token::Symbol(found),
                ..
            }) if found == symbol => Ok(()),
            Some(other) => Err(syntax(
                other.position,
                format!("expected '{symbol}', found {}", describe(&other.token)),
            )),
            None => Err(syntax(self.end, format!("expected '{symbol}'"))),
        }
    }

    fn expect_ident(&mut self, ident: &str) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(Spanned {
                token: Token::Ident(found),
                ..
            }) if found == ident => Ok(()),
            Some(other) => Err(syntax(
                other.position,
                format!("expected '{ident}', found {}", describe(&other.token)),
            )),
            None => Err(syntax(self.end, format!("expected '{ident}'"))),
        }
    }

    fn ident(&mut self) -> Result<String, ExpressionError> {
        match self.advance() {
            Some(Spanned {
                token: Token::Ident(ident),
                ..
            }) => Ok(ident),
            Some(other) => Err(syntax(
                other.position,
                format!("expected a name, found {}", describe(&other.token)),
            )),
            None => Err(syntax(self.end, "expected a name")),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Int(int) => format!("number {int}"),
        Token::Float(float) => format!("number {float}"),
        Token::Str(text) => format!("string '{text}'"),
        Token::Ident(ident) => format!("'{ident}'"),
        Token::Reference(path) => format!("reference {{{path}}}"),
        Token::Symbol(symbol) => format!("'{symbol}'"),
    }
}

fn syntax(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        position,
        message: message.into(),
    }
}
