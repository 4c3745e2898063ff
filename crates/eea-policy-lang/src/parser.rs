//! Recursive-descent parser for the predicate language.

use eea_core::comparator::Comparator;

use crate::ast::Expr;
use crate::ast::Item;
use crate::ast::PathSegment;
use crate::ast::Program;
use crate::ast::Stmt;
use crate::error::DslError;
use crate::error::MAX_DSL_NESTING;
use crate::lexer::Lexer;
use crate::lexer::SpannedToken;
use crate::lexer::Token;

/// Parses a full predicate program from source text.
///
/// # Errors
/// Returns a [`DslError`] on any lexical or syntactic error.
pub fn parse_program(source: &str) -> Result<Program, DslError> {
    let tokens = Lexer::new(source)?.tokenize()?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let program = parser.parse_program()?;
    parser.expect(&Token::Eof)?;
    Ok(program)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), DslError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(DslError::UnexpectedToken {
                found: self.peek().to_string(),
                expected: expected.to_string(),
                offset: self.offset(),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<String, DslError> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(DslError::UnexpectedToken {
                found: other.to_string(),
                expected: "identifier".to_owned(),
                offset: self.offset(),
            }),
        }
    }

    fn enter_nesting(&mut self) -> Result<(), DslError> {
        self.depth += 1;
        if self.depth > MAX_DSL_NESTING {
            return Err(DslError::NestingTooDeep { max: MAX_DSL_NESTING });
        }
        Ok(())
    }

    fn exit_nesting(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn parse_program(&mut self) -> Result<Program, DslError> {
        let mut items = Vec::new();
        while self.peek() != &Token::Eof {
            items.push(self.parse_item()?);
        }
        Ok(Program { items })
    }

    fn parse_item(&mut self) -> Result<Item, DslError> {
        let name = self.expect_ident()?;
        if self.peek() == &Token::ColonEquals {
            self.advance();
            let expr = self.parse_expr()?;
            self.expect(&Token::Semicolon)?;
            return Ok(Item::Assignment { name, expr });
        }

        self.expect(&Token::LBrace)?;
        let body = self.parse_block_body()?;
        self.expect(&Token::RBrace)?;

        if name == "violation" {
            let mut conditions = Vec::new();
            let mut msg = None;
            let mut output = None;
            let mut skip = None;
            for stmt in body {
                match stmt {
                    Stmt::Expr(expr) => conditions.push(expr),
                    Stmt::Assign(key, expr) if key == "msg" => msg = Some(expr),
                    Stmt::Assign(key, expr) if key == "output" => output = Some(expr),
                    Stmt::Assign(key, expr) if key == "skip" => skip = Some(expr),
                    Stmt::Assign(key, _) => {
                        return Err(DslError::UnexpectedToken {
                            found: key,
                            expected: "msg, output, or skip".to_owned(),
                            offset: self.offset(),
                        });
                    }
                }
            }
            Ok(Item::Violation { conditions, msg, output, skip })
        } else {
            let conditions = body
                .into_iter()
                .map(|stmt| match stmt {
                    Stmt::Expr(expr) => Ok(expr),
                    Stmt::Assign(key, _) => Err(DslError::UnexpectedToken {
                        found: key,
                        expected: "expression".to_owned(),
                        offset: self.offset(),
                    }),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Item::NamedBlock { name, conditions })
        }
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, DslError> {
        let mut stmts = Vec::new();
        while self.peek() != &Token::RBrace {
            if let Token::Ident(name) = self.peek().clone() {
                if self.tokens.get(self.pos + 1).map(|t| &t.token) == Some(&Token::ColonEquals) {
                    self.advance();
                    self.advance();
                    let expr = self.parse_expr()?;
                    self.expect(&Token::Semicolon)?;
                    stmts.push(Stmt::Assign(name, expr));
                    continue;
                }
            }
            let expr = self.parse_expr()?;
            self.expect(&Token::Semicolon)?;
            stmts.push(Stmt::Expr(expr));
        }
        Ok(stmts)
    }

    fn parse_expr(&mut self) -> Result<Expr, DslError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, DslError> {
        self.enter_nesting()?;
        let mut left = self.parse_and()?;
        while self.peek() == &Token::OrOr {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.exit_nesting();
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, DslError> {
        self.enter_nesting()?;
        let mut left = self.parse_unary()?;
        while self.peek() == &Token::AndAnd {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.exit_nesting();
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, DslError> {
        if self.peek() == &Token::Bang {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, DslError> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Token::EqEq => Comparator::Equals,
            Token::NotEq => Comparator::NotEquals,
            Token::Gt => Comparator::GreaterThan,
            Token::Ge => Comparator::GreaterThanOrEqual,
            Token::Lt => Comparator::LessThan,
            Token::Le => Comparator::LessThanOrEqual,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;
        Ok(Expr::Compare { op, left: Box::new(left), right: Box::new(right) })
    }

    fn parse_primary(&mut self) -> Result<Expr, DslError> {
        self.enter_nesting()?;
        let result = match self.peek().clone() {
            Token::True => {
                self.advance();
                Ok(Expr::Literal(serde_json::Value::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(serde_json::Value::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(serde_json::Value::Null))
            }
            Token::Int(value) => {
                self.advance();
                Ok(Expr::Literal(serde_json::Value::from(value)))
            }
            Token::Float(value) => {
                self.advance();
                Ok(serde_json::Number::from_f64(value)
                    .map_or(Expr::Literal(serde_json::Value::Null), |number| {
                        Expr::Literal(serde_json::Value::Number(number))
                    }))
            }
            Token::Str(value) => {
                self.advance();
                Ok(Expr::Literal(serde_json::Value::String(value)))
            }
            Token::LBracket => self.parse_array(),
            Token::LBrace => self.parse_object(),
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(_) => self.parse_path_or_call(),
            other => Err(DslError::UnexpectedToken {
                found: other.to_string(),
                expected: "expression".to_owned(),
                offset: self.offset(),
            }),
        };
        self.exit_nesting();
        result
    }

    fn parse_array(&mut self) -> Result<Expr, DslError> {
        self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        while self.peek() != &Token::RBracket {
            items.push(self.parse_expr()?);
            if self.peek() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::Array(items))
    }

    fn parse_object(&mut self) -> Result<Expr, DslError> {
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();
        while self.peek() != &Token::RBrace {
            let key = match self.advance() {
                Token::Str(value) => value,
                Token::Ident(value) => value,
                other => {
                    return Err(DslError::UnexpectedToken {
                        found: other.to_string(),
                        expected: "object key".to_owned(),
                        offset: self.offset(),
                    });
                }
            };
            self.expect(&Token::ColonEquals)?;
            let value = self.parse_expr()?;
            fields.push((key, value));
            if self.peek() == &Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::Object(fields))
    }

    fn parse_path_or_call(&mut self) -> Result<Expr, DslError> {
        let mut names = vec![self.expect_ident()?];
        let mut segments = vec![PathSegment::Field(names[0].clone())];
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let field = self.expect_ident()?;
                    names.push(field.clone());
                    segments.push(PathSegment::Field(field));
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    segments.push(PathSegment::Index(Box::new(index)));
                }
                _ => break,
            }
        }
        if self.peek() == &Token::LParen {
            self.advance();
            let mut args = Vec::new();
            while self.peek() != &Token::RParen {
                args.push(self.parse_expr()?);
                if self.peek() == &Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(Expr::Call { path: names, args });
        }
        Ok(Expr::Path(segments))
    }
}
