use std::iter::Peekable;

use crate::error::EvaluationError;
use crate::uds::ServiceId;

use super::lexer::{Lexer, Token};
use super::value::Value;

/// Maximum nesting depth of parenthesised, unary and list expressions.
pub(crate) const MAX_DEPTH: usize = 64;

/// Maximum number of tokens in one expression.
pub(crate) const MAX_TOKENS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl CompareOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Negate(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Union(Box<Expr>, Vec<Expr>),
    Intersection(Box<Expr>, Vec<Expr>),
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
}

/// Recursive-descent parser. Identifiers are resolved against the service
/// table while parsing, so an unknown name fails before anything after it is
/// even tokenized.
pub(crate) struct Parser<'a> {
    tokens: Peekable<Lexer<'a>>,
    depth: usize,
    consumed: usize,
    end: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str) -> Self {
        Self {
            tokens: Lexer::new(source).peekable(),
            depth: 0,
            consumed: 0,
            end: source.len(),
        }
    }

    pub(crate) fn parse(mut self) -> Result<Expr, EvaluationError> {
        if self.peek()?.is_none() {
            return Err(EvaluationError::Syntax {
                position: 0,
                reason: "empty expression".into(),
            });
        }
        let expr = self.or()?;
        match self.next()? {
            None => Ok(expr),
            Some((position, token)) => Err(EvaluationError::Syntax {
                position,
                reason: format!("unexpected trailing {token:?}"),
            }),
        }
    }

    fn peek(&mut self) -> Result<Option<&Token>, EvaluationError> {
        match self.tokens.peek() {
            None => Ok(None),
            Some(Ok((_, token))) => Ok(Some(token)),
            Some(Err(err)) => Err(err.clone()),
        }
    }

    fn next(&mut self) -> Result<Option<(usize, Token)>, EvaluationError> {
        let item = self.tokens.next().transpose()?;
        if item.is_some() {
            self.consumed += 1;
            if self.consumed > MAX_TOKENS {
                return Err(EvaluationError::TooLong { limit: MAX_TOKENS });
            }
        }
        Ok(item)
    }

    fn eat(&mut self, expected: &Token) -> Result<bool, EvaluationError> {
        if self.peek()? == Some(expected) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvaluationError> {
        match self.next()? {
            Some((_, token)) if token == expected => Ok(()),
            Some((position, token)) => Err(EvaluationError::Syntax {
                position,
                reason: format!("expected {expected:?}, found {token:?}"),
            }),
            None => Err(EvaluationError::Syntax {
                position: self.end,
                reason: format!("expected {expected:?}, found end of input"),
            }),
        }
    }

    fn descend(&mut self) -> Result<(), EvaluationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvaluationError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, EvaluationError> {
        let operands = self.chain(&Token::Or, Self::and)?;
        Ok(collapse(operands, Expr::Or))
    }

    fn and(&mut self) -> Result<Expr, EvaluationError> {
        let operands = self.chain(&Token::And, Self::not)?;
        Ok(collapse(operands, Expr::And))
    }

    /// Operands of a flat `operand (op operand)*` chain.
    fn chain(
        &mut self,
        op: &Token,
        operand: fn(&mut Self) -> Result<Expr, EvaluationError>,
    ) -> Result<Vec<Expr>, EvaluationError> {
        let mut operands = vec![operand(self)?];
        while self.eat(op)? {
            operands.push(operand(self)?);
        }
        Ok(operands)
    }

    fn not(&mut self) -> Result<Expr, EvaluationError> {
        if self.eat(&Token::Not)? {
            self.descend()?;
            let inner = self.not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, EvaluationError> {
        let first = self.union()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek()? {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::Ne) => CompareOp::Ne,
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                Some(Token::In) => CompareOp::In,
                Some(Token::Not) => {
                    self.next()?;
                    self.expect(Token::In)?;
                    rest.push((CompareOp::NotIn, self.union()?));
                    continue;
                }
                _ => break,
            };
            self.next()?;
            rest.push((op, self.union()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn union(&mut self) -> Result<Expr, EvaluationError> {
        let mut operands = self.chain(&Token::Pipe, Self::intersection)?;
        let first = operands.remove(0);
        if operands.is_empty() {
            return Ok(first);
        }
        Ok(Expr::Union(Box::new(first), operands))
    }

    fn intersection(&mut self) -> Result<Expr, EvaluationError> {
        let mut operands = self.chain(&Token::Amp, Self::unary)?;
        let first = operands.remove(0);
        if operands.is_empty() {
            return Ok(first);
        }
        Ok(Expr::Intersection(Box::new(first), operands))
    }

    fn unary(&mut self) -> Result<Expr, EvaluationError> {
        if self.eat(&Token::Minus)? {
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Negate(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvaluationError> {
        let Some((position, token)) = self.next()? else {
            return Err(EvaluationError::Syntax {
                position: self.end,
                reason: "unexpected end of input".into(),
            });
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Ident(name) => ServiceId::from_name(&name)
                .map(|id| Expr::Literal(Value::Service(id)))
                .ok_or(EvaluationError::UnknownSymbol { name }),
            Token::LParen => {
                self.descend()?;
                let inner = self.or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::LBracket => self.list(Token::RBracket),
            Token::LBrace => self.list(Token::RBrace),
            other => Err(EvaluationError::Syntax {
                position,
                reason: format!("unexpected {other:?}"),
            }),
        }
    }

    fn list(&mut self, close: Token) -> Result<Expr, EvaluationError> {
        self.descend()?;
        let mut items = Vec::new();
        loop {
            if self.eat(&close)? {
                break;
            }
            items.push(self.or()?);
            if !self.eat(&Token::Comma)? {
                self.expect(close)?;
                break;
            }
        }
        self.depth -= 1;
        Ok(Expr::List(items))
    }
}

fn collapse(mut operands: Vec<Expr>, build: fn(Vec<Expr>) -> Expr) -> Expr {
    match operands.len() {
        1 => operands.remove(0),
        _ => build(operands),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_service_names_while_parsing() {
        let expr = Parser::new("TesterPresent").parse().unwrap();
        assert_eq!(expr, Expr::Literal(Value::Service(ServiceId::TESTER_PRESENT)));
    }

    #[test]
    fn call_syntax_fails_on_the_unknown_name() {
        let err = Parser::new("os.system('x')").parse().unwrap_err();
        assert_eq!(err, EvaluationError::UnknownSymbol { name: "os".into() });
    }

    #[test]
    fn attribute_access_on_known_name_is_a_syntax_error() {
        let err = Parser::new("EcuReset.__class__").parse().unwrap_err();
        assert!(matches!(err, EvaluationError::Syntax { position: 8, .. }));
    }

    #[test]
    fn not_in_is_a_single_operator() {
        let expr = Parser::new("1 not in [2]").parse().unwrap();
        let Expr::Compare(_, rest) = expr else {
            panic!("expected comparison");
        };
        assert_eq!(rest[0].0, CompareOp::NotIn);
    }

    #[test]
    fn trailing_comma_in_list_is_allowed() {
        let expr = Parser::new("[EcuReset,]").parse().unwrap();
        assert_eq!(
            expr,
            Expr::List(vec![Expr::Literal(Value::Service(ServiceId::ECU_RESET))])
        );
    }

    #[test]
    fn nesting_is_bounded() {
        let source = format!("{}1{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert_eq!(
            Parser::new(&source).parse().unwrap_err(),
            EvaluationError::TooDeep { limit: MAX_DEPTH }
        );
    }

    #[test]
    fn operator_chains_stay_flat() {
        let expr = Parser::new("1 | 2 | 3 and True and False").parse().unwrap();
        let Expr::And(operands) = expr else {
            panic!("expected conjunction");
        };
        assert_eq!(operands.len(), 3);
        let Expr::Union(first, rest) = &operands[0] else {
            panic!("expected union");
        };
        assert_eq!(**first, Expr::Literal(Value::Int(1)));
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn token_count_is_bounded() {
        let source = format!("{}1", "1|".repeat(100_000));
        assert_eq!(
            Parser::new(&source).parse().unwrap_err(),
            EvaluationError::TooLong { limit: MAX_TOKENS }
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            Parser::new("   ").parse(),
            Err(EvaluationError::Syntax { .. })
        ));
    }
}
