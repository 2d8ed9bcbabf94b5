//! Precedence-climbing parser for the expression language.
//!
//! Grammar, loosest to tightest:
//!   expr    := term (('+' | '-') term)*
//!   term    := power (('*' | '/' | '%') power)*
//!   power   := unary ('**' power)?          -- right associative
//!   unary   := '-' unary | primary
//!   primary := number | '(' expr ')' | func '(' args ')' | reference
//!
//! References are `ind.<id>.<field>`, `prev.<id>.<field>`, `var.<name>`,
//! `trade.<field>`, `risk.<field>`, or `_price`.

use super::ast::{BinOp, Expr, Func, Ref, RiskField, TradeField};
use super::error::ParseError;
use super::token::{tokenize, Spanned, Token};

/// Parse an expression string into an AST.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_expr()?;
    if let Some(spanned) = parser.peek() {
        return Err(ParseError {
            message: format!("unexpected trailing token {:?}", spanned.token),
            position: spanned.pos,
        });
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    input_len: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Spanned> {
        let spanned = self.tokens.get(self.pos);
        if spanned.is_some() {
            self.pos += 1;
        }
        spanned
    }

    fn here(&self) -> usize {
        self.peek().map(|s| s.pos).unwrap_or(self.input_len)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().map(|s| &s.token) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParseError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(ParseError {
                message: format!("expected {what}"),
                position: self.here(),
            })
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek().map(|s| &s.token) {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_power()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_unary()?;
        if self.eat(&Token::StarStar) {
            // Right associative: 2 ** 3 ** 2 == 2 ** (3 ** 2).
            let exponent = self.parse_power()?;
            return Ok(Expr::Binary(
                BinOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let spanned = self.advance().ok_or_else(|| ParseError {
            message: "unexpected end of expression".to_string(),
            position: self.input_len,
        })?;

        match &spanned.token {
            Token::Num(value) => Ok(Expr::Num(*value)),
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "closing ')'")?;
                Ok(inner)
            }
            Token::Ident(name) => self.parse_ident(name, spanned.pos),
            other => Err(ParseError {
                message: format!("unexpected token {other:?}"),
                position: spanned.pos,
            }),
        }
    }

    /// An identifier starts a function call, a dotted reference, or `_price`.
    fn parse_ident(&mut self, name: &str, pos: usize) -> Result<Expr, ParseError> {
        if self.peek().map(|s| &s.token) == Some(&Token::LParen) {
            return self.parse_call(name, pos);
        }

        match name {
            "_price" => Ok(Expr::Ref(Ref::Price)),
            "ind" | "prev" => {
                let prev = name == "prev";
                let id = self.expect_segment("indicator id")?;
                let field = self.expect_segment("indicator field")?;
                Ok(Expr::Ref(Ref::Indicator { id, field, prev }))
            }
            "var" => {
                let var = self.expect_segment("variable name")?;
                Ok(Expr::Ref(Ref::Var(var)))
            }
            "trade" => {
                let field = self.expect_segment("trade field")?;
                let slot = match field.as_str() {
                    "entry_price" => TradeField::EntryPrice,
                    "lot" => TradeField::Lot,
                    "sl" => TradeField::Sl,
                    "tp" => TradeField::Tp,
                    "direction" => TradeField::Direction,
                    "profit_points" => TradeField::ProfitPoints,
                    other => {
                        return Err(ParseError {
                            message: format!("unknown trade field '{other}'"),
                            position: pos,
                        });
                    }
                };
                Ok(Expr::Ref(Ref::Trade(slot)))
            }
            "risk" => {
                let field = self.expect_segment("risk field")?;
                let slot = match field.as_str() {
                    "max_lot" => RiskField::MaxLot,
                    "max_daily_trades" => RiskField::MaxDailyTrades,
                    "max_drawdown_pct" => RiskField::MaxDrawdownPct,
                    "max_concurrent_positions" => RiskField::MaxConcurrentPositions,
                    other => {
                        return Err(ParseError {
                            message: format!("unknown risk field '{other}'"),
                            position: pos,
                        });
                    }
                };
                Ok(Expr::Ref(Ref::Risk(slot)))
            }
            other => Err(ParseError {
                message: format!(
                    "unknown identifier '{other}' (expected ind, prev, var, trade, risk, \
                     _price, or a function)"
                ),
                position: pos,
            }),
        }
    }

    fn parse_call(&mut self, name: &str, pos: usize) -> Result<Expr, ParseError> {
        let func = Func::from_name(name).ok_or_else(|| ParseError {
            message: format!("unknown function '{name}'"),
            position: pos,
        })?;

        self.expect(Token::LParen, "'(' after function name")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen, "closing ')' in function call")?;
                break;
            }
        }

        if args.len() != func.arity() {
            return Err(ParseError {
                message: format!(
                    "{} takes {} argument(s), got {}",
                    func.name(),
                    func.arity(),
                    args.len()
                ),
                position: pos,
            });
        }
        Ok(Expr::Call(func, args))
    }

    /// Consume `.` followed by an identifier segment.
    fn expect_segment(&mut self, what: &str) -> Result<String, ParseError> {
        self.expect(Token::Dot, &format!("'.' before {what}"))?;
        match self.advance() {
            Some(Spanned {
                token: Token::Ident(segment),
                ..
            }) => Ok(segment.clone()),
            other => Err(ParseError {
                message: format!("expected {what}"),
                position: other.map(|s| s.pos).unwrap_or(self.input_len),
            }),
        }
    }
}
