//! Recursive descent parser for read-only queries.
//!
//! Supports:
//! - MATCH / OPTIONAL MATCH with node and relationship chains, variable-length hops
//! - WHERE, WITH, UNWIND
//! - RETURN with DISTINCT, aliases, ORDER BY, SKIP, LIMIT
//! - Expressions with the usual precedence, parameters, CASE, function calls
//!
//! Write clauses are refused with [`Error::ReadOnlyQuery`].

use super::ast::*;
use super::lexer::{tokenize, Token, TokenKind};
use crate::model::Value;
use crate::{Error, Result};

/// Parse one read-only query.
pub fn parse_query(source: &str) -> Result<Query> {
    let tokens = tokenize(source)?;
    let mut p = Parser { source, tokens: &tokens, pos: 0 };
    let query = p.query()?;
    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("unexpected '{}' after RETURN", p.peek().text)));
    }
    Ok(query)
}

struct Parser<'t> {
    source: &'t str,
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> &'t Token {
        let tokens = self.tokens;
        &tokens[self.pos.min(tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &'t Token {
        let tok = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&'t Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {kind:?}, found '{}'", self.peek().text)))
        }
    }

    /// Identifier, or a keyword standing in as a name.
    fn name(&mut self) -> Result<String> {
        let tok = self.peek();
        if tok.kind.is_word() && tok.kind != TokenKind::Eof {
            self.advance();
            Ok(tok.text.clone())
        } else {
            Err(self.error(format!("expected a name, found '{}'", tok.text)))
        }
    }

    fn identifier(&mut self) -> Result<String> {
        Ok(self.expect(TokenKind::Identifier)?.text.clone())
    }

    fn error(&self, message: String) -> Error {
        Error::SyntaxError { position: self.peek().span.start, message }
    }

    /// Source text from byte `start` to the end of the last consumed token.
    fn text_since(&self, start: usize) -> String {
        let end = self.tokens[self.pos.saturating_sub(1)].span.end.max(start);
        self.source[start..end].trim().to_owned()
    }

    // ========================================================================
    // Clauses
    // ========================================================================

    fn query(&mut self) -> Result<Query> {
        let mut clauses = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Match | TokenKind::Optional => clauses.push(Clause::Match(self.match_clause()?)),
                TokenKind::Unwind => {
                    self.advance();
                    let expr = self.expr()?;
                    self.expect(TokenKind::As)?;
                    clauses.push(Clause::Unwind { expr, alias: self.identifier()? });
                }
                TokenKind::With => {
                    self.advance();
                    let mut projection = self.projection()?;
                    if self.eat(TokenKind::Where) {
                        projection.filter = Some(self.expr()?);
                    }
                    clauses.push(Clause::With(projection));
                }
                TokenKind::Return => {
                    self.advance();
                    let ret = self.projection()?;
                    return Ok(Query { clauses, ret });
                }
                kind if kind.is_write_clause() => {
                    return Err(Error::ReadOnlyQuery { clause: self.peek().text.to_ascii_uppercase() });
                }
                _ => return Err(self.error(format!("expected a clause, found '{}'", self.peek().text))),
            }
        }
    }

    fn match_clause(&mut self) -> Result<MatchClause> {
        let optional = self.eat(TokenKind::Optional);
        self.expect(TokenKind::Match)?;
        let mut patterns = vec![self.pattern()?];
        while self.eat(TokenKind::Comma) {
            patterns.push(self.pattern()?);
        }
        let filter = if self.eat(TokenKind::Where) { Some(self.expr()?) } else { None };
        Ok(MatchClause { optional, patterns, filter })
    }

    fn projection(&mut self) -> Result<Projection> {
        let mut projection = Projection { distinct: self.eat(TokenKind::Distinct), ..Default::default() };
        if self.eat(TokenKind::Star) {
            projection.star = true;
            if !self.eat(TokenKind::Comma) {
                return self.projection_tail(projection);
            }
        }
        loop {
            let start = self.peek().span.start;
            let expr = self.expr()?;
            let name = if self.eat(TokenKind::As) { self.name()? } else { self.text_since(start) };
            projection.items.push(ProjectionItem { expr, name });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.projection_tail(projection)
    }

    fn projection_tail(&mut self, mut projection: Projection) -> Result<Projection> {
        if self.eat(TokenKind::Order) {
            self.expect(TokenKind::By)?;
            loop {
                let start = self.peek().span.start;
                let expr = self.expr()?;
                let text = self.text_since(start);
                let descending = if self.eat(TokenKind::Desc) {
                    true
                } else {
                    self.eat(TokenKind::Asc);
                    false
                };
                projection.order_by.push(SortItem { expr, text, descending });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        if self.eat(TokenKind::Skip) {
            projection.skip = Some(self.expr()?);
        }
        if self.eat(TokenKind::Limit) {
            projection.limit = Some(self.expr()?);
        }
        Ok(projection)
    }

    // ========================================================================
    // Patterns
    // ========================================================================

    fn pattern(&mut self) -> Result<Pattern> {
        let start = self.node_pattern()?;
        let mut hops = Vec::new();
        while self.at(TokenKind::Dash) || self.at(TokenKind::LeftArrow) {
            let relationship = self.rel_pattern()?;
            hops.push(Hop { relationship, node: self.node_pattern()? });
        }
        Ok(Pattern { start, hops })
    }

    fn node_pattern(&mut self) -> Result<NodePattern> {
        self.expect(TokenKind::LParen)?;
        let mut node = NodePattern::default();
        if self.at(TokenKind::Identifier) {
            node.alias = Some(self.identifier()?);
        }
        while self.eat(TokenKind::Colon) {
            node.labels.push(self.name()?);
        }
        if self.at(TokenKind::LBrace) {
            node.properties = self.map_entries()?;
        }
        self.expect(TokenKind::RParen)?;
        Ok(node)
    }

    fn rel_pattern(&mut self) -> Result<RelPattern> {
        let incoming = self.eat(TokenKind::LeftArrow);
        if !incoming {
            self.expect(TokenKind::Dash)?;
        }
        let mut rel = RelPattern {
            alias: None,
            types: Vec::new(),
            direction: Direction::Either,
            properties: Vec::new(),
            length: None,
        };
        if self.eat(TokenKind::LBracket) {
            if self.at(TokenKind::Identifier) {
                rel.alias = Some(self.identifier()?);
            }
            if self.eat(TokenKind::Colon) {
                rel.types.push(self.name()?);
                while self.eat(TokenKind::Pipe) {
                    self.eat(TokenKind::Colon);
                    rel.types.push(self.name()?);
                }
            }
            if self.eat(TokenKind::Star) {
                rel.length = Some(self.hop_range()?);
            }
            if self.at(TokenKind::LBrace) {
                rel.properties = self.map_entries()?;
            }
            self.expect(TokenKind::RBracket)?;
        }
        let outgoing = if self.eat(TokenKind::Arrow) {
            true
        } else {
            self.expect(TokenKind::Dash)?;
            false
        };
        rel.direction = match (incoming, outgoing) {
            (false, true) => Direction::Outgoing,
            (true, false) => Direction::Incoming,
            _ => Direction::Either,
        };
        Ok(rel)
    }

    /// After `*`: `n`, `min..`, `..max`, `min..max`, or nothing.
    fn hop_range(&mut self) -> Result<HopRange> {
        let min = self.hop_bound()?;
        if self.eat(TokenKind::DotDot) {
            Ok(HopRange { min: min.unwrap_or(1), max: self.hop_bound()? })
        } else {
            match min {
                Some(n) => Ok(HopRange { min: n, max: Some(n) }),
                None => Ok(HopRange { min: 1, max: None }),
            }
        }
    }

    fn hop_bound(&mut self) -> Result<Option<usize>> {
        if !self.at(TokenKind::Integer) {
            return Ok(None);
        }
        let tok = self.advance();
        tok.text
            .parse()
            .map(Some)
            .map_err(|_| Error::SyntaxError { position: tok.span.start, message: "invalid hop count".into() })
    }

    fn map_entries(&mut self) -> Result<Vec<(String, Expr)>> {
        self.expect(TokenKind::LBrace)?;
        let mut entries = Vec::new();
        if !self.at(TokenKind::RBrace) {
            loop {
                let key = self.name()?;
                self.expect(TokenKind::Colon)?;
                entries.push((key, self.expr()?));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(entries)
    }

    // ========================================================================
    // Expressions (precedence climbing)
    // ========================================================================

    fn expr(&mut self) -> Result<Expr> {
        self.binary_level(0)
    }

    /// OR, XOR and AND: left-associative boolean levels.
    fn binary_level(&mut self, level: usize) -> Result<Expr> {
        const LEVELS: [(TokenKind, BinaryOp); 3] =
            [(TokenKind::Or, BinaryOp::Or), (TokenKind::Xor, BinaryOp::Xor), (TokenKind::And, BinaryOp::And)];
        let Some(&(token, op)) = LEVELS.get(level) else { return self.not_expr() };
        let mut left = self.binary_level(level + 1)?;
        while self.eat(token) {
            let right = self.binary_level(level + 1)?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(TokenKind::Not) {
            Ok(Expr::Not(Box::new(self.not_expr()?)))
        } else {
            self.comparison()
        }
    }

    fn comparison(&mut self) -> Result<Expr> {
        let mut left = self.addition()?;
        loop {
            left = match self.peek_kind() {
                TokenKind::Is => {
                    self.advance();
                    let negated = self.eat(TokenKind::Not);
                    self.expect(TokenKind::Null)?;
                    Expr::IsNull { expr: Box::new(left), negated }
                }
                TokenKind::In => {
                    self.advance();
                    Expr::In { expr: Box::new(left), list: Box::new(self.addition()?) }
                }
                TokenKind::Starts | TokenKind::Ends => {
                    let op = if self.advance().kind == TokenKind::Starts { StringOp::StartsWith } else { StringOp::EndsWith };
                    self.expect(TokenKind::With)?;
                    Expr::StringMatch { op, left: Box::new(left), right: Box::new(self.addition()?) }
                }
                TokenKind::Contains => {
                    self.advance();
                    Expr::StringMatch { op: StringOp::Contains, left: Box::new(left), right: Box::new(self.addition()?) }
                }
                kind => {
                    let op = match kind {
                        TokenKind::Eq => BinaryOp::Eq,
                        TokenKind::Neq => BinaryOp::Neq,
                        TokenKind::Lt => BinaryOp::Lt,
                        TokenKind::Lte => BinaryOp::Lte,
                        TokenKind::Gt => BinaryOp::Gt,
                        TokenKind::Gte => BinaryOp::Gte,
                        _ => return Ok(left),
                    };
                    self.advance();
                    Expr::Binary { op, left: Box::new(left), right: Box::new(self.addition()?) }
                }
            };
        }
    }

    fn addition(&mut self) -> Result<Expr> {
        let mut left = self.multiplication()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Dash => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplication()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn multiplication(&mut self) -> Result<Expr> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.power()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn power(&mut self) -> Result<Expr> {
        let left = self.unary()?;
        if self.eat(TokenKind::Caret) {
            let right = self.power()?;
            Ok(Expr::Binary { op: BinaryOp::Pow, left: Box::new(left), right: Box::new(right) })
        } else {
            Ok(left)
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(TokenKind::Dash) {
            Ok(Expr::Negate(Box::new(self.unary()?)))
        } else {
            self.eat(TokenKind::Plus);
            self.postfix()
        }
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(TokenKind::Dot) {
                expr = Expr::Property { expr: Box::new(expr), key: self.name()? };
            } else if self.eat(TokenKind::LBracket) {
                let index = self.expr()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Index { expr: Box::new(expr), index: Box::new(index) };
            } else if self.at(TokenKind::Colon) && matches!(expr, Expr::Variable(_)) {
                let mut labels = Vec::new();
                while self.eat(TokenKind::Colon) {
                    labels.push(self.name()?);
                }
                expr = Expr::HasLabels { expr: Box::new(expr), labels };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        let tok = self.peek();
        let literal = |value: Value| Ok(Expr::Literal(value));
        match tok.kind {
            TokenKind::Integer => {
                self.advance();
                let n = tok.text.parse::<i64>().map_err(|_| self.error(format!("integer '{}' out of range", tok.text)))?;
                literal(Value::Int(n))
            }
            TokenKind::Float => {
                self.advance();
                let f = tok.text.parse::<f64>().map_err(|_| self.error(format!("invalid float '{}'", tok.text)))?;
                literal(Value::Float(f))
            }
            TokenKind::StringLiteral => {
                self.advance();
                literal(Value::String(tok.text.clone()))
            }
            TokenKind::True => {
                self.advance();
                literal(Value::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                literal(Value::Bool(false))
            }
            TokenKind::Null => {
                self.advance();
                literal(Value::Null)
            }
            TokenKind::Parameter => {
                self.advance();
                Ok(Expr::Parameter(tok.text.clone()))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.at(TokenKind::RBracket) {
                    items.push(self.expr()?);
                    while self.eat(TokenKind::Comma) {
                        items.push(self.expr()?);
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => Ok(Expr::Map(self.map_entries()?)),
            TokenKind::Case => self.case_expr(),
            TokenKind::Identifier => {
                self.advance();
                if !self.eat(TokenKind::LParen) {
                    return Ok(Expr::Variable(tok.text.clone()));
                }
                let distinct = self.eat(TokenKind::Distinct);
                let star = self.eat(TokenKind::Star);
                let mut args = Vec::new();
                if !star && !self.at(TokenKind::RParen) {
                    args.push(self.expr()?);
                    while self.eat(TokenKind::Comma) {
                        args.push(self.expr()?);
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Call { name: tok.text.to_ascii_lowercase(), distinct, star, args })
            }
            _ => Err(self.error(format!("unexpected '{}' in expression", tok.text))),
        }
    }

    fn case_expr(&mut self) -> Result<Expr> {
        self.expect(TokenKind::Case)?;
        let operand = if self.at(TokenKind::When) { None } else { Some(Box::new(self.expr()?)) };
        let mut branches = Vec::new();
        while self.eat(TokenKind::When) {
            let when = self.expr()?;
            self.expect(TokenKind::Then)?;
            branches.push((when, self.expr()?));
        }
        if branches.is_empty() {
            return Err(self.error("CASE needs at least one WHEN".into()));
        }
        let otherwise = if self.eat(TokenKind::Else) { Some(Box::new(self.expr()?)) } else { None };
        self.expect(TokenKind::End)?;
        Ok(Expr::Case { operand, branches, otherwise })
    }
}
