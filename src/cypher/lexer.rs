//! Tokenizer for the read-only query subset evaluated in process.

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Identifier or keyword as written, string contents unescaped,
    /// parameter name without `$`.
    pub text: String,
}

/// Byte offsets into the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Read clauses
    Match, Optional, Where, Return, With, Unwind,
    Order, By, Skip, Limit, Asc, Desc, Distinct,
    // Write clauses, recognised only to be refused
    Create, Merge, Delete, Detach, Set, Remove, Call,
    // Expression keywords
    And, Or, Not, Xor, Is, Null, True, False, In, As,
    Case, When, Then, Else, End,
    Starts, Ends, Contains,

    Integer, Float, StringLiteral,
    Identifier, Parameter,

    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, DotDot, Comma, Colon, Semicolon, Pipe, Star,
    Arrow,      // ->
    LeftArrow,  // <-
    Dash,       // -

    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Slash, Percent, Caret,

    Eof,
}

impl TokenKind {
    pub fn is_write_clause(self) -> bool {
        matches!(
            self,
            TokenKind::Create
                | TokenKind::Merge
                | TokenKind::Delete
                | TokenKind::Detach
                | TokenKind::Set
                | TokenKind::Remove
                | TokenKind::Call
        )
    }

    /// Keywords may still name properties and map keys (`n.end`, `{limit: 1}`).
    pub fn is_word(self) -> bool {
        !matches!(
            self,
            TokenKind::Integer
                | TokenKind::Float
                | TokenKind::StringLiteral
                | TokenKind::Parameter
                | TokenKind::LParen
                | TokenKind::RParen
                | TokenKind::LBracket
                | TokenKind::RBracket
                | TokenKind::LBrace
                | TokenKind::RBrace
                | TokenKind::Dot
                | TokenKind::DotDot
                | TokenKind::Comma
                | TokenKind::Colon
                | TokenKind::Semicolon
                | TokenKind::Pipe
                | TokenKind::Star
                | TokenKind::Arrow
                | TokenKind::LeftArrow
                | TokenKind::Dash
                | TokenKind::Eq
                | TokenKind::Neq
                | TokenKind::Lt
                | TokenKind::Lte
                | TokenKind::Gt
                | TokenKind::Gte
                | TokenKind::Plus
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::Caret
                | TokenKind::Eof
        )
    }
}

fn syntax(position: usize, message: impl Into<String>) -> Error {
    Error::SyntaxError { position, message: message.into() }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        let next = chars.clone().nth(1).map(|(_, c)| c);
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }

            '/' if next == Some('*') => {
                chars.next();
                chars.next();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == '*' && matches!(chars.peek(), Some(&(_, '/'))) {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(syntax(pos, "unterminated block comment"));
                }
            }

            '/' if next == Some('/') => {
                while chars.peek().is_some_and(|&(_, c)| c != '\n') {
                    chars.next();
                }
            }

            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, c)) => text.push(c),
                            None => return Err(syntax(pos, "unterminated string literal")),
                        },
                        Some((end, c)) if c == ch => {
                            tokens.push(Token { kind: TokenKind::StringLiteral, span: Span { start: pos, end: end + 1 }, text });
                            break;
                        }
                        Some((_, c)) => text.push(c),
                        None => return Err(syntax(pos, "unterminated string literal")),
                    }
                }
            }

            '`' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((end, '`')) => {
                            tokens.push(Token { kind: TokenKind::Identifier, span: Span { start: pos, end: end + 1 }, text });
                            break;
                        }
                        Some((_, c)) => text.push(c),
                        None => return Err(syntax(pos, "unterminated quoted name")),
                    }
                }
            }

            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut float = false;
                while let Some(&(_, c)) = chars.peek() {
                    let after = chars.clone().nth(1).map(|(_, c)| c);
                    if c.is_ascii_digit() {
                        text.push(c);
                    } else if c == '.' && !float && after.is_some_and(|a| a.is_ascii_digit()) {
                        float = true;
                        text.push(c);
                    } else {
                        break;
                    }
                    chars.next();
                }
                let kind = if float { TokenKind::Float } else { TokenKind::Integer };
                tokens.push(Token { kind, span: Span { start: pos, end: pos + text.len() }, text });
            }

            '$' => {
                chars.next();
                let name = take_word(&mut chars);
                if name.is_empty() {
                    return Err(syntax(pos, "expected a parameter name after '$'"));
                }
                tokens.push(Token { kind: TokenKind::Parameter, span: Span { start: pos, end: pos + name.len() + 1 }, text: name });
            }

            c if c.is_alphabetic() || c == '_' => {
                let word = take_word(&mut chars);
                tokens.push(Token { kind: keyword(&word), span: Span { start: pos, end: pos + word.len() }, text: word });
            }

            _ => {
                let (kind, width) = match (ch, next) {
                    ('.', Some('.')) => (TokenKind::DotDot, 2),
                    ('-', Some('>')) => (TokenKind::Arrow, 2),
                    ('<', Some('-')) => (TokenKind::LeftArrow, 2),
                    ('<', Some('>')) => (TokenKind::Neq, 2),
                    ('!', Some('=')) => (TokenKind::Neq, 2),
                    ('<', Some('=')) => (TokenKind::Lte, 2),
                    ('>', Some('=')) => (TokenKind::Gte, 2),
                    ('(', _) => (TokenKind::LParen, 1),
                    (')', _) => (TokenKind::RParen, 1),
                    ('[', _) => (TokenKind::LBracket, 1),
                    (']', _) => (TokenKind::RBracket, 1),
                    ('{', _) => (TokenKind::LBrace, 1),
                    ('}', _) => (TokenKind::RBrace, 1),
                    ('.', _) => (TokenKind::Dot, 1),
                    (',', _) => (TokenKind::Comma, 1),
                    (':', _) => (TokenKind::Colon, 1),
                    (';', _) => (TokenKind::Semicolon, 1),
                    ('|', _) => (TokenKind::Pipe, 1),
                    ('*', _) => (TokenKind::Star, 1),
                    ('-', _) => (TokenKind::Dash, 1),
                    ('=', _) => (TokenKind::Eq, 1),
                    ('<', _) => (TokenKind::Lt, 1),
                    ('>', _) => (TokenKind::Gt, 1),
                    ('+', _) => (TokenKind::Plus, 1),
                    ('/', _) => (TokenKind::Slash, 1),
                    ('%', _) => (TokenKind::Percent, 1),
                    ('^', _) => (TokenKind::Caret, 1),
                    (other, _) => return Err(syntax(pos, format!("unexpected character '{other}'"))),
                };
                for _ in 0..width {
                    chars.next();
                }
                tokens.push(Token { kind, span: Span { start: pos, end: pos + width }, text: input[pos..pos + width].to_owned() });
            }
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, span: Span { start: input.len(), end: input.len() }, text: String::new() });
    Ok(tokens)
}

fn take_word(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
    let mut word = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

fn keyword(word: &str) -> TokenKind {
    match word.to_ascii_uppercase().as_str() {
        "MATCH" => TokenKind::Match,
        "OPTIONAL" => TokenKind::Optional,
        "WHERE" => TokenKind::Where,
        "RETURN" => TokenKind::Return,
        "WITH" => TokenKind::With,
        "UNWIND" => TokenKind::Unwind,
        "ORDER" => TokenKind::Order,
        "BY" => TokenKind::By,
        "SKIP" => TokenKind::Skip,
        "LIMIT" => TokenKind::Limit,
        "ASC" | "ASCENDING" => TokenKind::Asc,
        "DESC" | "DESCENDING" => TokenKind::Desc,
        "DISTINCT" => TokenKind::Distinct,
        "CREATE" => TokenKind::Create,
        "MERGE" => TokenKind::Merge,
        "DELETE" => TokenKind::Delete,
        "DETACH" => TokenKind::Detach,
        "SET" => TokenKind::Set,
        "REMOVE" => TokenKind::Remove,
        "CALL" => TokenKind::Call,
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "XOR" => TokenKind::Xor,
        "IS" => TokenKind::Is,
        "NULL" => TokenKind::Null,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        "IN" => TokenKind::In,
        "AS" => TokenKind::As,
        "CASE" => TokenKind::Case,
        "WHEN" => TokenKind::When,
        "THEN" => TokenKind::Then,
        "ELSE" => TokenKind::Else,
        "END" => TokenKind::End,
        "STARTS" => TokenKind::Starts,
        "ENDS" => TokenKind::Ends,
        "CONTAINS" => TokenKind::Contains,
        _ => TokenKind::Identifier,
    }
}
