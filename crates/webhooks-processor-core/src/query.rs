//! # Event Query Language
//!
//! Selects the security events a webhook forwards.
//!
//! ```text
//! query   := or
//! or      := and ("OR" and)*
//! and     := unary ("AND" unary)*
//! unary   := "NOT" unary | primary
//! primary := "(" query ")" | term
//! term    := field op value
//! op      := "=" | "!=" | "<" | "<=" | ">" | ">="
//! value   := word | number | "quoted string"
//! ```
//!
//! Keywords are case-insensitive. A parsed [`Query`] is checked against an
//! [`EventSchema`] before a webhook is started, and evaluated against events
//! with [`Query::matches`].
//!
//! ```rust
//! use webhooks_processor_core::query::{Query, SecurityEventSchema};
//!
//! let query = Query::parse("type = runtime_security AND severity >= 50").unwrap();
//! assert!(query.validate(&SecurityEventSchema).is_ok());
//! ```

use crate::event::{FieldValue, SecurityEvent};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while parsing or validating a query
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("empty query")]
    Empty,

    #[error("unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("unexpected end of query")]
    UnexpectedEnd,

    #[error("unterminated string starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("invalid character '{character}' at position {position}")]
    InvalidCharacter { character: char, position: usize },

    #[error("unknown field: {field}")]
    UnknownField { field: String },

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("operator '{operator}' is not supported for {field}")]
    UnsupportedOperator { field: String, operator: Operator },
}

// ============================================================================
// Syntax Tree
// ============================================================================

/// Comparison operator of a term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::NotEq => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// Single `field op value` comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Term(Term),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// Parsed event query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    source: String,
    expr: Expr,
}

impl Query {
    /// Parse a query string
    pub fn parse(source: &str) -> Result<Self, QueryError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(QueryError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(token.unexpected());
        }

        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// The query as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// All terms of the query, left to right
    pub fn terms(&self) -> Vec<&Term> {
        let mut terms = Vec::new();
        collect_terms(&self.expr, &mut terms);
        terms
    }

    /// Check every term against the event schema
    pub fn validate(&self, schema: &dyn EventSchema) -> Result<(), QueryError> {
        for term in self.terms() {
            let kind = schema
                .field_kind(&term.field)
                .ok_or_else(|| QueryError::UnknownField {
                    field: term.field.clone(),
                })?;
            kind.check(term)?;
        }
        Ok(())
    }

    /// Evaluate the query against an event
    pub fn matches(&self, event: &SecurityEvent) -> bool {
        evaluate(&self.expr, event)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_terms<'a>(expr: &'a Expr, terms: &mut Vec<&'a Term>) {
    match expr {
        Expr::Term(term) => terms.push(term),
        Expr::Not(inner) => collect_terms(inner, terms),
        Expr::And(left, right) | Expr::Or(left, right) => {
            collect_terms(left, terms);
            collect_terms(right, terms);
        }
    }
}

fn evaluate(expr: &Expr, event: &SecurityEvent) -> bool {
    match expr {
        Expr::Term(term) => evaluate_term(term, event),
        Expr::Not(inner) => !evaluate(inner, event),
        Expr::And(left, right) => evaluate(left, event) && evaluate(right, event),
        Expr::Or(left, right) => evaluate(left, event) || evaluate(right, event),
    }
}

fn evaluate_term(term: &Term, event: &SecurityEvent) -> bool {
    match event.field(&term.field) {
        None => term.operator == Operator::NotEq,
        Some(FieldValue::Text(actual)) => term.operator.accepts(actual.cmp(term.value.as_str())),
        Some(FieldValue::Number(actual)) => match term.value.parse::<i64>() {
            Ok(expected) => term.operator.accepts(actual.cmp(&expected)),
            Err(_) => false,
        },
        Some(FieldValue::List(items)) => {
            let contained = items.iter().any(|item| item == &term.value);
            match term.operator {
                Operator::Eq => contained,
                Operator::NotEq => !contained,
                _ => false,
            }
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Type of a queryable event field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text, equality only
    Text,
    /// Integer, all operators
    Number,
    /// Closed set of values, equality only
    Enum(&'static [&'static str]),
    /// List of strings, membership via `=` / `!=`
    List,
}

impl FieldKind {
    fn check(&self, term: &Term) -> Result<(), QueryError> {
        if term.operator.is_ordering() && *self != Self::Number {
            return Err(QueryError::UnsupportedOperator {
                field: term.field.clone(),
                operator: term.operator,
            });
        }

        let valid = match self {
            Self::Text | Self::List => true,
            Self::Number => term.value.parse::<i64>().is_ok(),
            Self::Enum(values) => values.contains(&term.value.as_str()),
        };

        if valid {
            Ok(())
        } else {
            Err(QueryError::InvalidValue {
                field: term.field.clone(),
                value: term.value.clone(),
            })
        }
    }
}

/// Describes which fields a query may reference
pub trait EventSchema: Send + Sync {
    /// Kind of the named field, `None` when the field does not exist
    fn field_kind(&self, field: &str) -> Option<FieldKind>;
}

/// Security event types known to the event store
pub const SECURITY_EVENT_TYPES: &[&str] = &[
    "alert",
    "anomaly_detection_job",
    "deep_packet_inspection",
    "global_alert",
    "gtf_suspicious_dns_query",
    "gtf_suspicious_flow",
    "honeypod",
    "policy_violation",
    "runtime_security",
    "suspicious_dns_query",
    "suspicious_flow",
    "waf",
];

/// Schema of [`SecurityEvent`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityEventSchema;

impl EventSchema for SecurityEventSchema {
    fn field_kind(&self, field: &str) -> Option<FieldKind> {
        let kind = match field {
            "type" => FieldKind::Enum(SECURITY_EVENT_TYPES),
            "severity" => FieldKind::Number,
            "mitre_ids" | "mitigations" => FieldKind::List,
            "id" | "description" | "origin" | "name" | "host" | "source_ip" | "source_name"
            | "source_namespace" | "dest_ip" | "dest_name" | "dest_namespace"
            | "attack_vector" | "mitre_tactic" => FieldKind::Text,
            _ => return None,
        };
        Some(kind)
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Quoted(String),
    Op(Operator),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

impl Token {
    fn unexpected(&self) -> QueryError {
        QueryError::UnexpectedToken {
            token: self.text.clone(),
            position: self.position,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/' | '*' | '@')
}

fn tokenize(source: &str) -> Result<Vec<Token>, QueryError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (kind, consumed) = match c {
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            '=' => (TokenKind::Op(Operator::Eq), 1),
            '!' | '<' | '>' => {
                let followed_by_eq = chars.get(i + 1).map(|(_, n)| *n) == Some('=');
                match (c, followed_by_eq) {
                    ('!', true) => (TokenKind::Op(Operator::NotEq), 2),
                    ('<', true) => (TokenKind::Op(Operator::Le), 2),
                    ('>', true) => (TokenKind::Op(Operator::Ge), 2),
                    ('<', false) => (TokenKind::Op(Operator::Lt), 1),
                    ('>', false) => (TokenKind::Op(Operator::Gt), 1),
                    _ => return Err(QueryError::InvalidCharacter { character: c, position }),
                }
            }
            '"' | '\'' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(QueryError::UnterminatedString { position }),
                        Some((_, q)) if *q == c => break,
                        Some((_, '\\')) if j + 1 < chars.len() => {
                            value.push(chars[j + 1].1);
                            j += 2;
                        }
                        Some((_, other)) => {
                            value.push(*other);
                            j += 1;
                        }
                    }
                }
                (TokenKind::Quoted(value), j + 1 - i)
            }
            c if is_word_char(c) => {
                let mut j = i;
                while j < chars.len() && is_word_char(chars[j].1) {
                    j += 1;
                }
                let word: String = chars[i..j].iter().map(|(_, ch)| *ch).collect();
                let kind = match word.to_ascii_uppercase().as_str() {
                    "AND" => TokenKind::And,
                    "OR" => TokenKind::Or,
                    "NOT" => TokenKind::Not,
                    _ => TokenKind::Word(word),
                };
                (kind, j - i)
            }
            other => {
                return Err(QueryError::InvalidCharacter {
                    character: other,
                    position,
                })
            }
        };

        let text: String = chars[i..i + consumed].iter().map(|(_, ch)| *ch).collect();
        tokens.push(Token {
            kind,
            text,
            position,
        });
        i += consumed;
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, QueryError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(QueryError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn parse_or(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_unary()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::And)) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, QueryError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Not)) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, QueryError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                let closing = self.next()?;
                if closing.kind != TokenKind::RParen {
                    return Err(closing.unexpected());
                }
                Ok(inner)
            }
            TokenKind::Word(field) => {
                let operator = match self.next()? {
                    Token {
                        kind: TokenKind::Op(op),
                        ..
                    } => op,
                    other => return Err(other.unexpected()),
                };
                let value = match self.next()? {
                    Token {
                        kind: TokenKind::Word(value) | TokenKind::Quoted(value),
                        ..
                    } => value,
                    other => return Err(other.unexpected()),
                };
                Ok(Expr::Term(Term {
                    field,
                    operator,
                    value,
                }))
            }
            _ => Err(token.unexpected()),
        }
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
