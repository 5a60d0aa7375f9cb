/// GQL subset used by the in-memory backend
///
/// Supports:
/// - `SELECT * FROM <kind>` with plain or backtick-quoted kinds
/// - `WHERE` conditions joined by `AND`: `prop op operand`,
///   `__key__ op @key` and `__key__ HAS ANCESTOR @key`
/// - `ORDER BY prop [ASC|DESC], ...`
/// - `LIMIT` and `OFFSET` with literal integers or `@bindings`
///
/// Operands are `@name` bindings or string, integer, float, boolean and
/// NULL literals.
///
/// ```ignore
/// let statement = GqlParser::parse("SELECT * FROM `Book` WHERE author = @a LIMIT 10")?;
/// ```

use crate::backend::{BackendResult, Binding, StoredEntity};
use crate::{BackendError, Cursor, Key, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Reserved property name addressing the entity key
pub const KEY_PROPERTY: &str = "__key__";

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl CompareOp {
    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Equal => ordering == Ordering::Equal,
            CompareOp::NotEqual => ordering != Ordering::Equal,
            CompareOp::LessThan => ordering == Ordering::Less,
            CompareOp::LessThanOrEqual => ordering != Ordering::Greater,
            CompareOp::GreaterThan => ordering == Ordering::Greater,
            CompareOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

/// Right-hand side of a condition or a LIMIT/OFFSET argument
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Binding(String),
    Literal(Value),
}

/// WHERE condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        property: String,
        op: CompareOp,
        operand: Operand,
    },
    HasAncestor(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub property: String,
    pub descending: bool,
}

/// Parsed SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct GqlStatement {
    pub kind: String,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<Operand>,
    pub offset: Option<Operand>,
}

/// Token for lexer
#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Keywords
    Select,
    From,
    Where,
    And,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Offset,
    Has,
    Ancestor,
    True,
    False,
    Null,

    // Operators
    Star,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Comma,

    // Identifiers and literals
    Identifier(String),
    Binding(String),
    StringLit(String),
    IntegerLit(i64),
    FloatLit(f64),

    Eof,
}

/// Simple lexer
struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos + 1).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.pos].iter().collect()
    }

    fn read_quoted(&mut self, quote: char) -> BackendResult<String> {
        self.advance();
        let mut out = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(BackendError::invalid_argument(format!(
                        "Unterminated {} quoted text",
                        quote
                    )))
                }
                Some(ch) if ch == quote => {
                    self.advance();
                    // doubled quote is an escaped quote
                    if self.current() == Some(quote) {
                        out.push(quote);
                        self.advance();
                    } else {
                        return Ok(out);
                    }
                }
                Some('\\') => {
                    self.advance();
                    if let Some(escaped) = self.current() {
                        out.push(escaped);
                        self.advance();
                    }
                }
                Some(ch) => {
                    out.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> BackendResult<Token> {
        let start = self.pos;
        if self.current() == Some('-') {
            self.advance();
        }
        let mut is_float = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' || ch == 'e' || ch == 'E' {
                is_float = true;
                self.advance();
            } else {
                break;
            }
        }
        let text: String = self.input[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(Token::FloatLit)
                .map_err(|_| BackendError::invalid_argument(format!("Invalid number: {}", text)))
        } else {
            text.parse::<i64>()
                .map(Token::IntegerLit)
                .map_err(|_| BackendError::invalid_argument(format!("Invalid integer: {}", text)))
        }
    }

    fn next_token(&mut self) -> BackendResult<Token> {
        self.skip_whitespace();

        match self.current() {
            None => Ok(Token::Eof),
            Some('*') => {
                self.advance();
                Ok(Token::Star)
            }
            Some(',') => {
                self.advance();
                Ok(Token::Comma)
            }
            Some('=') => {
                self.advance();
                Ok(Token::Equal)
            }
            Some('!') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::NotEqual)
                } else {
                    Err(BackendError::invalid_argument("Expected '=' after '!'"))
                }
            }
            Some('<') => {
                self.advance();
                if self.current() == Some('>') {
                    self.advance();
                    Ok(Token::NotEqual)
                } else if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::LessThanOrEqual)
                } else {
                    Ok(Token::LessThan)
                }
            }
            Some('>') => {
                self.advance();
                if self.current() == Some('=') {
                    self.advance();
                    Ok(Token::GreaterThanOrEqual)
                } else {
                    Ok(Token::GreaterThan)
                }
            }
            Some('@') => {
                self.advance();
                let name = self.read_identifier();
                if name.is_empty() {
                    return Err(BackendError::invalid_argument("Empty binding name after '@'"));
                }
                Ok(Token::Binding(name))
            }
            Some('`') => self.read_quoted('`').map(Token::Identifier),
            Some(quote @ ('\'' | '"')) => self.read_quoted(quote).map(Token::StringLit),
            Some(ch) if ch.is_ascii_digit() => self.read_number(),
            Some('-') if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();
                match ident.to_uppercase().as_str() {
                    "SELECT" => Ok(Token::Select),
                    "FROM" => Ok(Token::From),
                    "WHERE" => Ok(Token::Where),
                    "AND" => Ok(Token::And),
                    "ORDER" => Ok(Token::Order),
                    "BY" => Ok(Token::By),
                    "ASC" => Ok(Token::Asc),
                    "DESC" => Ok(Token::Desc),
                    "LIMIT" => Ok(Token::Limit),
                    "OFFSET" => Ok(Token::Offset),
                    "HAS" => Ok(Token::Has),
                    "ANCESTOR" => Ok(Token::Ancestor),
                    "TRUE" => Ok(Token::True),
                    "FALSE" => Ok(Token::False),
                    "NULL" => Ok(Token::Null),
                    _ => Ok(Token::Identifier(ident)),
                }
            }
            Some(ch) => Err(BackendError::invalid_argument(format!(
                "Unexpected character in GQL: {}",
                ch
            ))),
        }
    }
}

/// GQL statement parser
pub struct GqlParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl GqlParser {
    /// Parse a GQL string into a statement
    pub fn parse(input: &str) -> BackendResult<GqlStatement> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();

        loop {
            let token = lexer.next_token()?;
            let is_eof = token == Token::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        let mut parser = Self { tokens, pos: 0 };
        parser.parse_select()
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn expect(&mut self, expected: Token) -> BackendResult<()> {
        if self.current() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(BackendError::invalid_argument(format!(
                "Expected {:?}, got {:?}",
                expected,
                self.current()
            )))
        }
    }

    fn expect_identifier(&mut self) -> BackendResult<String> {
        match self.current().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(BackendError::invalid_argument(format!(
                "Expected identifier, got {:?}",
                other
            ))),
        }
    }

    fn parse_select(&mut self) -> BackendResult<GqlStatement> {
        self.expect(Token::Select)?;
        self.expect(Token::Star)?;
        self.expect(Token::From)?;
        let kind = self.expect_identifier()?;

        let mut statement = GqlStatement {
            kind,
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        };

        if self.current() == &Token::Where {
            self.advance();
            statement.conditions.push(self.parse_condition()?);
            while self.current() == &Token::And {
                self.advance();
                statement.conditions.push(self.parse_condition()?);
            }
        }

        if self.current() == &Token::Order {
            self.advance();
            self.expect(Token::By)?;
            statement.order_by.push(self.parse_order()?);
            while self.current() == &Token::Comma {
                self.advance();
                statement.order_by.push(self.parse_order()?);
            }
        }

        if self.current() == &Token::Limit {
            self.advance();
            statement.limit = Some(self.parse_operand()?);
        }

        if self.current() == &Token::Offset {
            self.advance();
            statement.offset = Some(self.parse_operand()?);
        }

        match self.current() {
            Token::Eof => Ok(statement),
            other => Err(BackendError::invalid_argument(format!(
                "Unexpected trailing token: {:?}",
                other
            ))),
        }
    }

    fn parse_condition(&mut self) -> BackendResult<Condition> {
        let property = self.expect_identifier()?;

        if self.current() == &Token::Has {
            if property != KEY_PROPERTY {
                return Err(BackendError::invalid_argument(format!(
                    "HAS ANCESTOR requires {}, got {}",
                    KEY_PROPERTY, property
                )));
            }
            self.advance();
            self.expect(Token::Ancestor)?;
            return Ok(Condition::HasAncestor(self.parse_operand()?));
        }

        let op = match self.current() {
            Token::Equal => CompareOp::Equal,
            Token::NotEqual => CompareOp::NotEqual,
            Token::LessThan => CompareOp::LessThan,
            Token::LessThanOrEqual => CompareOp::LessThanOrEqual,
            Token::GreaterThan => CompareOp::GreaterThan,
            Token::GreaterThanOrEqual => CompareOp::GreaterThanOrEqual,
            other => {
                return Err(BackendError::invalid_argument(format!(
                    "Expected comparison operator, got {:?}",
                    other
                )))
            }
        };
        self.advance();

        Ok(Condition::Compare {
            property,
            op,
            operand: self.parse_operand()?,
        })
    }

    fn parse_order(&mut self) -> BackendResult<OrderBy> {
        let property = self.expect_identifier()?;
        let descending = match self.current() {
            Token::Asc => {
                self.advance();
                false
            }
            Token::Desc => {
                self.advance();
                true
            }
            _ => false,
        };
        Ok(OrderBy {
            property,
            descending,
        })
    }

    fn parse_operand(&mut self) -> BackendResult<Operand> {
        let operand = match self.current().clone() {
            Token::Binding(name) => Operand::Binding(name),
            Token::StringLit(s) => Operand::Literal(Value::String(s)),
            Token::IntegerLit(i) => Operand::Literal(Value::Integer(i)),
            Token::FloatLit(f) => Operand::Literal(Value::Float(f)),
            Token::True => Operand::Literal(Value::Boolean(true)),
            Token::False => Operand::Literal(Value::Boolean(false)),
            Token::Null => Operand::Literal(Value::Null),
            other => {
                return Err(BackendError::invalid_argument(format!(
                    "Expected binding or literal, got {:?}",
                    other
                )))
            }
        };
        self.advance();
        Ok(operand)
    }
}

/// Where a result window starts
#[derive(Debug, Clone, PartialEq)]
pub enum Start {
    Beginning,
    Offset(usize),
    Cursor(Cursor),
}

/// Evaluates a parsed statement against stored entities
pub struct GqlEvaluator<'a> {
    statement: &'a GqlStatement,
    bindings: &'a BTreeMap<String, Binding>,
    allow_literals: bool,
}

impl<'a> GqlEvaluator<'a> {
    pub fn new(
        statement: &'a GqlStatement,
        bindings: &'a BTreeMap<String, Binding>,
        allow_literals: bool,
    ) -> Self {
        Self {
            statement,
            bindings,
            allow_literals,
        }
    }

    /// Filter and order `candidates` (all of the statement's Kind)
    pub fn filter_and_sort(&self, candidates: Vec<StoredEntity>) -> BackendResult<Vec<StoredEntity>> {
        let mut resolved = Vec::with_capacity(self.statement.conditions.len());
        for condition in &self.statement.conditions {
            resolved.push(self.resolve_condition(condition)?);
        }

        let mut rows: Vec<StoredEntity> = candidates
            .into_iter()
            .filter(|entity| entity.key.kind() == self.statement.kind)
            .filter(|entity| resolved.iter().all(|c| c.matches(entity)))
            .collect();

        let order = &self.statement.order_by;
        rows.sort_by(|a, b| {
            for clause in order {
                let ordering = compare_property(a, b, &clause.property);
                let ordering = if clause.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.key.cmp(&b.key)
        });

        Ok(rows)
    }

    /// Resolved LIMIT, if any
    pub fn limit(&self) -> BackendResult<Option<usize>> {
        match &self.statement.limit {
            None => Ok(None),
            Some(operand) => match self.resolve_operand(operand)? {
                Binding::Value(Value::Integer(n)) if n >= 0 => Ok(Some(n as usize)),
                other => Err(BackendError::invalid_argument(format!(
                    "LIMIT must be a non-negative integer, got {:?}",
                    other
                ))),
            },
        }
    }

    /// Resolved OFFSET: an integer count or a start cursor
    pub fn start(&self) -> BackendResult<Start> {
        match &self.statement.offset {
            None => Ok(Start::Beginning),
            Some(operand) => match self.resolve_operand(operand)? {
                Binding::Value(Value::Integer(n)) if n >= 0 => Ok(Start::Offset(n as usize)),
                Binding::Cursor(cursor) => Ok(Start::Cursor(cursor)),
                other => Err(BackendError::invalid_argument(format!(
                    "OFFSET must be a non-negative integer or a cursor, got {:?}",
                    other
                ))),
            },
        }
    }

    fn resolve_operand(&self, operand: &Operand) -> BackendResult<Binding> {
        match operand {
            Operand::Binding(name) => self.bindings.get(name).cloned().ok_or_else(|| {
                BackendError::invalid_argument(format!("Unbound parameter: @{}", name))
            }),
            Operand::Literal(value) => {
                if !self.allow_literals {
                    return Err(BackendError::invalid_argument(
                        "Literal values are not allowed in this query",
                    ));
                }
                Ok(Binding::Value(value.clone()))
            }
        }
    }

    fn resolve_value(&self, operand: &Operand) -> BackendResult<Value> {
        match self.resolve_operand(operand)? {
            Binding::Value(value) => Ok(value),
            Binding::Cursor(_) => Err(BackendError::invalid_argument(
                "A cursor can only be bound to OFFSET",
            )),
        }
    }

    fn resolve_condition(&self, condition: &Condition) -> BackendResult<ResolvedCondition> {
        match condition {
            Condition::HasAncestor(operand) => match self.resolve_value(operand)? {
                Value::Key(key) => Ok(ResolvedCondition::HasAncestor(key)),
                other => Err(BackendError::invalid_argument(format!(
                    "HAS ANCESTOR requires a key, got {}",
                    other.type_name()
                ))),
            },
            Condition::Compare {
                property,
                op,
                operand,
            } => {
                let value = self.resolve_value(operand)?;
                if property == KEY_PROPERTY && !matches!(value, Value::Key(_)) {
                    return Err(BackendError::invalid_argument(format!(
                        "{} can only be compared with a key",
                        KEY_PROPERTY
                    )));
                }
                Ok(ResolvedCondition::Compare {
                    property: property.clone(),
                    op: *op,
                    value,
                })
            }
        }
    }
}

enum ResolvedCondition {
    Compare {
        property: String,
        op: CompareOp,
        value: Value,
    },
    HasAncestor(Key),
}

impl ResolvedCondition {
    fn matches(&self, entity: &StoredEntity) -> bool {
        match self {
            ResolvedCondition::HasAncestor(ancestor) => entity.key.has_ancestor(ancestor),
            ResolvedCondition::Compare {
                property,
                op,
                value,
            } => {
                if property == KEY_PROPERTY {
                    return op.accepts(compare_key(&entity.key, value));
                }
                match entity.properties.get(property) {
                    None => false,
                    // list properties match if any element does
                    Some(Value::List(items)) => {
                        items.iter().any(|item| op.accepts(item.compare(value)))
                    }
                    Some(stored) => op.accepts(stored.compare(value)),
                }
            }
        }
    }
}

fn compare_property(a: &StoredEntity, b: &StoredEntity, property: &str) -> Ordering {
    if property == KEY_PROPERTY {
        return a.key.cmp(&b.key);
    }
    match (a.properties.get(property), b.properties.get(property)) {
        (Some(x), Some(y)) => x.compare(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_key(key: &Key, value: &Value) -> Ordering {
    match value {
        Value::Key(other) => key.cmp(other),
        _ => Ordering::Greater,
    }
}
