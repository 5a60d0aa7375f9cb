use crate::{Entity, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Datastore property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    /// Key reference (also the bound form of entity query parameters)
    Key(Key),
    /// Embedded entity
    Entity(Box<Entity>),
    List(Vec<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn list(values: impl IntoIterator<Item = Value>) -> Self {
        Value::List(values.into_iter().collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Value::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Short type name, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Key(_) => "key",
            Value::Entity(_) => "entity",
            Value::List(_) => "list",
        }
    }

    // Datastore cross-type sort order
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::DateTime(_) => 2,
            Value::Boolean(_) => 3,
            Value::String(_) => 4,
            Value::Float(_) => 5,
            Value::Key(_) => 6,
            Value::Entity(_) => 7,
            Value::List(_) => 8,
        }
    }

    /// Total order used when sorting query results.
    ///
    /// Values of different types order by type rank. Entities and lists are
    /// not orderable and compare equal within their rank.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Key(a), Value::Key(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Key> for Value {
    fn from(k: Key) -> Self {
        Value::Key(k)
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Value::Entity(Box::new(e))
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = Error;

    /// JSON objects have no Kind to embed under, so they are rejected.
    fn try_from(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Integer(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| Error::Validation(format!("Unrepresentable number: {}", n))),
            },
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(Value::try_from)
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Object(_) => Err(Error::Validation(
                "JSON objects cannot be converted to a property value".to_string(),
            )),
        }
    }
}

/// Identity of one key path element: numeric id or string name.
///
/// Ids sort before names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    Id(i64),
    Name(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "'{}'", name),
        }
    }
}

/// One (Kind, id-or-name) segment of a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    /// None until the backend allocates an id
    pub id: Option<KeyId>,
}

impl PathElement {
    pub fn new(kind: impl Into<String>, id: Option<KeyId>) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

/// Path-based entity identity.
///
/// The last element is the entity itself; earlier elements are its
/// ancestor chain. Keys order element by element, so a parent sorts
/// directly before its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    path: Vec<PathElement>,
}

impl Key {
    /// Build a key from a full path.
    ///
    /// The path must be non-empty and every ancestor element complete.
    pub fn from_path(path: Vec<PathElement>) -> Result<Self> {
        let Some((_, ancestors)) = path.split_last() else {
            return Err(Error::InvalidKey("Key path must not be empty".to_string()));
        };
        if let Some(incomplete) = ancestors.iter().find(|e| !e.is_complete()) {
            return Err(Error::InvalidKey(format!(
                "Ancestor '{}' in key path has no id or name",
                incomplete.kind
            )));
        }
        if let Some(blank) = path.iter().find(|e| e.kind.is_empty()) {
            return Err(Error::InvalidKey(format!("Empty kind in key path: {:?}", blank)));
        }
        Ok(Self { path })
    }

    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            path: vec![PathElement::new(kind, Some(KeyId::Id(id)))],
        }
    }

    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: vec![PathElement::new(kind, Some(KeyId::Name(name.into())))],
        }
    }

    /// Root key with no id yet (auto-id insert)
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            path: vec![PathElement::new(kind, None)],
        }
    }

    /// Extend this (complete) key with a child element
    pub fn child(&self, kind: impl Into<String>, id: Option<KeyId>) -> Result<Self> {
        if !self.is_complete() {
            return Err(Error::InvalidKey(format!(
                "Cannot use incomplete key {} as a parent",
                self
            )));
        }
        let mut path = self.path.clone();
        path.push(PathElement::new(kind, id));
        Ok(Self { path })
    }

    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    pub fn last(&self) -> &PathElement {
        // from_path and the constructors never build an empty path
        &self.path[self.path.len() - 1]
    }

    pub fn kind(&self) -> &str {
        &self.last().kind
    }

    pub fn id_or_name(&self) -> Option<&KeyId> {
        self.last().id.as_ref()
    }

    pub fn id(&self) -> Option<i64> {
        match self.id_or_name() {
            Some(KeyId::Id(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self.id_or_name() {
            Some(KeyId::Name(name)) => Some(name),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.last().is_complete()
    }

    /// Key of the direct parent, if any
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Root of the entity group this key belongs to
    pub fn root(&self) -> Key {
        Self {
            path: vec![self.path[0].clone()],
        }
    }

    /// True if `ancestor` is a prefix of this key's path (self included)
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.path.starts_with(&ancestor.path)
    }

    /// Replace the last element's identity (used when ids are allocated)
    pub fn complete_with(&self, id: KeyId) -> Key {
        let mut path = self.path.clone();
        if let Some(last) = path.last_mut() {
            last.id = Some(id);
        }
        Self { path }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match &element.id {
                Some(id) => write!(f, "{}({})", element.kind, id)?,
                None => write!(f, "{}(?)", element.kind)?,
            }
        }
        Ok(())
    }
}

/// Opaque backend-issued position in an ordered result set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque transaction token issued by `begin_transaction`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
