/// Datastore backend contract
///
/// The mapper talks to the datastore only through [`Backend`]. Transport,
/// authentication, value wire encoding and retries all live behind it.

use crate::{BackendError, Cursor, Key, TransactionId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Dataset and namespace every request is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId {
    pub dataset_id: String,
    pub namespace: Option<String>,
}

impl PartitionId {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Entity in the backend's native shape: a key plus raw properties
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub key: Key,
    pub properties: BTreeMap<String, Value>,
}

impl StoredEntity {
    pub fn new(key: Key, properties: BTreeMap<String, Value>) -> Self {
        Self { key, properties }
    }
}

/// Commit mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    NonTransactional,
    Transactional,
}

/// Single write inside a commit
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Insert with a backend-allocated numeric id (key must be incomplete)
    InsertAutoId(StoredEntity),
    /// Insert or replace at a complete key
    Upsert(StoredEntity),
    /// Delete by complete key
    Delete(Key),
}

/// Commit request; all mutations apply atomically or not at all
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub partition: PartitionId,
    pub mode: CommitMode,
    pub transaction: Option<TransactionId>,
    pub mutations: Vec<Mutation>,
}

impl CommitRequest {
    /// Mode follows the token: transactional iff one is supplied
    pub fn new(partition: PartitionId, transaction: Option<TransactionId>) -> Self {
        let mode = if transaction.is_some() {
            CommitMode::Transactional
        } else {
            CommitMode::NonTransactional
        };
        Self {
            partition,
            mode,
            transaction,
            mutations: Vec::new(),
        }
    }

    pub fn insert_auto_id(mut self, entity: StoredEntity) -> Self {
        self.mutations.push(Mutation::InsertAutoId(entity));
        self
    }

    pub fn upsert(mut self, entity: StoredEntity) -> Self {
        self.mutations.push(Mutation::Upsert(entity));
        self
    }

    pub fn delete(mut self, key: Key) -> Self {
        self.mutations.push(Mutation::Delete(key));
        self
    }
}

/// Commit response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitResponse {
    /// Number of index rows touched by the commit
    pub index_updates: u32,
    /// Keys allocated for `InsertAutoId` mutations, in mutation order
    pub inserted_keys: Vec<Key>,
}

/// Lookup by key
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub partition: PartitionId,
    pub transaction: Option<TransactionId>,
    pub keys: Vec<Key>,
}

/// Lookup response; keys that do not exist appear in `missing`, not as errors
#[derive(Debug, Clone, Default)]
pub struct LookupResponse {
    pub found: Vec<StoredEntity>,
    pub missing: Vec<Key>,
}

/// Value bound to a named `@placeholder`
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Value(Value),
    Cursor(Cursor),
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

impl From<Cursor> for Binding {
    fn from(cursor: Cursor) -> Self {
        Binding::Cursor(cursor)
    }
}

/// GQL query with named bindings
#[derive(Debug, Clone, PartialEq)]
pub struct GqlQuery {
    pub query_string: String,
    /// Literal values in the query text are allowed
    pub allow_literals: bool,
    pub named_bindings: BTreeMap<String, Binding>,
}

impl GqlQuery {
    pub fn new(query_string: impl Into<String>) -> Self {
        Self {
            query_string: query_string.into(),
            allow_literals: true,
            named_bindings: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named_bindings
            .insert(name.into(), Binding::Value(value.into()));
        self
    }

    pub fn bind_cursor(mut self, name: impl Into<String>, cursor: Cursor) -> Self {
        self.named_bindings.insert(name.into(), Binding::Cursor(cursor));
        self
    }
}

/// Run a GQL query
#[derive(Debug, Clone)]
pub struct RunQueryRequest {
    pub partition: PartitionId,
    pub transaction: Option<TransactionId>,
    pub query: GqlQuery,
}

/// Whether more results may follow the returned batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreResults {
    NotFinished,
    MoreResultsAfterLimit,
    NoMoreResults,
}

/// Query response
#[derive(Debug, Clone)]
pub struct RunQueryResponse {
    pub results: Vec<StoredEntity>,
    /// Position after the last returned result
    pub end_cursor: Option<Cursor>,
    pub more_results: MoreResults,
}

/// The external datastore.
///
/// Every call is a blocking round trip. Implementations own transport,
/// authentication, timeouts and any retry policy.
pub trait Backend: Send + Sync {
    fn commit(&self, request: CommitRequest) -> BackendResult<CommitResponse>;

    fn lookup(&self, request: LookupRequest) -> BackendResult<LookupResponse>;

    fn run_query(&self, request: RunQueryRequest) -> BackendResult<RunQueryResponse>;

    /// `cross_group` lifts the single entity group restriction
    fn begin_transaction(
        &self,
        partition: &PartitionId,
        cross_group: bool,
    ) -> BackendResult<TransactionId>;

    /// Release a token without committing
    fn rollback(&self, transaction: &TransactionId) -> BackendResult<()>;
}
