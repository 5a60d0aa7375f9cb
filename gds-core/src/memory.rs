/// In-memory Datastore backend for testing and local development
///
/// Implements the full [`Backend`] contract against ordered in-process
/// maps. All data is lost when the last clone is dropped.

use crate::backend::{
    Backend, BackendResult, CommitRequest, CommitResponse, LookupRequest, LookupResponse,
    MoreResults, Mutation, PartitionId, RunQueryRequest, RunQueryResponse, StoredEntity,
};
use crate::gql::{Condition, GqlEvaluator, GqlParser, Start};
use crate::{BackendError, Cursor, Key, KeyId, TransactionId, Value};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Entity groups a cross-group transaction may touch
pub const MAX_CROSS_GROUP_ENTITY_GROUPS: usize = 25;

const CURSOR_PREFIX: &str = "pos:";

type Properties = BTreeMap<String, Value>;

struct TransactionState {
    partition: PartitionId,
    cross_group: bool,
}

/// Inner mutable state
struct MemoryInner {
    partitions: HashMap<PartitionId, BTreeMap<Key, Properties>>,
    /// Next auto-allocated id
    next_id: i64,
    /// Open transactions; removed when consumed by a commit
    transactions: HashMap<TransactionId, TransactionState>,
}

/// In-memory Datastore backend
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner {
                partitions: HashMap::new(),
                next_id: 1,
                transactions: HashMap::new(),
            })),
        }
    }

    /// Number of entities stored in a partition
    pub fn entity_count(&self, partition: &PartitionId) -> usize {
        self.inner
            .read()
            .partitions
            .get(partition)
            .map_or(0, BTreeMap::len)
    }

    /// Number of transactions begun but not yet committed
    pub fn open_transactions(&self) -> usize {
        self.inner.read().transactions.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.partitions.clear();
        inner.transactions.clear();
    }

    /// Encode an absolute result position as an opaque cursor
    pub fn encode_cursor(position: usize) -> Cursor {
        Cursor::new(URL_SAFE_NO_PAD.encode(format!("{}{}", CURSOR_PREFIX, position)))
    }

    /// Decode a cursor produced by [`MemoryBackend::encode_cursor`]
    pub fn decode_cursor(cursor: &Cursor) -> BackendResult<usize> {
        let invalid = || BackendError::invalid_argument(format!("Invalid cursor: {}", cursor));
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor.as_str())
            .map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        text.strip_prefix(CURSOR_PREFIX)
            .and_then(|position| position.parse().ok())
            .ok_or_else(invalid)
    }

    fn check_transaction(
        inner: &MemoryInner,
        transaction: Option<&TransactionId>,
        partition: &PartitionId,
    ) -> BackendResult<()> {
        let Some(tx) = transaction else {
            return Ok(());
        };
        match inner.transactions.get(tx) {
            Some(state) if &state.partition == partition => Ok(()),
            Some(_) => Err(BackendError::invalid_argument(format!(
                "Transaction {} belongs to a different partition",
                tx
            ))),
            None => Err(BackendError::not_found(format!(
                "Transaction {} not found or already committed",
                tx
            ))),
        }
    }

    fn validate_mutation(mutation: &Mutation) -> BackendResult<()> {
        match mutation {
            Mutation::InsertAutoId(entity) if entity.key.is_complete() => Err(
                BackendError::invalid_argument(format!(
                    "insertAutoId requires an incomplete key, got {}",
                    entity.key
                )),
            ),
            Mutation::Upsert(entity) if !entity.key.is_complete() => Err(
                BackendError::invalid_argument(format!(
                    "upsert requires a complete key, got {}",
                    entity.key
                )),
            ),
            Mutation::Delete(key) if !key.is_complete() => Err(BackendError::invalid_argument(
                format!("delete requires a complete key, got {}", key),
            )),
            _ => Ok(()),
        }
    }

    /// Entity groups touched by a set of mutations.
    ///
    /// A new root entity (incomplete single-element key) is its own group.
    fn entity_groups(mutations: &[Mutation]) -> usize {
        let mut groups = HashSet::new();
        let mut new_roots = 0;
        for mutation in mutations {
            let key = match mutation {
                Mutation::InsertAutoId(entity) | Mutation::Upsert(entity) => &entity.key,
                Mutation::Delete(key) => key,
            };
            if key.path().len() == 1 && !key.is_complete() {
                new_roots += 1;
            } else {
                groups.insert(key.root());
            }
        }
        groups.len() + new_roots
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn commit(&self, request: CommitRequest) -> BackendResult<CommitResponse> {
        let mut inner = self.inner.write();

        for mutation in &request.mutations {
            Self::validate_mutation(mutation)?;
        }

        if let Some(tx) = &request.transaction {
            Self::check_transaction(&inner, Some(tx), &request.partition)?;
            let groups = Self::entity_groups(&request.mutations);
            // consumed whether or not the commit succeeds
            let state = inner.transactions.remove(tx);
            let cross_group = state.map_or(false, |s| s.cross_group);
            if !cross_group && groups > 1 {
                return Err(BackendError::aborted(format!(
                    "Transaction {} touches {} entity groups; begin a cross-group transaction",
                    tx, groups
                )));
            }
            if groups > MAX_CROSS_GROUP_ENTITY_GROUPS {
                return Err(BackendError::aborted(format!(
                    "Transaction {} touches {} entity groups, limit is {}",
                    tx, groups, MAX_CROSS_GROUP_ENTITY_GROUPS
                )));
            }
            trace!("Consumed transaction {}", tx);
        }

        let mut next_id = inner.next_id;
        let mut response = CommitResponse::default();
        let entities = inner.partitions.entry(request.partition.clone()).or_default();

        for mutation in request.mutations {
            match mutation {
                Mutation::InsertAutoId(entity) => {
                    // never hand out an id already taken by an explicit upsert
                    let mut key = entity.key.complete_with(KeyId::Id(next_id));
                    while entities.contains_key(&key) {
                        next_id += 1;
                        key = entity.key.complete_with(KeyId::Id(next_id));
                    }
                    next_id += 1;
                    entities.insert(key.clone(), entity.properties);
                    response.inserted_keys.push(key);
                }
                Mutation::Upsert(entity) => {
                    entities.insert(entity.key, entity.properties);
                }
                Mutation::Delete(key) => {
                    entities.remove(&key);
                }
            }
            response.index_updates += 1;
        }
        inner.next_id = next_id;

        debug!(
            "Applied {} mutations to {:?} ({} auto ids)",
            response.index_updates,
            request.partition,
            response.inserted_keys.len()
        );
        Ok(response)
    }

    fn lookup(&self, request: LookupRequest) -> BackendResult<LookupResponse> {
        let inner = self.inner.read();
        Self::check_transaction(&inner, request.transaction.as_ref(), &request.partition)?;

        let entities = inner.partitions.get(&request.partition);
        let mut response = LookupResponse::default();
        for key in request.keys {
            if !key.is_complete() {
                return Err(BackendError::invalid_argument(format!(
                    "Cannot look up incomplete key {}",
                    key
                )));
            }
            match entities.and_then(|e| e.get(&key)) {
                Some(properties) => response
                    .found
                    .push(StoredEntity::new(key, properties.clone())),
                None => response.missing.push(key),
            }
        }

        trace!(
            "Lookup found {}, missing {}",
            response.found.len(),
            response.missing.len()
        );
        Ok(response)
    }

    fn run_query(&self, request: RunQueryRequest) -> BackendResult<RunQueryResponse> {
        let inner = self.inner.read();
        Self::check_transaction(&inner, request.transaction.as_ref(), &request.partition)?;

        let statement = GqlParser::parse(&request.query.query_string)?;
        if request.transaction.is_some()
            && !statement
                .conditions
                .iter()
                .any(|c| matches!(c, Condition::HasAncestor(_)))
        {
            return Err(BackendError::invalid_argument(
                "Only ancestor queries are allowed inside transactions",
            ));
        }

        let evaluator = GqlEvaluator::new(
            &statement,
            &request.query.named_bindings,
            request.query.allow_literals,
        );

        let candidates: Vec<StoredEntity> = inner
            .partitions
            .get(&request.partition)
            .map(|entities| {
                entities
                    .iter()
                    .filter(|(key, _)| key.kind() == statement.kind)
                    .map(|(key, properties)| StoredEntity::new(key.clone(), properties.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let rows = evaluator.filter_and_sort(candidates)?;
        let total = rows.len();

        let start = match evaluator.start()? {
            Start::Beginning => 0,
            Start::Offset(n) => n,
            Start::Cursor(cursor) => Self::decode_cursor(&cursor)?,
        };
        let limit = evaluator.limit()?;

        let results: Vec<StoredEntity> = rows
            .into_iter()
            .skip(start)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        let end = start.min(total) + results.len();
        let more_results = match limit {
            Some(n) if results.len() == n && end < total => MoreResults::MoreResultsAfterLimit,
            _ => MoreResults::NoMoreResults,
        };

        debug!(
            "Query on {} returned {} of {} rows from position {}",
            statement.kind,
            results.len(),
            total,
            start
        );

        Ok(RunQueryResponse {
            results,
            end_cursor: Some(Self::encode_cursor(end)),
            more_results,
        })
    }

    fn begin_transaction(
        &self,
        partition: &PartitionId,
        cross_group: bool,
    ) -> BackendResult<TransactionId> {
        let tx = TransactionId::new(uuid::Uuid::new_v4().to_string());
        self.inner.write().transactions.insert(
            tx.clone(),
            TransactionState {
                partition: partition.clone(),
                cross_group,
            },
        );
        debug!("Began transaction {} (cross_group={})", tx, cross_group);
        Ok(tx)
    }

    fn rollback(&self, transaction: &TransactionId) -> BackendResult<()> {
        match self.inner.write().transactions.remove(transaction) {
            Some(_) => {
                debug!("Rolled back transaction {}", transaction);
                Ok(())
            }
            None => Err(BackendError::not_found(format!(
                "Transaction {} is unknown or already used",
                transaction
            ))),
        }
    }
}
