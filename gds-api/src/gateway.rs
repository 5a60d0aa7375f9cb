/// Gateway: maps Store operations onto single Backend calls
///
/// Each call takes a [`CallOptions`] naming the schema to demap with and
/// the transaction (if any) to forward. Nothing from one call carries over
/// to the next except the last end cursor reported by a query.

use gds_core::{
    Backend, BackendError, BackendErrorKind, Binding, CommitRequest, Cursor, Entity, Error,
    GatewayConfig, GqlQuery, Key, LookupRequest, MoreResults, PartitionId, Result,
    RunQueryRequest, Schema, StoredEntity, TransactionId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Per-call context: schema plus optional transaction
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub schema: Arc<Schema>,
    pub transaction: Option<TransactionId>,
}

impl CallOptions {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            transaction: None,
        }
    }

    pub fn with_transaction(mut self, transaction: Option<TransactionId>) -> Self {
        self.transaction = transaction;
        self
    }
}

/// Entities returned by a GQL query
#[derive(Debug, Clone)]
pub struct GqlResult {
    pub entities: Vec<Entity>,
    pub end_cursor: Option<Cursor>,
    pub more_results: MoreResults,
}

/// Gateway bound to one Backend partition
pub struct Gateway {
    backend: Arc<dyn Backend>,
    config: GatewayConfig,
    partition: PartitionId,
    end_cursor: Option<Cursor>,
}

impl Gateway {
    /// Create a gateway; fails with a configuration error on invalid config
    pub fn new(backend: Arc<dyn Backend>, config: GatewayConfig) -> Result<Self> {
        config.validate().map_err(Error::Configuration)?;
        let partition = config.partition();
        Ok(Self {
            backend,
            config,
            partition,
            end_cursor: None,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// End cursor reported by the most recent query
    pub fn end_cursor(&self) -> Option<&Cursor> {
        self.end_cursor.as_ref()
    }

    /// Write entities in one commit.
    ///
    /// Entities without an id or key name are inserted with a backend
    /// allocated id, which is written back into the entity. All others are
    /// upserted at their key.
    pub fn put_multi(&self, entities: &mut [Entity], options: &CallOptions) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut request = CommitRequest::new(self.partition.clone(), options.transaction.clone());
        let mut auto_id_slots = Vec::new();
        for (index, entity) in entities.iter().enumerate() {
            check_kind(entity.kind(), &options.schema)?;
            let stored = StoredEntity::new(entity.key(), entity.properties().clone());
            request = if entity.has_key() {
                request.upsert(stored)
            } else {
                auto_id_slots.push(index);
                request.insert_auto_id(stored)
            };
        }

        debug!(
            "Committing {} entities of {} ({:?}, {} auto ids)",
            entities.len(),
            options.schema.kind(),
            request.mode,
            auto_id_slots.len()
        );
        let response = self.backend.commit(request)?;

        if response.inserted_keys.len() != auto_id_slots.len() {
            return Err(BackendError::new(
                BackendErrorKind::Internal,
                format!(
                    "Commit allocated {} keys for {} auto id inserts",
                    response.inserted_keys.len(),
                    auto_id_slots.len()
                ),
            )
            .into());
        }
        for (index, key) in auto_id_slots.into_iter().zip(response.inserted_keys) {
            let id = key.id().ok_or_else(|| {
                Error::Backend(BackendError::new(
                    BackendErrorKind::Internal,
                    format!("Allocated key {} has no numeric id", key),
                ))
            })?;
            entities[index].set_key_id(id)?;
        }
        Ok(())
    }

    /// Delete entities by key in one commit
    pub fn delete_multi(&self, entities: &[Entity], options: &CallOptions) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut request = CommitRequest::new(self.partition.clone(), options.transaction.clone());
        for entity in entities {
            check_kind(entity.kind(), &options.schema)?;
            let key = entity.key();
            if !key.is_complete() {
                return Err(Error::InvalidKey(format!(
                    "Cannot delete {} entity without an id or name",
                    entity.kind()
                )));
            }
            request = request.delete(key);
        }

        debug!(
            "Deleting {} entities of {} ({:?})",
            entities.len(),
            options.schema.kind(),
            request.mode
        );
        self.backend.commit(request)?;
        Ok(())
    }

    pub fn fetch_by_id(&self, id: i64, options: &CallOptions) -> Result<Option<Entity>> {
        Ok(self.fetch_by_ids(&[id], options)?.into_iter().next())
    }

    /// Look up entities by numeric id; missing ids are omitted
    pub fn fetch_by_ids(&self, ids: &[i64], options: &CallOptions) -> Result<Vec<Entity>> {
        let kind = options.schema.kind();
        let keys = ids
            .iter()
            .map(|&id| {
                if id <= 0 {
                    return Err(Error::InvalidKey(format!(
                        "{} id must be positive, got {}",
                        kind, id
                    )));
                }
                Ok(Key::with_id(kind, id))
            })
            .collect::<Result<Vec<_>>>()?;
        self.fetch_by_keys(keys, options)
    }

    pub fn fetch_by_name(&self, name: &str, options: &CallOptions) -> Result<Option<Entity>> {
        Ok(self.fetch_by_names(&[name], options)?.into_iter().next())
    }

    /// Look up entities by key name; missing names are omitted
    pub fn fetch_by_names<S: AsRef<str>>(
        &self,
        names: &[S],
        options: &CallOptions,
    ) -> Result<Vec<Entity>> {
        let kind = options.schema.kind();
        let keys = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if name.is_empty() {
                    return Err(Error::InvalidKey(format!("{} name must not be empty", kind)));
                }
                Ok(Key::with_name(kind, name))
            })
            .collect::<Result<Vec<_>>>()?;
        self.fetch_by_keys(keys, options)
    }

    /// Look up entities by full key.
    ///
    /// Keys must be complete and of the schema's Kind.
    pub fn fetch_by_keys(&self, keys: Vec<Key>, options: &CallOptions) -> Result<Vec<Entity>> {
        for key in &keys {
            if !key.is_complete() {
                return Err(Error::InvalidKey(format!("Cannot look up incomplete key {}", key)));
            }
            check_kind(key.kind(), &options.schema)?;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Looking up {} keys of {}",
            keys.len(),
            options.schema.kind()
        );
        let response = self.backend.lookup(LookupRequest {
            partition: self.partition.clone(),
            transaction: options.transaction.clone(),
            keys,
        })?;

        response
            .found
            .into_iter()
            .map(|stored| demap(&options.schema, stored))
            .collect()
    }

    /// Run a GQL query and demap the results.
    ///
    /// Records the end cursor for [`Gateway::end_cursor`].
    pub fn gql(
        &mut self,
        query_text: &str,
        bindings: BTreeMap<String, Binding>,
        options: &CallOptions,
    ) -> Result<GqlResult> {
        debug!("GQL: {} ({} bindings)", query_text, bindings.len());
        let mut query = GqlQuery::new(query_text);
        query.named_bindings = bindings;

        let response = self.backend.run_query(RunQueryRequest {
            partition: self.partition.clone(),
            transaction: options.transaction.clone(),
            query,
        })?;

        let entities = response
            .results
            .into_iter()
            .map(|stored| demap(&options.schema, stored))
            .collect::<Result<Vec<_>>>()?;
        self.end_cursor = response.end_cursor.clone();
        Ok(GqlResult {
            entities,
            end_cursor: response.end_cursor,
            more_results: response.more_results,
        })
    }

    /// Request a transaction token from the Backend
    pub fn begin_transaction(&self, cross_group: bool) -> Result<TransactionId> {
        let tx = self.backend.begin_transaction(&self.partition, cross_group)?;
        debug!("Transaction {} issued (cross_group={})", tx, cross_group);
        Ok(tx)
    }

    /// Give an unused token back to the Backend
    pub fn release_transaction(&self, transaction: &TransactionId) -> Result<()> {
        self.backend.rollback(transaction)?;
        debug!("Transaction {} released", transaction);
        Ok(())
    }
}

fn check_kind(kind: &str, schema: &Schema) -> Result<()> {
    if kind != schema.kind() {
        return Err(Error::InvalidKey(format!(
            "Kind '{}' does not match schema Kind '{}'",
            kind,
            schema.kind()
        )));
    }
    Ok(())
}

// rows of another Kind (e.g. from a kindless query) are refused, not relabelled
fn demap(schema: &Arc<Schema>, stored: StoredEntity) -> Result<Entity> {
    check_kind(stored.key.kind(), schema)?;
    Ok(Entity::hydrate(schema.clone(), &stored.key, stored.properties))
}
