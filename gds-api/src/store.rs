/// Kind-bound Store
///
/// A Store owns the query, cursor and pending-transaction state for one
/// Kind and drives a [`Gateway`] with it. It is not meant to be shared
/// across threads; independent pagers should use independent Stores.

use crate::gateway::{CallOptions, Gateway, GqlResult};
use gds_core::{
    Binding, Cursor, Entity, EntityClassRegistry, Error, Result, Schema, TransactionId, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Named query parameters
pub type QueryParams = BTreeMap<String, Value>;

const INT_OFFSET_PARAM: &str = "intOffset";
const START_CURSOR_PARAM: &str = "startCursor";
const ANCESTOR_KEY_PARAM: &str = "ancestorKey";

/// Where `fetch_page` starts
#[derive(Debug, Clone, PartialEq)]
pub enum Offset {
    /// Skip this many results
    Count(usize),
    /// Resume from a cursor
    Cursor(Cursor),
}

impl From<usize> for Offset {
    fn from(count: usize) -> Self {
        Offset::Count(count)
    }
}

impl From<Cursor> for Offset {
    fn from(cursor: Cursor) -> Self {
        Offset::Cursor(cursor)
    }
}

type SchemaFactory = Box<dyn FnOnce() -> Option<Schema>>;

/// Builder for [`Store`]
///
/// The schema is resolved from, in order: an explicit schema, a Kind name,
/// or a schema factory.
#[derive(Default)]
pub struct StoreBuilder {
    schema: Option<Arc<Schema>>,
    kind: Option<String>,
    schema_factory: Option<SchemaFactory>,
    gateway: Option<Gateway>,
    registry: Option<EntityClassRegistry>,
    entity_class: Option<String>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Use an open schema for this Kind
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Build the schema lazily when neither a schema nor a Kind is given
    pub fn schema_factory<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Option<Schema> + 'static,
    {
        self.schema_factory = Some(Box::new(factory));
        self
    }

    pub fn gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Entity classes available to [`Store::set_entity_class`]
    pub fn registry(mut self, registry: EntityClassRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn entity_class(mut self, class: impl Into<String>) -> Self {
        self.entity_class = Some(class.into());
        self
    }

    pub fn build(self) -> Result<Store> {
        let schema = match (self.schema, self.kind, self.schema_factory) {
            (Some(schema), _, _) => schema,
            (None, Some(kind), _) => Arc::new(Schema::new(kind)?),
            (None, None, Some(factory)) => Arc::new(factory().ok_or_else(missing_schema)?),
            (None, None, None) => return Err(missing_schema()),
        };
        schema.validate()?;

        let gateway = self
            .gateway
            .ok_or_else(|| Error::Configuration("You must provide a Gateway".to_string()))?;

        let mut store = Store {
            query_text: default_query(schema.kind()),
            entity_class: schema.entity_class().to_string(),
            schema,
            gateway,
            registry: self.registry.unwrap_or_default(),
            query_params: QueryParams::new(),
            cursor: None,
            transaction: None,
        };
        if let Some(class) = self.entity_class {
            store.set_entity_class(class)?;
        }
        Ok(store)
    }
}

fn missing_schema() -> Error {
    Error::Configuration("You must provide a Schema or Kind".to_string())
}

fn default_query(kind: &str) -> String {
    format!("SELECT * FROM `{}` ORDER BY __key__ ASC", kind)
}

/// Per-Kind façade over a [`Gateway`]
pub struct Store {
    schema: Arc<Schema>,
    gateway: Gateway,
    registry: EntityClassRegistry,
    entity_class: String,
    query_text: String,
    query_params: QueryParams,
    cursor: Option<Cursor>,
    /// Pending transaction, consumed by the next upsert or delete
    transaction: Option<TransactionId>,
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn kind(&self) -> &str {
        self.schema.kind()
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn entity_class(&self) -> &str {
        &self.entity_class
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn pending_transaction(&self) -> Option<&TransactionId> {
        self.transaction.as_ref()
    }

    // ---- Writes ----

    /// Insert or replace one entity; auto-allocated ids are written back
    pub fn upsert(&mut self, entity: &mut Entity) -> Result<()> {
        self.upsert_many(std::slice::from_mut(entity))
    }

    /// Insert or replace entities in one commit, consuming any pending transaction
    pub fn upsert_many(&mut self, entities: &mut [Entity]) -> Result<()> {
        // nothing is committed, so the token stays pending
        if entities.is_empty() {
            return Ok(());
        }
        let options = self.consuming_options();
        self.gateway.put_multi(entities, &options)
    }

    pub fn delete(&mut self, entity: &Entity) -> Result<()> {
        self.delete_many(std::slice::from_ref(entity))
    }

    /// Delete entities in one commit, consuming any pending transaction
    pub fn delete_many(&mut self, entities: &[Entity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let options = self.consuming_options();
        self.gateway.delete_multi(entities, &options)
    }

    // ---- Lookups (do not consume the pending transaction) ----

    pub fn fetch_by_id(&self, id: i64) -> Result<Option<Entity>> {
        self.gateway.fetch_by_id(id, &self.reading_options())
    }

    pub fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Entity>> {
        self.gateway.fetch_by_ids(ids, &self.reading_options())
    }

    pub fn fetch_by_name(&self, name: &str) -> Result<Option<Entity>> {
        self.gateway.fetch_by_name(name, &self.reading_options())
    }

    pub fn fetch_by_names<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Entity>> {
        self.gateway.fetch_by_names(names, &self.reading_options())
    }

    // ---- Queries ----

    /// Replace the current query and reset the cursor
    pub fn query(&mut self, text: impl Into<String>, params: QueryParams) -> &mut Self {
        self.query_text = text.into();
        self.query_params = params;
        self.cursor = None;
        self
    }

    /// First result of the current query
    pub fn fetch_one(&mut self) -> Result<Option<Entity>> {
        let text = format!("{} LIMIT 1", self.query_text);
        let bindings = self.bindings()?;
        let result = self.run(&text, bindings)?;
        Ok(result.entities.into_iter().next())
    }

    /// All results of the current query
    pub fn fetch_all(&mut self) -> Result<Vec<Entity>> {
        let text = self.query_text.clone();
        let bindings = self.bindings()?;
        Ok(self.run(&text, bindings)?.entities)
    }

    /// One page of the current query.
    ///
    /// With no explicit offset the page resumes from the stored cursor, so
    /// repeated calls walk the result set. The end cursor of each page is
    /// stored for the next call.
    pub fn fetch_page(&mut self, page_size: usize, offset: Option<Offset>) -> Result<Vec<Entity>> {
        if has_clause(&self.query_text, "LIMIT") || has_clause(&self.query_text, "OFFSET") {
            return Err(Error::InvalidQuery(
                "fetch_page adds its own LIMIT and OFFSET; remove them from the query".to_string(),
            ));
        }

        let mut bindings = self.bindings()?;
        let offset_clause = match offset {
            Some(Offset::Count(count)) => {
                let count = i64::try_from(count).map_err(|_| {
                    Error::InvalidQuery(format!("Offset {} is out of range", count))
                })?;
                bindings.insert(INT_OFFSET_PARAM.to_string(), Binding::Value(Value::Integer(count)));
                format!(" OFFSET @{}", INT_OFFSET_PARAM)
            }
            Some(Offset::Cursor(cursor)) => {
                bindings.insert(START_CURSOR_PARAM.to_string(), Binding::Cursor(cursor));
                format!(" OFFSET @{}", START_CURSOR_PARAM)
            }
            None => match &self.cursor {
                Some(cursor) if !cursor.is_empty() => {
                    bindings.insert(START_CURSOR_PARAM.to_string(), Binding::Cursor(cursor.clone()));
                    format!(" OFFSET @{}", START_CURSOR_PARAM)
                }
                _ => String::new(),
            },
        };

        let text = format!("{} LIMIT {}{}", self.query_text, page_size, offset_clause);
        let result = self.run(&text, bindings)?;
        self.cursor = result.end_cursor;
        Ok(result.entities)
    }

    /// Entities of this Kind in `ancestor`'s entity group
    pub fn fetch_entity_group(&mut self, ancestor: &Entity) -> Result<Vec<Entity>> {
        let key = ancestor.key();
        if !key.is_complete() {
            return Err(Error::InvalidKey(format!(
                "Cannot query the entity group of an unsaved {}",
                ancestor.kind()
            )));
        }

        let text = format!(
            "SELECT * FROM `{}` WHERE __key__ HAS ANCESTOR @{}",
            self.kind(),
            ANCESTOR_KEY_PARAM
        );
        let mut bindings = BTreeMap::new();
        bindings.insert(ANCESTOR_KEY_PARAM.to_string(), Binding::Value(Value::Key(key)));

        let result = self.run(&text, bindings)?;
        self.cursor = result.end_cursor;
        Ok(result.entities)
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Override the stored cursor, e.g. to resume paging in a new process
    pub fn set_cursor(&mut self, cursor: impl Into<Cursor>) -> &mut Self {
        self.cursor = Some(cursor.into());
        self
    }

    // ---- Entities ----

    /// New entity of this Store's class, bound to its schema
    pub fn new_entity(&self) -> Entity {
        Entity::new(self.schema.clone())
    }

    /// New entity seeded with properties, each checked against the schema
    pub fn create_entity<I, K, V>(&self, data: I) -> Result<Entity>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut entity = self.new_entity();
        for (name, value) in data {
            entity.set(name, value)?;
        }
        Ok(entity)
    }

    /// New entity seeded from a JSON object
    pub fn create_entity_from_json(&self, data: serde_json::Value) -> Result<Entity> {
        let serde_json::Value::Object(map) = data else {
            return Err(Error::Validation(
                "Entity data must be a JSON object".to_string(),
            ));
        };
        let mut entity = self.new_entity();
        for (name, value) in map {
            entity.set(name, Value::try_from(value)?)?;
        }
        Ok(entity)
    }

    /// Manufacture entities as `class`.
    ///
    /// The class must be registered and descend from the base entity class;
    /// on failure the current class is kept.
    pub fn set_entity_class(&mut self, class: impl Into<String>) -> Result<&mut Self> {
        let class = class.into();
        self.registry.check_entity_class(&class)?;
        Arc::make_mut(&mut self.schema).set_entity_class(class.clone());
        debug!("Store for {} now manufactures {}", self.kind(), class);
        self.entity_class = class;
        Ok(self)
    }

    // ---- Transactions ----

    /// Begin a transaction; the next upsert or delete commits under it.
    ///
    /// A token still pending from an earlier call is released first.
    pub fn begin_transaction(&mut self, cross_group: bool) -> Result<TransactionId> {
        self.release_transaction()?;
        let tx = self.gateway.begin_transaction(cross_group)?;
        self.transaction = Some(tx.clone());
        Ok(tx)
    }

    // cleared even if the Backend refuses the release
    fn release_transaction(&mut self) -> Result<()> {
        match self.transaction.take() {
            Some(tx) => self.gateway.release_transaction(&tx),
            None => Ok(()),
        }
    }

    fn consume_transaction(&mut self) -> Option<TransactionId> {
        let tx = self.transaction.take();
        if let Some(tx) = &tx {
            trace!("Consuming transaction {}", tx);
        }
        tx
    }

    fn consuming_options(&mut self) -> CallOptions {
        let tx = self.consume_transaction();
        CallOptions::new(self.schema.clone()).with_transaction(tx)
    }

    fn reading_options(&self) -> CallOptions {
        CallOptions::new(self.schema.clone()).with_transaction(self.transaction.clone())
    }

    fn run(&mut self, text: &str, bindings: BTreeMap<String, Binding>) -> Result<GqlResult> {
        let options = self.reading_options();
        self.gateway.gql(text, bindings, &options)
    }

    /// Current parameters as bindings; entity values are sent as their keys
    fn bindings(&self) -> Result<BTreeMap<String, Binding>> {
        self.query_params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::Entity(entity) => {
                        let key = entity.key();
                        if !key.is_complete() {
                            return Err(Error::InvalidKey(format!(
                                "Query parameter @{} is an unsaved {}",
                                name,
                                entity.kind()
                            )));
                        }
                        Value::Key(key)
                    }
                    other => other.clone(),
                };
                Ok((name.clone(), Binding::Value(value)))
            })
            .collect()
    }
}

/// True if `word` appears outside quoted text as a clause keyword, i.e.
/// followed by an integer or an `@binding` (`WHERE offset = 5` is not one)
fn has_clause(text: &str, word: &str) -> bool {
    let mut tokens: Vec<String> = Vec::new();
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' || c == '`' => {
                quote = Some(c);
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                // quoted text is a token of its own, never a keyword or argument
                tokens.push(c.to_string());
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }

    tokens.windows(2).any(|pair| {
        pair[0].eq_ignore_ascii_case(word) && is_clause_argument(&pair[1])
    })
}

fn is_clause_argument(token: &str) -> bool {
    let binding = token.strip_prefix('@').filter(|name| !name.is_empty());
    binding.is_some() || (!token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gds_core::{GatewayConfig, MemoryBackend};

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(MemoryBackend::new()), GatewayConfig::new("test")).unwrap()
    }

    fn book_store() -> Store {
        let schema = Schema::new("Book")
            .unwrap()
            .add_string("title")
            .add_string("author");
        Store::builder().schema(schema).gateway(gateway()).build().unwrap()
    }

    #[test]
    fn test_build_requires_schema_or_kind() {
        let result = Store::builder().gateway(gateway()).build();
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = Store::builder()
            .schema_factory(|| None)
            .gateway(gateway())
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_build_requires_gateway() {
        let result = Store::builder().kind("Book").build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_build_from_factory() {
        let store = Store::builder()
            .schema_factory(|| Schema::new("Author").ok())
            .gateway(gateway())
            .build()
            .unwrap();
        assert_eq!(store.kind(), "Author");
    }

    #[test]
    fn test_default_query() {
        let store = Store::builder().kind("Book").gateway(gateway()).build().unwrap();
        assert_eq!(store.query_text(), "SELECT * FROM `Book` ORDER BY __key__ ASC");
        assert!(store.cursor().is_none());
    }

    #[test]
    fn test_query_resets_cursor() {
        let mut store = book_store();
        store.set_cursor("abc");
        store.query("SELECT * FROM Book", QueryParams::new());
        assert!(store.cursor().is_none());
        assert_eq!(store.query_text(), "SELECT * FROM Book");
    }

    #[test]
    fn test_create_entity_validates() {
        let store = book_store();
        let dune = store.create_entity([("title", "Dune")]).unwrap();
        assert_eq!(dune.get("title").unwrap(), Some(&Value::string("Dune")));

        let result = store.create_entity([("colour", "red")]);
        assert!(matches!(result, Err(Error::SchemaMismatch(_))));
    }

    #[test]
    fn test_create_entity_from_json() {
        let store = book_store();
        let dune = store
            .create_entity_from_json(serde_json::json!({"title": "Dune", "author": "Herbert"}))
            .unwrap();
        assert_eq!(dune.get("author").unwrap(), Some(&Value::string("Herbert")));

        assert!(store.create_entity_from_json(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_entity_param_sent_as_key() {
        let mut store = book_store();
        let mut author = store.new_entity();
        author.set_key_name("herbert").unwrap();

        let mut params = QueryParams::new();
        params.insert("a".to_string(), Value::from(author.clone()));
        store.query("SELECT * FROM Book WHERE author = @a", params);

        let bindings = store.bindings().unwrap();
        assert_eq!(
            bindings.get("a"),
            Some(&Binding::Value(Value::Key(author.key())))
        );
    }

    #[test]
    fn test_unsaved_entity_param_rejected() {
        let mut store = book_store();
        let mut params = QueryParams::new();
        params.insert("a".to_string(), Value::from(store.new_entity()));
        store.query("SELECT * FROM Book WHERE author = @a", params);
        assert!(matches!(store.fetch_all(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_fetch_page_rejects_caller_limit() {
        let mut store = book_store();
        store.query("SELECT * FROM Book LIMIT 5", QueryParams::new());
        assert!(matches!(store.fetch_page(2, None), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_has_clause_ignores_quoted_text() {
        assert!(has_clause("SELECT * FROM Book limit 5", "LIMIT"));
        assert!(!has_clause("SELECT * FROM Book WHERE title = 'no limit 5'", "LIMIT"));
        assert!(!has_clause("SELECT * FROM `Offset` WHERE x = 1", "OFFSET"));
    }

    #[test]
    fn test_has_clause_ignores_property_names() {
        assert!(has_clause("SELECT * FROM Book OFFSET @skip", "OFFSET"));
        assert!(has_clause("SELECT * FROM Book LIMIT 10 OFFSET 20", "OFFSET"));
        assert!(!has_clause("SELECT * FROM Book WHERE offset = 5", "OFFSET"));
        assert!(!has_clause("SELECT * FROM Book WHERE limit > @n", "LIMIT"));
        assert!(!has_clause("SELECT * FROM Book ORDER BY limit", "LIMIT"));
    }
}
