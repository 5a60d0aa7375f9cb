/// Test utilities and helpers for GDS testing
///
/// This module provides common fixtures so integration tests can build a
/// memory-backed Store in one line.

use gds_api::{Gateway, GatewayConfig, Store};
use gds_core::{
    Backend, BackendError, BackendErrorKind, BackendResult, CommitRequest, CommitResponse,
    Entity, LookupRequest, LookupResponse, MemoryBackend, PartitionId, RunQueryRequest,
    RunQueryResponse, Schema, TransactionId,
};
use std::sync::{Arc, Once};

pub const TEST_DATASET: &str = "gds-test";

static TRACING: Once = Once::new();

/// Install a `tracing` subscriber once per test binary (honours `RUST_LOG`)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Book schema used across the integration tests
pub fn book_schema() -> Schema {
    Schema::new("Book")
        .expect("valid kind")
        .add_string("title")
        .add_string("author")
        .add_string("isbn")
        .add_integer("pages")
        .add_datetime("published")
        .add_key("series")
}

/// Store wrapper that keeps a handle on its in-memory backend
pub struct TestStore {
    pub store: Store,
    pub backend: Arc<MemoryBackend>,
}

impl TestStore {
    /// Book store over a fresh in-memory backend
    pub fn books() -> Self {
        Self::with_schema(book_schema())
    }

    /// Store for `schema` over a fresh in-memory backend
    pub fn with_schema(schema: Schema) -> Self {
        Self::on_backend(Arc::new(MemoryBackend::new()), schema)
    }

    /// Store for `schema` sharing an existing backend
    pub fn on_backend(backend: Arc<MemoryBackend>, schema: Schema) -> Self {
        init_tracing();
        let store = Store::builder()
            .schema(schema)
            .gateway(gateway(backend.clone()))
            .build()
            .expect("Failed to build store");
        Self { store, backend }
    }

    /// Another Store for `schema` on the same backend
    pub fn sibling(&self, schema: Schema) -> Store {
        Store::builder()
            .schema(schema)
            .gateway(gateway(self.backend.clone()))
            .build()
            .expect("Failed to build store")
    }

    /// Entities stored in the test partition
    pub fn stored_count(&self) -> usize {
        self.backend.entity_count(&PartitionId::new(TEST_DATASET))
    }

    /// Upsert a new book with auto id and return it
    pub fn add_book(&mut self, title: &str, author: &str) -> Entity {
        let mut book = self
            .store
            .create_entity([("title", title), ("author", author)])
            .expect("Failed to create book");
        self.store.upsert(&mut book).expect("Failed to upsert book");
        book
    }

    /// Upsert `count` books titled "Book 0".."Book N" in one batch
    pub fn add_books(&mut self, count: usize) -> Vec<Entity> {
        let mut books: Vec<Entity> = (0..count)
            .map(|i| {
                self.store
                    .create_entity([("title", format!("Book {}", i))])
                    .expect("Failed to create book")
            })
            .collect();
        self.store.upsert_many(&mut books).expect("Failed to upsert books");
        books
    }
}

/// Gateway over `backend` bound to the test dataset
pub fn gateway(backend: Arc<dyn Backend>) -> Gateway {
    Gateway::new(backend, GatewayConfig::new(TEST_DATASET)).expect("Failed to create gateway")
}

/// Backend that fails every call with the same error
pub struct FailingBackend {
    kind: BackendErrorKind,
    message: String,
}

impl FailingBackend {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn fail<T>(&self) -> BackendResult<T> {
        Err(BackendError::new(self.kind, self.message.clone()))
    }
}

impl Backend for FailingBackend {
    fn commit(&self, _request: CommitRequest) -> BackendResult<CommitResponse> {
        self.fail()
    }

    fn lookup(&self, _request: LookupRequest) -> BackendResult<LookupResponse> {
        self.fail()
    }

    fn run_query(&self, _request: RunQueryRequest) -> BackendResult<RunQueryResponse> {
        self.fail()
    }

    fn begin_transaction(
        &self,
        _partition: &PartitionId,
        _cross_group: bool,
    ) -> BackendResult<TransactionId> {
        self.fail()
    }

    fn rollback(&self, _transaction: &TransactionId) -> BackendResult<()> {
        self.fail()
    }
}

/// Titles of `entities`, in order
pub fn titles(entities: &[Entity]) -> Vec<String> {
    entities
        .iter()
        .filter_map(|e| e.properties().get("title"))
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}
