use gds_api::{
    BackendError, BackendErrorKind, Error, Gateway, GatewayConfig, QueryParams, Schema, Store,
    Value,
};
use gds_core::MemoryBackend;
use gds_test_utils::{book_schema, gateway, FailingBackend, TestStore};
use std::sync::Arc;

fn failing_store(kind: BackendErrorKind, message: &str) -> Store {
    Store::builder()
        .schema(book_schema())
        .gateway(gateway(Arc::new(FailingBackend::new(kind, message))))
        .build()
        .unwrap()
}

/// Test error codes are correct and stable
#[test]
fn test_error_codes() {
    assert_eq!(
        Error::Configuration("c".to_string()).code(),
        "CONFIGURATION_ERROR"
    );
    assert_eq!(Error::Validation("v".to_string()).code(), "VALIDATION_ERROR");
    assert_eq!(Error::SchemaMismatch("s".to_string()).code(), "SCHEMA_MISMATCH");
    assert_eq!(Error::InvalidKey("k".to_string()).code(), "INVALID_KEY");
    assert_eq!(Error::InvalidQuery("q".to_string()).code(), "INVALID_QUERY");
    assert_eq!(
        Error::from(BackendError::aborted("contention")).code(),
        "BACKEND_ERROR"
    );
}

#[test]
fn test_retryable_errors() {
    let retryable = [BackendErrorKind::Unavailable, BackendErrorKind::Aborted];
    let permanent = [
        BackendErrorKind::Unauthenticated,
        BackendErrorKind::InvalidArgument,
        BackendErrorKind::NotFound,
        BackendErrorKind::Internal,
    ];

    for kind in retryable {
        assert!(Error::from(BackendError::new(kind, "x")).is_retryable());
    }
    for kind in permanent {
        assert!(!Error::from(BackendError::new(kind, "x")).is_retryable());
    }
    assert!(!Error::Configuration("c".to_string()).is_retryable());
    assert!(!Error::SchemaMismatch("s".to_string()).is_retryable());
}

/// Backend failures reach the caller unchanged on every Store path
#[test]
fn test_backend_errors_propagate() {
    let mut store = failing_store(BackendErrorKind::Unavailable, "connection refused");

    let err = store.fetch_all().unwrap_err();
    let backend = err.backend_error().expect("backend error");
    assert_eq!(backend.kind, BackendErrorKind::Unavailable);
    assert_eq!(backend.message, "connection refused");
    assert!(err.is_retryable());
    assert!(err.to_string().contains("connection refused"));

    assert!(matches!(store.fetch_by_id(1), Err(Error::Backend(_))));
    assert!(matches!(store.fetch_by_names(&["dune"]), Err(Error::Backend(_))));
    assert!(matches!(store.fetch_page(5, None), Err(Error::Backend(_))));
    assert!(matches!(store.begin_transaction(false), Err(Error::Backend(_))));

    let mut book = store.create_entity([("title", "Dune")]).unwrap();
    assert!(matches!(store.upsert(&mut book), Err(Error::Backend(_))));
    assert!(book.key_id().is_none());
}

#[test]
fn test_auth_failure_not_retryable() {
    let mut store = failing_store(BackendErrorKind::Unauthenticated, "bad credentials");
    let err = store.fetch_one().unwrap_err();
    assert_eq!(err.code(), "BACKEND_ERROR");
    assert!(!err.is_retryable());
}

#[test]
fn test_schema_mismatch() {
    let ts = TestStore::books();
    let mut book = ts.store.new_entity();

    assert!(matches!(book.set("colour", "red"), Err(Error::SchemaMismatch(_))));
    assert!(matches!(book.get("colour"), Err(Error::SchemaMismatch(_))));
    assert!(matches!(book.set("pages", "many"), Err(Error::SchemaMismatch(_))));
    assert!(book.properties().is_empty());
}

#[test]
fn test_invalid_key() {
    let ts = TestStore::books();
    let mut book = ts.store.new_entity();
    book.set_key_id(7).unwrap();
    assert!(matches!(book.set_key_name("dune"), Err(Error::InvalidKey(_))));

    assert!(matches!(ts.store.fetch_by_id(-1), Err(Error::InvalidKey(_))));
    assert!(matches!(ts.store.fetch_by_name(""), Err(Error::InvalidKey(_))));
}

#[test]
fn test_configuration_errors() {
    let backend = Arc::new(MemoryBackend::new());

    let result = Store::builder().gateway(gateway(backend.clone())).build();
    match result {
        Err(Error::Configuration(msg)) => assert!(msg.contains("Schema or Kind")),
        other => panic!("expected configuration error, got {:?}", other.err()),
    }

    let result = Gateway::new(backend, GatewayConfig::new("ds").with_namespace("no spaces"));
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[test]
fn test_validation_errors() {
    assert!(matches!(Schema::new(""), Err(Error::Validation(_))));
    assert!(matches!(Schema::new("__key__"), Err(Error::Validation(_))));

    let bad_key_property = Schema::new("Book")
        .unwrap()
        .add_integer("isbn")
        .with_key_property("isbn");
    let backend = Arc::new(MemoryBackend::new());
    let result = Store::builder()
        .schema(bad_key_property)
        .gateway(gateway(backend))
        .build();
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[test]
fn test_malformed_query() {
    let mut ts = TestStore::books();

    let err = ts
        .store
        .query("SELECT title FROM Book", QueryParams::new())
        .fetch_all()
        .unwrap_err();
    assert_eq!(
        err.backend_error().map(|e| e.kind),
        Some(BackendErrorKind::InvalidArgument)
    );

    let err = ts
        .store
        .query("SELECT * FROM Book WHERE author = @a", QueryParams::new())
        .fetch_all()
        .unwrap_err();
    assert!(err.to_string().contains("@a"));

    let mut params = QueryParams::new();
    params.insert("a".to_string(), Value::string("Herbert"));
    assert!(ts
        .store
        .query("SELECT * FROM Book WHERE author = @a", params)
        .fetch_all()
        .unwrap()
        .is_empty());
}
