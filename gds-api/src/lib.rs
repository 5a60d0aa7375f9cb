//! Object-document mapper over a Datastore backend
//!
//! A [`Store`] is bound to one Kind. It turns entity writes, key lookups and
//! GQL queries into calls on a [`Gateway`], which in turn talks to a
//! [`gds_core::Backend`].
//!
//! ```ignore
//! let backend = Arc::new(MemoryBackend::new());
//! let gateway = Gateway::new(backend, GatewayConfig::new("my-dataset"))?;
//! let mut books = Store::builder().kind("Book").gateway(gateway).build()?;
//!
//! let mut dune = books.create_entity([("title", "Dune")])?;
//! books.upsert(&mut dune)?;
//! let again = books.fetch_by_id(dune.key_id().unwrap_or_default())?;
//! ```

pub mod gateway;
pub mod store;

pub use gateway::{CallOptions, Gateway, GqlResult};
pub use store::{Offset, QueryParams, Store, StoreBuilder};

pub use gds_core::{
    Backend, BackendError, BackendErrorKind, Cursor, Entity, EntityClassRegistry, Error,
    GatewayConfig, Key, KeyId, MemoryBackend, PropertyType, Result, Schema, TransactionId, Value,
};
