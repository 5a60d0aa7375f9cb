pub mod error;
pub mod types;
pub mod schema;
pub mod class;
pub mod entity;
pub mod backend; // Datastore backend contract
pub mod config;
pub mod gql; // GQL subset used by the in-memory backend
pub mod memory;

pub use error::{BackendError, BackendErrorKind, Error, Result};
pub use types::*;
pub use schema::{PropertyDef, PropertyType, Schema};
pub use class::{EntityClassRegistry, BASE_ENTITY_CLASS};
pub use entity::Entity;
pub use backend::{
    Backend, BackendResult, Binding, CommitMode, CommitRequest, CommitResponse, GqlQuery,
    LookupRequest, LookupResponse, MoreResults, Mutation, PartitionId, RunQueryRequest,
    RunQueryResponse, StoredEntity,
};
pub use config::GatewayConfig;
pub use memory::MemoryBackend;
