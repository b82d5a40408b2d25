//! Persistence and identity-mapping core for job design metadata.
//!
//! Model objects (jobs, stages, columns and their notes, documents,
//! extended attributes and responsible parties) live in a `UnitOfWork`
//! under temporary ids until a save commits them to an `AttributeStore`.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod persist;
pub mod repo;
pub mod service;

pub use config::ModelConfig;
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogLevel, LoggingError};
pub use model::entity::{Entity, EntityValidationError, ObjectId};
pub use model::events::{ListenerId, ModelEvent, ModelEventKind, ModelListener};
pub use persist::{
    MatchBy, ObjectState, OptionAddress, OptionType, PersistError, PersistResult, SaveOutcome,
    SubList, UnitOfWork, WorkMode,
};
pub use repo::attribute_store::{AttributeStore, IdMap, SqliteAttributeStore, StoreError, StoreResult};
pub use repo::schema::{is_temporary_id, Association, RecordType};
pub use service::security::{PermissionError, PermissionGrants, PermissionService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
