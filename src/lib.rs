//! # skill-persistence-postgres
//!
//! PostgreSQL persistence adapter for voice-skill frameworks.
//!
//! Skill handlers are stateless between turns; the host framework persists
//! per-user attributes through a pluggable storage interface. This crate
//! implements that interface over a single PostgreSQL table: one row per
//! partition key (user, device, or person id), attributes stored as a JSONB
//! document. The table is created lazily on first use.
//!
//! Two connection strategies are available behind the same
//! [`PostgresConnection`] seam: a single persistent client
//! ([`PgClientConnection`]) and a bounded pool ([`PgPoolConnection`]).
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use skill_persistence_postgres::{
//!     ConnectionConfig, PersistenceAdapter, PgPoolConnection,
//!     PostgresAdapterConfig, PostgresPersistenceAdapter,
//! };
//!
//! let config = ConnectionConfig::from_env()?;
//! let connection = PgPoolConnection::connect(&config).await?;
//! let adapter = PostgresPersistenceAdapter::new(
//!     PostgresAdapterConfig::new("skill_attributes"),
//!     Arc::new(connection),
//! );
//!
//! let mut attributes = adapter.get_attributes(&envelope).await?;
//! attributes.insert("visits".into(), 1.into());
//! adapter.save_attributes(&envelope, &attributes).await?;
//! ```

pub mod adapter;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod partition_key;

pub use adapter::{
    DEFAULT_ATTRIBUTES_NAME, DEFAULT_PARTITION_KEY_NAME, PersistenceAdapter,
    PostgresAdapterConfig, PostgresPersistenceAdapter,
};
pub use connection::{ConnectionConfig, PgClientConnection, PgPoolConnection, PostgresConnection};
pub use envelope::{
    Application, Context, Device, Person, Request, RequestEnvelope, Session, SystemContext, User,
};
pub use error::{PersistenceError, PersistenceResult};
pub use partition_key::PartitionKeyGenerator;
