//! The PostgreSQL persistence adapter.
//!
//! Implements the host framework's three-method storage-plugin interface
//! over a single table: one row per partition key, attributes stored as a
//! JSONB document. The table is provisioned lazily; every operation runs
//! the same guard sequence (connection check, table-exists check,
//! create-if-absent) before touching rows.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::connection::PostgresConnection;
use crate::envelope::RequestEnvelope;
use crate::error::{PersistenceError, PersistenceResult};
use crate::partition_key::{self, PartitionKeyGenerator};

/// Default name of the partition-key column.
pub const DEFAULT_PARTITION_KEY_NAME: &str = "user_id";

/// Default name of the attributes column.
pub const DEFAULT_ATTRIBUTES_NAME: &str = "attributes";

const TABLE_EXISTS_STATEMENT: &str = "SELECT EXISTS(SELECT 1 FROM information_schema.tables \
     WHERE table_schema = current_schema() AND table_name = $1)";

/// Storage-plugin interface required by the host skill framework.
///
/// The framework calls these around each handler invocation: attributes are
/// loaded before the handler runs and written back after it returns.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Load the stored attributes for the request's partition key.
    ///
    /// A key with no stored row yields an empty map, never an error.
    async fn get_attributes(
        &self,
        envelope: &RequestEnvelope,
    ) -> PersistenceResult<Map<String, Value>>;

    /// Replace the stored attributes for the request's partition key.
    async fn save_attributes(
        &self,
        envelope: &RequestEnvelope,
        attributes: &Map<String, Value>,
    ) -> PersistenceResult<()>;

    /// Remove the stored attributes for the request's partition key.
    async fn delete_attributes(&self, envelope: &RequestEnvelope) -> PersistenceResult<()>;
}

/// Configuration for [`PostgresPersistenceAdapter`].
///
/// Only the table name is required; column names and the key derivation
/// have platform defaults.
#[derive(Clone)]
pub struct PostgresAdapterConfig {
    /// Table holding the attribute rows.
    pub table_name: String,
    /// Partition-key column; defaults to [`DEFAULT_PARTITION_KEY_NAME`].
    pub partition_key_name: Option<String>,
    /// Attributes column; defaults to [`DEFAULT_ATTRIBUTES_NAME`].
    pub attributes_name: Option<String>,
    /// Key derivation; defaults to [`partition_key::user_id`].
    pub partition_key_generator: Option<PartitionKeyGenerator>,
}

impl PostgresAdapterConfig {
    /// Configuration for `table_name` with every other field defaulted.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            partition_key_name: None,
            attributes_name: None,
            partition_key_generator: None,
        }
    }
}

/// Persistence adapter backed by a single PostgreSQL table.
pub struct PostgresPersistenceAdapter {
    table_name: String,
    partition_key_name: String,
    attributes_name: String,
    partition_key_generator: PartitionKeyGenerator,
    connection: Arc<dyn PostgresConnection>,
}

impl PostgresPersistenceAdapter {
    /// Create an adapter over `connection`.
    ///
    /// The table is not touched here; it is provisioned lazily by the first
    /// operation.
    pub fn new(config: PostgresAdapterConfig, connection: Arc<dyn PostgresConnection>) -> Self {
        Self {
            table_name: config.table_name,
            partition_key_name: config
                .partition_key_name
                .unwrap_or_else(|| DEFAULT_PARTITION_KEY_NAME.to_string()),
            attributes_name: config
                .attributes_name
                .unwrap_or_else(|| DEFAULT_ATTRIBUTES_NAME.to_string()),
            partition_key_generator: config
                .partition_key_generator
                .unwrap_or(partition_key::user_id),
            connection,
        }
    }

    // Identifiers cannot be bound as statement parameters; they are quoted
    // and interpolated. Values always go through `$n` binds.

    fn create_table_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\"{}\" TEXT PRIMARY KEY, \"{}\" JSONB NOT NULL)",
            self.table_name, self.partition_key_name, self.attributes_name
        )
    }

    fn row_exists_statement(&self) -> String {
        format!(
            "SELECT EXISTS(SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = $1)",
            self.attributes_name, self.table_name, self.partition_key_name
        )
    }

    fn select_statement(&self) -> String {
        format!(
            "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = $1",
            self.attributes_name, self.table_name, self.partition_key_name
        )
    }

    fn upsert_statement(&self) -> String {
        format!(
            "INSERT INTO \"{table}\" (\"{key}\", \"{attrs}\") VALUES ($1, $2) \
             ON CONFLICT (\"{key}\") DO UPDATE SET \"{attrs}\" = EXCLUDED.\"{attrs}\"",
            table = self.table_name,
            key = self.partition_key_name,
            attrs = self.attributes_name
        )
    }

    fn delete_statement(&self) -> String {
        format!(
            "DELETE FROM \"{}\" WHERE \"{}\" = $1",
            self.table_name, self.partition_key_name
        )
    }

    fn schema_error(&self, err: &PersistenceError) -> PersistenceError {
        PersistenceError::Schema {
            table: self.table_name.clone(),
            reason: err.to_string(),
        }
    }

    fn query_error(
        &self,
        operation: &'static str,
        key: &str,
        err: &PersistenceError,
    ) -> PersistenceError {
        PersistenceError::Query {
            operation,
            partition_key: key.to_string(),
            table: self.table_name.clone(),
            reason: err.to_string(),
        }
    }

    /// Guard sequence run before every operation: the connection must be
    /// reachable and the table must exist, creating it when absent.
    async fn ensure_table(&self) -> PersistenceResult<()> {
        self.connection.check_connection().await?;

        let rows = self
            .connection
            .query(
                TABLE_EXISTS_STATEMENT,
                &[Value::String(self.table_name.clone())],
            )
            .await
            .map_err(|e| self.schema_error(&e))?;
        if first_exists(&rows) {
            return Ok(());
        }

        debug!(table = %self.table_name, "creating attributes table");
        self.connection
            .execute(&self.create_table_statement(), &[])
            .await
            .map_err(|e| self.schema_error(&e))?;
        Ok(())
    }

    async fn row_exists(&self, operation: &'static str, key: &str) -> PersistenceResult<bool> {
        let rows = self
            .connection
            .query(
                &self.row_exists_statement(),
                &[Value::String(key.to_string())],
            )
            .await
            .map_err(|e| self.query_error(operation, key, &e))?;
        Ok(first_exists(&rows))
    }
}

#[async_trait]
impl PersistenceAdapter for PostgresPersistenceAdapter {
    async fn get_attributes(
        &self,
        envelope: &RequestEnvelope,
    ) -> PersistenceResult<Map<String, Value>> {
        let key = (self.partition_key_generator)(envelope)?;
        self.ensure_table().await?;

        if !self.row_exists("read", &key).await? {
            debug!(key = %key, table = %self.table_name, "no attributes stored");
            return Ok(Map::new());
        }

        let rows = self
            .connection
            .query(&self.select_statement(), &[Value::String(key.clone())])
            .await
            .map_err(|e| self.query_error("read", &key, &e))?;

        let mut row = match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(Map::new()),
        };
        let attributes = match row.get_mut(self.attributes_name.as_str()) {
            Some(value) => value.take(),
            None => Value::Null,
        };
        if attributes.is_null() {
            return Ok(Map::new());
        }

        let attributes: Map<String, Value> = serde_json::from_value(attributes)?;
        debug!(key = %key, table = %self.table_name, "attributes loaded");
        Ok(attributes)
    }

    async fn save_attributes(
        &self,
        envelope: &RequestEnvelope,
        attributes: &Map<String, Value>,
    ) -> PersistenceResult<()> {
        let key = (self.partition_key_generator)(envelope)?;
        self.ensure_table().await?;

        self.connection
            .execute(
                &self.upsert_statement(),
                &[
                    Value::String(key.clone()),
                    Value::Object(attributes.clone()),
                ],
            )
            .await
            .map_err(|e| self.query_error("save", &key, &e))?;

        debug!(key = %key, table = %self.table_name, "attributes saved");
        Ok(())
    }

    async fn delete_attributes(&self, envelope: &RequestEnvelope) -> PersistenceResult<()> {
        let key = (self.partition_key_generator)(envelope)?;
        self.ensure_table().await?;

        let deleted = self
            .connection
            .execute(&self.delete_statement(), &[Value::String(key.clone())])
            .await
            .map_err(|e| self.query_error("delete", &key, &e))?;

        debug!(key = %key, table = %self.table_name, rows = deleted, "attributes deleted");
        Ok(())
    }
}

fn first_exists(rows: &[Value]) -> bool {
    rows.first()
        .and_then(|row| row.get("exists"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
