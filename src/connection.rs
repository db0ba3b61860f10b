//! Database connection strategies.
//!
//! [`PostgresConnection`] is the seam between the adapter and the driver.
//! Two implementations are provided: [`PgClientConnection`] holds one
//! persistent connection for the lifetime of the adapter, and
//! [`PgPoolConnection`] draws from a bounded connection pool. Both run
//! parameterized statements and hand rows back as JSON objects keyed by
//! column name, so the adapter never touches driver row types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, Postgres, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};

/// Upper bound on pooled connections.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// How long to wait for a pooled connection before giving up.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default server port when `DB_PORT` is not set.
const DEFAULT_PORT: u16 = 5432;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection parameters shared by both strategies.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionConfig {
    /// Read the configuration from `DB_*` environment variables.
    ///
    /// `DB_USER` and `DB_PASSWORD` are required; `DB_HOST`, `DB_PORT`, and
    /// `DB_NAME` default to `localhost`, `5432`, and `postgres`.
    pub fn from_env() -> PersistenceResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> PersistenceResult<Self> {
        let port = match get("DB_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                PersistenceError::Config(format!("invalid DB_PORT value: {raw}"))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: get("DB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            user: get("DB_USER")
                .ok_or_else(|| PersistenceError::Config("DB_USER must be set".to_string()))?,
            password: get("DB_PASSWORD")
                .ok_or_else(|| PersistenceError::Config("DB_PASSWORD must be set".to_string()))?,
            database: get("DB_NAME").unwrap_or_else(|| "postgres".to_string()),
        })
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

// ---------------------------------------------------------------------------
// Connection trait
// ---------------------------------------------------------------------------

/// The driver seam used by the persistence adapter.
#[async_trait]
pub trait PostgresConnection: Send + Sync {
    /// Run a parameterized statement and return every row as a JSON object
    /// keyed by column name.
    async fn query(&self, statement: &str, params: &[Value]) -> PersistenceResult<Vec<Value>>;

    /// Run a parameterized statement and return the number of rows affected.
    async fn execute(&self, statement: &str, params: &[Value]) -> PersistenceResult<u64>;

    /// Verify that a usable connection can be reached.
    async fn check_connection(&self) -> PersistenceResult<()>;

    /// Close the underlying connection or drain the pool.
    async fn close(&self) -> PersistenceResult<()>;
}

/// Bind JSON parameter values onto a statement, by value kind.
///
/// Objects and arrays bind as JSONB; plain scalars bind as their SQL
/// equivalents. Numbers that fit neither `i64` nor `f64` are rejected.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> PersistenceResult<Query<'q, Postgres, PgArguments>> {
    for param in params {
        query = match param {
            Value::String(text) => query.bind(text.clone()),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    query.bind(int)
                } else if let Some(float) = number.as_f64() {
                    query.bind(float)
                } else {
                    return Err(PersistenceError::InvalidParameter(format!(
                        "unsupported numeric parameter: {number}"
                    )));
                }
            }
            Value::Bool(flag) => query.bind(*flag),
            Value::Null => query.bind(Option::<String>::None),
            Value::Object(_) | Value::Array(_) => query.bind(param.clone()),
        };
    }
    Ok(query)
}

/// Convert a driver row into a JSON object keyed by column name.
fn row_to_json(row: &PgRow) -> Value {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if let Ok(json) = row.try_get::<Value, _>(index) {
            json
        } else if let Ok(text) = row.try_get::<String, _>(index) {
            Value::String(text)
        } else if let Ok(int) = row.try_get::<i64, _>(index) {
            Value::Number(Number::from(int))
        } else if let Ok(int) = row.try_get::<i32, _>(index) {
            Value::Number(Number::from(int))
        } else if let Ok(float) = row.try_get::<f64, _>(index) {
            Number::from_f64(float)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        } else if let Ok(flag) = row.try_get::<bool, _>(index) {
            Value::Bool(flag)
        } else {
            Value::Null
        };
        object.insert(column.name().to_string(), value);
    }
    Value::Object(object)
}

fn database_error(err: sqlx::Error) -> PersistenceError {
    PersistenceError::Database(err.to_string())
}

// ---------------------------------------------------------------------------
// Single persistent client
// ---------------------------------------------------------------------------

/// One persistent database connection.
///
/// The connection lives behind an async mutex, so statements from
/// concurrent tasks are serialized. [`PgClientConnection::close`] takes the
/// connection out; any later call reports a connection error.
pub struct PgClientConnection {
    client: Arc<Mutex<Option<PgConnection>>>,
}

impl PgClientConnection {
    /// Connect with `config` and hold the connection open.
    pub async fn connect(config: &ConnectionConfig) -> PersistenceResult<Self> {
        info!(host = %config.host, database = %config.database, "opening client connection");

        let client = PgConnection::connect_with(&config.connect_options())
            .await
            .map_err(|e| PersistenceError::Connection {
                strategy: "client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            client: Arc::new(Mutex::new(Some(client))),
        })
    }

    fn closed() -> PersistenceError {
        PersistenceError::Connection {
            strategy: "client",
            reason: "connection has been closed".to_string(),
        }
    }
}

#[async_trait]
impl PostgresConnection for PgClientConnection {
    async fn query(&self, statement: &str, params: &[Value]) -> PersistenceResult<Vec<Value>> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(Self::closed)?;

        let rows = bind_params(sqlx::query(statement), params)?
            .fetch_all(&mut *client)
            .await
            .map_err(database_error)?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, statement: &str, params: &[Value]) -> PersistenceResult<u64> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(Self::closed)?;

        let result = bind_params(sqlx::query(statement), params)?
            .execute(&mut *client)
            .await
            .map_err(database_error)?;

        Ok(result.rows_affected())
    }

    async fn check_connection(&self) -> PersistenceResult<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or_else(Self::closed)?;

        client.ping().await.map_err(|e| PersistenceError::Connection {
            strategy: "client",
            reason: e.to_string(),
        })
    }

    async fn close(&self) -> PersistenceResult<()> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            debug!("closing client connection");
            client.close().await.map_err(|e| PersistenceError::Connection {
                strategy: "client",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pooled connections
// ---------------------------------------------------------------------------

/// A bounded pool of database connections.
///
/// Statements check a connection out for their own duration, so concurrent
/// adapter calls do not serialize behind each other.
pub struct PgPoolConnection {
    pool: PgPool,
}

impl PgPoolConnection {
    /// Build the pool and establish its first connection.
    pub async fn connect(config: &ConnectionConfig) -> PersistenceResult<Self> {
        info!(host = %config.host, database = %config.database, "opening connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
            .connect_with(config.connect_options())
            .await
            .map_err(|e| PersistenceError::Connection {
                strategy: "pool",
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl PostgresConnection for PgPoolConnection {
    async fn query(&self, statement: &str, params: &[Value]) -> PersistenceResult<Vec<Value>> {
        let rows = bind_params(sqlx::query(statement), params)?
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, statement: &str, params: &[Value]) -> PersistenceResult<u64> {
        let result = bind_params(sqlx::query(statement), params)?
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        Ok(result.rows_affected())
    }

    async fn check_connection(&self) -> PersistenceResult<()> {
        let mut connection =
            self.pool
                .acquire()
                .await
                .map_err(|e| PersistenceError::Connection {
                    strategy: "pool",
                    reason: e.to_string(),
                })?;

        connection
            .ping()
            .await
            .map_err(|e| PersistenceError::Connection {
                strategy: "pool",
                reason: e.to_string(),
            })
    }

    async fn close(&self) -> PersistenceResult<()> {
        debug!("closing connection pool");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        move |name| map.get(name).map(|v| v.to_string())
    }

    #[test]
    fn config_reads_all_variables() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("DB_HOST", "db.example.com"),
            ("DB_PORT", "5433"),
            ("DB_USER", "skill"),
            ("DB_PASSWORD", "secret"),
            ("DB_NAME", "skills"),
        ]))
        .unwrap();

        assert_eq!(config.host, "db.example.com");
        assert_eq!(config.port, 5433);
        assert_eq!(config.user, "skill");
        assert_eq!(config.password, "secret");
        assert_eq!(config.database, "skills");
    }

    #[test]
    fn config_applies_defaults() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            ("DB_USER", "skill"),
            ("DB_PASSWORD", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "postgres");
    }

    #[test]
    fn config_requires_user() {
        let err =
            ConnectionConfig::from_lookup(lookup(&[("DB_PASSWORD", "secret")])).unwrap_err();
        assert!(matches!(err, PersistenceError::Config(_)));
    }

    #[test]
    fn config_rejects_bad_port() {
        let err = ConnectionConfig::from_lookup(lookup(&[
            ("DB_PORT", "not-a-port"),
            ("DB_USER", "skill"),
            ("DB_PASSWORD", "secret"),
        ]))
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "configuration error: invalid DB_PORT value: not-a-port"
        );
    }
}
