// ABOUTME: Lazily created, process-wide database pools keyed by engine, host, port and database
// ABOUTME: Sessions are read-only and each server-engine read runs in a rolled-back read-only transaction
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use super::dialect::DatabaseEngine;
use super::rows::{self, RowSet};
use crate::constants::query::{MAX_POOL_CONNECTIONS, POOL_ACQUIRE_TIMEOUT_SECS};
use crate::errors::{AppError, AppResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Executor;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[cfg(feature = "mssql")]
use tiberius::{AuthMethod, Client, Config};
#[cfg(feature = "mssql")]
use tokio::net::TcpStream;
#[cfg(feature = "mssql")]
use tokio::sync::Mutex;
#[cfg(feature = "mssql")]
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// Everything needed to reach one target database
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Engine
    pub engine: Option<DatabaseEngine>,
    /// Host name (ignored for `SQLite`)
    #[serde(default)]
    pub host: String,
    /// Port, engine default when absent
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or file path for `SQLite`
    pub database: String,
    /// Login
    #[serde(default)]
    pub username: Option<String>,
    /// Password
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl DatabaseConfig {
    /// Config for a `SQLite` database file
    #[must_use]
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            engine: Some(DatabaseEngine::Sqlite),
            database: path.into(),
            ..Self::default()
        }
    }

    /// Engine, required for every operation
    ///
    /// # Errors
    ///
    /// Returns an invalid input error when the engine is missing
    pub fn require_engine(&self) -> AppResult<DatabaseEngine> {
        self.engine
            .ok_or_else(|| AppError::invalid_input("Database config is missing an engine"))
    }

    /// Port, falling back to the engine default
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port
            .or_else(|| self.engine.and_then(DatabaseEngine::default_port))
            .unwrap_or_default()
    }

    /// Same target with another database selected
    #[must_use]
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self.clone()
        }
    }
}

/// Cache key of a pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Engine
    pub engine: DatabaseEngine,
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
    /// Database
    pub database: String,
}

impl PoolKey {
    /// Key for a config
    ///
    /// # Errors
    ///
    /// Returns an error when the engine is missing
    pub fn for_config(config: &DatabaseConfig) -> AppResult<Self> {
        Ok(Self {
            engine: config.require_engine()?,
            host: config.host.clone(),
            port: config.effective_port(),
            database: config.database.clone(),
        })
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}/{}",
            self.engine, self.host, self.port, self.database
        )
    }
}

#[cfg(feature = "mssql")]
type MsSqlClient = Client<Compat<TcpStream>>;

/// A live connection pool for one target
#[derive(Clone)]
pub enum DatabasePool {
    /// `PostgreSQL` pool
    Postgres(PgPool),
    /// `MySQL` pool
    MySql(MySqlPool),
    /// `SQLite` pool
    Sqlite(SqlitePool),
    /// SQL Server client (a single multiplexed connection)
    #[cfg(feature = "mssql")]
    MsSql(Arc<Mutex<MsSqlClient>>),
}

impl fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Postgres(_) => "Postgres",
            Self::MySql(_) => "MySql",
            Self::Sqlite(_) => "Sqlite",
            #[cfg(feature = "mssql")]
            Self::MsSql(_) => "MsSql",
        };
        f.debug_tuple("DatabasePool").field(&kind).finish()
    }
}

fn read_only_begin(engine: DatabaseEngine) -> AppResult<&'static str> {
    engine
        .dialect()
        .read_only_transaction_statement()
        .ok_or_else(|| AppError::internal(format!("No read-only transaction statement for {engine}")))
}

fn connect_error(key: &PoolKey, e: impl fmt::Display) -> AppError {
    AppError::execution(format!("Failed to connect to {key}: {e}"))
}

impl DatabasePool {
    /// Open a pool whose sessions are read-only
    ///
    /// # Errors
    ///
    /// Returns an execution error if the database is unreachable, or a
    /// config error for SQL Server when the `mssql` feature is disabled
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let key = PoolKey::for_config(config)?;
        let username = config.username.clone().unwrap_or_default();
        let password = config.password.clone().unwrap_or_default();
        let acquire_timeout = Duration::from_secs(POOL_ACQUIRE_TIMEOUT_SECS);
        let session = key
            .engine
            .dialect()
            .session_read_only_statement()
            .unwrap_or("SELECT 1");

        let pool = match key.engine {
            DatabaseEngine::Postgresql => {
                let options = PgConnectOptions::new()
                    .host(&key.host)
                    .port(key.port)
                    .database(&key.database)
                    .username(&username)
                    .password(&password);
                let pool = PgPoolOptions::new()
                    .max_connections(MAX_POOL_CONNECTIONS)
                    .acquire_timeout(acquire_timeout)
                    .after_connect(move |conn, _meta| {
                        Box::pin(async move {
                            conn.execute(session).await?;
                            Ok(())
                        })
                    })
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(&key, e))?;
                Self::Postgres(pool)
            }
            DatabaseEngine::Mysql => {
                let options = MySqlConnectOptions::new()
                    .host(&key.host)
                    .port(key.port)
                    .database(&key.database)
                    .username(&username)
                    .password(&password);
                let pool = MySqlPoolOptions::new()
                    .max_connections(MAX_POOL_CONNECTIONS)
                    .acquire_timeout(acquire_timeout)
                    .after_connect(move |conn, _meta| {
                        Box::pin(async move {
                            conn.execute(session).await?;
                            Ok(())
                        })
                    })
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(&key, e))?;
                Self::MySql(pool)
            }
            DatabaseEngine::Sqlite => {
                let options = SqliteConnectOptions::new()
                    .filename(&key.database)
                    .create_if_missing(false);
                let pool = SqlitePoolOptions::new()
                    .max_connections(MAX_POOL_CONNECTIONS)
                    .acquire_timeout(acquire_timeout)
                    .after_connect(move |conn, _meta| {
                        Box::pin(async move {
                            conn.execute(session).await?;
                            Ok(())
                        })
                    })
                    .connect_with(options)
                    .await
                    .map_err(|e| connect_error(&key, e))?;
                Self::Sqlite(pool)
            }
            DatabaseEngine::Mssql => Self::connect_mssql(&key, &username, &password).await?,
        };

        info!(target_db = %key, "Opened read-only connection pool");
        Ok(pool)
    }

    #[cfg(feature = "mssql")]
    async fn connect_mssql(key: &PoolKey, username: &str, password: &str) -> AppResult<Self> {
        let mut config = Config::new();
        config.host(&key.host);
        config.port(key.port);
        config.database(&key.database);
        config.authentication(AuthMethod::sql_server(username, password));
        config.readonly(true);
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| connect_error(key, e))?;
        tcp.set_nodelay(true).map_err(|e| connect_error(key, e))?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| connect_error(key, e))?;
        Ok(Self::MsSql(Arc::new(Mutex::new(client))))
    }

    #[cfg(not(feature = "mssql"))]
    #[allow(clippy::unused_async)]
    async fn connect_mssql(_key: &PoolKey, _username: &str, _password: &str) -> AppResult<Self> {
        Err(AppError::config(
            "SQL Server support requires the 'mssql' feature. Rebuild with: cargo build --features mssql",
        ))
    }

    /// Engine behind this pool
    #[must_use]
    pub const fn engine(&self) -> DatabaseEngine {
        match self {
            Self::Postgres(_) => DatabaseEngine::Postgresql,
            Self::MySql(_) => DatabaseEngine::Mysql,
            Self::Sqlite(_) => DatabaseEngine::Sqlite,
            #[cfg(feature = "mssql")]
            Self::MsSql(_) => DatabaseEngine::Mssql,
        }
    }

    /// Run one statement and collect every row
    ///
    /// Callers must pass `sql` through the read-only guard first. On
    /// `PostgreSQL` and `MySQL` the statement runs inside a read-only
    /// transaction that is rolled back afterwards, so nothing it changes
    /// (session settings included) outlives it on the pooled connection.
    ///
    /// # Errors
    ///
    /// Returns an execution error on any driver failure
    pub(crate) async fn fetch(&self, sql: &str) -> AppResult<RowSet> {
        debug!(engine = %self.engine(), sql, "Executing read");
        let exec_err = |e: sqlx::Error| AppError::execution(e.to_string());
        match self {
            Self::Postgres(pool) => {
                let mut tx = pool
                    .begin_with(read_only_begin(DatabaseEngine::Postgresql)?)
                    .await
                    .map_err(exec_err)?;
                let rows = (&mut *tx)
                    .fetch_all(sqlx::raw_sql(sql))
                    .await
                    .map_err(exec_err)?;
                tx.rollback().await.map_err(exec_err)?;
                rows::pg_rows(&rows)
            }
            Self::MySql(pool) => {
                let mut tx = pool
                    .begin_with(read_only_begin(DatabaseEngine::Mysql)?)
                    .await
                    .map_err(exec_err)?;
                let rows = (&mut *tx)
                    .fetch_all(sqlx::raw_sql(sql))
                    .await
                    .map_err(exec_err)?;
                tx.rollback().await.map_err(exec_err)?;
                rows::mysql_rows(&rows)
            }
            Self::Sqlite(pool) => {
                let rows = sqlx::raw_sql(sql).fetch_all(pool).await.map_err(exec_err)?;
                rows::sqlite_rows(&rows)
            }
            #[cfg(feature = "mssql")]
            Self::MsSql(client) => {
                let mut client = client.lock().await;
                let rows = client
                    .simple_query(sql)
                    .await
                    .map_err(|e| AppError::execution(e.to_string()))?
                    .into_first_result()
                    .await
                    .map_err(|e| AppError::execution(e.to_string()))?;
                rows::mssql_rows(rows)
            }
        }
    }

    /// Close every connection
    pub async fn close(&self) {
        match self {
            Self::Postgres(pool) => pool.close().await,
            Self::MySql(pool) => pool.close().await,
            Self::Sqlite(pool) => pool.close().await,
            // the TDS connection closes when the last handle drops
            #[cfg(feature = "mssql")]
            Self::MsSql(_) => {}
        }
    }
}

/// Process-wide pool cache
///
/// Concurrent first use of a key awaits a single creation through the
/// key's `OnceCell`; a failed creation leaves the cell empty so the next
/// command retries.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    pools: DashMap<PoolKey, Arc<OnceCell<DatabasePool>>>,
}

impl PoolRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached pool for the config's key, created on first use
    ///
    /// # Errors
    ///
    /// Returns an error if the pool has to be created and creation fails
    pub async fn get_or_connect(&self, config: &DatabaseConfig) -> AppResult<DatabasePool> {
        let key = PoolKey::for_config(config)?;
        let cell = Arc::clone(
            self.pools
                .entry(key)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        let pool = cell
            .get_or_try_init(|| DatabasePool::connect(config))
            .await?;
        Ok(pool.clone())
    }

    /// Number of keys with a pool (or a pool being created)
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pool has been requested yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Close and forget every pool
    pub async fn close_all(&self) {
        let cells: Vec<Arc<OnceCell<DatabasePool>>> =
            self.pools.iter().map(|e| Arc::clone(e.value())).collect();
        self.pools.clear();
        for cell in cells {
            if let Some(pool) = cell.get() {
                pool.close().await;
            }
        }
        info!("Closed all database pools");
    }
}
