//! Destination connection pool supporting SQLite, MySQL and PostgreSQL.
//!
//! The backend is chosen at runtime from the connection config. Statements are
//! raw SQL executed through `diesel::sql_query`, so the same code path serves
//! every backend.

use async_trait::async_trait;
use diesel::sql_types::BigInt;
use diesel::sqlite::SqliteConnection;
use diesel::QueryableByName;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl, SimpleAsyncConnection};
use tokio::sync::{Semaphore, SemaphorePermit};

#[cfg(any(feature = "mysql", feature = "postgres"))]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(any(feature = "mysql", feature = "postgres"))]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "mysql")]
use diesel_async::AsyncMysqlConnection;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::connection::{ConnectionConfig, Driver};
use super::util::{redact_url_password, to_diesel_error};
use super::{DbError, Destination, DestinationError};
use crate::error::{ExportError, ExportResult};
use crate::sql::{Dialect, ExistenceQuery};

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Async MySQL connection type.
#[cfg(feature = "mysql")]
pub type MysqlConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncMysqlConnection>>;

/// Async PostgreSQL connection type.
#[cfg(feature = "postgres")]
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Milliseconds SQLite waits on a locked database before failing a write.
const SQLITE_BUSY_TIMEOUT_MS: u32 = 5000;

#[derive(QueryableByName)]
struct ProbeRow {
    #[diesel(sql_type = BigInt)]
    hits: i64,
}

/// A SQLite connection and the pool slot it occupies.
pub struct SqliteLease<'a> {
    pub conn: SqliteConn,
    _permit: SemaphorePermit<'a>,
}

/// SQLite connection pool (lightweight - creates connections on demand).
///
/// A semaphore caps how many connections are open at once.
pub struct SqlitePool {
    database_url: String,
    slots: Semaphore,
}

impl SqlitePool {
    pub fn new(database_url: &str, max_size: usize) -> Self {
        // Strip sqlite: prefix if present
        let url = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
            slots: Semaphore::new(max_size.max(1)),
        }
    }

    /// Get a connection.
    pub async fn get(&self) -> Result<SqliteLease<'_>, DbError> {
        let permit = self.slots.acquire().await.map_err(to_diesel_error)?;
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        conn.batch_execute(&format!("PRAGMA busy_timeout = {SQLITE_BUSY_TIMEOUT_MS}"))
            .await?;
        Ok(SqliteLease {
            conn,
            _permit: permit,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// MySQL connection pool.
#[cfg(feature = "mysql")]
pub struct MysqlPool {
    pool: DeadPool<AsyncMysqlConnection>,
}

#[cfg(feature = "mysql")]
impl MysqlPool {
    pub fn new(database_url: &str, max_size: usize) -> Result<Self, DbError> {
        let config = AsyncDieselConnectionManager::<AsyncMysqlConnection>::new(database_url);
        let pool = DeadPool::builder(config)
            .max_size(max_size)
            .build()
            .map_err(to_diesel_error)?;
        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<MysqlConn, DbError> {
        self.pool.get().await.map_err(to_diesel_error)
    }
}

/// PostgreSQL connection pool.
#[cfg(feature = "postgres")]
pub struct PgPool {
    pool: DeadPool<AsyncPgConnection>,
}

#[cfg(feature = "postgres")]
impl PgPool {
    pub fn new(database_url: &str, max_size: usize) -> Result<Self, DbError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = DeadPool::builder(config)
            .max_size(max_size)
            .build()
            .map_err(to_diesel_error)?;
        Ok(Self { pool })
    }

    pub async fn get(&self) -> Result<PgConn, DbError> {
        self.pool.get().await.map_err(to_diesel_error)
    }
}

/// Destination pool over whichever backend the connection config names.
pub enum DbPool {
    Sqlite(SqlitePool),
    #[cfg(feature = "mysql")]
    Mysql(MysqlPool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

/// Run a database operation on whichever backend the pool holds.
///
/// `$conn` is bound to `&mut` the backend connection. The pooled connection is
/// held for the duration of `$body` and returned when it goes out of scope, on
/// success or failure. Failing to get a connection returns
/// [`DestinationError::Unavailable`] from the enclosing function.
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {{
        match &$pool {
            DbPool::Sqlite(pool) => {
                let mut lease = pool.get().await.map_err(DestinationError::Unavailable)?;
                let $conn = &mut lease.conn;
                $body
            }
            #[cfg(feature = "mysql")]
            DbPool::Mysql(pool) => {
                let mut object = pool.get().await.map_err(DestinationError::Unavailable)?;
                let $conn = &mut *object;
                $body
            }
            #[cfg(feature = "postgres")]
            DbPool::Postgres(pool) => {
                let mut object = pool.get().await.map_err(DestinationError::Unavailable)?;
                let $conn = &mut *object;
                $body
            }
        }
    }};
}

impl DbPool {
    /// Create a pool from connection parameters.
    pub fn connect(config: &ConnectionConfig) -> ExportResult<Self> {
        let url = config.database_url()?;
        let max_size = config.connection_limit();
        let driver = config.driver();
        tracing::info!(
            "Connecting to {} destination {} (pool size {})",
            driver,
            redact_url_password(&url),
            max_size
        );

        match driver {
            Driver::Sqlite => Ok(DbPool::Sqlite(SqlitePool::new(&url, max_size))),
            #[cfg(feature = "mysql")]
            Driver::Mysql => Ok(DbPool::Mysql(MysqlPool::new(&url, max_size)?)),
            #[cfg(feature = "postgres")]
            Driver::Postgres => Ok(DbPool::Postgres(PgPool::new(&url, max_size)?)),
            #[allow(unreachable_patterns)]
            other => Err(ExportError::config(format!(
                "{other} support is not compiled in (enable the `{other}` feature)"
            ))),
        }
    }

    pub fn driver(&self) -> Driver {
        match self {
            DbPool::Sqlite(_) => Driver::Sqlite,
            #[cfg(feature = "mysql")]
            DbPool::Mysql(_) => Driver::Mysql,
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => Driver::Postgres,
        }
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self, DbPool::Sqlite(_))
    }

    /// Check out one connection and run a trivial query on it.
    pub async fn check(&self) -> Result<(), DestinationError> {
        with_conn!(*self, conn => {
            conn.batch_execute("SELECT 1")
                .await
                .map_err(DestinationError::Unavailable)
        })
    }
}

#[async_trait]
impl Destination for DbPool {
    fn dialect(&self) -> Dialect {
        self.driver().dialect()
    }

    async fn execute(&self, statement: &str) -> Result<usize, DestinationError> {
        let statement = statement.to_string();
        with_conn!(*self, conn => {
            diesel::sql_query(statement)
                .execute(conn)
                .await
                .map_err(DestinationError::Rejected)
        })
    }

    async fn exists(&self, query: &ExistenceQuery) -> Result<bool, DestinationError> {
        let Some(sql) = query.to_sql(self.dialect()) else {
            return Ok(false);
        };
        let rows: Vec<ProbeRow> = with_conn!(*self, conn => {
            diesel::sql_query(sql)
                .load(conn)
                .await
                .map_err(DestinationError::Rejected)
        })?;
        Ok(rows.as_slice().first().is_some_and(|row| row.hits > 0))
    }
}
