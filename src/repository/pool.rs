//! Connection sources for the work store.
//!
//! The backend is picked once from the database URL. SQLite opens a fresh
//! connection per operation; PostgreSQL draws from a deadpool.

use std::path::{Path, PathBuf};

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::deadpool::Pool as DeadPool;
#[cfg(feature = "postgres")]
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
#[cfg(feature = "postgres")]
use diesel_async::AsyncPgConnection;

use super::util::{is_postgres_url, to_diesel_error};

/// Error returned by every store operation.
pub type DieselError = diesel::result::Error;

pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

#[cfg(feature = "postgres")]
pub type PgConn = deadpool::managed::Object<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Applied to every new SQLite connection. Many worker processes share one
/// file, so lock contention waits up to 30s instead of failing at once.
const SQLITE_PRAGMAS: &str = "PRAGMA busy_timeout = 30000; PRAGMA synchronous = NORMAL;";

#[cfg(feature = "postgres")]
const PG_MAX_CONNECTIONS: usize = 10;

/// Opens SQLite connections on demand.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Accepts a bare path, `sqlite:path` or `sqlite://path`.
    pub fn from_url(url: &str) -> Self {
        let path = url.strip_prefix("sqlite:").unwrap_or(url);
        let path = path.strip_prefix("//").unwrap_or(path);
        Self {
            path: PathBuf::from(path),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn acquire(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.path.to_string_lossy())
            .await
            .map_err(to_diesel_error)?;
        conn.batch_execute(SQLITE_PRAGMAS).await?;
        Ok(conn)
    }
}

/// Pooled PostgreSQL connections.
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgPool {
    inner: DeadPool<AsyncPgConnection>,
}

#[cfg(feature = "postgres")]
impl PgPool {
    pub fn connect(url: &str) -> Result<Self, DieselError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
        let inner = DeadPool::builder(manager)
            .max_size(PG_MAX_CONNECTIONS)
            .build()
            .map_err(to_diesel_error)?;
        Ok(Self { inner })
    }

    pub async fn acquire(&self) -> Result<PgConn, DieselError> {
        self.inner.get().await.map_err(to_diesel_error)
    }
}

/// Which SQL dialect a pool speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqliteConnector),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl DbPool {
    /// `postgres://` and `postgresql://` URLs select PostgreSQL, which needs
    /// the `postgres` feature. Anything else is a SQLite location.
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        if !is_postgres_url(url) {
            return Ok(DbPool::Sqlite(SqliteConnector::from_url(url)));
        }

        #[cfg(feature = "postgres")]
        {
            Ok(DbPool::Postgres(PgPool::connect(url)?))
        }
        #[cfg(not(feature = "postgres"))]
        {
            Err(DieselError::QueryBuilderError(
                "this build has no PostgreSQL support (enable the 'postgres' feature)".into(),
            ))
        }
    }

    pub fn sqlite_from_path(path: &Path) -> Self {
        DbPool::Sqlite(SqliteConnector::from_path(path))
    }

    pub fn backend(&self) -> Backend {
        match self {
            DbPool::Sqlite(_) => Backend::Sqlite,
            #[cfg(feature = "postgres")]
            DbPool::Postgres(_) => Backend::Postgres,
        }
    }
}

/// Run `$body` with a connection from whichever backend `$pool` holds.
///
/// The body is compiled once per backend, so it may only use Diesel DSL or
/// SQL both dialects accept.
///
/// ```ignore
/// let n = with_conn!(self.pool, conn => {
///     work_items::table.count().get_result::<i64>(&mut conn).await?
/// });
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {
        $crate::with_conn_split!($pool, sqlite: $conn => $body, postgres: $conn => $body)
    };
}

/// Like [`with_conn!`], with a separate body per backend for SQL whose
/// syntax differs (row locking, placeholders).
#[macro_export]
macro_rules! with_conn_split {
    ($pool:expr, sqlite: $sqlite_conn:ident => $sqlite_body:expr, postgres: $pg_conn:ident => $pg_body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(source) => {
                #[allow(unused_mut)]
                let mut $sqlite_conn = source.acquire().await?;
                $sqlite_body
            }
            #[cfg(feature = "postgres")]
            $crate::repository::pool::DbPool::Postgres(source) => {
                #[allow(unused_mut)]
                let mut $pg_conn = source.acquire().await?;
                $pg_body
            }
        }
    }};
}
