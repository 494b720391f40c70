//! # Rank Storage
//!
//! SQL implementations of [`PersistenceGateway`] on `sqlx`.
//!
//! - [`SqliteGateway`] - a single database file (or an in-memory database
//!   for tests). Group names use `COLLATE NOCASE`; foreign keys are on.
//! - [`MySqlGateway`] - a shared MySQL/MariaDB server with InnoDB tables
//!   and a case-insensitive collation.
//!
//! Both create their tables on [`PersistenceGateway::init_schema`] and
//! store expiry instants as epoch milliseconds. [`connect`] picks a backend
//! from [`DatabaseSettings`].

pub mod mysql;
pub mod sqlite;

pub use mysql::MySqlGateway;
pub use sqlite::SqliteGateway;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rank_core::{GatewayError, MemoryGateway, PersistenceGateway, PlayerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while opening storage.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("Schema setup failed: {0}")]
    Schema(#[from] GatewayError),
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_sqlite_path() -> String {
    "ranks.db".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_mysql_host() -> String {
    "127.0.0.1".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_mysql_database() -> String {
    "ranks".to_string()
}

fn default_mysql_username() -> String {
    "root".to_string()
}

/// `[database]` section of the server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// `memory`, `sqlite` or `mysql`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub mysql: MySqlSettings,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
            pool_size: default_pool_size(),
            mysql: MySqlSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MySqlSettings {
    #[serde(default = "default_mysql_host")]
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    #[serde(default = "default_mysql_database")]
    pub database: String,
    #[serde(default = "default_mysql_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self {
            host: default_mysql_host(),
            port: default_mysql_port(),
            database: default_mysql_database(),
            username: default_mysql_username(),
            password: String::new(),
        }
    }
}

/// Storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
    MySql,
}

impl Backend {
    /// Parses a backend name, ignoring case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Backend::Memory),
            "sqlite" => Some(Backend::Sqlite),
            "mysql" | "mariadb" => Some(Backend::MySql),
            _ => None,
        }
    }

    /// Like [`Backend::parse`], falling back to SQLite for unknown names.
    pub fn from_name(name: &str) -> Self {
        Self::parse(name).unwrap_or_else(|| {
            warn!("⚠️ Unknown database backend '{}', falling back to sqlite", name);
            Backend::Sqlite
        })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Backend::Memory => "memory",
            Backend::Sqlite => "sqlite",
            Backend::MySql => "mysql",
        })
    }
}

/// Opens the configured backend and creates its schema.
pub async fn connect(
    settings: &DatabaseSettings,
) -> Result<Arc<dyn PersistenceGateway>, StorageError> {
    let backend = Backend::from_name(&settings.backend);
    let gateway: Arc<dyn PersistenceGateway> = match backend {
        Backend::Memory => {
            warn!("⚠️ Using in-memory storage - nothing will survive a restart");
            Arc::new(MemoryGateway::new())
        }
        Backend::Sqlite => {
            Arc::new(SqliteGateway::open(&settings.sqlite_path, settings.pool_size).await?)
        }
        Backend::MySql => Arc::new(MySqlGateway::connect(&settings.mysql, settings.pool_size).await?),
    };

    gateway.init_schema().await?;
    info!("💾 Storage ready ({})", backend);
    Ok(gateway)
}

/// Maps a driver error onto the gateway error taxonomy.
pub(crate) fn db_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> GatewayError {
    move |error| match &error {
        sqlx::Error::Database(db)
            if db.is_foreign_key_violation() || db.is_unique_violation() =>
        {
            GatewayError::constraint(operation, db.message())
        }
        sqlx::Error::PoolClosed => GatewayError::Unavailable(format!("{operation}: pool closed")),
        _ => GatewayError::database(operation, error.to_string()),
    }
}

pub(crate) fn to_millis(instant: Option<DateTime<Utc>>) -> Option<i64> {
    instant.map(|at| at.timestamp_millis())
}

pub(crate) fn from_millis(
    operation: &'static str,
    millis: Option<i64>,
) -> Result<Option<DateTime<Utc>>, GatewayError> {
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| GatewayError::database(operation, format!("expiry {ms} out of range")))
        })
        .transpose()
}

pub(crate) fn parse_player(operation: &'static str, text: &str) -> Result<PlayerId, GatewayError> {
    PlayerId::from_str(text)
        .map_err(|e| GatewayError::database(operation, format!("invalid player id '{text}': {e}")))
}
