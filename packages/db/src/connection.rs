//! Database connection management with lazy initialization.

use std::sync::LazyLock;

use submission_core::env::{self, string_var};
use submission_core::{ConfigError, TransitionError};
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Global database instance using lazy initialization.
static DB: LazyLock<OnceCell<Surreal<Any>>> = LazyLock::new(OnceCell::new);

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Where the shared database lives and how to sign in.
#[derive(Clone)]
pub struct DbConfig {
    /// `mem://`, `rocksdb://path`, or a remote `ws://`/`http://` endpoint
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Root user and password
    pub credentials: Option<(String, String)>,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("user", &self.credentials.as_ref().map(|(user, _)| user))
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "submissions".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// In-memory engine, used by tests.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Build a config from environment variables.
    ///
    /// - `SUBMISSION_DB_ENDPOINT` (default `mem://`)
    /// - `SUBMISSION_DB_NAMESPACE`, `SUBMISSION_DB_DATABASE`
    /// - `SUBMISSION_DB_USER` + `SUBMISSION_DB_PASS` (both or neither)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env::process_env)
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let credentials = match (
            string_var(lookup, "SUBMISSION_DB_USER"),
            string_var(lookup, "SUBMISSION_DB_PASS"),
        ) {
            (Some(user), Some(pass)) => Some((user, pass)),
            (None, None) => None,
            (user, _) => {
                let missing = if user.is_some() {
                    "SUBMISSION_DB_PASS"
                } else {
                    "SUBMISSION_DB_USER"
                };
                return Err(ConfigError::Missing {
                    name: missing.to_string(),
                });
            }
        };

        Ok(Self {
            endpoint: string_var(lookup, "SUBMISSION_DB_ENDPOINT").unwrap_or(defaults.endpoint),
            namespace: string_var(lookup, "SUBMISSION_DB_NAMESPACE").unwrap_or(defaults.namespace),
            database: string_var(lookup, "SUBMISSION_DB_DATABASE").unwrap_or(defaults.database),
            credentials,
        })
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not initialized; call db::init first")]
    NotInitialized,
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("Status of {id} changed concurrently (expected {expected})")]
    StaleStatus { id: String, expected: String },
    #[error("Retry count of {id} cannot decrease from {current} to {requested}")]
    RetryCountDecreased {
        id: String,
        current: u32,
        requested: u32,
    },
}

impl DbError {
    /// Whether the same write could succeed if tried again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Connection(_) | DbError::Query(_))
    }
}

/// Initialize the database connection.
///
/// Later calls return the connection created by the first one.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    DB.get_or_try_init(|| async {
        tracing::info!(endpoint = %config.endpoint, "Connecting to database");

        let db = connect(&config.endpoint).await?;

        if let Some((username, password)) = &config.credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(&config.namespace).use_db(&config.database).await?;

        tracing::info!(
            namespace = %config.namespace,
            database = %config.database,
            "Connected to database"
        );

        Ok(db)
    })
    .await
}

/// The connection created by [`init_db`].
pub fn get_db() -> Result<&'static Database, DbError> {
    DB.get().ok_or(DbError::NotInitialized)
}
