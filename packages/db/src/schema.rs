//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    // Shared store primitives
    db.query(STORE_SCHEMA).await?.check()?;

    // Application table
    db.query(APPLICATION_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Key/value leases, ordered lists and counters backing `SurrealStore`.
const STORE_SCHEMA: &str = r#"
-- Leases and plain values; record id is the key
DEFINE TABLE IF NOT EXISTS kv SCHEMALESS;
DEFINE INDEX IF NOT EXISTS kv_expires ON kv FIELDS expires_at_ms;

-- Ordered list entries; seq comes from the counter table
DEFINE TABLE IF NOT EXISTS list_entry SCHEMALESS;
DEFINE INDEX IF NOT EXISTS list_entry_order ON list_entry FIELDS list, seq UNIQUE;
DEFINE INDEX IF NOT EXISTS list_entry_value ON list_entry FIELDS list, value;

-- Atomic counters
DEFINE TABLE IF NOT EXISTS counter SCHEMALESS;
"#;

/// Application table schema.
const APPLICATION_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS application SCHEMALESS;

DEFINE INDEX IF NOT EXISTS application_user ON application FIELDS user_id;
DEFINE INDEX IF NOT EXISTS application_batch ON application FIELDS batch_id;
DEFINE INDEX IF NOT EXISTS application_status ON application FIELDS status;
"#;
