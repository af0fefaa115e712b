//! Database operations for the records table.

use ferry_engine::{ChangeMarker, Fields, RemoteRecord};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub record_key: String,
    pub fields: Json<Fields>,
    pub version: String,
    pub deleted: bool,
    pub marker: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            record_key: row.try_get("record_key")?,
            fields: row.try_get("fields")?,
            version: row.try_get("version")?,
            deleted: row.try_get("deleted")?,
            marker: row.try_get("marker")?,
        })
    }
}

impl StoredRecord {
    /// Convert database row to the wire representation.
    pub fn into_remote(self) -> RemoteRecord {
        RemoteRecord {
            key: self.record_key,
            fields: self.fields.0,
            version: self.version,
            deleted: self.deleted,
            marker: self.marker as ChangeMarker,
        }
    }
}

/// Get a record, tombstones included.
pub async fn get_record(
    conn: &mut PgConnection,
    collection: &str,
    key: &str,
) -> Result<Option<RemoteRecord>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT record_key, fields, version, deleted, marker
        FROM records
        WHERE collection = $1 AND record_key = $2
        "#,
    )
    .bind(collection)
    .bind(key)
    .fetch_optional(conn)
    .await?;

    Ok(stored.map(StoredRecord::into_remote))
}

/// Upsert a record (insert or update).
pub async fn upsert_record(
    conn: &mut PgConnection,
    collection: &str,
    record: &RemoteRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO records (collection, record_key, fields, version, deleted, marker, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (collection, record_key) DO UPDATE SET
            fields = EXCLUDED.fields,
            version = EXCLUDED.version,
            deleted = EXCLUDED.deleted,
            marker = EXCLUDED.marker,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(collection)
    .bind(&record.key)
    .bind(Json(&record.fields))
    .bind(&record.version)
    .bind(record.deleted)
    .bind(record.marker as i64)
    .bind(chrono::Utc::now())
    .execute(conn)
    .await?;

    Ok(())
}

/// Advisory lock key guarding marker allocation.
const MARKER_LOCK: i64 = 0x66_6572_7279;

/// Allocate the next change marker.
///
/// Must run inside a transaction. The allocation lock is held until that
/// transaction ends, so markers become visible in the order they were handed
/// out and a reader never skips a marker that commits late.
pub async fn next_marker(conn: &mut PgConnection) -> Result<ChangeMarker, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MARKER_LOCK)
        .execute(&mut *conn)
        .await?;
    let marker: i64 = sqlx::query_scalar("SELECT nextval('change_markers')")
        .fetch_one(conn)
        .await?;
    Ok(marker as ChangeMarker)
}

/// Records of a collection changed after `since`, in marker order.
pub async fn get_records_since(
    pool: &PgPool,
    collection: &str,
    since: ChangeMarker,
    limit: i64,
) -> Result<Vec<RemoteRecord>, sqlx::Error> {
    let stored = sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT record_key, fields, version, deleted, marker
        FROM records
        WHERE collection = $1 AND marker > $2
        ORDER BY marker ASC
        LIMIT $3
        "#,
    )
    .bind(collection)
    .bind(since as i64)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(stored.into_iter().map(StoredRecord::into_remote).collect())
}
