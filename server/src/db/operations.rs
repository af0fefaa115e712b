//! Database operations for the applied_operations table.

use ferry_engine::{ChangeMarker, OpKind, PushRequest, VersionToken};
use sqlx::{PgConnection, Row};

/// The acceptance recorded for an operation id.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedOperation {
    pub version: VersionToken,
    pub marker: ChangeMarker,
}

/// Look up an already accepted operation.
pub async fn find_applied(
    conn: &mut PgConnection,
    op_id: &str,
) -> Result<Option<AppliedOperation>, sqlx::Error> {
    let row = sqlx::query("SELECT version, marker FROM applied_operations WHERE op_id = $1")
        .bind(op_id)
        .fetch_optional(conn)
        .await?;

    row.map(|row| {
        Ok(AppliedOperation {
            version: row.try_get("version")?,
            marker: row.try_get::<i64, _>("marker")? as ChangeMarker,
        })
    })
    .transpose()
}

/// Remember an accepted operation for replay.
pub async fn record_applied(
    conn: &mut PgConnection,
    request: &PushRequest,
    applied: &AppliedOperation,
) -> Result<(), sqlx::Error> {
    let kind = match request.kind {
        OpKind::Insert => "insert",
        OpKind::Update => "update",
        OpKind::Delete => "delete",
    };

    sqlx::query(
        r#"
        INSERT INTO applied_operations (op_id, collection, record_key, kind, version, marker)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&request.op_id)
    .bind(&request.collection)
    .bind(&request.key)
    .bind(kind)
    .bind(&applied.version)
    .bind(applied.marker as i64)
    .execute(conn)
    .await?;

    Ok(())
}
