use serde_json::Value;
use sqlx::PgPool;

/// Upserts the full serialized snapshot used both for the scheduled
/// full-refresh path and for cold-start recovery.
pub async fn upsert(
    pool: &PgPool,
    event_id: i64,
    session_id: i64,
    payload: &Value,
    session_state: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO session_results (event_id, session_id, payload, session_state, updated_at)
           VALUES ($1, $2, $3, $4, now())
           ON CONFLICT (event_id, session_id)
           DO UPDATE SET payload = EXCLUDED.payload, session_state = EXCLUDED.session_state, updated_at = now()"#,
        event_id,
        session_id,
        payload,
        session_state,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub struct SessionResultsRow {
    pub payload: Value,
    pub session_state: Value,
}

pub async fn get(pool: &PgPool, event_id: i64, session_id: i64) -> Result<Option<SessionResultsRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        SessionResultsRow,
        "SELECT payload, session_state FROM session_results WHERE event_id = $1 AND session_id = $2",
        event_id,
        session_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
