use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub struct SessionRow {
    pub session_id: i64,
    pub event_id: i64,
    pub name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub async fn create_session(pool: &PgPool, event_id: i64, name: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        "INSERT INTO sessions (event_id, name, started_at) VALUES ($1, $2, now()) RETURNING session_id",
        event_id,
        name
    )
    .fetch_one(pool)
    .await?;
    Ok(row.session_id)
}

pub async fn get_session(pool: &PgPool, session_id: i64) -> Result<Option<SessionRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        SessionRow,
        "SELECT session_id, event_id, name, started_at, ended_at FROM sessions WHERE session_id = $1",
        session_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn end_session(pool: &PgPool, session_id: i64) -> Result<(), sqlx::Error> {
    sqlx::query!("UPDATE sessions SET ended_at = now() WHERE session_id = $1", session_id)
        .execute(pool)
        .await?;
    Ok(())
}
