use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn upsert_open(
    pool: &PgPool,
    event_id: i64,
    session_id: i64,
    flag: &str,
    start_time: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO flag_log (event_id, session_id, flag, start_time)
           VALUES ($1, $2, $3, $4)
           ON CONFLICT (event_id, session_id, flag, start_time) DO NOTHING"#,
        event_id,
        session_id,
        flag,
        start_time,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn close(
    pool: &PgPool,
    event_id: i64,
    session_id: i64,
    flag: &str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"UPDATE flag_log SET end_time = $5
           WHERE event_id = $1 AND session_id = $2 AND flag = $3 AND start_time = $4"#,
        event_id,
        session_id,
        flag,
        start_time,
        end_time,
    )
    .execute(pool)
    .await?;
    Ok(())
}
