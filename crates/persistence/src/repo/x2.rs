use chrono::{DateTime, Utc};
use sqlx::PgPool;

pub async fn insert_passing(
    pool: &PgPool,
    event_id: i64,
    session_id: i64,
    transponder_id: &str,
    is_in_pit: bool,
    recorded_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO x2_passings (event_id, session_id, transponder_id, is_in_pit, recorded_at)
           VALUES ($1, $2, $3, $4, $5)"#,
        event_id,
        session_id,
        transponder_id,
        is_in_pit,
        recorded_at,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn upsert_loop(
    pool: &PgPool,
    event_id: i64,
    loop_name: &str,
    is_in_pit: bool,
    is_pit_start_finish: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO x2_loops (event_id, loop_name, is_in_pit, is_pit_start_finish)
           VALUES ($1, $2, $3, $4)
           ON CONFLICT (event_id, loop_name)
           DO UPDATE SET is_in_pit = EXCLUDED.is_in_pit, is_pit_start_finish = EXCLUDED.is_pit_start_finish"#,
        event_id,
        loop_name,
        is_in_pit,
        is_pit_start_finish,
    )
    .execute(pool)
    .await?;
    Ok(())
}
