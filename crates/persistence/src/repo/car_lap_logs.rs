use serde_json::Value;
use sqlx::PgPool;

/// Persists a per-lap snapshot for later query, fired from the lap
/// processor whenever `last_lap_completed` advances for a car.
pub async fn insert(
    pool: &PgPool,
    event_id: i64,
    session_id: i64,
    car_number: &str,
    lap_number: i32,
    lap_time_ms: Option<i64>,
    total_time_ms: Option<i64>,
    lap_included_pit: bool,
    snapshot: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO car_lap_logs
           (event_id, session_id, car_number, lap_number, lap_time_ms, total_time_ms, lap_included_pit, snapshot)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        event_id,
        session_id,
        car_number,
        lap_number,
        lap_time_ms,
        total_time_ms,
        lap_included_pit,
        snapshot,
    )
    .execute(pool)
    .await?;
    Ok(())
}
