use sqlx::PgPool;

pub struct EventRow {
    pub event_id: i64,
    pub org_id: i64,
    pub name: String,
}

pub async fn create_event(pool: &PgPool, org_id: i64, name: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query!(
        "INSERT INTO events (org_id, name) VALUES ($1, $2) RETURNING event_id",
        org_id,
        name
    )
    .fetch_one(pool)
    .await?;
    Ok(row.event_id)
}

pub async fn get_event(pool: &PgPool, event_id: i64) -> Result<Option<EventRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        EventRow,
        "SELECT event_id, org_id, name FROM events WHERE event_id = $1",
        event_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
