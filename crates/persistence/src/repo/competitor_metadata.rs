use sqlx::PgPool;

/// Last-update-wins: a newer metadata change for the same car always
/// overwrites an older one, regardless of arrival order relative to other
/// fields.
pub async fn upsert(
    pool: &PgPool,
    event_id: i64,
    car_number: &str,
    driver_name: Option<&str>,
    driver_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query!(
        r#"INSERT INTO competitor_metadata (event_id, car_number, driver_name, driver_id, updated_at)
           VALUES ($1, $2, $3, $4, now())
           ON CONFLICT (event_id, car_number)
           DO UPDATE SET driver_name = EXCLUDED.driver_name, driver_id = EXCLUDED.driver_id, updated_at = now()"#,
        event_id,
        car_number,
        driver_name,
        driver_id,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub struct CompetitorMetadataRow {
    pub car_number: String,
    pub driver_name: Option<String>,
    pub driver_id: Option<String>,
}

pub async fn get(
    pool: &PgPool,
    event_id: i64,
    car_number: &str,
) -> Result<Option<CompetitorMetadataRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        CompetitorMetadataRow,
        "SELECT car_number, driver_name, driver_id FROM competitor_metadata WHERE event_id = $1 AND car_number = $2",
        event_id,
        car_number
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
