use sqlx::PgPool;

pub struct ClientRow {
    pub client_id: String,
    pub org_id: i64,
}

/// Resolves a bearer token's SHA-256 hash to its owning client and
/// organization. Returns `None` for unknown or revoked tokens.
pub async fn resolve_token(pool: &PgPool, token_hash: &[u8]) -> Result<Option<ClientRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        ClientRow,
        r#"SELECT client_id, org_id FROM clients WHERE token_hash = $1 AND revoked_at IS NULL"#,
        token_hash
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn event_belongs_to_org(pool: &PgPool, event_id: i64, org_id: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query!(
        "SELECT 1 AS present FROM events WHERE event_id = $1 AND org_id = $2",
        event_id,
        org_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}
