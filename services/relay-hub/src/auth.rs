use persistence::repo::clients;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

pub struct ClientClaims {
    pub client_id: String,
    pub org_id: i64,
}

pub async fn validate_token(pool: &PgPool, raw_token: &str) -> Option<ClientClaims> {
    let hash = Sha256::digest(raw_token.as_bytes());
    let row = clients::resolve_token(pool, hash.as_slice()).await.ok()??;
    Some(ClientClaims {
        client_id: row.client_id,
        org_id: row.org_id,
    })
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bearer_strips_the_scheme() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
    }

    #[test]
    fn extract_bearer_rejects_other_schemes() {
        assert_eq!(extract_bearer("Basic abc123"), None);
        assert_eq!(extract_bearer("abc123"), None);
        assert_eq!(extract_bearer(""), None);
    }
}
