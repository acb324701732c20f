use sqlx::PgPool;
use uuid::Uuid;

use crate::models::User;

/// Store `token_hash` as the user's only API token, replacing any previous one.
pub async fn replace<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    user_id: Uuid,
    token_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO api_tokens (user_id, token_hash) VALUES ($1, $2)
         ON CONFLICT (user_id) DO UPDATE SET token_hash = EXCLUDED.token_hash, created_at = now()",
    )
    .bind(user_id)
    .bind(token_hash)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn find_user_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT u.* FROM users u
         JOIN api_tokens t ON t.user_id = u.id
         WHERE t.token_hash = $1",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}
