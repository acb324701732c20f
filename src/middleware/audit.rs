use sqlx::PgPool;
use uuid::Uuid;

/// Record an audit event after a mutation. Failures are logged, never
/// surfaced to the caller.
pub async fn log_event(
    pool: &PgPool,
    user_id: Option<Uuid>,
    action: &str,
    resource_type: &str,
    resource_id: impl ToString,
    details: Option<serde_json::Value>,
) {
    let resource_id = resource_id.to_string();
    if let Err(e) = crate::db::audit::log_event(
        pool,
        user_id,
        action,
        resource_type,
        Some(&resource_id),
        details,
    )
    .await
    {
        tracing::error!("Failed to log audit event {action}: {e}");
    }
}
