use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::rate_limit::{LoginRateLimiter, SubmissionRateLimiter};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub submission_limiter: SubmissionRateLimiter,
    pub login_limiter: LoginRateLimiter,
}
