//! 后台任务：定期清理过期的上传会话。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::{AuthConfig, prune_expired_sessions};
use crate::config::SESSION_PRUNE_INTERVAL_SECS;

pub fn spawn_background_tasks(auth: Arc<AuthConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            prune_expired_sessions(&auth).await;
            debug!("expired upload sessions pruned");
        }
    });
}
