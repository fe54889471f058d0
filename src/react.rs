//! `POST /react`：按 (filename, emoji, ip, uuid) 去重的表情反应。

use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Json, connect_info::ConnectInfo};
use axum::http::HeaderMap;
use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::http::resolve_client_ip;
use crate::reaction_store::ReactionStore;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReactRequest {
    filename: Option<String>,
    emoji: Option<String>,
    uuid: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReactResponse {
    count: u64,
}

struct Reaction {
    filename: String,
    emoji: String,
    uuid: String,
}

impl ReactRequest {
    /// 三个字段缺一（或为空）即视为错误请求。
    fn validate(self) -> Result<Reaction, ApiError> {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|value| !value.is_empty())
        }
        match (present(self.filename), present(self.emoji), present(self.uuid)) {
            (Some(filename), Some(emoji), Some(uuid)) => Ok(Reaction {
                filename,
                emoji,
                uuid,
            }),
            _ => Err(ApiError::BadRequest("Missing data".into())),
        }
    }
}

/// 请求体不是合法 JSON 对象时同样按缺字段处理。
pub async fn react(
    Extension(reactions): Extension<Arc<ReactionStore>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<ReactRequest>, JsonRejection>,
) -> Result<JsonResponse<ReactResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        debug!(error = %rejection.body_text(), "reaction body rejected");
        ApiError::BadRequest("Missing data".into())
    })?;
    let reaction = payload.validate()?;
    let ip = resolve_client_ip(&headers, Some(addr.ip()))
        .unwrap_or_else(|| addr.ip())
        .to_string();

    let count = reactions
        .record_reaction(&reaction.filename, &reaction.emoji, &ip, &reaction.uuid)
        .await?;
    info!(
        filename = reaction.filename,
        emoji = reaction.emoji,
        count,
        "reaction recorded"
    );
    Ok(JsonResponse(ReactResponse { count }))
}
