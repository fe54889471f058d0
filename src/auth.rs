//! 上传口令登录与会话管理。

use axum::extract::{Extension, Form};
use axum::http::{Request, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{body::Body as AxumBody, middleware};
use axum_extra::extract::{CookieJar, cookie::Cookie, cookie::SameSite};
use cookie::time::Duration as CookieDuration;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AUTH_COOKIE_NAME;
use crate::pages;

#[derive(Debug)]
pub struct AuthConfig {
    /// 未配置时所有登录都会失败，上传保持锁定。
    pub password: Option<String>,
    pub sessions: Mutex<HashMap<String, SessionEntry>>,
    pub session_ttl: Duration,
}

#[derive(Debug)]
pub struct SessionEntry {
    pub expires_at: Instant,
}

impl AuthConfig {
    pub fn new(password: Option<String>, session_ttl: Duration) -> Self {
        Self {
            password: password.filter(|value| !value.is_empty()),
            sessions: Mutex::new(HashMap::new()),
            session_ttl,
        }
    }

    fn accepts(&self, candidate: &str) -> bool {
        self.password
            .as_deref()
            .is_some_and(|password| password == candidate)
    }
}

/// 上传路由守卫：无有效会话时跳转到口令页。
pub async fn require_upload_auth(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
    req: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    if let Some(cookie) = jar.get(AUTH_COOKIE_NAME)
        && is_session_valid(&auth, cookie.value()).await
    {
        return next.run(req).await;
    }
    Redirect::to("/upload-auth").into_response()
}

#[derive(Deserialize)]
pub(crate) struct UploadAuthForm {
    #[serde(default)]
    password: String,
}

pub async fn upload_auth_page() -> Html<String> {
    Html(pages::login_page(None))
}

/// 校验口令并写入会话 Cookie。
pub async fn upload_auth_submit(
    Extension(auth): Extension<Arc<AuthConfig>>,
    jar: CookieJar,
    Form(form): Form<UploadAuthForm>,
) -> Result<(CookieJar, Redirect), Response> {
    if !auth.accepts(&form.password) {
        warn!("upload login rejected");
        return Err((
            StatusCode::UNAUTHORIZED,
            Html(pages::login_page(Some("Incorrect password."))),
        )
            .into_response());
    }

    let token = Uuid::new_v4().to_string();
    let expires_at = Instant::now() + auth.session_ttl;
    auth.sessions
        .lock()
        .await
        .insert(token.clone(), SessionEntry { expires_at });
    info!("upload session created");

    let cookie = Cookie::build((AUTH_COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(auth.session_ttl.as_secs() as i64))
        .build();
    Ok((jar.add(cookie), Redirect::to("/upload")))
}

async fn is_session_valid(auth: &AuthConfig, token: &str) -> bool {
    let mut sessions = auth.sessions.lock().await;
    let now = Instant::now();
    match sessions.get(token) {
        Some(entry) if entry.expires_at > now => true,
        _ => {
            sessions.remove(token);
            false
        }
    }
}

/// 清理过期会话。
pub async fn prune_expired_sessions(auth: &AuthConfig) {
    let mut sessions = auth.sessions.lock().await;
    let now = Instant::now();
    sessions.retain(|_, entry| entry.expires_at > now);
}
