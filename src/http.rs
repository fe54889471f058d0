//! HTTP 辅助工具：客户端 IP、入口域名重定向与安全头。

use axum::body::Body as AxumBody;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::middleware;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// 把直连地址（例如 `host:3030`）的访问永久重定向到公开域名。
#[derive(Clone, Debug, Default)]
pub struct CanonicalRedirect {
    pub from_host: Option<String>,
    pub canonical_url: Option<String>,
}

impl CanonicalRedirect {
    fn target_for(&self, host: &str, path_and_query: &str) -> Option<String> {
        let from_host = self.from_host.as_deref()?;
        let canonical = self.canonical_url.as_deref()?;
        if !host.eq_ignore_ascii_case(from_host) {
            return None;
        }
        Some(format!("{}{}", canonical.trim_end_matches('/'), path_and_query))
    }
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 综合转发头与连接信息计算客户端 IP。
pub fn resolve_client_ip(headers: &HeaderMap, connect_ip: Option<IpAddr>) -> Option<IpAddr> {
    extract_forwarded_ip(headers).or(connect_ip)
}

pub async fn canonical_host_redirect(
    Extension(redirect): Extension<Arc<CanonicalRedirect>>,
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    if let Some(target) = redirect.target_for(host, path_and_query) {
        debug!(host, target, "redirecting to canonical host");
        return Redirect::permanent(&target).into_response();
    }
    next.run(request).await
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("same-origin"),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::{CanonicalRedirect, resolve_client_ip};
    use axum::http::{HeaderMap, HeaderValue};
    use std::net::IpAddr;

    #[test]
    fn forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: IpAddr = "127.0.0.1".parse().expect("ip");
        assert_eq!(
            resolve_client_ip(&headers, Some(peer)),
            Some("203.0.113.7".parse().expect("ip"))
        );
        assert_eq!(resolve_client_ip(&HeaderMap::new(), Some(peer)), Some(peer));
    }

    #[test]
    fn redirect_only_matches_configured_host() {
        let redirect = CanonicalRedirect {
            from_host: Some("example.net:3030".into()),
            canonical_url: Some("https://gallery.example.net/".into()),
        };
        assert_eq!(
            redirect.target_for("example.net:3030", "/upload?x=1").as_deref(),
            Some("https://gallery.example.net/upload?x=1")
        );
        assert_eq!(redirect.target_for("gallery.example.net", "/"), None);
        assert_eq!(CanonicalRedirect::default().target_for("example.net:3030", "/"), None);
    }
}
