//! 鉴权反向代理
//!
//! 单一上游（本机 Appium 端口）。所有路径走同一个 fallback handler，
//! 第一个 extractor 即 `RequireBearer`，未通过鉴权的请求不会被转发。

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, Request},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::env::constants::{PROXY_BODY_LIMIT, PROXY_TIMEOUT};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireBearer;

/// 代理状态
pub struct ProxyState {
    pub shared_secret: String,
    /// 上游基础 URL，如 `http://127.0.0.1:4729`
    pub upstream: String,
    client: reqwest::Client,
}

impl ProxyState {
    pub fn new(shared_secret: impl Into<String>, upstream_port: u16) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            shared_secret: shared_secret.into(),
            upstream: format!("http://127.0.0.1:{}", upstream_port),
            client,
        })
    }
}

/// 构建代理路由
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .fallback(forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 转发请求到上游
///
/// ANY /*
/// 需要 `Authorization: Bearer <secret>`
async fn forward(
    _auth: RequireBearer,
    State(state): State<Arc<ProxyState>>,
    request: Request<Body>,
) -> ApiResult<Response> {
    let request_id = Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream, path);

    debug!(request_id = %request_id, method = %parts.method, url = %url, "Proxy request");

    let body = axum::body::to_bytes(body, PROXY_BODY_LIMIT)
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read request body: {}", e)))?;

    let upstream = state
        .client
        .request(parts.method.clone(), &url)
        .headers(forwardable(&parts.headers, true))
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(request_id = %request_id, error = %e, "Proxy upstream unreachable");
            ApiError::bad_gateway("Proxy error").with_details(e.to_string())
        })?;

    let status = upstream.status();
    let headers = forwardable(upstream.headers(), false);
    let bytes = upstream.bytes().await.map_err(|e| {
        warn!(request_id = %request_id, error = %e, "Proxy upstream response interrupted");
        ApiError::bad_gateway("Proxy error").with_details(e.to_string())
    })?;

    debug!(request_id = %request_id, status = %status, bytes = bytes.len(), "Proxy response");

    let mut response = Body::from(bytes).into_response();
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    Ok(response)
}

/// 过滤 hop-by-hop headers；请求方向额外去掉 host（由 client 按上游重写）
fn forwardable(headers: &HeaderMap, request: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        if request && name == header::HOST {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use axum::routing::{get, post};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const SECRET: &str = "s3cret";

    /// 启动一个计数的假上游，返回端口
    async fn spawn_upstream(hits: Arc<AtomicUsize>) -> u16 {
        let h1 = hits.clone();
        let h2 = hits.clone();
        let app = Router::new()
            .route(
                "/wd/hub/session",
                post(move |body: String| {
                    let hits = h1.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (
                            StatusCode::CREATED,
                            [("x-upstream", "appium")],
                            format!("created:{}", body),
                        )
                    }
                }),
            )
            .route(
                "/echo",
                get(move |headers: HeaderMap, uri: axum::http::Uri| {
                    let hits = h2.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let host = headers
                            .get(header::HOST)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        format!("{}|{}", uri.query().unwrap_or(""), host)
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn proxy(port: u16) -> Router {
        router(Arc::new(ProxyState::new(SECRET, port).unwrap()))
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected_without_forwarding() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_upstream(hits.clone()).await;

        let response = proxy(port)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/wd/hub/session")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["error"], "Unauthorized");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_token_is_rejected() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_upstream(hits.clone()).await;

        let response = proxy(port)
            .oneshot(
                Request::builder()
                    .uri("/echo")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_authorized_request_is_forwarded_verbatim() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_upstream(hits.clone()).await;

        let response = proxy(port)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/wd/hub/session")
                    .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
                    .body(Body::from(r#"{"capabilities":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("x-upstream").unwrap(), "appium");
        assert_eq!(body_string(response).await, r#"created:{"capabilities":{}}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_kept_and_host_rewritten() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_upstream(hits.clone()).await;

        let response = proxy(port)
            .oneshot(
                Request::builder()
                    .uri("/echo?a=1&b=2")
                    .header(header::HOST, "public.example.com")
                    .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            format!("a=1&b=2|127.0.0.1:{}", port)
        );
    }

    #[tokio::test]
    async fn test_upstream_404_passes_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_upstream(hits).await;

        let response = proxy(port)
            .oneshot(
                Request::builder()
                    .uri("/does/not/exist")
                    .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_returns_502() {
        // 绑定后立即释放，得到一个大概率无人监听的端口
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let response = proxy(port)
            .oneshot(
                Request::builder()
                    .uri("/status")
                    .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Proxy error");
        assert!(json["details"].is_string());
    }
}
