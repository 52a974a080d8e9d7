//! Axum integration.
//!
//! Provides a [`DeviceRequest`] extractor and a ready-made router serving
//! the display endpoints plus pages for the system fallback screens.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fruitstand::axum_ext;
//!
//! let app = axum_ext::router(Arc::new(orchestrator));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:5000").await?;
//! axum::serve(listener, app).await?;
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::request::Parts;
use http::{header, StatusCode};

use crate::orchestrator::{Orchestrator, RenderResponse};
use crate::screen::{APPROVAL_CODE_SCREEN, ERROR_SCREEN};
use crate::{Denial, DeviceRequest, REFRESH_HEADER};

/// Parse the device request from the query string.
///
/// Never rejects: missing or malformed parameters are simply absent, and
/// the access gate decides what that means.
///
/// # Example
///
/// ```rust,ignore
/// use fruitstand::DeviceRequest;
///
/// async fn handler(request: DeviceRequest) {
///     println!("key: {:?}", request.key);
/// }
/// ```
impl<S> FromRequestParts<S> for DeviceRequest
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(DeviceRequest::from_query_string(
            parts.uri.query().unwrap_or_default(),
        ))
    }
}

/// Router serving:
///
/// | Route | Purpose |
/// |-------|---------|
/// | `GET /display/render` | Render for the display named by `k` |
/// | `GET /display/render/{display_id}` | Render for a known display id |
/// | `GET /screens/render/fruitstand/error` | Error fallback page |
/// | `GET /screens/render/fruitstand/approval_code` | Approval code page |
///
/// Content screen endpoints are application routes; merge them in.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/display/render", get(render_display))
        .route("/display/render/{display_id}", get(render_display_by_id))
        .route(&format!("/screens/render/{}", ERROR_SCREEN), get(error_page))
        .route(
            &format!("/screens/render/{}", APPROVAL_CODE_SCREEN),
            get(approval_code_page),
        )
        .with_state(orchestrator)
}

async fn render_display(
    State(orchestrator): State<Arc<Orchestrator>>,
    request: DeviceRequest,
) -> Response {
    respond(orchestrator.handle(&request).await)
}

async fn render_display_by_id(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(display_id): Path<i64>,
    request: DeviceRequest,
) -> Response {
    respond(orchestrator.handle(&request.with_display_id(display_id)).await)
}

fn respond(result: Result<RenderResponse, Denial>) -> Response {
    match result {
        Ok(render) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, render.content_type)
            .header(REFRESH_HEADER, render.refresh_interval.to_string())
            .body(Body::from(render.body))
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build response: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }),
        Err(denial) => (StatusCode::NOT_FOUND, denial.to_string()).into_response(),
    }
}

async fn error_page(Query(params): Query<HashMap<String, String>>) -> Html<String> {
    let param = |name: &str| params.get(name).map(|v| escape_html(v)).unwrap_or_default();
    Html(page(&format!(
        "<h1>{}</h1><p>{}</p><p class=\"id\">{}</p>",
        param("error_title"),
        param("error_message"),
        param("error_id"),
    )))
}

async fn approval_code_page(Query(params): Query<HashMap<String, String>>) -> Html<String> {
    let code = params.get("code").map(|v| escape_html(v)).unwrap_or_default();
    Html(page(&format!(
        "<h1>Approval Required</h1><p>Approve this display with code</p><p class=\"code\">{}</p>",
        code
    )))
}

fn page(body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><style>\
         body{{margin:0;font-family:sans-serif;text-align:center;background:#fff;color:#000}}\
         h1{{margin-top:20%}}.code{{font-size:4em;letter-spacing:.2em}}.id{{font-family:monospace}}\
         </style></head><body>{}</body></html>",
        body
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
