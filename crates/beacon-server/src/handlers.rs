//! Route handlers.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `<append_path>` | JSON body, returns the rendered HTML |
//! | `GET`  | `<serve_path>?tr=…` | Always answers with the pixel |
//! | `HEAD` | `<serve_path>?tr=…` | Pixel headers, no hit recorded |
//! | `GET`  | `/engagements/{email_id}` | Basic auth; 404 if not found |

use std::net::SocketAddr;

use axum::{
  Json,
  body::Body,
  extract::{ConnectInfo, Path, Request, State},
  http::{HeaderMap, HeaderValue, Method, StatusCode, header},
  response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use beacon_core::{
  pii::Pii,
  record::{ClientInfo, EngagementRecord},
  store::EngagementStore,
  tracker::{PIXEL, PIXEL_CONTENT_TYPE},
};
use serde::Deserialize;

use crate::{AppState, auth::Authenticated, error::ApiError};

/// Response header carrying the assigned email id.
pub const EMAIL_ID_HEADER: &str = "x-email-id";

// ─── Client metadata ─────────────────────────────────────────────────────────

/// User agent and client address of `req`. The first `X-Forwarded-For` entry
/// wins over the socket peer.
pub fn client_info(req: &Request<Body>) -> ClientInfo {
  let headers = req.headers();
  let forwarded = header_str(headers, "x-forwarded-for")
    .and_then(|v| v.split(',').next())
    .map(str::trim)
    .filter(|ip| !ip.is_empty())
    .map(str::to_owned);
  let peer = req
    .extensions()
    .get::<ConnectInfo<SocketAddr>>()
    .map(|ConnectInfo(addr)| addr.ip().to_string());

  ClientInfo {
    user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_owned),
    client_ip:  forwarded.or(peer),
  }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
  headers.get(name).and_then(|v| v.to_str().ok())
}

// ─── Append ──────────────────────────────────────────────────────────────────

/// `POST <append_path>` body. `html` is standard base64.
#[derive(Debug, Deserialize)]
pub struct AppendBody {
  #[serde(flatten)]
  pub pii:  Pii,
  pub html: String,
}

pub async fn append<S>(State(state): State<AppState<S>>, req: Request<Body>) -> Response
where
  S: EngagementStore + 'static,
{
  match prepare(&state, req).await {
    Ok(response) => response,
    Err(err) => {
      if let ApiError::Core(core) = &err {
        state.tracker.report("append", core);
      }
      err.into_response()
    }
  }
}

async fn prepare<S>(state: &AppState<S>, req: Request<Body>) -> Result<Response, ApiError>
where
  S: EngagementStore + 'static,
{
  if req.method() != Method::POST {
    return Err(ApiError::MethodNotAllowed);
  }

  let is_json = header_str(req.headers(), header::CONTENT_TYPE.as_str())
    .and_then(|v| v.split(';').next())
    .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
  if !is_json {
    return Err(ApiError::BadRequest("expected Content-Type: application/json".into()));
  }

  let client = client_info(&req);
  let bytes = axum::body::to_bytes(req.into_body(), state.config.max_body_bytes)
    .await
    .map_err(|_| ApiError::PayloadTooLarge)?;

  let body: AppendBody = serde_json::from_slice(&bytes)
    .map_err(|e| ApiError::BadRequest(format!("malformed body: {e}")))?;
  let raw = STANDARD
    .decode(body.html.trim())
    .map_err(|e| ApiError::BadRequest(format!("`html` is not valid base64: {e}")))?;
  let html = String::from_utf8(raw)
    .map_err(|_| ApiError::BadRequest("`html` is not valid UTF-8".into()))?;

  let prepared = state.tracker.prepare_outbound(&html, body.pii, client).await?;

  let mut response = (
    [(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
    prepared.html,
  )
    .into_response();
  if let Some(id) = prepared.pii.email_id()
    && let Ok(value) = HeaderValue::from_str(id)
  {
    response.headers_mut().insert(EMAIL_ID_HEADER, value);
  }
  Ok(response)
}

// ─── Serve ───────────────────────────────────────────────────────────────────

/// `GET <serve_path>?tr=…`: the pixel, whatever happened to the hit.
/// Image proxies probing with `HEAD` get the same response without a hit.
pub async fn serve<S>(State(state): State<AppState<S>>, req: Request<Body>) -> Response
where
  S: EngagementStore + 'static,
{
  if req.method() == Method::HEAD {
    return pixel();
  }
  if req.method() != Method::GET {
    return ApiError::MethodNotAllowed.into_response();
  }

  let client = client_info(&req);
  let target = req
    .uri()
    .path_and_query()
    .map_or_else(|| req.uri().path().to_owned(), |pq| pq.as_str().to_owned());

  if let Err(err) = state.tracker.handle_hit(&target, client).await {
    state.tracker.report("serve", &err);
  }
  pixel()
}

fn pixel() -> Response {
  (
    StatusCode::OK,
    [
      (header::CONTENT_TYPE, PIXEL_CONTENT_TYPE),
      (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate, max-age=0"),
    ],
    PIXEL,
  )
    .into_response()
}

// ─── Engagement ──────────────────────────────────────────────────────────────

/// `GET /engagements/{email_id}`
pub async fn engagement<S>(
  _auth: Authenticated,
  State(state): State<AppState<S>>,
  Path(email_id): Path<String>,
) -> Result<Json<EngagementRecord>, ApiError>
where
  S: EngagementStore + 'static,
{
  state
    .tracker
    .engagement(&email_id)
    .await?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("no engagement record for {email_id}")))
}
