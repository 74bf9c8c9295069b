//! HTTP layer for Beacon.
//!
//! Exposes an axum [`Router`] with the append and serve endpoints, backed by
//! a [`Tracker`] over any [`EngagementStore`]. The engagement read API sits
//! behind HTTP Basic auth.

pub mod auth;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Router,
  routing::{any, get},
};
use auth::AuthConfig;
use beacon_core::{
  codec::RsaCodec,
  store::EngagementStore,
  tracker::{Tracker, TrackerConfig},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use url::Url;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `BEACON_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "defaults::host")]
  pub host:             String,
  #[serde(default = "defaults::port")]
  pub port:             u16,
  /// Public origin tracking URLs point at.
  #[serde(default = "defaults::base_url")]
  pub base_url:         String,
  #[serde(default = "defaults::append_path")]
  pub append_path:      String,
  #[serde(default = "defaults::serve_path")]
  pub serve_path:       String,
  /// SQLite database file; records are kept in memory when unset.
  #[serde(default)]
  pub store_path:       Option<PathBuf>,
  /// PEM private key; generated (and written here) when the file is missing.
  #[serde(default)]
  pub private_key_path: Option<PathBuf>,
  #[serde(default = "defaults::key_bits")]
  pub key_bits:         usize,
  #[serde(default = "defaults::timeout_ms")]
  pub timeout_ms:       u64,
  #[serde(default = "defaults::max_body_bytes")]
  pub max_body_bytes:   usize,
  /// Basic-auth user for `GET /engagements/…`; the read API refuses every
  /// request unless both auth fields are set.
  #[serde(default)]
  pub auth_username:      Option<String>,
  /// argon2 PHC string, see `beacon --hash-password`.
  #[serde(default)]
  pub auth_password_hash: Option<String>,
}

mod defaults {
  pub fn host() -> String { "127.0.0.1".to_string() }
  pub fn port() -> u16 { 8080 }
  pub fn base_url() -> String { "http://localhost:8080".to_string() }
  pub fn append_path() -> String { "/append".to_string() }
  pub fn serve_path() -> String { "/serve".to_string() }
  pub fn key_bits() -> usize { beacon_core::codec::RsaCodec::DEFAULT_BITS }
  pub fn timeout_ms() -> u64 { 5_000 }
  pub fn max_body_bytes() -> usize { 8 * 1024 * 1024 }
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:             defaults::host(),
      port:             defaults::port(),
      base_url:         defaults::base_url(),
      append_path:      defaults::append_path(),
      serve_path:       defaults::serve_path(),
      store_path:       None,
      private_key_path: None,
      key_bits:         defaults::key_bits(),
      timeout_ms:       defaults::timeout_ms(),
      max_body_bytes:   defaults::max_body_bytes(),
      auth_username:      None,
      auth_password_hash: None,
    }
  }
}

impl ServerConfig {
  /// Validate the endpoint settings and build the tracker configuration.
  pub fn tracker_config(&self) -> Result<TrackerConfig, String> {
    let base_url = Url::parse(&self.base_url)
      .map_err(|e| format!("invalid base_url {:?}: {e}", self.base_url))?;
    for (name, path) in [("append_path", &self.append_path), ("serve_path", &self.serve_path)] {
      if !path.starts_with('/') {
        return Err(format!("{name} must start with '/': {path:?}"));
      }
    }
    if self.append_path == self.serve_path {
      return Err("append_path and serve_path must differ".to_string());
    }
    if self.key_bits < RsaCodec::DEFAULT_BITS {
      return Err(format!("key_bits must be at least {}", RsaCodec::DEFAULT_BITS));
    }
    if self.timeout_ms == 0 {
      return Err("timeout_ms must be greater than zero".to_string());
    }

    Ok(TrackerConfig {
      base_url,
      append_path: self.append_path.clone(),
      serve_path: self.serve_path.clone(),
      timeout: Duration::from_millis(self.timeout_ms),
    })
  }

  /// Read-API credentials. `None` when neither field is set; setting only
  /// one of them is an error.
  pub fn auth_config(&self) -> Result<Option<AuthConfig>, String> {
    match (&self.auth_username, &self.auth_password_hash) {
      (Some(username), Some(password_hash)) => {
        argon2::PasswordHash::new(password_hash)
          .map_err(|e| format!("auth_password_hash is not a PHC string: {e}"))?;
        Ok(Some(AuthConfig {
          username:      username.clone(),
          password_hash: password_hash.clone(),
        }))
      }
      (None, None) => Ok(None),
      _ => Err("auth_username and auth_password_hash must be set together".to_string()),
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S> {
  pub tracker: Tracker<S>,
  pub config:  Arc<ServerConfig>,
  /// `None` disables the read API.
  pub auth:    Option<Arc<AuthConfig>>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      tracker: self.tracker.clone(),
      config:  Arc::clone(&self.config),
      auth:    self.auth.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the axum [`Router`] for the tracking server.
///
/// Routes come from the tracker's configured paths, which must start with
/// `/` (see [`ServerConfig::tracker_config`]).
pub fn router<S>(state: AppState<S>) -> Router
where
  S: EngagementStore + 'static,
{
  let append_path = state.tracker.config().append_path.clone();
  let serve_path = state.tracker.config().serve_path.clone();

  Router::new()
    .route(&append_path,               any(handlers::append::<S>))
    .route(&serve_path,                any(handlers::serve::<S>))
    .route("/engagements/{email_id}",  get(handlers::engagement::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::sync::LazyLock;

  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
  use auth::AuthConfig;
use beacon_core::{
    codec::Codec,
    record::Status,
    sink::MemorySink,
    tracker::PIXEL,
  };
  use beacon_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use super::*;
  use crate::handlers::EMAIL_ID_HEADER;

  const TEST_KEY_PEM: &str = include_str!("../../beacon-core/testdata/test_key.pem");

  static CODEC: LazyLock<Arc<RsaCodec>> =
    LazyLock::new(|| Arc::new(RsaCodec::from_pem(TEST_KEY_PEM).unwrap()));

  static AUTH: LazyLock<Arc<AuthConfig>> = LazyLock::new(|| {
    Arc::new(AuthConfig {
      username:      "ops".to_string(),
      password_hash: auth::hash_password("hunter2").unwrap(),
    })
  });

  fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", B64.encode(format!("{user}:{pass}")))
  }

  async fn make_state() -> (AppState<SqliteStore>, Arc<MemorySink>) {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let config = ServerConfig {
      base_url: "https://t.example.com".to_string(),
      ..ServerConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let codec: Arc<dyn Codec> = CODEC.clone();
    let tracker = Tracker::new(
      codec,
      Arc::new(store),
      sink.clone(),
      config.tracker_config().unwrap(),
    );
    let state = AppState {
      tracker,
      config: Arc::new(config),
      auth: Some(AUTH.clone()),
    };
    (state, sink)
  }

  async fn oneshot_raw(
    state:   AppState<SqliteStore>,
    method:  &str,
    uri:     &str,
    headers: Vec<(&str, &str)>,
    body:    Vec<u8>,
  ) -> axum::response::Response {
    let mut builder = Request::builder().method(method).uri(uri);
    for (k, v) in headers {
      builder = builder.header(k, v);
    }
    let req = builder.body(Body::from(body)).unwrap();
    router(state).oneshot(req).await.unwrap()
  }

  async fn post_json(state: AppState<SqliteStore>, body: Value) -> axum::response::Response {
    oneshot_raw(
      state,
      "POST",
      "/append",
      vec![("content-type", "application/json")],
      serde_json::to_vec(&body).unwrap(),
    )
    .await
  }

  async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
  }

  fn append_body(html: &str) -> Value {
    json!({
      "sender_id": "s1",
      "sender_email": "a@x.com",
      "recv_email": "b@y.com",
      "html": B64.encode(html),
    })
  }

  /// `src` of the single pixel in `html`, as a path and query.
  fn pixel_target(html: &str) -> String {
    let start = html.find("src=\"").unwrap() + "src=\"".len();
    let end = start + html[start..].find('"').unwrap();
    let url = Url::parse(&html[start..end]).unwrap();
    format!("{}?{}", url.path(), url.query().unwrap())
  }

  // ── Append ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn append_returns_rendered_html() {
    let (state, sink) = make_state().await;
    let resp = post_json(state.clone(), append_body("<p>hi</p>")).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let ctype = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(ctype.starts_with("text/html"), "{ctype}");
    let email_id = resp.headers()[EMAIL_ID_HEADER].to_str().unwrap().to_owned();

    let html = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(html.starts_with("<div><p>hi</p><img src=\"https://t.example.com/serve?tr="));
    assert_eq!(html.matches("<img").count(), 1);

    let record = state.tracker.engagement(&email_id).await.unwrap().unwrap();
    assert_eq!(record.status, Status::Attached);
    assert!(sink.reports().is_empty());
  }

  #[tokio::test]
  async fn append_then_serve_opens_the_record() {
    let (state, sink) = make_state().await;
    let resp = post_json(state.clone(), append_body("<html><body>x</body></html>")).await;
    let email_id = resp.headers()[EMAIL_ID_HEADER].to_str().unwrap().to_owned();
    let html = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(html.starts_with("<html><body>x</body><img src=\"https://t.example.com/serve?tr="));
    assert!(html.ends_with("</html>"));

    let resp = oneshot_raw(
      state.clone(),
      "GET",
      &pixel_target(&html),
      vec![("user-agent", "Mail/16.0"), ("x-forwarded-for", "198.51.100.7, 10.0.0.1")],
      vec![],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(body_bytes(resp).await, PIXEL);

    let credentials = basic("ops", "hunter2");
    let resp = oneshot_raw(
      state,
      "GET",
      &format!("/engagements/{email_id}"),
      vec![("authorization", credentials.as_str())],
      vec![],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let record: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(record["status"], "opened");
    assert_eq!(record["open_count"], 1);
    let serve = record["history"]
      .as_object()
      .unwrap()
      .iter()
      .find(|(key, _)| key.starts_with("serve_"))
      .map(|(_, event)| event.clone())
      .unwrap();
    assert_eq!(serve["client_ip"], "198.51.100.7");
    assert_eq!(serve["user_agent"], "Mail/16.0");
    assert!(sink.reports().is_empty());
  }

  #[tokio::test]
  async fn supplied_email_id_is_echoed() {
    let (state, _) = make_state().await;
    let mut body = append_body("<p>x</p>");
    body["email_id"] = json!("msg-7");
    let resp = post_json(state, body).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[EMAIL_ID_HEADER], "msg-7");
  }

  #[tokio::test]
  async fn append_rejects_bad_requests() {
    let (state, _) = make_state().await;

    let resp = oneshot_raw(
      state.clone(),
      "POST",
      "/append",
      vec![("content-type", "text/plain")],
      serde_json::to_vec(&append_body("<p>x</p>")).unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = oneshot_raw(
      state.clone(),
      "POST",
      "/append",
      vec![("content-type", "application/json")],
      b"{not json".to_vec(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let mut missing = append_body("<p>x</p>");
    missing.as_object_mut().unwrap().remove("recv_email");
    assert_eq!(post_json(state.clone(), missing).await.status(), StatusCode::BAD_REQUEST);

    let mut empty = append_body("<p>x</p>");
    empty["sender_id"] = json!("");
    assert_eq!(post_json(state.clone(), empty).await.status(), StatusCode::BAD_REQUEST);

    let mut bad_b64 = append_body("<p>x</p>");
    bad_b64["html"] = json!("%%%");
    assert_eq!(post_json(state.clone(), bad_b64).await.status(), StatusCode::BAD_REQUEST);

    let mut not_utf8 = append_body("");
    not_utf8["html"] = json!(B64.encode([0xff, 0xfe, 0x3c]));
    assert_eq!(post_json(state.clone(), not_utf8).await.status(), StatusCode::BAD_REQUEST);

    let resp = oneshot_raw(state, "GET", "/append", vec![], vec![]).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn unparseable_html_is_a_server_error() {
    let (state, sink) = make_state().await;
    let resp = post_json(state, append_body("<p>x</p><script>never closed")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert!(body["error"].as_str().unwrap().contains("html"));
    assert_eq!(sink.reports().len(), 1);
  }

  // ── Serve ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn serve_always_returns_the_pixel() {
    let (state, sink) = make_state().await;
    for uri in ["/serve", "/serve?tr=", "/serve?tr=definitely-not-valid"] {
      let resp = oneshot_raw(state.clone(), "GET", uri, vec![], vec![]).await;
      assert_eq!(resp.status(), StatusCode::OK, "{uri}");
      assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
      assert!(resp.headers().contains_key(header::CACHE_CONTROL));
      assert_eq!(body_bytes(resp).await, PIXEL);
    }
    let reports = sink.reports();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|(op, _)| *op == "serve"));
  }

  #[tokio::test]
  async fn serve_rejects_other_methods() {
    let (state, _) = make_state().await;
    let resp = oneshot_raw(state, "POST", "/serve?tr=x", vec![], vec![]).await;
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
  }

  #[tokio::test]
  async fn head_on_serve_answers_without_recording() {
    let (state, sink) = make_state().await;
    let resp = post_json(state.clone(), append_body("<p>x</p>")).await;
    let email_id = resp.headers()[EMAIL_ID_HEADER].to_str().unwrap().to_owned();
    let html = String::from_utf8(body_bytes(resp).await).unwrap();

    let resp = oneshot_raw(state.clone(), "HEAD", &pixel_target(&html), vec![], vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");

    let record = state.tracker.engagement(&email_id).await.unwrap().unwrap();
    assert_eq!(record.status, Status::Attached);
    assert_eq!(record.open_count, 0);
    assert!(sink.reports().is_empty());
  }

  // ── Engagement ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn unknown_engagement_is_404() {
    let (state, _) = make_state().await;
    let credentials = basic("ops", "hunter2");
    let resp = oneshot_raw(
      state,
      "GET",
      "/engagements/nope",
      vec![("authorization", credentials.as_str())],
      vec![],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn engagement_requires_credentials() {
    let (state, _) = make_state().await;
    let mut body = append_body("<p>secret contract terms</p>");
    body["email_id"] = json!("msg-1");
    assert_eq!(post_json(state.clone(), body).await.status(), StatusCode::OK);

    let wrong = basic("ops", "guess");
    for headers in [vec![], vec![("authorization", wrong.as_str())]] {
      let resp = oneshot_raw(state.clone(), "GET", "/engagements/msg-1", headers, vec![]).await;
      assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
      assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
      let body = String::from_utf8(body_bytes(resp).await).unwrap();
      assert!(!body.contains("secret contract terms"), "{body}");
    }
  }

  #[tokio::test]
  async fn engagement_is_closed_without_configured_auth() {
    let (mut state, _) = make_state().await;
    state.auth = None;
    let credentials = basic("ops", "hunter2");
    let resp = oneshot_raw(
      state,
      "GET",
      "/engagements/nope",
      vec![("authorization", credentials.as_str())],
      vec![],
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  // ── Configuration ───────────────────────────────────────────────────────────

  #[test]
  fn config_rejects_unusable_values() {
    assert!(ServerConfig::default().tracker_config().is_ok());

    let relative = ServerConfig { serve_path: "serve".into(), ..ServerConfig::default() };
    assert!(relative.tracker_config().is_err());

    let same = ServerConfig { append_path: "/serve".into(), ..ServerConfig::default() };
    assert!(same.tracker_config().is_err());

    let bad_url = ServerConfig { base_url: "not a url".into(), ..ServerConfig::default() };
    assert!(bad_url.tracker_config().is_err());

    let weak = ServerConfig { key_bits: 512, ..ServerConfig::default() };
    assert!(weak.tracker_config().is_err());

    let instant = ServerConfig { timeout_ms: 0, ..ServerConfig::default() };
    assert!(instant.tracker_config().is_err());
  }

  #[test]
  fn auth_config_requires_both_fields() {
    assert!(ServerConfig::default().auth_config().unwrap().is_none());

    let user_only = ServerConfig {
      auth_username: Some("ops".into()),
      ..ServerConfig::default()
    };
    assert!(user_only.auth_config().is_err());

    let not_phc = ServerConfig {
      auth_username:      Some("ops".into()),
      auth_password_hash: Some("hunter2".into()),
      ..ServerConfig::default()
    };
    assert!(not_phc.auth_config().is_err());

    let both = ServerConfig {
      auth_username:      Some("ops".into()),
      auth_password_hash: Some(AUTH.password_hash.clone()),
      ..ServerConfig::default()
    };
    assert_eq!(both.auth_config().unwrap().unwrap().username, "ops");
  }

  #[test]
  fn config_deserialises_with_defaults() {
    let settings = config::Config::builder()
      .add_source(config::File::from_str(
        "base_url = \"https://mail.example.org\"\nstore_path = \"/var/lib/beacon.db\"",
        config::FileFormat::Toml,
      ))
      .build()
      .unwrap();
    let cfg: ServerConfig = settings.try_deserialize().unwrap();
    assert_eq!(cfg.base_url, "https://mail.example.org");
    assert_eq!(cfg.serve_path, "/serve");
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.store_path, Some(PathBuf::from("/var/lib/beacon.db")));
    assert_eq!(cfg.private_key_path, None);
  }
}
