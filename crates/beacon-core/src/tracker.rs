//! The tracking facade: prepare outbound messages and handle pixel hits.

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, info};
use url::Url;

use crate::{
  CodecError, Error, Result, StateError,
  codec::{self, Codec},
  machine,
  pii::Pii,
  record::{Action, ClientInfo, EngagementEvent, EngagementRecord, FieldMap},
  sink::ErrorSink,
  store::EngagementStore,
};

/// Transparent 1×1 PNG returned for every serve hit.
pub const PIXEL: &[u8] = &[
  0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48,
  0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x04, 0x00, 0x00,
  0x00, 0xb5, 0x1c, 0x0c, 0x02, 0x00, 0x00, 0x00, 0x0b, 0x49, 0x44, 0x41, 0x54, 0x78,
  0xda, 0x63, 0x64, 0x60, 0x00, 0x00, 0x00, 0x06, 0x00, 0x02, 0x30, 0x81, 0xd0, 0x2f,
  0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

pub const PIXEL_CONTENT_TYPE: &str = "image/png";

/// Query parameter carrying the tracking reference.
pub const REFERENCE_PARAM: &str = "tr";

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrackerConfig {
  /// Public origin (and optional path prefix) tracking URLs point at.
  pub base_url:    Url,
  pub append_path: String,
  pub serve_path:  String,
  /// Upper bound for each codec and store call.
  pub timeout:     Duration,
}

impl TrackerConfig {
  pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

  pub fn new(base_url: Url) -> Self {
    Self {
      base_url,
      append_path: "/append".to_owned(),
      serve_path: "/serve".to_owned(),
      timeout: Self::DEFAULT_TIMEOUT,
    }
  }

  /// `<base_url><serve_path>`, without a query.
  pub fn serve_url(&self) -> Result<Url> {
    let joined = format!(
      "{}{}",
      self.base_url.as_str().trim_end_matches('/'),
      self.serve_path
    );
    Url::parse(&joined)
      .map_err(|e| Error::Validation(format!("invalid serve URL {joined:?}: {e}")))
  }

  /// The tracking URL for an encoded reference.
  pub fn tracking_url(&self, reference: &str) -> Result<Url> {
    let mut url = self.serve_url()?;
    url.query_pairs_mut().append_pair(REFERENCE_PARAM, reference);
    Ok(url)
  }
}

// ─── Facade ──────────────────────────────────────────────────────────────────

/// An outbound message with its pixel attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
  pub html:         String,
  /// The PII as encoded, `email_id` included.
  pub pii:          Pii,
  pub tracking_url: Url,
}

/// Ties the codec, the store and the error sink together.
pub struct Tracker<S> {
  codec:  Arc<dyn Codec>,
  store:  Arc<S>,
  sink:   Arc<dyn ErrorSink>,
  config: TrackerConfig,
}

impl<S> Clone for Tracker<S> {
  fn clone(&self) -> Self {
    Self {
      codec:  Arc::clone(&self.codec),
      store:  Arc::clone(&self.store),
      sink:   Arc::clone(&self.sink),
      config: self.config.clone(),
    }
  }
}

impl<S: EngagementStore> Tracker<S> {
  pub fn new(
    codec: Arc<dyn Codec>,
    store: Arc<S>,
    sink: Arc<dyn ErrorSink>,
    config: TrackerConfig,
  ) -> Self {
    Self { codec, store, sink, config }
  }

  pub fn config(&self) -> &TrackerConfig { &self.config }

  pub fn store(&self) -> &S { &self.store }

  /// Attach a tracking pixel to `html` and record the append.
  ///
  /// Assigns `email_id` if the PII has none. Every failure aborts; nothing is
  /// written unless the pixel was injected.
  pub async fn prepare_outbound(
    &self,
    html: &str,
    mut pii: Pii,
    client: ClientInfo,
  ) -> Result<Prepared> {
    pii.validate()?;
    let email_id = pii.assign_email_id().to_owned();

    let encoded = pii.clone();
    let reference = self
      .run_codec(move |codec| codec::encode_reference(codec, &encoded))
      .await?;
    let tracking_url = self.config.tracking_url(&reference)?;

    let html = beacon_html::inject_pixel(html, tracking_url.as_str())?;

    let event = EngagementEvent::new(Action::Append, client, Some(html.clone()));
    self.record(&email_id, event).await?;
    info!(%email_id, "prepared outbound message");

    Ok(Prepared { html, pii, tracking_url })
  }

  /// Handle a request for a tracking URL and return the pixel.
  ///
  /// `target` is the request URL, absolute or relative to the base URL.
  /// Validation and codec failures are returned. State failures are sent to
  /// the error sink and the pixel is returned anyway.
  pub async fn handle_hit(
    &self,
    target: &str,
    client: ClientInfo,
  ) -> Result<&'static [u8]> {
    let url = self
      .config
      .base_url
      .join(target)
      .map_err(|e| Error::Validation(format!("invalid request URL: {e}")))?;

    if !self.is_serve_path(url.path())? {
      return Err(Error::Validation(format!("unknown tracking endpoint {}", url.path())));
    }

    let reference = url
      .query_pairs()
      .find(|(key, _)| key == REFERENCE_PARAM)
      .map(|(_, value)| value.into_owned())
      .ok_or_else(|| Error::Validation("missing tracking reference `tr`".to_owned()))?;

    let pii = self
      .run_codec(move |codec| codec::decode_reference(codec, &reference))
      .await?;
    let Some(email_id) = pii.email_id() else {
      return Err(Error::Validation("tracking reference carries no email id".to_owned()));
    };

    let event = EngagementEvent::new(Action::Serve, client, None);
    match self.record(email_id, event).await {
      Ok(_) => debug!(%email_id, "recorded open"),
      Err(err @ Error::State(_)) => self.sink.report("serve", &err),
      Err(err) => return Err(err),
    }
    Ok(PIXEL)
  }

  /// The current engagement record for `email_id`, if any.
  pub async fn engagement(&self, email_id: &str) -> Result<Option<EngagementRecord>> {
    let fields = self.bounded(self.store.read(email_id.to_owned())).await?;
    fields
      .map(|fields| EngagementRecord::from_fields(email_id, &fields))
      .transpose()
  }

  /// Forward an error to the sink.
  pub fn report(&self, operation: &'static str, error: &Error) {
    self.sink.report(operation, error);
  }

  fn is_serve_path(&self, path: &str) -> Result<bool> {
    let serve_url = self.config.serve_url()?;
    Ok(path == serve_url.path() || path == self.config.serve_path)
  }

  /// Apply the transition for `event` through the store.
  async fn record(&self, email_id: &str, event: EngagementEvent) -> Result<FieldMap> {
    let update = machine::plan(&event)?;
    self
      .bounded(self.store.apply(email_id.to_owned(), update))
      .await?
      .ok_or_else(|| StateError::ServeBeforeAppend(email_id.to_owned()).into())
  }

  /// Run codec work on the blocking pool, bounded by the timeout.
  async fn run_codec<T, F>(&self, work: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&dyn Codec) -> Result<T> + Send + 'static,
  {
    let codec = Arc::clone(&self.codec);
    let after = self.config.timeout;
    let task = tokio::task::spawn_blocking(move || work(codec.as_ref()));
    match tokio::time::timeout(after, task).await {
      Err(_) => Err(CodecError::Timeout { after }.into()),
      Ok(Err(join)) => Err(CodecError::Interrupted(join.to_string()).into()),
      Ok(Ok(result)) => result,
    }
  }

  /// Bound a store call by the timeout.
  async fn bounded<T>(
    &self,
    call: impl Future<Output = Result<T, S::Error>>,
  ) -> Result<T> {
    let after = self.config.timeout;
    match tokio::time::timeout(after, call).await {
      Err(_) => Err(StateError::Timeout { after }.into()),
      Ok(result) => result.map_err(Into::into),
    }
  }
}
