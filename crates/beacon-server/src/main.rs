//! beacon server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `BEACON_*` environment variables, loads or generates the RSA key, opens
//! the engagement store and serves the tracking endpoints over HTTP.
//!
//! # Key generation
//!
//! To write a fresh PKCS#1 private key for `private_key_path`:
//!
//! ```text
//! cargo run -p beacon-server --bin beacon -- --generate-key beacon.pem
//! ```
//!
//! # Read API credentials
//!
//! `GET /engagements/{email_id}` needs `auth_username` and
//! `auth_password_hash`. To generate the argon2 PHC string for the latter:
//!
//! ```text
//! cargo run -p beacon-server --bin beacon -- --hash-password
//! ```

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use beacon_core::{
  codec::{Codec, RsaCodec},
  sink::TracingSink,
  store::{EngagementStore, MemoryStore},
  tracker::{Tracker, TrackerConfig},
};
use beacon_server::{AppState, ServerConfig, auth::hash_password};
use beacon_store_sqlite::SqliteStore;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Beacon email engagement tracker")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Write a freshly generated private key to PATH and exit.
  #[arg(long, value_name = "PATH")]
  generate_key: Option<PathBuf>,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: hash a password and exit.
  if cli.hash_password {
    let password = read_password()?;
    let hash = hash_password(&password).map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?;
    println!("{hash}");
    return Ok(());
  }

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("BEACON"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Helper mode: generate a key and exit.
  if let Some(path) = cli.generate_key {
    let path = expand_tilde(&path);
    let codec = generate_codec(server_cfg.key_bits).await?;
    codec
      .write_private_key(&path)
      .with_context(|| format!("failed to write key to {path:?}"))?;
    println!("wrote {}-bit private key to {}", server_cfg.key_bits, path.display());
    return Ok(());
  }

  let tracker_cfg = server_cfg
    .tracker_config()
    .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
  let codec = load_codec(&server_cfg).await?;

  match &server_cfg.store_path {
    Some(path) => {
      let store_path = expand_tilde(path);
      let store = SqliteStore::open(&store_path)
        .await
        .with_context(|| format!("failed to open store at {store_path:?}"))?;
      run(store, codec, server_cfg, tracker_cfg).await
    }
    None => {
      tracing::warn!("no store_path configured; engagement records are kept in memory");
      run(MemoryStore::new(), codec, server_cfg, tracker_cfg).await
    }
  }
}

async fn run<S>(
  store: S,
  codec: Arc<dyn Codec>,
  server_cfg: ServerConfig,
  tracker_cfg: TrackerConfig,
) -> anyhow::Result<()>
where
  S: EngagementStore + 'static,
{
  let auth = server_cfg
    .auth_config()
    .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?
    .map(Arc::new);
  if auth.is_none() {
    tracing::warn!("no read API credentials configured; /engagements is closed");
  }

  let tracker = Tracker::new(codec, Arc::new(store), Arc::new(TracingSink), tracker_cfg);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  let state = AppState { tracker, config: Arc::new(server_cfg), auth };
  let app = beacon_server::router(state);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

  Ok(())
}

/// Load the key from `private_key_path`, generating it there on first start.
/// Without a path the key only lives as long as the process.
async fn load_codec(server_cfg: &ServerConfig) -> anyhow::Result<Arc<dyn Codec>> {
  let Some(path) = &server_cfg.private_key_path else {
    tracing::warn!("no private_key_path configured; tracking URLs will not survive a restart");
    return Ok(Arc::new(generate_codec(server_cfg.key_bits).await?));
  };

  let path = expand_tilde(path);
  if path.exists() {
    let codec = RsaCodec::load(&path)?;
    tracing::info!(?codec, "loaded private key from {}", path.display());
    return Ok(Arc::new(codec));
  }

  let codec = generate_codec(server_cfg.key_bits).await?;
  codec
    .write_private_key(&path)
    .with_context(|| format!("failed to write key to {path:?}"))?;
  tracing::info!(?codec, "generated private key at {}", path.display());
  Ok(Arc::new(codec))
}

/// Key generation is CPU-bound; keep it off the async workers.
async fn generate_codec(bits: usize) -> anyhow::Result<RsaCodec> {
  let codec = tokio::task::spawn_blocking(move || RsaCodec::generate(bits))
    .await
    .context("key generation task failed")??;
  Ok(codec)
}

fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("failed to listen for ctrl-c: {e}");
    std::future::pending::<()>().await;
  }
  tracing::info!("shutting down");
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
