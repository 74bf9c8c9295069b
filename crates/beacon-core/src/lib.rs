//! Core types, capabilities and the tracking facade for Beacon.
//!
//! This crate is free of HTTP and database dependencies. Storage backends
//! (e.g. `beacon-store-sqlite`) implement [`store::EngagementStore`]; the HTTP
//! layer (`beacon-server`) drives a [`tracker::Tracker`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod codec;
pub mod error;
pub mod machine;
pub mod pii;
pub mod record;
pub mod sink;
pub mod store;
pub mod tracker;

pub use error::{CodecError, Error, Result, StateError};
