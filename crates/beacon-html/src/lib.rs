//! HTML parsing and tracking-pixel injection for Beacon.
//!
//! Pure synchronous; no HTTP, crypto or database dependencies. Documents are
//! parsed into an index-based arena ([`Document`]) that keeps each node's
//! source text, so injecting a pixel changes nothing but the appended
//! element (and, for fragments, a wrapping `<div>`).
//!
//! # Quick start
//!
//! ```
//! let html = beacon_html::inject_pixel("<p>hi</p>", "https://t.example/px?tr=abc").unwrap();
//! assert!(html.starts_with("<div><p>hi</p><img src=\"https://t.example/px?tr=abc\""));
//! ```

pub mod error;
mod inject;
mod parse;
mod serialize;
pub mod tree;

pub use error::{Error, Result};
pub use inject::{InjectError, inject_pixel, pixel_element};
pub use parse::{MAX_DEPTH, parse};
pub use serialize::serialize;
pub use tree::{Attribute, Document, Element, Node, NodeId, NodeKind};
