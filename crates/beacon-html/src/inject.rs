//! Tracking pixel injection.

use thiserror::Error;

use crate::{
  error::Error,
  parse::parse,
  serialize::serialize,
  tree::{Attribute, Document, Element, NodeKind},
};

/// Injection failed; the message must not be sent as if it were tracked.
///
/// Carries the caller's HTML back unchanged.
#[derive(Debug, Error)]
#[error("cannot inject tracking pixel: {source}")]
pub struct InjectError {
  pub original: String,
  #[source]
  pub source:   Error,
}

impl InjectError {
  pub fn into_original(self) -> String { self.original }
}

/// The invisible 1×1 image element referencing `tracking_url`.
pub fn pixel_element(tracking_url: &str) -> Element {
  let attr = |name: &str, value: &str| Attribute {
    name:  name.to_owned(),
    value: Some(value.to_owned()),
  };
  Element::new("img", vec![
    attr("src", tracking_url),
    attr("width", "1"),
    attr("height", "1"),
    attr("alt", ""),
    attr("style", "border:0"),
  ])
}

/// Append a tracking pixel for `tracking_url` to `raw_html`.
///
/// A full document (a single `<html>` root element) receives the pixel as
/// the root's last child. Anything else is a fragment and is first wrapped
/// in a synthetic `<div>` so the pixel becomes a sibling of the original
/// content. A leading doctype stays outside the wrapper. Existing nodes are
/// never reordered or modified.
pub fn inject_pixel(raw_html: &str, tracking_url: &str) -> Result<String, InjectError> {
  let mut doc = parse(raw_html).map_err(|source| InjectError {
    original: raw_html.to_owned(),
    source,
  })?;

  let document_root = doc.root_element().filter(|id| {
    doc.node(*id).as_element().is_some_and(|e| e.name == "html")
  });
  let root = match document_root {
    Some(root) => root,
    None => {
      let skip = doc
        .node(Document::ROOT)
        .children()
        .iter()
        .position(|id| matches!(doc.node(*id).kind, NodeKind::Doctype(_)))
        .map_or(0, |i| i + 1);
      doc.wrap_children(
        Document::ROOT,
        skip,
        NodeKind::Element(Element::new("div", vec![])),
      )
    }
  };

  doc.append(root, NodeKind::Element(pixel_element(tracking_url)));
  Ok(serialize(&doc))
}
