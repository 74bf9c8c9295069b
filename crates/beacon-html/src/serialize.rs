//! Tree → string serialization.
//!
//! Each node writes back the source text it was parsed from; synthetic nodes
//! write the tags rendered when they were built.

use crate::tree::{Document, NodeId, NodeKind};

/// Serialize the whole document.
pub fn serialize(doc: &Document) -> String {
  let mut out = String::new();
  for child in doc.node(Document::ROOT).children() {
    write_node(doc, *child, &mut out);
  }
  out
}

fn write_node(doc: &Document, id: NodeId, out: &mut String) {
  let node = doc.node(id);
  match &node.kind {
    NodeKind::Document => {}
    NodeKind::Doctype(s)
    | NodeKind::Comment(s)
    | NodeKind::Text(s)
    | NodeKind::Raw(s) => out.push_str(s),
    NodeKind::Element(el) => {
      out.push_str(el.start_tag());
      for child in node.children() {
        write_node(doc, *child, out);
      }
      if let Some(end) = el.end_tag() {
        out.push_str(end);
      }
    }
  }
}
