//! Arena-backed document tree.
//!
//! Every node lives in a single `Vec` owned by [`Document`] and is addressed
//! by its [`NodeId`]. Parent/child links are indices, so the tree can be
//! extended without shared mutable references. Nodes parsed from input keep
//! their exact source text, which lets the serializer reproduce the original
//! markup byte for byte.

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Index of a node inside its owning [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

// ─── Element ─────────────────────────────────────────────────────────────────

/// Elements that never have children or an end tag.
pub(crate) const VOID_ELEMENTS: &[&str] = &[
  "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
  "param", "source", "track", "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
pub(crate) const RAW_TEXT_ELEMENTS: &[&str] =
  &["script", "style", "textarea", "title"];

pub(crate) fn is_void(name: &str) -> bool { VOID_ELEMENTS.contains(&name) }

pub(crate) fn is_raw_text(name: &str) -> bool {
  RAW_TEXT_ELEMENTS.contains(&name)
}

/// A single attribute as written in the start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
  /// Lowercased attribute name.
  pub name:  String,
  /// Value without surrounding quotes, entities left as written. `None` for
  /// bare attributes such as `disabled`.
  pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
  /// Lowercased tag name.
  pub name:          String,
  pub attrs:         Vec<Attribute>,
  /// The start tag exactly as it appears in the output.
  pub(crate) start:  String,
  /// The end tag exactly as it appears in the output, if any.
  pub(crate) end:    Option<String>,
}

impl Element {
  /// Build a synthetic element. The start tag is rendered from `attrs`, with
  /// values attribute-escaped; non-void elements get a matching end tag.
  pub fn new(name: &str, attrs: Vec<Attribute>) -> Self {
    let name = name.to_ascii_lowercase();
    let mut start = format!("<{name}");
    for attr in &attrs {
      start.push(' ');
      start.push_str(&attr.name);
      if let Some(value) = &attr.value {
        start.push_str("=\"");
        start.push_str(&quick_xml::escape::escape(value.as_str()));
        start.push('"');
      }
    }
    start.push('>');
    let end = (!is_void(&name)).then(|| format!("</{name}>"));
    Self { name, attrs, start, end }
  }

  /// Look up an attribute value by (case-insensitive) name. Bare attributes
  /// yield `Some("")`.
  pub fn attr(&self, name: &str) -> Option<&str> {
    self
      .attrs
      .iter()
      .find(|a| a.name.eq_ignore_ascii_case(name))
      .map(|a| a.value.as_deref().unwrap_or(""))
  }

  /// The start tag as it will be serialized.
  pub fn start_tag(&self) -> &str { &self.start }

  /// The end tag as it will be serialized; `None` for void elements and for
  /// elements whose end tag was omitted in the source.
  pub fn end_tag(&self) -> Option<&str> { self.end.as_deref() }
}

// ─── Node ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
  /// The invisible root of every document; always [`Document::ROOT`].
  Document,
  /// `<!DOCTYPE …>`, verbatim.
  Doctype(String),
  /// `<!-- … -->` or a bogus comment such as `<? … >`, verbatim.
  Comment(String),
  /// Character data, verbatim (entities are not decoded).
  Text(String),
  /// Markup kept as-is without structural meaning, e.g. a stray end tag or a
  /// CDATA section.
  Raw(String),
  Element(Element),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
  pub kind:           NodeKind,
  pub(crate) parent:  Option<NodeId>,
  pub(crate) children: Vec<NodeId>,
}

impl Node {
  pub fn parent(&self) -> Option<NodeId> { self.parent }

  pub fn children(&self) -> &[NodeId] { &self.children }

  pub fn as_element(&self) -> Option<&Element> {
    match &self.kind {
      NodeKind::Element(e) => Some(e),
      _ => None,
    }
  }

  /// Whitespace-only text, comments and the doctype do not count as content
  /// when deciding whether a document has a single root.
  pub(crate) fn is_insignificant(&self) -> bool {
    match &self.kind {
      NodeKind::Doctype(_) | NodeKind::Comment(_) => true,
      NodeKind::Text(t) => t.trim().is_empty(),
      _ => false,
    }
  }
}

// ─── Document ────────────────────────────────────────────────────────────────

/// An owned HTML document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
  nodes: Vec<Node>,
}

impl Default for Document {
  fn default() -> Self { Self::new() }
}

impl Document {
  pub const ROOT: NodeId = NodeId(0);

  pub fn new() -> Self {
    Self {
      nodes: vec![Node {
        kind:     NodeKind::Document,
        parent:   None,
        children: Vec::new(),
      }],
    }
  }

  pub fn node(&self, id: NodeId) -> &Node { &self.nodes[id.0] }

  pub fn len(&self) -> usize { self.nodes.len() }

  pub fn is_empty(&self) -> bool { self.nodes.len() == 1 }

  /// Allocate a detached node.
  pub(crate) fn alloc(&mut self, kind: NodeKind) -> NodeId {
    let id = NodeId(self.nodes.len());
    self.nodes.push(Node { kind, parent: None, children: Vec::new() });
    id
  }

  /// Allocate `kind` and append it as the last child of `parent`.
  pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
    let id = self.alloc(kind);
    self.nodes[id.0].parent = Some(parent);
    self.nodes[parent.0].children.push(id);
    id
  }

  pub(crate) fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
    match &mut self.nodes[id.0].kind {
      NodeKind::Element(e) => Some(e),
      _ => None,
    }
  }

  /// Move the children of `parent` from index `skip` onwards, in order,
  /// under a new node of `kind`, which becomes the last child of `parent`.
  pub(crate) fn wrap_children(
    &mut self,
    parent: NodeId,
    skip: usize,
    kind: NodeKind,
  ) -> NodeId {
    let wrapper = self.alloc(kind);
    let skip = skip.min(self.nodes[parent.0].children.len());
    let moved: Vec<NodeId> = self.nodes[parent.0].children.drain(skip..).collect();
    for child in &moved {
      self.nodes[child.0].parent = Some(wrapper);
    }
    self.nodes[wrapper.0].children = moved;
    self.nodes[wrapper.0].parent = Some(parent);
    self.nodes[parent.0].children.push(wrapper);
    wrapper
  }

  /// The single top-level element, if the document has exactly one and no
  /// other significant top-level content.
  pub fn root_element(&self) -> Option<NodeId> {
    let mut significant = self
      .node(Self::ROOT)
      .children
      .iter()
      .copied()
      .filter(|id| !self.node(*id).is_insignificant());
    let first = significant.next()?;
    if significant.next().is_some() {
      return None;
    }
    self.node(first).as_element().map(|_| first)
  }

  /// All nodes in document order, excluding the document node itself.
  pub fn descendants(&self) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(self.nodes.len().saturating_sub(1));
    let mut stack: Vec<NodeId> =
      self.node(Self::ROOT).children.iter().rev().copied().collect();
    while let Some(id) = stack.pop() {
      out.push(id);
      stack.extend(self.node(id).children.iter().rev().copied());
    }
    out
  }

  /// All elements named `name`, in document order.
  pub fn elements_named<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Iterator<Item = (NodeId, &'a Element)> + 'a {
    self.descendants().into_iter().filter_map(move |id| {
      self
        .node(id)
        .as_element()
        .filter(|e| e.name.eq_ignore_ascii_case(name))
        .map(|e| (id, e))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn synthetic_element_escapes_attribute_values() {
    let el = Element::new("IMG", vec![Attribute {
      name:  "src".into(),
      value: Some("https://t.example/p?a=1&b=\"2\"".into()),
    }]);
    assert_eq!(el.name, "img");
    assert_eq!(
      el.start_tag(),
      "<img src=\"https://t.example/p?a=1&amp;b=&quot;2&quot;\">"
    );
    assert_eq!(el.end_tag(), None);
  }

  #[test]
  fn non_void_synthetic_element_has_end_tag() {
    let el = Element::new("div", vec![]);
    assert_eq!(el.start_tag(), "<div>");
    assert_eq!(el.end_tag(), Some("</div>"));
  }

  #[test]
  fn append_links_parent_and_child() {
    let mut doc = Document::new();
    let div = doc.append(Document::ROOT, NodeKind::Element(Element::new("div", vec![])));
    let text = doc.append(div, NodeKind::Text("hi".into()));
    assert_eq!(doc.node(text).parent(), Some(div));
    assert_eq!(doc.node(div).children(), &[text]);
    assert_eq!(doc.root_element(), Some(div));
  }
}
