//! Lenient HTML parser.
//!
//! Pipeline:
//!   raw &str
//!     └─ scan for `<` markup        → text runs / markup slices
//!          └─ parse_start_tag()     → Element (verbatim start tag)
//!               └─ open-element stack → arena tree
//!
//! The parser does not try to reproduce the HTML5 tree-construction
//! algorithm. It builds the tree the markup literally describes and keeps
//! every node's source text, so re-serializing an unmodified tree yields the
//! input unchanged. Only input that cannot be split into nodes at all is
//! rejected.
//!
//! The one structural liberty it takes is the optional end tag: a `<td>`,
//! `<tr>`, `<li>`, `<p>`, `<option>` (and friends) left open is closed when a
//! start tag that cannot nest inside it arrives, as browsers do. Such
//! elements keep `end == None`, so nothing is added to the output.

use crate::{
  error::{Error, Result},
  tree::{Attribute, Document, Element, NodeId, NodeKind, is_raw_text, is_void},
};

/// Maximum element nesting accepted by [`parse`].
pub const MAX_DEPTH: usize = 512;

/// Parse `input` into a [`Document`].
pub fn parse(input: &str) -> Result<Document> {
  Parser { input, pos: 0, doc: Document::new(), open: vec![Document::ROOT] }
    .run()
}

struct Parser<'a> {
  input: &'a str,
  pos:   usize,
  doc:   Document,
  /// Stack of open elements; the bottom is always the document node.
  open:  Vec<NodeId>,
}

impl<'a> Parser<'a> {
  fn run(mut self) -> Result<Document> {
    let input = self.input;
    let bytes = input.as_bytes();
    let mut text_start = 0;

    while let Some(offset) = input[self.pos..].find('<') {
      let at = self.pos + offset;
      let next = bytes.get(at + 1).copied();

      let is_markup = match next {
        Some(b'!' | b'?') => true,
        Some(b'/') => bytes.get(at + 2).is_some_and(u8::is_ascii_alphabetic),
        Some(c) => c.is_ascii_alphabetic(),
        None => false,
      };
      if !is_markup {
        // A lone `<` is character data.
        self.pos = at + 1;
        continue;
      }

      self.flush_text(text_start, at);
      self.pos = at;
      match next {
        Some(b'!') => self.markup_declaration()?,
        Some(b'?') => {
          let raw = self.take_until(">", "processing instruction")?;
          self.push(NodeKind::Comment(raw.to_owned()));
        }
        Some(b'/') => self.end_tag()?,
        _ => self.start_tag()?,
      }
      text_start = self.pos;
    }

    self.flush_text(text_start, input.len());
    Ok(self.doc)
  }

  // ── Helpers ───────────────────────────────────────────────────────────────

  fn current(&self) -> NodeId {
    // `open` never drops below the document node.
    self.open.last().copied().unwrap_or(Document::ROOT)
  }

  fn push(&mut self, kind: NodeKind) -> NodeId {
    let parent = self.current();
    self.doc.append(parent, kind)
  }

  fn flush_text(&mut self, from: usize, to: usize) {
    if from < to {
      let text = self.input[from..to].to_owned();
      self.push(NodeKind::Text(text));
    }
  }

  /// Consume from `pos` through the first occurrence of `terminator`,
  /// returning the consumed slice.
  fn take_until(&mut self, terminator: &str, what: &'static str) -> Result<&'a str> {
    let input = self.input;
    let start = self.pos;
    let end = input[start..]
      .find(terminator)
      .map(|i| start + i + terminator.len())
      .ok_or(Error::Unterminated { what, offset: start })?;
    self.pos = end;
    Ok(&input[start..end])
  }

  // ── Markup ────────────────────────────────────────────────────────────────

  fn markup_declaration(&mut self) -> Result<()> {
    let input = self.input;
    let rest = &input[self.pos..];
    if rest.starts_with("<!--") {
      let start = self.pos;
      self.pos += 4;
      self.take_until("-->", "comment")?;
      let raw = input[start..self.pos].to_owned();
      self.push(NodeKind::Comment(raw));
    } else if starts_with_ignore_case(rest, "<!doctype") {
      let raw = self.take_until(">", "doctype")?.to_owned();
      self.push(NodeKind::Doctype(raw));
    } else if rest.starts_with("<![CDATA[") {
      let raw = self.take_until("]]>", "CDATA section")?.to_owned();
      self.push(NodeKind::Raw(raw));
    } else {
      let raw = self.take_until(">", "markup declaration")?.to_owned();
      self.push(NodeKind::Comment(raw));
    }
    Ok(())
  }

  fn end_tag(&mut self) -> Result<()> {
    let raw = self.take_until(">", "end tag")?;
    let name = raw[2..]
      .split(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
      .next()
      .unwrap_or_default()
      .to_ascii_lowercase();
    let raw = raw.to_owned();

    let matching = self.open.iter().rposition(|id| {
      self
        .doc
        .node(*id)
        .as_element()
        .is_some_and(|e| e.name == name)
    });

    match matching {
      Some(index) => {
        let id = self.open[index];
        if let Some(el) = self.doc.element_mut(id) {
          el.end = Some(raw);
        }
        // Elements opened inside it are closed implicitly.
        self.open.truncate(index);
      }
      None => {
        self.push(NodeKind::Raw(raw));
      }
    }
    Ok(())
  }

  fn start_tag(&mut self) -> Result<()> {
    let start = self.pos;
    let (element, self_closing) = parse_start_tag(self.input, &mut self.pos)?;
    let name = element.name.clone();
    for rule in implied_ends(&name).into_iter().flatten() {
      self.close_implied(rule);
    }
    let id = self.push(NodeKind::Element(element));

    if is_void(&name) || self_closing {
      return Ok(());
    }

    if is_raw_text(&name) {
      return self.raw_text(id, &name, start);
    }

    self.open.push(id);
    // The document node does not count towards depth.
    if self.open.len() - 1 > MAX_DEPTH {
      return Err(Error::TooDeep { max: MAX_DEPTH });
    }
    Ok(())
  }

  /// Pop the nearest open element `rule` closes, with everything opened
  /// inside it, unless one of its scope boundaries comes first.
  fn close_implied(&mut self, rule: &ImpliedEnd) {
    for index in (1..self.open.len()).rev() {
      let Some(open) = self.doc.node(self.open[index]).as_element() else {
        continue;
      };
      if rule.closes.contains(&open.name.as_str()) {
        self.open.truncate(index);
        return;
      }
      if rule.scope.contains(&open.name.as_str()) {
        return;
      }
    }
  }

  /// Consume the content of a raw-text element and its end tag.
  fn raw_text(&mut self, id: NodeId, name: &str, tag_offset: usize) -> Result<()> {
    let close = find_end_tag(&self.input[self.pos..], name).ok_or(Error::Unterminated {
      what:   "raw text element",
      offset: tag_offset,
    })?;

    let content_end = self.pos + close;
    if close > 0 {
      let text = self.input[self.pos..content_end].to_owned();
      self.doc.append(id, NodeKind::Text(text));
    }

    self.pos = content_end;
    let end = self.take_until(">", "end tag")?.to_owned();
    if let Some(el) = self.doc.element_mut(id) {
      el.end = Some(end);
    }
    Ok(())
  }
}

// ─── Optional end tags ───────────────────────────────────────────────────────

/// Open elements a start tag closes implicitly.
struct ImpliedEnd {
  /// Element names closed by the incoming tag.
  closes: &'static [&'static str],
  /// Open elements that stop the search; nothing above them is closed.
  scope:  &'static [&'static str],
}

/// Start tags that end an open `<p>`.
const P_CLOSERS: &[&str] = &[
  "address", "article", "aside", "blockquote", "center", "dd", "details",
  "dialog", "dir", "div", "dl", "dt", "fieldset", "figcaption", "figure",
  "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hgroup",
  "hr", "li", "main", "menu", "nav", "ol", "p", "pre", "section", "summary",
  "table", "ul",
];

const P_END: ImpliedEnd = ImpliedEnd {
  closes: &["p"],
  scope:  &["applet", "button", "caption", "html", "marquee", "object", "table", "td", "th"],
};
const LI_END: ImpliedEnd = ImpliedEnd { closes: &["li"], scope: &["ol", "ul", "menu", "table"] };
const DESC_END: ImpliedEnd = ImpliedEnd { closes: &["dd", "dt"], scope: &["dl", "table"] };
const CELL_END: ImpliedEnd = ImpliedEnd { closes: &["td", "th"], scope: &["tr", "table"] };
const ROW_END: ImpliedEnd =
  ImpliedEnd { closes: &["tr"], scope: &["table", "tbody", "tfoot", "thead"] };
const SECTION_END: ImpliedEnd =
  ImpliedEnd { closes: &["tbody", "tfoot", "thead"], scope: &["table"] };
const OPTION_END: ImpliedEnd =
  ImpliedEnd { closes: &["option"], scope: &["datalist", "optgroup", "select"] };
const OPTGROUP_END: ImpliedEnd =
  ImpliedEnd { closes: &["optgroup", "option"], scope: &["select"] };

/// The implied-end rules triggered by a start tag named `name`, applied in
/// order.
fn implied_ends(name: &str) -> [Option<&'static ImpliedEnd>; 2] {
  let paragraph = P_CLOSERS.contains(&name).then_some(&P_END);
  let own = match name {
    "li" => Some(&LI_END),
    "dd" | "dt" => Some(&DESC_END),
    "td" | "th" => Some(&CELL_END),
    "tr" => Some(&ROW_END),
    "tbody" | "tfoot" | "thead" => Some(&SECTION_END),
    "option" => Some(&OPTION_END),
    "optgroup" => Some(&OPTGROUP_END),
    _ => None,
  };
  [paragraph, own]
}

// ─── Scanning helpers ────────────────────────────────────────────────────────

/// Offset of the first `</name` in `haystack`, matched case-insensitively.
fn find_end_tag(haystack: &str, name: &str) -> Option<usize> {
  let bytes = haystack.as_bytes();
  let mut from = 0;
  while let Some(i) = haystack[from..].find("</") {
    let at = from + i;
    let tag = at + 2;
    if bytes
      .get(tag..tag + name.len())
      .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name.as_bytes()))
    {
      return Some(at);
    }
    from = tag;
  }
  None
}

fn starts_with_ignore_case(haystack: &str, prefix: &str) -> bool {
  haystack
    .get(..prefix.len())
    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Parse a start tag beginning at `*pos` (which points at `<`). On success
/// `*pos` is advanced past the closing `>`.
///
/// Returns the element and whether the tag was written self-closing (`/>`).
fn parse_start_tag(input: &str, pos: &mut usize) -> Result<(Element, bool)> {
  let start = *pos;
  let bytes = input.as_bytes();
  let unterminated = || Error::Unterminated { what: "start tag", offset: start };

  let mut i = start + 1;
  while i < bytes.len() && !is_tag_delimiter(bytes[i]) {
    i += 1;
  }
  let name = input[start + 1..i].to_ascii_lowercase();

  let mut attrs = Vec::new();
  let mut self_closing = false;

  loop {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
      i += 1;
    }
    match bytes.get(i) {
      None => return Err(unterminated()),
      Some(b'>') => {
        i += 1;
        break;
      }
      Some(b'/') => {
        if bytes.get(i + 1) == Some(&b'>') {
          self_closing = true;
          i += 2;
          break;
        }
        i += 1;
        continue;
      }
      Some(_) => {}
    }

    let name_start = i;
    while i < bytes.len() && !is_tag_delimiter(bytes[i]) && bytes[i] != b'=' {
      i += 1;
    }
    if i == name_start {
      // Stray `=`; skip it like a browser would.
      i += 1;
      continue;
    }
    let attr_name = input[name_start..i].to_ascii_lowercase();

    let mut j = i;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
      j += 1;
    }
    if bytes.get(j) != Some(&b'=') {
      attrs.push(Attribute { name: attr_name, value: None });
      continue;
    }
    i = j + 1;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
      i += 1;
    }

    let value = match bytes.get(i) {
      None => return Err(unterminated()),
      Some(&quote @ (b'"' | b'\'')) => {
        let value_start = i + 1;
        let close = input[value_start..]
          .find(quote as char)
          .ok_or(Error::Unterminated { what: "attribute value", offset: start })?;
        i = value_start + close + 1;
        &input[value_start..value_start + close]
      }
      Some(_) => {
        let value_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
          i += 1;
        }
        &input[value_start..i]
      }
    };
    attrs.push(Attribute { name: attr_name, value: Some(value.to_owned()) });
  }

  *pos = i;
  let element = Element {
    name,
    attrs,
    start: input[start..i].to_owned(),
    end: None,
  };
  Ok((element, self_closing))
}

fn is_tag_delimiter(b: u8) -> bool {
  b.is_ascii_whitespace() || b == b'>' || b == b'/'
}
