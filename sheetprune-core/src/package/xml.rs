//! Editable XML trees for package parts
//!
//! Parts are parsed with `quick-xml` into a small element tree that keeps the
//! original events (declaration, whitespace, comments, namespace prefixes), so
//! serializing an untouched tree reproduces the part's content.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;

use crate::error::{EditorError, Result};

/// A child of an element: either a nested element or a non-element event
#[derive(Debug, Clone)]
pub enum XmlNode {
    Element(XmlElement),
    Other(Event<'static>),
}

/// An element with its start tag and children
#[derive(Debug, Clone)]
pub struct XmlElement {
    pub start: BytesStart<'static>,
    pub children: Vec<XmlNode>,
    /// Written as `<tag/>` when it has no children
    pub self_closing: bool,
}

/// A parsed part: prolog events, the root element, and trailing events
#[derive(Debug, Clone)]
pub struct XmlDocument {
    part: String,
    prolog: Vec<Event<'static>>,
    pub root: XmlElement,
    epilog: Vec<Event<'static>>,
}

impl XmlDocument {
    /// Parse `xml`; `part` names the package part for error messages
    pub fn parse(xml: &str, part: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(false);

        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                EditorError::xml(part, format!("{} at byte {}", e, reader.error_position()))
            })?;

            match event {
                Event::Start(e) => stack.push(XmlElement {
                    start: e.into_owned(),
                    children: Vec::new(),
                    self_closing: false,
                }),
                Event::Empty(e) => {
                    let element = XmlElement {
                        start: e.into_owned(),
                        children: Vec::new(),
                        self_closing: true,
                    };
                    attach(element, &mut stack, &mut root, part)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| EditorError::xml(part, "unexpected closing tag"))?;
                    attach(element, &mut stack, &mut root, part)?;
                }
                Event::Eof => break,
                other => {
                    let other = other.into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Other(other)),
                        None if root.is_none() => prolog.push(other),
                        None => epilog.push(other),
                    }
                }
            }
        }

        if !stack.is_empty() {
            return Err(EditorError::xml(part, "unexpected end of document"));
        }
        let root = root.ok_or_else(|| EditorError::xml(part, "document has no root element"))?;

        Ok(Self {
            part: part.to_string(),
            prolog,
            root,
            epilog,
        })
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    /// Serialize back to text
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        for event in &self.prolog {
            writer
                .write_event(event.borrow())
                .map_err(|e| EditorError::xml(&self.part, e))?;
        }
        write_element(&mut writer, &self.root, &self.part)?;
        for event in &self.epilog {
            writer
                .write_event(event.borrow())
                .map_err(|e| EditorError::xml(&self.part, e))?;
        }
        String::from_utf8(writer.into_inner()).map_err(|e| EditorError::xml(&self.part, e))
    }
}

fn attach(
    element: XmlElement,
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    part: &str,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(EditorError::xml(part, "multiple root elements")),
    }
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &XmlElement, part: &str) -> Result<()> {
    if element.children.is_empty() && element.self_closing {
        return writer
            .write_event(Event::Empty(element.start.borrow()))
            .map_err(|e| EditorError::xml(part, e));
    }

    writer
        .write_event(Event::Start(element.start.borrow()))
        .map_err(|e| EditorError::xml(part, e))?;
    for child in &element.children {
        match child {
            XmlNode::Element(el) => write_element(writer, el, part)?,
            XmlNode::Other(event) => writer
                .write_event(event.borrow())
                .map_err(|e| EditorError::xml(part, e))?,
        }
    }
    writer
        .write_event(Event::End(element.start.to_end()))
        .map_err(|e| EditorError::xml(part, e))
}

impl XmlElement {
    /// New self-closing element with the given qualified name and attributes
    pub fn new(name: &str, attributes: &[(&str, &str)]) -> Self {
        let mut start = BytesStart::new(name.to_string());
        for &(key, value) in attributes {
            start.push_attribute((key, value));
        }
        Self {
            start,
            children: Vec::new(),
            self_closing: true,
        }
    }

    /// Local name without namespace prefix
    pub fn local_name(&self) -> &[u8] {
        self.start.local_name().into_inner()
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local.as_bytes()
    }

    /// Namespace prefix including the colon (e.g. `xdr:`), or empty
    pub fn prefix(&self) -> String {
        self.start
            .name()
            .prefix()
            .map(|p| format!("{}:", String::from_utf8_lossy(p.as_ref())))
            .unwrap_or_default()
    }

    /// Attribute value by local name (`r:embed` matches `embed`)
    pub fn attribute(&self, local: &str) -> Option<String> {
        self.start
            .attributes()
            .flatten()
            .find(|attr| attr.key.local_name().as_ref() == local.as_bytes())
            .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
    }

    /// Attributes keyed by qualified name, values unescaped
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.start
            .attributes()
            .flatten()
            .map(|attr| {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                (key, value)
            })
            .collect()
    }

    /// Set (or replace) the attribute with qualified name `key`
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        let kept = self.raw_attributes_except(key);
        self.start.clear_attributes();
        for (k, v) in &kept {
            self.start.push_attribute((k.as_slice(), v.as_slice()));
        }
        self.start.push_attribute((key, value));
    }

    /// Remove the attribute with qualified name `key`, if present
    pub fn remove_attribute(&mut self, key: &str) {
        let kept = self.raw_attributes_except(key);
        self.start.clear_attributes();
        for (k, v) in &kept {
            self.start.push_attribute((k.as_slice(), v.as_slice()));
        }
    }

    // Escaped values are carried through untouched
    fn raw_attributes_except(&self, key: &str) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.start
            .attributes()
            .flatten()
            .filter(|attr| attr.key.as_ref() != key.as_bytes())
            .map(|attr| (attr.key.as_ref().to_vec(), attr.value.into_owned()))
            .collect()
    }

    /// Element children in document order
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Other(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Other(_) => None,
        })
    }

    /// First child element with the given local name
    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.elements().find(|el| el.is(local))
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut XmlElement> {
        self.elements_mut().find(|el| el.is(local))
    }

    /// First descendant (depth-first, excluding self) with the given local name
    pub fn descendant(&self, local: &str) -> Option<&XmlElement> {
        for child in self.elements() {
            if child.is(local) {
                return Some(child);
            }
            if let Some(found) = child.descendant(local) {
                return Some(found);
            }
        }
        None
    }

    /// All descendants with the given local name, in document order
    pub fn descendants<'a>(&'a self, local: &str, out: &mut Vec<&'a XmlElement>) {
        for child in self.elements() {
            if child.is(local) {
                out.push(child);
            }
            child.descendants(local, out);
        }
    }

    /// Concatenated, unescaped text of direct text children
    pub fn text(&self) -> String {
        let mut text = String::new();
        for node in &self.children {
            match node {
                XmlNode::Other(Event::Text(t)) => {
                    if let Ok(value) = t.unescape() {
                        text.push_str(&value);
                    }
                }
                XmlNode::Other(Event::CData(c)) => {
                    text.push_str(&String::from_utf8_lossy(c));
                }
                _ => {}
            }
        }
        text
    }

    /// Append an element child; the element stops being self-closing
    pub fn push_element(&mut self, element: XmlElement) {
        self.self_closing = false;
        self.children.push(XmlNode::Element(element));
    }

    /// Keep only element children for which `keep` returns true.
    ///
    /// Non-element children (whitespace, comments) are left in place.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&XmlElement) -> bool) {
        self.children.retain(|node| match node {
            XmlNode::Element(el) => keep(el),
            XmlNode::Other(_) => true,
        });
    }

    /// Number of element children
    pub fn element_count(&self) -> usize {
        self.elements().count()
    }

    /// Serialize this element alone
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self, "<fragment>")?;
        String::from_utf8(writer.into_inner()).map_err(|e| EditorError::xml("<fragment>", e))
    }

    /// Comparable form: attributes sorted by name, plus serialized children
    pub fn signature(&self) -> Result<(BTreeMap<String, String>, String)> {
        let mut body = String::new();
        for child in self.elements() {
            body.push_str(&child.to_xml()?);
        }
        Ok((self.attributes(), body))
    }

    /// Closing tag for this element's qualified name
    pub fn end_tag(&self) -> BytesEnd<'static> {
        BytesEnd::new(String::from_utf8_lossy(self.start.name().as_ref()).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="urn:xdr" xmlns:r="urn:r">
  <!-- keep me -->
  <xdr:pic><xdr:blip r:embed="rId1"/></xdr:pic>
  <xdr:sp name="a &amp; b">text &lt;here&gt;</xdr:sp>
</xdr:wsDr>"#;

    #[test]
    fn test_untouched_document_round_trips() {
        let doc = XmlDocument::parse(SAMPLE, "xl/drawings/drawing1.xml").unwrap();
        assert_eq!(doc.to_xml().unwrap(), SAMPLE);
    }

    #[test]
    fn test_lookup_by_local_name() {
        let doc = XmlDocument::parse(SAMPLE, "part").unwrap();
        assert!(doc.root.is("wsDr"));
        assert_eq!(doc.root.prefix(), "xdr:");
        let blip = doc.root.descendant("blip").unwrap();
        assert_eq!(blip.attribute("embed").as_deref(), Some("rId1"));
        let sp = doc.root.child("sp").unwrap();
        assert_eq!(sp.attribute("name").as_deref(), Some("a & b"));
        assert_eq!(sp.text(), "text <here>");
    }

    #[test]
    fn test_attribute_edits() {
        let mut el = XmlElement::new("xf", &[("numFmtId", "0"), ("fillId", "0")]);
        el.set_attribute("fillId", "2");
        el.set_attribute("applyFill", "1");
        assert_eq!(el.attribute("fillId").as_deref(), Some("2"));
        el.remove_attribute("applyFill");
        assert_eq!(el.to_xml().unwrap(), r#"<xf numFmtId="0" fillId="2"/>"#);
    }

    #[test]
    fn test_push_element_opens_empty_tag() {
        let mut fills = XmlElement::new("fills", &[("count", "0")]);
        fills.push_element(XmlElement::new("fill", &[]));
        assert!(!fills.self_closing);
        assert_eq!(fills.to_xml().unwrap(), r#"<fills count="0"><fill/></fills>"#);

        fills.retain_elements(|_| false);
        assert_eq!(fills.to_xml().unwrap(), r#"<fills count="0"></fills>"#);
    }

    #[test]
    fn test_retain_elements_keeps_other_nodes() {
        let mut doc = XmlDocument::parse(SAMPLE, "part").unwrap();
        doc.root.retain_elements(|el| !el.is("pic"));
        let xml = doc.to_xml().unwrap();
        assert!(!xml.contains("xdr:pic"));
        assert!(xml.contains("<!-- keep me -->"));
        assert!(xml.contains("xdr:sp"));
    }

    #[test]
    fn test_malformed_xml_is_rejected() {
        let err = XmlDocument::parse("<a><b></a>", "xl/bad.xml").unwrap_err();
        assert!(matches!(err, EditorError::XmlParse { ref part, .. } if part == "xl/bad.xml"));
        assert!(XmlDocument::parse("", "xl/empty.xml").is_err());
        assert!(XmlDocument::parse("<a>", "xl/open.xml").is_err());
    }
}
