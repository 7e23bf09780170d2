//! Styles part (`xl/styles.xml`): solid fills and cell formats

use crate::error::{EditorError, Result};
use crate::package::xml::{XmlDocument, XmlElement};

/// Editable view over the styles part.
///
/// Only the `<fills>` and `<cellXfs>` collections are touched. New entries are
/// appended, existing indices never move.
#[derive(Debug, Clone)]
pub struct StyleSheet {
    doc: XmlDocument,
    modified: bool,
}

impl StyleSheet {
    pub fn parse(xml: &str, part: &str) -> Result<Self> {
        Ok(Self {
            doc: XmlDocument::parse(xml, part)?,
            modified: false,
        })
    }

    pub fn part(&self) -> &str {
        self.doc.part()
    }

    /// Whether any fill or format was appended since parsing
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn to_xml(&self) -> Result<String> {
        self.doc.to_xml()
    }

    fn collection(&self, local: &str) -> Result<&XmlElement> {
        self.doc.root.child(local).ok_or_else(|| {
            EditorError::CellStore(format!("{} has no <{local}> collection", self.part()))
        })
    }

    fn collection_mut(&mut self, local: &str) -> Result<&mut XmlElement> {
        let part = self.doc.part().to_string();
        self.doc
            .root
            .child_mut(local)
            .ok_or_else(|| EditorError::CellStore(format!("{part} has no <{local}> collection")))
    }

    fn xf(&self, index: u32) -> Option<&XmlElement> {
        self.doc
            .root
            .child("cellXfs")?
            .elements()
            .filter(|el| el.is("xf"))
            .nth(index as usize)
    }

    /// ARGB foreground of the solid fill used by cell format `xf`, if any
    pub fn fill_color(&self, xf: u32) -> Option<String> {
        let fill_id = self.xf(xf)?.attribute("fillId")?.parse::<usize>().ok()?;
        let fill = self
            .doc
            .root
            .child("fills")?
            .elements()
            .filter(|el| el.is("fill"))
            .nth(fill_id)?;
        solid_fill_color(fill)
    }

    /// Index of a solid fill with foreground `argb`, appending one if needed
    pub fn ensure_solid_fill(&mut self, argb: &str) -> Result<u32> {
        let fills = self.collection("fills")?;
        if let Some(index) = fills
            .elements()
            .filter(|el| el.is("fill"))
            .position(|fill| {
                solid_fill_color(fill).is_some_and(|color| color.eq_ignore_ascii_case(argb))
            })
        {
            return Ok(index as u32);
        }

        let prefix = fills.prefix();
        let name = |local: &str| format!("{prefix}{local}");

        let mut pattern = XmlElement::new(&name("patternFill"), &[("patternType", "solid")]);
        pattern.push_element(XmlElement::new(&name("fgColor"), &[("rgb", argb)]));
        pattern.push_element(XmlElement::new(&name("bgColor"), &[("indexed", "64")]));
        let mut fill = XmlElement::new(&name("fill"), &[]);
        fill.push_element(pattern);

        let fills = self.collection_mut("fills")?;
        fills.push_element(fill);
        let count = fills.elements().filter(|el| el.is("fill")).count();
        fills.set_attribute("count", &count.to_string());
        self.modified = true;
        Ok(count as u32 - 1)
    }

    /// Index of a cell format equal to `base` but using `fill_id`.
    ///
    /// An identical existing format is reused; otherwise the derived one is
    /// appended to `<cellXfs>`.
    pub fn derive_xf(&mut self, base: u32, fill_id: u32) -> Result<u32> {
        let mut derived = match self.xf(base).or_else(|| self.xf(0)) {
            Some(xf) => xf.clone(),
            None => {
                let prefix = self.collection("cellXfs")?.prefix();
                XmlElement::new(
                    &format!("{prefix}xf"),
                    &[("numFmtId", "0"), ("fontId", "0"), ("fillId", "0"), ("borderId", "0"), ("xfId", "0")],
                )
            }
        };
        derived.set_attribute("fillId", &fill_id.to_string());
        if fill_id == 0 {
            derived.remove_attribute("applyFill");
        } else {
            derived.set_attribute("applyFill", "1");
        }

        let wanted = derived.signature()?;
        for (index, xf) in self
            .collection("cellXfs")?
            .elements()
            .filter(|el| el.is("xf"))
            .enumerate()
        {
            if xf.signature()? == wanted {
                return Ok(index as u32);
            }
        }

        let xfs = self.collection_mut("cellXfs")?;
        xfs.push_element(derived);
        let count = xfs.elements().filter(|el| el.is("xf")).count();
        xfs.set_attribute("count", &count.to_string());
        self.modified = true;
        Ok(count as u32 - 1)
    }
}

fn solid_fill_color(fill: &XmlElement) -> Option<String> {
    let pattern = fill.child("patternFill")?;
    if pattern.attribute("patternType").as_deref() != Some("solid") {
        return None;
    }
    pattern.child("fgColor")?.attribute("rgb")
}
