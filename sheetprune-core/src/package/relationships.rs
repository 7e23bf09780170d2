//! Relationship (`.rels`) documents and part path resolution

use super::xml::XmlDocument;
use crate::error::Result;

pub const IMAGE_REL_SUFFIX: &str = "/image";
pub const DRAWING_REL_SUFFIX: &str = "/drawing";
pub const WORKSHEET_REL_SUFFIX: &str = "/worksheet";
pub const OFFICE_DOCUMENT_REL_SUFFIX: &str = "/officeDocument";
pub const STYLES_REL_SUFFIX: &str = "/styles";

/// Namespace of `r:embed` / `r:link` / `r:id` attributes inside parts
pub const RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
/// Strict Open XML spelling of [`RELATIONSHIPS_NS`]
pub const STRICT_RELATIONSHIPS_NS: &str = "http://purl.oclc.org/ooxml/officeDocument/relationships";

pub fn is_relationships_ns(uri: &str) -> bool {
    uri == RELATIONSHIPS_NS || uri == STRICT_RELATIONSHIPS_NS
}

/// One `<Relationship>` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_: String,
    pub target: String,
    /// `TargetMode="External"` targets point outside the package
    pub external: bool,
}

impl Relationship {
    pub fn is_image(&self) -> bool {
        self.type_.ends_with(IMAGE_REL_SUFFIX)
    }

    pub fn is_drawing(&self) -> bool {
        self.type_.ends_with(DRAWING_REL_SUFFIX)
    }

    /// Package part this relationship points to, resolved against `source_part`
    pub fn resolved_target(&self, source_part: &str) -> Option<String> {
        (!self.external).then(|| resolve_target(source_part, &self.target))
    }
}

/// Read every relationship from a parsed `.rels` document
pub fn relationships(doc: &XmlDocument) -> Vec<Relationship> {
    doc.root
        .elements()
        .filter(|el| el.is("Relationship"))
        .filter_map(|el| {
            let id = el.attribute("Id")?;
            Some(Relationship {
                id,
                type_: el.attribute("Type").unwrap_or_default(),
                target: el.attribute("Target").unwrap_or_default(),
                external: el
                    .attribute("TargetMode")
                    .is_some_and(|mode| mode.eq_ignore_ascii_case("external")),
            })
        })
        .collect()
}

/// Parse `.rels` text
pub fn parse_relationships(xml: &str, part: &str) -> Result<Vec<Relationship>> {
    let doc = XmlDocument::parse(xml, part)?;
    Ok(relationships(&doc))
}

/// The `.rels` part that describes `part`
pub fn rels_for_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target relative to the part that owns the `.rels`
pub fn resolve_target(source_part: &str, target: &str) -> String {
    // Part names never carry URI fragments
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize(absolute);
    }

    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}
