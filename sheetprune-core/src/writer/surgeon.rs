//! Anchor, relationship and media removal over parsed drawing trees
//!
//! Pure tree transformation: nothing here touches the filesystem. The save
//! engine feeds it the drawing and its `.rels` document and applies the
//! returned media deletions itself.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::address::CellCoordinate;
use crate::package::drawing::anchor_info;
use crate::package::relationships::{is_relationships_ns, relationships};
use crate::package::xml::{XmlDocument, XmlElement};

/// What one drawing lost
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurgeryOutcome {
    /// Origins of removed anchors, in document order
    pub removed_anchors: Vec<CellCoordinate>,
    pub removed_relationships: Vec<String>,
    /// Media targets of removed relationships
    pub removed_targets: BTreeSet<String>,
    /// Removed targets no surviving image relationship points to
    pub orphaned_media: BTreeSet<String>,
}

impl SurgeryOutcome {
    pub fn is_empty(&self) -> bool {
        self.removed_anchors.is_empty() && self.removed_relationships.is_empty()
    }
}

/// Remove picture anchors whose origin is in `deleted`, then the relationships
/// only they referenced.
///
/// `drawing_part` is the drawing's part name, used to resolve relationship
/// targets. Absolute anchors have no origin and always survive.
pub fn remove_deleted(
    drawing: &mut XmlDocument,
    rels: Option<&mut XmlDocument>,
    drawing_part: &str,
    deleted: &BTreeSet<CellCoordinate>,
) -> SurgeryOutcome {
    let mut outcome = SurgeryOutcome::default();
    let mut captured: BTreeSet<String> = BTreeSet::new();

    drawing.root.retain_elements(|child| {
        let Some(info) = anchor_info(child) else {
            return true;
        };
        match info.origin {
            Some(origin) if info.is_picture && deleted.contains(&origin) => {
                outcome.removed_anchors.push(origin);
                captured.extend(info.embeds);
                false
            }
            _ => true,
        }
    });

    // Two anchors may share one relationship
    let still_referenced = referenced_ids(&drawing.root);
    let removable: BTreeSet<&String> = captured
        .iter()
        .filter(|id| !still_referenced.contains(*id))
        .collect();

    let Some(rels) = rels else {
        if !removable.is_empty() {
            warn!(part = drawing_part, "drawing has no relationships part, nothing to unlink");
        }
        return outcome;
    };

    for rel in relationships(rels) {
        if !removable.contains(&rel.id) {
            continue;
        }
        outcome.removed_relationships.push(rel.id.clone());
        if let Some(target) = rel.resolved_target(drawing_part) {
            outcome.removed_targets.insert(target);
        }
    }
    rels.root.retain_elements(|el| {
        !(el.is("Relationship")
            && el
                .attribute("Id")
                .is_some_and(|id| outcome.removed_relationships.contains(&id)))
    });

    let surviving: BTreeSet<String> = relationships(rels)
        .into_iter()
        .filter(|rel| rel.is_image())
        .filter_map(|rel| rel.resolved_target(drawing_part))
        .collect();
    outcome.orphaned_media = outcome
        .removed_targets
        .difference(&surviving)
        .cloned()
        .collect();

    debug!(
        part = drawing_part,
        anchors = outcome.removed_anchors.len(),
        relationships = outcome.removed_relationships.len(),
        orphans = outcome.orphaned_media.len(),
        "drawing surgery done"
    );
    outcome
}

/// Relationship ids referenced anywhere in the drawing.
///
/// Counts `embed`, `link` and `id` attributes whose prefix is bound to the
/// relationships namespace, whatever the prefix is called.
fn referenced_ids(root: &XmlElement) -> BTreeSet<String> {
    fn walk(el: &XmlElement, scope: &mut Vec<(String, String)>, out: &mut BTreeSet<String>) {
        let attributes = el.attributes();
        let outer = scope.len();
        for (key, value) in &attributes {
            if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.push((prefix.to_string(), value.clone()));
            }
        }
        for (key, value) in &attributes {
            let Some((prefix, "embed" | "link" | "id")) = key.split_once(':') else {
                continue;
            };
            let bound = scope
                .iter()
                .rev()
                .find(|(declared, _)| declared == prefix)
                .is_some_and(|(_, uri)| is_relationships_ns(uri));
            if bound {
                out.insert(value.clone());
            }
        }
        for child in el.elements() {
            walk(child, scope, out);
        }
        scope.truncate(outer);
    }
    let mut out = BTreeSet::new();
    walk(root, &mut Vec::new(), &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWING_PART: &str = "xl/drawings/drawing1.xml";

    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    fn anchor(row: u32, col: u32, rid: &str) -> String {
        prefixed_anchor(row, col, "r", rid)
    }

    fn prefixed_anchor(row: u32, col: u32, prefix: &str, rid: &str) -> String {
        format!(
            r#"<xdr:twoCellAnchor><xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>{col}</xdr:col><xdr:colOff>9</xdr:colOff><xdr:row>{row}</xdr:row><xdr:rowOff>9</xdr:rowOff></xdr:to><xdr:pic><xdr:blipFill><a:blip {prefix}:embed="{rid}"/></xdr:blipFill></xdr:pic><xdr:clientData/></xdr:twoCellAnchor>"#
        )
    }

    fn drawing(anchors: &[String]) -> XmlDocument {
        let xml = format!(
            r#"<xdr:wsDr xmlns:xdr="urn:xdr" xmlns:a="urn:a" xmlns:r="{REL_NS}">{}</xdr:wsDr>"#,
            anchors.concat()
        );
        XmlDocument::parse(&xml, DRAWING_PART).unwrap()
    }

    fn rels(entries: &[(&str, &str)]) -> XmlDocument {
        let body: String = entries
            .iter()
            .map(|(id, target)| {
                format!(
                    r#"<Relationship Id="{id}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="{target}"/>"#
                )
            })
            .collect();
        XmlDocument::parse(
            &format!(r#"<Relationships xmlns="urn:rels">{body}</Relationships>"#),
            "xl/drawings/_rels/drawing1.xml.rels",
        )
        .unwrap()
    }

    fn deleted(cells: &[(u32, u32)]) -> BTreeSet<CellCoordinate> {
        cells
            .iter()
            .map(|&(row, col)| CellCoordinate::new(row, col))
            .collect()
    }

    #[test]
    fn test_removes_anchor_relationship_and_media() {
        let mut doc = drawing(&[anchor(6, 1, "rId1"), anchor(11, 1, "rId2")]);
        let mut rels_doc = rels(&[("rId1", "../media/image1.png"), ("rId2", "../media/image2.png")]);

        let outcome = remove_deleted(&mut doc, Some(&mut rels_doc), DRAWING_PART, &deleted(&[(7, 2)]));

        assert_eq!(outcome.removed_anchors, vec![CellCoordinate::new(7, 2)]);
        assert_eq!(outcome.removed_relationships, vec!["rId1".to_string()]);
        assert!(outcome.orphaned_media.contains("xl/media/image1.png"));
        assert_eq!(doc.root.element_count(), 1);
        assert_eq!(relationships(&rels_doc).len(), 1);
        assert_eq!(relationships(&rels_doc)[0].id, "rId2");
    }

    #[test]
    fn test_shared_media_survives() {
        let mut doc = drawing(&[anchor(6, 1, "rId1"), anchor(11, 1, "rId2")]);
        let mut rels_doc = rels(&[("rId1", "../media/image1.png"), ("rId2", "../media/image1.png")]);

        let outcome = remove_deleted(&mut doc, Some(&mut rels_doc), DRAWING_PART, &deleted(&[(7, 2)]));

        assert_eq!(outcome.removed_relationships, vec!["rId1".to_string()]);
        assert_eq!(outcome.removed_targets.len(), 1);
        assert!(outcome.orphaned_media.is_empty());
    }

    #[test]
    fn test_shared_relationship_is_kept_while_referenced() {
        let mut doc = drawing(&[anchor(6, 1, "rId1"), anchor(11, 1, "rId1")]);
        let mut rels_doc = rels(&[("rId1", "../media/image1.png")]);

        let outcome = remove_deleted(&mut doc, Some(&mut rels_doc), DRAWING_PART, &deleted(&[(7, 2)]));

        assert_eq!(outcome.removed_anchors.len(), 1);
        assert!(outcome.removed_relationships.is_empty());
        assert_eq!(relationships(&rels_doc).len(), 1);
    }

    #[test]
    fn test_shared_relationship_under_another_prefix() {
        let xml = format!(
            r#"<xdr:wsDr xmlns:xdr="urn:xdr" xmlns:a="urn:a" xmlns:rel="{REL_NS}">{}{}</xdr:wsDr>"#,
            prefixed_anchor(6, 1, "rel", "rId1"),
            prefixed_anchor(11, 1, "rel", "rId1"),
        );
        let mut doc = XmlDocument::parse(&xml, DRAWING_PART).unwrap();
        let mut rels_doc = rels(&[("rId1", "../media/image1.png")]);

        let outcome = remove_deleted(&mut doc, Some(&mut rels_doc), DRAWING_PART, &deleted(&[(7, 2)]));

        assert_eq!(outcome.removed_anchors, vec![CellCoordinate::new(7, 2)]);
        assert!(outcome.removed_relationships.is_empty());
        assert!(outcome.orphaned_media.is_empty());
        assert_eq!(relationships(&rels_doc).len(), 1);
    }

    #[test]
    fn test_only_relationship_namespace_counts() {
        // `x:id` is bound elsewhere, so rId1 is free to go
        let survivor = r#"<xdr:sp xmlns:x="urn:other" x:id="rId1"/>"#;
        let xml = format!(
            r#"<xdr:wsDr xmlns:xdr="urn:xdr" xmlns:a="urn:a" xmlns:r="{REL_NS}">{}{survivor}</xdr:wsDr>"#,
            anchor(6, 1, "rId1"),
        );
        let mut doc = XmlDocument::parse(&xml, DRAWING_PART).unwrap();
        let mut rels_doc = rels(&[("rId1", "../media/image1.png")]);

        let outcome = remove_deleted(&mut doc, Some(&mut rels_doc), DRAWING_PART, &deleted(&[(7, 2)]));

        assert_eq!(outcome.removed_relationships, vec!["rId1".to_string()]);
        assert!(outcome.orphaned_media.contains("xl/media/image1.png"));
    }

    #[test]
    fn test_nothing_deleted_leaves_trees_untouched() {
        let mut doc = drawing(&[anchor(6, 1, "rId1")]);
        let before = doc.to_xml().unwrap();
        let mut rels_doc = rels(&[("rId1", "../media/image1.png")]);

        let outcome = remove_deleted(&mut doc, Some(&mut rels_doc), DRAWING_PART, &deleted(&[(1, 1)]));

        assert!(outcome.is_empty());
        assert_eq!(doc.to_xml().unwrap(), before);
    }

    #[test]
    fn test_missing_rels_only_removes_anchors() {
        let mut doc = drawing(&[anchor(6, 1, "rId1")]);
        let outcome = remove_deleted(&mut doc, None, DRAWING_PART, &deleted(&[(7, 2)]));
        assert_eq!(outcome.removed_anchors.len(), 1);
        assert!(outcome.orphaned_media.is_empty());
        assert_eq!(doc.root.element_count(), 0);
    }
}
