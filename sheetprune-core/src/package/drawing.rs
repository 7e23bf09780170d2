//! DrawingML anchors inside a worksheet drawing (`<xdr:wsDr>`)

use super::xml::XmlElement;
use crate::address::CellCoordinate;

/// What the picture index and the surgeon need to know about one anchor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorInfo {
    /// Top-left cell, converted to 1-based. `None` for absolute anchors and
    /// for markers that are unreadable or outside the worksheet grid.
    pub origin: Option<CellCoordinate>,
    pub absolute: bool,
    /// Relationship ids referenced by `<a:blip r:embed>` inside the anchor
    pub embeds: Vec<String>,
    /// Relationship ids of externally linked images (`<a:blip r:link>`)
    pub links: Vec<String>,
    /// Whether the anchor holds a picture (`<xdr:pic>`)
    pub is_picture: bool,
}

fn is_anchor(el: &XmlElement) -> bool {
    el.is("twoCellAnchor") || el.is("oneCellAnchor") || el.is("absoluteAnchor")
}

/// Inspect a direct child of `<xdr:wsDr>`.
///
/// `mc:AlternateContent` wrappers are treated as one unit described by the
/// first anchor they contain. Non-anchor children yield `None`.
pub fn anchor_info(child: &XmlElement) -> Option<AnchorInfo> {
    let anchor = if is_anchor(child) {
        child
    } else if child.is("AlternateContent") {
        first_anchor(child)?
    } else {
        return None;
    };

    let origin = anchor.child("from").and_then(|from| {
        let row = from.child("row")?.text().trim().parse::<u32>().ok()?;
        let col = from.child("col")?.text().trim().parse::<u32>().ok()?;
        CellCoordinate::from_zero_based(row, col)
    });

    let mut blips = Vec::new();
    anchor.descendants("blip", &mut blips);
    let embeds = blips
        .iter()
        .filter_map(|blip| blip.attribute("embed"))
        .collect();
    let links = blips
        .iter()
        .filter_map(|blip| blip.attribute("link"))
        .collect();

    Some(AnchorInfo {
        origin,
        absolute: anchor.is("absoluteAnchor"),
        embeds,
        links,
        is_picture: anchor.descendant("pic").is_some(),
    })
}

fn first_anchor(el: &XmlElement) -> Option<&XmlElement> {
    for child in el.elements() {
        if is_anchor(child) {
            return Some(child);
        }
        if let Some(found) = first_anchor(child) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::xml::XmlDocument;

    const DRAWING: &str = r#"<xdr:wsDr xmlns:xdr="urn:xdr" xmlns:a="urn:a" xmlns:r="urn:r" xmlns:mc="urn:mc">
<xdr:twoCellAnchor editAs="oneCell">
  <xdr:from><xdr:col>1</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>6</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
  <xdr:to><xdr:col>2</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>7</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>
  <xdr:pic><xdr:blipFill><a:blip r:embed="rId4"/></xdr:blipFill></xdr:pic>
  <xdr:clientData/>
</xdr:twoCellAnchor>
<xdr:absoluteAnchor><xdr:pos x="0" y="0"/><xdr:ext cx="1" cy="1"/><xdr:pic><xdr:blipFill><a:blip r:embed="rId5"/></xdr:blipFill></xdr:pic></xdr:absoluteAnchor>
<mc:AlternateContent><mc:Choice Requires="a14"><xdr:oneCellAnchor>
  <xdr:from><xdr:col> 3 </xdr:col><xdr:row>0</xdr:row></xdr:from>
  <xdr:graphicFrame/>
</xdr:oneCellAnchor></mc:Choice></mc:AlternateContent>
</xdr:wsDr>"#;

    #[test]
    fn test_anchor_info() {
        let doc = XmlDocument::parse(DRAWING, "xl/drawings/drawing1.xml").unwrap();
        let anchors: Vec<_> = doc.root.elements().filter_map(anchor_info).collect();
        assert_eq!(anchors.len(), 3);

        assert_eq!(anchors[0].origin, Some(CellCoordinate::new(7, 2)));
        assert_eq!(anchors[0].embeds, vec!["rId4".to_string()]);
        assert!(anchors[0].is_picture);

        assert_eq!(anchors[1].origin, None);
        assert!(anchors[1].absolute);
        assert!(anchors[1].is_picture);

        assert_eq!(anchors[2].origin, Some(CellCoordinate::new(1, 4)));
        assert!(!anchors[2].is_picture);
        assert!(anchors[2].embeds.is_empty());
    }

    fn one_cell(row: &str, col: &str, blip: &str) -> AnchorInfo {
        let xml = format!(
            r#"<xdr:wsDr xmlns:xdr="urn:xdr" xmlns:a="urn:a" xmlns:r="urn:r"><xdr:oneCellAnchor><xdr:from><xdr:col>{col}</xdr:col><xdr:row>{row}</xdr:row></xdr:from><xdr:pic><xdr:blipFill>{blip}</xdr:blipFill></xdr:pic></xdr:oneCellAnchor></xdr:wsDr>"#
        );
        let doc = XmlDocument::parse(&xml, "xl/drawings/drawing1.xml").unwrap();
        doc.root.elements().find_map(anchor_info).unwrap()
    }

    #[test]
    fn test_marker_outside_grid_has_no_origin() {
        let blip = r#"<a:blip r:embed="rId1"/>"#;
        let info = one_cell("4294967295", "0", blip);
        assert_eq!(info.origin, None);
        assert!(!info.absolute);
        assert!(info.is_picture);

        assert_eq!(one_cell("0", "16384", blip).origin, None);
        assert_eq!(one_cell("-1", "0", blip).origin, None);
        assert_eq!(
            one_cell("1048575", "16383", blip).origin,
            Some(CellCoordinate::new(1_048_576, 16_384))
        );
    }

    #[test]
    fn test_linked_picture() {
        let info = one_cell("2", "1", r#"<a:blip r:link="rId7"/>"#);
        assert_eq!(info.origin, Some(CellCoordinate::new(3, 2)));
        assert!(info.embeds.is_empty());
        assert_eq!(info.links, vec!["rId7".to_string()]);
    }
}
