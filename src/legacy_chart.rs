//! Report pie-chart overlay.
//!
//! Some report documents carry their data in a `results` element (foreign
//! `region` children with `regionName`/`regionResult` fields) and leave an
//! empty `PieParent` group where a chart is expected. When the compatibility
//! flag is set, the group gets a pie drawn from that data.

use std::f64::consts::PI;

use crate::document::{Document, NodeId};
use crate::geometry::{PathSeg, parse_number, parse_path_data};
use crate::types::Color;

pub(crate) const TRIGGER_ID: &str = "PieParent";
const RESULTS_ID: &str = "results";

const CENTER_X: f64 = 240.0;
const CENTER_Y: f64 = 170.0;
const RADIUS: f64 = 100.0;
const LABEL_RADIUS: f64 = 65.0;
const EXPLODE: f64 = 30.0;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Region {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PieSlice {
    pub path: Vec<PathSeg>,
    /// Translation applied to the slice and its label.
    pub offset: (f64, f64),
    pub fill: Color,
    pub stroke: Color,
    pub stroke_width: f64,
    pub label: String,
    pub label_x: f64,
    pub label_y: f64,
}

/// Regions with a name and a positive result, in document order.
pub(crate) fn parse_regions(doc: &Document, results: NodeId) -> Vec<Region> {
    let mut regions = Vec::new();
    for child in &doc.node(results).children {
        let region = doc.node(*child);
        if !region.tag.eq_ignore_ascii_case("region") {
            continue;
        }
        let mut name = None;
        let mut value = None;
        for field in &region.children {
            let field = doc.node(*field);
            match field.tag.to_ascii_lowercase().as_str() {
                "regionname" => {
                    name = Some(field.text.trim().to_string()).filter(|n| !n.is_empty())
                }
                "regionresult" => value = Some(parse_number(field.text.trim()).unwrap_or(0.0)),
                _ => {}
            }
        }
        if let (Some(name), Some(value)) = (name, value) {
            if value > 0.0 {
                regions.push(Region { name, value });
            }
        }
    }
    regions
}

/// Slices for the `PieParent` element `node`, or `None` when the overlay
/// does not apply.
pub(crate) fn pie_slices(doc: &Document, node: NodeId) -> Option<Vec<PieSlice>> {
    if doc.node(node).id() != Some(TRIGGER_ID) {
        return None;
    }
    let regions = parse_regions(doc, doc.lookup(RESULTS_ID)?);
    if regions.len() < 2 {
        return None;
    }
    let total: f64 = regions.iter().map(|r| r.value).sum();
    if !(total > 0.0) {
        return None;
    }

    let count = regions.len();
    let mut slices = Vec::with_capacity(count);
    let mut start = 0.0f64;
    for (index, region) in regions.into_iter().enumerate() {
        let end = start - region.value * PI * 2.0 / total;
        let mid = (start + end) * 0.5;
        let at = |radius: f64, angle: f64| {
            (
                (CENTER_X + radius * angle.cos()).round(),
                (CENTER_Y + radius * angle.sin()).round(),
            )
        };
        let (sx, sy) = at(RADIUS, start);
        let (ex, ey) = at(RADIUS, end);
        let (label_x, label_y) = at(LABEL_RADIUS, mid);
        let data = format!("M240,170 L{sx},{sy} A100,100 0 0,0 {ex},{ey}z");

        let (offset, fill, stroke, stroke_width) = if index == 0 {
            (
                ((EXPLODE * mid.cos()).round(), (EXPLODE * mid.sin()).round()),
                Color::from_rgba8(255, 136, 136, 255),
                Color::rgb(0.0, 0.0, 1.0),
                3.0,
            )
        } else {
            let gray = (255.0 * (index + 2) as f64 / (count + 2) as f64).round() as u8;
            (
                (0.0, 0.0),
                Color::from_rgba8(gray, gray, gray, 255),
                Color::BLACK,
                2.0,
            )
        };

        slices.push(PieSlice {
            path: parse_path_data(&data),
            offset,
            fill,
            stroke,
            stroke_width,
            label: region.name,
            label_x,
            label_y,
        });
        start = end;
    }
    Some(slices)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r##"<svg xmlns="http://www.w3.org/2000/svg">
        <g id="PieParent"/>
        <data xmlns="urn:report" id="results">
            <region><regionName>North</regionName><regionResult>3</regionResult></region>
            <region><regionName>South</regionName><regionResult>1</regionResult></region>
            <region><regionName>Empty</regionName><regionResult>0</regionResult></region>
            <region><regionResult>5</regionResult></region>
        </data>
    </svg>"##;

    #[test]
    fn keeps_named_positive_regions() {
        let doc = Document::parse(REPORT).expect("document");
        let regions = parse_regions(&doc, doc.lookup("results").expect("results"));
        assert_eq!(
            regions,
            vec![
                Region {
                    name: "North".to_string(),
                    value: 3.0
                },
                Region {
                    name: "South".to_string(),
                    value: 1.0
                },
            ]
        );
    }

    #[test]
    fn builds_slices_with_exploded_first_slice() {
        let doc = Document::parse(REPORT).expect("document");
        let slices = pie_slices(&doc, doc.lookup("PieParent").expect("pie")).expect("slices");
        assert_eq!(slices.len(), 2);

        let first = &slices[0];
        // 3/4 of the circle clockwise-negative from angle 0: ends at -270°.
        assert_eq!(first.path[0], PathSeg::MoveTo(240.0, 170.0));
        assert_eq!(first.path[1], PathSeg::LineTo(340.0, 170.0));
        assert_eq!(first.fill, Color::from_rgba8(255, 136, 136, 255));
        assert_eq!(first.stroke_width, 3.0);
        // Mid angle is -135°.
        assert_eq!(first.offset, (-21.0, -21.0));
        assert_eq!((first.label_x, first.label_y), (194.0, 124.0));

        let second = &slices[1];
        assert_eq!(second.offset, (0.0, 0.0));
        // round(255 * 3 / 4)
        assert_eq!(second.fill, Color::from_rgba8(191, 191, 191, 255));
        assert_eq!(second.stroke, Color::BLACK);
        assert_eq!(second.label, "South");
    }

    #[test]
    fn needs_two_regions_and_the_trigger_id() {
        let doc = Document::parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <g id="PieParent"/><g id="other"/>
                <data id="results"><region><regionName>A</regionName><regionResult>1</regionResult></region></data>
            </svg>"##,
        )
        .expect("document");
        assert!(pie_slices(&doc, doc.lookup("PieParent").expect("pie")).is_none());
        let full = Document::parse(REPORT).expect("document");
        assert!(pie_slices(&full, full.root()).is_none());
    }
}
