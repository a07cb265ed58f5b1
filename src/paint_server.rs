use std::collections::{HashMap, HashSet};

use tiny_skia::{Point as SkPoint, Shader, SpreadMode};

use crate::cascade::{color_property, opacity_property, parse_color, property};
use crate::document::{DefinitionKind, Document, ElementKind, NodeId};
use crate::geometry::{
    AspectRatio, Axis, BBox, LengthContext, Matrix, parse_number, parse_transform, parse_viewbox,
};
use crate::types::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Units {
    ObjectBoundingBox,
    UserSpaceOnUse,
}

impl Units {
    fn parse(raw: Option<&str>, default: Units) -> Units {
        match raw.map(str::trim) {
            Some("userSpaceOnUse") => Units::UserSpaceOnUse,
            Some("objectBoundingBox") => Units::ObjectBoundingBox,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GradientStop {
    pub offset: f32,
    /// Stop color with `stop-opacity` folded into alpha.
    pub color: Color,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GradientKind {
    Linear {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Radial {
        cx: f64,
        cy: f64,
        r: f64,
        fx: f64,
        fy: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradientDefinition {
    pub kind: GradientKind,
    pub units: Units,
    pub transform: Matrix,
    pub spread: SpreadMode,
    /// Sorted by offset; never empty.
    pub stops: Vec<GradientStop>,
}

/// Outcome of evaluating a paint server against a target box.
pub(crate) enum ServerPaint {
    Nothing,
    Solid(Color),
    Shader(Shader<'static>),
}

impl GradientDefinition {
    /// Shader in user space of the painted element.
    pub fn to_paint(&self, bbox: Option<BBox>, opacity: f32) -> ServerPaint {
        let to_user = match self.units {
            Units::UserSpaceOnUse => self.transform,
            Units::ObjectBoundingBox => match bbox.filter(|b| !b.is_empty()) {
                Some(bbox) => bbox.unit_transform().mul(self.transform),
                None => return ServerPaint::Nothing,
            },
        };
        if !to_user.is_invertible() {
            return ServerPaint::Nothing;
        }

        let last = self.stops[self.stops.len() - 1].color;
        if self.stops.len() == 1 {
            return ServerPaint::Solid(last.with_alpha_scaled(opacity));
        }

        let stops: Vec<tiny_skia::GradientStop> = self
            .stops
            .iter()
            .map(|stop| {
                tiny_skia::GradientStop::new(
                    stop.offset,
                    stop.color.with_alpha_scaled(opacity).to_sk_color(),
                )
            })
            .collect();
        let transform = to_sk_transform(to_user);

        let shader = match self.kind {
            GradientKind::Linear { x1, y1, x2, y2 } => {
                if (x1 - x2).abs() < 1e-12 && (y1 - y2).abs() < 1e-12 {
                    return ServerPaint::Solid(last.with_alpha_scaled(opacity));
                }
                tiny_skia::LinearGradient::new(
                    SkPoint::from_xy(x1 as f32, y1 as f32),
                    SkPoint::from_xy(x2 as f32, y2 as f32),
                    stops,
                    self.spread,
                    transform,
                )
            }
            GradientKind::Radial { cx, cy, r, fx, fy } => {
                if r <= 0.0 {
                    return ServerPaint::Solid(last.with_alpha_scaled(opacity));
                }
                tiny_skia::RadialGradient::new(
                    SkPoint::from_xy(fx as f32, fy as f32),
                    SkPoint::from_xy(cx as f32, cy as f32),
                    r as f32,
                    stops,
                    self.spread,
                    transform,
                )
            }
        };
        match shader {
            Some(shader) => ServerPaint::Shader(shader),
            None => ServerPaint::Solid(last.with_alpha_scaled(opacity)),
        }
    }
}

pub(crate) fn to_sk_transform(m: Matrix) -> tiny_skia::Transform {
    tiny_skia::Transform::from_row(
        m.a as f32, m.b as f32, m.c as f32, m.d as f32, m.e as f32, m.f as f32,
    )
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatternDefinition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub units: Units,
    pub content_units: Units,
    pub transform: Matrix,
    pub view_box: Option<BBox>,
    pub aspect: AspectRatio,
    /// Node whose children form the tile content (may be an `href` ancestor).
    pub content: NodeId,
}

impl PatternDefinition {
    /// Tile rectangle in the user space of the painted element.
    pub fn tile_rect(&self, bbox: Option<BBox>) -> Option<BBox> {
        let rect = match self.units {
            Units::UserSpaceOnUse => BBox::new(self.x, self.y, self.width, self.height),
            Units::ObjectBoundingBox => {
                let b = bbox?;
                BBox::new(
                    b.x + self.x * b.width,
                    b.y + self.y * b.height,
                    self.width * b.width,
                    self.height * b.height,
                )
            }
        };
        (!rect.is_empty()).then_some(rect)
    }

    /// Maps content coordinates into tile space (origin at the tile corner).
    pub fn content_transform(&self, tile: BBox, bbox: Option<BBox>) -> Matrix {
        if let Some(view_box) = self.view_box {
            return self.aspect.view_box_transform(view_box, tile.width, tile.height);
        }
        match (self.content_units, bbox) {
            (Units::ObjectBoundingBox, Some(b)) => Matrix::scale(b.width, b.height),
            _ => Matrix::identity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColorProfile {
    pub name: String,
    pub href: Option<String>,
    pub rendering_intent: Option<String>,
}

/// Paint servers indexed once per render; read-only afterwards.
#[derive(Debug, Default)]
pub(crate) struct PaintServerRegistry {
    gradients: HashMap<String, GradientDefinition>,
    patterns: HashMap<String, PatternDefinition>,
    color_profiles: HashMap<String, ColorProfile>,
}

impl PaintServerRegistry {
    pub fn scan(doc: &Document, ctx: &LengthContext) -> Self {
        let mut registry = PaintServerRegistry::default();
        for (id, node) in doc.iter() {
            let Some(key) = node.id() else {
                if node.kind == ElementKind::Definition(DefinitionKind::ColorProfile) {
                    registry.index_color_profile(doc, id);
                }
                continue;
            };
            match node.kind {
                ElementKind::Definition(
                    DefinitionKind::LinearGradient | DefinitionKind::RadialGradient,
                ) => {
                    if let Some(gradient) = build_gradient(doc, id, ctx) {
                        registry
                            .gradients
                            .entry(key.to_string())
                            .or_insert(gradient);
                    }
                }
                ElementKind::Definition(DefinitionKind::Pattern) => {
                    if let Some(pattern) = build_pattern(doc, id, key, ctx) {
                        registry.patterns.entry(key.to_string()).or_insert(pattern);
                    }
                }
                ElementKind::Definition(DefinitionKind::ColorProfile) => {
                    registry.index_color_profile(doc, id);
                }
                _ => {}
            }
        }
        registry
    }

    fn index_color_profile(&mut self, doc: &Document, id: NodeId) {
        let node = doc.node(id);
        let name = node
            .attribute("name")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| node.id())
            .unwrap_or("")
            .to_string();
        let profile = ColorProfile {
            name: name.clone(),
            href: node.href().map(str::to_string),
            rendering_intent: node.attribute("rendering-intent").map(str::to_string),
        };
        let mut keys = vec![name.clone(), name.to_ascii_lowercase()];
        if let Some(key) = node.id() {
            keys.push(key.to_string());
        }
        for key in keys.into_iter().filter(|k| !k.is_empty()) {
            self.color_profiles
                .entry(key)
                .or_insert_with(|| profile.clone());
        }
    }

    pub fn gradient(&self, id: &str) -> Option<&GradientDefinition> {
        self.gradients.get(id)
    }

    pub fn pattern(&self, id: &str) -> Option<&PatternDefinition> {
        self.patterns.get(id)
    }

    pub fn color_profile(&self, key: &str) -> Option<&ColorProfile> {
        let key = key.trim();
        self.color_profiles
            .get(key)
            .or_else(|| self.color_profiles.get(&key.to_ascii_lowercase()))
    }

    pub fn color_profile_count(&self) -> usize {
        self.color_profiles.len()
    }
}

/// `start` followed by the elements its `href` chain reaches, limited to
/// `family` and stopping at the first repeat.
fn href_chain(doc: &Document, start: NodeId, family: fn(ElementKind) -> bool) -> Vec<NodeId> {
    let mut chain = vec![start];
    let mut seen = HashSet::from([start]);
    let mut current = start;
    while let Some(next) = doc
        .node(current)
        .href_fragment()
        .and_then(|id| doc.lookup(id))
    {
        if !family(doc.node(next).kind) || !seen.insert(next) {
            break;
        }
        chain.push(next);
        current = next;
    }
    chain
}

fn chain_attr<'a>(doc: &'a Document, chain: &[NodeId], name: &str) -> Option<&'a str> {
    chain.iter().find_map(|id| doc.node(*id).attribute(name))
}

fn is_gradient(kind: ElementKind) -> bool {
    matches!(
        kind,
        ElementKind::Definition(DefinitionKind::LinearGradient | DefinitionKind::RadialGradient)
    )
}

fn is_pattern(kind: ElementKind) -> bool {
    kind == ElementKind::Definition(DefinitionKind::Pattern)
}

/// Gradient coordinate: a fraction in bounding-box units, a length otherwise.
fn gradient_coord(raw: Option<&str>, default: f64, units: Units, ctx: &LengthContext, axis: Axis) -> f64 {
    let Some(raw) = raw.map(str::trim) else {
        return default;
    };
    let value = match units {
        Units::ObjectBoundingBox => parse_fraction(raw),
        Units::UserSpaceOnUse => ctx.resolve(raw, axis),
    };
    value.unwrap_or(default)
}

/// Plain number or percentage as a fraction.
pub(crate) fn parse_fraction(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    match raw.strip_suffix('%') {
        Some(pct) => parse_number(pct).map(|v| v / 100.0),
        None => parse_number(raw),
    }
}

fn build_gradient(doc: &Document, id: NodeId, ctx: &LengthContext) -> Option<GradientDefinition> {
    let node = doc.node(id);
    let chain = href_chain(doc, id, is_gradient);
    let attr = |name: &str| chain_attr(doc, &chain, name);

    let units = Units::parse(attr("gradientUnits"), Units::ObjectBoundingBox);
    let transform = attr("gradientTransform")
        .map(parse_transform)
        .unwrap_or_else(Matrix::identity);
    let spread = match attr("spreadMethod").map(str::trim) {
        Some("reflect") => SpreadMode::Reflect,
        Some("repeat") => SpreadMode::Repeat,
        _ => SpreadMode::Pad,
    };
    let coord = |name: &str, default: f64, axis: Axis| {
        gradient_coord(attr(name), default, units, ctx, axis)
    };
    let (full, half) = match units {
        Units::ObjectBoundingBox => (1.0, 0.5),
        Units::UserSpaceOnUse => (
            ctx.viewport.percent_basis(Axis::X),
            ctx.viewport.percent_basis(Axis::Other) * 0.5,
        ),
    };

    let kind = match node.kind {
        ElementKind::Definition(DefinitionKind::LinearGradient) => GradientKind::Linear {
            x1: coord("x1", 0.0, Axis::X),
            y1: coord("y1", 0.0, Axis::Y),
            x2: coord("x2", full, Axis::X),
            y2: coord("y2", 0.0, Axis::Y),
        },
        ElementKind::Definition(DefinitionKind::RadialGradient) => {
            let (cx_default, cy_default) = match units {
                Units::ObjectBoundingBox => (0.5, 0.5),
                Units::UserSpaceOnUse => (
                    ctx.viewport.percent_basis(Axis::X) * 0.5,
                    ctx.viewport.percent_basis(Axis::Y) * 0.5,
                ),
            };
            let cx = coord("cx", cx_default, Axis::X);
            let cy = coord("cy", cy_default, Axis::Y);
            GradientKind::Radial {
                cx,
                cy,
                r: coord("r", half, Axis::Other),
                fx: coord("fx", cx, Axis::X),
                fy: coord("fy", cy, Axis::Y),
            }
        }
        _ => return None,
    };

    let gradient_color = property(node, "color")
        .and_then(parse_color)
        .unwrap_or(Color::BLACK);
    let stop_source = chain.iter().copied().find(|gid| {
        doc.node(*gid)
            .children
            .iter()
            .any(|c| doc.node(*c).kind == ElementKind::Definition(DefinitionKind::Stop))
    });
    let mut stops = Vec::new();
    if let Some(source) = stop_source {
        for child in &doc.node(source).children {
            let stop = doc.node(*child);
            if stop.kind != ElementKind::Definition(DefinitionKind::Stop) {
                continue;
            }
            let offset = stop
                .attribute("offset")
                .and_then(parse_fraction)
                .unwrap_or(0.0)
                .clamp(0.0, 1.0) as f32;
            let current = property(stop, "color")
                .and_then(parse_color)
                .unwrap_or(gradient_color);
            let color = color_property(stop, "stop-color", current).unwrap_or(Color::BLACK);
            let opacity = opacity_property(stop, "stop-opacity").unwrap_or(1.0);
            stops.push(GradientStop {
                offset,
                color: color.with_alpha_scaled(opacity),
            });
        }
    }
    if stops.is_empty() {
        stops = vec![
            GradientStop {
                offset: 0.0,
                color: Color::BLACK,
            },
            GradientStop {
                offset: 1.0,
                color: Color::WHITE,
            },
        ];
    }
    stops.sort_by(|a, b| a.offset.total_cmp(&b.offset));

    Some(GradientDefinition {
        kind,
        units,
        transform,
        spread,
        stops,
    })
}

fn build_pattern(
    doc: &Document,
    id: NodeId,
    key: &str,
    ctx: &LengthContext,
) -> Option<PatternDefinition> {
    let chain = href_chain(doc, id, is_pattern);
    let attr = |name: &str| chain_attr(doc, &chain, name);

    let units = Units::parse(attr("patternUnits"), Units::ObjectBoundingBox);
    let content_units = Units::parse(attr("patternContentUnits"), Units::UserSpaceOnUse);
    let coord = |name: &str, axis: Axis| gradient_coord(attr(name), 0.0, units, ctx, axis);
    let content = chain
        .iter()
        .copied()
        .find(|pid| !doc.node(*pid).children.is_empty())
        .unwrap_or(id);

    Some(PatternDefinition {
        id: key.to_string(),
        x: coord("x", Axis::X),
        y: coord("y", Axis::Y),
        width: coord("width", Axis::X),
        height: coord("height", Axis::Y),
        units,
        content_units,
        transform: attr("patternTransform")
            .map(parse_transform)
            .unwrap_or_else(Matrix::identity),
        view_box: parse_viewbox(attr("viewBox")),
        aspect: AspectRatio::parse(attr("preserveAspectRatio")),
        content,
    })
}
