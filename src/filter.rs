use std::collections::HashMap;

use crate::cascade::{color_property, opacity_property, property};
use crate::document::{DefinitionKind, Document, ElementKind, Node, NodeId};
use crate::error::RenderError;
use crate::geometry::{Matrix, parse_number, parse_number_list};
use crate::surface::{
    PixelRect, PixelSurface, from_linear_straight, from_unit, to_linear_straight, to_u8, to_unit,
};
use crate::types::Color;

/// Primitive tags evaluated by the pipeline (lower-cased).
pub(crate) const SUPPORTED_PRIMITIVES: &[&str] = &[
    "feblend",
    "fecolormatrix",
    "fecomponenttransfer",
    "fecomposite",
    "feconvolvematrix",
    "fediffuselighting",
    "fedisplacementmap",
    "feflood",
    "fegaussianblur",
    "feimage",
    "femerge",
    "femorphology",
    "feoffset",
    "fespecularlighting",
    "fetile",
    "feturbulence",
];

const SOURCE_GRAPHIC: &str = "SourceGraphic";
const SOURCE_ALPHA: &str = "SourceAlpha";

/// Services the pipeline needs from the renderer.
pub(crate) trait FilterHost {
    /// Renders the element with `id` at the current transform into a canvas-sized surface.
    fn render_fragment(&self, id: &str) -> Result<Option<PixelSurface>, RenderError>;

    /// Loads an external raster and places it in device space.
    fn load_image(
        &self,
        href: &str,
        x: f64,
        y: f64,
        width: Option<f64>,
        height: Option<f64>,
    ) -> Result<Option<PixelSurface>, RenderError>;

    fn note(&self, event: &str, detail: &str);
}

/// Fails on the first primitive outside the supported set.
pub(crate) fn validate_filters(doc: &Document) -> Result<(), RenderError> {
    for (_, node) in doc.iter() {
        if node.kind != ElementKind::Definition(DefinitionKind::Filter) {
            continue;
        }
        for child in &node.children {
            let child = doc.node(*child);
            if matches!(child.kind, ElementKind::Definition(DefinitionKind::Metadata)) {
                continue;
            }
            let tag = child.tag.to_ascii_lowercase();
            if !SUPPORTED_PRIMITIVES.contains(&tag.as_str()) {
                return Err(RenderError::UnsupportedFeature(format!(
                    "Unsupported filter primitive: {}",
                    child.tag
                )));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompositeOp {
    Over,
    In,
    Out,
    Atop,
    Xor,
    Arithmetic { k1: f32, k2: f32, k3: f32, k4: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Darken,
    Lighten,
}

#[derive(Debug, Clone, PartialEq)]
enum TransferFn {
    Identity,
    Table(Vec<f32>),
    Discrete(Vec<f32>),
    Linear { slope: f32, intercept: f32 },
    Gamma { amplitude: f32, exponent: f32, offset: f32 },
}

impl TransferFn {
    fn apply(&self, c: f32) -> f32 {
        let c = c.clamp(0.0, 1.0);
        let v = match self {
            TransferFn::Identity => c,
            TransferFn::Table(values) => match values.len() {
                0 => c,
                1 => values[0],
                n => {
                    let segments = (n - 1) as f32;
                    let k = ((c * segments).floor() as usize).min(n - 2);
                    let t = c * segments - k as f32;
                    values[k] + (values[k + 1] - values[k]) * t
                }
            },
            TransferFn::Discrete(values) => match values.len() {
                0 => c,
                n => values[((c * n as f32).floor() as usize).min(n - 1)],
            },
            TransferFn::Linear { slope, intercept } => slope * c + intercept,
            TransferFn::Gamma {
                amplitude,
                exponent,
                offset,
            } => amplitude * libm::powf(c, *exponent) + offset,
        };
        v.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeMode {
    Duplicate,
    Wrap,
    None,
}

#[derive(Debug, Clone, PartialEq)]
struct Convolve {
    order_x: usize,
    order_y: usize,
    kernel: Vec<f32>,
    divisor: f32,
    bias: f32,
    target_x: usize,
    target_y: usize,
    edge_mode: EdgeMode,
    preserve_alpha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Turbulence {
    base_x: f64,
    base_y: f64,
    octaves: u32,
    seed: i32,
    fractal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Lighting {
    specular: bool,
    surface_scale: f32,
    constant: f32,
    exponent: f32,
    color: Color,
    light: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    R,
    G,
    B,
    A,
}

#[derive(Debug, Clone, PartialEq)]
enum PrimitiveKind {
    Flood { color: Color },
    Offset { dx: i64, dy: i64 },
    GaussianBlur { sx: f64, sy: f64 },
    ColorMatrix { matrix: [f32; 20] },
    ComponentTransfer { funcs: [TransferFn; 4] },
    Composite(CompositeOp),
    Blend(BlendMode),
    Merge { inputs: Vec<Option<String>> },
    Morphology { dilate: bool, rx: i64, ry: i64 },
    ConvolveMatrix(Convolve),
    Tile { region: Option<PixelRect> },
    Turbulence(Turbulence),
    DisplacementMap { scale_x: f32, scale_y: f32, x_channel: Channel, y_channel: Channel },
    Lighting(Lighting),
    Image { href: String, x: f64, y: f64, width: Option<f64>, height: Option<f64> },
    PassThrough(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Primitive {
    tag: String,
    kind: PrimitiveKind,
    input: Option<String>,
    input2: Option<String>,
    result: Option<String>,
    linear: bool,
}

/// Evaluates one `<filter>` element against a device-space source surface.
pub(crate) struct FilterPipeline<'a> {
    doc: &'a Document,
    filter: NodeId,
    ctm: Matrix,
    host: &'a dyn FilterHost,
}

impl<'a> FilterPipeline<'a> {
    pub fn new(doc: &'a Document, filter: NodeId, ctm: Matrix, host: &'a dyn FilterHost) -> Self {
        Self {
            doc,
            filter,
            ctm,
            host,
        }
    }

    pub fn apply(&self, source: PixelSurface) -> Result<PixelSurface, RenderError> {
        let primitives = self.parse_primitives();
        let source_alpha = alpha_only(&source);
        let flood_region = source.opaque_bounds();
        let mut env: HashMap<String, PixelSurface> = HashMap::new();
        env.insert(SOURCE_GRAPHIC.to_string(), source.clone());
        env.insert(SOURCE_ALPHA.to_string(), source_alpha);
        let mut previous = source;

        for (index, primitive) in primitives.iter().enumerate() {
            self.host.note("svg.filter.primitive", &primitive.tag);
            let input = lookup_input(
                &env,
                primitive.input.as_deref().or(default_input(&primitive.kind)),
                &previous,
            );
            let second_input = || {
                lookup_input(
                    &env,
                    primitive.input2.as_deref().or(Some(SOURCE_GRAPHIC)),
                    &previous,
                )
            };
            let output = match &primitive.kind {
                PrimitiveKind::Flood { color } => flood(&previous, flood_region, *color),
                PrimitiveKind::Offset { dx, dy } => offset(input, *dx, *dy),
                PrimitiveKind::GaussianBlur { sx, sy } => gaussian_blur(input, *sx, *sy),
                PrimitiveKind::ColorMatrix { matrix } => {
                    color_matrix(input, matrix, primitive.linear)
                }
                PrimitiveKind::ComponentTransfer { funcs } => {
                    component_transfer(input, funcs, primitive.linear)
                }
                PrimitiveKind::Composite(op) => {
                    let backdrop = second_input();
                    composite(input, backdrop, *op)
                }
                PrimitiveKind::Blend(mode) => {
                    let backdrop = second_input();
                    blend(input, backdrop, *mode, primitive.linear)
                }
                PrimitiveKind::Merge { inputs } => {
                    let mut out = previous.same_size();
                    for name in inputs {
                        let layer = lookup_input(&env, name.as_deref(), &previous);
                        out = composite(layer, &out, CompositeOp::Over);
                    }
                    out
                }
                PrimitiveKind::Morphology { dilate, rx, ry } => {
                    morphology(input, *dilate, *rx, *ry)
                }
                PrimitiveKind::ConvolveMatrix(params) => {
                    convolve_matrix(input, params, primitive.linear)
                }
                PrimitiveKind::Tile { region } => tile(input, *region),
                PrimitiveKind::Turbulence(params) => turbulence(
                    input.width,
                    input.height,
                    params,
                    self.ctm.axis_scales(),
                ),
                PrimitiveKind::DisplacementMap {
                    scale_x,
                    scale_y,
                    x_channel,
                    y_channel,
                } => {
                    let map = second_input();
                    displacement_map(
                        input,
                        map,
                        (*scale_x, *scale_y),
                        (*x_channel, *y_channel),
                        primitive.linear,
                    )
                }
                PrimitiveKind::Lighting(params) => lighting(input, params),
                PrimitiveKind::Image {
                    href,
                    x,
                    y,
                    width,
                    height,
                } => self.image(href, *x, *y, *width, *height, &previous)?,
                PrimitiveKind::PassThrough(tag) => {
                    self.host.note("svg.filter.unsupported", tag);
                    input.clone()
                }
            };

            let key = primitive
                .result
                .clone()
                .unwrap_or_else(|| format!("__result_{index}"));
            env.insert(key, output.clone());
            previous = output;
        }

        Ok(previous)
    }

    fn image(
        &self,
        href: &str,
        x: f64,
        y: f64,
        width: Option<f64>,
        height: Option<f64>,
        previous: &PixelSurface,
    ) -> Result<PixelSurface, RenderError> {
        let surface = match href.strip_prefix('#') {
            Some(id) => self.host.render_fragment(id)?,
            None if href.is_empty() => None,
            None => self.host.load_image(href, x, y, width, height)?,
        };
        Ok(surface
            .filter(|s| s.width == previous.width && s.height == previous.height)
            .unwrap_or_else(|| previous.same_size()))
    }

    fn parse_primitives(&self) -> Vec<Primitive> {
        let filter = self.doc.node(self.filter);
        let filter_linear = color_space_is_linear(filter, true);
        let (scale_x, scale_y) = self.ctm.axis_scales();
        let mut out = Vec::new();
        for child in &filter.children {
            let node = self.doc.node(*child);
            if matches!(node.kind, ElementKind::Definition(DefinitionKind::Metadata)) {
                continue;
            }
            let tag = node.tag.to_ascii_lowercase();
            let kind = self.parse_kind(&tag, node, scale_x, scale_y);
            out.push(Primitive {
                tag: node.tag.clone(),
                kind,
                input: attr_string(node, "in"),
                input2: attr_string(node, "in2"),
                result: attr_string(node, "result"),
                linear: color_space_is_linear(node, filter_linear),
            });
        }
        out
    }

    fn parse_kind(&self, tag: &str, node: &Node, scale_x: f64, scale_y: f64) -> PrimitiveKind {
        match tag {
            "feflood" => {
                let color = color_property(node, "flood-color", Color::BLACK).unwrap_or(Color::BLACK);
                let opacity = opacity_property(node, "flood-opacity").unwrap_or(1.0);
                PrimitiveKind::Flood {
                    color: color.with_alpha_scaled(opacity),
                }
            }
            "feoffset" => PrimitiveKind::Offset {
                dx: offset_pixels(num_attr(node, "dx", 0.0) * scale_x),
                dy: offset_pixels(num_attr(node, "dy", 0.0) * scale_y),
            },
            "fegaussianblur" => {
                let values = list_attr(node, "stdDeviation");
                let sx = values.first().copied().unwrap_or(0.0);
                let sy = values.get(1).copied().unwrap_or(sx);
                PrimitiveKind::GaussianBlur {
                    sx: sx * scale_x,
                    sy: sy * scale_y,
                }
            }
            "fecolormatrix" => PrimitiveKind::ColorMatrix {
                matrix: color_matrix_values(node),
            },
            "fecomponenttransfer" => PrimitiveKind::ComponentTransfer {
                funcs: self.transfer_functions(node),
            },
            "fecomposite" => {
                let op = match node.attribute("operator").map(str::trim) {
                    Some("in") => CompositeOp::In,
                    Some("out") => CompositeOp::Out,
                    Some("atop") => CompositeOp::Atop,
                    Some("xor") => CompositeOp::Xor,
                    Some("arithmetic") => CompositeOp::Arithmetic {
                        k1: num_attr(node, "k1", 0.0) as f32,
                        k2: num_attr(node, "k2", 0.0) as f32,
                        k3: num_attr(node, "k3", 0.0) as f32,
                        k4: num_attr(node, "k4", 0.0) as f32,
                    },
                    _ => CompositeOp::Over,
                };
                PrimitiveKind::Composite(op)
            }
            "feblend" => PrimitiveKind::Blend(match node.attribute("mode").map(str::trim) {
                Some("multiply") => BlendMode::Multiply,
                Some("screen") => BlendMode::Screen,
                Some("darken") => BlendMode::Darken,
                Some("lighten") => BlendMode::Lighten,
                _ => BlendMode::Normal,
            }),
            "femerge" => PrimitiveKind::Merge {
                inputs: node
                    .children
                    .iter()
                    .map(|id| self.doc.node(*id))
                    .filter(|n| n.tag.eq_ignore_ascii_case("femergenode"))
                    .map(|n| attr_string(n, "in"))
                    .collect(),
            },
            "femorphology" => {
                let values = list_attr(node, "radius");
                let rx = values.first().copied().unwrap_or(0.0);
                let ry = values.get(1).copied().unwrap_or(rx);
                PrimitiveKind::Morphology {
                    dilate: node.attribute("operator").map(str::trim) == Some("dilate"),
                    rx: (rx * scale_x).round().max(0.0) as i64,
                    ry: (ry * scale_y).round().max(0.0) as i64,
                }
            }
            "feconvolvematrix" => PrimitiveKind::ConvolveMatrix(convolve_params(node)),
            "fetile" => PrimitiveKind::Tile {
                region: self.subregion(node),
            },
            "feturbulence" => {
                let values = list_attr(node, "baseFrequency");
                let mut base_x = values.first().copied().unwrap_or(0.0);
                let mut base_y = values.get(1).copied().unwrap_or(base_x);
                if base_x <= 0.0 && base_y > 0.0 {
                    base_x = base_y;
                }
                if base_y <= 0.0 && base_x > 0.0 {
                    base_y = base_x;
                }
                PrimitiveKind::Turbulence(Turbulence {
                    base_x,
                    base_y,
                    octaves: (num_attr(node, "numOctaves", 1.0).round().clamp(1.0, 8.0)) as u32,
                    seed: num_attr(node, "seed", 0.0)
                        .round()
                        .clamp(i32::MIN as f64, i32::MAX as f64) as i32,
                    fractal: node.attribute("type").map(str::trim) == Some("fractalNoise"),
                })
            }
            "fedisplacementmap" => {
                let scale = num_attr(node, "scale", 0.0);
                PrimitiveKind::DisplacementMap {
                    scale_x: (scale * scale_x) as f32,
                    scale_y: (scale * scale_y) as f32,
                    x_channel: channel_attr(node, "xChannelSelector"),
                    y_channel: channel_attr(node, "yChannelSelector"),
                }
            }
            "fediffuselighting" | "fespecularlighting" => {
                PrimitiveKind::Lighting(self.lighting_params(node, tag == "fespecularlighting"))
            }
            "feimage" => {
                let (x, y) = (num_attr(node, "x", 0.0), num_attr(node, "y", 0.0));
                PrimitiveKind::Image {
                    href: node.href().unwrap_or("").to_string(),
                    x,
                    y,
                    width: node.attribute("width").and_then(parse_number),
                    height: node.attribute("height").and_then(parse_number),
                }
            }
            other => PrimitiveKind::PassThrough(other.to_string()),
        }
    }

    fn transfer_functions(&self, node: &Node) -> [TransferFn; 4] {
        let mut funcs = [
            TransferFn::Identity,
            TransferFn::Identity,
            TransferFn::Identity,
            TransferFn::Identity,
        ];
        for child in &node.children {
            let func = self.doc.node(*child);
            let slot = match func.tag.to_ascii_lowercase().as_str() {
                "fefuncr" => 0,
                "fefuncg" => 1,
                "fefuncb" => 2,
                "fefunca" => 3,
                _ => continue,
            };
            let values: Vec<f32> = list_attr(func, "tableValues")
                .into_iter()
                .map(|v| v as f32)
                .collect();
            funcs[slot] = match func.attribute("type").map(str::trim) {
                Some("table") => TransferFn::Table(values),
                Some("discrete") => TransferFn::Discrete(values),
                Some("linear") => TransferFn::Linear {
                    slope: num_attr(func, "slope", 1.0) as f32,
                    intercept: num_attr(func, "intercept", 0.0) as f32,
                },
                Some("gamma") => TransferFn::Gamma {
                    amplitude: num_attr(func, "amplitude", 1.0) as f32,
                    exponent: num_attr(func, "exponent", 1.0) as f32,
                    offset: num_attr(func, "offset", 0.0) as f32,
                },
                _ => TransferFn::Identity,
            };
        }
        funcs
    }

    fn lighting_params(&self, node: &Node, specular: bool) -> Lighting {
        let color = color_property(node, "lighting-color", Color::WHITE).unwrap_or(Color::WHITE);
        let mut light = [0.0, 0.0, 1.0];
        for child in &node.children {
            let source = self.doc.node(*child);
            if source.tag.eq_ignore_ascii_case("fedistantlight") {
                let azimuth = num_attr(source, "azimuth", 0.0).to_radians();
                let elevation = num_attr(source, "elevation", 0.0).to_radians();
                light = [
                    (elevation.cos() * azimuth.cos()) as f32,
                    (elevation.cos() * azimuth.sin()) as f32,
                    elevation.sin() as f32,
                ];
                break;
            }
        }
        let constant_name = if specular {
            "specularConstant"
        } else {
            "diffuseConstant"
        };
        Lighting {
            specular,
            surface_scale: num_attr(node, "surfaceScale", 1.0) as f32,
            constant: num_attr(node, constant_name, 1.0) as f32,
            exponent: num_attr(node, "specularExponent", 1.0).clamp(1.0, 128.0) as f32,
            color,
            light,
        }
    }

    /// Primitive subregion in device pixels, when any of x/y/width/height is set.
    fn subregion(&self, node: &Node) -> Option<PixelRect> {
        let x = node.attribute("x").and_then(parse_number);
        let y = node.attribute("y").and_then(parse_number);
        let w = node.attribute("width").and_then(parse_number);
        let h = node.attribute("height").and_then(parse_number);
        if x.is_none() && y.is_none() && w.is_none() && h.is_none() {
            return None;
        }
        let (sx, sy) = self.ctm.axis_scales();
        let (dx, dy) = self.ctm.apply(x.unwrap_or(0.0), y.unwrap_or(0.0));
        let x0 = dx.round() as i64;
        let y0 = dy.round() as i64;
        let x1 = w.map(|w| (dx + w * sx).round() as i64).unwrap_or(i64::MAX);
        let y1 = h.map(|h| (dy + h * sy).round() as i64).unwrap_or(i64::MAX);
        Some(PixelRect { x0, y0, x1, y1 })
    }
}

fn attr_string(node: &Node, name: &str) -> Option<String> {
    node.attribute(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn num_attr(node: &Node, name: &str, default: f64) -> f64 {
    node.attribute(name)
        .and_then(parse_number)
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn list_attr(node: &Node, name: &str) -> Vec<f64> {
    node.attribute(name).map(parse_number_list).unwrap_or_default()
}

fn channel_attr(node: &Node, name: &str) -> Channel {
    match node.attribute(name).map(str::trim) {
        Some("R") => Channel::R,
        Some("G") => Channel::G,
        Some("B") => Channel::B,
        _ => Channel::A,
    }
}

fn color_space_is_linear(node: &Node, inherited: bool) -> bool {
    match property(node, "color-interpolation-filters").map(str::trim) {
        Some("sRGB") | Some("srgb") => false,
        Some("linearRGB") | Some("linearrgb") => true,
        _ => inherited,
    }
}

/// Named input used when `in` is absent. `None` chains the previous result.
fn default_input(kind: &PrimitiveKind) -> Option<&'static str> {
    match kind {
        PrimitiveKind::Lighting(_) => Some(SOURCE_ALPHA),
        PrimitiveKind::Tile { .. } | PrimitiveKind::PassThrough(_) => None,
        _ => Some(SOURCE_GRAPHIC),
    }
}

/// Unknown names resolve to the previous result.
fn lookup_input<'e>(
    env: &'e HashMap<String, PixelSurface>,
    name: Option<&str>,
    previous: &'e PixelSurface,
) -> &'e PixelSurface {
    name.and_then(|n| env.get(n)).unwrap_or(previous)
}

const IDENTITY_MATRIX: [f32; 20] = [
    1.0, 0.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, 0.0,
];

fn color_matrix_values(node: &Node) -> [f32; 20] {
    let values = list_attr(node, "values");
    match node.attribute("type").map(str::trim).unwrap_or("matrix") {
        "saturate" => {
            let s = values.first().copied().unwrap_or(1.0) as f32;
            [
                0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s, 0.0, 0.0, //
                0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s, 0.0, 0.0, //
                0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0, 0.0,
            ]
        }
        "hueRotate" => {
            let deg = values.first().copied().unwrap_or(0.0);
            let (sin, cos) = deg.to_radians().sin_cos();
            let (s, c) = (sin as f32, cos as f32);
            [
                0.213 + c * 0.787 - s * 0.213,
                0.715 - c * 0.715 - s * 0.715,
                0.072 - c * 0.072 + s * 0.928,
                0.0,
                0.0,
                0.213 - c * 0.213 + s * 0.143,
                0.715 + c * 0.285 + s * 0.140,
                0.072 - c * 0.072 - s * 0.283,
                0.0,
                0.0,
                0.213 - c * 0.213 - s * 0.787,
                0.715 - c * 0.715 + s * 0.715,
                0.072 + c * 0.928 + s * 0.072,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
                1.0,
                0.0,
            ]
        }
        "luminanceToAlpha" => [
            0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 0.0, 0.0, //
            0.2126, 0.7152, 0.0722, 0.0, 0.0,
        ],
        _ if values.len() >= 20 => {
            let mut m = [0.0f32; 20];
            for (slot, v) in m.iter_mut().zip(values.iter()) {
                *slot = *v as f32;
            }
            m
        }
        _ => IDENTITY_MATRIX,
    }
}

fn convolve_params(node: &Node) -> Convolve {
    let order = list_attr(node, "order");
    let order_x = order.first().copied().unwrap_or(3.0).round().max(1.0) as usize;
    let order_y = order.get(1).copied().unwrap_or(order_x as f64).round().max(1.0) as usize;
    let mut kernel: Vec<f32> = list_attr(node, "kernelMatrix")
        .into_iter()
        .map(|v| v as f32)
        .collect();
    let size = order_x * order_y;
    if kernel.len() < size {
        kernel = vec![0.0; size];
        kernel[(order_y / 2) * order_x + order_x / 2] = 1.0;
    }
    kernel.truncate(size);
    let sum: f32 = kernel.iter().sum();
    let divisor = node
        .attribute("divisor")
        .and_then(parse_number)
        .map(|d| d as f32)
        .filter(|d| d.abs() > 1e-6)
        .unwrap_or(if sum.abs() < 1e-6 { 1.0 } else { sum });
    let target = |name: &str, order: usize| {
        node.attribute(name)
            .and_then(parse_number)
            .map(|v| v.round().max(0.0) as usize)
            .filter(|v| *v < order)
            .unwrap_or(order / 2)
    };
    Convolve {
        order_x,
        order_y,
        kernel,
        divisor,
        bias: num_attr(node, "bias", 0.0) as f32,
        target_x: target("targetX", order_x),
        target_y: target("targetY", order_y),
        edge_mode: match node.attribute("edgeMode").map(str::trim) {
            Some("wrap") => EdgeMode::Wrap,
            Some("none") => EdgeMode::None,
            _ => EdgeMode::Duplicate,
        },
        preserve_alpha: node.attribute("preserveAlpha").map(str::trim) == Some("true"),
    }
}

fn unpack(px: [u8; 4], linear: bool) -> [f32; 4] {
    if linear {
        return to_linear_straight(px);
    }
    let a = px[3];
    if a == 0 {
        return [0.0; 4];
    }
    let af = a as f32;
    [
        (px[0] as f32 / af).min(1.0),
        (px[1] as f32 / af).min(1.0),
        (px[2] as f32 / af).min(1.0),
        af / 255.0,
    ]
}

fn pack(v: [f32; 4], linear: bool) -> [u8; 4] {
    if linear {
        return from_linear_straight(v);
    }
    let a = v[3].clamp(0.0, 1.0);
    if a <= 0.0 {
        return [0; 4];
    }
    [
        to_u8(v[0].clamp(0.0, 1.0) * a),
        to_u8(v[1].clamp(0.0, 1.0) * a),
        to_u8(v[2].clamp(0.0, 1.0) * a),
        to_u8(a),
    ]
}

fn map_pixels(input: &PixelSurface, f: impl Fn([u8; 4]) -> [u8; 4]) -> PixelSurface {
    let mut out = input.same_size();
    for (dst, src) in out.data.chunks_exact_mut(4).zip(input.data.chunks_exact(4)) {
        dst.copy_from_slice(&f([src[0], src[1], src[2], src[3]]));
    }
    out
}

fn alpha_only(source: &PixelSurface) -> PixelSurface {
    map_pixels(source, |px| [0, 0, 0, px[3]])
}

fn flood(size_of: &PixelSurface, region: Option<PixelRect>, color: Color) -> PixelSurface {
    let mut out = size_of.same_size();
    let region = region.unwrap_or_else(|| out.full_rect());
    let a = color.a.clamp(0.0, 1.0);
    let px = [
        to_u8(color.r * a),
        to_u8(color.g * a),
        to_u8(color.b * a),
        to_u8(a),
    ];
    for y in region.y0.max(0)..region.y1.min(out.height as i64) {
        for x in region.x0.max(0)..region.x1.min(out.width as i64) {
            out.set(x as u32, y as u32, px);
        }
    }
    out
}

/// Shifts past this many device pixels leave nothing on any surface.
const MAX_OFFSET: f64 = 1.0e7;

fn offset_pixels(v: f64) -> i64 {
    if v.is_finite() {
        v.round().clamp(-MAX_OFFSET, MAX_OFFSET) as i64
    } else {
        0
    }
}

fn offset(input: &PixelSurface, dx: i64, dy: i64) -> PixelSurface {
    let mut out = input.same_size();
    for y in 0..out.height {
        for x in 0..out.width {
            let sx = (x as i64).saturating_sub(dx);
            let sy = (y as i64).saturating_sub(dy);
            out.set(x, y, input.get_signed(sx, sy));
        }
    }
    out
}

fn gaussian_blur(input: &PixelSurface, sx: f64, sy: f64) -> PixelSurface {
    let mut out = input.clone();
    if sx > 0.0 {
        out = blur_pass(&out, sx, true);
    }
    if sy > 0.0 {
        out = blur_pass(&out, sy, false);
    }
    out
}

fn blur_pass(input: &PixelSurface, sigma: f64, horizontal: bool) -> PixelSurface {
    let radius = ((3.0 * sigma).ceil() as i64).max(1);
    let two_sigma_sq = (2.0 * sigma * sigma) as f32;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|i| libm::expf(-((i * i) as f32) / two_sigma_sq))
        .collect();
    let (w, h) = (input.width as i64, input.height as i64);
    let mut out = input.same_size();
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            let mut weight_sum = 0.0f32;
            for k in -radius..=radius {
                let (sx, sy) = if horizontal { (x + k, y) } else { (x, y + k) };
                if sx < 0 || sy < 0 || sx >= w || sy >= h {
                    continue;
                }
                let weight = weights[(k + radius) as usize];
                let px = to_unit(input.get(sx as u32, sy as u32));
                for c in 0..4 {
                    acc[c] += px[c] * weight;
                }
                weight_sum += weight;
            }
            if weight_sum > 0.0 {
                for c in acc.iter_mut() {
                    *c /= weight_sum;
                }
            }
            out.set(x as u32, y as u32, from_unit(acc));
        }
    }
    out
}

fn color_matrix(input: &PixelSurface, m: &[f32; 20], linear: bool) -> PixelSurface {
    map_pixels(input, |px| {
        let [r, g, b, a] = unpack(px, linear);
        let row = |i: usize| m[i] * r + m[i + 1] * g + m[i + 2] * b + m[i + 3] * a + m[i + 4];
        pack(
            [
                row(0).clamp(0.0, 1.0),
                row(5).clamp(0.0, 1.0),
                row(10).clamp(0.0, 1.0),
                row(15).clamp(0.0, 1.0),
            ],
            linear,
        )
    })
}

fn component_transfer(input: &PixelSurface, funcs: &[TransferFn; 4], linear: bool) -> PixelSurface {
    map_pixels(input, |px| {
        let v = unpack(px, linear);
        pack(
            [
                funcs[0].apply(v[0]),
                funcs[1].apply(v[1]),
                funcs[2].apply(v[2]),
                funcs[3].apply(v[3]),
            ],
            linear,
        )
    })
}

/// Porter-Duff and arithmetic compositing of `src` (in) onto `dst` (in2).
fn composite(src: &PixelSurface, dst: &PixelSurface, op: CompositeOp) -> PixelSurface {
    let mut out = src.same_size();
    for (i, o) in out.data.chunks_exact_mut(4).enumerate() {
        let j = i * 4;
        let s = to_unit([src.data[j], src.data[j + 1], src.data[j + 2], src.data[j + 3]]);
        let d = to_unit([dst.data[j], dst.data[j + 1], dst.data[j + 2], dst.data[j + 3]]);
        let (sa, da) = (s[3], d[3]);
        let result = match op {
            CompositeOp::Over => std::array::from_fn(|c| s[c] + d[c] * (1.0 - sa)),
            CompositeOp::In => std::array::from_fn(|c| s[c] * da),
            CompositeOp::Out => std::array::from_fn(|c| s[c] * (1.0 - da)),
            CompositeOp::Atop => std::array::from_fn(|c| s[c] * da + d[c] * (1.0 - sa)),
            CompositeOp::Xor => {
                std::array::from_fn(|c| s[c] * (1.0 - da) + d[c] * (1.0 - sa))
            }
            CompositeOp::Arithmetic { k1, k2, k3, k4 } => {
                if sa <= 0.0 && da <= 0.0 {
                    [0.0; 4]
                } else {
                    let f = |a: f32, b: f32| (k1 * a * b + k2 * a + k3 * b + k4).clamp(0.0, 1.0);
                    let alpha = f(sa, da);
                    [
                        f(s[0], d[0]).min(alpha),
                        f(s[1], d[1]).min(alpha),
                        f(s[2], d[2]).min(alpha),
                        alpha,
                    ]
                }
            }
        };
        o.copy_from_slice(&from_unit(result));
    }
    out
}

fn blend(src: &PixelSurface, backdrop: &PixelSurface, mode: BlendMode, linear: bool) -> PixelSurface {
    let mut out = src.same_size();
    for (i, o) in out.data.chunks_exact_mut(4).enumerate() {
        let j = i * 4;
        let s = unpack(
            [src.data[j], src.data[j + 1], src.data[j + 2], src.data[j + 3]],
            linear,
        );
        let b = unpack(
            [
                backdrop.data[j],
                backdrop.data[j + 1],
                backdrop.data[j + 2],
                backdrop.data[j + 3],
            ],
            linear,
        );
        let (sa, ba) = (s[3], b[3]);
        let out_a = sa + ba - sa * ba;
        if out_a <= 0.0 {
            o.copy_from_slice(&[0; 4]);
            continue;
        }
        let mix = |cb: f32, cs: f32| match mode {
            BlendMode::Normal => cs,
            BlendMode::Multiply => cb * cs,
            BlendMode::Screen => cb + cs - cb * cs,
            BlendMode::Darken => cb.min(cs),
            BlendMode::Lighten => cb.max(cs),
        };
        let channel = |c: usize| {
            let premul =
                sa * (1.0 - ba) * s[c] + ba * (1.0 - sa) * b[c] + sa * ba * mix(b[c], s[c]);
            premul / out_a
        };
        o.copy_from_slice(&pack([channel(0), channel(1), channel(2), out_a], linear));
    }
    out
}

fn morphology(input: &PixelSurface, dilate: bool, rx: i64, ry: i64) -> PixelSurface {
    let pass = |src: &PixelSurface, radius: i64, horizontal: bool| {
        let mut out = src.same_size();
        for y in 0..src.height as i64 {
            for x in 0..src.width as i64 {
                let mut acc = if dilate { [0u8; 4] } else { [255u8; 4] };
                for k in -radius..=radius {
                    let px = if horizontal {
                        src.get_clamped(x + k, y)
                    } else {
                        src.get_clamped(x, y + k)
                    };
                    for c in 0..4 {
                        acc[c] = if dilate {
                            acc[c].max(px[c])
                        } else {
                            acc[c].min(px[c])
                        };
                    }
                }
                out.set(x as u32, y as u32, acc);
            }
        }
        out
    };
    let horizontal = pass(input, rx, true);
    pass(&horizontal, ry, false)
}

fn convolve_matrix(input: &PixelSurface, p: &Convolve, linear: bool) -> PixelSurface {
    let (w, h) = (input.width as i64, input.height as i64);
    let mut out = input.same_size();
    let sample = |x: i64, y: i64| -> [f32; 4] {
        let px = match p.edge_mode {
            EdgeMode::Duplicate => input.get_clamped(x, y),
            EdgeMode::Wrap => input.get(x.rem_euclid(w) as u32, y.rem_euclid(h) as u32),
            EdgeMode::None => input.get_signed(x, y),
        };
        unpack(px, linear)
    };
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 4];
            for j in 0..p.order_y {
                for i in 0..p.order_x {
                    let k = p.kernel[(p.order_y - 1 - j) * p.order_x + (p.order_x - 1 - i)];
                    if k == 0.0 {
                        continue;
                    }
                    let sx = x - p.target_x as i64 + i as i64;
                    let sy = y - p.target_y as i64 + j as i64;
                    let v = sample(sx, sy);
                    for c in 0..4 {
                        acc[c] += v[c] * k;
                    }
                }
            }
            let own = unpack(input.get(x as u32, y as u32), linear);
            let mut result = [0.0f32; 4];
            for c in 0..4 {
                result[c] = (acc[c] / p.divisor + p.bias).clamp(0.0, 1.0);
            }
            if p.preserve_alpha {
                result[3] = own[3];
            }
            out.set(x as u32, y as u32, pack(result, linear));
        }
    }
    out
}

fn tile(input: &PixelSurface, region: Option<PixelRect>) -> PixelSurface {
    let mut out = input.same_size();
    let Some(src) = input.opaque_bounds() else {
        return out;
    };
    let full = out.full_rect();
    let region = region.unwrap_or(full);
    let (tw, th) = (src.width(), src.height());
    for y in region.y0.max(0)..region.y1.min(full.y1) {
        for x in region.x0.max(0)..region.x1.min(full.x1) {
            let sx = src.x0 + (x - src.x0).rem_euclid(tw);
            let sy = src.y0 + (y - src.y0).rem_euclid(th);
            out.set(x as u32, y as u32, input.get(sx as u32, sy as u32));
        }
    }
    out
}

fn noise_hash(ix: i64, iy: i64, seed: i32) -> f32 {
    let mut n = (ix as u32).wrapping_mul(374_761_393);
    n ^= (iy as u32).wrapping_mul(668_265_263);
    n ^= (seed as u32).wrapping_mul(2_246_822_519);
    n = (n ^ (n >> 13)).wrapping_mul(1_274_126_177);
    n ^= n >> 16;
    (n & 0x00FF_FFFF) as f32 / 0x007F_FFFF as f32 - 1.0
}

fn smooth_noise(x: f64, y: f64, seed: i32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let (ix, iy) = (x0 as i64, y0 as i64);
    let sx = fx * fx * (3.0 - 2.0 * fx);
    let sy = fy * fy * (3.0 - 2.0 * fy);
    let n00 = noise_hash(ix, iy, seed);
    let n10 = noise_hash(ix + 1, iy, seed);
    let n01 = noise_hash(ix, iy + 1, seed);
    let n11 = noise_hash(ix + 1, iy + 1, seed);
    let top = n00 + (n10 - n00) * sx;
    let bottom = n01 + (n11 - n01) * sx;
    top + (bottom - top) * sy
}

fn turbulence_value(x: f64, y: f64, p: &Turbulence, seed: i32) -> f32 {
    let mut sum = 0.0f32;
    let mut norm = 0.0f32;
    let mut amplitude = 1.0f32;
    let mut fx = p.base_x;
    let mut fy = p.base_y;
    for octave in 0..p.octaves {
        let mut n = smooth_noise(x * fx, y * fy, seed.wrapping_add(octave as i32 * 31));
        if !p.fractal {
            n = n.abs();
        }
        sum += n * amplitude;
        norm += amplitude;
        amplitude *= 0.5;
        fx *= 2.0;
        fy *= 2.0;
    }
    let v = if norm > 0.0 { sum / norm } else { 0.0 };
    let v = if p.fractal { v * 0.5 + 0.5 } else { v };
    v.clamp(0.0, 1.0)
}

fn turbulence(width: u32, height: u32, p: &Turbulence, scales: (f64, f64)) -> PixelSurface {
    let mut out = PixelSurface::new(width, height);
    if p.base_x <= 0.0 && p.base_y <= 0.0 {
        return out;
    }
    let sx = if scales.0 > 0.0 { scales.0 } else { 1.0 };
    let sy = if scales.1 > 0.0 { scales.1 } else { 1.0 };
    for y in 0..height {
        for x in 0..width {
            let ux = x as f64 / sx;
            let uy = y as f64 / sy;
            let r = turbulence_value(ux, uy, p, p.seed.wrapping_add(11));
            let g = turbulence_value(ux, uy, p, p.seed.wrapping_add(37));
            let b = turbulence_value(ux, uy, p, p.seed.wrapping_add(73));
            out.set(x, y, [to_u8(r), to_u8(g), to_u8(b), 255]);
        }
    }
    out
}

fn displacement_map(
    input: &PixelSurface,
    map: &PixelSurface,
    (scale_x, scale_y): (f32, f32),
    (x_channel, y_channel): (Channel, Channel),
    linear: bool,
) -> PixelSurface {
    let pick = |v: [f32; 4], channel: Channel| -> f32 {
        match channel {
            Channel::R => v[0],
            Channel::G => v[1],
            Channel::B => v[2],
            Channel::A => v[3],
        }
    };
    let mut out = input.same_size();
    for y in 0..out.height {
        for x in 0..out.width {
            let m = unpack(map.get_signed(x as i64, y as i64), linear);
            let dx = scale_x * (pick(m, x_channel) - 0.5);
            let dy = scale_y * (pick(m, y_channel) - 0.5);
            let sx = (x as f32 + dx).round() as i64;
            let sy = (y as f32 + dy).round() as i64;
            out.set(x, y, input.get_signed(sx, sy));
        }
    }
    out
}

fn lighting(input: &PixelSurface, p: &Lighting) -> PixelSurface {
    let height = |x: i64, y: i64| input.get_clamped(x, y)[3] as f32 / 255.0 * p.surface_scale;
    let [lx, ly, lz] = p.light;
    let mut out = input.same_size();
    for y in 0..input.height as i64 {
        for x in 0..input.width as i64 {
            let alpha = input.get(x as u32, y as u32)[3] as f32 / 255.0;
            let nx = -(height(x + 1, y) - height(x - 1, y)) / 2.0;
            let ny = -(height(x, y + 1) - height(x, y - 1)) / 2.0;
            let len = (nx * nx + ny * ny + 1.0).sqrt();
            let (nx, ny, nz) = (nx / len, ny / len, 1.0 / len);
            let n_dot_l = nx * lx + ny * ly + nz * lz;
            let intensity = if p.specular {
                let rx = 2.0 * n_dot_l * nx - lx;
                let ry = 2.0 * n_dot_l * ny - ly;
                let rz = 2.0 * n_dot_l * nz - lz;
                let rlen = (rx * rx + ry * ry + rz * rz).sqrt();
                let rz = if rlen > 0.0 { rz / rlen } else { 0.0 };
                p.constant * libm::powf(rz.max(0.0), p.exponent)
            } else {
                p.constant * n_dot_l.max(0.0)
            };
            let channel = |c: f32| (c * intensity).clamp(0.0, 1.0) * alpha;
            out.set(
                x as u32,
                y as u32,
                [
                    to_u8(channel(p.color.r)),
                    to_u8(channel(p.color.g)),
                    to_u8(channel(p.color.b)),
                    to_u8(alpha),
                ],
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingHost {
        notes: RefCell<Vec<String>>,
    }

    impl FilterHost for RecordingHost {
        fn render_fragment(&self, _id: &str) -> Result<Option<PixelSurface>, RenderError> {
            Ok(None)
        }

        fn load_image(
            &self,
            _href: &str,
            _x: f64,
            _y: f64,
            _width: Option<f64>,
            _height: Option<f64>,
        ) -> Result<Option<PixelSurface>, RenderError> {
            Ok(None)
        }

        fn note(&self, event: &str, detail: &str) {
            self.notes.borrow_mut().push(format!("{event}:{detail}"));
        }
    }

    fn solid(width: u32, height: u32, px: [u8; 4]) -> PixelSurface {
        let mut s = PixelSurface::new(width, height);
        for y in 0..height {
            for x in 0..width {
                s.set(x, y, px);
            }
        }
        s
    }

    fn run(filter_body: &str, source: PixelSurface) -> PixelSurface {
        let svg = format!(
            r##"<svg xmlns="http://www.w3.org/2000/svg"><filter id="f">{filter_body}</filter></svg>"##
        );
        let doc = Document::parse(&svg).expect("document");
        let filter = doc.lookup("f").expect("filter");
        let host = RecordingHost::default();
        FilterPipeline::new(&doc, filter, Matrix::identity(), &host)
            .apply(source)
            .expect("filter")
    }

    #[test]
    fn validation_rejects_unknown_primitives() {
        let doc = Document::parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg"><filter id="f"><feBogus/></filter></svg>"##,
        )
        .expect("document");
        let err = validate_filters(&doc).expect_err("unsupported");
        assert!(matches!(err, RenderError::UnsupportedFeature(_)));
        assert_eq!(err.message(), "Unsupported filter primitive: feBogus");

        let ok = Document::parse(
            r##"<svg xmlns="http://www.w3.org/2000/svg"><filter id="f">
                <desc>shadow</desc>
                <feDiffuseLighting><feDistantLight azimuth="45"/></feDiffuseLighting>
                <feMerge><feMergeNode/></feMerge>
            </filter></svg>"##,
        )
        .expect("document");
        assert!(validate_filters(&ok).is_ok());
    }

    #[test]
    fn desaturate_produces_gray() {
        let out = run(
            r#"<feColorMatrix type="saturate" values="0"/>"#,
            solid(2, 2, [0, 0, 255, 255]),
        );
        for px in out.pixels() {
            assert_eq!(px[0], px[1]);
            assert_eq!(px[1], px[2]);
            assert_eq!(px[3], 255);
            assert!(px[0] > 0);
        }
    }

    #[test]
    fn identity_matrix_keeps_pixels() {
        let source = solid(2, 1, [200, 100, 50, 255]);
        let out = run(r#"<feColorMatrix values="1 2 3"/>"#, source.clone());
        assert_eq!(out, source);
    }

    #[test]
    fn luminance_to_alpha_moves_luma_into_alpha() {
        let out = run(
            r#"<feColorMatrix type="luminanceToAlpha"/>"#,
            solid(1, 1, [255, 255, 255, 255]),
        );
        assert_eq!(out.get(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn offset_shifts_and_drops_pixels() {
        let mut source = PixelSurface::new(3, 1);
        source.set(0, 0, [255, 0, 0, 255]);
        source.set(2, 0, [0, 255, 0, 255]);
        let out = run(r#"<feOffset dx="1"/>"#, source);
        assert_eq!(out.get(0, 0), [0, 0, 0, 0]);
        assert_eq!(out.get(1, 0), [255, 0, 0, 255]);
        assert_eq!(out.get(2, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn blur_spreads_and_conserves_uniform_areas() {
        let uniform = solid(5, 5, [100, 100, 100, 255]);
        assert_eq!(
            run(r#"<feGaussianBlur stdDeviation="1"/>"#, uniform.clone()),
            uniform
        );
        let mut dot = PixelSurface::new(7, 7);
        dot.set(3, 3, [255, 255, 255, 255]);
        let out = run(r#"<feGaussianBlur stdDeviation="1"/>"#, dot);
        assert!(out.get(3, 3)[3] < 255);
        assert!(out.get(4, 3)[3] > 0);
        assert!(out.get(3, 4)[3] > 0);
        let horizontal_only = {
            let mut dot = PixelSurface::new(7, 7);
            dot.set(3, 3, [255, 255, 255, 255]);
            run(r#"<feGaussianBlur stdDeviation="1 0"/>"#, dot)
        };
        assert!(horizontal_only.get(4, 3)[3] > 0);
        assert_eq!(horizontal_only.get(3, 4)[3], 0);
    }

    #[test]
    fn flood_fills_source_bounds() {
        let mut source = PixelSurface::new(4, 4);
        source.set(1, 1, [0, 0, 0, 255]);
        source.set(2, 2, [0, 0, 0, 255]);
        let out = run(
            r##"<feFlood flood-color="#00ff00" flood-opacity="0.5"/>"##,
            source,
        );
        assert_eq!(out.get(0, 0), [0, 0, 0, 0]);
        assert_eq!(out.get(1, 2), [0, 128, 0, 128]);
        assert_eq!(out.get(3, 3), [0, 0, 0, 0]);
    }

    #[test]
    fn composite_over_and_in() {
        let mut source = PixelSurface::new(4, 1);
        source.set(0, 0, [255, 0, 0, 255]);
        source.set(1, 0, [255, 0, 0, 255]);
        let over = run(
            r#"<feFlood flood-color="blue" result="blue"/>
               <feComposite in="SourceGraphic" in2="blue" operator="over"/>"#,
            source.clone(),
        );
        assert_eq!(over.get(0, 0), [255, 0, 0, 255]);
        assert_eq!(over.get(1, 0), [255, 0, 0, 255]);

        let mut backdrop_src = PixelSurface::new(4, 1);
        backdrop_src.set(1, 0, [0, 0, 255, 255]);
        backdrop_src.set(2, 0, [0, 0, 255, 255]);
        let mask = run(
            r#"<feOffset dx="1" result="shifted"/>
               <feComposite in="SourceGraphic" in2="shifted" operator="in"/>"#,
            backdrop_src,
        );
        assert_eq!(mask.get(0, 0), [0, 0, 0, 0]);
        assert_eq!(mask.get(1, 0), [0, 0, 0, 0]);
        assert_eq!(mask.get(2, 0), [0, 0, 255, 255]);
        assert_eq!(mask.get(3, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn arithmetic_composite_skips_empty_regions() {
        let mut source = PixelSurface::new(2, 1);
        source.set(0, 0, [255, 255, 255, 255]);
        let out = run(
            r#"<feComposite in="SourceGraphic" in2="SourceGraphic" operator="arithmetic" k4="0.5"/>"#,
            source,
        );
        assert_eq!(out.get(0, 0), [128, 128, 128, 128]);
        assert_eq!(out.get(1, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn blend_multiply_of_opaque_colors() {
        let out = run(
            r##"<feFlood flood-color="#ffff00" result="yellow"/>
               <feBlend in="SourceGraphic" in2="yellow" mode="multiply"/>"##,
            solid(1, 1, [0, 255, 255, 255]),
        );
        assert_eq!(out.get(0, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn merge_layers_in_order() {
        let mut source = PixelSurface::new(2, 1);
        source.set(0, 0, [255, 0, 0, 255]);
        let out = run(
            r#"<feFlood flood-color="blue" result="blue"/>
               <feMerge><feMergeNode in="blue"/><feMergeNode in="SourceGraphic"/></feMerge>"#,
            source,
        );
        assert_eq!(out.get(0, 0), [255, 0, 0, 255]);
        assert_eq!(out.get(1, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn morphology_erodes_and_dilates() {
        let mut source = PixelSurface::new(5, 1);
        source.set(2, 0, [0, 0, 0, 255]);
        let dilated = run(
            r#"<feMorphology operator="dilate" radius="1"/>"#,
            source.clone(),
        );
        assert_eq!(dilated.get(1, 0)[3], 255);
        assert_eq!(dilated.get(0, 0)[3], 0);
        let eroded = run(r#"<feMorphology radius="1"/>"#, source);
        assert_eq!(eroded.get(2, 0)[3], 0);
    }

    #[test]
    fn component_transfer_functions() {
        let out = run(
            r#"<feComponentTransfer color-interpolation-filters="sRGB">
                <feFuncR type="linear" slope="0" intercept="1"/>
                <feFuncG type="table" tableValues="1 0"/>
                <feFuncB type="discrete" tableValues="0 1"/>
            </feComponentTransfer>"#,
            solid(1, 1, [0, 0, 255, 255]),
        );
        assert_eq!(out.get(0, 0), [255, 255, 255, 255]);
        assert_eq!(TransferFn::Table(vec![0.5]).apply(0.9), 0.5);
        let gamma = TransferFn::Gamma {
            amplitude: 1.0,
            exponent: 2.0,
            offset: 0.0,
        };
        assert!((gamma.apply(0.5) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn convolve_identity_kernel_is_noop() {
        let mut source = PixelSurface::new(3, 3);
        source.set(1, 1, [10, 20, 30, 255]);
        let out = run(
            r#"<feConvolveMatrix kernelMatrix="0 0 0 0 1 0 0 0 0" color-interpolation-filters="sRGB"/>"#,
            source.clone(),
        );
        assert_eq!(out, source);
        let shifted = run(
            r#"<feConvolveMatrix order="3" kernelMatrix="0 0 0 0 0 1 0 0 0" edgeMode="none" color-interpolation-filters="sRGB"/>"#,
            source,
        );
        // Kernel is applied rotated: the weight right of center samples the left neighbour.
        assert_eq!(shifted.get(2, 1), [10, 20, 30, 255]);
    }

    #[test]
    fn tile_repeats_opaque_bounds() {
        let mut source = PixelSurface::new(4, 1);
        source.set(0, 0, [255, 0, 0, 255]);
        source.set(1, 0, [0, 255, 0, 255]);
        let out = run(r#"<feTile/>"#, source);
        assert_eq!(out.get(2, 0), [255, 0, 0, 255]);
        assert_eq!(out.get(3, 0), [0, 255, 0, 255]);
    }

    #[test]
    fn turbulence_is_deterministic_and_opaque() {
        let body = r#"<feTurbulence baseFrequency="0.1" numOctaves="3" seed="4"/>"#;
        let a = run(body, PixelSurface::new(8, 8));
        let b = run(body, PixelSurface::new(8, 8));
        assert_eq!(a, b);
        assert!(a.pixels().all(|px| px[3] == 255));
        let other_seed = run(
            r#"<feTurbulence baseFrequency="0.1" numOctaves="3" seed="5"/>"#,
            PixelSurface::new(8, 8),
        );
        assert_ne!(a, other_seed);
        let empty = run(r#"<feTurbulence baseFrequency="0"/>"#, PixelSurface::new(2, 2));
        assert!(empty.pixels().all(|px| px[3] == 0));
    }

    #[test]
    fn noise_hash_stays_in_range() {
        for i in -20..20 {
            let v = noise_hash(i, i * 7, 3);
            assert!((-1.0..=1.0001).contains(&v));
        }
    }

    #[test]
    fn displacement_with_neutral_map_is_identity() {
        let mut source = PixelSurface::new(3, 1);
        source.set(1, 0, [255, 0, 0, 255]);
        let out = run(
            r##"<feFlood flood-color="#808080" result="map"/>
               <feDisplacementMap in="SourceGraphic" in2="map" scale="0" xChannelSelector="R" yChannelSelector="G"/>"##,
            source.clone(),
        );
        assert_eq!(out, source);
    }

    #[test]
    fn flat_surface_diffuse_light_from_above_is_full_intensity() {
        let out = run(
            r#"<feDiffuseLighting lighting-color="white"><feDistantLight azimuth="0" elevation="90"/></feDiffuseLighting>"#,
            solid(3, 3, [0, 0, 0, 255]),
        );
        assert_eq!(out.get(1, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn unknown_primitive_passes_input_through() {
        let source = solid(1, 1, [1, 2, 3, 255]);
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg"><filter id="f"><feDropShadow/></filter></svg>"##;
        let doc = Document::parse(svg).expect("document");
        let host = RecordingHost::default();
        let out = FilterPipeline::new(&doc, doc.lookup("f").expect("filter"), Matrix::identity(), &host)
            .apply(source.clone())
            .expect("filter");
        assert_eq!(out, source);
        assert!(host
            .notes
            .borrow()
            .iter()
            .any(|n| n == "svg.filter.unsupported:fedropshadow"));
    }

    #[test]
    fn missing_inputs_default_to_source_graphic() {
        let mut source = PixelSurface::new(2, 1);
        source.set(0, 0, [255, 0, 0, 255]);
        let out = run(
            r#"<feOffset dx="1" result="moved"/><feColorMatrix type="saturate" values="1"/>"#,
            source.clone(),
        );
        assert_eq!(out, source);

        let over_source = run(
            r#"<feFlood flood-color="blue"/><feOffset dx="1" result="moved"/>
               <feComposite in="moved" operator="over"/>"#,
            solid(2, 1, [255, 0, 0, 255]),
        );
        assert_eq!(over_source.get(0, 0), [255, 0, 0, 255]);
        assert_eq!(over_source.get(1, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn merge_nodes_and_unknown_names_take_the_previous_result() {
        let merged = run(
            r#"<feFlood flood-color="blue"/><feMerge><feMergeNode/></feMerge>"#,
            solid(1, 1, [255, 0, 0, 255]),
        );
        assert_eq!(merged.get(0, 0), [0, 0, 255, 255]);

        let shifted = run(
            r#"<feFlood flood-color="blue"/><feOffset in="nowhere" dx="1"/>"#,
            solid(2, 1, [255, 0, 0, 255]),
        );
        assert_eq!(shifted.get(0, 0), [0, 0, 0, 0]);
        assert_eq!(shifted.get(1, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn huge_offsets_shift_everything_out() {
        let source = solid(2, 1, [255, 0, 0, 255]);
        let empty = PixelSurface::new(2, 1);
        assert_eq!(run(r#"<feOffset dx="-1e30"/>"#, source.clone()), empty);
        assert_eq!(run(r#"<feOffset dx="1e30" dy="-1e30"/>"#, source), empty);
    }

    #[test]
    fn out_of_range_seeds_clamp() {
        let source = PixelSurface::new(3, 3);
        let clamped = run(
            r#"<feTurbulence baseFrequency="0.2" numOctaves="4" seed="1e30"/>"#,
            source.clone(),
        );
        let max = run(
            r#"<feTurbulence baseFrequency="0.2" numOctaves="4" seed="2147483647"/>"#,
            source.clone(),
        );
        assert_eq!(clamped, max);
        assert!(clamped.data.chunks_exact(4).all(|px| px[3] == 255));
        let low = run(
            r#"<feTurbulence baseFrequency="0.2" numOctaves="4" seed="-1e30"/>"#,
            source,
        );
        assert!(low.data.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn noise_hash_mixes_coordinates_with_xor() {
        assert!((noise_hash(1, 2, 3) - 0.611_771_2).abs() < 1e-5);
        assert_eq!(noise_hash(0, 0, 0), -1.0);
    }

    fn displaced_row(map_color: &str, y_channel: &str, interpolation: &str) -> PixelSurface {
        let mut source = solid(5, 1, [0, 0, 0, 255]);
        source.set(3, 0, [255, 0, 0, 255]);
        run(
            &format!(
                r##"<feFlood flood-color="{map_color}" result="map"/>
                   <feDisplacementMap in="SourceGraphic" in2="map" scale="4"
                       xChannelSelector="R" yChannelSelector="{y_channel}"
                       color-interpolation-filters="{interpolation}"/>"##
            ),
            source,
        )
    }

    #[test]
    fn displacement_reads_map_in_linear_light() {
        // R=225 is 0.753 linear so dx rounds to 1. G=188 is 0.503 so dy rounds to 0.
        let out = displaced_row("#e1bc00", "G", "linearRGB");
        assert_eq!(out.get(1, 0), [0, 0, 0, 255]);
        assert_eq!(out.get(2, 0), [255, 0, 0, 255]);
        assert_eq!(out.get(4, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn displacement_reads_map_in_srgb_when_asked() {
        // R=225 is 0.882 so dx rounds to 2. B=128 is 0.502 so dy rounds to 0.
        let out = displaced_row("#e10080", "B", "sRGB");
        assert_eq!(out.get(1, 0), [255, 0, 0, 255]);
        assert_eq!(out.get(2, 0), [0, 0, 0, 255]);
        assert_eq!(out.get(3, 0), [0, 0, 0, 0]);
    }
}
