use std::f64::consts::PI;

use crate::document::{ElementKind, Node, ShapeKind};

// Geometry construction for the SVG shape set.
//
// Supported:
// - <path d="..."> with M/L/H/V/C/S/Q/T/A/Z in absolute and relative forms
// - <rect> (with rx/ry), <circle>, <ellipse>, <line>, <polyline>, <polygon>
// - <text> anchor point and <image> placement box
// - transform lists, viewBox and preserveAspectRatio
//
// Quadratics and arcs are normalized to cubics.

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::identity()
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::identity()
        }
    }

    pub fn rotate(deg: f64) -> Self {
        let (s, c) = deg.to_radians().sin_cos();
        Self {
            a: c,
            b: s,
            c: -s,
            d: c,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn skew_x(deg: f64) -> Self {
        Self {
            c: deg.to_radians().tan(),
            ..Self::identity()
        }
    }

    pub fn skew_y(deg: f64) -> Self {
        Self {
            b: deg.to_radians().tan(),
            ..Self::identity()
        }
    }

    /// `self * other`: `other` is applied first.
    pub fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn apply(self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Length scale along each axis.
    pub fn axis_scales(self) -> (f64, f64) {
        (
            (self.a * self.a + self.b * self.b).sqrt(),
            (self.c * self.c + self.d * self.d).sqrt(),
        )
    }

    pub fn is_invertible(self) -> bool {
        let det = self.a * self.d - self.b * self.c;
        det.is_finite() && det.abs() > 1e-12
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn union(self, other: BBox) -> BBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BBox::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Maps the unit square onto this box.
    pub fn unit_transform(&self) -> Matrix {
        Matrix {
            a: self.width,
            b: 0.0,
            c: 0.0,
            d: self.height,
            e: self.x,
            f: self.y,
        }
    }

    pub fn transformed(&self, m: Matrix) -> BBox {
        let corners = [
            m.apply(self.x, self.y),
            m.apply(self.right(), self.y),
            m.apply(self.x, self.bottom()),
            m.apply(self.right(), self.bottom()),
        ];
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;
        for (x, y) in corners {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        BBox::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathSeg {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

/// Tight bounds of a segment list (curve extrema included).
pub(crate) fn bbox_of_segs(segs: &[PathSeg]) -> Option<BBox> {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let mut add = |x: f64, y: f64| {
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    };
    let mut cur = (0.0, 0.0);
    for seg in segs {
        match *seg {
            PathSeg::MoveTo(x, y) | PathSeg::LineTo(x, y) => {
                add(x, y);
                cur = (x, y);
            }
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => {
                add(x, y);
                for t in cubic_extrema(cur.0, x1, x2, x) {
                    add(cubic_at(cur.0, x1, x2, x, t), cubic_at(cur.1, y1, y2, y, t));
                }
                for t in cubic_extrema(cur.1, y1, y2, y) {
                    add(cubic_at(cur.0, x1, x2, x, t), cubic_at(cur.1, y1, y2, y, t));
                }
                cur = (x, y);
            }
            PathSeg::Close => {}
        }
    }
    if !min_x.is_finite() || !min_y.is_finite() {
        return None;
    }
    Some(BBox::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

fn cubic_at(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let mt = 1.0 - t;
    mt * mt * mt * p0 + 3.0 * mt * mt * t * p1 + 3.0 * mt * t * t * p2 + t * t * t * p3
}

fn cubic_extrema(p0: f64, p1: f64, p2: f64, p3: f64) -> Vec<f64> {
    // Roots of the derivative a*t^2 + b*t + c.
    let a = -p0 + 3.0 * p1 - 3.0 * p2 + p3;
    let b = 2.0 * (p0 - 2.0 * p1 + p2);
    let c = p1 - p0;
    let mut out = Vec::with_capacity(2);
    if a.abs() < 1e-12 {
        if b.abs() > 1e-12 {
            out.push(-c / b);
        }
    } else {
        let disc = b * b - 4.0 * a * c;
        if disc >= 0.0 {
            let sq = disc.sqrt();
            out.push((-b + sq) / (2.0 * a));
            out.push((-b - sq) / (2.0 * a));
        }
    }
    out.retain(|t| *t > 0.0 && *t < 1.0);
    out
}

// ---------------------------------------------------------------------------
// Lengths

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    X,
    Y,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn percent_basis(self, axis: Axis) -> f64 {
        match axis {
            Axis::X if self.width > 0.0 => self.width,
            Axis::Y if self.height > 0.0 => self.height,
            Axis::Other if self.width > 0.0 && self.height > 0.0 => {
                ((self.width * self.width + self.height * self.height) / 2.0).sqrt()
            }
            _ => 100.0,
        }
    }
}

/// Reference sizes for resolving relative lengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LengthContext {
    pub viewport: Viewport,
    pub font_size: f64,
}

impl LengthContext {
    pub fn new(viewport: Viewport, font_size: f64) -> Self {
        Self {
            viewport,
            font_size,
        }
    }

    pub fn resolve(&self, raw: &str, axis: Axis) -> Option<f64> {
        let (value, unit) = split_number_prefix(raw.trim())?;
        let unit = unit.trim();
        let px = match unit.to_ascii_lowercase().as_str() {
            "" | "px" => value,
            "%" => value / 100.0 * self.viewport.percent_basis(axis),
            "pt" => value * (96.0 / 72.0),
            "pc" => value * 16.0,
            "in" => value * 96.0,
            "cm" => value * (96.0 / 2.54),
            "mm" => value * (96.0 / 25.4),
            "q" => value * (96.0 / 101.6),
            "em" => value * self.font_size,
            "ex" => value * self.font_size * 0.5,
            _ => value,
        };
        px.is_finite().then_some(px)
    }

    pub fn attr(&self, node: &Node, name: &str, default: f64, axis: Axis) -> f64 {
        node.attribute(name)
            .and_then(|raw| self.resolve(raw, axis))
            .unwrap_or(default)
    }

    pub fn attr_opt(&self, node: &Node, name: &str, axis: Axis) -> Option<f64> {
        node.attribute(name).and_then(|raw| self.resolve(raw, axis))
    }
}

/// strtod-style prefix parse; returns the number and the unparsed tail.
pub(crate) fn split_number_prefix(input: &str) -> Option<(f64, &str)> {
    let mut scanner = NumberScanner::new(input);
    let value = scanner.next_number()?;
    Some((value, &input[scanner.i..]))
}

pub(crate) fn parse_number(input: &str) -> Option<f64> {
    let (value, rest) = split_number_prefix(input.trim())?;
    rest.trim().is_empty().then_some(value)
}

pub(crate) fn parse_number_list(input: &str) -> Vec<f64> {
    let mut scanner = NumberScanner::new(input);
    let mut out = Vec::new();
    loop {
        scanner.skip_ws();
        if scanner.at_end() {
            break;
        }
        match scanner.next_number() {
            Some(v) => out.push(v),
            None => scanner.i += 1,
        }
    }
    out
}

pub(crate) fn parse_points(input: &str) -> Vec<Point> {
    parse_number_list(input)
        .chunks_exact(2)
        .map(|pair| Point {
            x: pair[0],
            y: pair[1],
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Transforms, viewBox, preserveAspectRatio

pub(crate) fn parse_transform(input: &str) -> Matrix {
    let mut out = Matrix::identity();
    let mut s = input.trim();

    while !s.is_empty() {
        let Some(open) = s.find('(') else { break };
        let name = s[..open].trim().trim_start_matches(',').trim();
        let Some(close) = s[open + 1..].find(')') else {
            break;
        };
        let args = parse_number_list(&s[open + 1..open + 1 + close]);

        let m = match name {
            "translate" => {
                let tx = args.first().copied().unwrap_or(0.0);
                let ty = args.get(1).copied().unwrap_or(0.0);
                Matrix::translate(tx, ty)
            }
            "scale" => {
                let sx = args.first().copied().unwrap_or(1.0);
                let sy = args.get(1).copied().unwrap_or(sx);
                Matrix::scale(sx, sy)
            }
            "rotate" => {
                let a = args.first().copied().unwrap_or(0.0);
                if args.len() >= 3 {
                    let (cx, cy) = (args[1], args[2]);
                    Matrix::translate(cx, cy)
                        .mul(Matrix::rotate(a))
                        .mul(Matrix::translate(-cx, -cy))
                } else {
                    Matrix::rotate(a)
                }
            }
            "skewX" => Matrix::skew_x(args.first().copied().unwrap_or(0.0)),
            "skewY" => Matrix::skew_y(args.first().copied().unwrap_or(0.0)),
            "matrix" if args.len() >= 6 => Matrix {
                a: args[0],
                b: args[1],
                c: args[2],
                d: args[3],
                e: args[4],
                f: args[5],
            },
            _ => Matrix::identity(),
        };

        out = out.mul(m);
        s = s[open + 1 + close + 1..].trim_start();
    }

    out
}

pub(crate) fn parse_viewbox(raw: Option<&str>) -> Option<BBox> {
    let values = parse_number_list(raw?);
    if values.len() != 4 {
        return None;
    }
    let vb = BBox::new(values[0], values[1], values[2], values[3]);
    (vb.width > 0.0 && vb.height > 0.0).then_some(vb)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AspectRatio {
    /// Alignment factors in 0..=1; `None` stretches non-uniformly.
    pub align: Option<(f64, f64)>,
    pub slice: bool,
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self {
            align: Some((0.5, 0.5)),
            slice: false,
        }
    }
}

impl AspectRatio {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        let mut tokens = raw.split_whitespace().map(|t| t.to_ascii_lowercase());
        let mut align = tokens.next();
        if align.as_deref() == Some("defer") {
            align = tokens.next();
        }
        let Some(align) = align else {
            return Self::default();
        };
        let slice = tokens.next().as_deref() == Some("slice");
        let factor = |key: &str| match key {
            "min" => Some(0.0),
            "mid" => Some(0.5),
            "max" => Some(1.0),
            _ => None,
        };
        if align == "none" {
            return Self { align: None, slice };
        }
        let parsed = align
            .strip_prefix('x')
            .and_then(|rest| rest.split_once('y'))
            .and_then(|(x, y)| Some((factor(x)?, factor(y)?)));
        match parsed {
            Some(align) => Self {
                align: Some(align),
                slice,
            },
            None => Self::default(),
        }
    }

    /// Maps `view_box` onto a viewport of `width`×`height` at the origin.
    pub fn view_box_transform(&self, view_box: BBox, width: f64, height: f64) -> Matrix {
        let sx = width / view_box.width;
        let sy = height / view_box.height;
        match self.align {
            None => Matrix {
                a: sx,
                b: 0.0,
                c: 0.0,
                d: sy,
                e: -view_box.x * sx,
                f: -view_box.y * sy,
            },
            Some((ax, ay)) => {
                let s = if self.slice { sx.max(sy) } else { sx.min(sy) };
                let tx = (width - view_box.width * s) * ax - view_box.x * s;
                let ty = (height - view_box.height * s) * ay - view_box.y * s;
                Matrix {
                    a: s,
                    b: 0.0,
                    c: 0.0,
                    d: s,
                    e: tx,
                    f: ty,
                }
            }
        }
    }

    /// Placement of content of `content_w`×`content_h` inside `target`.
    pub fn fit_rect(&self, content_w: f64, content_h: f64, target: BBox) -> BBox {
        match self.align {
            None => target,
            Some((ax, ay)) => {
                let sx = target.width / content_w;
                let sy = target.height / content_h;
                let s = if self.slice { sx.max(sy) } else { sx.min(sy) };
                let w = content_w * s;
                let h = content_h * s;
                BBox::new(
                    target.x + (target.width - w) * ax,
                    target.y + (target.height - h) * ay,
                    w,
                    h,
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shapes

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ShapeGeometry {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        rx: f64,
        ry: f64,
    },
    Circle {
        cx: f64,
        cy: f64,
        r: f64,
    },
    Ellipse {
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Polyline(Vec<Point>),
    Polygon(Vec<Point>),
    Path(String),
    Text {
        x: f64,
        y: f64,
        text: String,
    },
    Image {
        x: f64,
        y: f64,
        width: Option<f64>,
        height: Option<f64>,
        href: String,
    },
}

/// Builds the geometry of a shape, text, or image node; `None` for anything else.
pub(crate) fn build_geometry(node: &Node, ctx: &LengthContext) -> Option<ShapeGeometry> {
    let geometry = match node.kind {
        ElementKind::Shape(ShapeKind::Rect) => {
            let width = ctx.attr(node, "width", 0.0, Axis::X);
            let height = ctx.attr(node, "height", 0.0, Axis::Y);
            let rx_attr = ctx.attr_opt(node, "rx", Axis::X).filter(|v| *v >= 0.0);
            let ry_attr = ctx.attr_opt(node, "ry", Axis::Y).filter(|v| *v >= 0.0);
            let (rx, ry) = match (rx_attr, ry_attr) {
                (Some(rx), Some(ry)) => (rx, ry),
                (Some(rx), None) => (rx, rx),
                (None, Some(ry)) => (ry, ry),
                (None, None) => (0.0, 0.0),
            };
            ShapeGeometry::Rect {
                x: ctx.attr(node, "x", 0.0, Axis::X),
                y: ctx.attr(node, "y", 0.0, Axis::Y),
                width,
                height,
                rx: rx.min(width.max(0.0) / 2.0),
                ry: ry.min(height.max(0.0) / 2.0),
            }
        }
        ElementKind::Shape(ShapeKind::Circle) => ShapeGeometry::Circle {
            cx: ctx.attr(node, "cx", 0.0, Axis::X),
            cy: ctx.attr(node, "cy", 0.0, Axis::Y),
            r: ctx.attr(node, "r", 0.0, Axis::Other),
        },
        ElementKind::Shape(ShapeKind::Ellipse) => ShapeGeometry::Ellipse {
            cx: ctx.attr(node, "cx", 0.0, Axis::X),
            cy: ctx.attr(node, "cy", 0.0, Axis::Y),
            rx: ctx.attr(node, "rx", 0.0, Axis::X),
            ry: ctx.attr(node, "ry", 0.0, Axis::Y),
        },
        ElementKind::Shape(ShapeKind::Line) => ShapeGeometry::Line {
            x1: ctx.attr(node, "x1", 0.0, Axis::X),
            y1: ctx.attr(node, "y1", 0.0, Axis::Y),
            x2: ctx.attr(node, "x2", 0.0, Axis::X),
            y2: ctx.attr(node, "y2", 0.0, Axis::Y),
        },
        ElementKind::Shape(ShapeKind::Polyline) => {
            ShapeGeometry::Polyline(parse_points(node.attribute("points").unwrap_or("")))
        }
        ElementKind::Shape(ShapeKind::Polygon) => {
            ShapeGeometry::Polygon(parse_points(node.attribute("points").unwrap_or("")))
        }
        ElementKind::Shape(ShapeKind::Path) => {
            ShapeGeometry::Path(node.attribute("d").unwrap_or("").to_string())
        }
        ElementKind::Text => ShapeGeometry::Text {
            x: first_length(node.attribute("x"), ctx, Axis::X),
            y: first_length(node.attribute("y"), ctx, Axis::Y),
            text: node.text.clone(),
        },
        ElementKind::Image => ShapeGeometry::Image {
            x: ctx.attr(node, "x", 0.0, Axis::X),
            y: ctx.attr(node, "y", 0.0, Axis::Y),
            width: ctx.attr_opt(node, "width", Axis::X),
            height: ctx.attr_opt(node, "height", Axis::Y),
            href: node.href().unwrap_or("").to_string(),
        },
        _ => return None,
    };
    Some(geometry)
}

// `<text x="10 20 30">` positions glyphs individually; only the first is honored.
fn first_length(raw: Option<&str>, ctx: &LengthContext, axis: Axis) -> f64 {
    raw.and_then(|v| v.split(|c: char| c.is_whitespace() || c == ',').find(|s| !s.is_empty()))
        .and_then(|v| ctx.resolve(v, axis))
        .unwrap_or(0.0)
}

impl ShapeGeometry {
    /// Outline in user units; `None` when the shape is disabled or not a path shape.
    pub fn to_path(&self) -> Option<Vec<PathSeg>> {
        match self {
            ShapeGeometry::Rect {
                x,
                y,
                width,
                height,
                rx,
                ry,
            } => rect_to_path(*x, *y, *width, *height, *rx, *ry),
            ShapeGeometry::Circle { cx, cy, r } => {
                if *r <= 0.0 {
                    return None;
                }
                Some(ellipse_to_path(*cx, *cy, *r, *r))
            }
            ShapeGeometry::Ellipse { cx, cy, rx, ry } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return None;
                }
                Some(ellipse_to_path(*cx, *cy, *rx, *ry))
            }
            ShapeGeometry::Line { x1, y1, x2, y2 } => {
                Some(vec![PathSeg::MoveTo(*x1, *y1), PathSeg::LineTo(*x2, *y2)])
            }
            ShapeGeometry::Polyline(points) => poly_to_path(points, false),
            ShapeGeometry::Polygon(points) => poly_to_path(points, true),
            ShapeGeometry::Path(d) => {
                let segs = parse_path_data(d);
                (!segs.is_empty()).then_some(segs)
            }
            ShapeGeometry::Text { .. } | ShapeGeometry::Image { .. } => None,
        }
    }
}

fn rect_to_path(x: f64, y: f64, w: f64, h: f64, rx: f64, ry: f64) -> Option<Vec<PathSeg>> {
    if w <= 0.0 || h <= 0.0 {
        return None;
    }
    if rx <= 0.0 || ry <= 0.0 {
        return Some(vec![
            PathSeg::MoveTo(x, y),
            PathSeg::LineTo(x + w, y),
            PathSeg::LineTo(x + w, y + h),
            PathSeg::LineTo(x, y + h),
            PathSeg::Close,
        ]);
    }
    let mut segs = vec![PathSeg::MoveTo(x + rx, y), PathSeg::LineTo(x + w - rx, y)];
    segs.extend(arc_to_cubics(x + w - rx, y, rx, ry, 0.0, false, true, x + w, y + ry));
    segs.push(PathSeg::LineTo(x + w, y + h - ry));
    segs.extend(arc_to_cubics(x + w, y + h - ry, rx, ry, 0.0, false, true, x + w - rx, y + h));
    segs.push(PathSeg::LineTo(x + rx, y + h));
    segs.extend(arc_to_cubics(x + rx, y + h, rx, ry, 0.0, false, true, x, y + h - ry));
    segs.push(PathSeg::LineTo(x, y + ry));
    segs.extend(arc_to_cubics(x, y + ry, rx, ry, 0.0, false, true, x + rx, y));
    segs.push(PathSeg::Close);
    Some(segs)
}

fn ellipse_to_path(cx: f64, cy: f64, rx: f64, ry: f64) -> Vec<PathSeg> {
    let k = 0.5522847498;
    let ox = rx * k;
    let oy = ry * k;
    vec![
        PathSeg::MoveTo(cx + rx, cy),
        PathSeg::CurveTo(cx + rx, cy + oy, cx + ox, cy + ry, cx, cy + ry),
        PathSeg::CurveTo(cx - ox, cy + ry, cx - rx, cy + oy, cx - rx, cy),
        PathSeg::CurveTo(cx - rx, cy - oy, cx - ox, cy - ry, cx, cy - ry),
        PathSeg::CurveTo(cx + ox, cy - ry, cx + rx, cy - oy, cx + rx, cy),
        PathSeg::Close,
    ]
}

fn poly_to_path(points: &[Point], close: bool) -> Option<Vec<PathSeg>> {
    let (first, rest) = points.split_first()?;
    let mut segs = Vec::with_capacity(points.len() + 1);
    segs.push(PathSeg::MoveTo(first.x, first.y));
    for p in rest {
        segs.push(PathSeg::LineTo(p.x, p.y));
    }
    if close {
        segs.push(PathSeg::Close);
    }
    Some(segs)
}

// ---------------------------------------------------------------------------
// Path data

/// Pen state while interpreting path data. Coordinates are absolute.
#[derive(Debug, Default)]
struct PathCursor {
    segs: Vec<PathSeg>,
    current: (f64, f64),
    subpath_start: (f64, f64),
    /// Second control point of the previous `C`/`S`, reflected by `S`.
    cubic_ctrl: Option<(f64, f64)>,
    /// Control point of the previous `Q`/`T`, reflected by `T`.
    quad_ctrl: Option<(f64, f64)>,
}

impl PathCursor {
    fn absolute(&self, relative: bool, (x, y): (f64, f64)) -> (f64, f64) {
        if relative {
            (self.current.0 + x, self.current.1 + y)
        } else {
            (x, y)
        }
    }

    fn reflect(&self, ctrl: Option<(f64, f64)>) -> (f64, f64) {
        let (cx, cy) = self.current;
        ctrl.map_or(self.current, |(px, py)| (2.0 * cx - px, 2.0 * cy - py))
    }

    fn move_to(&mut self, to: (f64, f64)) {
        self.segs.push(PathSeg::MoveTo(to.0, to.1));
        self.current = to;
        self.subpath_start = to;
    }

    fn line_to(&mut self, to: (f64, f64)) {
        self.segs.push(PathSeg::LineTo(to.0, to.1));
        self.current = to;
    }

    fn cubic_to(&mut self, c1: (f64, f64), c2: (f64, f64), to: (f64, f64)) {
        self.segs.push(PathSeg::CurveTo(c1.0, c1.1, c2.0, c2.1, to.0, to.1));
        self.current = to;
        self.cubic_ctrl = Some(c2);
    }

    /// Quadratic segments are stored as their exact cubic elevation.
    fn quad_to(&mut self, ctrl: (f64, f64), to: (f64, f64)) {
        let from = self.current;
        let lift = |end: (f64, f64)| {
            (
                end.0 + 2.0 / 3.0 * (ctrl.0 - end.0),
                end.1 + 2.0 / 3.0 * (ctrl.1 - end.1),
            )
        };
        let (c1, c2) = (lift(from), lift(to));
        self.segs.push(PathSeg::CurveTo(c1.0, c1.1, c2.0, c2.1, to.0, to.1));
        self.current = to;
        self.quad_ctrl = Some(ctrl);
    }

    fn close(&mut self) {
        self.segs.push(PathSeg::Close);
        self.current = self.subpath_start;
    }

    /// Runs one command letter over every argument group that follows it.
    fn command(&mut self, letter: char, args: &mut NumberScanner<'_>) {
        let relative = letter.is_ascii_lowercase();
        let upper = letter.to_ascii_uppercase();
        if !matches!(upper, 'C' | 'S') {
            self.cubic_ctrl = None;
        }
        if !matches!(upper, 'Q' | 'T') {
            self.quad_ctrl = None;
        }
        match upper {
            'M' => {
                if let Some(to) = args.next_pair() {
                    self.move_to(self.absolute(relative, to));
                    while let Some(to) = args.next_pair() {
                        self.line_to(self.absolute(relative, to));
                    }
                }
            }
            'L' => {
                while let Some(to) = args.next_pair() {
                    self.line_to(self.absolute(relative, to));
                }
            }
            'H' => {
                while let Some(x) = args.next_number() {
                    let x = if relative { self.current.0 + x } else { x };
                    self.line_to((x, self.current.1));
                }
            }
            'V' => {
                while let Some(y) = args.next_number() {
                    let y = if relative { self.current.1 + y } else { y };
                    self.line_to((self.current.0, y));
                }
            }
            'C' => {
                while let Some([x1, y1, x2, y2, x, y]) = args.next_numbers::<6>() {
                    let c1 = self.absolute(relative, (x1, y1));
                    let c2 = self.absolute(relative, (x2, y2));
                    let to = self.absolute(relative, (x, y));
                    self.cubic_to(c1, c2, to);
                }
            }
            'S' => {
                while let Some([x2, y2, x, y]) = args.next_numbers::<4>() {
                    let c1 = self.reflect(self.cubic_ctrl);
                    let c2 = self.absolute(relative, (x2, y2));
                    let to = self.absolute(relative, (x, y));
                    self.cubic_to(c1, c2, to);
                }
            }
            'Q' => {
                while let Some([x1, y1, x, y]) = args.next_numbers::<4>() {
                    let ctrl = self.absolute(relative, (x1, y1));
                    let to = self.absolute(relative, (x, y));
                    self.quad_to(ctrl, to);
                }
            }
            'T' => {
                while let Some(to) = args.next_pair() {
                    let ctrl = self.reflect(self.quad_ctrl);
                    self.quad_to(ctrl, self.absolute(relative, to));
                }
            }
            'A' => {
                while let Some((rx, ry, rot, large, sweep, x, y)) = args.next_arc() {
                    let (x0, y0) = self.current;
                    let to = self.absolute(relative, (x, y));
                    self.segs
                        .extend(arc_to_cubics(x0, y0, rx, ry, rot, large, sweep, to.0, to.1));
                    self.current = to;
                }
            }
            'Z' => self.close(),
            _ => {}
        }
    }
}

/// Interprets SVG path data. Malformed input is skipped byte by byte; whatever
/// parsed before and after it is kept.
pub(crate) fn parse_path_data(d: &str) -> Vec<PathSeg> {
    let mut args = NumberScanner::new(d);
    let mut cursor = PathCursor::default();
    let mut sticky = ' ';
    loop {
        let start = args.i;
        let Some(letter) = args.next_command(&mut sticky) else {
            break;
        };
        let after_letter = args.i;
        cursor.command(letter, &mut args);
        if letter.eq_ignore_ascii_case(&'m') && args.i != after_letter {
            // Extra pairs after a moveto continue as linetos.
            sticky = if letter == 'm' { 'l' } else { 'L' };
        }
        if letter.eq_ignore_ascii_case(&'z') {
            sticky = ' ';
        } else if args.i == start {
            args.i += 1;
        }
    }
    cursor.segs
}

/// Endpoint-parameterized elliptical arc to cubic Béziers of at most 90° each.
#[allow(clippy::too_many_arguments)]
pub(crate) fn arc_to_cubics(
    x0: f64,
    y0: f64,
    rx_in: f64,
    ry_in: f64,
    x_axis_rotation_deg: f64,
    large_arc: bool,
    sweep: bool,
    x1: f64,
    y1: f64,
) -> Vec<PathSeg> {
    let mut rx = rx_in.abs();
    let mut ry = ry_in.abs();
    if rx < 1e-9 || ry < 1e-9 || (x0 == x1 && y0 == y1) {
        return vec![PathSeg::LineTo(x1, y1)];
    }

    let (sin_phi, cos_phi) = x_axis_rotation_deg.to_radians().sin_cos();

    let dx2 = (x0 - x1) / 2.0;
    let dy2 = (y0 - y1) / 2.0;
    let x1p = cos_phi * dx2 + sin_phi * dy2;
    let y1p = -sin_phi * dx2 + cos_phi * dy2;

    let x1p2 = x1p * x1p;
    let y1p2 = y1p * y1p;
    let lambda = x1p2 / (rx * rx) + y1p2 / (ry * ry);
    if lambda > 1.0 {
        let s = lambda.sqrt();
        rx *= s;
        ry *= s;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let num = rx2 * ry2 - rx2 * y1p2 - ry2 * x1p2;
    let den = rx2 * y1p2 + ry2 * x1p2;
    if den.abs() < 1e-9 {
        return vec![PathSeg::LineTo(x1, y1)];
    }
    let sign = if large_arc == sweep { -1.0 } else { 1.0 };
    let coef = sign * (num / den).max(0.0).sqrt();
    let cxp = coef * (rx * y1p / ry);
    let cyp = coef * (-ry * x1p / rx);

    let cx = cos_phi * cxp - sin_phi * cyp + (x0 + x1) / 2.0;
    let cy = sin_phi * cxp + cos_phi * cyp + (y0 + y1) / 2.0;

    let ux = (x1p - cxp) / rx;
    let uy = (y1p - cyp) / ry;
    let vx = (-x1p - cxp) / rx;
    let vy = (-y1p - cyp) / ry;

    let theta1 = uy.atan2(ux);
    let mut dtheta = (ux * vy - uy * vx).atan2(ux * vx + uy * vy);
    if !sweep && dtheta > 0.0 {
        dtheta -= 2.0 * PI;
    } else if sweep && dtheta < 0.0 {
        dtheta += 2.0 * PI;
    }

    let count = (dtheta.abs() / (PI / 2.0)).ceil().max(1.0) as usize;
    let delta = dtheta / count as f64;
    let k = (4.0 / 3.0) * (delta / 4.0).tan();

    let map = |x: f64, y: f64| -> (f64, f64) {
        let x = rx * x;
        let y = ry * y;
        (cx + cos_phi * x - sin_phi * y, cy + sin_phi * x + cos_phi * y)
    };

    let mut out = Vec::with_capacity(count);
    let mut t1 = theta1;
    for i in 0..count {
        let t2 = t1 + delta;
        let (s1, c1) = t1.sin_cos();
        let (s2, c2) = t2.sin_cos();
        let (c1x, c1y) = map(c1 - k * s1, s1 + k * c1);
        let (c2x, c2y) = map(c2 + k * s2, s2 - k * c2);
        let (ex, ey) = if i + 1 == count { (x1, y1) } else { map(c2, s2) };
        out.push(PathSeg::CurveTo(c1x, c1y, c2x, c2y, ex, ey));
        t1 = t2;
    }
    out
}

/// Byte scanner for SVG number grammar (shared by path data and number lists).
struct NumberScanner<'a> {
    bytes: &'a [u8],
    i: usize,
}

impl<'a> NumberScanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            i: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.i >= self.bytes.len()
    }

    fn skip_ws(&mut self) {
        while self.i < self.bytes.len() {
            match self.bytes[self.i] {
                b' ' | b'\n' | b'\r' | b'\t' | b',' => self.i += 1,
                _ => break,
            }
        }
    }

    fn next_command(&mut self, current: &mut char) -> Option<char> {
        self.skip_ws();
        if self.at_end() {
            return None;
        }
        let c = self.bytes[self.i] as char;
        if c.is_ascii_alphabetic() && c != 'e' && c != 'E' {
            *current = c;
            self.i += 1;
            return Some(c);
        }
        Some(*current)
    }

    fn next_number(&mut self) -> Option<f64> {
        self.skip_ws();
        let start = self.i;
        let len = self.bytes.len();
        let mut has_digits = false;

        if self.i < len && matches!(self.bytes[self.i], b'+' | b'-') {
            self.i += 1;
        }
        while self.i < len && self.bytes[self.i].is_ascii_digit() {
            self.i += 1;
            has_digits = true;
        }
        if self.i < len && self.bytes[self.i] == b'.' {
            self.i += 1;
            while self.i < len && self.bytes[self.i].is_ascii_digit() {
                self.i += 1;
                has_digits = true;
            }
        }
        if !has_digits {
            self.i = start;
            return None;
        }
        if self.i < len && matches!(self.bytes[self.i], b'e' | b'E') {
            let exp_start = self.i;
            self.i += 1;
            if self.i < len && matches!(self.bytes[self.i], b'+' | b'-') {
                self.i += 1;
            }
            let digits_start = self.i;
            while self.i < len && self.bytes[self.i].is_ascii_digit() {
                self.i += 1;
            }
            if self.i == digits_start {
                // "1em" and friends: the 'e' belongs to a unit.
                self.i = exp_start;
            }
        }

        let s = std::str::from_utf8(&self.bytes[start..self.i]).ok()?;
        s.parse::<f64>().ok()
    }

    fn next_numbers<const N: usize>(&mut self) -> Option<[f64; N]> {
        let start = self.i;
        let mut out = [0.0; N];
        for slot in out.iter_mut() {
            match self.next_number() {
                Some(v) => *slot = v,
                None => {
                    self.i = start;
                    return None;
                }
            }
        }
        Some(out)
    }

    fn next_pair(&mut self) -> Option<(f64, f64)> {
        let [x, y] = self.next_numbers::<2>()?;
        Some((x, y))
    }

    fn next_flag(&mut self) -> Option<bool> {
        self.skip_ws();
        match self.bytes.get(self.i) {
            Some(b'0') => {
                self.i += 1;
                Some(false)
            }
            Some(b'1') => {
                self.i += 1;
                Some(true)
            }
            _ => None,
        }
    }

    #[allow(clippy::type_complexity)]
    fn next_arc(&mut self) -> Option<(f64, f64, f64, bool, bool, f64, f64)> {
        let start = self.i;
        let parsed = (|| {
            let [rx, ry, rot] = self.next_numbers::<3>()?;
            let large = self.next_flag()?;
            let sweep = self.next_flag()?;
            let (x, y) = self.next_pair()?;
            Some((rx, ry, rot, large, sweep, x, y))
        })();
        if parsed.is_none() {
            self.i = start;
        }
        parsed
    }
}
