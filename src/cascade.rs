use lightningcss::traits::Parse;
use lightningcss::values::color::{CssColor, SRGB};
use tiny_skia::{FillRule, LineCap, LineJoin};

use crate::document::Node;
use crate::geometry::{Axis, LengthContext, parse_number};
use crate::types::{Color, RenderOptions};

/// Fill or stroke paint after `currentColor` has been resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Paint {
    None,
    Color(Color),
    Server { id: String, fallback: Option<Color> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextAnchor {
    Start,
    Middle,
    End,
}

/// Flattened presentation style of one node. Built from the parent's copy;
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ResolvedStyle {
    pub color: Color,
    pub fill: Paint,
    pub fill_opacity: f32,
    pub fill_rule: FillRule,
    pub stroke: Paint,
    pub stroke_opacity: f32,
    pub stroke_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    pub dash_array: Option<Vec<f64>>,
    pub dash_offset: f64,
    pub clip_rule: FillRule,
    pub font_family: String,
    pub font_size: f64,
    pub font_weight: u16,
    pub italic: bool,
    pub text_anchor: TextAnchor,
    pub visible: bool,

    // Not inherited.
    pub opacity: f32,
    pub display_none: bool,
    pub filter: Option<String>,
    pub clip_path: Option<String>,
}

impl ResolvedStyle {
    pub fn root(options: &RenderOptions) -> Self {
        Self {
            color: Color::BLACK,
            fill: Paint::Color(Color::BLACK),
            fill_opacity: 1.0,
            fill_rule: FillRule::Winding,
            stroke: Paint::None,
            stroke_opacity: 1.0,
            stroke_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 4.0,
            dash_array: None,
            dash_offset: 0.0,
            clip_rule: FillRule::Winding,
            font_family: options.default_font_family.clone(),
            font_size: f64::from(options.default_font_size),
            font_weight: 400,
            italic: false,
            text_anchor: TextAnchor::Start,
            visible: true,
            opacity: 1.0,
            display_none: false,
            filter: None,
            clip_path: None,
        }
    }

    /// Combines `parent` with the local declarations of `node`.
    pub fn resolve(node: &Node, parent: &ResolvedStyle, ctx: &LengthContext) -> Self {
        let mut style = ResolvedStyle {
            opacity: 1.0,
            display_none: false,
            filter: None,
            clip_path: None,
            ..parent.clone()
        };

        if let Some(value) = property(node, "color").filter(|v| !is_inherit(v)) {
            if let Some(color) = parse_color(value) {
                style.color = color;
            }
        }

        if let Some(value) = property(node, "font-size").filter(|v| !is_inherit(v)) {
            let value = value.trim();
            let size = match value.strip_suffix('%') {
                Some(pct) => parse_number(pct).map(|p| parent.font_size * p / 100.0),
                None => LengthContext::new(ctx.viewport, parent.font_size).resolve(value, Axis::Other),
            };
            if let Some(size) = size.filter(|s| *s >= 0.0) {
                style.font_size = size;
            }
        }
        let ctx = LengthContext::new(ctx.viewport, style.font_size);

        if let Some(paint) = paint_property(node, "fill", style.color) {
            style.fill = paint;
        }
        if let Some(paint) = paint_property(node, "stroke", style.color) {
            style.stroke = paint;
        }
        if let Some(v) = opacity_property(node, "fill-opacity") {
            style.fill_opacity = v;
        }
        if let Some(v) = opacity_property(node, "stroke-opacity") {
            style.stroke_opacity = v;
        }
        if let Some(v) = opacity_property(node, "opacity") {
            style.opacity = v;
        }
        if let Some(rule) = property(node, "fill-rule").and_then(parse_fill_rule) {
            style.fill_rule = rule;
        }
        if let Some(rule) = property(node, "clip-rule").and_then(parse_fill_rule) {
            style.clip_rule = rule;
        }
        if let Some(width) = property(node, "stroke-width")
            .and_then(|v| ctx.resolve(v, Axis::Other))
            .filter(|w| *w >= 0.0)
        {
            style.stroke_width = width;
        }
        match property(node, "stroke-linecap").map(str::trim) {
            Some("butt") => style.line_cap = LineCap::Butt,
            Some("round") => style.line_cap = LineCap::Round,
            Some("square") => style.line_cap = LineCap::Square,
            _ => {}
        }
        match property(node, "stroke-linejoin").map(str::trim) {
            Some("miter") | Some("miter-clip") => style.line_join = LineJoin::Miter,
            Some("round") => style.line_join = LineJoin::Round,
            Some("bevel") => style.line_join = LineJoin::Bevel,
            _ => {}
        }
        if let Some(limit) = property(node, "stroke-miterlimit")
            .and_then(parse_number)
            .filter(|m| *m >= 1.0)
        {
            style.miter_limit = limit;
        }
        if let Some(value) = property(node, "stroke-dasharray").filter(|v| !is_inherit(v)) {
            style.dash_array = parse_dash_array(value, &ctx);
        }
        if let Some(offset) = property(node, "stroke-dashoffset")
            .and_then(|v| ctx.resolve(v, Axis::Other))
        {
            style.dash_offset = offset;
        }

        if let Some(family) = property(node, "font-family").and_then(parse_font_family) {
            style.font_family = family;
        }
        if let Some(weight) = property(node, "font-weight")
            .and_then(|v| parse_font_weight(v, parent.font_weight))
        {
            style.font_weight = weight;
        }
        match property(node, "font-style").map(str::trim) {
            Some("italic") | Some("oblique") => style.italic = true,
            Some("normal") => style.italic = false,
            _ => {}
        }
        match property(node, "text-anchor").map(str::trim) {
            Some("start") => style.text_anchor = TextAnchor::Start,
            Some("middle") => style.text_anchor = TextAnchor::Middle,
            Some("end") => style.text_anchor = TextAnchor::End,
            _ => {}
        }
        match property(node, "visibility").map(str::trim) {
            Some("hidden") | Some("collapse") => style.visible = false,
            Some("visible") => style.visible = true,
            _ => {}
        }
        if property(node, "display").map(str::trim) == Some("none") {
            style.display_none = true;
        }
        style.filter = property(node, "filter").and_then(url_fragment);
        style.clip_path = property(node, "clip-path").and_then(url_fragment);

        style
    }

    pub fn is_rendered(&self) -> bool {
        self.visible && !self.display_none
    }

    pub fn is_bold(&self) -> bool {
        self.font_weight >= 600
    }
}

/// Winning value of a presentation property on `node`:
/// inline `!important` > sheet `!important` > inline > sheet > attribute.
pub(crate) fn property<'a>(node: &'a Node, name: &str) -> Option<&'a str> {
    let find = |pairs: &'a [(String, String)]| {
        pairs
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };
    find(&node.inline.important)
        .or_else(|| find(&node.css.important))
        .or_else(|| find(&node.inline.normal))
        .or_else(|| find(&node.css.normal))
        .or_else(|| node.attribute(name))
}

/// Color-valued property (`stop-color`, `flood-color`, ...) with `currentColor`
/// resolved against `current`.
pub(crate) fn color_property(node: &Node, name: &str, current: Color) -> Option<Color> {
    let value = property(node, name)?.trim();
    if value.eq_ignore_ascii_case("currentcolor") {
        return Some(current);
    }
    parse_color(value)
}

pub(crate) fn opacity_property(node: &Node, name: &str) -> Option<f32> {
    parse_opacity(property(node, name)?)
}

pub(crate) fn parse_opacity(value: &str) -> Option<f32> {
    let value = value.trim();
    let v = match value.strip_suffix('%') {
        Some(pct) => parse_number(pct)? / 100.0,
        None => parse_number(value)?,
    };
    Some(v.clamp(0.0, 1.0) as f32)
}

fn paint_property(node: &Node, name: &str, current: Color) -> Option<Paint> {
    let value = property(node, name)?;
    if is_inherit(value) {
        return None;
    }
    parse_paint(value, current)
}

pub(crate) fn parse_paint(value: &str, current: Color) -> Option<Paint> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Some(Paint::None);
    }
    if value.eq_ignore_ascii_case("currentcolor") {
        return Some(Paint::Color(current));
    }
    if let Some(rest) = value.strip_prefix("url(") {
        let close = rest.find(')')?;
        let id = unquote(&rest[..close]).strip_prefix('#')?.trim().to_string();
        if id.is_empty() {
            return None;
        }
        let tail = rest[close + 1..].trim();
        let fallback = if tail.eq_ignore_ascii_case("currentcolor") {
            Some(current)
        } else {
            parse_color(tail)
        };
        return Some(Paint::Server { id, fallback });
    }
    parse_color(value).map(Paint::Color)
}

/// `url(#id)` reference; `None` for `none` or anything else.
pub(crate) fn url_fragment(value: &str) -> Option<String> {
    let rest = value.trim().strip_prefix("url(")?;
    let close = rest.find(')')?;
    let id = unquote(&rest[..close]).strip_prefix('#')?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '"' || c == '\'').trim()
}

fn is_inherit(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("inherit")
}

fn parse_fill_rule(value: &str) -> Option<FillRule> {
    match value.trim() {
        "nonzero" => Some(FillRule::Winding),
        "evenodd" => Some(FillRule::EvenOdd),
        _ => None,
    }
}

fn parse_dash_array(value: &str, ctx: &LengthContext) -> Option<Vec<f64>> {
    if value.trim().eq_ignore_ascii_case("none") {
        return None;
    }
    let mut dashes = Vec::new();
    for part in value.split(|c: char| c == ',' || c.is_whitespace()) {
        if part.is_empty() {
            continue;
        }
        let v = ctx.resolve(part, Axis::Other)?;
        if v < 0.0 {
            return None;
        }
        dashes.push(v);
    }
    if dashes.is_empty() || dashes.iter().all(|d| *d == 0.0) {
        return None;
    }
    if dashes.len() % 2 == 1 {
        dashes.extend_from_within(..);
    }
    Some(dashes)
}

fn parse_font_family(value: &str) -> Option<String> {
    let first = value.split(',').map(unquote).find(|f| !f.is_empty())?;
    let mapped = match first.to_ascii_lowercase().as_str() {
        "sans-serif" => "Helvetica",
        "serif" => "Times New Roman",
        "monospace" => "Courier",
        _ => first,
    };
    Some(mapped.to_string())
}

fn parse_font_weight(value: &str, parent: u16) -> Option<u16> {
    match value.trim().to_ascii_lowercase().as_str() {
        "normal" => Some(400),
        "bold" => Some(700),
        "bolder" => Some((parent + 300).min(900)),
        "lighter" => Some(parent.saturating_sub(300).max(100)),
        other => parse_number(other)
            .filter(|w| (1.0..=1000.0).contains(w))
            .map(|w| w as u16),
    }
}

pub(crate) fn parse_color(input: &str) -> Option<Color> {
    let v = input.trim();
    if v.is_empty() || v.eq_ignore_ascii_case("none") || v.eq_ignore_ascii_case("currentcolor") {
        return None;
    }
    if let Some(hex) = v.strip_prefix('#') {
        return parse_hex_color(hex);
    }
    let css = CssColor::parse_string(v).ok()?;
    css_color_to_color(&css)
}

fn parse_hex_color(hex: &str) -> Option<Color> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let (r, g, b, a) = match hex.len() {
        3 => (nibble(0)?, nibble(1)?, nibble(2)?, 255),
        4 => (nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?),
        6 => (byte(0)?, byte(2)?, byte(4)?, 255),
        8 => (byte(0)?, byte(2)?, byte(4)?, byte(6)?),
        _ => return None,
    };
    Some(Color::from_rgba8(r, g, b, a))
}

fn css_color_to_color(color: &CssColor) -> Option<Color> {
    if let CssColor::RGBA(rgba) = color {
        return Some(Color::from_rgba8(
            rgba.red,
            rgba.green,
            rgba.blue,
            rgba.alpha,
        ));
    }
    if let Ok(srgb) = SRGB::try_from(color) {
        return Some(Color::rgba(
            srgb.r.clamp(0.0, 1.0),
            srgb.g.clamp(0.0, 1.0),
            srgb.b.clamp(0.0, 1.0),
            srgb.alpha.clamp(0.0, 1.0),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::geometry::Viewport;

    fn ctx() -> LengthContext {
        LengthContext::new(Viewport::new(100.0, 100.0), 16.0)
    }

    fn styles_of(svg: &str) -> Vec<ResolvedStyle> {
        let doc = Document::parse(svg).expect("document");
        let root_style = ResolvedStyle::root(&RenderOptions::default());
        let root = ResolvedStyle::resolve(doc.node(doc.root()), &root_style, &ctx());
        let mut out = Vec::new();
        let mut stack = vec![(doc.root(), root)];
        while let Some((id, style)) = stack.pop() {
            for child in doc.node(id).children.iter().rev() {
                let child_style = ResolvedStyle::resolve(doc.node(*child), &style, &ctx());
                stack.push((*child, child_style));
            }
            out.push(style);
        }
        out
    }

    #[test]
    fn parses_hex_named_and_functional_colors() {
        assert_eq!(parse_color("#f00"), Some(Color::from_rgba8(255, 0, 0, 255)));
        assert_eq!(
            parse_color("#00ff0080"),
            Some(Color::from_rgba8(0, 255, 0, 128))
        );
        assert_eq!(parse_color("blue"), Some(Color::from_rgba8(0, 0, 255, 255)));
        assert_eq!(
            parse_color("rgb(255, 0, 0)"),
            Some(Color::from_rgba8(255, 0, 0, 255))
        );
        assert_eq!(parse_color("transparent").map(|c| c.a), Some(0.0));
        assert_eq!(parse_color("none"), None);
        assert_eq!(parse_color("#12"), None);
    }

    #[test]
    fn paint_values_cover_servers_and_fallbacks() {
        let current = Color::from_rgba8(1, 2, 3, 255);
        assert_eq!(parse_paint("none", current), Some(Paint::None));
        assert_eq!(
            parse_paint("currentColor", current),
            Some(Paint::Color(current))
        );
        assert_eq!(
            parse_paint("url(#grad) red", current),
            Some(Paint::Server {
                id: "grad".to_string(),
                fallback: Some(Color::from_rgba8(255, 0, 0, 255)),
            })
        );
        assert_eq!(
            parse_paint("url(\"#g\")", current),
            Some(Paint::Server {
                id: "g".to_string(),
                fallback: None,
            })
        );
    }

    #[test]
    fn inherited_properties_flow_to_children() {
        let styles = styles_of(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <g fill="red" stroke-width="3" opacity="0.5" font-family="serif">
                    <rect/>
                </g>
            </svg>"##,
        );
        let group = &styles[1];
        let rect = &styles[2];
        assert_eq!(group.opacity, 0.5);
        assert_eq!(rect.opacity, 1.0);
        assert_eq!(rect.fill, Paint::Color(Color::from_rgba8(255, 0, 0, 255)));
        assert_eq!(rect.stroke_width, 3.0);
        assert_eq!(rect.font_family, "Times New Roman");
    }

    #[test]
    fn inline_style_beats_attribute_and_important_sheet_beats_inline() {
        let styles = styles_of(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <style>.a { fill: blue !important; } .b { stroke: green; }</style>
                <rect class="a" fill="red" style="fill: yellow"/>
                <rect class="b" stroke="red" style="stroke: black"/>
            </svg>"##,
        );
        assert_eq!(styles[2].fill, Paint::Color(Color::from_rgba8(0, 0, 255, 255)));
        assert_eq!(styles[3].stroke, Paint::Color(Color::BLACK));
    }

    #[test]
    fn current_color_resolves_against_local_color() {
        let styles = styles_of(
            r##"<svg xmlns="http://www.w3.org/2000/svg" color="red">
                <rect fill="currentColor" color="#0000ff"/>
                <rect stroke="currentColor"/>
            </svg>"##,
        );
        assert_eq!(styles[1].fill, Paint::Color(Color::from_rgba8(0, 0, 255, 255)));
        assert_eq!(styles[2].stroke, Paint::Color(Color::from_rgba8(255, 0, 0, 255)));
    }

    #[test]
    fn visibility_display_and_references() {
        let styles = styles_of(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <g visibility="hidden"><rect/></g>
                <rect display="none" filter="url(#f)" clip-path="url(#c)"/>
            </svg>"##,
        );
        assert!(!styles[1].is_rendered());
        assert!(!styles[2].is_rendered());
        assert!(!styles[3].is_rendered());
        assert_eq!(styles[3].filter.as_deref(), Some("f"));
        assert_eq!(styles[3].clip_path.as_deref(), Some("c"));
    }

    #[test]
    fn dash_arrays_and_opacity_are_normalized() {
        let styles = styles_of(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <path stroke-dasharray="5 2 1" fill-opacity="2" stroke-opacity="-1"/>
                <path stroke-dasharray="0 0"/>
            </svg>"##,
        );
        assert_eq!(
            styles[1].dash_array,
            Some(vec![5.0, 2.0, 1.0, 5.0, 2.0, 1.0])
        );
        assert_eq!(styles[1].fill_opacity, 1.0);
        assert_eq!(styles[1].stroke_opacity, 0.0);
        assert_eq!(styles[2].dash_array, None);
    }

    #[test]
    fn font_weight_and_size() {
        let styles = styles_of(
            r##"<svg xmlns="http://www.w3.org/2000/svg">
                <g font-size="20" font-weight="bold"><text font-size="150%">x</text></g>
            </svg>"##,
        );
        assert!(styles[1].is_bold());
        assert_eq!(styles[2].font_size, 30.0);
        assert_eq!(styles[2].font_weight, 700);
    }
}
