use std::cell::RefCell;
use std::collections::HashSet;

use tiny_skia::{FilterQuality, Mask, Pattern, Pixmap, SpreadMode, Stroke, Transform};

use crate::cascade::{Paint, ResolvedStyle, TextAnchor, property};
use crate::debug::DebugLogger;
use crate::document::{DefinitionKind, Document, ElementKind, NodeId};
use crate::error::RenderError;
use crate::filter::{FilterHost, FilterPipeline};
use crate::font::{FontRegistry, FontStyleVariant};
use crate::geometry::{
    AspectRatio, Axis, BBox, LengthContext, Matrix, ShapeGeometry, Viewport, bbox_of_segs,
    build_geometry, parse_transform, parse_viewbox,
};
use crate::legacy_chart::pie_slices;
use crate::paint_server::{PaintServerRegistry, PatternDefinition, ServerPaint, to_sk_transform};
use crate::perf::{PerfLogger, timed};
use crate::raster::{Canvas, build_path, build_stroke, fill_paint, shader_paint};
use crate::resource::ResourceLoader;
use crate::surface::PixelSurface;
use crate::text::{layout_text, text_outline};
use crate::types::{Color, CompatFlags, RenderOptions};

/// Largest edge of a rasterized pattern tile, in pixels.
const MAX_TILE_EDGE: f64 = 8192.0;

/// Output geometry of the root `<svg>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Layout {
    /// Viewport size in user units, before scaling.
    pub width: f64,
    pub height: f64,
    pub view_box: BBox,
    pub aspect: AspectRatio,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub scale: f64,
}

impl Layout {
    pub fn compute(doc: &Document, options: &RenderOptions) -> Result<Self, RenderError> {
        let root = doc.node(doc.root());
        let view_box = parse_viewbox(root.attribute("viewBox"));
        let fallback_w = if options.viewport_width > 0.0 {
            options.viewport_width
        } else {
            view_box.map(|vb| vb.width).unwrap_or(300.0)
        };
        let fallback_h = if options.viewport_height > 0.0 {
            options.viewport_height
        } else {
            view_box.map(|vb| vb.height).unwrap_or(150.0)
        };

        let ctx = LengthContext::new(
            Viewport::new(fallback_w, fallback_h),
            f64::from(options.default_font_size),
        );
        let width = ctx
            .attr_opt(root, "width", Axis::X)
            .unwrap_or(fallback_w)
            .trunc();
        let height = ctx
            .attr_opt(root, "height", Axis::Y)
            .unwrap_or(fallback_h)
            .trunc();
        if !(width > 0.0 && height > 0.0) || !width.is_finite() || !height.is_finite() {
            return Err(RenderError::InvalidDocument(
                "Invalid SVG viewport dimensions".to_string(),
            ));
        }

        Ok(Self {
            width,
            height,
            view_box: view_box.unwrap_or(BBox::new(0.0, 0.0, width, height)),
            aspect: AspectRatio::parse(root.attribute("preserveAspectRatio")),
            pixel_width: (width * options.scale) as u32,
            pixel_height: (height * options.scale) as u32,
            scale: options.scale,
        })
    }

    /// Root user space → output pixels.
    pub fn root_transform(&self) -> Matrix {
        Matrix::scale(self.scale, self.scale).mul(self.aspect.view_box_transform(
            self.view_box,
            self.width,
            self.height,
        ))
    }
}

/// Ids currently being expanded along one traversal path.
#[derive(Debug, Default)]
pub(crate) struct ActiveSet {
    ids: RefCell<HashSet<String>>,
}

impl ActiveSet {
    /// `None` when `id` is already active; the id stays active until the guard drops.
    pub fn enter(&self, id: &str) -> Option<VisitGuard<'_>> {
        if !self.ids.borrow_mut().insert(id.to_string()) {
            return None;
        }
        Some(VisitGuard {
            set: self,
            id: id.to_string(),
        })
    }
}

pub(crate) struct VisitGuard<'a> {
    set: &'a ActiveSet,
    id: String,
}

impl Drop for VisitGuard<'_> {
    fn drop(&mut self) {
        self.set.ids.borrow_mut().remove(&self.id);
    }
}

/// A paint ready to hand to the canvas; pattern tiles own their pixmap.
enum PaintSource {
    Ready(tiny_skia::Paint<'static>),
    Tile {
        pixmap: Pixmap,
        transform: Transform,
        opacity: f32,
    },
}

impl PaintSource {
    fn paint(&self) -> tiny_skia::Paint<'_> {
        match self {
            PaintSource::Ready(paint) => paint.clone(),
            PaintSource::Tile {
                pixmap,
                transform,
                opacity,
            } => tiny_skia::Paint {
                shader: Pattern::new(
                    pixmap.as_ref(),
                    SpreadMode::Repeat,
                    FilterQuality::Bicubic,
                    *opacity,
                    *transform,
                ),
                anti_alias: true,
                ..tiny_skia::Paint::default()
            },
        }
    }
}

/// Everything one render call shares while walking the tree.
pub(crate) struct Renderer<'a> {
    pub doc: &'a Document,
    pub servers: &'a PaintServerRegistry,
    pub fonts: &'a FontRegistry,
    pub loader: &'a ResourceLoader,
    pub options: &'a RenderOptions,
    pub flags: CompatFlags,
    pub layout: Layout,
    pub debug: Option<&'a DebugLogger>,
    pub perf: Option<&'a PerfLogger>,
    pub render_id: Option<usize>,
    active_uses: ActiveSet,
    active_patterns: ActiveSet,
    root_style: ResolvedStyle,
}

impl<'a> Renderer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        doc: &'a Document,
        servers: &'a PaintServerRegistry,
        fonts: &'a FontRegistry,
        loader: &'a ResourceLoader,
        options: &'a RenderOptions,
        flags: CompatFlags,
        layout: Layout,
        debug: Option<&'a DebugLogger>,
        perf: Option<&'a PerfLogger>,
    ) -> Self {
        Self {
            doc,
            servers,
            fonts,
            loader,
            options,
            flags,
            layout,
            debug,
            perf,
            render_id: None,
            active_uses: ActiveSet::default(),
            active_patterns: ActiveSet::default(),
            root_style: ResolvedStyle::root(options),
        }
    }

    fn note(&self, event: &str, fields: &[(&str, &str)]) {
        if let Some(debug) = self.debug {
            debug.event(event, fields);
        }
    }

    /// Paints the whole document onto `canvas`, starting from the root transform.
    pub fn render_document(&self, canvas: &mut Canvas) -> Result<(), RenderError> {
        canvas.set_transform(self.layout.root_transform());
        let viewport = Viewport::new(self.layout.width, self.layout.height);
        let parent = self.root_style.clone();
        self.render_node(canvas, self.doc.root(), &parent, viewport, 1)
    }

    fn check_depth(&self, depth: usize) -> Result<(), RenderError> {
        if depth > self.options.max_depth {
            return Err(RenderError::RenderFailed(format!(
                "Maximum render depth exceeded ({})",
                self.options.max_depth
            )));
        }
        Ok(())
    }

    pub(crate) fn render_node(
        &self,
        canvas: &mut Canvas,
        id: NodeId,
        parent: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        self.check_depth(depth)?;
        let node = self.doc.node(id);
        if node.kind.is_definition() || node.kind == ElementKind::Symbol {
            return Ok(());
        }
        let ctx = LengthContext::new(viewport, parent.font_size);
        let style = ResolvedStyle::resolve(node, parent, &ctx);
        if !style.is_rendered() {
            return Ok(());
        }

        if let Some(filter_id) = style.filter.as_deref() {
            let filter = self.doc.lookup(filter_id).filter(|f| {
                self.doc.node(*f).kind == ElementKind::Definition(DefinitionKind::Filter)
            });
            if let Some(filter) = filter {
                return self.render_filtered(canvas, id, filter, &style, viewport, depth);
            }
        }

        let is_container = matches!(
            node.kind,
            ElementKind::Svg
                | ElementKind::Group
                | ElementKind::Use
                | ElementKind::Switch
                | ElementKind::Other
        );
        if is_container && style.opacity < 1.0 {
            let mut layer = canvas.offscreen()?;
            let opaque = ResolvedStyle {
                opacity: 1.0,
                ..style.clone()
            };
            self.paint_node(&mut layer, id, &opaque, viewport, depth)?;
            return canvas.composite(layer.into_surface(), style.opacity);
        }

        self.paint_node(canvas, id, &style, viewport, depth)
    }

    fn render_filtered(
        &self,
        canvas: &mut Canvas,
        id: NodeId,
        filter: NodeId,
        style: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        let mut source = canvas.offscreen()?;
        let unfiltered = ResolvedStyle {
            opacity: 1.0,
            filter: None,
            ..style.clone()
        };
        self.paint_node(&mut source, id, &unfiltered, viewport, depth)?;

        let ctm = canvas.transform().mul(local_transform(self.doc, id));
        let scope = FilterScope {
            renderer: self,
            ctm,
            style: unfiltered,
            viewport,
            depth,
            width: canvas.width(),
            height: canvas.height(),
        };
        let pipeline = FilterPipeline::new(self.doc, filter, ctm, &scope);
        let filtered = timed(self.perf, "svg.filter", self.render_id, || {
            pipeline.apply(source.into_surface())
        })?;
        canvas.composite(filtered, style.opacity)
    }

    /// Draws `id` with an already resolved style; no filter or group-opacity handling.
    fn paint_node(
        &self,
        canvas: &mut Canvas,
        id: NodeId,
        style: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        let node = self.doc.node(id);
        canvas.scoped(|c| {
            c.concat(local_transform(self.doc, id));
            if let Some(clip_id) = style.clip_path.as_deref() {
                self.apply_clip_path(c, clip_id, id, viewport, depth)?;
            }
            let ctx = LengthContext::new(viewport, style.font_size);

            match node.kind {
                ElementKind::Svg if id == self.doc.root() => {
                    let inner = Viewport::new(self.layout.view_box.width, self.layout.view_box.height);
                    self.render_children(c, id, style, inner, depth)
                }
                ElementKind::Svg => {
                    let x = ctx.attr(node, "x", 0.0, Axis::X);
                    let y = ctx.attr(node, "y", 0.0, Axis::Y);
                    let width = ctx.attr_opt(node, "width", Axis::X).unwrap_or(viewport.width);
                    let height = ctx.attr_opt(node, "height", Axis::Y).unwrap_or(viewport.height);
                    self.render_viewport(c, id, id, style, x, y, width, height, depth)
                }
                ElementKind::Group | ElementKind::Other => {
                    if node.kind == ElementKind::Group && self.flags.legacy_pie_chart {
                        self.draw_pie_chart(c, id, style);
                    }
                    self.render_children(c, id, style, viewport, depth)
                }
                ElementKind::Switch => {
                    let chosen = node.children.iter().copied().find(|child| {
                        let kind = self.doc.node(*child).kind;
                        !kind.is_definition() && kind != ElementKind::Other
                    });
                    match chosen {
                        Some(child) => self.render_node(c, child, style, viewport, depth + 1),
                        None => Ok(()),
                    }
                }
                ElementKind::Use => self.render_use(c, id, style, viewport, depth),
                ElementKind::Shape(_) => {
                    let segs = build_geometry(node, &ctx).and_then(|g| g.to_path());
                    if let Some(segs) = segs {
                        if let Some(path) = build_path(&segs) {
                            let bbox = bbox_of_segs(&segs);
                            self.paint_path(c, &path, bbox, style, viewport, depth)?;
                        }
                    }
                    self.render_children(c, id, style, viewport, depth)
                }
                ElementKind::Text => {
                    if let Some(ShapeGeometry::Text { x, y, text }) = build_geometry(node, &ctx) {
                        if let Some(path) = self.text_path(x, y, &text, style) {
                            let bounds = path.bounds();
                            let bbox = BBox::new(
                                f64::from(bounds.x()),
                                f64::from(bounds.y()),
                                f64::from(bounds.width()),
                                f64::from(bounds.height()),
                            );
                            self.paint_path(c, &path, Some(bbox), style, viewport, depth)?;
                        }
                    }
                    Ok(())
                }
                ElementKind::Image => self.draw_image(c, id, style, &ctx),
                _ => Ok(()),
            }
        })
    }

    fn render_children(
        &self,
        canvas: &mut Canvas,
        id: NodeId,
        style: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        for child in &self.doc.node(id).children {
            self.render_node(canvas, *child, style, viewport, depth + 1)?;
        }
        Ok(())
    }

    /// Establishes a new viewport at (x, y) of `width`×`height` and renders the
    /// children of `content` in it, using `source` for viewBox and aspect.
    #[allow(clippy::too_many_arguments)]
    fn render_viewport(
        &self,
        canvas: &mut Canvas,
        source: NodeId,
        content: NodeId,
        style: &ResolvedStyle,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        depth: usize,
    ) -> Result<(), RenderError> {
        if !(width > 0.0 && height > 0.0) {
            return Ok(());
        }
        let node = self.doc.node(source);
        canvas.concat(Matrix::translate(x, y));
        let overflow_visible = matches!(
            property(node, "overflow").map(str::trim),
            Some("visible") | Some("auto")
        );
        if !overflow_visible {
            canvas.clip_rect(0.0, 0.0, width, height);
        }
        let inner = match parse_viewbox(node.attribute("viewBox")) {
            Some(view_box) => {
                let aspect = AspectRatio::parse(node.attribute("preserveAspectRatio"));
                canvas.concat(aspect.view_box_transform(view_box, width, height));
                Viewport::new(view_box.width, view_box.height)
            }
            None => Viewport::new(width, height),
        };
        self.render_children(canvas, content, style, inner, depth)
    }

    fn render_use(
        &self,
        canvas: &mut Canvas,
        id: NodeId,
        style: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        let node = self.doc.node(id);
        let Some(target_key) = node.href_fragment() else {
            return Ok(());
        };
        let Some(target) = self.doc.lookup(target_key) else {
            self.note("svg.use.missing", &[("id", target_key)]);
            return Ok(());
        };
        let Some(_guard) = self.active_uses.enter(target_key) else {
            self.note("svg.use.cycle", &[("id", target_key)]);
            return Ok(());
        };

        let ctx = LengthContext::new(viewport, style.font_size);
        let x = ctx.attr(node, "x", 0.0, Axis::X);
        let y = ctx.attr(node, "y", 0.0, Axis::Y);
        let target_node = self.doc.node(target);
        match target_node.kind {
            ElementKind::Symbol | ElementKind::Svg => {
                self.check_depth(depth + 1)?;
                let symbol_style = ResolvedStyle::resolve(target_node, style, &ctx);
                if !symbol_style.is_rendered() {
                    return Ok(());
                }
                let size = |name: &str, axis: Axis, basis: f64| {
                    ctx.attr_opt(node, name, axis)
                        .or_else(|| ctx.attr_opt(target_node, name, axis))
                        .unwrap_or(basis)
                };
                let width = size("width", Axis::X, viewport.width);
                let height = size("height", Axis::Y, viewport.height);
                canvas.scoped(|c| {
                    c.concat(Matrix::translate(x, y));
                    if target_node.kind == ElementKind::Symbol {
                        c.concat(local_transform(self.doc, target));
                    }
                    self.render_viewport(c, target, target, &symbol_style, 0.0, 0.0, width, height, depth + 1)
                })
            }
            _ => canvas.scoped(|c| {
                c.concat(Matrix::translate(x, y));
                self.render_node(c, target, style, viewport, depth + 1)
            }),
        }
    }

    fn paint_path(
        &self,
        canvas: &mut Canvas,
        path: &tiny_skia::Path,
        bbox: Option<BBox>,
        style: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        let fill_opacity = style.fill_opacity * style.opacity;
        if let Some(source) =
            self.resolve_paint(canvas, &style.fill, fill_opacity, bbox, viewport, depth)?
        {
            canvas.fill_path(path, &source.paint(), style.fill_rule);
        }
        if style.stroke_width > 0.0 {
            let stroke_opacity = style.stroke_opacity * style.opacity;
            if let Some(source) =
                self.resolve_paint(canvas, &style.stroke, stroke_opacity, bbox, viewport, depth)?
            {
                canvas.stroke_path(path, &source.paint(), &build_stroke(style));
            }
        }
        Ok(())
    }

    /// Gradient, then pattern, then flat color.
    fn resolve_paint(
        &self,
        canvas: &Canvas,
        paint: &Paint,
        opacity: f32,
        bbox: Option<BBox>,
        viewport: Viewport,
        depth: usize,
    ) -> Result<Option<PaintSource>, RenderError> {
        match paint {
            Paint::None => Ok(None),
            Paint::Color(color) => Ok(Some(PaintSource::Ready(fill_paint(
                color.with_alpha_scaled(opacity),
            )))),
            Paint::Server { id, fallback } => {
                if let Some(gradient) = self.servers.gradient(id) {
                    return Ok(match gradient.to_paint(bbox, opacity) {
                        ServerPaint::Nothing => None,
                        ServerPaint::Solid(color) => Some(PaintSource::Ready(fill_paint(color))),
                        ServerPaint::Shader(shader) => {
                            Some(PaintSource::Ready(shader_paint(shader)))
                        }
                    });
                }
                if let Some(pattern) = self.servers.pattern(id) {
                    return self.pattern_paint(canvas, pattern, bbox, opacity, viewport, depth);
                }
                self.note("svg.paint.missing_server", &[("id", id.as_str())]);
                Ok(fallback.map(|color| PaintSource::Ready(fill_paint(color.with_alpha_scaled(opacity)))))
            }
        }
    }

    /// Rasterizes one pattern tile at device resolution.
    fn pattern_paint(
        &self,
        canvas: &Canvas,
        pattern: &PatternDefinition,
        bbox: Option<BBox>,
        opacity: f32,
        viewport: Viewport,
        depth: usize,
    ) -> Result<Option<PaintSource>, RenderError> {
        let Some(_guard) = self.active_patterns.enter(&pattern.id) else {
            self.note("svg.pattern.cycle", &[("id", pattern.id.as_str())]);
            return Ok(None);
        };
        self.check_depth(depth + 1)?;
        let Some(tile) = pattern.tile_rect(bbox) else {
            return Ok(None);
        };

        let (sx, sy) = canvas.transform().mul(pattern.transform).axis_scales();
        let pixels = |extent: f64, scale: f64| {
            (extent * scale.max(1e-6)).ceil().clamp(1.0, MAX_TILE_EDGE) as u32
        };
        let tile_w = pixels(tile.width, sx);
        let tile_h = pixels(tile.height, sy);
        let kx = f64::from(tile_w) / tile.width;
        let ky = f64::from(tile_h) / tile.height;

        let mut tile_canvas = Canvas::new(tile_w, tile_h)?;
        tile_canvas.set_transform(Matrix::scale(kx, ky).mul(pattern.content_transform(tile, bbox)));
        let pattern_node = self.doc.node(pattern.content);
        let ctx = LengthContext::new(viewport, self.root_style.font_size);
        let pattern_style = ResolvedStyle::resolve(pattern_node, &self.root_style, &ctx);
        for child in &pattern_node.children {
            self.render_node(&mut tile_canvas, *child, &pattern_style, viewport, depth + 1)?;
        }

        let pixmap = tile_canvas.into_surface().into_pixmap()?;
        let transform = pattern
            .transform
            .mul(Matrix::translate(tile.x, tile.y))
            .mul(Matrix::scale(1.0 / kx, 1.0 / ky));
        Ok(Some(PaintSource::Tile {
            pixmap,
            transform: to_sk_transform(transform),
            opacity: opacity.clamp(0.0, 1.0),
        }))
    }

    fn apply_clip_path(
        &self,
        canvas: &mut Canvas,
        clip_id: &str,
        element: NodeId,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        let Some(clip) = self.doc.lookup(clip_id).filter(|c| {
            self.doc.node(*c).kind == ElementKind::Definition(DefinitionKind::ClipPath)
        }) else {
            self.note("svg.clip.missing", &[("id", clip_id)]);
            return Ok(());
        };
        let Some(mut mask) = canvas.new_mask() else {
            return Ok(());
        };
        let clip_node = self.doc.node(clip);
        let mut base = canvas.transform().mul(local_transform(self.doc, clip));
        if clip_node.attribute("clipPathUnits").map(str::trim) == Some("objectBoundingBox") {
            match self.node_bbox(element, viewport, depth).filter(|b| !b.is_empty()) {
                Some(bbox) => base = base.mul(bbox.unit_transform()),
                None => {
                    canvas.intersect_mask(mask);
                    return Ok(());
                }
            }
        }
        let ctx = LengthContext::new(viewport, self.root_style.font_size);
        let clip_style = ResolvedStyle::resolve(clip_node, &self.root_style, &ctx);
        for child in &clip_node.children {
            self.collect_clip(&mut mask, *child, base, &clip_style, viewport, depth + 1)?;
        }
        canvas.intersect_mask(mask);
        Ok(())
    }

    fn collect_clip(
        &self,
        mask: &mut Mask,
        id: NodeId,
        transform: Matrix,
        parent: &ResolvedStyle,
        viewport: Viewport,
        depth: usize,
    ) -> Result<(), RenderError> {
        self.check_depth(depth)?;
        let node = self.doc.node(id);
        let ctx = LengthContext::new(viewport, parent.font_size);
        let style = ResolvedStyle::resolve(node, parent, &ctx);
        if !style.is_rendered() {
            return Ok(());
        }
        let transform = transform.mul(local_transform(self.doc, id));
        match node.kind {
            ElementKind::Shape(_) => {
                let segs = build_geometry(node, &ctx).and_then(|g| g.to_path());
                if let Some(path) = segs.as_deref().and_then(build_path) {
                    mask.fill_path(&path, style.clip_rule, true, to_sk_transform(transform));
                }
            }
            ElementKind::Use => {
                let Some(key) = node.href_fragment() else {
                    return Ok(());
                };
                let Some(target) = self.doc.lookup(key) else {
                    return Ok(());
                };
                let Some(_guard) = self.active_uses.enter(key) else {
                    self.note("svg.use.cycle", &[("id", key)]);
                    return Ok(());
                };
                let x = ctx.attr(node, "x", 0.0, Axis::X);
                let y = ctx.attr(node, "y", 0.0, Axis::Y);
                self.collect_clip(
                    mask,
                    target,
                    transform.mul(Matrix::translate(x, y)),
                    &style,
                    viewport,
                    depth + 1,
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// User-space bounds of `id` (its own transform excluded).
    fn node_bbox(&self, id: NodeId, viewport: Viewport, depth: usize) -> Option<BBox> {
        if depth > self.options.max_depth {
            return None;
        }
        let node = self.doc.node(id);
        let ctx = LengthContext::new(viewport, self.root_style.font_size);
        match node.kind {
            ElementKind::Shape(_) => {
                let segs = build_geometry(node, &ctx)?.to_path()?;
                bbox_of_segs(&segs)
            }
            ElementKind::Image => match build_geometry(node, &ctx)? {
                ShapeGeometry::Image {
                    x,
                    y,
                    width: Some(w),
                    height: Some(h),
                    ..
                } => Some(BBox::new(x, y, w, h)),
                _ => None,
            },
            ElementKind::Group | ElementKind::Svg | ElementKind::Switch | ElementKind::Other => {
                node.children
                    .iter()
                    .filter_map(|child| {
                        let bbox = self.node_bbox(*child, viewport, depth + 1)?;
                        Some(bbox.transformed(local_transform(self.doc, *child)))
                    })
                    .reduce(BBox::union)
            }
            _ => None,
        }
    }

    fn text_path(&self, x: f64, y: f64, text: &str, style: &ResolvedStyle) -> Option<tiny_skia::Path> {
        let variant = FontStyleVariant::from_flags(style.is_bold(), style.italic);
        let Some(font) = self.fonts.resolve(&style.font_family, variant) else {
            self.note("svg.text.no_font", &[("family", style.font_family.as_str())]);
            return None;
        };
        let layout = layout_text(&font, text, style.font_size as f32)?;
        let dx = layout.anchor_offset(style.text_anchor);
        text_outline(&font, &layout, x as f32 + dx, y as f32)
    }

    fn draw_image(
        &self,
        canvas: &mut Canvas,
        id: NodeId,
        style: &ResolvedStyle,
        ctx: &LengthContext,
    ) -> Result<(), RenderError> {
        let node = self.doc.node(id);
        let Some(ShapeGeometry::Image {
            x,
            y,
            width,
            height,
            href,
        }) = build_geometry(node, ctx)
        else {
            return Ok(());
        };
        if href.is_empty() || href.starts_with('#') {
            return Ok(());
        }
        if let Some(name) = property(node, "color-profile").map(str::trim) {
            if let Some(profile) = self.servers.color_profile(name) {
                self.note(
                    "svg.color_profile.ignored",
                    &[
                        ("name", profile.name.as_str()),
                        (
                            "rendering_intent",
                            profile.rendering_intent.as_deref().unwrap_or("auto"),
                        ),
                    ],
                );
            }
        }
        let Some(pixmap) = self.loader.load_image(&href)? else {
            return Ok(());
        };
        let natural_w = f64::from(pixmap.width());
        let natural_h = f64::from(pixmap.height());
        let target = BBox::new(
            x,
            y,
            width.unwrap_or(natural_w),
            height.unwrap_or(natural_h),
        );
        if target.is_empty() {
            return Ok(());
        }
        let aspect = AspectRatio::parse(node.attribute("preserveAspectRatio"));
        let placed = aspect.fit_rect(natural_w, natural_h, target);
        canvas.scoped(|c| {
            if aspect.slice {
                c.clip_rect(target.x, target.y, target.width, target.height);
            }
            let placement = Matrix::translate(placed.x, placed.y)
                .mul(Matrix::scale(placed.width / natural_w, placed.height / natural_h));
            c.draw_pixmap(&pixmap, placement, style.opacity);
        });
        Ok(())
    }

    fn draw_pie_chart(&self, canvas: &mut Canvas, id: NodeId, style: &ResolvedStyle) {
        let Some(slices) = pie_slices(self.doc, id) else {
            return;
        };
        let count = slices.len().to_string();
        self.note("svg.legacy_pie_chart", &[("slices", count.as_str())]);
        let label_style = ResolvedStyle {
            text_anchor: TextAnchor::Start,
            ..style.clone()
        };
        for slice in slices {
            canvas.scoped(|c| {
                c.concat(Matrix::translate(slice.offset.0, slice.offset.1));
                if let Some(path) = build_path(&slice.path) {
                    c.fill_path(&path, &fill_paint(slice.fill), tiny_skia::FillRule::Winding);
                    let stroke = Stroke {
                        width: slice.stroke_width as f32,
                        ..Stroke::default()
                    };
                    c.stroke_path(&path, &fill_paint(slice.stroke), &stroke);
                }
                if let Some(label) =
                    self.text_path(slice.label_x, slice.label_y, &slice.label, &label_style)
                {
                    c.fill_path(&label, &fill_paint(Color::BLACK), tiny_skia::FillRule::Winding);
                }
            });
        }
    }
}

fn local_transform(doc: &Document, id: NodeId) -> Matrix {
    doc.node(id)
        .attribute("transform")
        .map(parse_transform)
        .unwrap_or_else(Matrix::identity)
}

/// Filter callbacks bound to the element being filtered.
struct FilterScope<'r, 'a> {
    renderer: &'r Renderer<'a>,
    ctm: Matrix,
    style: ResolvedStyle,
    viewport: Viewport,
    depth: usize,
    width: u32,
    height: u32,
}

impl FilterHost for FilterScope<'_, '_> {
    fn render_fragment(&self, id: &str) -> Result<Option<PixelSurface>, RenderError> {
        let renderer = self.renderer;
        let Some(target) = renderer.doc.lookup(id) else {
            return Ok(None);
        };
        let Some(_guard) = renderer.active_uses.enter(id) else {
            renderer.note("svg.use.cycle", &[("id", id)]);
            return Ok(None);
        };
        let mut canvas = Canvas::new(self.width, self.height)?;
        canvas.set_transform(self.ctm);
        renderer.render_node(&mut canvas, target, &self.style, self.viewport, self.depth + 1)?;
        Ok(Some(canvas.into_surface()))
    }

    fn load_image(
        &self,
        href: &str,
        x: f64,
        y: f64,
        width: Option<f64>,
        height: Option<f64>,
    ) -> Result<Option<PixelSurface>, RenderError> {
        let Some(pixmap) = self.renderer.loader.load_image(href)? else {
            return Ok(None);
        };
        let natural_w = f64::from(pixmap.width());
        let natural_h = f64::from(pixmap.height());
        let w = width.filter(|w| *w > 0.0).unwrap_or(natural_w);
        let h = height.filter(|h| *h > 0.0).unwrap_or(natural_h);
        let mut canvas = Canvas::new(self.width, self.height)?;
        canvas.set_transform(self.ctm);
        let placement =
            Matrix::translate(x, y).mul(Matrix::scale(w / natural_w, h / natural_h));
        canvas.draw_pixmap(&pixmap, placement, 1.0);
        Ok(Some(canvas.into_surface()))
    }

    fn note(&self, event: &str, detail: &str) {
        self.renderer.note(event, &[("name", detail)]);
    }
}
