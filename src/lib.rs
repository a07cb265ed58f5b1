mod cascade;
mod css;
mod debug;
mod document;
mod error;
mod filter;
mod font;
mod geometry;
mod legacy_chart;
mod paint_server;
mod perf;
mod raster;
mod render;
mod resource;
mod surface;
mod text;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use debug::DebugLogger;
use document::Document;
use font::FontRegistry;
use geometry::{LengthContext, Viewport};
use paint_server::PaintServerRegistry;
use perf::{PerfLogger, timed};
use raster::Canvas;
use render::{Layout, Renderer};
use resource::ResourceLoader;

pub use error::{RenderError, RenderErrorCode};
pub use types::{Color, CompatFlags, RenderOptions, RenderResult};

/// Renders `svg` with default compatibility flags.
pub fn render(svg: &str, options: &RenderOptions) -> Result<RenderResult, RenderError> {
    let renderer = SvgRenderer::from_parts(options.clone(), CompatFlags::default(), None, None)?;
    renderer.render(svg)
}

/// Reusable renderer holding configuration, registered fonts and log sinks.
pub struct SvgRenderer {
    options: RenderOptions,
    flags: CompatFlags,
    fonts: Arc<FontRegistry>,
    debug: Option<DebugLogger>,
    perf: Option<PerfLogger>,
    render_count: AtomicUsize,
}

#[derive(Clone)]
pub struct SvgRendererBuilder {
    options: RenderOptions,
    flags: CompatFlags,
    debug_path: Option<PathBuf>,
    perf_path: Option<PathBuf>,
}

impl SvgRenderer {
    pub fn builder() -> SvgRendererBuilder {
        SvgRendererBuilder::new()
    }

    fn from_parts(
        options: RenderOptions,
        flags: CompatFlags,
        debug: Option<DebugLogger>,
        perf: Option<PerfLogger>,
    ) -> Result<Self, RenderError> {
        validate_options(&options)?;
        let mut fonts = FontRegistry::new();
        for dir in &options.font_dirs {
            fonts.register_dir(dir);
        }
        Ok(Self {
            options,
            flags,
            fonts: Arc::new(fonts),
            debug,
            perf,
            render_count: AtomicUsize::new(0),
        })
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn flags(&self) -> CompatFlags {
        self.flags
    }

    pub fn render(&self, svg: &str) -> Result<RenderResult, RenderError> {
        let render_id = self.render_count.fetch_add(1, Ordering::Relaxed);
        let result = self.render_inner(svg, render_id);
        if let Some(debug) = self.debug.as_ref() {
            if let Err(err) = result.as_ref() {
                let code = err.code().as_i32().to_string();
                debug.event(
                    "svg.render.failed",
                    &[("code", code.as_str()), ("message", &err.message())],
                );
            }
            debug.emit_summary("svg.render");
            debug.flush();
        }
        if let Some(perf) = self.perf.as_ref() {
            perf.flush();
        }
        result
    }

    pub fn render_to_png(&self, svg: &str) -> Result<Vec<u8>, RenderError> {
        self.render(svg)?.encode_png()
    }

    pub fn render_to_file(&self, svg: &str, path: impl AsRef<Path>) -> Result<(), RenderError> {
        let png = self.render_to_png(svg)?;
        std::fs::write(path, png)?;
        Ok(())
    }

    fn render_inner(&self, svg: &str, render_id: usize) -> Result<RenderResult, RenderError> {
        let perf = self.perf.as_ref();
        let id = Some(render_id);

        let doc = timed(perf, "svg.parse", id, || Document::parse(svg))?;

        resource::enforce_policy(&doc, self.options.enable_external_resources)?;
        if self.flags.strict_mode && !self.flags.allow_unsupported_filter_fallback {
            filter::validate_filters(&doc)?;
        }

        let (layout, servers) = timed(perf, "svg.layout", id, || {
            let layout = Layout::compute(&doc, &self.options)?;
            let ctx = LengthContext::new(
                Viewport::new(layout.view_box.width, layout.view_box.height),
                f64::from(self.options.default_font_size),
            );
            Ok::<_, RenderError>((layout, PaintServerRegistry::scan(&doc, &ctx)))
        })?;
        if let Some(perf) = perf {
            perf.log_counts(
                "svg.nodes",
                id,
                &[
                    ("nodes", doc.len() as u64),
                    ("color_profiles", servers.color_profile_count() as u64),
                ],
            );
        }

        let loader = ResourceLoader::new(
            self.options.resource_dir.clone(),
            self.options.fail_on_missing_resources,
            self.debug.clone(),
        );
        let mut renderer = Renderer::new(
            &doc,
            &servers,
            &self.fonts,
            &loader,
            &self.options,
            self.flags,
            layout,
            self.debug.as_ref(),
            perf,
        );
        renderer.render_id = id;

        let mut canvas = Canvas::new(layout.pixel_width, layout.pixel_height)?;
        canvas.fill_color(self.options.background);
        timed(perf, "svg.paint", id, || renderer.render_document(&mut canvas))?;

        Ok(RenderResult {
            width: layout.pixel_width,
            height: layout.pixel_height,
            rgba: canvas.into_surface().to_straight_rgba(),
        })
    }
}

fn validate_options(options: &RenderOptions) -> Result<(), RenderError> {
    if !options.scale.is_finite() || options.scale <= 0.0 {
        return Err(RenderError::InvalidConfiguration(format!(
            "scale must be finite and > 0 (got {})",
            options.scale
        )));
    }
    for (name, value) in [
        ("viewport_width", options.viewport_width),
        ("viewport_height", options.viewport_height),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(RenderError::InvalidConfiguration(format!(
                "{name} must be finite and >= 0 (got {value})"
            )));
        }
    }
    if options.max_depth < 1 {
        return Err(RenderError::InvalidConfiguration(
            "max_depth must be >= 1".to_string(),
        ));
    }
    Ok(())
}

impl Default for SvgRendererBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SvgRendererBuilder {
    pub fn new() -> Self {
        Self {
            options: RenderOptions::default(),
            flags: CompatFlags::default(),
            debug_path: None,
            perf_path: None,
        }
    }

    pub fn viewport_size(mut self, width: f64, height: f64) -> Self {
        self.options.viewport_width = width;
        self.options.viewport_height = height;
        self
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.options.scale = scale;
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.options.background = color;
        self
    }

    pub fn default_font(mut self, family: impl Into<String>, size: f32) -> Self {
        self.options.default_font_family = family.into();
        self.options.default_font_size = size;
        self
    }

    pub fn external_resources(mut self, enabled: bool) -> Self {
        self.options.enable_external_resources = enabled;
        self
    }

    pub fn resource_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.resource_dir = Some(dir.into());
        self
    }

    pub fn register_font_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.font_dirs.push(dir.into());
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth;
        self
    }

    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.flags.strict_mode = strict;
        self
    }

    pub fn allow_unsupported_filter_fallback(mut self, allow: bool) -> Self {
        self.flags.allow_unsupported_filter_fallback = allow;
        self
    }

    pub fn legacy_pie_chart(mut self, enabled: bool) -> Self {
        self.flags.legacy_pie_chart = enabled;
        self
    }

    pub fn fail_on_missing_resources(mut self, fail: bool) -> Self {
        self.options.fail_on_missing_resources = fail;
        self
    }

    /// JSON-lines event log; created (truncated) at build time.
    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<SvgRenderer, RenderError> {
        validate_options(&self.options)?;
        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };
        let perf = match self.perf_path {
            Some(path) => Some(PerfLogger::new(path)?),
            None => None,
        };
        SvgRenderer::from_parts(self.options, self.flags, debug, perf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVG_NS: &str = r#"xmlns="http://www.w3.org/2000/svg""#;

    fn svg(attrs: &str, body: &str) -> String {
        format!("<svg {SVG_NS} {attrs}>{body}</svg>")
    }

    fn px(result: &RenderResult, x: u32, y: u32) -> [u8; 4] {
        result.pixel(x, y).expect("pixel in bounds")
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fullbleed_svg_{}_{name}", std::process::id()))
    }

    #[test]
    fn view_box_sets_output_size() {
        let result = render(&svg(r#"viewBox="0 0 32 16""#, ""), &RenderOptions::default())
            .expect("render");
        assert_eq!((result.width, result.height), (32, 16));
        assert_eq!(result.rgba.len(), 32 * 16 * 4);
    }

    #[test]
    fn scale_multiplies_output_size() {
        let options = RenderOptions {
            scale: 2.5,
            ..RenderOptions::default()
        };
        let result = render(&svg(r#"width="10" height="3""#, ""), &options).expect("render");
        assert_eq!((result.width, result.height), (25, 7));
    }

    #[test]
    fn solid_rect_fills_every_pixel() {
        let doc = svg(
            r#"width="10" height="10""#,
            r##"<rect width="10" height="10" fill="#ff0000"/>"##,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!((result.width, result.height), (10, 10));
        assert!(result.rgba.chunks_exact(4).all(|p| p == [255, 0, 0, 255]));
    }

    #[test]
    fn rendering_is_idempotent() {
        let doc = svg(
            r#"width="40" height="20""#,
            r##"<defs><radialGradient id="g"><stop offset="0" stop-color="#336699"/>
               <stop offset="1" stop-color="#ffcc00" stop-opacity="0.5"/></radialGradient>
               <filter id="t"><feTurbulence baseFrequency="0.1" numOctaves="2" seed="3"/></filter></defs>
               <rect width="20" height="20" fill="url(#g)"/>
               <rect x="20" width="20" height="20" filter="url(#t)"/>"##,
        );
        let first = render(&doc, &RenderOptions::default()).expect("first");
        let second = render(&doc, &RenderOptions::default()).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn saturate_zero_desaturates_to_gray() {
        let doc = svg(
            r#"width="4" height="4""#,
            r#"<rect width="4" height="4" fill="blue" filter="url(#f)"/>
               <filter id="f"><feColorMatrix type="saturate" values="0"/></filter>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        for p in result.rgba.chunks_exact(4) {
            assert_eq!(p[0], p[1]);
            assert_eq!(p[1], p[2]);
            assert_eq!(p[3], 255);
            assert!(p[0] > 0 && p[0] < 200, "gray level {}", p[0]);
        }
    }

    #[test]
    fn self_referencing_use_terminates_and_siblings_still_render() {
        let doc = svg(
            r#"width="20" height="10""#,
            r##"<g id="loop"><rect width="10" height="10" fill="red"/><use href="#loop"/></g>
               <use href="#loop" x="10"/>"##,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 5, 5), [255, 0, 0, 255]);
        assert_eq!(px(&result, 15, 5), [255, 0, 0, 255]);
    }

    #[test]
    fn use_cycles_are_logged() {
        let path = temp_path("cycle.jsonl");
        let renderer = SvgRenderer::builder()
            .debug_log(&path)
            .build()
            .expect("renderer");
        let doc = svg(
            r#"width="4" height="4""#,
            r##"<g id="a"><use href="#b"/></g><g id="b"><use href="#a"/></g>"##,
        );
        renderer.render(&doc).expect("render");
        let log = std::fs::read_to_string(&path).expect("log");
        assert!(log.contains("\"type\":\"svg.use.cycle\""));
        assert!(log.contains("\"type\":\"debug.summary\""));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn gradient_stops_are_sorted_and_single_stop_is_flat() {
        let doc = svg(
            r#"width="100" height="20""#,
            r#"<linearGradient id="g"><stop offset="1" stop-color="blue"/><stop offset="0" stop-color="red"/></linearGradient>
               <linearGradient id="s"><stop offset="0.3" stop-color="lime"/></linearGradient>
               <rect width="100" height="10" fill="url(#g)"/>
               <rect y="10" width="100" height="10" fill="url(#s)"/>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        let left = px(&result, 1, 5);
        assert!(left[0] > 240 && left[2] < 15, "left {left:?}");
        let right = px(&result, 98, 5);
        assert!(right[2] > 240 && right[0] < 15, "right {right:?}");
        assert_eq!(px(&result, 50, 15), [0, 255, 0, 255]);
    }

    #[test]
    fn missing_paint_server_uses_fallback_color() {
        let doc = svg(
            r#"width="4" height="4""#,
            r#"<rect width="4" height="4" fill="url(#nowhere) red"/>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 2, 2), [255, 0, 0, 255]);
    }

    #[test]
    fn composite_in_keeps_only_the_overlap() {
        let doc = svg(
            r#"width="10" height="10""#,
            r##"<filter id="f"><feFlood flood-color="#ff0000" result="r"/>
               <feComposite in="r" in2="SourceGraphic" operator="in"/></filter>
               <rect width="5" height="5" fill="blue" filter="url(#f)"/>"##,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 2, 2), [255, 0, 0, 255]);
        assert_eq!(px(&result, 7, 7)[3], 0);
    }

    #[test]
    fn fe_image_renders_referenced_fragment() {
        let doc = svg(
            r#"width="4" height="4""#,
            r##"<defs><rect id="g" width="4" height="4" fill="#00ff00"/>
               <filter id="f"><feImage href="#g"/></filter></defs>
               <rect width="4" height="4" fill="red" filter="url(#f)"/>"##,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 1, 1), [0, 255, 0, 255]);
    }

    #[test]
    fn fe_image_of_its_own_element_terminates() {
        let doc = svg(
            r#"width="4" height="4""#,
            r##"<filter id="f"><feImage href="#me"/></filter>
               <rect id="me" width="4" height="4" fill="red" filter="url(#f)"/>"##,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 1, 1)[3], 0);
    }

    #[test]
    fn remote_references_are_blocked_unless_enabled() {
        let doc = svg(
            r#"width="4" height="4""#,
            r#"<image href="https://example.com/a.png" width="4" height="4"/>"#,
        );
        let err = render(&doc, &RenderOptions::default()).expect_err("blocked");
        assert_eq!(err.code(), RenderErrorCode::ExternalResourceBlocked);
        assert_eq!(err.message(), "External resource blocked: https://example.com/a.png");

        let renderer = SvgRenderer::builder()
            .external_resources(true)
            .build()
            .expect("renderer");
        let result = renderer.render(&doc).expect("remote image is skipped");
        assert_eq!(px(&result, 1, 1)[3], 0);

        let strict = SvgRenderer::builder()
            .external_resources(true)
            .fail_on_missing_resources(true)
            .build()
            .expect("renderer");
        let err = strict.render(&doc).expect_err("fetch fails");
        assert_eq!(err.code(), RenderErrorCode::ExternalResourceFailed);
    }

    #[test]
    fn unknown_filter_primitive_is_rejected_in_strict_mode() {
        let doc = svg(
            r#"width="4" height="4""#,
            r#"<filter id="f"><feBogus/></filter><rect width="4" height="4" filter="url(#f)"/>"#,
        );
        let err = render(&doc, &RenderOptions::default()).expect_err("unsupported");
        assert_eq!(err.code(), RenderErrorCode::UnsupportedFeature);
        assert_eq!(err.message(), "Unsupported filter primitive: feBogus");

        let lenient = SvgRenderer::builder()
            .allow_unsupported_filter_fallback(true)
            .build()
            .expect("renderer");
        let result = lenient.render(&doc).expect("pass-through");
        assert_eq!(px(&result, 1, 1), [0, 0, 0, 255]);

        let relaxed = SvgRenderer::builder()
            .strict_mode(false)
            .build()
            .expect("renderer");
        assert!(relaxed.render(&doc).is_ok());
    }

    #[test]
    fn deep_nesting_hits_the_depth_cap() {
        let doc = svg(
            r#"width="4" height="4""#,
            "<g><g><g><g><g><rect width=\"4\" height=\"4\"/></g></g></g></g></g>",
        );
        let renderer = SvgRenderer::builder().max_depth(3).build().expect("renderer");
        let err = renderer.render(&doc).expect_err("too deep");
        assert_eq!(err.code(), RenderErrorCode::RenderFailed);
        assert_eq!(err.message(), "Maximum render depth exceeded (3)");
        assert!(render(&doc, &RenderOptions::default()).is_ok());
    }

    #[test]
    fn invalid_documents_are_reported() {
        let err = render("<html/>", &RenderOptions::default()).expect_err("root");
        assert_eq!(err.code(), RenderErrorCode::InvalidDocument);
        assert_eq!(err.message(), "Root element must be <svg>");

        let err = render("<svg", &RenderOptions::default()).expect_err("xml");
        assert_eq!(err.code(), RenderErrorCode::InvalidDocument);

        let err = render(&svg(r#"width="-5" height="5""#, ""), &RenderOptions::default())
            .expect_err("size");
        assert_eq!(err.code(), RenderErrorCode::InvalidDocument);
        assert_eq!(err.message(), "Invalid SVG viewport dimensions");
    }

    #[test]
    fn builder_rejects_bad_configuration() {
        for builder in [
            SvgRenderer::builder().scale(0.0),
            SvgRenderer::builder().scale(f64::NAN),
            SvgRenderer::builder().viewport_size(-1.0, 10.0),
            SvgRenderer::builder().max_depth(0),
        ] {
            let err = builder.build().err().expect("invalid configuration");
            assert!(matches!(err, RenderError::InvalidConfiguration(_)));
            assert_eq!(err.code(), RenderErrorCode::RenderFailed);
        }
    }

    #[test]
    fn background_and_group_opacity() {
        let renderer = SvgRenderer::builder()
            .background(Color::WHITE)
            .build()
            .expect("renderer");
        let result = renderer
            .render(&svg(r#"width="4" height="4""#, ""))
            .expect("render");
        assert_eq!(px(&result, 0, 0), [255, 255, 255, 255]);

        let doc = svg(
            r#"width="4" height="4""#,
            r#"<g opacity="0.5"><rect width="4" height="4" fill="red"/><rect width="4" height="4" fill="red"/></g>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        let p = px(&result, 2, 2);
        assert_eq!(p[0], 255);
        assert!((127..=128).contains(&p[3]), "alpha {}", p[3]);
    }

    #[test]
    fn patterns_tile_and_self_references_paint_nothing() {
        let doc = svg(
            r#"width="8" height="4""#,
            r#"<pattern id="p" patternUnits="userSpaceOnUse" width="4" height="4">
                 <rect width="2" height="4" fill="red"/></pattern>
               <rect width="8" height="4" fill="url(#p)"/>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        for x in [0, 1, 4, 5] {
            let p = px(&result, x, 2);
            assert!(p[3] >= 200 && p[0] >= 200, "x={x} {p:?}");
        }
        for x in [2, 3, 6, 7] {
            assert!(px(&result, x, 2)[3] <= 40, "x={x}");
        }

        let cyclic = svg(
            r#"width="4" height="4""#,
            r#"<pattern id="p" patternUnits="userSpaceOnUse" width="2" height="2">
                 <rect width="2" height="2" fill="url(#p)"/></pattern>
               <rect width="4" height="4" fill="url(#p)"/>"#,
        );
        let result = render(&cyclic, &RenderOptions::default()).expect("render");
        assert!(result.rgba.chunks_exact(4).all(|p| p[3] == 0));
    }

    #[test]
    fn clip_path_limits_painting() {
        let doc = svg(
            r#"width="10" height="10""#,
            r#"<clipPath id="c"><rect width="5" height="10"/></clipPath>
               <rect width="10" height="10" fill="red" clip-path="url(#c)"/>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 2, 5), [255, 0, 0, 255]);
        assert_eq!(px(&result, 7, 5)[3], 0);
    }

    #[test]
    fn nested_svg_maps_its_view_box() {
        let doc = svg(
            r#"width="20" height="20""#,
            r#"<svg x="10" y="10" width="10" height="10" viewBox="0 0 1 1">
                 <rect width="1" height="1" fill="blue"/></svg>"#,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 15, 15), [0, 0, 255, 255]);
        assert_eq!(px(&result, 5, 5)[3], 0);
    }

    #[test]
    fn symbol_renders_only_through_use() {
        let doc = svg(
            r#"width="20" height="10""#,
            r##"<symbol id="s" viewBox="0 0 2 2"><rect width="2" height="2" fill="lime"/></symbol>
               <use href="#s" x="10" width="10" height="10"/>"##,
        );
        let result = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&result, 5, 5)[3], 0);
        assert_eq!(px(&result, 15, 5), [0, 255, 0, 255]);
    }

    #[test]
    fn legacy_pie_chart_is_opt_in() {
        let doc = svg(
            r#"width="480" height="340""#,
            r#"<g id="PieParent"/>
               <data xmlns="urn:report" id="results">
                 <region><regionName>A</regionName><regionResult>3</regionResult></region>
                 <region><regionName>B</regionName><regionResult>1</regionResult></region>
               </data>"#,
        );
        let plain = render(&doc, &RenderOptions::default()).expect("render");
        assert_eq!(px(&plain, 275, 205)[3], 0);

        let renderer = SvgRenderer::builder()
            .legacy_pie_chart(true)
            .build()
            .expect("renderer");
        let result = renderer.render(&doc).expect("render");
        assert_eq!(px(&result, 275, 205), [191, 191, 191, 255]);
    }

    #[test]
    fn png_and_file_outputs() {
        let renderer = SvgRenderer::builder().build().expect("renderer");
        let doc = svg(
            r#"width="3" height="2""#,
            r#"<rect width="3" height="2" fill="red"/>"#,
        );
        let png = renderer.render_to_png(&doc).expect("png");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).expect("decode").to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(1, 1).0, [255, 0, 0, 255]);

        let path = temp_path("out.png");
        renderer.render_to_file(&doc, &path).expect("file");
        assert_eq!(std::fs::read(&path).expect("read"), png);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn perf_log_records_spans() {
        let path = temp_path("perf.log");
        {
            let renderer = SvgRenderer::builder()
                .perf_log(&path)
                .build()
                .expect("renderer");
            renderer
                .render(&svg(r#"width="2" height="2""#, ""))
                .expect("render");
            let log = std::fs::read_to_string(&path).expect("log");
            assert!(log.contains("svg.parse"));
            assert!(log.contains("svg.paint"));
            assert!(log.contains("svg.nodes"));
        }
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(temp_path("perf_hot.log"));
    }
}
