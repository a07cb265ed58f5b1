use tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Shader,
    Stroke, StrokeDash, Transform,
};

use crate::cascade::ResolvedStyle;
use crate::error::RenderError;
use crate::geometry::{Matrix, PathSeg};
use crate::paint_server::to_sk_transform;
use crate::surface::PixelSurface;
use crate::types::Color;

#[derive(Clone)]
struct CanvasState {
    transform: Matrix,
    clip_mask: Option<Mask>,
}

/// Premultiplied RGBA8 drawing target with a save/restore stack of
/// transform and clip.
pub(crate) struct Canvas {
    pixmap: Pixmap,
    state: CanvasState,
    stack: Vec<CanvasState>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self, RenderError> {
        let pixmap = Pixmap::new(width, height).ok_or_else(|| {
            RenderError::RenderFailed(format!("Failed to allocate {width}x{height} surface"))
        })?;
        Ok(Self {
            pixmap,
            state: CanvasState {
                transform: Matrix::identity(),
                clip_mask: None,
            },
            stack: Vec::new(),
        })
    }

    /// Blank canvas of the same size sharing the current transform but no clip.
    pub fn offscreen(&self) -> Result<Self, RenderError> {
        let mut layer = Self::new(self.width(), self.height())?;
        layer.state.transform = self.state.transform;
        Ok(layer)
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn transform(&self) -> Matrix {
        self.state.transform
    }

    pub fn set_transform(&mut self, transform: Matrix) {
        self.state.transform = transform;
    }

    /// Applies `m` before the current transform.
    pub fn concat(&mut self, m: Matrix) {
        self.state.transform = self.state.transform.mul(m);
    }

    pub fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    pub fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    /// Runs `f` between a save and its matching restore.
    pub fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.save();
        let out = f(self);
        self.restore();
        out
    }

    pub fn fill_color(&mut self, color: Color) {
        if color.a > 0.0 {
            self.pixmap.fill(color.to_sk_color());
        }
    }

    pub fn new_mask(&self) -> Option<Mask> {
        Mask::new(self.width(), self.height())
    }

    /// Intersects the clip with `mask` (device space).
    pub fn intersect_mask(&mut self, mask: Mask) {
        let merged = match self.state.clip_mask.take() {
            None => mask,
            Some(mut current) => {
                for (dst, src) in current.data_mut().iter_mut().zip(mask.data().iter()) {
                    *dst = ((*dst as u16 * *src as u16 + 127) / 255) as u8;
                }
                current
            }
        };
        self.state.clip_mask = Some(merged);
    }

    /// Intersects the clip with a user-space rectangle under the current transform.
    pub fn clip_rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        let Some(rect) = Rect::from_xywh(x as f32, y as f32, width as f32, height as f32) else {
            if let Some(mask) = self.new_mask() {
                self.state.clip_mask = Some(mask);
            }
            return;
        };
        let path = PathBuilder::from_rect(rect);
        let transform = to_sk_transform(self.state.transform);
        if let Some(mask) = self.state.clip_mask.as_mut() {
            mask.intersect_path(&path, FillRule::Winding, true, transform);
            return;
        }
        let Some(mut mask) = self.new_mask() else {
            return;
        };
        mask.fill_path(&path, FillRule::Winding, true, transform);
        self.state.clip_mask = Some(mask);
    }

    pub fn fill_path(&mut self, path: &Path, paint: &Paint, rule: FillRule) {
        let transform = to_sk_transform(self.state.transform);
        self.pixmap
            .fill_path(path, paint, rule, transform, self.state.clip_mask.as_ref());
    }

    pub fn stroke_path(&mut self, path: &Path, paint: &Paint, stroke: &Stroke) {
        let transform = to_sk_transform(self.state.transform);
        self.pixmap
            .stroke_path(path, paint, stroke, transform, self.state.clip_mask.as_ref());
    }

    /// Draws `pixmap` mapped by `placement` (pixmap pixels → user space).
    pub fn draw_pixmap(&mut self, pixmap: &Pixmap, placement: Matrix, opacity: f32) {
        let paint = PixmapPaint {
            opacity: opacity.clamp(0.0, 1.0),
            quality: FilterQuality::Bicubic,
            ..PixmapPaint::default()
        };
        let transform = to_sk_transform(self.state.transform.mul(placement));
        self.pixmap.draw_pixmap(
            0,
            0,
            pixmap.as_ref(),
            &paint,
            transform,
            self.state.clip_mask.as_ref(),
        );
    }

    /// Composites a device-space surface of the same size through the clip.
    pub fn composite(&mut self, surface: PixelSurface, opacity: f32) -> Result<(), RenderError> {
        let layer = surface.into_pixmap()?;
        let paint = PixmapPaint {
            opacity: opacity.clamp(0.0, 1.0),
            quality: FilterQuality::Nearest,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            layer.as_ref(),
            &paint,
            Transform::identity(),
            self.state.clip_mask.as_ref(),
        );
        Ok(())
    }

    pub fn into_surface(self) -> PixelSurface {
        PixelSurface::from_pixmap(self.pixmap)
    }
}

/// Converts segments to a tiny-skia path; `None` when nothing drawable remains.
pub(crate) fn build_path(segs: &[PathSeg]) -> Option<Path> {
    let mut builder = PathBuilder::new();
    for seg in segs {
        match *seg {
            PathSeg::MoveTo(x, y) => builder.move_to(x as f32, y as f32),
            PathSeg::LineTo(x, y) => builder.line_to(x as f32, y as f32),
            PathSeg::CurveTo(x1, y1, x2, y2, x, y) => builder.cubic_to(
                x1 as f32, y1 as f32, x2 as f32, y2 as f32, x as f32, y as f32,
            ),
            PathSeg::Close => builder.close(),
        }
    }
    builder.finish()
}

pub(crate) fn build_stroke(style: &ResolvedStyle) -> Stroke {
    let mut stroke = Stroke {
        width: style.stroke_width.max(0.0) as f32,
        miter_limit: style.miter_limit.max(1.0) as f32,
        line_cap: style.line_cap,
        line_join: style.line_join,
        ..Stroke::default()
    };

    if let Some(dashes) = style.dash_array.as_ref() {
        let pattern: Vec<f32> = dashes.iter().map(|d| d.abs() as f32).collect();
        if pattern.len() >= 2 && pattern.iter().any(|d| *d > 0.0) {
            stroke.dash = StrokeDash::new(pattern, style.dash_offset as f32);
        }
    }

    stroke
}

pub(crate) fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color.to_sk_color());
    paint.anti_alias = true;
    paint
}

pub(crate) fn shader_paint(shader: Shader<'static>) -> Paint<'static> {
    Paint {
        shader,
        anti_alias: true,
        ..Paint::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Vec<PathSeg> {
        vec![
            PathSeg::MoveTo(x, y),
            PathSeg::LineTo(x + size, y),
            PathSeg::LineTo(x + size, y + size),
            PathSeg::LineTo(x, y + size),
            PathSeg::Close,
        ]
    }

    fn pixel(canvas: &Canvas, x: u32, y: u32) -> [u8; 4] {
        PixelSurface::from_pixmap(canvas.pixmap.clone()).get(x, y)
    }

    #[test]
    fn fills_under_current_transform() {
        let mut canvas = Canvas::new(10, 10).expect("canvas");
        let path = build_path(&square(0.0, 0.0, 2.0)).expect("path");
        canvas.scoped(|c| {
            c.concat(Matrix::translate(4.0, 4.0));
            c.fill_path(&path, &fill_paint(Color::rgb(1.0, 0.0, 0.0)), FillRule::Winding);
        });
        assert_eq!(pixel(&canvas, 5, 5), [255, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 1, 1), [0, 0, 0, 0]);
        assert_eq!(canvas.transform(), Matrix::identity());
    }

    #[test]
    fn clip_is_restored_after_scope() {
        let mut canvas = Canvas::new(10, 10).expect("canvas");
        let path = build_path(&square(0.0, 0.0, 10.0)).expect("path");
        canvas.scoped(|c| {
            c.clip_rect(0.0, 0.0, 5.0, 10.0);
            c.fill_path(&path, &fill_paint(Color::BLACK), FillRule::Winding);
        });
        assert_eq!(pixel(&canvas, 2, 2)[3], 255);
        assert_eq!(pixel(&canvas, 7, 2)[3], 0);
        canvas.fill_path(&path, &fill_paint(Color::BLACK), FillRule::Winding);
        assert_eq!(pixel(&canvas, 7, 2)[3], 255);
    }

    #[test]
    fn mask_intersection_multiplies_coverage() {
        let mut canvas = Canvas::new(4, 1).expect("canvas");
        let mut left = canvas.new_mask().expect("mask");
        left.data_mut()[..2].fill(255);
        let mut middle = canvas.new_mask().expect("mask");
        middle.data_mut()[1..3].fill(255);
        canvas.intersect_mask(left);
        canvas.intersect_mask(middle);
        let path = build_path(&square(0.0, 0.0, 4.0)).expect("path");
        canvas.fill_path(&path, &fill_paint(Color::BLACK), FillRule::Winding);
        let alphas: Vec<u8> = (0..4).map(|x| pixel(&canvas, x, 0)[3]).collect();
        assert_eq!(alphas, vec![0, 255, 0, 0]);
    }

    #[test]
    fn background_fill_skips_transparent_colors() {
        let mut canvas = Canvas::new(2, 2).expect("canvas");
        canvas.fill_color(Color::TRANSPARENT);
        assert_eq!(pixel(&canvas, 0, 0), [0, 0, 0, 0]);
        canvas.fill_color(Color::WHITE);
        assert_eq!(pixel(&canvas, 1, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn zero_sized_canvas_reports_allocation_failure() {
        let err = Canvas::new(0, 5).err().expect("error");
        assert_eq!(err.message(), "Failed to allocate 0x5 surface");
    }

    #[test]
    fn composite_applies_opacity() {
        let mut canvas = Canvas::new(1, 1).expect("canvas");
        let mut layer = PixelSurface::new(1, 1);
        layer.set(0, 0, [255, 255, 255, 255]);
        canvas.composite(layer, 0.5).expect("composite");
        let px = pixel(&canvas, 0, 0);
        assert!((127..=128).contains(&px[3]));
    }

    #[test]
    fn stroke_dashes_need_a_positive_entry() {
        let mut style = crate::cascade::ResolvedStyle::root(&crate::types::RenderOptions::default());
        style.dash_array = Some(vec![0.0, 0.0]);
        assert!(build_stroke(&style).dash.is_none());
        style.dash_array = Some(vec![4.0, 2.0]);
        style.stroke_width = 3.0;
        let stroke = build_stroke(&style);
        assert!(stroke.dash.is_some());
        assert_eq!(stroke.width, 3.0);
    }

    #[test]
    fn empty_segments_build_no_path() {
        assert!(build_path(&[]).is_none());
        assert!(build_path(&[PathSeg::MoveTo(1.0, 1.0)]).is_none());
    }
}
