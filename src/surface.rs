use std::sync::OnceLock;

use tiny_skia::{IntSize, Pixmap};

use crate::error::RenderError;

/// Premultiplied RGBA8 pixel buffer, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PixelSurface {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Pixel bounds as half-open `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelRect {
    pub fn width(&self) -> i64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i64 {
        self.y1 - self.y0
    }
}

impl PixelSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        let width = pixmap.width();
        let height = pixmap.height();
        Self {
            width,
            height,
            data: pixmap.take(),
        }
    }

    pub fn into_pixmap(self) -> Result<Pixmap, RenderError> {
        let size = IntSize::from_wh(self.width, self.height).ok_or_else(|| {
            RenderError::RenderFailed(format!(
                "Failed to allocate {}x{} surface",
                self.width, self.height
            ))
        })?;
        Pixmap::from_vec(self.data, size).ok_or_else(|| {
            RenderError::RenderFailed("pixel buffer does not match surface size".to_string())
        })
    }

    pub fn same_size(&self) -> Self {
        Self::new(self.width, self.height)
    }

    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn get(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.index(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Transparent outside the surface.
    pub fn get_signed(&self, x: i64, y: i64) -> [u8; 4] {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return [0; 4];
        }
        self.get(x as u32, y as u32)
    }

    /// Clamped to the nearest edge pixel.
    pub fn get_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let x = x.clamp(0, self.width as i64 - 1);
        let y = y.clamp(0, self.height as i64 - 1);
        self.get(x as u32, y as u32)
    }

    pub fn set(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let i = self.index(x, y);
        self.data[i..i + 4].copy_from_slice(&px);
    }

    pub fn pixels(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
        self.data
            .chunks_exact(4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }

    /// Bounds of all pixels with non-zero alpha.
    pub fn opaque_bounds(&self) -> Option<PixelRect> {
        let mut x0 = i64::MAX;
        let mut y0 = i64::MAX;
        let mut x1 = i64::MIN;
        let mut y1 = i64::MIN;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.data[self.index(x, y) + 3] == 0 {
                    continue;
                }
                x0 = x0.min(x as i64);
                y0 = y0.min(y as i64);
                x1 = x1.max(x as i64 + 1);
                y1 = y1.max(y as i64 + 1);
            }
        }
        (x0 < x1 && y0 < y1).then_some(PixelRect { x0, y0, x1, y1 })
    }

    pub fn full_rect(&self) -> PixelRect {
        PixelRect {
            x0: 0,
            y0: 0,
            x1: self.width as i64,
            y1: self.height as i64,
        }
    }

    /// Straight-alpha RGBA8, as handed to callers.
    pub fn to_straight_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            let a = px[3];
            if a == 0 {
                out.extend_from_slice(&[0, 0, 0, 0]);
                continue;
            }
            for c in &px[..3] {
                let v = (*c as u32 * 255 + a as u32 / 2) / a as u32;
                out.push(v.min(255) as u8);
            }
            out.push(a);
        }
        out
    }
}

pub(crate) fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn srgb_to_linear_table() -> &'static [f32; 256] {
    static TABLE: OnceLock<[f32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0.0f32; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = srgb_to_linear(i as f32 / 255.0);
        }
        table
    })
}

pub(crate) fn srgb_to_linear(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.04045 {
        c / 12.92
    } else {
        libm::powf((c + 0.055) / 1.055, 2.4)
    }
}

pub(crate) fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * libm::powf(c, 1.0 / 2.4) - 0.055
    }
}

/// Premultiplied sRGB bytes → straight linear-light `[r, g, b, a]` in 0..=1.
pub(crate) fn to_linear_straight(px: [u8; 4]) -> [f32; 4] {
    let a = px[3];
    if a == 0 {
        return [0.0; 4];
    }
    let table = srgb_to_linear_table();
    let mut out = [0.0f32; 4];
    for i in 0..3 {
        let straight = ((px[i] as u32 * 255 + a as u32 / 2) / a as u32).min(255) as usize;
        out[i] = table[straight];
    }
    out[3] = a as f32 / 255.0;
    out
}

/// Straight linear-light `[r, g, b, a]` → premultiplied sRGB bytes.
pub(crate) fn from_linear_straight(v: [f32; 4]) -> [u8; 4] {
    let a = v[3].clamp(0.0, 1.0);
    if a <= 0.0 {
        return [0; 4];
    }
    [
        to_u8(linear_to_srgb(v[0]) * a),
        to_u8(linear_to_srgb(v[1]) * a),
        to_u8(linear_to_srgb(v[2]) * a),
        to_u8(a),
    ]
}

/// Premultiplied bytes → premultiplied floats in 0..=1.
pub(crate) fn to_unit(px: [u8; 4]) -> [f32; 4] {
    [
        px[0] as f32 / 255.0,
        px[1] as f32 / 255.0,
        px[2] as f32 / 255.0,
        px[3] as f32 / 255.0,
    ]
}

/// Premultiplied floats → bytes; color channels never exceed alpha.
pub(crate) fn from_unit(v: [f32; 4]) -> [u8; 4] {
    let a = v[3].clamp(0.0, 1.0);
    [
        to_u8(v[0].min(a)),
        to_u8(v[1].min(a)),
        to_u8(v[2].min(a)),
        to_u8(a),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_functions_round_trip() {
        for i in [0u8, 1, 10, 64, 128, 200, 255] {
            let c = i as f32 / 255.0;
            let back = linear_to_srgb(srgb_to_linear(c));
            assert!((back - c).abs() < 1e-4, "{i}");
        }
    }

    #[test]
    fn straight_linear_round_trip_keeps_opaque_pixels() {
        for px in [[255, 0, 0, 255], [12, 200, 99, 255], [0, 0, 0, 255]] {
            assert_eq!(from_linear_straight(to_linear_straight(px)), px);
        }
        assert_eq!(to_linear_straight([9, 9, 9, 0]), [0.0; 4]);
    }

    #[test]
    fn unpremultiplies_for_output() {
        let surface = PixelSurface {
            width: 2,
            height: 1,
            data: vec![128, 0, 0, 128, 0, 0, 0, 0],
        };
        assert_eq!(surface.to_straight_rgba(), vec![255, 0, 0, 128, 0, 0, 0, 0]);
    }

    #[test]
    fn opaque_bounds_cover_visible_pixels() {
        let mut surface = PixelSurface::new(5, 4);
        assert!(surface.opaque_bounds().is_none());
        surface.set(1, 2, [0, 0, 0, 10]);
        surface.set(3, 1, [0, 0, 0, 255]);
        assert_eq!(
            surface.opaque_bounds(),
            Some(PixelRect {
                x0: 1,
                y0: 1,
                x1: 4,
                y1: 3
            })
        );
    }

    #[test]
    fn edge_sampling_modes() {
        let mut surface = PixelSurface::new(2, 2);
        surface.set(1, 1, [1, 2, 3, 4]);
        assert_eq!(surface.get_signed(5, 5), [0; 4]);
        assert_eq!(surface.get_clamped(5, 5), [1, 2, 3, 4]);
    }
}
