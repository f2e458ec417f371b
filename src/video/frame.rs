//! Raw RGBA frame buffer

use bytes::Bytes;
use std::time::Duration;

/// 8-bit RGBA color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const BLACK: Rgba = Rgba([0, 0, 0, 0xFF]);
    pub const WHITE: Rgba = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);
    pub const LIGHT: Rgba = Rgba([0xE8, 0xE6, 0xE2, 0xFF]);
    pub const ORANGE: Rgba = Rgba([0xFF, 0x64, 0x27, 0xFF]);
}

/// Owned, tightly packed RGBA8 image
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Color of a pixel, `None` when out of bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.data[offset..offset + 4]);
        Some(Rgba(px))
    }

    /// Paint the whole frame
    pub fn fill(&mut self, color: Rgba) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color.0);
        }
    }

    /// Paint `[x0, x1) x [y0, y1)`, clipped to the frame
    pub fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba) {
        let x0 = x0.clamp(0, self.width as i64) as usize;
        let x1 = x1.clamp(0, self.width as i64) as usize;
        let y0 = y0.clamp(0, self.height as i64) as usize;
        let y1 = y1.clamp(0, self.height as i64) as usize;
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let stride = self.width as usize * 4;
        for y in y0..y1 {
            let row = &mut self.data[y * stride + x0 * 4..y * stride + x1 * 4];
            for px in row.chunks_exact_mut(4) {
                px.copy_from_slice(&color.0);
            }
        }
    }

    /// Blend `color` over a pixel with the given coverage (0.0..=1.0)
    pub fn blend_pixel(&mut self, x: i64, y: i64, color: Rgba, coverage: f32) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let coverage = coverage.clamp(0.0, 1.0);
        if coverage == 0.0 {
            return;
        }

        let offset = self.offset(x as u32, y as u32);
        for c in 0..3 {
            let dst = self.data[offset + c] as f32;
            let src = color.0[c] as f32;
            self.data[offset + c] = (dst + (src - dst) * coverage).round() as u8;
        }
        self.data[offset + 3] = 0xFF;
    }

    /// Copy the frame into a packed RGB24 buffer, reusing `out`
    pub fn write_rgb(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(4) {
            out.extend_from_slice(&px[..3]);
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

/// One encoded video frame ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFramePacket {
    /// H.264 Annex B bitstream
    pub data: Bytes,
    /// Index of the tick that produced this frame
    pub presentation_index: u32,
    /// Nominal frame duration
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_rect_is_clipped() {
        let mut frame = RgbaFrame::new(8, 4);
        frame.fill(Rgba::WHITE);
        frame.fill_rect(6, -2, 20, 2, Rgba::ORANGE);

        assert_eq!(frame.pixel(5, 0), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(6, 0), Some(Rgba::ORANGE));
        assert_eq!(frame.pixel(7, 1), Some(Rgba::ORANGE));
        assert_eq!(frame.pixel(7, 2), Some(Rgba::WHITE));
        assert_eq!(frame.pixel(8, 0), None);
    }

    #[test]
    fn test_blend_pixel() {
        let mut frame = RgbaFrame::new(2, 2);
        frame.fill(Rgba::WHITE);
        frame.blend_pixel(0, 0, Rgba::BLACK, 1.0);
        frame.blend_pixel(1, 0, Rgba::BLACK, 0.5);
        frame.blend_pixel(-1, 0, Rgba::BLACK, 1.0);

        assert_eq!(frame.pixel(0, 0), Some(Rgba::BLACK));
        assert_eq!(frame.pixel(1, 0), Some(Rgba([128, 128, 128, 0xFF])));
    }

    #[test]
    fn test_write_rgb_drops_alpha() {
        let mut frame = RgbaFrame::new(2, 1);
        frame.fill(Rgba([1, 2, 3, 4]));
        let mut rgb = Vec::new();
        frame.write_rgb(&mut rgb);
        assert_eq!(rgb, vec![1, 2, 3, 1, 2, 3]);
    }
}
