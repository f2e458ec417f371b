//! Synthetic scene drawing

use ab_glyph::{point, Font, PxScale, ScaleFont};
use std::sync::Arc;

use super::frame::{Rgba, RgbaFrame};
use crate::config::VideoConfig;
use crate::resources::MediaResourceCatalog;

/// Paints the content of a video frame for a given tick
pub trait FrameDrawer: Send + Sync {
    fn draw(&self, frame: &mut RgbaFrame, index: u32);
}

/// Width of the moving box
const BOX_WIDTH: i64 = 100;
/// Margin kept free on both sides of the box track
const BOX_MARGIN: i64 = 100;
const BOX_TOP: i64 = 110;
const BOX_BOTTOM: i64 = 150;

/// Text drawn on top of the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub x: f32,
    pub baseline: f32,
    pub text: String,
    pub color: Rgba,
}

/// Light background, an orange box sliding left to right and text labels
pub struct SceneDrawer {
    catalog: Arc<MediaResourceCatalog>,
    caption: String,
    code_line: String,
    scale: PxScale,
}

impl SceneDrawer {
    pub fn new(catalog: Arc<MediaResourceCatalog>, config: &VideoConfig) -> Self {
        Self {
            catalog,
            caption: config.caption.clone(),
            code_line: config.code_line.clone(),
            scale: PxScale::from(config.label_px),
        }
    }

    /// Horizontal position of the box for tick `index`
    pub fn box_x(width: u32, index: u32) -> i64 {
        let track = (width as i64 - 2 * BOX_MARGIN).max(1);
        (2 * index as i64) % track + BOX_MARGIN
    }

    /// Labels for tick `index` with the box at `box_x`
    pub fn labels(&self, box_x: i64, index: u32) -> Vec<Label> {
        let mut labels = vec![
            Label {
                x: box_x as f32,
                baseline: 100.0,
                text: self.caption.clone(),
                color: Rgba::ORANGE,
            },
            Label {
                x: 200.0,
                baseline: 200.0,
                text: format!("Frame number {}", index),
                color: Rgba::ORANGE,
            },
        ];
        if !self.code_line.is_empty() {
            labels.push(Label {
                x: 200.0,
                baseline: 300.0,
                text: self.code_line.clone(),
                color: Rgba::BLACK,
            });
        }
        labels
    }

    fn draw_label(&self, frame: &mut RgbaFrame, label: &Label) {
        let Some(font) = self.catalog.font() else {
            return;
        };
        let scaled = font.as_scaled(self.scale);
        let color = label.color;

        let mut caret = point(label.x, label.baseline);
        let mut previous = None;
        for c in label.text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                caret.x += scaled.kern(prev, id);
            }
            previous = Some(id);

            let glyph = id.with_scale_and_position(self.scale, caret);
            caret.x += scaled.h_advance(id);

            if let Some(outlined) = font.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    frame.blend_pixel(
                        bounds.min.x as i64 + gx as i64,
                        bounds.min.y as i64 + gy as i64,
                        color,
                        coverage,
                    );
                });
            }
        }
    }
}

impl FrameDrawer for SceneDrawer {
    fn draw(&self, frame: &mut RgbaFrame, index: u32) {
        let x = Self::box_x(frame.width(), index);

        frame.fill(Rgba::LIGHT);
        frame.fill_rect(x, BOX_TOP, x + BOX_WIDTH, BOX_BOTTOM, Rgba::ORANGE);

        if self.catalog.font().is_none() {
            return;
        }
        for label in self.labels(x, index) {
            self.draw_label(frame, &label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::AudioClip;

    fn drawer_with(config: &VideoConfig) -> SceneDrawer {
        let catalog = MediaResourceCatalog::from_parts(
            AudioClip::default(),
            AudioClip::default(),
            AudioClip::default(),
            None,
        );
        SceneDrawer::new(Arc::new(catalog), config)
    }

    fn drawer() -> SceneDrawer {
        drawer_with(&VideoConfig::default())
    }

    #[test]
    fn test_scene_labels() {
        let labels = drawer().labels(120, 7);
        assert_eq!(labels.len(), 3);
        assert_eq!((labels[0].x, labels[0].baseline), (120.0, 100.0));
        assert_eq!(labels[0].text, "Thanks for calling!");
        assert_eq!(labels[1].text, "Frame number 7");
        assert_eq!(labels[1].color, Rgba::ORANGE);
        assert_eq!((labels[2].x, labels[2].baseline), (200.0, 300.0));
        assert_eq!(labels[2].color, Rgba::BLACK);
        assert!(labels[2].text.starts_with("public void JetBrainsMonoSpace"));
    }

    #[test]
    fn test_empty_code_line_is_omitted() {
        let config = VideoConfig {
            code_line: String::new(),
            ..Default::default()
        };
        let labels = drawer_with(&config).labels(100, 0);
        assert_eq!(labels.len(), 2);
        assert!(labels.iter().all(|l| l.color == Rgba::ORANGE));
    }

    #[test]
    fn test_box_position_wraps() {
        assert_eq!(SceneDrawer::box_x(1280, 0), 100);
        assert_eq!(SceneDrawer::box_x(1280, 10), 120);
        // track is 1080 pixels wide
        assert_eq!(SceneDrawer::box_x(1280, 540), 100);
    }

    #[test]
    fn test_draw_without_font_paints_box() {
        let mut frame = RgbaFrame::new(400, 200);
        drawer().draw(&mut frame, 0);

        assert_eq!(frame.pixel(0, 0), Some(Rgba::LIGHT));
        assert_eq!(frame.pixel(100, 110), Some(Rgba::ORANGE));
        assert_eq!(frame.pixel(199, 149), Some(Rgba::ORANGE));
        assert_eq!(frame.pixel(200, 110), Some(Rgba::LIGHT));
        assert_eq!(frame.pixel(150, 150), Some(Rgba::LIGHT));
    }

    #[test]
    fn test_box_moves_between_ticks() {
        let drawer = drawer();
        let mut frame = RgbaFrame::new(400, 200);
        drawer.draw(&mut frame, 5);
        assert_eq!(frame.pixel(109, 120), Some(Rgba::LIGHT));
        assert_eq!(frame.pixel(110, 120), Some(Rgba::ORANGE));
    }
}
