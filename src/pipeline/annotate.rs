//! Thumbnail annotation. Strictly presentation: the poller computes every
//! numeric output before any drawing happens.

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::detect::Detection;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Outline each counted person on the region copy that becomes the
/// persisted thumbnail. Two nested rectangles give a 2px border.
pub fn annotate_detections(image: &mut RgbImage, detections: &[Detection]) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }

    for det in detections {
        let x = det.bbox.x.round() as i32;
        let y = det.bbox.y.round() as i32;
        let w = (det.bbox.width.round() as i64).max(1) as u32;
        let h = (det.bbox.height.round() as i64).max(1) as u32;

        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), BOX_COLOR);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(image, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), BOX_COLOR);
        }
    }
}
