//! Region extraction: frame + geometry → the crop that gets analyzed.
//!
//! The rectangle path is a plain clipped crop. The polygon path fills a
//! binary mask, blacks out everything outside the outline, and crops to the
//! polygon's bounding box, so the output keeps the bounding-box rectangle
//! shape with non-polygon pixels zeroed. Extraction never fails: anything
//! degenerate produces an empty crop, which downstream code treats as
//! "zero detections".

use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use super::geometry::RegionGeometry;

/// A crop plus its offset in frame coordinates, for translating detection
/// boxes back to the source frame when needed.
#[derive(Debug, Clone)]
pub struct RegionCrop {
    pub image: RgbImage,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl RegionCrop {
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    fn empty() -> Self {
        Self {
            image: RgbImage::new(0, 0),
            offset_x: 0,
            offset_y: 0,
        }
    }
}

pub fn extract_region(frame: &RgbImage, geometry: &RegionGeometry) -> RegionCrop {
    match geometry {
        RegionGeometry::Rectangle { x, y, w, h } => crop_rect(frame, *x, *y, *w, *h),
        RegionGeometry::Polygon(vertices) => crop_polygon(frame, vertices),
    }
}

/// Intersect an (x, y, w, h) rectangle with the frame. `None` means the
/// intersection has no area.
pub(crate) fn clip_rect(
    frame_w: u32,
    frame_h: u32,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
) -> Option<(u32, u32, u32, u32)> {
    if w <= 0 || h <= 0 {
        return None;
    }

    let x0 = x.max(0) as i64;
    let y0 = y.max(0) as i64;
    let x1 = (x as i64 + w as i64).min(frame_w as i64);
    let y1 = (y as i64 + h as i64).min(frame_h as i64);

    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

fn crop_rect(frame: &RgbImage, x: i32, y: i32, w: i32, h: i32) -> RegionCrop {
    let Some((cx, cy, cw, ch)) = clip_rect(frame.width(), frame.height(), x, y, w, h) else {
        return RegionCrop::empty();
    };

    RegionCrop {
        image: image::imageops::crop_imm(frame, cx, cy, cw, ch).to_image(),
        offset_x: cx,
        offset_y: cy,
    }
}

fn crop_polygon(frame: &RgbImage, vertices: &[(i32, i32)]) -> RegionCrop {
    let min_x = vertices.iter().map(|v| v.0).min().unwrap_or(0);
    let min_y = vertices.iter().map(|v| v.1).min().unwrap_or(0);
    let max_x = vertices.iter().map(|v| v.0).max().unwrap_or(0);
    let max_y = vertices.iter().map(|v| v.1).max().unwrap_or(0);

    let Some((bx, by, bw, bh)) = clip_rect(
        frame.width(),
        frame.height(),
        min_x,
        min_y,
        max_x - min_x,
        max_y - min_y,
    ) else {
        return RegionCrop::empty();
    };

    // Fill the outline into a mask local to the bounding box.
    let mut mask = GrayImage::new(bw, bh);
    let mut points: Vec<Point<i32>> = vertices
        .iter()
        .map(|&(x, y)| Point::new(x - bx as i32, y - by as i32))
        .collect();
    // draw_polygon_mut treats the path as implicitly closed and rejects an
    // explicitly repeated endpoint.
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    draw_polygon_mut(&mut mask, &points, Luma([255u8]));

    let mut out = RgbImage::new(bw, bh);
    for y in 0..bh {
        for x in 0..bw {
            if mask.get_pixel(x, y)[0] != 0 {
                *out.get_pixel_mut(x, y) = *frame.get_pixel(bx + x, by + y);
            }
        }
    }

    RegionCrop {
        image: out,
        offset_x: bx,
        offset_y: by,
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn solid_frame(w: u32, h: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([value, value, value]))
    }

    #[test]
    fn rectangle_inside_frame_keeps_exact_dimensions() {
        let frame = solid_frame(200, 200, 50);
        let crop = extract_region(
            &frame,
            &RegionGeometry::Rectangle {
                x: 0,
                y: 0,
                w: 100,
                h: 100,
            },
        );
        assert_eq!(crop.image.dimensions(), (100, 100));
        assert_eq!((crop.offset_x, crop.offset_y), (0, 0));
        assert_eq!(crop.image.get_pixel(99, 99), &Rgb([50, 50, 50]));
    }

    #[test]
    fn rectangle_is_clipped_to_frame_bounds() {
        let frame = solid_frame(100, 100, 50);
        let crop = extract_region(
            &frame,
            &RegionGeometry::Rectangle {
                x: 80,
                y: -10,
                w: 50,
                h: 50,
            },
        );
        assert_eq!(crop.image.dimensions(), (20, 40));
        assert_eq!((crop.offset_x, crop.offset_y), (80, 0));
    }

    #[test]
    fn degenerate_rectangles_produce_empty_regions() {
        let frame = solid_frame(100, 100, 50);
        for geometry in [
            RegionGeometry::Rectangle {
                x: 0,
                y: 0,
                w: 0,
                h: 50,
            },
            RegionGeometry::Rectangle {
                x: 0,
                y: 0,
                w: 50,
                h: 0,
            },
            RegionGeometry::Rectangle {
                x: 200,
                y: 0,
                w: 50,
                h: 50,
            },
            RegionGeometry::Rectangle {
                x: 0,
                y: 0,
                w: -5,
                h: 50,
            },
        ] {
            let crop = extract_region(&frame, &geometry);
            assert!(crop.is_empty(), "expected empty region for {geometry:?}");
        }
    }

    #[test]
    fn triangle_crops_to_bounding_box_and_masks_outside() {
        let frame = solid_frame(100, 100, 7);
        let crop = extract_region(
            &frame,
            &RegionGeometry::Polygon(vec![(0, 0), (50, 0), (25, 50)]),
        );

        assert_eq!(crop.image.dimensions(), (50, 50));
        assert_eq!((crop.offset_x, crop.offset_y), (0, 0));

        // Inside the triangle the frame shows through.
        assert_eq!(crop.image.get_pixel(25, 10), &Rgb([7, 7, 7]));
        // Inside the bounding box but outside the triangle is blacked out.
        assert_eq!(crop.image.get_pixel(49, 49), &Rgb([0, 0, 0]));
        assert_eq!(crop.image.get_pixel(0, 49), &Rgb([0, 0, 0]));
    }

    #[test]
    fn polygon_bounding_box_is_clipped_to_frame() {
        let frame = solid_frame(60, 60, 7);
        let crop = extract_region(
            &frame,
            &RegionGeometry::Polygon(vec![(40, 40), (100, 40), (100, 100), (40, 100)]),
        );
        assert_eq!(crop.image.dimensions(), (20, 20));
        assert_eq!((crop.offset_x, crop.offset_y), (40, 40));
        // The clipped area is fully inside the polygon, so nothing is masked.
        assert_eq!(crop.image.get_pixel(10, 10), &Rgb([7, 7, 7]));
    }

    #[test]
    fn polygon_fully_outside_frame_is_empty() {
        let frame = solid_frame(50, 50, 7);
        let crop = extract_region(
            &frame,
            &RegionGeometry::Polygon(vec![(100, 100), (150, 100), (125, 150)]),
        );
        assert!(crop.is_empty());
    }

    #[test]
    fn closed_polygon_with_repeated_endpoint_is_accepted() {
        let frame = solid_frame(100, 100, 7);
        let crop = extract_region(
            &frame,
            &RegionGeometry::Polygon(vec![(0, 0), (50, 0), (25, 50), (0, 0)]),
        );
        assert_eq!(crop.image.dimensions(), (50, 50));
    }
}
