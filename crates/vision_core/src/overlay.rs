use image::{Rgba, RgbaImage};

/// Fixed palette cycled per detection index.
pub const PALETTE: [Rgba<u8>; 6] = [
    Rgba([230, 25, 75, 255]),
    Rgba([60, 180, 75, 255]),
    Rgba([0, 130, 200, 255]),
    Rgba([245, 130, 48, 255]),
    Rgba([145, 30, 180, 255]),
    Rgba([70, 240, 240, 255]),
];

pub fn palette_color(index: usize) -> Rgba<u8> {
    PALETTE[index % PALETTE.len()]
}

/// Normalize a box from 0..1 space into pixel coordinates, clamped to image bounds.
pub fn normalize_box(bbox_norm: [f32; 4], dims: (u32, u32)) -> Option<[u32; 4]> {
    let (w, h) = dims;
    if w == 0 || h == 0 || bbox_norm.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let clamp = |v: f32, max: u32| -> u32 { v.max(0.0).min((max - 1) as f32) as u32 };
    let x0 = clamp(bbox_norm[0] * w as f32, w);
    let y0 = clamp(bbox_norm[1] * h as f32, h);
    let x1 = clamp(bbox_norm[2] * w as f32, w);
    let y1 = clamp(bbox_norm[3] * h as f32, h);
    if x0 > x1 || y0 > y1 {
        return None;
    }
    Some([x0, y0, x1, y1])
}

/// Draw a rectangle border with given thickness.
pub fn draw_rect(img: &mut RgbaImage, bbox_px: [u32; 4], color: Rgba<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    for t in 0..thickness {
        let xx0 = x0.saturating_add(t);
        let yy0 = y0.saturating_add(t);
        let xx1 = x1.saturating_sub(t);
        let yy1 = y1.saturating_sub(t);
        if xx0 >= w || yy0 >= h || xx1 >= w || yy1 >= h || xx0 > xx1 || yy0 > yy1 {
            continue;
        }
        for x in xx0..=xx1 {
            img.put_pixel(x, yy0, color);
            img.put_pixel(x, yy1, color);
        }
        for y in yy0..=yy1 {
            img.put_pixel(xx0, y, color);
            img.put_pixel(xx1, y, color);
        }
    }
}

/// Alpha-blend a square mask (row-major `side * side` probabilities) into a pixel box.
///
/// Mask cells are sampled nearest-neighbour; only cells `>= threshold` are painted.
pub fn blend_mask(
    img: &mut RgbaImage,
    bbox_px: [u32; 4],
    mask: &[f32],
    side: usize,
    threshold: f32,
    color: Rgba<u8>,
    alpha: f32,
) {
    if side == 0 || mask.len() != side * side {
        return;
    }
    let (w, h) = img.dimensions();
    let [x0, y0, x1, y1] = bbox_px;
    if x0 > x1 || y0 > y1 || x1 >= w || y1 >= h {
        return;
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let box_w = (x1 - x0 + 1) as usize;
    let box_h = (y1 - y0 + 1) as usize;
    for y in y0..=y1 {
        let my = ((y - y0) as usize * side / box_h).min(side - 1);
        for x in x0..=x1 {
            let mx = ((x - x0) as usize * side / box_w).min(side - 1);
            if mask[my * side + mx] < threshold {
                continue;
            }
            let px = img.get_pixel_mut(x, y);
            for c in 0..3 {
                let mixed = px.0[c] as f32 * (1.0 - alpha) + color.0[c] as f32 * alpha;
                px.0[c] = mixed.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
