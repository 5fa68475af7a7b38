//! Instance decoding from segmentation masks.
//!
//! Grey masks (8 or 16 bit) carry the instance id in each pixel. Colour masks, which
//! includes PNG palettes once the decoder expands them, key instances by packed RGB.
//! Key 0 is background either way.

use crate::types::InstanceMask;
use image::{DynamicImage, RgbImage};
use std::collections::BTreeMap;

const BACKGROUND_KEY: u32 = 0;

fn pack(p: &image::Rgb<u8>) -> u32 {
    ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32
}

/// Row-major per-pixel instance keys of one mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceKeys {
    pub width: u32,
    pub height: u32,
    pub keys: Vec<u32>,
}

impl From<&DynamicImage> for InstanceKeys {
    fn from(mask: &DynamicImage) -> Self {
        let (width, height) = (mask.width(), mask.height());
        let keys = match mask {
            DynamicImage::ImageLuma8(m) => m.pixels().map(|p| p[0] as u32).collect(),
            DynamicImage::ImageLumaA8(m) => m.pixels().map(|p| p[0] as u32).collect(),
            DynamicImage::ImageLuma16(m) => m.pixels().map(|p| p[0] as u32).collect(),
            DynamicImage::ImageLumaA16(m) => m.pixels().map(|p| p[0] as u32).collect(),
            other => other.to_rgb8().pixels().map(pack).collect(),
        };
        Self {
            width,
            height,
            keys,
        }
    }
}

impl From<&RgbImage> for InstanceKeys {
    fn from(mask: &RgbImage) -> Self {
        Self {
            width: mask.width(),
            height: mask.height(),
            keys: mask.pixels().map(pack).collect(),
        }
    }
}

/// Split a mask into per-instance bitmaps and tight boxes, in ascending key order.
///
/// Instances whose box has zero width or height (single row/column) are dropped.
pub fn decode_instances(mask: impl Into<InstanceKeys>) -> Vec<InstanceMask> {
    let InstanceKeys {
        width,
        height,
        keys,
    } = mask.into();
    let mut bounds: BTreeMap<u32, ([u32; 4], u32)> = BTreeMap::new();
    for (i, key) in keys.iter().copied().enumerate() {
        if key == BACKGROUND_KEY || width == 0 {
            continue;
        }
        let (x, y) = (i as u32 % width, i as u32 / width);
        let entry = bounds.entry(key).or_insert(([x, y, x, y], 0));
        let b = &mut entry.0;
        b[0] = b[0].min(x);
        b[1] = b[1].min(y);
        b[2] = b[2].max(x);
        b[3] = b[3].max(y);
        entry.1 += 1;
    }

    let mut out = Vec::with_capacity(bounds.len());
    for (key, (bbox_px, area)) in bounds {
        if bbox_px[0] == bbox_px[2] || bbox_px[1] == bbox_px[3] {
            tracing::debug!(key, ?bbox_px, "dropping degenerate instance");
            continue;
        }
        let bitmap = keys.iter().map(|k| *k == key).collect::<Vec<_>>();
        debug_assert_eq!(bitmap.len(), (width * height) as usize);
        out.push(InstanceMask {
            key,
            bbox_px,
            area,
            bitmap,
        });
    }
    out
}

/// Nearest-sample the instance bitmap inside its box into a `size x size` crop.
pub fn crop_mask(instance: &InstanceMask, width: u32, size: usize) -> Vec<f32> {
    let size = size.max(1);
    let [x0, y0, x1, y1] = instance.bbox_px;
    let box_w = (x1 - x0 + 1) as f32;
    let box_h = (y1 - y0 + 1) as f32;
    let mut crop = vec![0.0f32; size * size];
    for my in 0..size {
        let sy = y0 + (((my as f32 + 0.5) * box_h / size as f32) as u32).min(y1 - y0);
        for mx in 0..size {
            let sx = x0 + (((mx as f32 + 0.5) * box_w / size as f32) as u32).min(x1 - x0);
            let idx = (sy * width + sx) as usize;
            if instance.bitmap.get(idx).copied().unwrap_or(false) {
                crop[my * size + mx] = 1.0;
            }
        }
    }
    crop
}
