use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label id reserved for background; foreground classes start at 1.
pub const BACKGROUND_LABEL: u32 = 0;

/// Per-image instance annotations derived from a segmentation mask.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceTarget {
    pub image_id: u64,
    /// Boxes in pixel space: [x_min, y_min, x_max, y_max].
    pub boxes_px: Vec<[f32; 4]>,
    pub labels: Vec<u32>,
    pub areas: Vec<f32>,
    pub iscrowd: Vec<bool>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("box {index} invalid order, non-finite, or outside image: {bbox:?}")]
    InvalidBox { index: usize, bbox: [f32; 4] },
    #[error("target field lengths differ: boxes={boxes} labels={labels} areas={areas} iscrowd={iscrowd}")]
    LengthMismatch {
        boxes: usize,
        labels: usize,
        areas: usize,
        iscrowd: usize,
    },
    #[error("instance {0} uses the background label")]
    BackgroundLabel(usize),
    #[error("image has zero width or height")]
    EmptyImage,
}

impl InstanceTarget {
    pub fn len(&self) -> usize {
        self.boxes_px.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes_px.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.width == 0 || self.height == 0 {
            return Err(ValidationError::EmptyImage);
        }
        let n = self.boxes_px.len();
        if self.labels.len() != n || self.areas.len() != n || self.iscrowd.len() != n {
            return Err(ValidationError::LengthMismatch {
                boxes: n,
                labels: self.labels.len(),
                areas: self.areas.len(),
                iscrowd: self.iscrowd.len(),
            });
        }
        let (w, h) = (self.width as f32, self.height as f32);
        for (index, b) in self.boxes_px.iter().enumerate() {
            let finite = b.iter().all(|v| v.is_finite());
            let ordered = b[0] < b[2] && b[1] < b[3];
            let inside = b[0] >= 0.0 && b[1] >= 0.0 && b[2] <= w && b[3] <= h;
            if !finite || !ordered || !inside {
                return Err(ValidationError::InvalidBox { index, bbox: *b });
            }
        }
        if let Some(index) = self.labels.iter().position(|l| *l == BACKGROUND_LABEL) {
            return Err(ValidationError::BackgroundLabel(index));
        }
        Ok(())
    }

    /// Boxes scaled into 0..1 by the image dimensions.
    pub fn normalized_boxes(&self) -> Vec<[f32; 4]> {
        let (w, h) = (self.width.max(1) as f32, self.height.max(1) as f32);
        self.boxes_px
            .iter()
            .map(|b| [b[0] / w, b[1] / h, b[2] / w, b[3] / h])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(boxes: Vec<[f32; 4]>) -> InstanceTarget {
        let n = boxes.len();
        InstanceTarget {
            image_id: 3,
            boxes_px: boxes,
            labels: vec![1; n],
            areas: vec![1.0; n],
            iscrowd: vec![false; n],
            width: 100,
            height: 50,
        }
    }

    #[test]
    fn normalizes_by_image_size() {
        let t = target(vec![[10.0, 5.0, 50.0, 25.0]]);
        assert_eq!(t.normalized_boxes(), vec![[0.1, 0.1, 0.5, 0.5]]);
    }

    #[test]
    fn rejects_box_outside_image() {
        let t = target(vec![[10.0, 5.0, 120.0, 25.0]]);
        assert!(matches!(
            t.validate(),
            Err(ValidationError::InvalidBox { index: 0, .. })
        ));
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut t = target(vec![[10.0, 5.0, 20.0, 25.0]]);
        t.labels.push(1);
        assert!(matches!(
            t.validate(),
            Err(ValidationError::LengthMismatch { .. })
        ));
    }
}
