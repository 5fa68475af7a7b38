//! vision_core: overlay helpers for visualizing detections.

pub mod overlay;

pub mod prelude {
    pub use crate::overlay::*;
}
