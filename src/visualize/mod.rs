//! Detection display helpers.
//!
//! - `format`: detector output -> rectangles, score labels and colors
//! - `nms`: greedy overlap suppression, usable as a post-filter
//! - `colors`: display palette and named-color table

pub mod colors;
pub mod format;
pub mod nms;

pub use colors::{color_name_to_rgb, palette_color, rgb_for_name, Rgb, STANDARD_COLORS};
pub use format::{
    draw_boxes_and_labels, group_detections, BoxCoords, DetectionBatch, DisplayGroup,
    DisplayPrimitives, DisplayRect, FormatOptions, InstanceMask, Keypoint,
};
pub use nms::{non_max_suppression, suppressed_indices, SuppressBox};
