//! Detection formatting.
//!
//! Turns raw detector output (boxes, class ids, scores) into display
//! primitives: one rectangle per distinct box, the percentage scores of every
//! detection that landed on that box, and the box's RGB color.
//!
//! Selection rules:
//! - Only the first `max_boxes_to_draw` detections are considered, in input
//!   order. There is no sort by confidence, so a confident detection late in
//!   the input can be cut.
//! - A detection is admitted when scores are absent (ground truth) or its
//!   score is strictly greater than `min_score_thresh`.
//! - Detections with bit-identical coordinates share one group. A box with a
//!   NaN coordinate equals no other box and always forms its own group.
//!
//! Coloring: ground truth is "black", class-agnostic mode is "DarkOrange",
//! otherwise `STANDARD_COLORS[class mod len]`. Within a group the last
//! admitted detection decides the color.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;

use super::colors::{palette_color, rgb_for_name, Rgb, AGNOSTIC_COLOR, GROUNDTRUTH_COLOR};
use super::nms::{suppressed_indices, SuppressBox};

/// Box corners as `[ymin, xmin, ymax, xmax]`, normalized or in pixels.
pub type BoxCoords = [f32; 4];

/// `[y, x]` keypoint, same units as the boxes.
pub type Keypoint = [f32; 2];

/// Per-detection instance mask, `height * width` values row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceMask {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Raw detector output for one frame. All present collections are parallel.
#[derive(Clone, Debug, Default)]
pub struct DetectionBatch {
    pub boxes: Vec<BoxCoords>,
    pub classes: Vec<i64>,
    /// `None` marks ground-truth boxes.
    pub scores: Option<Vec<f32>>,
    pub masks: Option<Vec<InstanceMask>>,
    pub keypoints: Option<Vec<Vec<Keypoint>>>,
}

impl DetectionBatch {
    pub fn new(boxes: Vec<BoxCoords>, classes: Vec<i64>, scores: Option<Vec<f32>>) -> Self {
        Self {
            boxes,
            classes,
            scores,
            masks: None,
            keypoints: None,
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    fn validate(&self) -> Result<()> {
        let n = self.boxes.len();
        check_len("classes", self.classes.len(), n)?;
        if let Some(scores) = &self.scores {
            check_len("scores", scores.len(), n)?;
        }
        if let Some(masks) = &self.masks {
            check_len("masks", masks.len(), n)?;
        }
        if let Some(keypoints) = &self.keypoints {
            check_len("keypoints", keypoints.len(), n)?;
        }
        Ok(())
    }
}

fn check_len(name: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(anyhow!(
            "detection batch has {} {} for {} boxes",
            got,
            name,
            expected
        ));
    }
    Ok(())
}

/// Formatter knobs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormatOptions {
    /// Number of leading detections to consider. `None` or `Some(0)` means all.
    pub max_boxes_to_draw: Option<usize>,
    pub min_score_thresh: f32,
    /// Show scores but ignore classes when coloring.
    pub agnostic_mode: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_boxes_to_draw: None,
            min_score_thresh: 0.5,
            agnostic_mode: false,
        }
    }
}

/// Rectangle to draw.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DisplayRect {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl From<BoxCoords> for DisplayRect {
    fn from([ymin, xmin, ymax, xmax]: BoxCoords) -> Self {
        Self {
            ymin,
            xmin,
            ymax,
            xmax,
        }
    }
}

/// Detections collapsed onto one box.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayGroup {
    pub rect: DisplayRect,
    /// Score percentages (`trunc(100 * score)`), in admission order. Empty for
    /// ground truth.
    pub scores: Vec<u32>,
    pub color_name: &'static str,
    pub color: Rgb,
    pub mask: Option<InstanceMask>,
    pub keypoints: Vec<Keypoint>,
}

/// Index-aligned drawing lists, one entry per distinct box.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DisplayPrimitives {
    pub rects: Vec<DisplayRect>,
    pub scores: Vec<Vec<u32>>,
    pub colors: Vec<Rgb>,
}

impl DisplayPrimitives {
    pub fn len(&self) -> usize {
        self.rects.len()
    }

    /// Drop entries whose rectangle is suppressed by an overlapping one.
    ///
    /// Rectangles are scaled by the frame size (`x` by `width`, `y` by
    /// `height`) before suppression, so normalized and pixel coordinates both
    /// work; pass `1` for coordinates already in pixels. Surviving entries
    /// keep their original order.
    pub fn suppress_overlaps(&self, width: u32, height: u32, overlap_thresh: f64) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let boxes: Vec<SuppressBox> = self
            .rects
            .iter()
            .map(|r| {
                [
                    f64::from(r.xmin) * w,
                    f64::from(r.ymin) * h,
                    f64::from(r.xmax) * w,
                    f64::from(r.ymax) * h,
                ]
            })
            .collect();
        let mut kept = suppressed_indices(&boxes, overlap_thresh);
        kept.sort_unstable();

        let mut out = DisplayPrimitives::default();
        for i in kept {
            out.rects.push(self.rects[i]);
            out.scores.push(self.scores[i].clone());
            out.colors.push(self.colors[i]);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }
}

impl From<Vec<DisplayGroup>> for DisplayPrimitives {
    fn from(groups: Vec<DisplayGroup>) -> Self {
        let mut out = DisplayPrimitives::default();
        for group in groups {
            out.rects.push(group.rect);
            out.scores.push(group.scores);
            out.colors.push(group.color);
        }
        out
    }
}

/// Grouping key: exact coordinate bits, with -0.0 folded into 0.0.
fn box_key(coords: &BoxCoords) -> [u32; 4] {
    coords.map(|v| (v + 0.0).to_bits())
}

struct GroupAcc {
    coords: BoxCoords,
    scores: Vec<u32>,
    color_name: &'static str,
    mask: Option<InstanceMask>,
    keypoints: Vec<Keypoint>,
}

impl GroupAcc {
    fn new(coords: BoxCoords) -> Self {
        Self {
            coords,
            scores: Vec::new(),
            color_name: GROUNDTRUTH_COLOR,
            mask: None,
            keypoints: Vec::new(),
        }
    }
}

/// Group admitted detections by box and resolve their colors.
///
/// Groups come out in order of first admission.
pub fn group_detections(batch: &DetectionBatch, opts: &FormatOptions) -> Result<Vec<DisplayGroup>> {
    batch.validate()?;

    let limit = match opts.max_boxes_to_draw {
        Some(max) if max > 0 => max.min(batch.len()),
        _ => batch.len(),
    };

    let mut index: HashMap<[u32; 4], usize> = HashMap::new();
    let mut groups: Vec<GroupAcc> = Vec::new();

    for i in 0..limit {
        let score = batch.scores.as_ref().map(|scores| scores[i]);
        if let Some(score) = score {
            if score <= opts.min_score_thresh || score.is_nan() {
                continue;
            }
        }

        let coords = batch.boxes[i];
        let slot = if coords.iter().any(|v| v.is_nan()) {
            // NaN never equals itself, so such a box always opens a new group.
            groups.push(GroupAcc::new(coords));
            groups.len() - 1
        } else {
            *index.entry(box_key(&coords)).or_insert_with(|| {
                groups.push(GroupAcc::new(coords));
                groups.len() - 1
            })
        };
        let group = &mut groups[slot];

        if let Some(masks) = &batch.masks {
            group.mask = Some(masks[i].clone());
        }
        if let Some(keypoints) = &batch.keypoints {
            group.keypoints.extend_from_slice(&keypoints[i]);
        }
        group.color_name = match score {
            None => GROUNDTRUTH_COLOR,
            Some(score) => {
                group.scores.push(score_percent(score));
                if opts.agnostic_mode {
                    AGNOSTIC_COLOR
                } else {
                    palette_color(batch.classes[i])
                }
            }
        };
    }

    groups
        .into_iter()
        .map(|group| {
            Ok(DisplayGroup {
                rect: group.coords.into(),
                scores: group.scores,
                color: rgb_for_name(group.color_name)?,
                color_name: group.color_name,
                mask: group.mask,
                keypoints: group.keypoints,
            })
        })
        .collect()
}

/// Rectangles, score lists and colors for every distinct admitted box.
pub fn draw_boxes_and_labels(batch: &DetectionBatch, opts: &FormatOptions) -> Result<DisplayPrimitives> {
    Ok(group_detections(batch, opts)?.into())
}

fn score_percent(score: f32) -> u32 {
    (100.0 * score).trunc() as u32
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visualize::colors::STANDARD_COLORS;

    fn sample_batch() -> DetectionBatch {
        DetectionBatch::new(
            vec![
                [0.1, 0.1, 0.4, 0.4],
                [0.5, 0.5, 0.9, 0.9],
                [0.1, 0.1, 0.4, 0.4],
                [0.2, 0.2, 0.3, 0.3],
            ],
            vec![1, 2, 3, 4],
            Some(vec![0.9, 0.75, 0.6, 0.2]),
        )
    }

    #[test]
    fn empty_input_gives_empty_output() -> Result<()> {
        let out = draw_boxes_and_labels(&DetectionBatch::default(), &FormatOptions::default())?;
        assert!(out.is_empty());
        assert!(out.scores.is_empty());
        assert!(out.colors.is_empty());
        Ok(())
    }

    #[test]
    fn groups_identical_boxes_and_drops_low_scores() -> Result<()> {
        let groups = group_detections(&sample_batch(), &FormatOptions::default())?;
        assert_eq!(groups.len(), 2);

        assert_eq!(groups[0].rect, DisplayRect::from([0.1, 0.1, 0.4, 0.4]));
        assert_eq!(groups[0].scores, vec![90, 60]);
        // Last admitted detection on the box decides the color.
        assert_eq!(groups[0].color_name, STANDARD_COLORS[3]);

        assert_eq!(groups[1].scores, vec![75]);
        assert_eq!(groups[1].color_name, STANDARD_COLORS[2]);
        assert_eq!(groups[1].color, rgb_for_name(STANDARD_COLORS[2])?);
        Ok(())
    }

    #[test]
    fn threshold_is_strict() -> Result<()> {
        let batch = DetectionBatch::new(
            vec![[0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 0.5, 0.5]],
            vec![1, 1],
            Some(vec![0.5, 0.5 + f32::EPSILON]),
        );
        let groups = group_detections(&batch, &FormatOptions::default())?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].rect, DisplayRect::from([0.0, 0.0, 0.5, 0.5]));
        Ok(())
    }

    #[test]
    fn truncation_follows_input_order() -> Result<()> {
        let opts = FormatOptions {
            max_boxes_to_draw: Some(2),
            ..FormatOptions::default()
        };
        let batch = DetectionBatch::new(
            vec![
                [0.0, 0.0, 0.1, 0.1],
                [0.0, 0.0, 0.2, 0.2],
                [0.0, 0.0, 0.3, 0.3],
            ],
            vec![1, 1, 1],
            Some(vec![0.6, 0.7, 0.99]),
        );
        let groups = group_detections(&batch, &opts)?;
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.scores != vec![99]));
        Ok(())
    }

    #[test]
    fn zero_max_boxes_means_all() -> Result<()> {
        let opts = FormatOptions {
            max_boxes_to_draw: Some(0),
            ..FormatOptions::default()
        };
        assert_eq!(group_detections(&sample_batch(), &opts)?.len(), 2);
        Ok(())
    }

    #[test]
    fn ground_truth_is_black_without_scores() -> Result<()> {
        let batch = DetectionBatch::new(
            vec![[0.1, 0.1, 0.2, 0.2], [0.3, 0.3, 0.4, 0.4]],
            vec![5, 17],
            None,
        );
        let out = draw_boxes_and_labels(&batch, &FormatOptions::default())?;
        assert_eq!(out.len(), 2);
        assert!(out.colors.iter().all(|&c| c == Rgb::new(0, 0, 0)));
        assert!(out.scores.iter().all(|s| s.is_empty()));
        Ok(())
    }

    #[test]
    fn agnostic_mode_uses_dark_orange() -> Result<()> {
        let opts = FormatOptions {
            agnostic_mode: true,
            ..FormatOptions::default()
        };
        let out = draw_boxes_and_labels(&sample_batch(), &opts)?;
        assert_eq!(out.len(), 2);
        assert!(out.colors.iter().all(|&c| c == Rgb::new(255, 140, 0)));
        Ok(())
    }

    #[test]
    fn masks_overwrite_and_keypoints_accumulate() -> Result<()> {
        let mask = |v: u8| InstanceMask {
            width: 2,
            height: 1,
            data: vec![v, v],
        };
        let mut batch = DetectionBatch::new(
            vec![[0.1, 0.1, 0.4, 0.4], [0.1, 0.1, 0.4, 0.4]],
            vec![1, 1],
            Some(vec![0.8, 0.9]),
        );
        batch.masks = Some(vec![mask(1), mask(2)]);
        batch.keypoints = Some(vec![vec![[0.2, 0.2]], vec![[0.3, 0.3], [0.35, 0.35]]]);

        let groups = group_detections(&batch, &FormatOptions::default())?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mask, Some(mask(2)));
        assert_eq!(groups[0].keypoints.len(), 3);
        assert_eq!(groups[0].scores, vec![80, 90]);
        Ok(())
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let batch = DetectionBatch::new(vec![[0.0, 0.0, 1.0, 1.0]], vec![], Some(vec![0.9]));
        assert!(draw_boxes_and_labels(&batch, &FormatOptions::default()).is_err());
    }

    #[test]
    fn repeated_runs_agree() -> Result<()> {
        let a = draw_boxes_and_labels(&sample_batch(), &FormatOptions::default())?;
        let b = draw_boxes_and_labels(&sample_batch(), &FormatOptions::default())?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn class_ids_wrap_around_palette() -> Result<()> {
        let len = STANDARD_COLORS.len() as i64;
        let batch = DetectionBatch::new(vec![[0.0, 0.0, 1.0, 1.0]], vec![len + 1], Some(vec![0.9]));
        let groups = group_detections(&batch, &FormatOptions::default())?;
        assert_eq!(groups[0].color_name, STANDARD_COLORS[1]);
        Ok(())
    }

    #[test]
    fn nan_boxes_are_never_merged() -> Result<()> {
        let nan_box = [f32::NAN, 0.1, 0.4, 0.4];
        let batch = DetectionBatch::new(
            vec![nan_box, nan_box, [0.1, 0.1, 0.4, 0.4]],
            vec![1, 1, 1],
            Some(vec![0.9, 0.8, 0.7]),
        );
        let groups = group_detections(&batch, &FormatOptions::default())?;
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].scores, vec![90]);
        assert_eq!(groups[1].scores, vec![80]);
        assert!(groups[0].rect.ymin.is_nan());
        Ok(())
    }

    #[test]
    fn suppress_overlaps_keeps_aligned_survivors() -> Result<()> {
        let batch = DetectionBatch::new(
            vec![
                [0.00, 0.00, 0.10, 0.10],
                [0.01, 0.01, 0.11, 0.11],
                [0.50, 0.50, 0.60, 0.60],
            ],
            vec![1, 2, 3],
            Some(vec![0.9, 0.8, 0.7]),
        );
        let primitives = draw_boxes_and_labels(&batch, &FormatOptions::default())?;
        assert_eq!(primitives.len(), 3);

        let kept = primitives.suppress_overlaps(100, 100, 0.5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.rects, vec![primitives.rects[1], primitives.rects[2]]);
        assert_eq!(kept.scores, vec![vec![80], vec![70]]);
        assert_eq!(kept.colors, vec![primitives.colors[1], primitives.colors[2]]);
        Ok(())
    }
}
