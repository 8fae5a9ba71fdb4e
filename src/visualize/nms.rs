//! Greedy non-maximum suppression.
//!
//! Boxes are `[x1, y1, x2, y2]` with inclusive pixel extents, so a box's area
//! is `(x2 - x1 + 1) * (y2 - y1 + 1)`. Candidates are visited bottom edge
//! first (largest `y2`); every pending box whose overlap with the picked box
//! exceeds the threshold is discarded.
//!
//! Overlap is `intersection / area(pending box)`, not IoU. A small box lying
//! inside a picked box is therefore always suppressed, while a large box
//! containing a picked one may survive.

/// Box as `[x1, y1, x2, y2]`.
pub type SuppressBox = [f64; 4];

/// Suppress overlapping boxes.
///
/// Returns the kept boxes as floats, in pick order (descending `y2`; among
/// equal `y2` the later input box is picked first). `overlap_thresh` is
/// compared with strict `>`.
pub fn non_max_suppression<T>(boxes: &[[T; 4]], overlap_thresh: f64) -> Vec<SuppressBox>
where
    T: Copy + Into<f64>,
{
    let boxes: Vec<SuppressBox> = boxes
        .iter()
        .map(|b| b.map(|v| -> f64 { v.into() }))
        .collect();
    suppressed_indices(&boxes, overlap_thresh)
        .into_iter()
        .map(|i| boxes[i])
        .collect()
}

/// Same selection as `non_max_suppression`, returning input indices in pick
/// order.
pub fn suppressed_indices(boxes: &[SuppressBox], overlap_thresh: f64) -> Vec<usize> {
    if boxes.is_empty() {
        return Vec::new();
    }

    let area: Vec<f64> = boxes
        .iter()
        .map(|&[x1, y1, x2, y2]| (x2 - x1 + 1.0) * (y2 - y1 + 1.0))
        .collect();

    // Stable sort keeps input order among equal bottom edges.
    let mut idxs: Vec<usize> = (0..boxes.len()).collect();
    idxs.sort_by(|&a, &b| boxes[a][3].total_cmp(&boxes[b][3]));

    let mut pick = Vec::new();
    while let Some(i) = idxs.pop() {
        pick.push(i);
        let [px1, py1, px2, py2] = boxes[i];
        idxs.retain(|&j| {
            let [x1, y1, x2, y2] = boxes[j];
            let w = (px2.min(x2) - px1.max(x1) + 1.0).max(0.0);
            let h = (py2.min(y2) - py1.max(y1) + 1.0).max(0.0);
            let overlap = (w * h) / area[j];
            !(overlap > overlap_thresh)
        });
    }
    pick
}
