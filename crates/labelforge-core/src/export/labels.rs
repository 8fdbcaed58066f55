//! Keypoint-to-bbox assignment and YOLO label line rendering.
//!
//! Each bbox owns `num_keypoints` slots. A keypoint goes to its declared
//! parent when that parent exists in the image; otherwise to the nearest bbox
//! (distance to center) whose tolerance box contains it. Within a slot the
//! keypoint closest to the bbox center wins; on equal distance the earlier
//! record wins, so the result depends only on record order.

use super::annotation::AnnotationRecord;

/// Tolerance box margin as a fraction of the bbox size, applied on each side.
pub const KEYPOINT_MARGIN_RATIO: f64 = 0.05;

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn distance_to(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A bbox with its keypoint slots filled.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedBox {
    pub class_index: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub keypoints: Vec<Option<Point>>,
}

impl AssignedBox {
    #[must_use]
    pub fn filled_slots(&self) -> usize {
        self.keypoints.iter().filter(|k| k.is_some()).count()
    }
}

/// Result of assigning one image's keypoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    pub boxes: Vec<AssignedBox>,
    /// Keypoints with an in-range index that were looked at.
    pub considered: usize,
    /// Keypoints that fell outside every tolerance box.
    pub unmatched: usize,
}

struct Candidate<'a> {
    record: &'a AnnotationRecord,
    center: Point,
    slots: Vec<Option<(f64, Point)>>,
}

impl Candidate<'_> {
    fn tolerance_contains(&self, p: Point) -> bool {
        let r = self.record;
        let mw = r.width * KEYPOINT_MARGIN_RATIO;
        let mh = r.height * KEYPOINT_MARGIN_RATIO;
        p.x >= r.x - mw && p.x <= r.x + r.width + mw && p.y >= r.y - mh && p.y <= r.y + r.height + mh
    }

    fn offer(&mut self, slot: usize, p: Point) {
        let dist = p.distance_to(self.center);
        let better = match self.slots[slot] {
            Some((current, _)) => dist < current,
            None => true,
        };
        if better {
            self.slots[slot] = Some((dist, p));
        }
    }
}

/// Assign the keypoints of one image to its bboxes.
#[must_use]
pub fn assign_keypoints(records: &[AnnotationRecord], num_keypoints: usize) -> Assignment {
    let mut candidates: Vec<Candidate<'_>> = records
        .iter()
        .filter(|r| r.is_bbox())
        .map(|r| Candidate {
            record: r,
            center: Point { x: r.x + r.width / 2.0, y: r.y + r.height / 2.0 },
            slots: vec![None; num_keypoints],
        })
        .collect();

    let mut considered = 0;
    let mut unmatched = 0;

    for kp in records.iter().filter(|r| r.is_keypoint()) {
        let slot = kp.keypoint_index();
        if slot >= num_keypoints {
            continue;
        }
        considered += 1;
        let p = Point { x: kp.x, y: kp.y };

        let parent = kp.parent_id.as_deref().and_then(|pid| {
            candidates.iter().position(|c| c.record.id.as_deref() == Some(pid))
        });
        if let Some(idx) = parent {
            candidates[idx].offer(slot, p);
            continue;
        }

        let mut nearest: Option<(usize, f64)> = None;
        for (idx, c) in candidates.iter().enumerate() {
            if !c.tolerance_contains(p) {
                continue;
            }
            let dist = p.distance_to(c.center);
            if nearest.is_none_or(|(_, best)| dist < best) {
                nearest = Some((idx, dist));
            }
        }

        match nearest {
            Some((idx, _)) => candidates[idx].offer(slot, p),
            None => unmatched += 1,
        }
    }

    let boxes = candidates
        .into_iter()
        .map(|c| AssignedBox {
            class_index: c.record.class_index(),
            x: c.record.x,
            y: c.record.y,
            width: c.record.width,
            height: c.record.height,
            keypoints: c.slots.into_iter().map(|s| s.map(|(_, p)| p)).collect(),
        })
        .collect();

    Assignment { boxes, considered, unmatched }
}

/// A bbox in normalized YOLO form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub cx: f64,
    pub cy: f64,
    pub w: f64,
    pub h: f64,
}

/// Clamp a value into [0, 1]; non-finite input becomes 0.
fn unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }
}

/// Normalize a pixel bbox against the image size.
///
/// Non-finite coordinates count as 0. Position and size are clipped to the
/// image first, then every normalized value is clamped again so corrupt input
/// can never leave [0, 1].
#[must_use]
pub fn normalize_bbox(b: &AssignedBox, image_width: f64, image_height: f64) -> NormalizedBox {
    let finite = |v: f64| if v.is_finite() { v } else { 0.0 };
    let bx = finite(b.x).max(0.0);
    let by = finite(b.y).max(0.0);
    let bw = (image_width - bx).min(finite(b.width));
    let bh = (image_height - by).min(finite(b.height));

    NormalizedBox {
        cx: unit((bx + bw / 2.0) / image_width),
        cy: unit((by + bh / 2.0) / image_height),
        w: unit(bw / image_width),
        h: unit(bh / image_height),
    }
}

/// Render one label line: `class cx cy w h [kx ky [v]]*N`.
#[must_use]
pub fn label_line(
    b: &AssignedBox,
    image_width: f64,
    image_height: f64,
    include_visibility: bool,
) -> String {
    let n = normalize_bbox(b, image_width, image_height);
    let mut parts = vec![
        b.class_index.to_string(),
        format!("{:.6}", n.cx),
        format!("{:.6}", n.cy),
        format!("{:.6}", n.w),
        format!("{:.6}", n.h),
    ];

    for slot in &b.keypoints {
        let (kx, ky, visibility) = match slot {
            Some(p) => (unit(p.x / image_width), unit(p.y / image_height), 2),
            None => (0.0, 0.0, 0),
        };
        parts.push(format!("{kx:.6}"));
        parts.push(format!("{ky:.6}"));
        if include_visibility {
            parts.push(visibility.to_string());
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::annotation::AnnotationKind;

    fn bbox(id: &str, x: f64, y: f64, w: f64, h: f64) -> AnnotationRecord {
        AnnotationRecord {
            kind: AnnotationKind::Bbox,
            id: Some(id.to_string()),
            x,
            y,
            width: w,
            height: h,
            class_index: Some(0),
            keypoint_index: None,
            parent_id: None,
        }
    }

    fn kp(idx: usize, x: f64, y: f64, parent: Option<&str>) -> AnnotationRecord {
        AnnotationRecord {
            kind: AnnotationKind::Keypoint,
            id: None,
            x,
            y,
            width: 0.0,
            height: 0.0,
            class_index: None,
            keypoint_index: Some(idx),
            parent_id: parent.map(str::to_string),
        }
    }

    #[test]
    fn test_keypoint_goes_to_nearest_containing_box() {
        // Overlapping boxes; point is closer to the center of b2.
        let records = vec![
            bbox("b1", 0.0, 0.0, 100.0, 100.0),
            bbox("b2", 50.0, 50.0, 100.0, 100.0),
            kp(0, 90.0, 90.0, None),
        ];
        let a = assign_keypoints(&records, 2);
        assert_eq!(a.boxes[0].keypoints[0], None);
        assert_eq!(a.boxes[1].keypoints[0], Some(Point { x: 90.0, y: 90.0 }));
    }

    #[test]
    fn test_tolerance_margin_accepts_point_just_outside() {
        // 5% of 100 = 5px margin.
        let records = vec![bbox("b1", 0.0, 0.0, 100.0, 100.0), kp(0, 104.0, 50.0, None)];
        let a = assign_keypoints(&records, 1);
        assert!(a.boxes[0].keypoints[0].is_some());

        let records = vec![bbox("b1", 0.0, 0.0, 100.0, 100.0), kp(0, 106.0, 50.0, None)];
        let a = assign_keypoints(&records, 1);
        assert!(a.boxes[0].keypoints[0].is_none());
        assert_eq!(a.unmatched, 1);
    }

    #[test]
    fn test_parent_is_sticky_even_when_other_box_is_closer() {
        let records = vec![
            bbox("b1", 0.0, 0.0, 10.0, 10.0),
            bbox("b2", 100.0, 100.0, 10.0, 10.0),
            kp(0, 105.0, 105.0, Some("b1")),
        ];
        let a = assign_keypoints(&records, 1);
        assert_eq!(a.boxes[0].keypoints[0], Some(Point { x: 105.0, y: 105.0 }));
        assert_eq!(a.boxes[1].keypoints[0], None);
    }

    #[test]
    fn test_unknown_parent_falls_back_to_geometry() {
        let records = vec![bbox("b1", 0.0, 0.0, 10.0, 10.0), kp(0, 5.0, 5.0, Some("gone"))];
        let a = assign_keypoints(&records, 1);
        assert!(a.boxes[0].keypoints[0].is_some());
    }

    #[test]
    fn test_slot_keeps_closest_and_first_on_tie() {
        let records = vec![
            bbox("b1", 0.0, 0.0, 100.0, 100.0),
            kp(0, 10.0, 10.0, Some("b1")),
            kp(0, 45.0, 50.0, Some("b1")),
            kp(0, 55.0, 50.0, Some("b1")),
        ];
        let a = assign_keypoints(&records, 1);
        // 45 and 55 are both 5px from the center; the earlier one stays.
        assert_eq!(a.boxes[0].keypoints[0], Some(Point { x: 45.0, y: 50.0 }));
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let records = vec![bbox("b1", 0.0, 0.0, 10.0, 10.0), kp(5, 5.0, 5.0, None)];
        let a = assign_keypoints(&records, 3);
        assert_eq!(a.considered, 0);
        assert_eq!(a.boxes[0].filled_slots(), 0);
    }

    #[test]
    fn test_normalize_clamps_out_of_bounds_box() {
        let b = AssignedBox {
            class_index: 0,
            x: -50.0,
            y: 80.0,
            width: 300.0,
            height: 500.0,
            keypoints: vec![],
        };
        let n = normalize_bbox(&b, 200.0, 100.0);
        for v in [n.cx, n.cy, n.w, n.h] {
            assert!((0.0..=1.0).contains(&v), "{v} out of range");
        }
        assert!((n.w - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_box_entirely_outside_image() {
        let b = AssignedBox { class_index: 0, x: 500.0, y: 500.0, width: 10.0, height: 10.0, keypoints: vec![] };
        let n = normalize_bbox(&b, 100.0, 100.0);
        assert_eq!(n.w, 0.0);
        assert_eq!(n.h, 0.0);
        assert!(n.cx <= 1.0 && n.cy <= 1.0);
    }

    #[test]
    fn test_normalize_nan_is_zero() {
        let b = AssignedBox { class_index: 0, x: f64::NAN, y: 0.0, width: f64::NAN, height: 10.0, keypoints: vec![] };
        let n = normalize_bbox(&b, 100.0, 100.0);
        assert_eq!(n.w, 0.0);
        assert_eq!(n.cx, 0.0);
        assert!((n.h - 0.1).abs() < 1e-9);

        let b = AssignedBox { class_index: 0, x: 10.0, y: 10.0, width: f64::INFINITY, height: f64::NEG_INFINITY, keypoints: vec![] };
        let n = normalize_bbox(&b, 100.0, 100.0);
        assert_eq!((n.w, n.h), (0.0, 0.0));
        assert!((n.cx - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_label_line_with_and_without_visibility() {
        let b = AssignedBox {
            class_index: 3,
            x: 0.0,
            y: 0.0,
            width: 50.0,
            height: 100.0,
            keypoints: vec![Some(Point { x: 25.0, y: 50.0 }), None],
        };
        assert_eq!(
            label_line(&b, 100.0, 100.0, true),
            "3 0.250000 0.500000 0.500000 1.000000 0.250000 0.500000 2 0.000000 0.000000 0"
        );
        assert_eq!(
            label_line(&b, 100.0, 100.0, false),
            "3 0.250000 0.500000 0.500000 1.000000 0.250000 0.500000 0.000000 0.000000"
        );
    }
}
