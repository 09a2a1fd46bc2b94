//! Axis-aligned boxes and the two overlap scores the merge engine relies on.
//!
//! All coordinates are raster pixels with a top-left origin. Scores never
//! divide by zero: a degenerate box simply scores 0.

use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box `(x0, y0, x1, y1)` in raster pixels.
///
/// Serialised as a 4-element array to match the wire format workers emit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    /// Area, or 0 for a degenerate box.
    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// Zero or negative width/height, or a non-finite coordinate.
    pub fn is_degenerate(&self) -> bool {
        !(self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite())
            || self.width() <= 0.0
            || self.height() <= 0.0
    }

    pub fn intersection_area(&self, other: &BBox) -> f32 {
        let w = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let h = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        w * h
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Multiply every coordinate by the per-axis factors.
    pub fn scale(&self, sx: f32, sy: f32) -> BBox {
        BBox {
            x0: self.x0 * sx,
            y0: self.y0 * sy,
            x1: self.x1 * sx,
            y1: self.y1 * sy,
        }
    }

    /// Clamp to `[0, width] × [0, height]`.
    pub fn clamp_to(&self, width: f32, height: f32) -> BBox {
        BBox {
            x0: self.x0.clamp(0.0, width),
            y0: self.y0.clamp(0.0, height),
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
        }
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        BBox::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

/// Standard intersection-over-union. Returns 0 if either area is 0.
pub fn intersection_over_union(a: &BBox, b: &BBox) -> f32 {
    let area_a = a.area();
    let area_b = b.area();
    if area_a == 0.0 || area_b == 0.0 {
        return 0.0;
    }
    let inter = a.intersection_area(b);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        return 0.0;
    }
    (inter / union).clamp(0.0, 1.0)
}

/// Intersection divided by `member`'s area (not the union).
///
/// A small box fully inside a large one scores 1.0 even though their IoU is
/// close to 0.
pub fn containment(container: &BBox, member: &BBox) -> f32 {
    let member_area = member.area();
    if member_area == 0.0 || container.is_degenerate() {
        return 0.0;
    }
    (container.intersection_area(member) / member_area).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn iou_is_symmetric() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 5.0, 20.0, 12.0);
        assert!(close(
            intersection_over_union(&a, &b),
            intersection_over_union(&b, &a)
        ));
    }

    #[test]
    fn iou_of_self_is_one() {
        let a = BBox::new(3.0, 4.0, 30.0, 40.0);
        assert!(close(intersection_over_union(&a, &a), 1.0));
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(intersection_over_union(&a, &b), 0.0);
        // Touching edges share no area.
        let c = BBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(intersection_over_union(&a, &c), 0.0);
    }

    #[test]
    fn iou_known_value() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // inter 50, union 150
        assert!(close(intersection_over_union(&a, &b), 1.0 / 3.0));
    }

    #[test]
    fn zero_area_scores_zero() {
        let line = BBox::new(0.0, 5.0, 10.0, 5.0);
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(intersection_over_union(&a, &line), 0.0);
        assert_eq!(containment(&a, &line), 0.0);
        assert_eq!(containment(&line, &a), 0.0);
        let inverted = BBox::new(10.0, 10.0, 0.0, 0.0);
        assert!(inverted.is_degenerate());
        assert_eq!(containment(&a, &inverted), 0.0);
    }

    #[test]
    fn containment_of_self_is_one() {
        let a = BBox::new(1.0, 2.0, 3.0, 4.0);
        assert!(close(containment(&a, &a), 1.0));
    }

    #[test]
    fn containment_inside_large_box_is_one() {
        let table = BBox::new(0.0, 0.0, 2000.0, 2000.0);
        let cell = BBox::new(10.0, 10.0, 50.0, 30.0);
        assert!(close(containment(&table, &cell), 1.0));
        // IoU of the same pair is tiny.
        assert!(intersection_over_union(&table, &cell) < 0.001);
    }

    #[test]
    fn containment_stays_in_unit_interval() {
        let boxes = [
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BBox::new(5.0, 5.0, 50.0, 50.0),
            BBox::new(-20.0, -20.0, 3.0, 3.0),
            BBox::new(9.0, 0.0, 11.0, 100.0),
        ];
        for a in &boxes {
            for b in &boxes {
                let c = containment(a, b);
                assert!((0.0..=1.0).contains(&c), "{a:?} {b:?} -> {c}");
            }
        }
    }

    #[test]
    fn bbox_serialises_as_array() {
        let b = BBox::new(0.0, 25.0, 100.0, 45.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[0.0,25.0,100.0,45.0]");
        let back: BBox = serde_json::from_str("[1,2,3,4]").unwrap();
        assert_eq!(back, BBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn union_covers_both() {
        let a = BBox::new(0.0, 0.0, 100.0, 20.0);
        let b = BBox::new(0.0, 25.0, 100.0, 45.0);
        assert_eq!(a.union(&b), BBox::new(0.0, 0.0, 100.0, 45.0));
    }
}
