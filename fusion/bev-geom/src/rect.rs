use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// Axis-aligned rectangle in BEV ground coordinates (meters).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl GroundRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Overlap rectangle; zero-sized when disjoint.
    pub fn intersection(&self, other: &GroundRect) -> GroundRect {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        GroundRect::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }

    /// Minimal rectangle enclosing both.
    pub fn enclosing(&self, other: &GroundRect) -> GroundRect {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        GroundRect::new(x1, y1, x2 - x1, y2 - y1)
    }
}

/// Intersection over union.
pub fn iou(a: &GroundRect, b: &GroundRect) -> f64 {
    let inter = a.intersection(b).area();
    let union = a.area() + b.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
}

/// Complete IoU: overlap penalized by normalized center distance and aspect
/// ratio mismatch. The overlap term divides by the minimal enclosing
/// rectangle's area, and the center distance by that rectangle's squared
/// diagonal.
pub fn ciou(a: &GroundRect, b: &GroundRect) -> f64 {
    const EPS: f64 = 1e-9;
    let enclosing = a.enclosing(b);
    let inter_area = a.intersection(b).area();
    let overlap = inter_area / (enclosing.area() + EPS);

    let c2 = enclosing.width * enclosing.width + enclosing.height * enclosing.height + EPS;
    let (ax, ay) = a.center();
    let (bx, by) = b.center();
    let center_dist = (ax - bx).powi(2) + (ay - by).powi(2);

    let v = (4.0 / std::f64::consts::PI.powi(2))
        * ((a.width / a.height).atan() - (b.width / b.height).atan()).powi(2);
    let alpha = v / (1.0 - overlap + v + EPS);

    overlap - (center_dist / c2 + v * alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn iou_identical_is_one() {
        let r = GroundRect::new(0.0, 0.0, 2.0, 2.0);
        assert_relative_eq!(iou(&r, &r), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn iou_disjoint_is_zero() {
        let a = GroundRect::new(0.0, 0.0, 1.0, 1.0);
        let b = GroundRect::new(5.0, 5.0, 1.0, 1.0);
        assert_relative_eq!(iou(&a, &b), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn iou_half_overlap() {
        let a = GroundRect::new(0.0, 0.0, 2.0, 1.0);
        let b = GroundRect::new(1.0, 0.0, 2.0, 1.0);
        // inter 1, union 3
        assert_relative_eq!(iou(&a, &b), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn ciou_close_boxes_near_one() {
        let a = GroundRect::new(10.0, 2.0, 4.2, 1.7);
        let b = GroundRect::new(10.1, 1.9, 4.2, 1.7);
        let c = ciou(&a, &b);
        assert!(c > 0.6, "got {c}");
        assert!(1.0 - c < 1.60, "cost below the association gate");
    }

    #[test]
    fn ciou_far_boxes_fail_gate() {
        let a = GroundRect::new(10.0, 2.0, 4.2, 1.7);
        let b = GroundRect::new(50.0, 50.0, 4.2, 1.7);
        let c = ciou(&a, &b);
        assert!(1.0 - c > 1.60, "cost above the gate, got {}", 1.0 - c);
    }

    #[test]
    fn ciou_identical_boxes() {
        let a = GroundRect::new(3.0, 4.0, 2.0, 1.0);
        assert_relative_eq!(ciou(&a, &a), 1.0, epsilon = 1e-6);
    }
}
