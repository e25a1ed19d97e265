/// One raw prediction emitted by a detector backend.
///
/// Coordinates are `(x1, y1, x2, y2)` in source-frame pixels. Nothing downstream mutates a
/// prediction; the frame filter copies what it keeps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawPrediction {
    pub class_id: u32,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: [f32; 4],
}

impl RawPrediction {
    pub fn new(class_id: u32, confidence: f32, bbox: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }

    pub(crate) fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Intersection over union with another prediction's box.
    pub(crate) fn iou(&self, other: &RawPrediction) -> f32 {
        let [ax1, ay1, ax2, ay2] = self.bbox;
        let [bx1, by1, bx2, by2] = other.bbox;
        let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let p = RawPrediction::new(39, 0.9, [0.0, 0.0, 10.0, 10.0]);
        assert!((p.iou(&p) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = RawPrediction::new(39, 0.9, [0.0, 0.0, 10.0, 10.0]);
        let b = RawPrediction::new(39, 0.9, [20.0, 20.0, 30.0, 30.0]);
        assert_eq!(a.iou(&b), 0.0);
    }
}
