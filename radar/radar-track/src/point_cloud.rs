/// One radar frame's detections, in parallel per-point arrays.
///
/// `aoa_deg` is the azimuth estimate in degrees; together with `range` it
/// yields the planar position `(range·cos θ, range·sin θ)` used by the
/// clustering distance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub range: Vec<f64>,
    pub speed: Vec<f64>,
    pub snr: Vec<f64>,
    pub aoa_deg: Vec<f64>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, range: f64, speed: f64, snr: f64, aoa_deg: f64) {
        self.range.push(range);
        self.speed.push(speed);
        self.snr.push(snr);
        self.aoa_deg.push(aoa_deg);
    }

    /// Build a cloud from planar positions, converting back to range/azimuth.
    pub fn from_xy_points(points: &[(f64, f64, f64)]) -> Self {
        let mut cloud = Self::new();
        for &(x, y, v) in points {
            let range = (x * x + y * y).sqrt();
            let aoa_deg = y.atan2(x).to_degrees();
            cloud.push(range, v, 1.0, aoa_deg);
        }
        cloud
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Planar position of point `i`.
    pub fn xy(&self, i: usize) -> (f64, f64) {
        let theta = self.aoa_deg[i].to_radians();
        (self.range[i] * theta.cos(), self.range[i] * theta.sin())
    }
}
