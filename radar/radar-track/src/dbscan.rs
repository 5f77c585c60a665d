use tracing::trace;

use crate::config::RadarClusteringConfig;
use crate::error::ClusterError;
use crate::point_cloud::PointCloud;

const POINT_UNKNOWN: u8 = 0;
const POINT_VISITED: u8 = 1;

/// Per-cluster summary handed to the tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterReport {
    pub num_points: usize,
    pub x_center: f64,
    pub y_center: f64,
    /// Max |x - x_center| over members.
    pub x_size: f64,
    /// Max |y - y_center| over members.
    pub y_size: f64,
    pub avg_vel: f64,
    /// Σ rᵢ²·SNRᵢ / n. The SNR sum is intentionally not divided out; the
    /// fusion chain is calibrated against this magnitude.
    pub range_var: f64,
    pub angle_var: f64,
    pub doppler_var: f64,
}

/// Clustering result for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterOutput {
    /// Cluster id per input point; 0 marks noise, clusters are 1-based.
    pub labels: Vec<u32>,
    pub num_clusters: usize,
    /// One report per cluster, index `cluster_id - 1`.
    pub reports: Vec<ClusterReport>,
}

/// Density-based clustering over a planar projection of the point cloud.
///
/// The neighbor predicate is `Δx² + Δy² + weight·Δv² < eps²`, restricted to
/// points not yet visited in the current expansion scope. The scope array is
/// a per-expansion copy of the visited array, so points already absorbed into
/// the growing cluster are not rediscovered while walking the frontier.
pub struct DbscanEngine {
    eps2: f64,
    weight: f64,
    min_points: usize,
    max_clusters: usize,
    max_points: usize,
    visited: Vec<u8>,
    scope: Vec<u8>,
}

impl DbscanEngine {
    pub fn new(cfg: &RadarClusteringConfig) -> Self {
        Self {
            eps2: cfg.eps * cfg.eps,
            weight: cfg.weight,
            min_points: cfg.min_points_in_cluster,
            max_clusters: cfg.max_clusters,
            max_points: cfg.max_points,
            visited: Vec::with_capacity(cfg.max_points),
            scope: Vec::with_capacity(cfg.max_points),
        }
    }

    /// Cluster one frame. Every input point receives exactly one label in
    /// `0..=num_clusters`.
    pub fn cluster(&mut self, input: &PointCloud) -> Result<ClusterOutput, ClusterError> {
        let n = input.len();
        if n > self.max_points {
            return Err(ClusterError::TooManyPoints {
                num_points: n,
                max_points: self.max_points,
            });
        }

        let xy: Vec<(f64, f64)> = (0..n).map(|i| input.xy(i)).collect();
        let speed = &input.speed;

        self.visited.clear();
        self.visited.resize(n, POINT_UNKNOWN);
        self.scope.clear();
        self.scope.resize(n, POINT_UNKNOWN);

        let mut labels = vec![0u32; n];
        let mut reports = Vec::new();
        let mut cluster_id = 0u32;
        // cluster member list, in discovery order; doubles as the frontier
        let mut members: Vec<usize> = Vec::with_capacity(n);

        for point in 0..n {
            if self.visited[point] == POINT_VISITED {
                continue;
            }
            // fresh expansion scope
            self.scope.copy_from_slice(&self.visited);

            members.clear();
            let found = self.find_neighbors(&xy, speed, point, &mut members);
            self.visited[point] = POINT_VISITED;

            if found < self.min_points {
                labels[point] = 0; // noise
                continue;
            }

            cluster_id += 1;
            labels[point] = cluster_id;
            for &m in &members {
                self.scope[m] = POINT_VISITED;
            }

            // expand the frontier
            let mut current = 0usize;
            while current < members.len() {
                let member = members[current];
                current += 1;
                labels[member] = cluster_id;
                self.visited[member] = POINT_VISITED;

                let start = members.len();
                let found = self.find_neighbors_into(&xy, speed, member, &mut members);
                if found >= self.min_points {
                    for &m in &members[start..] {
                        self.scope[m] = POINT_VISITED;
                    }
                } else {
                    members.truncate(start);
                }
            }

            if cluster_id as usize >= self.max_clusters {
                return Err(ClusterError::ClusterLimitReached {
                    max_clusters: self.max_clusters,
                });
            }

            reports.push(calc_cluster_info(&xy, input, &members));
            trace!(cluster = cluster_id, size = members.len(), "cluster closed");
        }

        Ok(ClusterOutput {
            labels,
            num_clusters: cluster_id as usize,
            reports,
        })
    }

    /// Collect scope-unknown neighbors of `point` into `out` (cleared first),
    /// returning how many were found. The seed itself qualifies.
    fn find_neighbors(
        &mut self,
        xy: &[(f64, f64)],
        speed: &[f64],
        point: usize,
        out: &mut Vec<usize>,
    ) -> usize {
        out.clear();
        self.find_neighbors_into(xy, speed, point, out)
    }

    /// Append scope-unknown neighbors of `point` to `out`, returning the
    /// number appended.
    fn find_neighbors_into(
        &mut self,
        xy: &[(f64, f64)],
        speed: &[f64],
        point: usize,
        out: &mut Vec<usize>,
    ) -> usize {
        let (px, py) = xy[point];
        let pv = speed[point];
        let mut found = 0usize;
        for i in 0..xy.len() {
            if self.scope[i] != POINT_UNKNOWN {
                continue;
            }
            let dx = xy[i].0 - px;
            let dy = xy[i].1 - py;
            let dv = speed[i] - pv;
            let d2 = dx * dx + dy * dy + self.weight * dv * dv;
            if d2 < self.eps2 {
                out.push(i);
                found += 1;
            }
        }
        found
    }
}

fn calc_cluster_info(xy: &[(f64, f64)], input: &PointCloud, members: &[usize]) -> ClusterReport {
    let mut report = ClusterReport {
        num_points: members.len(),
        ..Default::default()
    };
    let length = members.len();
    if length <= 1 {
        return report;
    }
    let inv = 1.0 / length as f64;

    let (mut sum_x, mut sum_y, mut sum_v) = (0.0, 0.0, 0.0);
    for &m in members {
        sum_x += xy[m].0;
        sum_y += xy[m].1;
        sum_v += input.speed[m];
    }
    let x_center = sum_x * inv;
    let y_center = sum_y * inv;
    let avg_vel = sum_v * inv;

    let (mut x_size, mut y_size) = (0.0f64, 0.0f64);
    let (mut vel_var, mut range_var, mut angle_var) = (0.0, 0.0, 0.0);
    for &m in members {
        x_size = x_size.max((xy[m].0 - x_center).abs());
        y_size = y_size.max((xy[m].1 - y_center).abs());
        let dv = input.speed[m] - avg_vel;
        vel_var += dv * dv;
        let range2 = xy[m].0 * xy[m].0 + xy[m].1 * xy[m].1;
        range_var += range2 * input.snr[m];
        angle_var += input.aoa_deg[m] * input.aoa_deg[m];
    }
    let deg2rad = std::f64::consts::PI / 180.0;

    report.x_center = x_center;
    report.y_center = y_center;
    report.x_size = x_size;
    report.y_size = y_size;
    report.avg_vel = avg_vel;
    report.range_var = range_var * inv;
    report.angle_var = angle_var * deg2rad * deg2rad * inv;
    report.doppler_var = vel_var * inv;
    report
}
