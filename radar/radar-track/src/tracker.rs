use adskalman::{CovarianceUpdateMethod, ObservationModel, StateAndCovariance};
use nalgebra::{DMatrix, Matrix4, Vector3, Vector4, U4};
use tracing::{debug, trace, warn};

use crate::config::{AssociationPolicy, RadarTrackingConfig};
use crate::dbscan::{ClusterOutput, ClusterReport};
use crate::error::TrackerError;
use crate::motion::{ConstantVelocityModel, MotionModelFixedDt};
use crate::observation::{measurement_of_state, state_of_measurement, SphericalObservationModel};

/// Size of the track pool.
pub const MAX_TRACKERS: usize = 64;
/// Maximum measurements one track may absorb per frame.
pub const MAX_ASSOC_PER_TRACK: usize = 6;
/// Maximum input clusters per frame.
pub const MAX_INPUT_CLUSTERS: usize = 24;
/// Maximum tracks released back to the pool in one frame; the remainder is
/// released on later frames.
const MAX_EXPIRE_PER_FRAME: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Detection,
    Active,
    Expire,
}

/// Per-track output row. Only ACTIVE tracks appear in tracker output.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackReport {
    pub track_id: usize,
    pub state: TrackState,
    /// `[x, y, vx, vy]` in radar ground coordinates.
    pub s: [f64; 4],
    pub x_size: f64,
    pub y_size: f64,
}

/// Measurement derived from one cluster report, in polar space.
#[derive(Debug, Clone)]
struct Measurement {
    num_points: usize,
    range: f64,
    azimuth: f64,
    doppler: f64,
    x_size: f64,
    y_size: f64,
    range_var: f64,
    angle_var: f64,
    doppler_var: f64,
}

impl Measurement {
    fn from_report(report: &ClusterReport) -> Self {
        let x = report.x_center;
        let y = report.y_center;
        let range = (x * x + y * y).sqrt();
        let azimuth = if x == 0.0 {
            std::f64::consts::FRAC_PI_2
        } else if x > 0.0 {
            (y / x).atan()
        } else {
            (y / x).atan() + std::f64::consts::PI
        };
        Self {
            num_points: report.num_points,
            range,
            azimuth,
            // radar doppler convention: approaching clusters report negative
            // average velocity
            doppler: -report.avg_vel,
            x_size: report.x_size,
            y_size: report.y_size,
            range_var: report.range_var,
            angle_var: report.angle_var,
            doppler_var: report.doppler_var,
        }
    }

    fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.range, self.azimuth, self.doppler)
    }
}

struct TrackSlot {
    state: TrackState,
    detect2active: i32,
    detect2free: i32,
    active2free: i32,
    estimate: StateAndCovariance<f64, U4>,
    apriori: StateAndCovariance<f64, U4>,
    /// Predicted measurement `h(S_apriori)`.
    h_apriori: Vector3<f64>,
    speed2: f64,
    doppler: f64,
    x_size: f64,
    y_size: f64,
    /// Monotone max of `x_size² + y_size²`; widens the association gate for
    /// large objects.
    diag2: f64,
}

impl TrackSlot {
    fn empty() -> Self {
        Self {
            state: TrackState::Expire,
            detect2active: 0,
            detect2free: 0,
            active2free: 0,
            estimate: StateAndCovariance::new(Vector4::zeros(), Matrix4::identity()),
            apriori: StateAndCovariance::new(Vector4::zeros(), Matrix4::identity()),
            h_apriori: Vector3::zeros(),
            speed2: 0.0,
            doppler: 0.0,
            x_size: 0.0,
            y_size: 0.0,
            diag2: 0.0,
        }
    }
}

/// EKF multi-object tracker over cluster reports.
///
/// Tracks live in a bounded pool; a frame update runs exactly one time
/// update per live track, associates the frame's measurements (greedy or
/// Hungarian, same gate), combines multi-assignments into one
/// pseudo-measurement, then runs exactly one measurement update per track
/// (with the combined measurement, or the no-measure variant that only
/// advances the covariance).
pub struct ClusterTracker {
    cfg: RadarTrackingConfig,
    motion: ConstantVelocityModel,
    slots: Vec<TrackSlot>,
    /// Live track ids, newest first.
    active: Vec<usize>,
    /// Free track ids, reused FIFO.
    idle: Vec<usize>,
}

impl ClusterTracker {
    pub fn new(cfg: RadarTrackingConfig) -> Self {
        Self {
            cfg,
            motion: ConstantVelocityModel::new(),
            slots: (0..MAX_TRACKERS).map(|_| TrackSlot::empty()).collect(),
            active: Vec::with_capacity(MAX_TRACKERS),
            idle: (0..MAX_TRACKERS).collect(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Advance one frame. Errors are per-frame conditions; the tracker state
    /// remains valid and the caller typically drops the frame.
    pub fn run(
        &mut self,
        input: &ClusterOutput,
        dt: f64,
    ) -> Result<Vec<TrackReport>, TrackerError> {
        if input.reports.len() > MAX_INPUT_CLUSTERS {
            return Err(TrackerError::InputExceedsMax {
                num_clusters: input.reports.len(),
                max: MAX_INPUT_CLUSTERS,
            });
        }
        let measurements: Vec<Measurement> =
            input.reports.iter().map(Measurement::from_report).collect();

        let model = self.motion.calc_for_dt(dt);
        self.time_update(&model);

        let mut assoc: Vec<Vec<usize>> = vec![Vec::new(); MAX_TRACKERS];
        let mut pending: Vec<bool> = vec![true; measurements.len()];

        if !measurements.is_empty() {
            match self.cfg.association {
                AssociationPolicy::Greedy => {
                    self.associate_greedy(&measurements, &mut assoc, &mut pending)?
                }
                AssociationPolicy::Hungarian => {
                    self.associate_hungarian(&measurements, &mut assoc, &mut pending)?
                }
            }
            self.allocate_new_tracks(&measurements, &model, &mut pending)?;
        }

        self.update_tracks(&measurements, &assoc);
        Ok(self.report())
    }

    fn time_update(&mut self, model: &MotionModelFixedDt) {
        use adskalman::TransitionModelLinearNoControl;
        for i in 0..self.active.len() {
            let tid = self.active[i];
            let slot = &mut self.slots[tid];
            slot.apriori = model.predict(&slot.estimate);
            slot.h_apriori = measurement_of_state(slot.apriori.state());
        }
    }

    /// Polar-plane distance between a measurement and a track's predicted
    /// measurement: `r_m² + r_t² − 2·r_m·r_t·cos(θ_t − θ_m)`.
    fn distance(m: &Measurement, h_apriori: &Vector3<f64>) -> f64 {
        m.range * m.range + h_apriori[0] * h_apriori[0]
            - 2.0 * m.range * h_apriori[0] * (h_apriori[1] - m.azimuth).cos()
    }

    /// Gate for accepting a measurement onto a track; grows with the track's
    /// diagonal and shrinks with range via the angular term.
    fn gate(&self, slot: &TrackSlot) -> f64 {
        let preset = self.cfg.tracker_association_threshold;
        let r_th = preset.max(slot.diag2.sqrt() / 2.0);
        let ang_ref = 2.0 * (preset / slot.h_apriori[0]).atan();
        r_th * r_th + ang_ref * ang_ref + preset * preset
    }

    fn push_assoc(
        assoc: &mut [Vec<usize>],
        pending: &mut [bool],
        tid: usize,
        mid: usize,
    ) -> Result<(), TrackerError> {
        assoc[tid].push(mid);
        pending[mid] = false;
        if assoc[tid].len() >= MAX_ASSOC_PER_TRACK {
            return Err(TrackerError::TooManyMeasurements {
                track_id: tid,
                max: MAX_ASSOC_PER_TRACK,
            });
        }
        Ok(())
    }

    fn associate_greedy(
        &mut self,
        measurements: &[Measurement],
        assoc: &mut [Vec<usize>],
        pending: &mut [bool],
    ) -> Result<(), TrackerError> {
        if self.active.is_empty() {
            return Ok(());
        }
        for (mid, m) in measurements.iter().enumerate() {
            let mut best: Option<(usize, f64)> = None;
            for &tid in &self.active {
                let d = Self::distance(m, &self.slots[tid].h_apriori);
                if best.map(|(_, bd)| d < bd).unwrap_or(true) {
                    best = Some((tid, d));
                }
            }
            let (tid, d) = best.expect("active nonempty");
            if d < self.gate(&self.slots[tid]) {
                trace!(mid, tid, dist = d, "greedy association");
                Self::push_assoc(assoc, pending, tid, mid)?;
            }
        }
        Ok(())
    }

    fn associate_hungarian(
        &mut self,
        measurements: &[Measurement],
        assoc: &mut [Vec<usize>],
        pending: &mut [bool],
    ) -> Result<(), TrackerError> {
        let n_track = self.active.len();
        if n_track == 0 {
            return Ok(());
        }
        let n_meas = measurements.len();
        // Pad with one no-match column per measurement so rows <= cols
        // always holds and ungated measurements can stay unassigned.
        const NO_MATCH: f64 = 1e12;
        let mut costs = DMatrix::from_element(n_meas, n_track + n_meas, NO_MATCH);
        for (mid, m) in measurements.iter().enumerate() {
            for (col, &tid) in self.active.iter().enumerate() {
                costs[(mid, col)] = Self::distance(m, &self.slots[tid].h_apriori);
            }
        }
        let assignment = hungarian::minimize(&costs);
        for (mid, &col) in assignment.iter().enumerate() {
            if col >= n_track {
                continue;
            }
            let tid = self.active[col];
            // same gating predicate as the greedy path
            if costs[(mid, col)] < self.gate(&self.slots[tid]) {
                trace!(mid, tid, dist = costs[(mid, col)], "hungarian association");
                Self::push_assoc(assoc, pending, tid, mid)?;
            }
        }
        Ok(())
    }

    fn allocate_new_tracks(
        &mut self,
        measurements: &[Measurement],
        model: &MotionModelFixedDt,
        pending: &mut [bool],
    ) -> Result<(), TrackerError> {
        use adskalman::TransitionModelLinearNoControl;
        let mut result = Ok(());
        for (mid, m) in measurements.iter().enumerate() {
            if !pending[mid] {
                continue;
            }
            if self.idle.is_empty() {
                // remember the failure but keep allocating nothing; the
                // measurement is simply not tracked this frame
                result = Err(TrackerError::PoolExhausted);
                continue;
            }
            let tid = self.idle.remove(0);
            self.active.insert(0, tid);
            pending[mid] = false;

            let state = state_of_measurement(&m.as_vector());
            let estimate = StateAndCovariance::new(state, Matrix4::identity());
            let apriori = model.predict(&estimate);
            let h_apriori = measurement_of_state(apriori.state());
            self.slots[tid] = TrackSlot {
                state: TrackState::Detection,
                detect2active: 0,
                detect2free: 0,
                active2free: 0,
                estimate,
                apriori,
                h_apriori,
                speed2: m.doppler * m.doppler,
                doppler: m.doppler,
                x_size: m.x_size,
                y_size: m.y_size,
                diag2: m.x_size * m.x_size + m.y_size * m.y_size,
            };
            debug!(tid, range = m.range, "track allocated");
        }
        result
    }

    fn step_state_machine(cfg: &RadarTrackingConfig, slot: &mut TrackSlot, hit: bool) {
        match slot.state {
            TrackState::Detection => {
                if hit {
                    slot.detect2free = 0;
                    if slot.detect2active > cfg.tracker_active_threshold {
                        slot.state = TrackState::Active;
                    } else {
                        slot.detect2active += 1;
                    }
                } else {
                    if slot.detect2free > cfg.tracker_forget_threshold {
                        slot.state = TrackState::Expire;
                    } else {
                        slot.detect2free += 1;
                    }
                    if slot.detect2active > 0 {
                        slot.detect2active -= 1;
                    }
                }
            }
            TrackState::Active => {
                if hit {
                    if slot.active2free > 0 {
                        slot.active2free -= 1;
                    }
                } else if slot.active2free > cfg.tracker_forget_threshold {
                    slot.state = TrackState::Expire;
                } else {
                    slot.active2free += 1;
                }
            }
            TrackState::Expire => {}
        }
    }

    /// Point-count-weighted pseudo-measurement over a track's associations;
    /// extents take the max.
    fn combine_measurements(measurements: &[Measurement], ids: &[usize]) -> Measurement {
        let mut combined = Measurement {
            num_points: 0,
            range: 0.0,
            azimuth: 0.0,
            doppler: 0.0,
            x_size: 0.0,
            y_size: 0.0,
            range_var: 0.0,
            angle_var: 0.0,
            doppler_var: 0.0,
        };
        let mut total = 0usize;
        for &mid in ids {
            let m = &measurements[mid];
            let w = m.num_points as f64;
            total += m.num_points;
            combined.range += m.range * w;
            combined.azimuth += m.azimuth * w;
            combined.doppler += m.doppler * w;
            combined.range_var += m.range_var * w;
            combined.angle_var += m.angle_var * w;
            combined.doppler_var += m.doppler_var * w;
            combined.x_size = combined.x_size.max(m.x_size);
            combined.y_size = combined.y_size.max(m.y_size);
        }
        let inv = 1.0 / total as f64;
        combined.num_points = total;
        combined.range *= inv;
        combined.azimuth *= inv;
        combined.doppler *= inv;
        combined.range_var *= inv;
        combined.angle_var *= inv;
        combined.doppler_var *= inv;
        combined
    }

    fn iir(previous: f64, current: f64, forget: f64) -> f64 {
        previous * (1.0 - forget) + current * forget
    }

    fn update_tracks(&mut self, measurements: &[Measurement], assoc: &[Vec<usize>]) {
        let cfg = self.cfg.clone();
        let mut expire_list: Vec<usize> = Vec::new();
        for list_idx in 0..self.active.len() {
            let tid = self.active[list_idx];
            let slot = &mut self.slots[tid];
            if !assoc[tid].is_empty() {
                Self::step_state_machine(&cfg, slot, true);

                let combined = Self::combine_measurements(measurements, &assoc[tid]);
                let noise = cfg.measurement_noise_variance;
                let r = Vector3::new(
                    combined.range_var * noise,
                    combined.angle_var * noise,
                    combined.doppler_var * noise,
                );
                let obs = SphericalObservationModel::linearized_at(slot.apriori.state(), r);
                match obs.update(
                    &slot.apriori,
                    &combined.as_vector(),
                    CovarianceUpdateMethod::JosephForm,
                ) {
                    Ok(posterior) => slot.estimate = posterior,
                    Err(e) => {
                        // keep the prediction if the update is numerically
                        // unusable this frame
                        warn!(tid, "kalman update failed: {e}");
                        slot.estimate = slot.apriori.clone();
                    }
                }

                let speed2 = {
                    let s = slot.estimate.state();
                    s[2] * s[2] + s[3] * s[3]
                };
                slot.speed2 = speed2;
                slot.doppler = combined.doppler;
                slot.x_size = Self::iir(slot.x_size, combined.x_size, cfg.iir_forget_factor);
                slot.y_size = Self::iir(slot.y_size, combined.y_size, cfg.iir_forget_factor);
                let diag2 = slot.x_size * slot.x_size + slot.y_size * slot.y_size;
                if diag2 > slot.diag2 {
                    slot.diag2 = diag2;
                }
            } else {
                Self::step_state_machine(&cfg, slot, false);
                if slot.state == TrackState::Expire
                    && expire_list.len() < MAX_EXPIRE_PER_FRAME - 1
                {
                    expire_list.push(list_idx);
                } else {
                    // no-measure update: the posterior is the prediction
                    slot.estimate = slot.apriori.clone();
                }
            }
        }
        // release expired tracks, highest list index first
        for &list_idx in expire_list.iter().rev() {
            let tid = self.active.remove(list_idx);
            self.idle.push(tid);
            debug!(tid, "track released");
        }
    }

    fn report(&self) -> Vec<TrackReport> {
        self.active
            .iter()
            .filter(|&&tid| self.slots[tid].state == TrackState::Active)
            .map(|&tid| {
                let slot = &self.slots[tid];
                let s = slot.estimate.state();
                TrackReport {
                    track_id: tid,
                    state: slot.state,
                    s: [s[0], s[1], s[2], s[3]],
                    x_size: slot.x_size,
                    y_size: slot.y_size,
                }
            })
            .collect()
    }
}
