//! Radar signal-chain kernels: DBSCAN clustering of point clouds and an
//! extended-Kalman-filter cluster tracker with a bounded track pool.
//!
//! The clustering engine groups a frame's detections into clusters with
//! centroid/extent/variance reports; the tracker associates those reports to
//! live tracks in polar measurement space, runs one constant-velocity EKF per
//! track, and manages the DETECTION → ACTIVE → EXPIRE lifecycle. Only ACTIVE
//! tracks are reported downstream.

mod config;
mod dbscan;
mod error;
mod motion;
mod observation;
mod point_cloud;
mod tracker;

pub use config::{
    AoaEstimationType, AssociationPolicy, CfarMethod, RadarBasicConfig, RadarClusteringConfig,
    RadarConfig, RadarDetectionConfig, RadarTrackingConfig, WinType,
};
pub use dbscan::{ClusterOutput, ClusterReport, DbscanEngine};
pub use error::{ClusterError, Error, Result, TrackerError};
pub use motion::{ConstantVelocityModel, MotionModelFixedDt};
pub use observation::{measurement_of_state, state_of_measurement, SphericalObservationModel};
pub use point_cloud::PointCloud;
pub use tracker::{
    ClusterTracker, TrackReport, TrackState, MAX_ASSOC_PER_TRACK, MAX_INPUT_CLUSTERS, MAX_TRACKERS,
};
