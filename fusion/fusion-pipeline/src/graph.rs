use std::path::PathBuf;

use bev_geom::CoordinateTransformer;
use crossbeam_channel::Sender;
use skein::{NodeRegistry, Pipeline};

use crate::associate::TrackAssociatorConfig;
use crate::fuser::MultiCameraFuser;
use crate::nodes::{
    CameraFusionNode, CoordTransformNode, PointCloudSourceNode, RadarClusterNode,
    RadarCsvSinkNode, RadarTrackingNode, ResponseSinkNode, TrackAssocNode,
};
use crate::response::FusionResponse;
use crate::Result;

/// Assembly parameters shared by the graph builders.
pub struct FusionGraphConfig {
    pub associator: TrackAssociatorConfig,
    pub expected_streams: usize,
    /// When set, a radar CSV sink taps the tracking output.
    pub csv_path: Option<PathBuf>,
}

impl Default for FusionGraphConfig {
    fn default() -> Self {
        Self {
            associator: TrackAssociatorConfig::default(),
            expected_streams: 1,
            csv_path: None,
        }
    }
}

/// Single-camera fusion graph.
///
/// Feed radar point-cloud frames to `radar-clustering` port 0 and camera
/// frames to `coordinate-transform` port 0 (both via
/// [`Pipeline::send_to_port`]); responses arrive on `responses`.
///
/// ```text
/// radar ──> radar-clustering ──> radar-tracking ──┬──> coordinate-transform ──> track-association ──> response-sink
///                                                 └──> radar-csv-sink (optional)
/// camera ─────────────────────────────────────────────────^
/// ```
pub fn build_single_camera_graph(
    transformer: CoordinateTransformer,
    cfg: FusionGraphConfig,
    responses: Sender<FusionResponse>,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    pipeline.set_source(RadarClusterNode::boxed(), "radar-clustering")?;
    pipeline.add_node(RadarTrackingNode::boxed(), "radar-tracking")?;
    pipeline.add_node(
        CoordTransformNode::with_transformer(transformer),
        "coordinate-transform",
    )?;
    pipeline.add_node(
        TrackAssocNode::with_config(cfg.associator.clone()),
        "track-association",
    )?;
    pipeline.add_node(
        ResponseSinkNode::boxed(responses, cfg.expected_streams),
        "response-sink",
    )?;

    pipeline.link_node("radar-clustering", 0, "radar-tracking", 0, None)?;
    pipeline.link_node("radar-tracking", 0, "coordinate-transform", 1, None)?;
    pipeline.link_node("coordinate-transform", 0, "track-association", 0, None)?;
    pipeline.link_node("track-association", 0, "response-sink", 0, None)?;

    if let Some(csv_path) = &cfg.csv_path {
        pipeline.add_node(
            RadarCsvSinkNode::with_path(csv_path.clone(), cfg.expected_streams),
            "radar-csv-sink",
        )?;
        pipeline.link_node("radar-tracking", 0, "radar-csv-sink", 0, None)?;
    }

    for name in [
        "radar-clustering",
        "radar-tracking",
        "coordinate-transform",
        "track-association",
        "response-sink",
    ] {
        pipeline.configure_node_by_string(name, "")?;
    }
    if cfg.csv_path.is_some() {
        pipeline.configure_node_by_string("radar-csv-sink", "")?;
    }
    Ok(pipeline)
}

/// Multi-camera fusion graph (the 2- and 4-camera arrangements).
///
/// Feed radar frames to `radar-clustering` port 0 and camera `i`'s frames to
/// `camera-fusion` port `i`.
pub fn build_multi_camera_graph(
    n_cameras: usize,
    fuser: MultiCameraFuser,
    cfg: FusionGraphConfig,
    responses: Sender<FusionResponse>,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new();
    pipeline.set_source(RadarClusterNode::boxed(), "radar-clustering")?;
    pipeline.add_node(RadarTrackingNode::boxed(), "radar-tracking")?;
    pipeline.add_node(
        CameraFusionNode::with_fuser(n_cameras, fuser),
        "camera-fusion",
    )?;
    pipeline.add_node(
        TrackAssocNode::with_config(cfg.associator.clone()),
        "track-association",
    )?;
    pipeline.add_node(
        ResponseSinkNode::boxed(responses, cfg.expected_streams),
        "response-sink",
    )?;

    pipeline.link_node("radar-clustering", 0, "radar-tracking", 0, None)?;
    pipeline.link_node("radar-tracking", 0, "camera-fusion", n_cameras, None)?;
    pipeline.link_node("camera-fusion", 0, "track-association", 0, None)?;
    pipeline.link_node("track-association", 0, "response-sink", 0, None)?;

    for name in [
        "radar-clustering",
        "radar-tracking",
        "camera-fusion",
        "track-association",
        "response-sink",
    ] {
        pipeline.configure_node_by_string(name, "")?;
    }
    Ok(pipeline)
}

/// Register the file-configurable node kinds with a registry so serialized
/// topologies can be reconstructed. The response sink is excluded: it needs
/// a live channel and is installed programmatically.
pub fn register_fusion_nodes(registry: &mut NodeRegistry) {
    registry.register("radar-pcl-source", PointCloudSourceNode::boxed);
    registry.register("radar-clustering", RadarClusterNode::boxed);
    registry.register("radar-tracking", RadarTrackingNode::boxed);
    registry.register("coordinate-transform", CoordTransformNode::boxed);
    registry.register("camera-fusion", CameraFusionNode::boxed_2c);
    registry.register("track-to-track-association", TrackAssocNode::boxed);
    registry.register("radar-csv-sink", RadarCsvSinkNode::boxed);
}
