//! Graph nodes of the sensor-fusion pipeline.
//!
//! Each node is a concrete struct implementing [`skein::Node`]; per-frame
//! results are attached to frame buffers as typed metadata and flow to the
//! next node with the blob.

mod camera_fusion;
mod coord_transform;
mod pcl_source;
mod radar_cluster;
mod radar_csv_sink;
mod radar_tracking;
mod response_sink;
mod track_assoc;

pub use camera_fusion::CameraFusionNode;
pub use coord_transform::CoordTransformNode;
pub use pcl_source::PointCloudSourceNode;
pub use radar_cluster::RadarClusterNode;
pub use radar_csv_sink::RadarCsvSinkNode;
pub use radar_tracking::RadarTrackingNode;
pub use response_sink::ResponseSinkNode;
pub use track_assoc::TrackAssocNode;

use std::time::Duration;

use skein::{Blob, SendStatus, WorkerCtx};

pub(crate) const SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Push a blob downstream, retrying on backpressure until delivered or the
/// pipeline shuts down. An unbound output port swallows the blob (used by
/// optional taps).
pub(crate) fn forward(ctx: &WorkerCtx, mut blob: Blob, port: usize) -> bool {
    loop {
        match ctx.send_output(blob, port, SEND_TIMEOUT) {
            SendStatus::PortFullTimeout(returned) => {
                if ctx.is_shutting_down() {
                    return false;
                }
                blob = returned;
            }
            SendStatus::NullPort(_) => return true,
            SendStatus::Success | SendStatus::PortFullDiscarded => return true,
        }
    }
}
