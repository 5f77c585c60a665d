use std::path::{Path, PathBuf};

use radar_track::{PointCloud, RadarConfig};
use serde::Deserialize;
use skein::{
    Blob, Buffer, ConfigMap, Error as SkeinError, FrameView, Node, NodeWorker, SendStatus,
    WorkerCtx, WorkerFlow, END_OF_REQUEST,
};
use tracing::{info, warn};

use super::SEND_TIMEOUT;
use crate::types::CaptureStamp;

/// One detection row of a recorded point-cloud CSV. Rows are grouped into
/// frames by `frameId`; frame ids must be non-decreasing in the file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointRow {
    frame_id: u32,
    range: f64,
    speed: f64,
    snr: f64,
    aoa_deg: f64,
}

/// Replay source for recorded radar point clouds.
///
/// Reads the CSV named by the radar configuration's `CSVFilePath`, emits one
/// blob per recorded frame (point cloud plus the radar configuration as
/// buffer metadata), replays the file `csvRepeatNum` additional times, then
/// tags end-of-request and finishes. An externally requested EOS cuts the
/// replay short.
pub struct PointCloudSourceNode {
    stream_id: u32,
    config: Option<RadarConfig>,
    config_path: Option<PathBuf>,
}

impl PointCloudSourceNode {
    pub fn boxed() -> Box<dyn Node> {
        Box::new(Self {
            stream_id: 0,
            config: None,
            config_path: None,
        })
    }

    /// Bypass file-based configuration with a ready radar config (whose
    /// `csv_file_path` names the recording).
    pub fn with_config(stream_id: u32, config: RadarConfig) -> Box<dyn Node> {
        Box::new(Self {
            stream_id,
            config: Some(config),
            config_path: None,
        })
    }
}

impl Node for PointCloudSourceNode {
    fn kind(&self) -> &'static str {
        "radar-pcl-source"
    }
    fn in_port_count(&self) -> usize {
        0
    }
    fn out_port_count(&self) -> usize {
        1
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if let Some(path) = config.opt_str("radarConfigPath")? {
            self.config_path = Some(PathBuf::from(path));
        }
        if let Some(stream) = config.opt_int("streamId")? {
            self.stream_id = stream as u32;
        }
        Ok(())
    }

    fn validate(&self) -> skein::Result<()> {
        if self.config.is_none() && self.config_path.is_none() {
            return Err(SkeinError::MissingKey("radarConfigPath".into()));
        }
        Ok(())
    }

    fn prepare(&mut self) -> skein::Result<()> {
        if self.config.is_none() {
            let path = self.config_path.as_ref().expect("validated");
            let json = std::fs::read_to_string(path)?;
            let config = RadarConfig::from_json_str(&json).map_err(SkeinError::node_fail)?;
            self.config = Some(config);
        }
        let config = self.config.as_ref().expect("just set");
        if config.csv_file_path.is_none() {
            return Err(SkeinError::MissingKey("CSVFilePath".into()));
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        let config = self.config.clone().expect("prepared");
        Box::new(PointCloudSourceWorker {
            stream_id: self.stream_id,
            repeats_left: config.csv_repeat_num,
            config,
            frames: Vec::new(),
            cursor: 0,
            next_frame_id: 0,
        })
    }
}

/// Parse a recording into per-frame point clouds.
pub(crate) fn load_point_cloud_csv(path: &Path) -> crate::Result<Vec<PointCloud>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut frames: Vec<PointCloud> = Vec::new();
    let mut current_id: Option<u32> = None;
    for row in reader.deserialize() {
        let row: PointRow = row?;
        if current_id != Some(row.frame_id) {
            frames.push(PointCloud::new());
            current_id = Some(row.frame_id);
        }
        frames
            .last_mut()
            .expect("pushed above")
            .push(row.range, row.speed, row.snr, row.aoa_deg);
    }
    Ok(frames)
}

struct PointCloudSourceWorker {
    stream_id: u32,
    config: RadarConfig,
    repeats_left: u32,
    frames: Vec<PointCloud>,
    cursor: usize,
    next_frame_id: u32,
}

impl PointCloudSourceWorker {
    fn make_blob(&mut self, cloud: PointCloud, eos: bool) -> Blob {
        let mut view = FrameView::new(self.next_frame_id, 0, 0);
        if eos {
            view.tag = END_OF_REQUEST;
        }
        let mut buffer = Buffer::meta_frame(view);
        buffer.set_meta(self.config.clone());
        buffer.set_meta(cloud);
        buffer.set_meta(CaptureStamp::now());
        let mut blob = Blob::new(self.stream_id, self.next_frame_id);
        blob.push(buffer);
        self.next_frame_id += 1;
        blob
    }

    fn deliver(&self, ctx: &WorkerCtx, mut blob: Blob) -> bool {
        loop {
            match ctx.send_output(blob, 0, SEND_TIMEOUT) {
                SendStatus::PortFullTimeout(returned) => {
                    if ctx.is_shutting_down() {
                        return false;
                    }
                    blob = returned;
                }
                SendStatus::NullPort(_) => return false,
                SendStatus::Success | SendStatus::PortFullDiscarded => return true,
            }
        }
    }
}

impl NodeWorker for PointCloudSourceWorker {
    fn first_run(&mut self, _ctx: &mut WorkerCtx) {
        let path = PathBuf::from(self.config.csv_file_path.as_deref().unwrap_or_default());
        match load_point_cloud_csv(&path) {
            Ok(frames) => {
                info!(
                    frames = frames.len(),
                    repeats = self.repeats_left,
                    "point cloud recording loaded"
                );
                self.frames = frames;
            }
            Err(e) => warn!("failed to load {}: {e}", path.display()),
        }
    }

    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        if ctx.eos_requested() || self.frames.is_empty() {
            let blob = self.make_blob(PointCloud::new(), true);
            self.deliver(ctx, blob);
            return WorkerFlow::Finished;
        }
        if self.cursor >= self.frames.len() {
            if self.repeats_left == 0 {
                let blob = self.make_blob(PointCloud::new(), true);
                self.deliver(ctx, blob);
                return WorkerFlow::Finished;
            }
            self.repeats_left -= 1;
            self.cursor = 0;
        }
        let cloud = self.frames[self.cursor].clone();
        self.cursor += 1;
        let blob = self.make_blob(cloud, false);
        if !self.deliver(ctx, blob) && ctx.is_shutting_down() {
            return WorkerFlow::Finished;
        }
        WorkerFlow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RECORDING: &str = "\
frameId,range,speed,snr,aoaDeg
0,10.0,0.0,1.0,11.3
0,10.05,0.0,1.0,11.4
1,10.1,0.1,1.0,11.3
2,10.2,0.1,1.0,11.2
2,10.25,0.1,1.0,11.2
2,10.3,0.1,1.0,11.1
";

    #[test]
    fn groups_rows_into_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcl.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(RECORDING.as_bytes()).unwrap();

        let frames = load_point_cloud_csv(&path).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].len(), 2);
        assert_eq!(frames[1].len(), 1);
        assert_eq!(frames[2].len(), 3);
        assert!((frames[2].range[2] - 10.3).abs() < 1e-9);
        assert!((frames[0].aoa_deg[1] - 11.4).abs() < 1e-9);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_point_cloud_csv(Path::new("/definitely/not/here.csv")).is_err());
    }
}
