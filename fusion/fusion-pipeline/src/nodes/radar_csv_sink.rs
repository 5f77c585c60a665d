use std::path::PathBuf;

use radar_track::ClusterOutput;
use skein::{
    ConfigMap, EosTally, Error as SkeinError, EventId, EventPayload, Node, NodeWorker, WorkerCtx,
    WorkerFlow,
};
use tracing::{info, warn};

use crate::csv_sink::UnionCsvWriter;
use crate::types::TrackerOutput;

/// File sink for the radar-only chain.
///
/// Emits one CSV row per frame with whatever clustering/tracking metadata
/// the frame carries; the header is the union of keys observed so far and is
/// rewritten when a new key appears. Emits the pipeline finish event once
/// every stream has drained its end-of-request marker.
#[derive(Debug, Default)]
pub struct RadarCsvSinkNode {
    path: Option<PathBuf>,
    expected_streams: usize,
}

impl RadarCsvSinkNode {
    pub fn boxed() -> Box<dyn Node> {
        Box::new(Self::default())
    }

    pub fn with_path(path: PathBuf, expected_streams: usize) -> Box<dyn Node> {
        Box::new(Self {
            path: Some(path),
            expected_streams,
        })
    }
}

impl Node for RadarCsvSinkNode {
    fn kind(&self) -> &'static str {
        "radar-csv-sink"
    }
    fn in_port_count(&self) -> usize {
        1
    }
    fn out_port_count(&self) -> usize {
        0
    }

    fn configure(&mut self, config: &ConfigMap) -> skein::Result<()> {
        if let Some(path) = config.opt_str("resultPath")? {
            self.path = Some(PathBuf::from(path));
        }
        if let Some(n) = config.opt_int("streamNum")? {
            self.expected_streams = n as usize;
        }
        Ok(())
    }

    fn validate(&self) -> skein::Result<()> {
        if self.path.is_none() {
            return Err(SkeinError::MissingKey("resultPath".into()));
        }
        Ok(())
    }

    fn new_worker(&mut self, _worker_idx: usize) -> Box<dyn NodeWorker> {
        let expected = self.expected_streams.max(1);
        Box::new(RadarCsvSinkWorker {
            writer: UnionCsvWriter::create(self.path.as_ref().expect("validated")),
            tally: EosTally::new(expected),
            expected,
        })
    }
}

struct RadarCsvSinkWorker {
    writer: UnionCsvWriter,
    tally: EosTally,
    expected: usize,
}

impl NodeWorker for RadarCsvSinkWorker {
    fn process(&mut self, ctx: &mut WorkerCtx) -> WorkerFlow {
        let got = ctx.get_batched_input(&[0]);
        for blob in got {
            if let Some(buf) = blob.get(0) {
                if !blob.is_eos() || buf.contains_meta::<ClusterOutput>() {
                    let mut row: Vec<(String, Vec<String>)> = vec![
                        ("frameId".into(), vec![blob.frame_id.to_string()]),
                        ("streamId".into(), vec![blob.stream_id.to_string()]),
                    ];
                    if let Some(clusters) = buf.get_meta::<ClusterOutput>() {
                        row.push((
                            "numClusters".into(),
                            vec![clusters.num_clusters.to_string()],
                        ));
                        row.push((
                            "clusterLabels".into(),
                            clusters.labels.iter().map(|l| l.to_string()).collect(),
                        ));
                    }
                    if let Some(tracker) = buf.get_meta::<TrackerOutput>() {
                        row.push((
                            "trackIds".into(),
                            tracker
                                .tracks
                                .iter()
                                .map(|t| t.track_id.to_string())
                                .collect(),
                        ));
                        for (key, pick) in [
                            ("trackX", 0usize),
                            ("trackY", 1),
                            ("trackVx", 2),
                            ("trackVy", 3),
                        ] {
                            row.push((
                                key.into(),
                                tracker
                                    .tracks
                                    .iter()
                                    .map(|t| format!("{:.3}", t.s[pick]))
                                    .collect(),
                            ));
                        }
                    }
                    if let Err(e) = self.writer.write_row(&row) {
                        warn!(frame = blob.frame_id, "csv write failed: {e}");
                    }
                }
            }
            if self.tally.observe(&blob) {
                info!("radar csv sink drained all streams");
                ctx.emit_event(
                    EventId::Finish,
                    &EventPayload::Finish {
                        stream_count: self.expected,
                    },
                );
                return WorkerFlow::Finished;
            }
        }
        WorkerFlow::Continue
    }
}
