use std::time::Duration;

use bev_geom::{CoordinateTransformer, Homography, QMatrix, RegistrationMatrix};
use fusion_pipeline::{
    build_multi_camera_graph, build_single_camera_graph, FusionGraphConfig, FusionResponse,
    MultiCameraFuser, CaptureStamp,
};
use nalgebra::{Matrix3, Matrix4, Matrix4x2};
use radar_track::{
    AoaEstimationType, AssociationPolicy, CfarMethod, PointCloud, RadarBasicConfig,
    RadarClusteringConfig, RadarConfig, RadarDetectionConfig, RadarTrackingConfig, WinType,
};
use skein::{Blob, Buffer, EventId, FrameView, Roi, END_OF_REQUEST};

const SEND_TIMEOUT: Duration = Duration::from_millis(500);

fn radar_config() -> RadarConfig {
    RadarConfig {
        basic: RadarBasicConfig {
            num_rx: 4,
            num_tx: 2,
            start_frequency: 77.0,
            idle: 100.0,
            adc_start_time: 6.0,
            ramp_end_time: 60.0,
            freq_slope_const: 29.98,
            adc_sample_rate: 10.0,
            adc_samples: 256,
            num_chirps: 128,
            fps: 10.0,
        },
        detection: RadarDetectionConfig {
            range_win_type: WinType::Hanning,
            doppler_win_type: WinType::Hanning,
            aoa_estimation_type: AoaEstimationType::Fft,
            doppler_cfar_method: CfarMethod::CaCfar,
            doppler_pfa: 0.001,
            doppler_win_guard_len: 2,
            doppler_win_train_len: 8,
            range_cfar_method: CfarMethod::CaCfar,
            range_pfa: 0.001,
            range_win_guard_len: 2,
            range_win_train_len: 8,
        },
        clustering: RadarClusteringConfig {
            eps: 0.5,
            weight: 0.0,
            min_points_in_cluster: 2,
            max_clusters: 24,
            max_points: 512,
        },
        tracking: RadarTrackingConfig {
            tracker_association_threshold: 1.0,
            measurement_noise_variance: 1.0,
            time_per_frame: 0.1,
            iir_forget_factor: 0.25,
            tracker_active_threshold: 1,
            tracker_forget_threshold: 2,
            association: AssociationPolicy::Greedy,
        },
        csv_file_path: None,
        csv_repeat_num: 0,
    }
}

/// Camera pixels map onto the ground plane with x/100 and y/100 scales, so
/// a ROI centered at pixel (1000, 200) lands at BEV (10, 2).
fn pixel_to_bev_transformer() -> CoordinateTransformer {
    CoordinateTransformer::new(
        QMatrix(Matrix4::identity()),
        RegistrationMatrix(Matrix4x2::zeros()),
        Homography(Matrix3::from_row_slice(&[
            0.01, 0.0, 0.0, //
            0.0, 0.01, 0.0, //
            0.0, 0.0, 1.0,
        ])),
        &[-100, 100, -100, 100, -100, 100],
    )
    .unwrap()
}

fn radar_blob(frame_id: u32, eos: bool) -> Blob {
    let mut view = FrameView::new(frame_id, 0, 0);
    if eos {
        view.tag = END_OF_REQUEST;
    }
    let mut buffer = Buffer::meta_frame(view);
    buffer.set_meta(radar_config());
    let cloud = if eos {
        PointCloud::new()
    } else {
        PointCloud::from_xy_points(&[
            (10.0, 2.0, 0.0),
            (10.05, 2.02, 0.0),
            (9.95, 1.98, 0.0),
        ])
    };
    buffer.set_meta(cloud);
    let mut blob = Blob::new(0, frame_id);
    blob.push(buffer);
    blob
}

fn camera_blob(frame_id: u32, eos: bool, rois: Vec<Roi>) -> Blob {
    let mut view = FrameView::new(frame_id, 1920, 1080);
    if eos {
        view.tag = END_OF_REQUEST;
    }
    let mut buffer = Buffer::frame(view);
    buffer.set_meta(CaptureStamp::now());
    if let Some(slots) = buffer.rois_mut() {
        *slots = rois;
    }
    let mut blob = Blob::new(0, frame_id);
    blob.push(buffer);
    blob
}

fn car_roi(center_x: i32, center_y: i32) -> Roi {
    Roi {
        x: center_x - 20,
        y: center_y - 20,
        width: 40,
        height: 40,
        label_detection: "car".to_string(),
        confidence_detection: 0.9,
        ..Default::default()
    }
}

#[test]
fn single_camera_fusion_end_to_end() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut pipeline = build_single_camera_graph(
        pixel_to_bev_transformer(),
        FusionGraphConfig::default(),
        tx,
    )
    .unwrap();
    pipeline.prepare().unwrap();
    pipeline.start().unwrap();

    let frames = 8u32;
    for frame_id in 1..=frames {
        assert!(pipeline
            .send_to_port(radar_blob(frame_id, false), "radar-clustering", 0, SEND_TIMEOUT)
            .unwrap()
            .is_success());
        // camera sees the same car at BEV (10, 2)
        assert!(pipeline
            .send_to_port(
                camera_blob(frame_id, false, vec![car_roi(1000, 200)]),
                "coordinate-transform",
                0,
                SEND_TIMEOUT,
            )
            .unwrap()
            .is_success());
    }
    let eos_frame = frames + 1;
    pipeline
        .send_to_port(radar_blob(eos_frame, true), "radar-clustering", 0, SEND_TIMEOUT)
        .unwrap();
    pipeline
        .send_to_port(
            camera_blob(eos_frame, true, Vec::new()),
            "coordinate-transform",
            0,
            SEND_TIMEOUT,
        )
        .unwrap();

    pipeline
        .wait_for_event(EventId::Finish, Duration::from_secs(20))
        .unwrap();
    pipeline.stop();

    let responses: Vec<FusionResponse> = rx.try_iter().collect();
    assert_eq!(responses.len(), (frames + 1) as usize);

    // the end-of-request frame has no detections
    let last = responses.last().unwrap();
    assert_eq!(last.status_code, 1);

    // early frames are camera-only (the radar track is still in DETECTION);
    // camera rows carry their camera index
    let first = &responses[0];
    assert_eq!(first.status_code, 0);
    assert!(first.roi_info.iter().all(|r| r.sensor_source == 0));

    // once the track goes ACTIVE, the pair is fused: a radar-paired row
    // (sensor_source -1) carrying the camera's class rather than "dummy"
    let is_fused = |roi: &fusion_pipeline::RoiInfo| roi.sensor_source == -1 && roi.roi_class == "car";
    let fused_frames = responses
        .iter()
        .filter(|r| r.roi_info.iter().any(is_fused))
        .count();
    assert!(fused_frames >= 4, "got {fused_frames} fused frames");

    // a fused row carries the radar state but keeps both rects zero-filled
    let fused_row = responses
        .iter()
        .flat_map(|r| r.roi_info.iter())
        .find(|roi| is_fused(roi))
        .expect("at least one fused row");
    assert_eq!(fused_row.roi, [0; 4]);
    assert_eq!(fused_row.media_birdview_roi, [0.0; 4]);
    assert!((fused_row.fusion_roi_state[0] - 10.0).abs() < 0.5);
    assert!((fused_row.roi_score - 0.9).abs() < 1e-9);
}

#[test]
fn radar_only_chain_replays_recording_into_csv() {
    use fusion_pipeline::nodes::{
        PointCloudSourceNode, RadarClusterNode, RadarCsvSinkNode, RadarTrackingNode,
    };
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let recording = dir.path().join("recording.csv");
    let mut f = std::fs::File::create(&recording).unwrap();
    // two frames, three detections around BEV (10, 2)
    f.write_all(
        b"frameId,range,speed,snr,aoaDeg\n\
          0,10.2,0.0,1.0,11.3\n\
          0,10.25,0.0,1.0,11.4\n\
          1,10.2,0.0,1.0,11.3\n",
    )
    .unwrap();
    drop(f);

    let mut config = radar_config();
    config.csv_file_path = Some(recording.display().to_string());
    config.csv_repeat_num = 1; // replay once more

    let out_csv = dir.path().join("tracks.csv");
    let mut pipeline = skein::Pipeline::new();
    pipeline
        .set_source(PointCloudSourceNode::with_config(0, config), "source")
        .unwrap();
    pipeline
        .add_node(RadarClusterNode::boxed(), "clustering")
        .unwrap();
    pipeline
        .add_node(RadarTrackingNode::boxed(), "tracking")
        .unwrap();
    pipeline
        .add_node(RadarCsvSinkNode::with_path(out_csv.clone(), 1), "sink")
        .unwrap();
    pipeline.link_node("source", 0, "clustering", 0, None).unwrap();
    pipeline.link_node("clustering", 0, "tracking", 0, None).unwrap();
    pipeline.link_node("tracking", 0, "sink", 0, None).unwrap();
    for name in ["source", "clustering", "tracking", "sink"] {
        pipeline.configure_node_by_string(name, "").unwrap();
    }
    pipeline.prepare().unwrap();
    pipeline.start().unwrap();
    pipeline
        .wait_for_event(EventId::Finish, Duration::from_secs(20))
        .unwrap();
    pipeline.stop();

    let content = std::fs::read_to_string(&out_csv).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    // header + 2 frames x 2 passes + the end-of-request row
    assert_eq!(lines.len(), 6, "csv:\n{content}");
    assert!(lines[0].starts_with("frameId,streamId,numClusters"));
    assert!(lines[1].contains(",1,"), "first frame has one cluster");
}

#[test]
fn two_camera_merge_end_to_end() {
    let mut fuser = MultiCameraFuser::new();
    // both cameras share the same planar mapping
    for camera_id in 0..2 {
        fuser.insert_homography(
            camera_id,
            Homography(Matrix3::from_row_slice(&[
                0.01, 0.0, 0.0, //
                0.0, 0.01, 0.0, //
                0.0, 0.0, 1.0,
            ])),
        );
    }
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut pipeline =
        build_multi_camera_graph(2, fuser, FusionGraphConfig::default(), tx).unwrap();
    pipeline.prepare().unwrap();
    pipeline.start().unwrap();

    for frame_id in 1..=3u32 {
        pipeline
            .send_to_port(radar_blob(frame_id, false), "radar-clustering", 0, SEND_TIMEOUT)
            .unwrap();
        // the same car seen from both cameras; projections overlap with
        // IoU far above the 0.5 threshold
        pipeline
            .send_to_port(
                camera_blob(frame_id, false, vec![car_roi(1000, 200)]),
                "camera-fusion",
                0,
                SEND_TIMEOUT,
            )
            .unwrap();
        pipeline
            .send_to_port(
                camera_blob(frame_id, false, vec![car_roi(1010, 200)]),
                "camera-fusion",
                1,
                SEND_TIMEOUT,
            )
            .unwrap();
    }
    let eos = 4u32;
    pipeline
        .send_to_port(radar_blob(eos, true), "radar-clustering", 0, SEND_TIMEOUT)
        .unwrap();
    for port in 0..2 {
        pipeline
            .send_to_port(
                camera_blob(eos, true, Vec::new()),
                "camera-fusion",
                port,
                SEND_TIMEOUT,
            )
            .unwrap();
    }

    pipeline
        .wait_for_event(EventId::Finish, Duration::from_secs(20))
        .unwrap();
    pipeline.stop();

    let responses: Vec<FusionResponse> = rx.try_iter().collect();
    assert_eq!(responses.len(), 4);
    let first = &responses[0];
    assert_eq!(first.status_code, 0);
    // NMS merged the two camera views into a single detection
    let camera_rows = first
        .roi_info
        .iter()
        .filter(|r| r.sensor_source >= 0)
        .count();
    assert_eq!(camera_rows, 1);
    // the higher-confidence view won; both had 0.9 so the left camera's
    // detection is the survivor
    let row = &first.roi_info[first.roi_info.len() - camera_rows];
    assert_eq!(row.sensor_source, 0);
    assert_eq!(row.roi, [980, 180, 40, 40]);
}
