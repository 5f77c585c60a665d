use std::sync::Arc;
use std::time::{Duration, Instant};

use video_wall::{
    DecodeNode, DisplayNode, Error, MemoryBitstreamReader, PostProcessNode, SimDisplayBackend,
    TilePlacement, UserPicture, WallGraph, WallNodeId, WallNodeKind,
};

fn placement(tile: u32) -> TilePlacement {
    TilePlacement {
        x: 0,
        y: 0,
        width: 960,
        height: 540,
        tile_id: Some(tile),
        fps: 30,
    }
}

fn decode_node(stream_id: u32, frames: usize, loop_input: bool) -> DecodeNode {
    DecodeNode::new(
        stream_id,
        1920,
        1080,
        loop_input,
        Box::new(MemoryBitstreamReader::synthetic(frames, 128)),
    )
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn bind_legality_and_identity() {
    let backend = Arc::new(SimDisplayBackend::new());
    let mut wall = WallGraph::new();
    let dec = wall.add_decode(0, 1, decode_node(1, 3, false)).unwrap();
    let pp = wall
        .add_postprocess(0, 1, PostProcessNode::new(960, 540))
        .unwrap();
    let disp = wall
        .add_display(0, 1, DisplayNode::new(placement(1), backend.clone()))
        .unwrap();

    // duplicate identity
    assert!(matches!(
        wall.add_decode(0, 1, decode_node(1, 3, false)),
        Err(Error::DuplicatedId(_))
    ));

    // illegal pairing: display can never produce
    assert!(matches!(
        wall.bind(disp, dec),
        Err(Error::IllegalBind { .. })
    ));

    wall.bind(dec, pp).unwrap();
    wall.bind(pp, disp).unwrap();

    // second producer into the same input
    let dec2 = wall.add_decode(0, 2, decode_node(2, 3, false)).unwrap();
    assert!(matches!(
        wall.bind(dec2, pp),
        Err(Error::InputBusy { .. })
    ));

    // unknown id
    let ghost = WallNodeId::new(WallNodeKind::Display, 9, 9);
    assert!(matches!(wall.bind(dec2, ghost), Err(Error::InvalidId(_))));
}

#[test]
fn decode_postprocess_display_end_to_end() {
    let backend = Arc::new(SimDisplayBackend::new());
    let mut wall = WallGraph::new();
    let dec = wall.add_decode(0, 1, decode_node(1, 10, false)).unwrap();
    let pp = wall
        .add_postprocess(0, 1, PostProcessNode::new(960, 540))
        .unwrap();
    let disp = wall
        .add_display(0, 1, DisplayNode::new(placement(7), backend.clone()))
        .unwrap();
    wall.bind(dec, pp).unwrap();
    wall.bind(pp, disp).unwrap();
    wall.start().unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || backend.posted_count() >= 10),
        "all frames reached the display"
    );
    let posted = backend.posted();
    assert_eq!(posted[0].tile_id, Some(7));
    // post-processing rewrote the geometry
    assert_eq!(posted[0].width, 960);
    assert_eq!(posted[0].height, 540);
    // per-stream order preserved
    let ids: Vec<u32> = posted.iter().map(|p| p.frame_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    wall.stop();
}

#[test]
fn user_picture_override_and_disable() {
    let backend = Arc::new(SimDisplayBackend::new());
    let mut wall = WallGraph::new();
    // looping input so the stream keeps producing
    let dec = wall.add_decode(0, 1, decode_node(1, 4, true)).unwrap();
    let disp = wall
        .add_display(0, 1, DisplayNode::new(placement(1), backend.clone()))
        .unwrap();
    wall.bind(dec, disp).unwrap();
    wall.start().unwrap();

    assert!(wait_until(Duration::from_secs(10), || backend.posted_count() > 2));

    let control = wall.decode_control(dec).unwrap();
    control.enable_user_pic(UserPicture {
        width: 64,
        height: 48,
        instant: true,
        data: Arc::from(vec![0u8; 64 * 48 * 3 / 2].into_boxed_slice()),
    });
    assert!(
        wait_until(Duration::from_secs(10), || {
            backend.posted().last().map(|p| p.width) == Some(64)
        }),
        "user picture replaced live frames"
    );

    control.disable_user_pic();
    assert!(
        wait_until(Duration::from_secs(10), || {
            backend.posted().last().map(|p| p.width) == Some(1920)
        }),
        "live frames resumed"
    );

    wall.stop();
}

#[test]
fn pause_and_resume_tile() {
    let backend = Arc::new(SimDisplayBackend::new());
    let mut wall = WallGraph::new();
    let dec = wall.add_decode(0, 1, decode_node(1, 100, true)).unwrap();
    let disp = wall
        .add_display(0, 1, DisplayNode::new(placement(1), backend.clone()))
        .unwrap();
    wall.bind(dec, disp).unwrap();

    // control before start is a setup/ctrl mix
    assert!(matches!(
        wall.display_stream(disp),
        Err(Error::MixedSetupAndCtrl)
    ));

    wall.start().unwrap();
    let stream = wall.display_stream(disp).unwrap();
    assert!(wait_until(Duration::from_secs(10), || backend.posted_count() > 0));

    stream.pause();
    std::thread::sleep(Duration::from_millis(50));
    let frozen = backend.posted_count();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(backend.posted_count(), frozen, "paused tile posts nothing");
    // frames keep draining while paused
    assert!(stream.consumed_frames() > frozen as u64);

    stream.resume();
    assert!(
        wait_until(Duration::from_secs(10), || backend.posted_count() > frozen),
        "posting resumed"
    );

    // zoom restricts the posted region
    stream.zoom_in(video_wall::ZoomRect {
        x: 100,
        y: 100,
        width: 320,
        height: 180,
    });
    assert!(wait_until(Duration::from_secs(10), || {
        backend.posted().last().map(|p| (p.width, p.height)) == Some((320, 180))
    }));
    stream.zoom_out();
    assert!(wait_until(Duration::from_secs(10), || {
        backend.posted().last().map(|p| p.width) == Some(1920)
    }));

    wall.stop();
}

#[test]
fn finite_stream_drains_and_stops_cleanly() {
    let backend = Arc::new(SimDisplayBackend::new());
    let mut wall = WallGraph::new();
    let dec = wall.add_decode(0, 1, decode_node(1, 5, false)).unwrap();
    let disp = wall
        .add_display(0, 1, DisplayNode::new(placement(1), backend.clone()))
        .unwrap();
    wall.bind(dec, disp).unwrap();
    wall.start().unwrap();

    assert!(wait_until(Duration::from_secs(10), || backend.posted_count() >= 5));
    // all produced frames were consumed, so the drain succeeds
    wall.stop_decode(dec).unwrap();
    wall.stop();
}
