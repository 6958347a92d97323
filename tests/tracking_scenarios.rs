use parking_occupancy::{
    monitor_config::MonitorConfig,
    polygon::Polygon,
    session::TrackingSession,
    systems::zones::{SessionZones, SlotZone},
    tracking::{BoundingBox, Detection, TrackId},
    video_interface::{
        Detector, DetectorError, JsonLinesSink, PassthroughDetector, RecordedFrame, ReplaySource,
        StopSignal, read_json_lines, run_session,
    },
};

fn check_in() -> Polygon {
    Polygon::new(vec![(100., 100.), (200., 100.), (200., 200.), (100., 200.)])
}

fn slot() -> Polygon {
    Polygon::new(vec![(0., 0.), (10., 0.), (10., 10.), (0., 10.)])
}

fn zones() -> SessionZones {
    SessionZones::new(vec![check_in()], vec![SlotZone::new(1, slot())])
}

fn at(track_id: TrackId, bbox: BoundingBox) -> Detection {
    Detection::new(bbox, 0.9, track_id)
}

fn entering(track_id: TrackId) -> Detection {
    at(track_id, BoundingBox::new(140., 140., 160., 160.))
}

fn started(config: &MonitorConfig) -> TrackingSession {
    let mut session = TrackingSession::new(config, zones());
    session.start(&mut PassthroughDetector).unwrap();
    session
}

#[test]
fn tickets_are_issued_first_come_first_served() {
    let config = MonitorConfig {
        ticket_seed: vec![0, 1, 1],
        ..Default::default()
    };
    let mut session = started(&config);

    let mut issued = Vec::new();
    for track_id in [11, 12, 13, 14] {
        let result = session.process_frame(&[entering(track_id)]).unwrap();
        issued.push(result.new_bindings.first().map(|b| b.ticket));
    }
    assert_eq!(issued, vec![Some(0), Some(1), Some(1), None]);

    let bindings: Vec<(TrackId, i64)> = session.bindings().iter().map(|(k, v)| (*k, *v)).collect();
    assert_eq!(bindings, vec![(11, 0), (12, 1), (13, 1)]);
}

#[test]
fn slot_occupancy_follows_box_centroid() {
    let mut session = started(&MonitorConfig::default());

    let parked = session
        .process_frame(&[at(1, BoundingBox::new(2., 2., 4., 4.))])
        .unwrap();
    assert_eq!(parked.occupancy.is_occupied(1), Some(true));
    assert_eq!(parked.occupancy.available, 0);
    assert_eq!(parked.occupancy.total, 1);

    let away = session
        .process_frame(&[at(1, BoundingBox::new(20., 20., 24., 24.))])
        .unwrap();
    assert_eq!(away.occupancy.is_occupied(1), Some(false));
    assert_eq!(away.occupancy.available, 1);
}

#[test]
fn invalid_ticket_in_slot_is_a_violation_only_while_parked() {
    let config = MonitorConfig {
        ticket_seed: vec![1],
        invalid_ticket: 1,
        ..Default::default()
    };
    let mut session = started(&config);

    let checked_in = session.process_frame(&[entering(5)]).unwrap();
    assert!(checked_in.violations.is_empty());

    let parked = session
        .process_frame(&[at(5, BoundingBox::new(2., 2., 4., 4.))])
        .unwrap();
    assert_eq!(parked.violations.len(), 1);
    assert_eq!(parked.violations[0].track_id, 5);

    let left = session
        .process_frame(&[at(5, BoundingBox::new(40., 40., 44., 44.))])
        .unwrap();
    assert!(left.violations.is_empty());
}

#[test]
fn sentinel_polarity_is_configurable() {
    let config = MonitorConfig {
        ticket_seed: vec![0],
        invalid_ticket: 0,
        ..Default::default()
    };
    let mut session = started(&config);
    session.process_frame(&[entering(5)]).unwrap();
    let parked = session
        .process_frame(&[at(5, BoundingBox::new(2., 2., 4., 4.))])
        .unwrap();
    assert!(parked.has_violations());
}

#[test]
fn unticketed_track_in_slot_is_not_a_violation() {
    let config = MonitorConfig {
        ticket_seed: vec![],
        ..Default::default()
    };
    let mut session = started(&config);
    session.process_frame(&[entering(5)]).unwrap();
    let parked = session
        .process_frame(&[at(5, BoundingBox::new(2., 2., 4., 4.))])
        .unwrap();
    assert!(!parked.has_violations());
    assert_eq!(parked.annotations[0].label, "ID: 5");
}

#[test]
fn restarting_reseeds_the_queue() {
    let config = MonitorConfig {
        ticket_seed: vec![0],
        ..Default::default()
    };
    let mut first = started(&config);
    first.process_frame(&[entering(1)]).unwrap();
    first.stop();

    let mut second = started(&config);
    let result = second.process_frame(&[entering(2)]).unwrap();
    assert_eq!(result.new_bindings[0].ticket, 0);
}

/// Fails on every frame whose index is listed
struct FlakyDetector {
    failing: Vec<usize>,
}

impl Detector<RecordedFrame> for FlakyDetector {
    fn infer(&mut self, frame: &RecordedFrame) -> Result<Vec<Detection>, DetectorError> {
        if self.failing.contains(&frame.frame_index) {
            Err(DetectorError::Inference(format!(
                "no result for frame {}",
                frame.frame_index
            )))
        } else {
            Ok(frame.detections.clone())
        }
    }
}

#[test]
fn detector_failure_skips_only_that_frame() {
    let frames: Vec<RecordedFrame> = (0..4)
        .map(|i| RecordedFrame {
            frame_index: i,
            width: 640,
            height: 480,
            detections: vec![entering(i as TrackId + 1)],
        })
        .collect();
    let config = MonitorConfig {
        ticket_seed: vec![0, 1, 1, 0],
        ..Default::default()
    };
    let mut session = TrackingSession::new(&config, zones());
    let mut sink = JsonLinesSink::new(Vec::new());

    let summary = run_session(
        &mut session,
        &mut ReplaySource::from_frames(frames),
        &mut FlakyDetector { failing: vec![1] },
        &mut sink,
        &StopSignal::new(),
        config.min_frame_dimension,
    )
    .unwrap();

    assert_eq!(summary.frames_read, 4);
    assert_eq!(summary.frames_processed, 3);
    assert_eq!(summary.frames_skipped, 1);
    assert_eq!(summary.tickets_issued, 3);

    let records = read_json_lines(sink.into_inner().as_slice()).unwrap();
    let indices: Vec<u64> = records
        .iter()
        .map(|r| r["frameIndex"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, vec![0, 2, 3]);
    // Track 2 never reached the tracker, so track 3 got the second ticket
    assert_eq!(records[1]["newBindings"][0]["trackId"], 3);
    assert_eq!(records[1]["newBindings"][0]["ticket"], 1);
}

#[test]
fn stop_signal_from_another_thread_ends_at_frame_boundary() {
    let stop = StopSignal::new();
    let remote = stop.clone();
    std::thread::spawn(move || remote.stop()).join().unwrap();

    let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
    let summary = run_session(
        &mut session,
        &mut ReplaySource::from_frames(vec![RecordedFrame {
            frame_index: 0,
            width: 640,
            height: 480,
            detections: vec![],
        }]),
        &mut PassthroughDetector,
        &mut JsonLinesSink::new(Vec::new()),
        &stop,
        1,
    )
    .unwrap();
    assert!(summary.stopped_early);
    assert!(session.bindings().is_empty());
}
