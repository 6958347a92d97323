use approx::assert_relative_eq;
use rand::{Rng, SeedableRng, rngs::StdRng};

use parking_occupancy::{
    calibration::{CalibrationError, CalibrationSession},
    homography::{Correspondence, Homography, HomographyError, RansacSettings, estimate},
    monitor_config::{MonitorConfig, ZoneSpace},
    polygon::{Polygon, QuadCoords, contains},
    session::TrackingSession,
    store::{CameraRecord, CameraSlotRecord, JsonStore, Repository},
    systems::{
        position_remapping::{PositionRemapping, map_point},
        zones::SessionZones,
    },
    tracking::{BoundingBox, Detection},
    video_interface::PassthroughDetector,
};

/// A mild perspective: the far end of the lot is squeezed in the camera view
fn camera_to_map() -> Homography {
    Homography::from_array([[1.2, 0.15, 30.], [0.05, 1.6, 12.], [0.0002, 0.0011, 1.]])
}

fn pairs(h: &Homography, sources: &[(f64, f64)]) -> Vec<Correspondence> {
    sources
        .iter()
        .map(|&s| Correspondence::new(s, h.apply(s).unwrap()))
        .collect()
}

#[test]
fn calibration_persists_and_recovers_transform() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("parking.json");
    let truth = camera_to_map();

    {
        let store = JsonStore::open(&path).unwrap();
        let mut calibration = CalibrationSession::new(store, 3, RansacSettings::default());
        for c in pairs(&truth, &[(50., 60.), (600., 40.), (620., 450.), (30., 420.), (320., 240.)]) {
            calibration.add_correspondence(c.source, c.destination).unwrap();
        }
    }

    let store = JsonStore::open(&path).unwrap();
    assert_eq!(store.correspondences(3).len(), 5);

    let mut calibration = CalibrationSession::new(store, 3, RansacSettings::default());
    let estimate = calibration.recompute_homography().unwrap();
    assert_eq!(estimate.inlier_count(), 5);

    let probe = (200., 300.);
    let expected = truth.apply(probe).unwrap();
    let got = map_point(probe, calibration.homography()).unwrap();
    assert_relative_eq!(got.0, expected.0, epsilon = 1e-6);
    assert_relative_eq!(got.1, expected.1, epsilon = 1e-6);
}

#[test]
fn stale_homography_is_not_handed_out() {
    let mut calibration =
        CalibrationSession::new(JsonStore::in_memory(), 1, RansacSettings::default());
    for c in pairs(
        &camera_to_map(),
        &[(0., 0.), (100., 0.), (100., 100.), (0., 100.)],
    ) {
        calibration.add_correspondence(c.source, c.destination).unwrap();
    }
    calibration.recompute_homography().unwrap();
    assert!(calibration.homography().is_some());

    calibration.add_correspondence((50., 50.), (80., 90.)).unwrap();
    assert!(calibration.homography().is_none());
    assert!(map_point((1., 1.), calibration.homography()).is_err());
}

#[test]
fn three_points_never_give_a_homography() {
    let mut calibration =
        CalibrationSession::new(JsonStore::in_memory(), 1, RansacSettings::default());
    calibration.add_correspondence((0., 0.), (0., 0.)).unwrap();
    calibration.add_correspondence((1., 0.), (1., 0.)).unwrap();
    calibration.add_correspondence((0., 1.), (0., 1.)).unwrap();
    match calibration.recompute_homography() {
        Err(CalibrationError::Homography(HomographyError::InsufficientCorrespondences {
            found: 3,
            required: 4,
        })) => {}
        other => panic!("expected insufficient correspondences, got {other:?}"),
    }
}

#[test]
fn map_round_trip_for_random_points() {
    let mut rng = StdRng::seed_from_u64(7);
    let remapping = PositionRemapping::new(Some(camera_to_map())).unwrap();
    for _ in 0..200 {
        let p = (rng.random_range(0.0..1920.0), rng.random_range(0.0..1080.0));
        let back = remapping
            .map_to_camera(remapping.camera_to_map(p).unwrap())
            .unwrap();
        assert_relative_eq!(back.0, p.0, epsilon = 1e-6);
        assert_relative_eq!(back.1, p.1, epsilon = 1e-6);
    }
}

#[test]
fn boxes_inside_and_outside_random_convex_quads() {
    let mut rng = StdRng::seed_from_u64(2024);
    for _ in 0..100 {
        // A rectangle, then a random invertible affine map keeps it a convex quad
        let (w, h) = (rng.random_range(20.0..200.0), rng.random_range(20.0..200.0));
        let a = rng.random_range(0.5..2.0);
        let d = rng.random_range(0.5..2.0);
        let b = rng.random_range(-0.4..0.4);
        let c = rng.random_range(-0.4..0.4);
        let (tx, ty) = (rng.random_range(-500.0..500.0), rng.random_range(-500.0..500.0));
        let affine = |(x, y): (f64, f64)| (a * x + b * y + tx, c * x + d * y + ty);

        let quad = Polygon::new(
            [(0., 0.), (w, 0.), (w, h), (0., h)]
                .into_iter()
                .map(affine)
                .collect(),
        );

        // Box centre well inside the rectangle (away from the nudged band)
        let u = rng.random_range(0.2..0.8);
        let v = rng.random_range(0.2..0.8);
        let inside = affine((u * w, v * h));
        let bbox = BoundingBox::new(inside.0 - 1., inside.1 - 1., inside.0 + 1., inside.1 + 1.);
        assert!(contains(&bbox.centroid(), &quad), "{:?} in {:?}", inside, quad);

        // Far away from the quad entirely
        let outside = affine((w * 3. + 10., h * 3. + 10.));
        assert!(!contains(&outside, &quad));
    }
}

#[test]
fn map_space_zones_track_through_calibration() {
    let truth = camera_to_map();
    let mut store = JsonStore::in_memory();
    store
        .upsert_camera(CameraRecord {
            id: 1,
            name: Some(String::from("North")),
            video_path: None,
            check_in_loc: None,
            check_in_box: QuadCoords::default(),
            manager: None,
        })
        .unwrap();

    // The slot is authored on the map as the image of camera rect (300..340, 200..240)
    let camera_slot = [(300., 200.), (340., 200.), (340., 240.), (300., 240.)];
    let map_slot = camera_slot.map(|p| truth.apply(p).unwrap());
    store
        .upsert_camera_slot(CameraSlotRecord {
            camera_id: 1,
            slot_id: 42,
            quad: QuadCoords::from_points(map_slot),
        })
        .unwrap();

    let mut calibration = CalibrationSession::new(store, 1, RansacSettings::default());
    for c in pairs(&truth, &[(0., 0.), (640., 0.), (640., 480.), (0., 480.)]) {
        calibration.add_correspondence(c.source, c.destination).unwrap();
    }
    let forward = calibration.recompute_homography().unwrap().homography;
    let remapping = PositionRemapping::new(Some(forward)).unwrap();
    let store = calibration.into_store();
    let camera = store.camera(1).unwrap();

    let config = MonitorConfig {
        zone_space: ZoneSpace::Map,
        ..Default::default()
    };
    let zones = SessionZones::load(&store, &camera, config.zone_space, &remapping);
    assert_eq!(zones.slots().len(), 1);

    let mut session = TrackingSession::new(&config, zones);
    session.start(&mut PassthroughDetector).unwrap();
    let result = session
        .process_frame(&[Detection::new(
            BoundingBox::new(310., 210., 330., 230.),
            0.9,
            8,
        )])
        .unwrap();
    assert_eq!(result.occupancy.is_occupied(42), Some(true));
    assert_eq!(result.annotations[0].slot_id, Some(42));
}

#[test]
fn outliers_do_not_survive_ransac() {
    let truth = camera_to_map();
    let mut correspondences = pairs(
        &truth,
        &[
            (10., 10.),
            (300., 15.),
            (620., 20.),
            (15., 240.),
            (320., 250.),
            (610., 230.),
            (20., 470.),
            (330., 460.),
            (630., 470.),
        ],
    );
    correspondences.push(Correspondence::new((200., 200.), (10., 900.)));

    let est = estimate(&correspondences, &RansacSettings::default()).unwrap();
    assert_eq!(est.inlier_count(), 9);
    assert!(!est.inliers[9]);
    assert!(est.mean_inlier_error() < 1e-6);
}
