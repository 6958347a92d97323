//! One video-processing session for one camera: `Idle` until started,
//! `Running` while frames are fed in, `Stopped` for good afterwards.

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::{
    Point2D,
    monitor_config::MonitorConfig,
    store::RecordId,
    systems::{
        Systems,
        occupancy::{OccupancySummary, SlotOccupancy},
        ticketing::{TicketBinding, TrackState},
        zones::SessionZones,
    },
    tracking::{BoundingBox, Detection, TicketValue, TrackId},
    video_interface::Detector,
};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is {0:?}, expected {1:?}")]
    InvalidState(SessionState, SessionState),

    #[error("video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("video source has no readable frames")]
    EmptySource,

    #[error("camera {0} not found")]
    UnknownCamera(RecordId),
}

/// Everything a renderer needs to draw one detection
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionAnnotation {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub centroid: Point2D,
    pub track_id: TrackId,
    pub ticket: Option<TicketValue>,
    pub label: String,
    pub in_check_in: bool,
    pub slot_id: Option<RecordId>,
    pub violation: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameResult {
    /// All bindings made so far this session
    pub bindings: TrackState,
    /// Bindings made during this frame, in detector order
    pub new_bindings: Vec<TicketBinding>,
    /// Detections holding the invalid ticket while inside a slot
    pub violations: Vec<Detection>,
    pub occupancy: OccupancySummary,
    /// Slots whose occupied state differs from the previous frame
    pub occupancy_changes: Vec<SlotOccupancy>,
    /// One per retained detection, in detector order
    pub annotations: Vec<DetectionAnnotation>,
}

impl FrameResult {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

pub struct TrackingSession {
    state: SessionState,
    confidence_threshold: f32,
    systems: Systems,
    frames_processed: usize,
    violations_seen: usize,
}

impl TrackingSession {
    pub fn new(config: &MonitorConfig, zones: SessionZones) -> Self {
        TrackingSession {
            state: SessionState::Idle,
            confidence_threshold: config.confidence_threshold,
            systems: Systems::new(config, zones),
            frames_processed: 0,
            violations_seen: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Clear track state, reseed the ticket queue and reset the detector's
    /// own tracking if it can be reset
    pub fn start<F, D>(&mut self, detector: &mut D) -> Result<(), SessionError>
    where
        D: Detector<F> + ?Sized,
    {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState(self.state, SessionState::Idle));
        }
        self.systems.reset();
        self.frames_processed = 0;
        self.violations_seen = 0;

        if detector.supports_reset() {
            detector.reset();
            info!("Reset detector tracking state");
        } else {
            debug!("Detector does not support reset; proceeding without reset");
        }

        self.state = SessionState::Running;
        info!("Tracking session started");
        Ok(())
    }

    pub fn process_frame(&mut self, detections: &[Detection]) -> Result<FrameResult, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::InvalidState(
                self.state,
                SessionState::Running,
            ));
        }

        let Systems {
            zones,
            occupancy_tracker,
            ticketing_system,
        } = &mut self.systems;

        let retained: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence > self.confidence_threshold)
            .collect();
        if retained.len() < detections.len() {
            debug!(
                "Dropped {} of {} detections at or below confidence {}",
                detections.len() - retained.len(),
                detections.len(),
                self.confidence_threshold
            );
        }

        let mut new_bindings = Vec::new();
        let mut violations = Vec::new();
        let mut annotations = Vec::with_capacity(retained.len());
        let mut centroids = Vec::with_capacity(retained.len());

        for detection in retained {
            let centroid = detection.centroid();
            centroids.push(centroid);

            let in_check_in = zones.in_check_in(&centroid);
            let slot_id = zones.slot_containing(&centroid).map(|s| s.slot_id);

            if let Some(binding) =
                ticketing_system.observe(detection.track_id, in_check_in, slot_id.is_some())
            {
                new_bindings.push(binding);
            }

            let violation = ticketing_system.is_violation(detection.track_id, slot_id.is_some());
            if violation {
                warn!(
                    "Invalid ticket: track {} is in slot {:?}",
                    detection.track_id, slot_id
                );
                violations.push(detection.clone());
            }

            let ticket = ticketing_system.ticket_for(detection.track_id);
            annotations.push(DetectionAnnotation {
                bbox: detection.bbox,
                centroid,
                track_id: detection.track_id,
                ticket,
                label: match ticket {
                    Some(t) => format!("ID: {}, Ticket: {}", detection.track_id, t),
                    None => format!("ID: {}", detection.track_id),
                },
                in_check_in,
                slot_id,
                violation,
            });
        }

        let (occupancy, occupancy_changes) = occupancy_tracker.update(zones, &centroids);
        if !occupancy_changes.is_empty() {
            debug!("{}", occupancy.label());
        }

        self.frames_processed += 1;
        self.violations_seen += violations.len();

        Ok(FrameResult {
            bindings: ticketing_system.bindings().clone(),
            new_bindings,
            violations,
            occupancy,
            occupancy_changes,
            annotations,
        })
    }

    /// Terminal; track state and the remaining queue are discarded
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        info!(
            "Tracking session stopped after {} frames; {} tickets issued, {} violations",
            self.frames_processed,
            self.systems.ticketing_system.tickets_issued(),
            self.violations_seen
        );
        self.systems.reset();
        self.state = SessionState::Stopped;
    }

    pub fn bindings(&self) -> &TrackState {
        self.systems.ticketing_system.bindings()
    }

    pub fn zones(&self) -> &SessionZones {
        &self.systems.zones
    }

    pub fn tickets_issued(&self) -> usize {
        self.systems.ticketing_system.tickets_issued()
    }

    pub fn violations_seen(&self) -> usize {
        self.violations_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{polygon::Polygon, systems::zones::SlotZone, video_interface::DetectorError};

    struct NullDetector {
        resettable: bool,
        resets: usize,
    }

    impl Detector<()> for NullDetector {
        fn supports_reset(&self) -> bool {
            self.resettable
        }

        fn reset(&mut self) {
            self.resets += 1;
        }

        fn infer(&mut self, _frame: &()) -> Result<Vec<Detection>, DetectorError> {
            Ok(vec![])
        }
    }

    fn detector() -> NullDetector {
        NullDetector {
            resettable: true,
            resets: 0,
        }
    }

    fn zones() -> SessionZones {
        SessionZones::new(
            vec![Polygon::new(vec![
                (100., 100.),
                (200., 100.),
                (200., 200.),
                (100., 200.),
            ])],
            vec![SlotZone::new(
                1,
                Polygon::new(vec![(0., 0.), (10., 0.), (10., 10.), (0., 10.)]),
            )],
        )
    }

    fn car(track_id: TrackId, cx: f64, cy: f64, confidence: f32) -> Detection {
        Detection::new(
            BoundingBox::new(cx - 1., cy - 1., cx + 1., cy + 1.),
            confidence,
            track_id,
        )
    }

    #[test]
    fn frames_rejected_unless_running() {
        let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
        assert!(matches!(
            session.process_frame(&[]),
            Err(SessionError::InvalidState(SessionState::Idle, _))
        ));
        session.start(&mut detector()).unwrap();
        assert!(session.process_frame(&[]).is_ok());
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(session.process_frame(&[]).is_err());
        assert!(session.start(&mut detector()).is_err());
    }

    #[test]
    fn start_resets_detector_only_if_supported() {
        let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
        let mut d = detector();
        session.start(&mut d).unwrap();
        assert_eq!(d.resets, 1);

        let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
        let mut d = NullDetector {
            resettable: false,
            resets: 0,
        };
        session.start(&mut d).unwrap();
        assert_eq!(d.resets, 0);
    }

    #[test]
    fn low_confidence_is_ignored_entirely() {
        let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
        session.start(&mut detector()).unwrap();
        // Exactly at the threshold is dropped too
        let result = session
            .process_frame(&[car(1, 150., 150., 0.75), car(2, 5., 5., 0.5)])
            .unwrap();
        assert!(result.annotations.is_empty());
        assert!(result.bindings.is_empty());
        assert_eq!(result.occupancy.occupied, 0);
    }

    #[test]
    fn same_frame_entrants_are_served_in_detector_order() {
        let config = MonitorConfig {
            ticket_seed: vec![0, 1],
            ..Default::default()
        };
        let mut session = TrackingSession::new(&config, zones());
        session.start(&mut detector()).unwrap();
        let result = session
            .process_frame(&[car(9, 150., 150., 0.9), car(4, 160., 160., 0.9)])
            .unwrap();
        assert_eq!(
            result.new_bindings,
            vec![
                TicketBinding {
                    track_id: 9,
                    ticket: 0
                },
                TicketBinding {
                    track_id: 4,
                    ticket: 1
                }
            ]
        );
        assert_eq!(result.annotations[0].label, "ID: 9, Ticket: 0");
        assert!(result.annotations[0].in_check_in);
    }

    #[test]
    fn violation_flags_invalid_ticket_in_slot() {
        let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
        session.start(&mut detector()).unwrap();
        // Default seed hands out 1 first, which is the invalid sentinel
        session.process_frame(&[car(3, 150., 150., 0.9)]).unwrap();
        let result = session.process_frame(&[car(3, 5., 5., 0.9)]).unwrap();
        assert!(result.has_violations());
        assert_eq!(result.annotations[0].slot_id, Some(1));
        assert!(result.annotations[0].violation);
        assert_eq!(session.violations_seen(), 1);
    }

    #[test]
    fn stop_discards_bindings() {
        let mut session = TrackingSession::new(&MonitorConfig::default(), zones());
        session.start(&mut detector()).unwrap();
        session.process_frame(&[car(3, 150., 150., 0.9)]).unwrap();
        assert_eq!(session.bindings().len(), 1);
        session.stop();
        assert!(session.bindings().is_empty());
    }
}
