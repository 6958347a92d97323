use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    Point2D,
    geometry_utils::centroid,
    monitor_config::ZoneSpace,
    polygon::{Polygon, QuadCoords},
    store::{CameraRecord, RecordId, Repository},
};

use super::position_remapping::PositionRemapping;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckInZone {
    pub polygon: Polygon,
    pub label: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotZone {
    pub slot_id: RecordId,
    pub polygon: Polygon,
    pub label: String,
}

impl SlotZone {
    pub fn new(slot_id: RecordId, polygon: Polygon) -> Self {
        SlotZone {
            slot_id,
            polygon,
            label: format!("Slot {}", slot_id),
        }
    }

    /// Labelled with the slot's stored name when it has one
    pub fn named(slot_id: RecordId, polygon: Polygon, name: Option<String>) -> Self {
        match name {
            Some(name) => SlotZone {
                slot_id,
                polygon,
                label: name,
            },
            None => SlotZone::new(slot_id, polygon),
        }
    }
}

/// Check-in and slot polygons for one camera, already in the detector's
/// (camera frame) coordinate space
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionZones {
    check_ins: Vec<CheckInZone>,
    slots: Vec<SlotZone>,
}

impl SessionZones {
    pub fn new(check_ins: Vec<Polygon>, slots: Vec<SlotZone>) -> Self {
        SessionZones {
            check_ins: check_ins
                .into_iter()
                .map(|polygon| CheckInZone {
                    polygon,
                    label: String::from("Check-in"),
                })
                .collect(),
            slots,
        }
    }

    /// Collect the camera's zones from the store. Incomplete polygons are
    /// skipped; with `ZoneSpace::Map` every polygon is projected into the
    /// camera frame, and polygons that cannot be projected are skipped too.
    pub fn load<R: Repository>(
        repository: &R,
        camera: &CameraRecord,
        zone_space: ZoneSpace,
        remapping: &PositionRemapping,
    ) -> Self {
        let place = |quad: &QuadCoords| -> Option<Polygon> {
            let polygon = Polygon::from_quad(quad)?;
            match zone_space {
                ZoneSpace::Camera => Some(polygon),
                ZoneSpace::Map => remapping.polygon_to_camera(&polygon),
            }
        };

        let mut check_ins = Vec::new();
        match place(&camera.check_in_box) {
            Some(p) => {
                info!("Loaded camera check-in box: {:?}", p.vertices());
                check_ins.push(p);
            }
            None => debug!("No valid check-in box on camera {}", camera.id),
        }
        if let Some(check_in_id) = camera.check_in_loc {
            match repository.check_in(check_in_id) {
                Some(record) => match place(&record.quad) {
                    Some(p) => {
                        info!(
                            "Loaded check-in zone {}: {:?}",
                            check_in_id,
                            p.vertices()
                        );
                        check_ins.push(p);
                    }
                    None => warn!("No valid quadrilateral for check-in zone {}", check_in_id),
                },
                None => warn!(
                    "Camera {} refers to unknown check-in zone {}",
                    camera.id, check_in_id
                ),
            }
        }

        let slots: Vec<SlotZone> = repository
            .camera_slots(camera.id)
            .iter()
            .filter_map(|record| match place(&record.quad) {
                Some(p) => {
                    info!("Loaded slot {}: {:?}", record.slot_id, p.vertices());
                    let name = repository.slot(record.slot_id).and_then(|s| s.name);
                    Some(SlotZone::named(record.slot_id, p, name))
                }
                None => {
                    warn!("No valid quadrilateral found for slot {}", record.slot_id);
                    None
                }
            })
            .collect();

        if check_ins.is_empty() {
            warn!(
                "Camera {} has no check-in zone; no tickets will be issued",
                camera.id
            );
        }

        SessionZones::new(check_ins, slots)
    }

    pub fn check_ins(&self) -> &[CheckInZone] {
        &self.check_ins
    }

    pub fn slots(&self) -> &[SlotZone] {
        &self.slots
    }

    pub fn in_check_in(&self, point: &Point2D) -> bool {
        self.check_ins.iter().any(|z| z.polygon.contains(point))
    }

    /// First slot (in load order) containing the point
    pub fn slot_containing(&self, point: &Point2D) -> Option<&SlotZone> {
        self.slots.iter().find(|s| s.polygon.contains(point))
    }
}

/// Where a renderer should put a zone's label
pub fn label_anchor(polygon: &Polygon) -> Option<Point2D> {
    centroid(polygon.vertices())
}
