use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{Point2D, store::RecordId};

use super::zones::{SessionZones, label_anchor};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotOccupancy {
    pub slot_id: RecordId,
    pub label: String,
    pub anchor: Option<Point2D>,
    pub occupied: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OccupancySummary {
    pub slots: Vec<SlotOccupancy>,
    pub total: usize,
    pub occupied: usize,
    pub available: usize,
}

impl OccupancySummary {
    /// "available/total", as shown on the annotated frame
    pub fn label(&self) -> String {
        format!("Available Slots: {}/{}", self.available, self.total)
    }

    pub fn is_occupied(&self, slot_id: RecordId) -> Option<bool> {
        self.slots
            .iter()
            .find(|s| s.slot_id == slot_id)
            .map(|s| s.occupied)
    }
}

/// Per-slot occupancy, recomputed from scratch every frame. Remembers the
/// previous frame's state so that changes can be reported.
#[derive(Debug, Default)]
pub struct OccupancyTracker {
    last_state: IndexMap<RecordId, bool>,
}

impl OccupancyTracker {
    pub fn new() -> Self {
        OccupancyTracker::default()
    }

    /// Returns the summary for this frame and the slots whose state changed
    /// since the previous frame
    pub fn update(
        &mut self,
        zones: &SessionZones,
        centroids: &[Point2D],
    ) -> (OccupancySummary, Vec<SlotOccupancy>) {
        let mut slots_changed = Vec::new();

        let slots: Vec<SlotOccupancy> = zones
            .slots()
            .iter()
            .map(|zone| {
                let occupied = centroids.iter().any(|c| zone.polygon.contains(c));
                SlotOccupancy {
                    slot_id: zone.slot_id,
                    label: zone.label.clone(),
                    anchor: label_anchor(&zone.polygon),
                    occupied,
                }
            })
            .collect();

        for slot in slots.iter() {
            let previous = self.last_state.insert(slot.slot_id, slot.occupied);
            if previous.unwrap_or(false) != slot.occupied {
                debug!("SLOT CHANGED: {:?}", slot);
                slots_changed.push(slot.clone());
            }
        }

        let total = slots.len();
        let occupied = slots.iter().filter(|s| s.occupied).count();
        (
            OccupancySummary {
                slots,
                total,
                occupied,
                available: total - occupied,
            },
            slots_changed,
        )
    }

    pub fn clear(&mut self) {
        self.last_state.clear();
    }
}
