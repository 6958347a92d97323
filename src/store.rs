//! Records for cameras, slots, check-in zones and calibration points, plus a
//! JSON-file backed store.
//!
//! Coordinates are nullable here, the way the editing tools leave them while
//! a polygon or point pair is half-defined. Everything downstream treats a
//! record with a missing coordinate as absent.

use std::{fs, io, path::PathBuf};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Point2D, homography::Correspondence, polygon::QuadCoords};

pub type RecordId = i64;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no {kind} record with id {id}")]
    NotFound { kind: &'static str, id: RecordId },

    #[error("failed to access store file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse store data: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraRecord {
    pub id: RecordId,
    pub name: Option<String>,
    /// Video (or still image) this camera is validated against
    pub video_path: Option<String>,
    /// Check-in zone record this camera watches, if any
    pub check_in_loc: Option<RecordId>,
    /// The camera's own check-in box
    #[serde(flatten)]
    pub check_in_box: QuadCoords,
    pub manager: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotRecord {
    pub id: RecordId,
    pub name: Option<String>,
    pub manager: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRecord {
    pub id: RecordId,
    pub name: Option<String>,
    #[serde(flatten)]
    pub quad: QuadCoords,
    pub manager: Option<String>,
}

/// Where a slot appears in one camera's view
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraSlotRecord {
    pub camera_id: RecordId,
    pub slot_id: RecordId,
    #[serde(flatten)]
    pub quad: QuadCoords,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrespondenceRecord {
    pub id: RecordId,
    pub camera_id: RecordId,
    pub src_x: Option<f64>,
    pub src_y: Option<f64>,
    pub dst_x: Option<f64>,
    pub dst_y: Option<f64>,
}

impl CorrespondenceRecord {
    /// The point pair, or None if any coordinate is missing
    pub fn correspondence(&self) -> Option<Correspondence> {
        Some(Correspondence::new(
            (self.src_x?, self.src_y?),
            (self.dst_x?, self.dst_y?),
        ))
    }

    fn set_points(&mut self, source: Point2D, destination: Point2D) {
        self.src_x = Some(source.0);
        self.src_y = Some(source.1);
        self.dst_x = Some(destination.0);
        self.dst_y = Some(destination.1);
    }
}

/// Access to the persisted records the monitoring core reads and the
/// calibration workflow writes
pub trait Repository {
    fn camera(&self, id: RecordId) -> Option<CameraRecord>;
    fn check_in(&self, id: RecordId) -> Option<CheckInRecord>;
    fn camera_slots(&self, camera_id: RecordId) -> Vec<CameraSlotRecord>;
    fn slot(&self, id: RecordId) -> Option<SlotRecord>;

    fn correspondences(&self, camera_id: RecordId) -> Vec<CorrespondenceRecord>;
    fn correspondence(&self, id: RecordId) -> Option<CorrespondenceRecord>;
    fn add_correspondence(
        &mut self,
        camera_id: RecordId,
        source: Point2D,
        destination: Point2D,
    ) -> Result<CorrespondenceRecord, StoreError>;
    fn update_correspondence(
        &mut self,
        id: RecordId,
        source: Point2D,
        destination: Point2D,
    ) -> Result<CorrespondenceRecord, StoreError>;
    /// Ok(false) if there was nothing to delete
    fn delete_correspondence(&mut self, id: RecordId) -> Result<bool, StoreError>;
    /// Returns how many records were removed
    fn delete_correspondences_for_camera(&mut self, camera_id: RecordId)
    -> Result<usize, StoreError>;
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    #[serde(default)]
    cameras: Vec<CameraRecord>,
    #[serde(default)]
    slots: Vec<SlotRecord>,
    #[serde(default)]
    check_ins: Vec<CheckInRecord>,
    #[serde(default)]
    camera_slots: Vec<CameraSlotRecord>,
    #[serde(default)]
    correspondences: Vec<CorrespondenceRecord>,
}

/// Records kept in memory and, when a path is set, written back to a pretty
/// JSON file after every change
#[derive(Debug, Default)]
pub struct JsonStore {
    data: StoreData,
    path: Option<PathBuf>,
}

impl JsonStore {
    pub fn in_memory() -> Self {
        JsonStore::default()
    }

    /// Load from file; a missing file starts an empty store at that path
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    "Store file not found, will create a blank one at {:?}",
                    &path
                );
                StoreData::default()
            }
            Err(e) => return Err(StoreError::Io { path, source: e }),
            Ok(s) => {
                let data: StoreData = serde_json::from_str(&s)?;
                info!(
                    "Loaded store from {:?}: {} cameras, {} slots, {} correspondences",
                    &path,
                    data.cameras.len(),
                    data.slots.len(),
                    data.correspondences.len()
                );
                data
            }
        };
        Ok(JsonStore {
            data,
            path: Some(path),
        })
    }

    pub fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.data)?;
        match fs::write(path, text) {
            Ok(()) => {
                debug!("Wrote store to file: {:?}", path);
                Ok(())
            }
            Err(e) => {
                error!("Error writing store to file: {:?}", e);
                Err(StoreError::Io {
                    path: path.clone(),
                    source: e,
                })
            }
        }
    }

    pub fn upsert_camera(&mut self, camera: CameraRecord) -> Result<(), StoreError> {
        match self.data.cameras.iter_mut().find(|c| c.id == camera.id) {
            Some(existing) => *existing = camera,
            None => self.data.cameras.push(camera),
        }
        self.save()
    }

    pub fn upsert_slot(&mut self, slot: SlotRecord) -> Result<(), StoreError> {
        match self.data.slots.iter_mut().find(|s| s.id == slot.id) {
            Some(existing) => *existing = slot,
            None => self.data.slots.push(slot),
        }
        self.save()
    }

    pub fn upsert_check_in(&mut self, check_in: CheckInRecord) -> Result<(), StoreError> {
        match self.data.check_ins.iter_mut().find(|c| c.id == check_in.id) {
            Some(existing) => *existing = check_in,
            None => self.data.check_ins.push(check_in),
        }
        self.save()
    }

    /// A camera/slot pair is unique; re-assigning replaces the stored polygon
    pub fn upsert_camera_slot(&mut self, record: CameraSlotRecord) -> Result<(), StoreError> {
        match self
            .data
            .camera_slots
            .iter_mut()
            .find(|r| r.camera_id == record.camera_id && r.slot_id == record.slot_id)
        {
            Some(existing) => *existing = record,
            None => self.data.camera_slots.push(record),
        }
        self.save()
    }

    fn next_correspondence_id(&self) -> RecordId {
        self.data
            .correspondences
            .iter()
            .map(|c| c.id)
            .max()
            .unwrap_or(0)
            + 1
    }
}

impl Repository for JsonStore {
    fn camera(&self, id: RecordId) -> Option<CameraRecord> {
        self.data.cameras.iter().find(|c| c.id == id).cloned()
    }

    fn check_in(&self, id: RecordId) -> Option<CheckInRecord> {
        self.data.check_ins.iter().find(|c| c.id == id).cloned()
    }

    fn camera_slots(&self, camera_id: RecordId) -> Vec<CameraSlotRecord> {
        self.data
            .camera_slots
            .iter()
            .filter(|r| r.camera_id == camera_id)
            .cloned()
            .collect()
    }

    fn slot(&self, id: RecordId) -> Option<SlotRecord> {
        self.data.slots.iter().find(|s| s.id == id).cloned()
    }

    fn correspondences(&self, camera_id: RecordId) -> Vec<CorrespondenceRecord> {
        self.data
            .correspondences
            .iter()
            .filter(|c| c.camera_id == camera_id)
            .cloned()
            .collect()
    }

    fn correspondence(&self, id: RecordId) -> Option<CorrespondenceRecord> {
        self.data.correspondences.iter().find(|c| c.id == id).cloned()
    }

    fn add_correspondence(
        &mut self,
        camera_id: RecordId,
        source: Point2D,
        destination: Point2D,
    ) -> Result<CorrespondenceRecord, StoreError> {
        let mut record = CorrespondenceRecord {
            id: self.next_correspondence_id(),
            camera_id,
            src_x: None,
            src_y: None,
            dst_x: None,
            dst_y: None,
        };
        record.set_points(source, destination);
        self.data.correspondences.push(record.clone());
        self.save()?;
        debug!(
            "Saved correspondence {} for camera {}: {:?} -> {:?}",
            record.id, camera_id, source, destination
        );
        Ok(record)
    }

    fn update_correspondence(
        &mut self,
        id: RecordId,
        source: Point2D,
        destination: Point2D,
    ) -> Result<CorrespondenceRecord, StoreError> {
        let record = self
            .data
            .correspondences
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::NotFound {
                kind: "correspondence",
                id,
            })?;
        record.set_points(source, destination);
        let updated = record.clone();
        self.save()?;
        Ok(updated)
    }

    fn delete_correspondence(&mut self, id: RecordId) -> Result<bool, StoreError> {
        match self.data.correspondences.iter().position(|c| c.id == id) {
            Some(i) => {
                self.data.correspondences.remove(i);
                self.save()?;
                Ok(true)
            }
            None => {
                warn!("Correspondence with id {} not found", id);
                Ok(false)
            }
        }
    }

    fn delete_correspondences_for_camera(
        &mut self,
        camera_id: RecordId,
    ) -> Result<usize, StoreError> {
        let before = self.data.correspondences.len();
        self.data
            .correspondences
            .retain(|c| c.camera_id != camera_id);
        let removed = before - self.data.correspondences.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }
}
