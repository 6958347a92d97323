use serde::{Deserialize, Serialize};

use crate::Point2D;

/// Identifier assigned by the external detector/tracker; stable across frames
/// for the same physical object
pub type TrackId = u64;

/// Application-defined ticket value, e.g. 0 = valid, 1 = invalid
pub type TicketValue = i64;

/// Axis-aligned box in frame-pixel coordinates, as (x1, y1, x2, y2)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox(pub f64, pub f64, pub f64, pub f64);

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        BoundingBox(x1, y1, x2, y2)
    }

    pub fn centroid(&self) -> Point2D {
        let BoundingBox(x1, y1, x2, y2) = *self;
        ((x1 + x2) / 2., (y1 + y2) / 2.)
    }
}

/// One detector observation for a single frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub track_id: TrackId,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, track_id: TrackId) -> Self {
        Detection {
            bbox,
            confidence,
            track_id,
        }
    }

    pub fn centroid(&self) -> Point2D {
        self.bbox.centroid()
    }
}
