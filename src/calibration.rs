//! Per-camera calibration: the editable set of camera ↔ map point pairs and
//! the homography derived from them.
//!
//! Any change to the point set marks the cached estimate stale; it is only
//! handed out again after `recompute_homography`.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Point2D,
    geometry_utils::is_finite_point,
    homography::{self, Correspondence, Estimate, Homography, HomographyError, RansacSettings},
    store::{RecordId, Repository, StoreError},
};

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error(transparent)]
    Homography(#[from] HomographyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("correspondence {0} does not belong to this camera")]
    UnknownCorrespondence(RecordId),
}

/// Pixel extent of an image; points outside [0, width) x [0, height) are rejected
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ImageBounds {
    pub width: f64,
    pub height: f64,
}

impl ImageBounds {
    pub fn new(width: f64, height: f64) -> Self {
        ImageBounds { width, height }
    }

    pub fn contains(&self, p: &Point2D) -> bool {
        (0. ..self.width).contains(&p.0) && (0. ..self.height).contains(&p.1)
    }
}

pub struct CalibrationSession<R: Repository> {
    store: R,
    camera_id: RecordId,
    settings: RansacSettings,
    source_bounds: Option<ImageBounds>,
    map_bounds: Option<ImageBounds>,
    estimate: Option<Estimate>,
    stale: bool,
}

impl<R: Repository> CalibrationSession<R> {
    pub fn new(store: R, camera_id: RecordId, settings: RansacSettings) -> Self {
        CalibrationSession {
            store,
            camera_id,
            settings,
            source_bounds: None,
            map_bounds: None,
            estimate: None,
            stale: true,
        }
    }

    /// Reject points that fall outside the camera frame or the map image
    pub fn with_bounds(mut self, source: Option<ImageBounds>, map: Option<ImageBounds>) -> Self {
        self.source_bounds = source;
        self.map_bounds = map;
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn into_store(self) -> R {
        self.store
    }

    /// Complete point pairs for this camera, in insertion order
    pub fn correspondences(&self) -> Vec<(RecordId, Correspondence)> {
        self.store
            .correspondences(self.camera_id)
            .into_iter()
            .filter_map(|record| match record.correspondence() {
                Some(c) => Some((record.id, c)),
                None => {
                    warn!(
                        "Skipping correspondence {} with missing coordinates",
                        record.id
                    );
                    None
                }
            })
            .collect()
    }

    pub fn add_correspondence(
        &mut self,
        source: Point2D,
        destination: Point2D,
    ) -> Result<RecordId, CalibrationError> {
        self.validate(&source, &destination)?;
        let record = self
            .store
            .add_correspondence(self.camera_id, source, destination)?;
        self.invalidate();
        Ok(record.id)
    }

    pub fn update_correspondence(
        &mut self,
        id: RecordId,
        source: Point2D,
        destination: Point2D,
    ) -> Result<(), CalibrationError> {
        self.check_owned(id)?;
        self.validate(&source, &destination)?;
        self.store.update_correspondence(id, source, destination)?;
        self.invalidate();
        Ok(())
    }

    pub fn delete_correspondence(&mut self, id: RecordId) -> Result<(), CalibrationError> {
        self.check_owned(id)?;
        if self.store.delete_correspondence(id)? {
            self.invalidate();
        }
        Ok(())
    }

    /// Remove every point pair for this camera; returns how many went
    pub fn clear_correspondences(&mut self) -> Result<usize, CalibrationError> {
        let removed = self.store.delete_correspondences_for_camera(self.camera_id)?;
        info!(
            "Cleared {} correspondences for camera {}",
            removed, self.camera_id
        );
        self.invalidate();
        Ok(removed)
    }

    /// Estimate from the current point set and cache the result
    pub fn recompute_homography(&mut self) -> Result<&Estimate, CalibrationError> {
        let correspondences: Vec<Correspondence> =
            self.correspondences().into_iter().map(|(_, c)| c).collect();

        let estimate = match homography::estimate(&correspondences, &self.settings) {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!(
                    "Homography for camera {} could not be computed: {}",
                    self.camera_id, e
                );
                self.estimate = None;
                self.stale = true;
                return Err(e.into());
            }
        };
        info!(
            "Camera {} homography: {}/{} inliers ({:.0}%), mean reprojection error {:.3}px",
            self.camera_id,
            estimate.inlier_count(),
            estimate.correspondences.len(),
            estimate.inlier_ratio() * 100.,
            estimate.mean_inlier_error()
        );
        self.stale = false;
        Ok(&*self.estimate.insert(estimate))
    }

    /// The cached homography, only while it still matches the point set
    pub fn homography(&self) -> Option<&Homography> {
        self.estimate().map(|e| &e.homography)
    }

    pub fn estimate(&self) -> Option<&Estimate> {
        if self.stale {
            None
        } else {
            self.estimate.as_ref()
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    fn invalidate(&mut self) {
        if !self.stale {
            debug!("Point set changed; camera {} homography is stale", self.camera_id);
        }
        self.stale = true;
        self.estimate = None;
    }

    fn check_owned(&self, id: RecordId) -> Result<(), CalibrationError> {
        match self.store.correspondence(id) {
            Some(record) if record.camera_id == self.camera_id => Ok(()),
            _ => Err(CalibrationError::UnknownCorrespondence(id)),
        }
    }

    fn validate(&self, source: &Point2D, destination: &Point2D) -> Result<(), HomographyError> {
        if !is_finite_point(source) || !is_finite_point(destination) {
            return Err(HomographyError::MalformedInput(format!(
                "non-finite coordinate in pair {:?} -> {:?}",
                source, destination
            )));
        }
        if let Some(bounds) = &self.source_bounds {
            if !bounds.contains(source) {
                return Err(HomographyError::MalformedInput(format!(
                    "source point {:?} is outside the camera frame {:?}",
                    source, bounds
                )));
            }
        }
        if let Some(bounds) = &self.map_bounds {
            if !bounds.contains(destination) {
                return Err(HomographyError::MalformedInput(format!(
                    "map point {:?} is outside the map image {:?}",
                    destination, bounds
                )));
            }
        }
        Ok(())
    }
}
