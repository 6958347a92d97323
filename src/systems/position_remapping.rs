use log::{debug, warn};
use thiserror::Error;

use crate::{
    Point2D,
    homography::{Homography, HomographyError},
    polygon::Polygon,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MappingError {
    #[error("no homography available for this camera")]
    MissingHomography,

    #[error("point {0:?} maps to infinity")]
    PointAtInfinity(Point2D),
}

pub fn map_point(point: Point2D, homography: Option<&Homography>) -> Result<Point2D, MappingError> {
    let h = homography.ok_or(MappingError::MissingHomography)?;
    h.apply(point).ok_or(MappingError::PointAtInfinity(point))
}

/// Map every vertex, keeping vertex order; fails as a whole if any vertex
/// cannot be mapped
pub fn map_polygon(
    polygon: &Polygon,
    homography: Option<&Homography>,
) -> Result<Polygon, MappingError> {
    let h = homography.ok_or(MappingError::MissingHomography)?;
    polygon
        .vertices()
        .iter()
        .map(|p| map_point(*p, Some(h)))
        .collect::<Result<Vec<_>, _>>()
        .map(Polygon::new)
}

/// Forward (camera → map) and inverse (map → camera) transforms for one camera
#[derive(Debug, Clone, Default)]
pub struct PositionRemapping {
    forward: Option<Homography>,
    inverse: Option<Homography>,
}

impl PositionRemapping {
    pub fn new(forward: Option<Homography>) -> Result<Self, HomographyError> {
        let inverse = match &forward {
            Some(h) => Some(h.inverse()?),
            None => None,
        };
        Ok(PositionRemapping { forward, inverse })
    }

    pub fn is_ready(&self) -> bool {
        self.forward.is_some()
    }

    pub fn camera_to_map(&self, point: Point2D) -> Result<Point2D, MappingError> {
        map_point(point, self.forward.as_ref())
    }

    pub fn map_to_camera(&self, point: Point2D) -> Result<Point2D, MappingError> {
        map_point(point, self.inverse.as_ref())
    }

    /// Project a map-space polygon into the camera frame; None (with a
    /// warning) when it cannot be projected, so the zone is skipped
    pub fn polygon_to_camera(&self, polygon: &Polygon) -> Option<Polygon> {
        match map_polygon(polygon, self.inverse.as_ref()) {
            Ok(projected) => {
                debug!(
                    "Projected polygon {:?} into camera frame: {:?}",
                    polygon.vertices(),
                    projected.vertices()
                );
                Some(projected)
            }
            Err(e) => {
                warn!("Could not project polygon into camera frame: {}", e);
                None
            }
        }
    }
}
