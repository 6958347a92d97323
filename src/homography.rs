//! Planar homography estimation from camera ↔ map point correspondences.
//!
//! Exactly four correspondences are solved directly. With more, minimal
//! four-point samples are drawn by a seeded RANSAC loop, scored by
//! reprojection error against a pixel threshold, and the best consensus set
//! is refitted with a normalised DLT (SVD). Both solvers work on
//! Hartley-normalised coordinates.

use log::{debug, info, warn};
use std::f64::consts::SQRT_2;

use nalgebra::{DMatrix, Matrix3, SMatrix, SVector, Vector3};
use rand::{SeedableRng, rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Point2D,
    geometry_utils::{centroid, distance_points, has_collinear_triple, is_finite_point},
};

/// A planar homography has 8 degrees of freedom; each pair fixes 2
pub const MIN_CORRESPONDENCES: usize = 4;

const SINGULAR_EPSILON: f64 = 1e-12;

/// One calibration sample: a pixel in the camera frame and the matching pixel
/// in the shared map image
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source: Point2D,
    pub destination: Point2D,
}

impl Correspondence {
    pub fn new(source: Point2D, destination: Point2D) -> Self {
        Correspondence {
            source,
            destination,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("insufficient correspondences: {found} given, at least {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("malformed correspondence input: {0}")]
    MalformedInput(String),

    #[error("homography estimation failed: {0}")]
    EstimationFailed(String),

    #[error("homography matrix is singular and cannot be inverted")]
    NotInvertible,
}

impl HomographyError {
    /// "Not enough (or bad) data" as opposed to "data present but unusable"
    pub fn is_input_validation(&self) -> bool {
        matches!(
            self,
            HomographyError::InsufficientCorrespondences { .. } | HomographyError::MalformedInput(_)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    /// Project a point; None when it lands on the line at infinity
    #[inline]
    pub fn apply(&self, p: Point2D) -> Option<Point2D> {
        let v = self.h * Vector3::new(p.0, p.1, 1.0);
        let w = v[2];
        if w.abs() < SINGULAR_EPSILON {
            return None;
        }
        let mapped = (v[0] / w, v[1] / w);
        is_finite_point(&mapped).then_some(mapped)
    }

    pub fn inverse(&self) -> Result<Self, HomographyError> {
        let det = self.h.determinant();
        if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
            return Err(HomographyError::NotInvertible);
        }
        let inv = self.h.try_inverse().ok_or(HomographyError::NotInvertible)?;
        Ok(Self::new(unit_scale(inv).unwrap_or(inv)))
    }

    /// Distance between the projected source and the expected destination
    pub fn reprojection_error(&self, c: &Correspondence) -> f64 {
        match self.apply(c.source) {
            Some(projected) => distance_points(&projected, &c.destination),
            None => f64::INFINITY,
        }
    }

    fn is_well_formed(&self) -> bool {
        self.h.iter().all(|v| v.is_finite()) && self.h.determinant().abs() > SINGULAR_EPSILON
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RansacSettings {
    /// Max reprojection error (pixels) for a pair to count as an inlier
    pub reprojection_threshold: f64,
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample; bounds the
    /// number of iterations once a good consensus is found
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacSettings {
    fn default() -> Self {
        RansacSettings {
            reprojection_threshold: 5.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 42,
        }
    }
}

/// A homography together with the correspondence set it was derived from
#[derive(Debug, Clone)]
pub struct Estimate {
    pub homography: Homography,
    pub correspondences: Vec<Correspondence>,
    pub inliers: Vec<bool>,
    pub errors: Vec<f64>,
    pub iterations: usize,
}

impl Estimate {
    pub fn inlier_count(&self) -> usize {
        self.inliers.iter().filter(|&&i| i).count()
    }

    pub fn inlier_ratio(&self) -> f64 {
        if self.correspondences.is_empty() {
            0.
        } else {
            self.inlier_count() as f64 / self.correspondences.len() as f64
        }
    }

    pub fn mean_inlier_error(&self) -> f64 {
        let inlier_errors: Vec<f64> = self
            .errors
            .iter()
            .zip(self.inliers.iter())
            .filter_map(|(e, &inlier)| inlier.then_some(*e))
            .collect();
        if inlier_errors.is_empty() {
            0.
        } else {
            inlier_errors.iter().sum::<f64>() / inlier_errors.len() as f64
        }
    }
}

/// Estimate from two parallel point lists (source[i] ↔ destination[i])
pub fn estimate_from_lists(
    source: &[Point2D],
    destination: &[Point2D],
    settings: &RansacSettings,
) -> Result<Estimate, HomographyError> {
    if source.len() != destination.len() {
        return Err(HomographyError::MalformedInput(format!(
            "mismatched point counts (source: {}, destination: {})",
            source.len(),
            destination.len()
        )));
    }
    let correspondences: Vec<Correspondence> = source
        .iter()
        .zip(destination.iter())
        .map(|(s, d)| Correspondence::new(*s, *d))
        .collect();
    estimate(&correspondences, settings)
}

pub fn estimate(
    correspondences: &[Correspondence],
    settings: &RansacSettings,
) -> Result<Estimate, HomographyError> {
    let n = correspondences.len();
    if n < MIN_CORRESPONDENCES {
        return Err(HomographyError::InsufficientCorrespondences {
            found: n,
            required: MIN_CORRESPONDENCES,
        });
    }
    if let Some(i) = correspondences
        .iter()
        .position(|c| !is_finite_point(&c.source) || !is_finite_point(&c.destination))
    {
        return Err(HomographyError::MalformedInput(format!(
            "non-finite coordinate in pair {}: {:?}",
            i, correspondences[i]
        )));
    }
    if !(settings.reprojection_threshold > 0.) {
        return Err(HomographyError::MalformedInput(format!(
            "reprojection threshold must be above 0, got {}",
            settings.reprojection_threshold
        )));
    }

    let (homography, iterations) = if n == MIN_CORRESPONDENCES {
        (estimate_exact(correspondences)?, 1)
    } else {
        estimate_ransac(correspondences, settings)?
    };

    let errors: Vec<f64> = correspondences
        .iter()
        .map(|c| homography.reprojection_error(c))
        .collect();
    let inliers: Vec<bool> = errors
        .iter()
        .map(|e| *e <= settings.reprojection_threshold)
        .collect();

    let estimate = Estimate {
        homography,
        correspondences: correspondences.to_vec(),
        inliers,
        errors,
        iterations,
    };
    info!(
        "Estimated homography from {} correspondences: {} inliers, mean error {:.3}px",
        n,
        estimate.inlier_count(),
        estimate.mean_inlier_error()
    );
    Ok(estimate)
}

fn estimate_exact(correspondences: &[Correspondence]) -> Result<Homography, HomographyError> {
    let src: Vec<Point2D> = correspondences.iter().map(|c| c.source).collect();
    let dst: Vec<Point2D> = correspondences.iter().map(|c| c.destination).collect();
    if has_collinear_triple(&src) || has_collinear_triple(&dst) {
        return Err(HomographyError::EstimationFailed(String::from(
            "degenerate configuration: three or more points are collinear",
        )));
    }
    let h = solve_four_point(&src, &dst).ok_or_else(|| {
        HomographyError::EstimationFailed(String::from("four-point system has no solution"))
    })?;
    if !h.is_well_formed() {
        return Err(HomographyError::EstimationFailed(String::from(
            "solution is singular or non-finite",
        )));
    }
    Ok(h)
}

struct Consensus {
    homography: Homography,
    inliers: Vec<bool>,
    count: usize,
    error_sum: f64,
}

fn score(
    homography: Homography,
    correspondences: &[Correspondence],
    threshold: f64,
) -> Consensus {
    let mut inliers = vec![false; correspondences.len()];
    let mut count = 0;
    let mut error_sum = 0.;
    for (i, c) in correspondences.iter().enumerate() {
        let err = homography.reprojection_error(c);
        if err <= threshold {
            inliers[i] = true;
            count += 1;
            error_sum += err;
        }
    }
    Consensus {
        homography,
        inliers,
        count,
        error_sum,
    }
}

/// Iterations needed to draw an all-inlier sample with the given confidence
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let p_all_inliers = inlier_ratio.powi(MIN_CORRESPONDENCES as i32);
    if p_all_inliers >= 1. {
        return 1;
    }
    let p_fail = 1. - p_all_inliers;
    let needed = (1. - confidence.clamp(0., 1. - f64::EPSILON)).ln() / p_fail.ln();
    if needed.is_finite() && needed >= 0. {
        (needed.ceil() as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

fn estimate_ransac(
    correspondences: &[Correspondence],
    settings: &RansacSettings,
) -> Result<(Homography, usize), HomographyError> {
    let n = correspondences.len();
    let max_iterations = settings.max_iterations.max(1);
    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut best: Option<Consensus> = None;
    let mut required = max_iterations;
    let mut iterations = 0;
    let mut degenerate_samples = 0;

    while iterations < required {
        iterations += 1;
        let sample = index::sample(&mut rng, n, MIN_CORRESPONDENCES);
        let src: Vec<Point2D> = sample.iter().map(|i| correspondences[i].source).collect();
        let dst: Vec<Point2D> = sample
            .iter()
            .map(|i| correspondences[i].destination)
            .collect();

        if has_collinear_triple(&src) || has_collinear_triple(&dst) {
            degenerate_samples += 1;
            continue;
        }
        let Some(candidate) = solve_four_point(&src, &dst) else {
            degenerate_samples += 1;
            continue;
        };
        if !candidate.is_well_formed() {
            degenerate_samples += 1;
            continue;
        }

        let consensus = score(candidate, correspondences, settings.reprojection_threshold);
        let is_better = match &best {
            None => true,
            Some(b) => {
                consensus.count > b.count
                    || (consensus.count == b.count && consensus.error_sum < b.error_sum)
            }
        };
        if is_better {
            required = required_iterations(
                consensus.count as f64 / n as f64,
                settings.confidence,
                max_iterations,
            )
            .max(iterations);
            best = Some(consensus);
        }
    }

    debug!(
        "RANSAC finished after {} iterations ({} degenerate samples)",
        iterations, degenerate_samples
    );

    let best = match best {
        Some(b) if b.count >= MIN_CORRESPONDENCES => b,
        Some(b) => {
            return Err(HomographyError::EstimationFailed(format!(
                "no consensus: best model explains only {} of {} pairs",
                b.count, n
            )));
        }
        None => {
            return Err(HomographyError::EstimationFailed(String::from(
                "every sampled configuration was degenerate",
            )));
        }
    };

    // Refit over the consensus set; keep the minimal model if the refit is worse
    let inlier_pairs: Vec<Correspondence> = correspondences
        .iter()
        .zip(best.inliers.iter())
        .filter_map(|(c, &inlier)| inlier.then_some(*c))
        .collect();
    let src: Vec<Point2D> = inlier_pairs.iter().map(|c| c.source).collect();
    let dst: Vec<Point2D> = inlier_pairs.iter().map(|c| c.destination).collect();
    let refit = if inlier_pairs.len() == MIN_CORRESPONDENCES {
        solve_four_point(&src, &dst)
    } else {
        solve_dlt(&src, &dst)
    };

    match refit.filter(|h| h.is_well_formed()) {
        Some(h) => {
            let refined = score(h, correspondences, settings.reprojection_threshold);
            if refined.count >= best.count {
                Ok((refined.homography, iterations))
            } else {
                warn!(
                    "Refit over {} inliers explains fewer pairs ({}); keeping minimal model",
                    best.count, refined.count
                );
                Ok((best.homography, iterations))
            }
        }
        None => Ok((best.homography, iterations)),
    }
}

/// Scale so that h33 = 1
fn unit_scale(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let w = h[(2, 2)];
    (w.abs() >= SINGULAR_EPSILON).then(|| h / w)
}

/// Hartley conditioning: points are moved onto their centroid and scaled to a
/// mean distance of sqrt(2) from it
struct Conditioning {
    t: Matrix3<f64>,
}

impl Conditioning {
    fn fit(points: &[Point2D]) -> Self {
        let c = centroid(points).unwrap_or((0., 0.));
        let spread = points.iter().map(|p| distance_points(p, &c)).sum::<f64>()
            / points.len().max(1) as f64;
        let s = if spread > SINGULAR_EPSILON {
            SQRT_2 / spread
        } else {
            1.
        };
        Conditioning {
            t: Matrix3::new(s, 0., -s * c.0, 0., s, -s * c.1, 0., 0., 1.),
        }
    }

    fn apply(&self, (x, y): Point2D) -> Point2D {
        (
            self.t[(0, 0)] * x + self.t[(0, 2)],
            self.t[(1, 1)] * y + self.t[(1, 2)],
        )
    }
}

/// Map a homography found between conditioned point sets back to raw
/// coordinates
fn uncondition(hn: Matrix3<f64>, src: &Conditioning, dst: &Conditioning) -> Option<Homography> {
    unit_scale(dst.t.try_inverse()? * hn * src.t).map(Homography::new)
}

/// Each pair gives two rows of A in A·h = 0, h being H row by row
fn pair_constraints((x, y): Point2D, (u, v): Point2D) -> [[f64; 9]; 2] {
    [
        [x, y, 1., 0., 0., 0., -u * x, -u * y, -u],
        [0., 0., 0., x, y, 1., -v * x, -v * y, -v],
    ]
}

fn conditioned_rows(src: &[Point2D], dst: &[Point2D]) -> (Conditioning, Conditioning, Vec<[f64; 9]>) {
    let (cs, cd) = (Conditioning::fit(src), Conditioning::fit(dst));
    let rows = src
        .iter()
        .zip(dst)
        .flat_map(|(s, d)| pair_constraints(cs.apply(*s), cd.apply(*d)))
        .collect();
    (cs, cd, rows)
}

/// Exact solve from 4 pairs; with h33 fixed to 1 its column moves to the
/// right-hand side
fn solve_four_point(src: &[Point2D], dst: &[Point2D]) -> Option<Homography> {
    if src.len() != MIN_CORRESPONDENCES || dst.len() != MIN_CORRESPONDENCES {
        return None;
    }
    let (cs, cd, rows) = conditioned_rows(src, dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for (r, row) in rows.iter().enumerate() {
        a.row_mut(r).copy_from_slice(&row[..8]);
        b[r] = -row[8];
    }
    let h = a.lu().solve(&b)?;

    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.);
    uncondition(hn, &cs, &cd)
}

/// Least squares over 5 or more pairs: h is the right singular vector of the
/// smallest singular value
fn solve_dlt(src: &[Point2D], dst: &[Point2D]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() <= MIN_CORRESPONDENCES {
        return None;
    }
    let (cs, cd, rows) = conditioned_rows(src, dst);

    let a = DMatrix::<f64>::from_row_slice(rows.len(), 9, rows.as_flattened());
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let h = v_t.row(svd.singular_values.imin());

    let hn = Matrix3::from_iterator(h.iter().copied()).transpose();
    uncondition(hn, &cs, &cd)
}
