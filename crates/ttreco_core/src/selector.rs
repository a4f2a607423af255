//! Candidate selection and scoring.
//!
//! The solver hands back up to four invisible-momentum pairs per attempt.
//! Selection picks the pair minimizing the invariant mass of the full
//! six-body system, then scores the lepton-b pairing with the empirical
//! mass template. Two geometric discriminants of the underlying conics
//! are attached to the chosen pair for downstream use.

use nalgebra::{Matrix2, Matrix3, Vector2};

use crate::kinematics::FourVector;
use crate::solver::SolutionSet;
use crate::templates::BinnedTemplate;

/// Rescale applied to the product of template densities before the log,
/// keeping typical weights positive.
const WEIGHT_RESCALE: f64 = 1e6;

/// The chosen invisible-momentum pair and everything scored from it.
#[derive(Debug, Clone)]
pub struct SelectedSolution {
    pub nu1: FourVector,
    pub nu2: FourVector,
    /// Log of the rescaled product of lepton-b mass densities.
    pub weight: f64,
    /// Transverse gap between the two solution conics; zero when they
    /// overlap. `None` when either conic has no elliptic center.
    pub dark_pt: Option<f64>,
    /// Center distance over summed effective radii. `None` as above.
    pub overlapping_factor: Option<f64>,
}

/// Outcome of selecting from one solver invocation.
#[derive(Debug, Clone)]
pub enum Selection {
    /// The solver returned nothing to choose from.
    NoCandidates,
    /// Candidates existed but the mass template does not cover the
    /// pairing, so no weight exists.
    WeightUndefined,
    Chosen(SelectedSolution),
}

/// Selects and scores a candidate pair.
///
/// The weight depends only on the lepton-b pairing, not on the invisible
/// momenta, so it is computed once and shared by all candidates.
pub fn select(
    set: &SolutionSet,
    lepton1: &FourVector,
    b1: &FourVector,
    lepton2: &FourVector,
    b2: &FourVector,
    mlb: &BinnedTemplate,
) -> Selection {
    if set.is_empty() {
        return Selection::NoCandidates;
    }

    let m1 = (*lepton1 + *b1).m();
    let m2 = (*lepton2 + *b2).m();
    let weight = match (mlb.density(m1), mlb.density(m2)) {
        (Some(d1), Some(d2)) if d1 * d2 > 0.0 => (d1 * d2 * WEIGHT_RESCALE).ln(),
        _ => return Selection::WeightUndefined,
    };

    let best = set
        .pairs
        .iter()
        .min_by(|a, b| {
            let ma = (*lepton1 + *b1 + a.nu1 + *lepton2 + *b2 + a.nu2).m();
            let mb = (*lepton1 + *b1 + b.nu1 + *lepton2 + *b2 + b.nu2).m();
            ma.partial_cmp(&mb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("non-empty set has a minimum");

    let geometry = conic_separation(&best.conic1, &best.conic2);
    Selection::Chosen(SelectedSolution {
        nu1: best.nu1,
        nu2: best.nu2,
        weight,
        dark_pt: geometry.map(|g| g.gap),
        overlapping_factor: geometry.map(|g| g.overlap),
    })
}

#[derive(Debug, Clone, Copy)]
struct ConicSeparation {
    gap: f64,
    overlap: f64,
}

/// Center distance and radial gap of two elliptic conics in the
/// transverse plane. `None` when either conic is not an ellipse.
fn conic_separation(a: &Matrix3<f64>, b: &Matrix3<f64>) -> Option<ConicSeparation> {
    let (ca, ra) = center_and_radius(a)?;
    let (cb, rb) = center_and_radius(b)?;
    let dist = (ca - cb).norm();
    let radii = ra + rb;
    if radii <= 0.0 {
        return None;
    }
    Some(ConicSeparation {
        gap: (dist - radii).max(0.0),
        overlap: dist / radii,
    })
}

/// Center and effective radius (geometric mean of the semi-axes) of an
/// elliptic conic on homogeneous (x, y, 1).
fn center_and_radius(m: &Matrix3<f64>) -> Option<(Vector2<f64>, f64)> {
    let block = Matrix2::new(m[(0, 0)], m[(0, 1)], m[(0, 1)], m[(1, 1)]);
    let det2 = block.determinant();
    if det2 <= 0.0 {
        // Parabolic or hyperbolic; no closed ellipse.
        return None;
    }
    let center = block.try_inverse()? * -Vector2::new(m[(0, 2)], m[(1, 2)]);
    let ab = m.determinant().abs() / det2.powf(1.5);
    if !ab.is_finite() || ab <= 0.0 {
        return None;
    }
    Some((center, ab.sqrt()))
}
