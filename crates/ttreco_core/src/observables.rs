//! Derived observables: stransverse masses, the minimax lepton-jet mass
//! and the dilepton opening angle in the top rest frames.

use crate::event::Jet;
use crate::kinematics::{cos_angle, FourVector};

/// One stransverse-mass evaluation, laid out the way the numerical
/// minimizers take it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mt2Input {
    pub m_vis_a: f64,
    pub px_a: f64,
    pub py_a: f64,
    pub m_vis_b: f64,
    pub px_b: f64,
    pub py_b: f64,
    pub px_miss: f64,
    pub py_miss: f64,
    pub chi_a: f64,
    pub chi_b: f64,
    pub precision: f64,
}

/// Seam for an external stransverse-mass minimizer.
pub trait Mt2Solver {
    fn mt2(&self, input: &Mt2Input) -> f64;
}

/// Dilepton stransverse mass with massless invisibles.
pub fn mt2_dilepton(
    lepton1: &FourVector,
    lepton2: &FourVector,
    met: &FourVector,
    solver: &impl Mt2Solver,
) -> f64 {
    solver.mt2(&Mt2Input {
        m_vis_a: lepton1.m().abs(),
        px_a: lepton1.px(),
        py_a: lepton1.py(),
        m_vis_b: lepton2.m().abs(),
        px_b: lepton2.px(),
        py_b: lepton2.py(),
        px_miss: met.px(),
        py_miss: met.py(),
        chi_a: 0.0,
        chi_b: 0.0,
        precision: 0.0,
    })
}

/// Lepton-plus-b-jet stransverse mass: each visible leg is the summed
/// lepton and b four-vector of one side.
pub fn mt2_lepton_bjet(
    lepton1: &FourVector,
    b1: &FourVector,
    lepton2: &FourVector,
    b2: &FourVector,
    met: &FourVector,
    solver: &impl Mt2Solver,
) -> f64 {
    let vis_a = *lepton1 + *b1;
    let vis_b = *lepton2 + *b2;
    solver.mt2(&Mt2Input {
        m_vis_a: vis_a.m().abs(),
        px_a: vis_a.px(),
        py_a: vis_a.py(),
        m_vis_b: vis_b.m().abs(),
        px_b: vis_b.px(),
        py_b: vis_b.py(),
        px_miss: met.px(),
        py_miss: met.py(),
        chi_a: 0.0,
        chi_b: 0.0,
        precision: 0.0,
    })
}

/// Minimax lepton-jet invariant mass.
///
/// The jet pool holds the leading three b-tagged jets, padded with the
/// highest-discriminant untagged jet while fewer than three tags exist.
/// Over all ordered jet pairs (a, b), a != b, the result is the smallest
/// value of max(M(l1 + a), M(l2 + b)). `None` when the pool has fewer
/// than two jets.
pub fn mblt(lepton1: &FourVector, lepton2: &FourVector, jets: &[Jet]) -> Option<f64> {
    let mut pool: Vec<FourVector> = jets
        .iter()
        .filter(|j| j.is_tagged())
        .take(3)
        .map(|j| j.p4)
        .collect();
    if pool.len() < 3 {
        let padding = jets
            .iter()
            .filter(|j| !j.is_tagged())
            .max_by(|a, b| {
                a.btag
                    .partial_cmp(&b.btag)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(jet) = padding {
            pool.push(jet.p4);
        }
    }
    if pool.len() < 2 {
        return None;
    }
    let mut best = f64::INFINITY;
    for (i, a) in pool.iter().enumerate() {
        for (j, b) in pool.iter().enumerate() {
            if i == j {
                continue;
            }
            let pairing = (*lepton1 + *a).m().max((*lepton2 + *b).m());
            if pairing < best {
                best = pairing;
            }
        }
    }
    Some(best)
}

/// Cosine of the dilepton opening angle with each lepton taken to its
/// parent top's rest frame through the pair rest frame. `None` when a
/// boost is unphysical or a direction degenerates.
pub fn rest_frame_cos_phi(
    top1: &FourVector,
    top2: &FourVector,
    lepton1: &FourVector,
    lepton2: &FourVector,
) -> Option<f64> {
    let pair = *top1 + *top2;
    let beta = pair.boost_vector();
    if beta.norm_squared() >= 1.0 {
        return None;
    }
    let t1 = top1.boost(&-beta);
    let t2 = top2.boost(&-beta);
    if t1.boost_vector().norm_squared() >= 1.0 || t2.boost_vector().norm_squared() >= 1.0 {
        return None;
    }
    let l1 = lepton1.boost(&-beta).boost(&-t1.boost_vector());
    let l2 = lepton2.boost(&-beta).boost(&-t2.boost_vector());
    if !(l1.is_finite() && l2.is_finite()) {
        return None;
    }
    cos_angle(&l1.vect(), &l2.vect())
}
