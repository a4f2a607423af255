//! Stochastic smearing of the measured kinematics.
//!
//! When the exact constraint system has no solution, the inputs are
//! varied within detector resolution and the solve is retried. Jet
//! energies get a Gaussian relative shift, lepton energies a response
//! factor on the energy component alone, directions a polar deflection
//! from the angular templates, and the missing momentum absorbs the
//! summed transverse change so the event stays balanced. The W masses
//! are redrawn from the line shape on every pass.

use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Cauchy, Distribution, Normal};

use crate::event::{EventKinematic, ScoreStatus, W_MASS, W_WIDTH};
use crate::kinematics::FourVector;
use crate::templates::ReferenceTables;

/// Relative width of the jet energy response.
pub const B_ENERGY_SIGMA: f64 = 0.3;

/// Seeded source of smeared kinematics. One engine per reconstruction
/// job; the draw order is fixed, so a seed pins the whole sequence.
#[derive(Debug)]
pub struct SmearingEngine {
    rng: StdRng,
    jet_energy: Normal<f64>,
    w_line: Cauchy<f64>,
}

impl SmearingEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            jet_energy: Normal::new(0.0, B_ENERGY_SIGMA).unwrap(),
            // A Breit-Wigner line shape; the width parameter is the
            // half-width at half maximum.
            w_line: Cauchy::new(W_MASS, 0.5 * W_WIDTH).unwrap(),
        }
    }

    /// Produces a fresh, unreconstructed variation of `kin`.
    pub fn smear(&mut self, kin: &EventKinematic, tables: &ReferenceTables) -> EventKinematic {
        let mut out = kin.clone();
        let before = kin.b1 + kin.b2 + kin.lepton1 + kin.lepton2;
        out.b1 = self.smear_jet(&kin.b1, tables);
        out.b2 = self.smear_jet(&kin.b2, tables);
        out.lepton1 = self.smear_lepton(&kin.lepton1, tables);
        out.lepton2 = self.smear_lepton(&kin.lepton2, tables);
        let after = out.b1 + out.b2 + out.lepton1 + out.lepton2;

        let metx = kin.met.px() + before.px() - after.px();
        let mety = kin.met.py() + before.py() - after.py();
        out.met = FourVector::new(metx, mety, 0.0, metx.hypot(mety));

        out.hypothesis.m_w1 = self.draw_w_mass();
        out.hypothesis.m_w2 = self.draw_w_mass();
        out.status = ScoreStatus::NotEvaluated;
        out.solution = None;
        out
    }

    fn smear_jet(&mut self, jet: &FourVector, tables: &ReferenceTables) -> FourVector {
        let p = jet.p();
        if p <= 0.0 {
            return *jet;
        }
        let mut out = *jet;
        let new_e = out.e() * (1.0 + self.jet_energy.sample(&mut self.rng));
        let p2 = new_e * new_e - out.m2();
        if new_e > 0.0 && p2 > 0.0 {
            let ratio = p2.sqrt() / p;
            out = FourVector::new(
                out.px() * ratio,
                out.py() * ratio,
                out.pz() * ratio,
                new_e,
            );
        }
        let alpha = tables.jet_angular.sample(&mut self.rng);
        let omega = self.rng.gen_range(0.0..std::f64::consts::TAU);
        deflect(&out, alpha, omega)
    }

    fn smear_lepton(&mut self, lepton: &FourVector, tables: &ReferenceTables) -> FourVector {
        let factor = tables.lepton_energy.sample(&mut self.rng);
        let mut out = *lepton;
        if factor > 0.0 && factor.is_finite() {
            // Response acts on the energy component only; the momentum
            // carries no delta into the balance compensation.
            out = FourVector::new(out.px(), out.py(), out.pz(), out.e() * factor);
        }
        let alpha = tables.lepton_angular.sample(&mut self.rng);
        let omega = self.rng.gen_range(0.0..std::f64::consts::TAU);
        deflect(&out, alpha, omega)
    }

    fn draw_w_mass(&mut self) -> f64 {
        // The Cauchy tails reach unphysical masses; redraw those.
        loop {
            let m = self.w_line.sample(&mut self.rng);
            if m.is_finite() && m > 1.0 && m < 500.0 {
                return m;
            }
        }
    }
}

/// Tilts the momentum direction by polar angle `alpha` at azimuth
/// `omega` around it, preserving |p| and the energy.
fn deflect(v: &FourVector, alpha: f64, omega: f64) -> FourVector {
    let p = v.vect();
    let n = p.norm();
    if n == 0.0 {
        return *v;
    }
    let tan_a = alpha.tan();
    let tan_w = omega.tan();
    let a = tan_a / (1.0 + tan_w * tan_w).sqrt();
    let b = a * tan_w;
    if !(a.is_finite() && b.is_finite()) || (a == 0.0 && b == 0.0) {
        return *v;
    }
    let u1 = p.cross(&reference_axis(&p)).normalize();
    let u2 = p.cross(&u1).normalize();
    let dir = (p / n + u1 * a + u2 * b).normalize();
    v.with_direction(&dir)
}

/// Coordinate axis least aligned with `v`, so the cross product is
/// well conditioned.
fn reference_axis(v: &Vector3<f64>) -> Vector3<f64> {
    let (ax, ay, az) = (v.x.abs(), v.y.abs(), v.z.abs());
    if ax <= ay && ax <= az {
        Vector3::x()
    } else if ay <= az {
        Vector3::y()
    } else {
        Vector3::z()
    }
}

#[cfg(test)]
mod tests {
    use super::{deflect, SmearingEngine};
    use crate::event::EventKinematic;
    use crate::kinematics::FourVector;
    use crate::templates::{BinnedTemplate, ReferenceTables};
    use crate::testutil::{broad_mlb_template, dilepton_truth, reference_tables};

    fn kinematic() -> EventKinematic {
        let truth = dilepton_truth();
        EventKinematic::new(
            truth.lepton1,
            truth.lepton2,
            truth.b1,
            truth.b2,
            truth.met,
        )
    }

    #[test]
    fn deflect_preserves_momentum_and_energy() {
        let v = FourVector::from_pt_eta_phi_m(75.0, 0.9, -1.3, 4.8);
        let tilted = deflect(&v, 0.05, 1.7);
        assert!((tilted.p() - v.p()).abs() < 1e-9);
        assert_eq!(tilted.e(), v.e());
        // The opening angle equals the requested polar deflection.
        let cos = crate::kinematics::cos_angle(&v.vect(), &tilted.vect())
            .expect("both vectors are non-zero");
        assert!((cos.acos() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn zero_deflection_is_identity() {
        let v = FourVector::from_pt_eta_phi_m(75.0, 0.9, -1.3, 4.8);
        assert_eq!(deflect(&v, 0.0, 2.0), v);
    }

    #[test]
    fn smearing_keeps_the_event_balanced() {
        let tables = reference_tables();
        let mut engine = SmearingEngine::new(11);
        let kin = kinematic();
        let before = kin.b1 + kin.b2 + kin.lepton1 + kin.lepton2 + kin.met;
        for _ in 0..50 {
            let smeared = engine.smear(&kin, &tables);
            let after =
                smeared.b1 + smeared.b2 + smeared.lepton1 + smeared.lepton2 + smeared.met;
            assert!((after.px() - before.px()).abs() < 1e-9);
            assert!((after.py() - before.py()).abs() < 1e-9);
        }
    }

    #[test]
    fn same_seed_reproduces_the_sequence() {
        let tables = reference_tables();
        let kin = kinematic();
        let mut a = SmearingEngine::new(42);
        let mut b = SmearingEngine::new(42);
        for _ in 0..20 {
            let x = a.smear(&kin, &tables);
            let y = b.smear(&kin, &tables);
            assert_eq!(x.b1, y.b1);
            assert_eq!(x.lepton2, y.lepton2);
            assert_eq!(x.met, y.met);
            assert_eq!(x.hypothesis.m_w1, y.hypothesis.m_w1);
        }
    }

    #[test]
    fn lepton_energy_response_leaves_the_momentum_untouched() {
        // Pin the response factor near 2 and collapse the angular
        // templates so the direction stays put.
        let tables = ReferenceTables {
            mlb: broad_mlb_template(),
            jet_energy: BinnedTemplate::uniform(0.7, 1.3, vec![1.0; 12])
                .expect("flat template is valid"),
            lepton_energy: BinnedTemplate::uniform(1.9, 2.1, vec![1.0; 4])
                .expect("flat template is valid"),
            jet_angular: BinnedTemplate::uniform(0.0, 1e-12, vec![1.0; 2])
                .expect("flat template is valid"),
            lepton_angular: BinnedTemplate::uniform(0.0, 1e-12, vec![1.0; 2])
                .expect("flat template is valid"),
        };
        let kin = kinematic();
        let mut engine = SmearingEngine::new(5);
        for _ in 0..20 {
            let smeared = engine.smear(&kin, &tables);
            assert!((smeared.lepton1.px() - kin.lepton1.px()).abs() < 1e-6);
            assert!((smeared.lepton1.pt() - kin.lepton1.pt()).abs() < 1e-6);
            assert!((smeared.lepton2.pz() - kin.lepton2.pz()).abs() < 1e-6);
            let ratio = smeared.lepton1.e() / kin.lepton1.e();
            assert!((1.9..2.1).contains(&ratio));
        }
    }

    #[test]
    fn w_masses_are_redrawn_within_physical_bounds() {
        let tables = reference_tables();
        let mut engine = SmearingEngine::new(3);
        let kin = kinematic();
        for _ in 0..100 {
            let smeared = engine.smear(&kin, &tables);
            assert!(smeared.hypothesis.m_w1 > 1.0 && smeared.hypothesis.m_w1 < 500.0);
            assert!(smeared.hypothesis.m_w2 > 1.0 && smeared.hypothesis.m_w2 < 500.0);
        }
    }
}
