//! Shared test fixtures: an exactly-constructed dilepton decay chain
//! and flat reference tables.

use nalgebra::Vector3;

use crate::event::{EventInput, Jet, Lepton, TOP_MASS, W_MASS};
use crate::kinematics::FourVector;
use crate::solver::MassHypothesis;
use crate::templates::{BinnedTemplate, ReferenceTables};

const B_MASS: f64 = 4.8;

/// A fully specified decay chain built from exact two-body decays, so
/// every mass-shell and balance constraint holds to machine precision.
pub struct DileptonTruth {
    pub lepton1: FourVector,
    pub lepton2: FourVector,
    pub b1: FourVector,
    pub b2: FourVector,
    pub nu1: FourVector,
    pub nu2: FourVector,
    pub met: FourVector,
    pub hypothesis: MassHypothesis,
}

fn two_body_momentum(m: f64, m1: f64, m2: f64) -> f64 {
    let a = m * m - (m1 + m2) * (m1 + m2);
    let b = m * m - (m1 - m2) * (m1 - m2);
    (a * b).sqrt() / (2.0 * m)
}

/// Decays `parent` into masses `m1`, `m2` with the first daughter along
/// `dir` in the parent rest frame.
fn decay(parent: &FourVector, m1: f64, m2: f64, dir: &Vector3<f64>) -> (FourVector, FourVector) {
    let p = two_body_momentum(parent.m(), m1, m2);
    let d = dir.normalize();
    let first = FourVector::new(p * d.x, p * d.y, p * d.z, (p * p + m1 * m1).sqrt());
    let second = FourVector::new(-p * d.x, -p * d.y, -p * d.z, (p * p + m2 * m2).sqrt());
    let beta = parent.boost_vector();
    (first.boost(&beta), second.boost(&beta))
}

/// Two hard tops with roughly perpendicular decay planes: every visible
/// object lands well above the selection thresholds and the neutrinos
/// leave a missing momentum of tens of GeV.
pub fn dilepton_truth() -> DileptonTruth {
    let top1 = FourVector::from_pt_eta_phi_m(300.0, 0.30, 0.50, TOP_MASS);
    let top2 = FourVector::from_pt_eta_phi_m(280.0, -0.40, -2.60, TOP_MASS);

    let (w1, b1) = decay(&top1, W_MASS, B_MASS, &Vector3::new(-0.46, 0.84, 0.10));
    let (w2, b2) = decay(&top2, W_MASS, B_MASS, &Vector3::new(0.48, -0.79, 0.10));

    let (lepton1, nu1) = decay(&w1, 0.0, 0.0, &Vector3::new(-0.70, 0.63, 0.05));
    let (lepton2, nu2) = decay(&w2, 0.0, 0.0, &Vector3::new(-0.73, 0.59, -0.05));

    let missing = nu1 + nu2;
    let met = FourVector::from_pt_phi(missing.pt(), missing.phi());

    DileptonTruth {
        lepton1,
        lepton2,
        b1,
        b2,
        nu1,
        nu2,
        met,
        hypothesis: MassHypothesis::default(),
    }
}

/// The truth chain dressed as a detector event: an e-mu pair and two
/// tagged jets.
pub fn scenario_event(truth: &DileptonTruth) -> EventInput {
    EventInput {
        leptons: vec![
            Lepton {
                p4: truth.lepton1,
                pdg_id: -11,
            },
            Lepton {
                p4: truth.lepton2,
                pdg_id: 13,
            },
        ],
        jets: vec![
            Jet {
                p4: truth.b1,
                btag: 0.9,
            },
            Jet {
                p4: truth.b2,
                btag: 0.8,
            },
        ],
        met: truth.met,
        sum_et: 500.0,
    }
}

/// Flat unit-density mass template over the physical lepton-b range, so
/// every scored pairing gets the same known weight.
pub fn broad_mlb_template() -> BinnedTemplate {
    BinnedTemplate::uniform(0.0, 400.0, vec![1.0; 80]).expect("flat template is valid")
}

/// Tables with flat responses and small angular deviations.
pub fn reference_tables() -> ReferenceTables {
    ReferenceTables {
        mlb: broad_mlb_template(),
        jet_energy: BinnedTemplate::uniform(0.7, 1.3, vec![1.0; 12])
            .expect("flat template is valid"),
        lepton_energy: BinnedTemplate::uniform(0.9, 1.1, vec![1.0; 10])
            .expect("flat template is valid"),
        jet_angular: BinnedTemplate::uniform(0.0, 0.05, vec![1.0; 10])
            .expect("flat template is valid"),
        lepton_angular: BinnedTemplate::uniform(0.0, 0.02, vec![1.0; 10])
            .expect("flat template is valid"),
    }
}
