//! Event-level types: physics constants, detector inputs, the dilepton
//! preselection and the per-hypothesis reconstruction state.

use serde::{Deserialize, Serialize};

use crate::kinematics::FourVector;
use crate::selector::{select, SelectedSolution, Selection};
use crate::solver::{solve, MassHypothesis};
use crate::templates::BinnedTemplate;

pub const W_MASS: f64 = 80.379;
pub const W_WIDTH: f64 = 2.085;
pub const TOP_MASS: f64 = 173.0;
pub const ELECTRON_MASS: f64 = 0.000511;
pub const MUON_MASS: f64 = 0.106;

/// b-tag discriminant threshold for the loose working point.
pub const BTAG_THRESHOLD: f64 = 0.2217;

/// Sentinel for quantities that were never evaluated for the event.
pub const WEIGHT_NOT_EVALUATED: f64 = -99.0;
/// Sentinel for quantities whose evaluation was attempted and failed.
pub const WEIGHT_FAILED: f64 = -49.0;

/// Lepton-pair thresholds of the dilepton selection, in GeV.
const LEADING_LEPTON_PT_MIN: f64 = 25.0;
const TRAILING_LEPTON_PT_MIN: f64 = 20.0;
const THIRD_LEPTON_VETO_PT: f64 = 10.0;
const DILEPTON_MASS_MIN: f64 = 20.0;
const JET_PT_MIN: f64 = 30.0;

/// Rest mass for a charged-lepton PDG code; only electrons and muons
/// enter the selection.
pub fn lepton_mass(pdg_id: i32) -> f64 {
    match pdg_id.abs() {
        11 => ELECTRON_MASS,
        13 => MUON_MASS,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Lepton {
    pub p4: FourVector,
    /// Signed PDG code; the sign carries the charge.
    pub pdg_id: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Jet {
    pub p4: FourVector,
    /// b-tag discriminant in [0, 1].
    pub btag: f64,
}

impl Jet {
    pub fn is_tagged(&self) -> bool {
        self.btag > BTAG_THRESHOLD
    }
}

/// One detector event as handed to the reconstruction. Leptons and jets
/// are expected in descending-pt order, as delivered by the upstream
/// ntuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInput {
    pub leptons: Vec<Lepton>,
    pub jets: Vec<Jet>,
    pub met: FourVector,
    /// Scalar sum of transverse energy from the missing-momentum
    /// reconstruction, in GeV.
    pub sum_et: f64,
}

/// An event that passed the dilepton preselection, with the two selected
/// leptons pulled out and the jets untouched.
#[derive(Debug, Clone)]
pub struct SelectedEvent {
    pub lepton1: Lepton,
    pub lepton2: Lepton,
    pub jets: Vec<Jet>,
    pub met: FourVector,
    pub sum_et: f64,
}

impl SelectedEvent {
    /// Indices of the b-tagged jets, in jet order.
    pub fn tagged_indices(&self) -> Vec<usize> {
        self.jets
            .iter()
            .enumerate()
            .filter(|(_, j)| j.is_tagged())
            .map(|(i, _)| i)
            .collect()
    }
}

/// Applies the dilepton selection: two opposite-sign leptons above
/// threshold with no third loose lepton, a dilepton mass above the
/// low-mass resonance region, two hard jets and at least one b tag.
pub fn preselect(input: &EventInput) -> Option<SelectedEvent> {
    if input.leptons.len() < 2 {
        return None;
    }
    let l1 = input.leptons[0];
    let l2 = input.leptons[1];
    if l1.p4.pt() < LEADING_LEPTON_PT_MIN || l2.p4.pt() < TRAILING_LEPTON_PT_MIN {
        return None;
    }
    let third_pt = input.leptons.get(2).map(|l| l.p4.pt()).unwrap_or(0.0);
    if third_pt > THIRD_LEPTON_VETO_PT {
        return None;
    }
    if l1.pdg_id * l2.pdg_id >= 0 {
        return None;
    }
    if (l1.p4 + l2.p4).m() < DILEPTON_MASS_MIN {
        return None;
    }
    if input.jets.len() < 2 {
        return None;
    }
    if input.jets[0].p4.pt() <= JET_PT_MIN || input.jets[1].p4.pt() <= JET_PT_MIN {
        return None;
    }
    if !input.jets.iter().any(Jet::is_tagged) {
        return None;
    }
    Some(SelectedEvent {
        lepton1: l1,
        lepton2: l2,
        jets: input.jets.clone(),
        met: input.met,
        sum_et: input.sum_et,
    })
}

/// Outcome of one reconstruction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreStatus {
    /// The solver produced no candidates; no weight was computed.
    NotEvaluated,
    /// Candidates existed but the pairing weight could not be evaluated.
    Failed,
    /// A candidate was selected and scored.
    Scored,
}

/// One (lepton, b-jet) pairing under one mass hypothesis, together with
/// the result of reconstructing it. Cloned freely: the smearing loop
/// snapshots a pristine copy before each attempt.
#[derive(Debug, Clone)]
pub struct EventKinematic {
    pub lepton1: FourVector,
    pub lepton2: FourVector,
    pub b1: FourVector,
    pub b2: FourVector,
    pub met: FourVector,
    pub hypothesis: MassHypothesis,
    pub status: ScoreStatus,
    pub solution: Option<SelectedSolution>,
}

impl EventKinematic {
    pub fn new(
        lepton1: FourVector,
        lepton2: FourVector,
        b1: FourVector,
        b2: FourVector,
        met: FourVector,
    ) -> Self {
        Self {
            lepton1,
            lepton2,
            b1,
            b2,
            met,
            hypothesis: MassHypothesis::default(),
            status: ScoreStatus::NotEvaluated,
            solution: None,
        }
    }

    /// Solves the constraint system for the current kinematics and mass
    /// hypothesis, selects a candidate and scores it. Resets any previous
    /// outcome first.
    pub fn run_reco(&mut self, mlb: &BinnedTemplate) {
        self.status = ScoreStatus::NotEvaluated;
        self.solution = None;
        let set = solve(
            &self.b1,
            &self.b2,
            &self.lepton1,
            &self.lepton2,
            &self.met,
            &self.hypothesis,
        );
        match select(&set, &self.lepton1, &self.b1, &self.lepton2, &self.b2, mlb) {
            Selection::NoCandidates => {}
            Selection::WeightUndefined => self.status = ScoreStatus::Failed,
            Selection::Chosen(solution) => {
                self.status = ScoreStatus::Scored;
                self.solution = Some(solution);
            }
        }
    }

    /// The pairing weight, or the sentinel matching the outcome.
    pub fn weight(&self) -> f64 {
        match self.status {
            ScoreStatus::NotEvaluated => WEIGHT_NOT_EVALUATED,
            ScoreStatus::Failed => WEIGHT_FAILED,
            ScoreStatus::Scored => self
                .solution
                .as_ref()
                .map(|s| s.weight)
                .unwrap_or(WEIGHT_FAILED),
        }
    }

    /// Reconstructed top quark on side 1, if the attempt was scored.
    pub fn top1(&self) -> Option<FourVector> {
        self.solution
            .as_ref()
            .map(|s| self.lepton1 + self.b1 + s.nu1)
    }

    /// Reconstructed anti-top on side 2, if the attempt was scored.
    pub fn top2(&self) -> Option<FourVector> {
        self.solution
            .as_ref()
            .map(|s| self.lepton2 + self.b2 + s.nu2)
    }

    pub fn w1(&self) -> Option<FourVector> {
        self.solution.as_ref().map(|s| self.lepton1 + s.nu1)
    }

    pub fn w2(&self) -> Option<FourVector> {
        self.solution.as_ref().map(|s| self.lepton2 + s.nu2)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        lepton_mass, preselect, EventInput, EventKinematic, Jet, Lepton, ScoreStatus,
        WEIGHT_FAILED, WEIGHT_NOT_EVALUATED,
    };
    use crate::kinematics::FourVector;
    use crate::testutil::{broad_mlb_template, dilepton_truth};

    fn lepton(pt: f64, eta: f64, phi: f64, pdg_id: i32) -> Lepton {
        Lepton {
            p4: FourVector::from_pt_eta_phi_m(pt, eta, phi, lepton_mass(pdg_id)),
            pdg_id,
        }
    }

    fn jet(pt: f64, eta: f64, phi: f64, btag: f64) -> Jet {
        Jet {
            p4: FourVector::from_pt_eta_phi_m(pt, eta, phi, 4.8),
            btag,
        }
    }

    fn passing_event() -> EventInput {
        EventInput {
            leptons: vec![lepton(45.0, 0.3, 0.5, -11), lepton(30.0, -0.8, -2.0, 13)],
            jets: vec![jet(80.0, 0.4, 1.8, 0.9), jet(55.0, -1.1, -0.6, 0.1)],
            met: FourVector::from_pt_phi(60.0, 2.2),
            sum_et: 420.0,
        }
    }

    #[test]
    fn preselection_accepts_nominal_event() {
        let sel = preselect(&passing_event()).expect("event should pass");
        assert_eq!(sel.tagged_indices(), vec![0]);
        assert_eq!(sel.lepton1.pdg_id, -11);
    }

    #[test]
    fn preselection_rejects_soft_leptons() {
        let mut ev = passing_event();
        ev.leptons[0] = lepton(20.0, 0.3, 0.5, -11);
        assert!(preselect(&ev).is_none());
        let mut ev = passing_event();
        ev.leptons[1] = lepton(15.0, -0.8, -2.0, 13);
        assert!(preselect(&ev).is_none());
    }

    #[test]
    fn preselection_vetoes_third_lepton() {
        let mut ev = passing_event();
        ev.leptons.push(lepton(12.0, 1.0, 0.0, 11));
        assert!(preselect(&ev).is_none());
        // A third lepton below the veto threshold is allowed.
        let mut ev = passing_event();
        ev.leptons.push(lepton(8.0, 1.0, 0.0, 11));
        assert!(preselect(&ev).is_some());
    }

    #[test]
    fn preselection_requires_opposite_sign() {
        let mut ev = passing_event();
        ev.leptons[1].pdg_id = -13;
        assert!(preselect(&ev).is_none());
    }

    #[test]
    fn preselection_rejects_low_dilepton_mass() {
        let mut ev = passing_event();
        ev.leptons[0] = lepton(45.0, -0.8, -2.0, -11);
        ev.leptons[1] = lepton(30.0, -0.8, -2.0, 13);
        assert!(preselect(&ev).is_none());
    }

    #[test]
    fn preselection_requires_two_hard_jets_and_a_tag() {
        let mut ev = passing_event();
        ev.jets[1] = jet(25.0, -1.1, -0.6, 0.1);
        assert!(preselect(&ev).is_none());
        let mut ev = passing_event();
        ev.jets[0].btag = 0.1;
        assert!(preselect(&ev).is_none());
    }

    #[test]
    fn run_reco_scores_exact_decay() {
        let truth = dilepton_truth();
        let mlb = broad_mlb_template();
        let mut kin = EventKinematic::new(
            truth.lepton1,
            truth.lepton2,
            truth.b1,
            truth.b2,
            truth.met,
        );
        kin.hypothesis = truth.hypothesis;
        kin.run_reco(&mlb);
        assert_eq!(kin.status, ScoreStatus::Scored);
        assert!(kin.weight().is_finite());
        assert!(kin.weight() > WEIGHT_NOT_EVALUATED);
        let top1 = kin.top1().expect("scored attempt has tops");
        assert!((top1.m() - truth.hypothesis.m_t1).abs() < 1e-3);
    }

    #[test]
    fn run_reco_without_candidates_is_not_evaluated() {
        let truth = dilepton_truth();
        let mlb = broad_mlb_template();
        let flipped =
            FourVector::from_pt_phi(8.0 * truth.met.pt(), truth.met.phi() + std::f64::consts::PI);
        let mut kin = EventKinematic::new(
            truth.lepton1,
            truth.lepton2,
            truth.b1,
            truth.b2,
            flipped,
        );
        kin.hypothesis = truth.hypothesis;
        kin.run_reco(&mlb);
        assert_eq!(kin.status, ScoreStatus::NotEvaluated);
        assert_eq!(kin.weight(), WEIGHT_NOT_EVALUATED);
        assert!(kin.top1().is_none());
    }

    #[test]
    fn run_reco_with_unscorable_pairing_is_failed() {
        let truth = dilepton_truth();
        // Template support excludes every physical lepton-b mass, so the
        // density lookup fails even though candidates exist.
        let mlb = crate::templates::BinnedTemplate::uniform(0.0, 1.0, vec![1.0; 4])
            .expect("template should build");
        let mut kin = EventKinematic::new(
            truth.lepton1,
            truth.lepton2,
            truth.b1,
            truth.b2,
            truth.met,
        );
        kin.hypothesis = truth.hypothesis;
        kin.run_reco(&mlb);
        assert_eq!(kin.status, ScoreStatus::Failed);
        assert_eq!(kin.weight(), WEIGHT_FAILED);
    }
}
