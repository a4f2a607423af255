//! Event-level driver: enumerates jet-lepton pairings, escalates to
//! smeared retries when the exact solve fails, refines a found solution
//! by resampling around it and assembles the output record.

use anyhow::{ensure, Result};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::event::{
    preselect, EventInput, EventKinematic, ScoreStatus, WEIGHT_FAILED, WEIGHT_NOT_EVALUATED,
};
use crate::kinematics::FourVector;
use crate::observables::{mblt, mt2_dilepton, mt2_lepton_bjet, rest_frame_cos_phi, Mt2Solver};
use crate::smearing::SmearingEngine;
use crate::templates::ReferenceTables;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Smeared attempts per escalation or refinement pass.
    pub smearing_budget: usize,
    /// Disables both smearing passes when false; the solve is then fully
    /// deterministic.
    pub run_smearing: bool,
    pub seed: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            smearing_budget: 100,
            run_smearing: true,
            seed: 0,
        }
    }
}

/// Flat per-event output. Quantities that could not be produced carry
/// a sentinel: -99 when never evaluated, -49 when evaluated and failed.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub n_bjets: usize,
    /// Jet-list indices of the b-tagged jets.
    pub bjet_indexes: Vec<usize>,
    pub reco_weight: f64,
    pub dark_pt: f64,
    pub overlapping_factor: f64,
    pub mt2_ll: f64,
    pub mt2_bl: f64,
    pub mblt: f64,
    /// Scalar ET sum plus the transverse momenta of the four retained
    /// reconstruction objects.
    pub total_et: f64,
    pub cos_theta_ll: f64,
    pub cos_theta_l1b1: f64,
    pub cos_theta_l2b2: f64,
    pub cos_phi_ll: f64,
}

impl EventRecord {
    /// Whether a pairing was reconstructed; winners always carry a
    /// positive weight, failures a negative sentinel.
    pub fn reco_worked(&self) -> bool {
        self.reco_weight > 0.0
    }
}

/// Reconstruction job state: the reference tables, the smearing source
/// and running efficiency counters.
pub struct CombinationSearch {
    tables: ReferenceTables,
    config: ReconstructionConfig,
    smearer: SmearingEngine,
    processed: u64,
    selected: u64,
    reconstructed: u64,
}

impl CombinationSearch {
    pub fn new(tables: ReferenceTables, config: ReconstructionConfig) -> Result<Self> {
        ensure!(
            !config.run_smearing || config.smearing_budget > 0,
            "smearing is enabled but the budget is zero"
        );
        let (lo, hi) = tables.mlb.support();
        ensure!(
            lo >= 0.0 && hi > lo,
            "mass template support [{lo}, {hi}) is not a physical mass range"
        );
        Ok(Self {
            smearer: SmearingEngine::new(config.seed),
            tables,
            config,
            processed: 0,
            selected: 0,
            reconstructed: 0,
        })
    }

    /// Runs the full reconstruction on one event. `None` means the event
    /// failed the preselection; everything past that produces a record,
    /// with sentinels standing in for failed quantities.
    pub fn reconstruct(
        &mut self,
        input: &EventInput,
        mt2: &impl Mt2Solver,
    ) -> Option<EventRecord> {
        self.processed += 1;
        let Some(event) = preselect(input) else {
            trace!("event failed the dilepton selection");
            return None;
        };
        self.selected += 1;

        let l1 = event.lepton1.p4;
        let l2 = event.lepton2.p4;

        let tagged = event.tagged_indices();
        let jet1 = tagged[0];
        let mut candidates = tagged.clone();
        if tagged.len() == 1 {
            // A single tag leaves the second b ambiguous; try every jet.
            candidates.extend(0..event.jets.len());
        }
        let mut seen = vec![false; event.jets.len()];
        candidates.retain(|&i| !std::mem::replace(&mut seen[i], true));

        let mut best: Option<EventKinematic> = None;
        let mut max_weight = 0.0_f64;
        let mut saw_candidates = false;
        // Last pairing considered, kept unsmeared; failed events compute
        // their mass variables from it.
        let mut spare: Option<EventKinematic> = None;

        for &jet2 in &candidates {
            if jet2 == jet1 {
                continue;
            }
            let b1 = event.jets[jet1].p4;
            let b2 = event.jets[jet2].p4;
            // Pristine copies of both pairings; smeared attempts start
            // from these, never from a reconstructed one.
            let orderings = [
                EventKinematic::new(l1, l2, b1, b2, event.met),
                EventKinematic::new(l1, l2, b2, b1, event.met),
            ];
            spare = Some(orderings[0].clone());

            for pristine in &orderings {
                let mut attempt = pristine.clone();
                attempt.run_reco(&self.tables.mlb);
                saw_candidates |= attempt.status != ScoreStatus::NotEvaluated;
                if attempt.status == ScoreStatus::Scored && attempt.weight() > max_weight {
                    max_weight = attempt.weight();
                    best = Some(attempt);
                }
            }

            // Escalation: only while nothing has worked yet, resample the
            // two pairings alternately and take the first improvement.
            if best.is_none() && self.config.run_smearing {
                for i in 0..self.config.smearing_budget {
                    let mut attempt = self.smearer.smear(&orderings[i % 2], &self.tables);
                    attempt.run_reco(&self.tables.mlb);
                    saw_candidates |= attempt.status != ScoreStatus::NotEvaluated;
                    if attempt.status == ScoreStatus::Scored && attempt.weight() > max_weight {
                        max_weight = attempt.weight();
                        best = Some(attempt);
                        break;
                    }
                }
            }
        }

        let n_bjets = tagged.len();
        let mblt_value = mblt(&l1, &l2, &event.jets).unwrap_or(WEIGHT_NOT_EVALUATED);

        let Some(mut best) = best else {
            debug!("no pairing produced a scored solution");
            let spare = spare.unwrap_or_else(|| {
                EventKinematic::new(l1, l2, event.jets[0].p4, event.jets[1].p4, event.met)
            });
            return Some(EventRecord {
                n_bjets,
                bjet_indexes: tagged,
                reco_weight: if saw_candidates {
                    WEIGHT_FAILED
                } else {
                    WEIGHT_NOT_EVALUATED
                },
                dark_pt: WEIGHT_NOT_EVALUATED,
                overlapping_factor: WEIGHT_NOT_EVALUATED,
                mt2_ll: mt2_dilepton(&spare.lepton1, &spare.lepton2, &spare.met, mt2),
                mt2_bl: mt2_lepton_bjet(
                    &spare.lepton1,
                    &spare.b1,
                    &spare.lepton2,
                    &spare.b2,
                    &spare.met,
                    mt2,
                ),
                mblt: mblt_value,
                total_et: event.sum_et + object_pt_sum(&spare),
                cos_theta_ll: WEIGHT_NOT_EVALUATED,
                cos_theta_l1b1: WEIGHT_NOT_EVALUATED,
                cos_theta_l2b2: WEIGHT_NOT_EVALUATED,
                cos_phi_ll: WEIGHT_NOT_EVALUATED,
            });
        };
        self.reconstructed += 1;

        let (top1, top2) = self.refine(&mut best, &mut max_weight);
        let solution = best
            .solution
            .as_ref()
            .expect("a scored attempt carries its solution");

        debug!(
            "reconstructed with weight {:.3}, m(tt) = {:.1}",
            max_weight,
            (top1 + top2).m()
        );

        Some(EventRecord {
            n_bjets,
            bjet_indexes: tagged,
            reco_weight: max_weight,
            dark_pt: solution.dark_pt.unwrap_or(WEIGHT_FAILED),
            overlapping_factor: solution.overlapping_factor.unwrap_or(WEIGHT_FAILED),
            mt2_ll: mt2_dilepton(&best.lepton1, &best.lepton2, &best.met, mt2),
            mt2_bl: mt2_lepton_bjet(
                &best.lepton1,
                &best.b1,
                &best.lepton2,
                &best.b2,
                &best.met,
                mt2,
            ),
            mblt: mblt_value,
            total_et: event.sum_et + object_pt_sum(&best),
            cos_theta_ll: best.lepton1.cos_theta() * best.lepton2.cos_theta(),
            cos_theta_l1b1: best.lepton1.cos_theta() * best.b1.cos_theta(),
            cos_theta_l2b2: best.lepton2.cos_theta() * best.b2.cos_theta(),
            cos_phi_ll: rest_frame_cos_phi(&top1, &top2, &best.lepton1, &best.lepton2)
                .unwrap_or(WEIGHT_FAILED),
        })
    }

    /// Resamples around the running best for the full budget. An attempt
    /// beating the running weight replaces the best, raises the bar and
    /// joins a score-weighted average of the reconstructed tops. Falls
    /// back to the chosen attempt's tops when nothing improves.
    fn refine(
        &mut self,
        best: &mut EventKinematic,
        max_weight: &mut f64,
    ) -> (FourVector, FourVector) {
        let fallback = best
            .top1()
            .zip(best.top2())
            .expect("a scored attempt carries its tops");
        if !self.config.run_smearing {
            return fallback;
        }
        let mut sum_w = 0.0;
        let mut avg1 = FourVector::zero();
        let mut avg2 = FourVector::zero();
        for _ in 0..self.config.smearing_budget {
            let mut attempt = self.smearer.smear(best, &self.tables);
            attempt.run_reco(&self.tables.mlb);
            if attempt.status != ScoreStatus::Scored {
                continue;
            }
            let w = attempt.weight();
            if w <= *max_weight {
                continue;
            }
            if let Some((t1, t2)) = attempt.top1().zip(attempt.top2()) {
                sum_w += w;
                avg1 = avg1 + t1 * w;
                avg2 = avg2 + t2 * w;
                *max_weight = w;
                *best = attempt;
            }
        }
        if sum_w > 0.0 {
            (avg1 * (1.0 / sum_w), avg2 * (1.0 / sum_w))
        } else {
            fallback
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn selected(&self) -> u64 {
        self.selected
    }

    pub fn reconstructed(&self) -> u64 {
        self.reconstructed
    }

    /// Fraction of processed events with a working reconstruction.
    pub fn efficiency(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.reconstructed as f64 / self.processed as f64
        }
    }
}

fn object_pt_sum(kin: &EventKinematic) -> f64 {
    kin.b1.pt() + kin.b2.pt() + kin.lepton1.pt() + kin.lepton2.pt()
}
