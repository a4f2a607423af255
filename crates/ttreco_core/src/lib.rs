//! Kinematic reconstruction of dilepton top-quark-pair events.
//!
//! Both invisible momenta are recovered analytically by intersecting the
//! conics induced by the W and top mass-shell constraints, candidate
//! pairings are ranked with empirical mass templates, and events with no
//! exact solution are retried under resolution smearing. On top of the
//! reconstructed system the crate derives the stransverse masses, the
//! minimax lepton-jet mass and the rest-frame dilepton angle.
//!
//! [`search::CombinationSearch`] is the per-job entry point; the modules
//! underneath it are usable on their own.

pub mod event;
pub mod kinematics;
pub mod observables;
pub mod search;
pub mod selector;
pub mod smearing;
pub mod solver;
pub mod templates;

#[cfg(test)]
pub(crate) mod testutil;
