//! Empirical reference distributions used by the reconstruction.
//!
//! The engine treats these as opaque lookup tables: `density(x)` returns
//! the bin content at `x`, `sample(rng)` draws from the distribution by
//! inverse transform. How they are produced (and in which file format)
//! is the caller's concern.

use rand::Rng;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template has no bins")]
    Empty,
    #[error("expected {expected} bin edges for {bins} bins, got {got}")]
    EdgeCount {
        expected: usize,
        bins: usize,
        got: usize,
    },
    #[error("bin edges must be finite and strictly increasing (edge index {0})")]
    EdgeOrder(usize),
    #[error("bin contents must be finite and non-negative (bin index {0})")]
    NegativeContent(usize),
    #[error("template has zero total mass; sampling is undefined")]
    ZeroMass,
}

/// A one-dimensional binned distribution with variable-width bins.
#[derive(Debug, Clone, Serialize)]
pub struct BinnedTemplate {
    edges: Vec<f64>,
    contents: Vec<f64>,
    cumulative: Vec<f64>,
    total: f64,
}

impl BinnedTemplate {
    /// Validates and builds a template from `n + 1` edges and `n` bin
    /// contents.
    pub fn new(edges: Vec<f64>, contents: Vec<f64>) -> Result<Self, TemplateError> {
        if contents.is_empty() {
            return Err(TemplateError::Empty);
        }
        if edges.len() != contents.len() + 1 {
            return Err(TemplateError::EdgeCount {
                expected: contents.len() + 1,
                bins: contents.len(),
                got: edges.len(),
            });
        }
        for (i, pair) in edges.windows(2).enumerate() {
            if !pair[0].is_finite() || !pair[1].is_finite() || pair[1] <= pair[0] {
                return Err(TemplateError::EdgeOrder(i + 1));
            }
        }
        for (i, &c) in contents.iter().enumerate() {
            if !c.is_finite() || c < 0.0 {
                return Err(TemplateError::NegativeContent(i));
            }
        }
        let mut cumulative = Vec::with_capacity(contents.len());
        let mut running = 0.0;
        for &c in &contents {
            running += c;
            cumulative.push(running);
        }
        if running <= 0.0 {
            return Err(TemplateError::ZeroMass);
        }
        Ok(Self {
            edges,
            contents,
            cumulative,
            total: running,
        })
    }

    /// Builds a template with uniform bin widths over `[lo, hi)`.
    pub fn uniform(lo: f64, hi: f64, contents: Vec<f64>) -> Result<Self, TemplateError> {
        let n = contents.len();
        if n == 0 {
            return Err(TemplateError::Empty);
        }
        let width = (hi - lo) / n as f64;
        let edges = (0..=n).map(|i| lo + width * i as f64).collect();
        Self::new(edges, contents)
    }

    fn find_bin(&self, x: f64) -> Option<usize> {
        if !x.is_finite() || x < self.edges[0] || x >= self.edges[self.edges.len() - 1] {
            return None;
        }
        let idx = self.edges.partition_point(|&e| e <= x);
        Some(idx - 1)
    }

    /// Bin content at `x`; `None` for under/overflow.
    pub fn density(&self, x: f64) -> Option<f64> {
        self.find_bin(x).map(|i| self.contents[i])
    }

    /// Draws from the distribution: a bin by cumulative content, then a
    /// uniform position within the bin.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        let u = rng.gen_range(0.0..self.total);
        let bin = self.cumulative.partition_point(|&c| c <= u);
        let bin = bin.min(self.contents.len() - 1);
        let prev = if bin == 0 {
            0.0
        } else {
            self.cumulative[bin - 1]
        };
        let frac = (u - prev) / self.contents[bin];
        self.edges[bin] + frac * (self.edges[bin + 1] - self.edges[bin])
    }

    pub fn support(&self) -> (f64, f64) {
        (self.edges[0], self.edges[self.edges.len() - 1])
    }
}

/// The reference tables one reconstruction job needs, loaded once and
/// shared read-only across events.
#[derive(Debug, Clone)]
pub struct ReferenceTables {
    /// Lepton-b-jet invariant-mass template used for the pairing weight.
    pub mlb: BinnedTemplate,
    /// Jet energy-response distribution. Carried with the other handles;
    /// the smearing currently applies a fixed Gaussian resolution to jets
    /// instead of drawing from it.
    pub jet_energy: BinnedTemplate,
    /// Lepton energy-response distribution (multiplicative factor).
    pub lepton_energy: BinnedTemplate,
    /// Jet angular-resolution distribution (polar deviation, radians).
    pub jet_angular: BinnedTemplate,
    /// Lepton angular-resolution distribution (polar deviation, radians).
    pub lepton_angular: BinnedTemplate,
}

#[cfg(test)]
mod tests {
    use super::{BinnedTemplate, TemplateError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn template() -> BinnedTemplate {
        BinnedTemplate::new(vec![0.0, 1.0, 2.0, 4.0], vec![0.5, 2.0, 1.0])
            .expect("template should build")
    }

    #[test]
    fn density_returns_bin_content() {
        let t = template();
        assert_eq!(t.density(0.3), Some(0.5));
        assert_eq!(t.density(1.0), Some(2.0));
        assert_eq!(t.density(3.9), Some(1.0));
    }

    #[test]
    fn density_is_none_outside_support() {
        let t = template();
        assert_eq!(t.density(-0.1), None);
        assert_eq!(t.density(4.0), None);
        assert_eq!(t.density(f64::NAN), None);
    }

    #[test]
    fn sampling_stays_within_support_and_is_seeded() {
        let t = template();
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let x = t.sample(&mut a);
            let y = t.sample(&mut b);
            assert_eq!(x, y);
            assert!((0.0..4.0).contains(&x));
        }
    }

    #[test]
    fn construction_rejects_bad_input() {
        assert!(matches!(
            BinnedTemplate::new(vec![0.0, 1.0], vec![]),
            Err(TemplateError::Empty)
        ));
        assert!(matches!(
            BinnedTemplate::new(vec![0.0, 1.0, 0.5], vec![1.0, 1.0]),
            Err(TemplateError::EdgeOrder(2))
        ));
        assert!(matches!(
            BinnedTemplate::new(vec![0.0, 1.0, 2.0], vec![1.0, -1.0]),
            Err(TemplateError::NegativeContent(1))
        ));
        assert!(matches!(
            BinnedTemplate::new(vec![0.0, 1.0], vec![0.0]),
            Err(TemplateError::ZeroMass)
        ));
        assert!(matches!(
            BinnedTemplate::new(vec![0.0, 1.0, 2.0, 3.0], vec![1.0, 1.0]),
            Err(TemplateError::EdgeCount { .. })
        ));
    }

    #[test]
    fn uniform_builder_spaces_edges_evenly() {
        let t = BinnedTemplate::uniform(0.0, 10.0, vec![1.0; 5]).expect("template should build");
        assert_eq!(t.support(), (0.0, 10.0));
        assert_eq!(t.density(3.0), Some(1.0));
    }
}
