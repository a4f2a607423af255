//! Analytic solver for the invisible momenta in dilepton top-pair decays.
//!
//! Each decay side imposes two mass-shell constraints on its invisible
//! particle: m(lepton + invisible) = mW and m(lepton + b + invisible) = mt.
//! For fixed lepton and b directions those constraints confine the
//! invisible momentum to an ellipse; its projection onto the transverse
//! plane is a conic. The transverse-balance condition
//! invisible1 + invisible2 = missing momentum maps the second side's conic
//! into the first side's plane, so candidate solutions are the real
//! intersection points of two conics. The intersection is computed by
//! extracting a real generalized eigenvalue of the matrix pencil, which
//! yields a degenerate member of the pencil that factors into two lines.
//!
//! The solver is pure: identical inputs produce an identical, identically
//! ordered `SolutionSet`. An empty set is an expected outcome for
//! degenerate geometry or kinematically closed events, not an error.

use crate::kinematics::{cos_angle, FourVector};
use nalgebra::{Matrix3, Rotation3, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::event::{TOP_MASS, W_MASS};

/// Relative tolerance for accepting an intersection point on both conics.
const CONIC_RESIDUAL_TOL: f64 = 1e-4;
/// sin^2 threshold below which the lepton and b directions are treated as
/// collinear and the side has no usable ellipse.
const COLLINEAR_SIN2_MIN: f64 = 1e-12;
/// Relative threshold under which an entry of the degenerate pencil
/// member counts as zero.
const DEGENERATE_ENTRY_TOL: f64 = 1e-12;

/// On-shell mass hypotheses for one reconstruction attempt, in GeV.
/// `chi_a`/`chi_b` are the invisible-particle masses: zero for neutrinos,
/// non-zero for the massive-invisible search variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MassHypothesis {
    pub m_w1: f64,
    pub m_w2: f64,
    pub m_t1: f64,
    pub m_t2: f64,
    pub chi_a: f64,
    pub chi_b: f64,
}

impl Default for MassHypothesis {
    fn default() -> Self {
        Self {
            m_w1: W_MASS,
            m_w2: W_MASS,
            m_t1: TOP_MASS,
            m_t2: TOP_MASS,
            chi_a: 0.0,
            chi_b: 0.0,
        }
    }
}

/// One candidate pair of invisible momenta, together with the two conic
/// matrices it was extracted from. The matrices feed the overlap-factor
/// and dark-pt discriminants downstream and must be consumed as stored.
#[derive(Debug, Clone)]
pub struct SolutionPair {
    pub nu1: FourVector,
    pub nu2: FourVector,
    /// Transverse conic of side 1 in the lab frame.
    pub conic1: Matrix3<f64>,
    /// Side 2's conic mapped into side 1's plane by the balance relation.
    pub conic2: Matrix3<f64>,
}

/// Ordered candidates from one solver invocation; zero to four entries.
/// Never mutated after creation.
#[derive(Debug, Clone, Default)]
pub struct SolutionSet {
    pub pairs: Vec<SolutionPair>,
}

impl SolutionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// The single-side invisible-momentum ellipse for one (b, lepton) pair
/// under fixed (mW, mt, m_invisible) hypotheses.
///
/// `h` maps the unit-circle parametrization (cos t, sin t, 1) to the
/// invisible three-momentum in the lab frame; `h_perp` is its transverse
/// block in homogeneous coordinates, and `conic` the resulting quadratic
/// form on (px, py, 1).
#[derive(Debug, Clone)]
pub struct SideEllipse {
    h: Matrix3<f64>,
    h_perp_inv: Matrix3<f64>,
    conic: Matrix3<f64>,
}

impl SideEllipse {
    /// Constructs the ellipse, or `None` when the geometry is degenerate
    /// (collinear directions, vanishing momenta) or the constraints admit
    /// no real ellipse (Z^2 <= 0).
    pub fn new(b: &FourVector, lepton: &FourVector, mw2: f64, mt2: f64, mn2: f64) -> Option<Self> {
        if b.e() <= 0.0 || lepton.e() <= 0.0 {
            return None;
        }
        let p_b = b.p();
        let p_l = lepton.p();
        if p_b <= 0.0 || p_l <= 0.0 {
            return None;
        }
        let c = cos_angle(&b.vect(), &lepton.vect())?;
        let s2 = 1.0 - c * c;
        if s2 < COLLINEAR_SIN2_MIN {
            return None;
        }
        let s = s2.sqrt();

        let beta_b = b.beta();
        let beta_l = lepton.beta();
        if beta_b <= 0.0 || beta_l <= 0.0 {
            return None;
        }

        // Constraint offsets along the lepton axis and the b axis.
        let x0p = -(mt2 - mw2 - b.m2()) / (2.0 * b.e());
        let x0 = -(mw2 - lepton.m2() - mn2) / (2.0 * lepton.e());

        let sx = (x0 * beta_l - p_l * (1.0 - beta_l * beta_l)) / (beta_l * beta_l);
        let sy = (x0p / beta_b - c * sx) / s;

        let w = (beta_l / beta_b - c) / s;
        let om2 = w * w + 1.0 - beta_l * beta_l;
        if om2 <= 0.0 {
            return None;
        }
        let eps2 = (mw2 - mn2) * (1.0 - beta_l * beta_l);

        let shift = (sx + w * sy) / om2;
        let x1 = sx - shift;
        let y1 = sy - shift * w;

        let z2 = x1 * x1 * om2 - (sy - w * sx).powi(2) - (mw2 - x0 * x0 - eps2);
        if z2 <= 0.0 {
            return None;
        }
        let z = z2.sqrt();
        let om = om2.sqrt();

        // Ellipse parametrization in the lepton-aligned frame F'.
        let h_tilde = Matrix3::new(
            z / om,
            0.0,
            x1 - p_l,
            w * z / om,
            0.0,
            y1,
            0.0,
            z,
            0.0,
        );

        let r_lab = lab_from_lepton_frame(lepton, b);
        let h = r_lab * h_tilde;

        let h_perp = Matrix3::new(
            h[(0, 0)],
            h[(0, 1)],
            h[(0, 2)],
            h[(1, 0)],
            h[(1, 1)],
            h[(1, 2)],
            0.0,
            0.0,
            1.0,
        );
        let h_perp_inv = h_perp.try_inverse()?;
        let conic = h_perp_inv.transpose() * unit_circle() * h_perp_inv;

        Some(Self {
            h,
            h_perp_inv,
            conic,
        })
    }

    /// The lab-frame transverse conic on homogeneous (px, py, 1).
    pub fn conic(&self) -> &Matrix3<f64> {
        &self.conic
    }

    /// Full three-momentum for a point of the ellipse parametrization.
    pub fn point_at(&self, t: f64) -> Vector3<f64> {
        self.h * Vector3::new(t.cos(), t.sin(), 1.0)
    }

    /// Lifts a homogeneous transverse point on the conic back to the full
    /// three-momentum.
    fn lift(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.h * (self.h_perp_inv * v)
    }
}

fn unit_circle() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0))
}

/// Rotation taking the lepton-aligned frame F' (lepton along x, b in the
/// x-y plane) back to the lab frame.
fn lab_from_lepton_frame(lepton: &FourVector, b: &FourVector) -> Matrix3<f64> {
    let r_z = Rotation3::from_axis_angle(&Vector3::z_axis(), -lepton.phi());
    let r_y = Rotation3::from_axis_angle(
        &Vector3::y_axis(),
        std::f64::consts::FRAC_PI_2 - lepton.theta(),
    );
    let b_rot = r_y * (r_z * b.vect());
    let r_x = Rotation3::from_axis_angle(&Vector3::x_axis(), -b_rot.z.atan2(b_rot.y));
    (r_x * r_y * r_z).inverse().into_inner()
}

/// Transverse-balance map: a point v = (px1, py1, 1) on side 1's conic is
/// sent to side 2's transverse momentum (metx - px1, mety - py1, 1).
fn balance_map(met: &FourVector) -> Matrix3<f64> {
    Matrix3::new(
        -1.0,
        0.0,
        met.px(),
        0.0,
        -1.0,
        met.py(),
        0.0,
        0.0,
        1.0,
    )
}

/// Signed cofactor of a 3x3 matrix.
fn cofactor(m: &Matrix3<f64>, row: usize, col: usize) -> f64 {
    let mut vals = [0.0; 4];
    let mut k = 0;
    for i in 0..3 {
        if i == row {
            continue;
        }
        for j in 0..3 {
            if j == col {
                continue;
            }
            vals[k] = m[(i, j)];
            k += 1;
        }
    }
    let minor = vals[0] * vals[3] - vals[1] * vals[2];
    if (row + col) % 2 == 0 {
        minor
    } else {
        -minor
    }
}

/// Factors a degenerate conic into (up to) two lines in homogeneous line
/// coordinates.
///
/// The matrix comes out of the pencil with eigenvalue round-off on every
/// entry, so vanishing coefficients are detected against the matrix
/// scale, not exact zero.
fn factor_degenerate(g: &Matrix3<f64>) -> Vec<Vector3<f64>> {
    let tol = DEGENERATE_ENTRY_TOL * g.norm();
    if g[(0, 0)].abs() <= tol && g[(1, 1)].abs() <= tol {
        if g[(0, 1)].abs() <= tol {
            // Conic reduces to w * (2 g02 x + 2 g12 y + g22 w).
            return vec![
                Vector3::new(0.0, 0.0, 1.0),
                Vector3::new(2.0 * g[(0, 2)], 2.0 * g[(1, 2)], g[(2, 2)]),
            ];
        }
        // 2 g01 xy + 2 g02 xw + 2 g12 yw + g22 w^2 with det = 0 splits as
        // (g01 x + g12 w)(g01 y + g02 w) up to scale.
        return vec![
            Vector3::new(g[(0, 1)], 0.0, g[(1, 2)]),
            Vector3::new(0.0, g[(0, 1)], g[(0, 2)]),
        ];
    }

    // Normalize so the quadratic in y (or x, after swapping) is monic.
    let swap = g[(0, 0)].abs() > g[(1, 1)].abs();
    let q = if swap {
        permute_xy(g)
    } else {
        *g
    };
    let q = q / q[(1, 1)];

    let q22 = cofactor(&q, 2, 2);
    let mut lines = Vec::with_capacity(2);
    if -q22 <= 0.0 {
        // Parallel-line pair.
        let d = -cofactor(&q, 0, 0);
        if d < 0.0 {
            return Vec::new();
        }
        let rd = d.sqrt();
        for sign in [-1.0, 1.0] {
            lines.push(Vector3::new(q[(0, 1)], 1.0, q[(1, 2)] + sign * rd));
        }
    } else {
        // Crossing lines through the conic's singular point.
        let x0 = cofactor(&q, 0, 2) / q22;
        let y0 = cofactor(&q, 1, 2) / q22;
        let r = (-q22).sqrt();
        for sign in [-1.0, 1.0] {
            let m = q[(0, 1)] + sign * r;
            lines.push(Vector3::new(m, 1.0, -y0 - m * x0));
        }
    }

    if swap {
        lines = lines
            .into_iter()
            .map(|l| Vector3::new(l.y, l.x, l.z))
            .collect();
    }
    lines
}

fn permute_xy(g: &Matrix3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        g[(1, 1)],
        g[(1, 0)],
        g[(1, 2)],
        g[(0, 1)],
        g[(0, 0)],
        g[(0, 2)],
        g[(2, 1)],
        g[(2, 0)],
        g[(2, 2)],
    )
}

/// Real intersection points (normalized to w = 1) of a conic and a line.
fn intersect_conic_line(conic: &Matrix3<f64>, line: &Vector3<f64>) -> Vec<Vector3<f64>> {
    let norm = line.norm();
    if norm == 0.0 || !norm.is_finite() {
        return Vec::new();
    }
    // Basis of the line's point space: both u and w are orthogonal to the
    // line covector, so every point on the line is alpha*u + beta*w.
    let axis = smallest_component_axis(line);
    let u = line.cross(&axis).normalize();
    let w = line.cross(&u).normalize();

    let auu = (u.transpose() * conic * u)[(0, 0)];
    let auw = (u.transpose() * conic * w)[(0, 0)];
    let aww = (w.transpose() * conic * w)[(0, 0)];

    let disc = auw * auw - auu * aww;
    if disc < 0.0 || !disc.is_finite() {
        return Vec::new();
    }
    let rd = disc.sqrt();

    // Homogeneous quadratic auu a^2 + 2 auw ab + aww b^2 = 0; pick the
    // root form anchored on the larger diagonal term for stability.
    let ratios: [(f64, f64); 2] = if auu.abs() >= aww.abs() {
        [(-auw + rd, auu), (-auw - rd, auu)]
    } else {
        [(aww, -auw + rd), (aww, -auw - rd)]
    };

    let mut points = Vec::with_capacity(2);
    for (alpha, beta) in ratios {
        if alpha == 0.0 && beta == 0.0 {
            continue;
        }
        let p = u * alpha + w * beta;
        if p.z.abs() <= 1e-12 * p.norm() {
            // Point at infinity; no physical momentum.
            continue;
        }
        points.push(p / p.z);
    }
    points
}

fn smallest_component_axis(v: &Vector3<f64>) -> Vector3<f64> {
    let (ax, ay, az) = (v.x.abs(), v.y.abs(), v.z.abs());
    if ax <= ay && ax <= az {
        Vector3::x()
    } else if ay <= az {
        Vector3::y()
    } else {
        Vector3::z()
    }
}

fn conic_residual(p: &Vector3<f64>, m: &Matrix3<f64>) -> f64 {
    let value = (p.transpose() * m * p)[(0, 0)].abs();
    let scale = m.norm() * p.norm_squared();
    if scale == 0.0 {
        value
    } else {
        value / scale
    }
}

/// Real intersection points of two conics via the degenerate member of
/// their pencil.
fn intersect_conics(a: &Matrix3<f64>, b: &Matrix3<f64>) -> Vec<Vector3<f64>> {
    // Anchor the pencil on the conic with the larger determinant.
    let (ell, other) = if a.determinant().abs() >= b.determinant().abs() {
        (a, b)
    } else {
        (b, a)
    };
    let Some(ell_inv) = ell.try_inverse() else {
        return Vec::new();
    };

    // det(other - lambda * ell) = 0 has at least one real root; the Schur
    // eigenvalues of ell^-1 * other carry it with negligible imaginary
    // part.
    let eigenvalues: Vector3<Complex64> = (ell_inv * other).complex_eigenvalues();
    let lambda = eigenvalues
        .iter()
        .min_by(|x, y| {
            x.im.abs()
                .partial_cmp(&y.im.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|e| e.re);
    let Some(lambda) = lambda else {
        return Vec::new();
    };
    if !lambda.is_finite() {
        return Vec::new();
    }

    let degenerate = other - ell * lambda;
    let mut points = Vec::new();
    for line in factor_degenerate(&degenerate) {
        for p in intersect_conic_line(ell, &line) {
            if conic_residual(&p, a) < CONIC_RESIDUAL_TOL
                && conic_residual(&p, b) < CONIC_RESIDUAL_TOL
            {
                points.push(p);
            }
        }
    }
    points
}

/// Solves the two-sided constraint system and returns every real
/// candidate pair of invisible momenta.
pub fn solve(
    b1: &FourVector,
    b2: &FourVector,
    lepton1: &FourVector,
    lepton2: &FourVector,
    met: &FourVector,
    hypothesis: &MassHypothesis,
) -> SolutionSet {
    let side1 = SideEllipse::new(
        b1,
        lepton1,
        hypothesis.m_w1 * hypothesis.m_w1,
        hypothesis.m_t1 * hypothesis.m_t1,
        hypothesis.chi_a * hypothesis.chi_a,
    );
    let side2 = SideEllipse::new(
        b2,
        lepton2,
        hypothesis.m_w2 * hypothesis.m_w2,
        hypothesis.m_t2 * hypothesis.m_t2,
        hypothesis.chi_b * hypothesis.chi_b,
    );
    let (Some(side1), Some(side2)) = (side1, side2) else {
        return SolutionSet::empty();
    };

    let s = balance_map(met);
    let conic1 = *side1.conic();
    let conic2 = s.transpose() * side2.conic() * s;

    let mut pairs = Vec::new();
    for v in intersect_conics(&conic1, &conic2) {
        let p1 = side1.lift(&v);
        let p2 = side2.lift(&(s * v));
        if !(p1.iter().all(|c| c.is_finite()) && p2.iter().all(|c| c.is_finite())) {
            continue;
        }
        pairs.push(SolutionPair {
            nu1: FourVector::from_momentum_and_mass(&p1, hypothesis.chi_a),
            nu2: FourVector::from_momentum_and_mass(&p2, hypothesis.chi_b),
            conic1,
            conic2,
        });
    }
    SolutionSet { pairs }
}
