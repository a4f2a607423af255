use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Neg, Sub};

/// A Lorentz four-vector in (px, py, pz, E) representation.
///
/// Value type: every kinematic operation returns a new instance. Follows
/// the usual collider conventions (z along the beam axis, sign-preserving
/// invariant mass for spacelike vectors).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FourVector {
    px: f64,
    py: f64,
    pz: f64,
    e: f64,
}

impl FourVector {
    pub fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// Builds a four-vector from transverse momentum, pseudorapidity,
    /// azimuth and mass. Negative masses are treated as spacelike,
    /// mirroring the detector-framework convention.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, m: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let p2 = px * px + py * py + pz * pz;
        let e = if m >= 0.0 {
            (p2 + m * m).sqrt()
        } else {
            (p2 - m * m).max(0.0).sqrt()
        };
        Self { px, py, pz, e }
    }

    /// Builds a four-vector from a three-momentum and a rest mass.
    pub fn from_momentum_and_mass(p: &Vector3<f64>, m: f64) -> Self {
        let e = (p.norm_squared() + m * m).sqrt();
        Self {
            px: p.x,
            py: p.y,
            pz: p.z,
            e,
        }
    }

    /// A purely transverse vector, as used for the missing momentum.
    pub fn from_pt_phi(pt: f64, phi: f64) -> Self {
        Self {
            px: pt * phi.cos(),
            py: pt * phi.sin(),
            pz: 0.0,
            e: pt,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn px(&self) -> f64 {
        self.px
    }

    pub fn py(&self) -> f64 {
        self.py
    }

    pub fn pz(&self) -> f64 {
        self.pz
    }

    pub fn e(&self) -> f64 {
        self.e
    }

    pub fn p2(&self) -> f64 {
        self.px * self.px + self.py * self.py + self.pz * self.pz
    }

    pub fn p(&self) -> f64 {
        self.p2().sqrt()
    }

    pub fn pt(&self) -> f64 {
        (self.px * self.px + self.py * self.py).sqrt()
    }

    pub fn m2(&self) -> f64 {
        self.e * self.e - self.p2()
    }

    /// Invariant mass; sign-preserving for spacelike vectors.
    pub fn m(&self) -> f64 {
        let m2 = self.m2();
        if m2 >= 0.0 {
            m2.sqrt()
        } else {
            -(-m2).sqrt()
        }
    }

    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    pub fn theta(&self) -> f64 {
        self.pt().atan2(self.pz)
    }

    pub fn eta(&self) -> f64 {
        let p = self.p();
        if p == 0.0 {
            return 0.0;
        }
        if p == self.pz.abs() {
            // On-axis vector; pseudorapidity diverges.
            return if self.pz >= 0.0 {
                f64::INFINITY
            } else {
                f64::NEG_INFINITY
            };
        }
        0.5 * ((p + self.pz) / (p - self.pz)).ln()
    }

    /// Cosine of the polar angle; 1.0 for a vanishing three-momentum.
    pub fn cos_theta(&self) -> f64 {
        let p = self.p();
        if p == 0.0 {
            1.0
        } else {
            self.pz / p
        }
    }

    pub fn beta(&self) -> f64 {
        if self.e == 0.0 {
            0.0
        } else {
            self.p() / self.e
        }
    }

    pub fn vect(&self) -> Vector3<f64> {
        Vector3::new(self.px, self.py, self.pz)
    }

    /// The velocity vector p/E used as a boost argument.
    pub fn boost_vector(&self) -> Vector3<f64> {
        if self.e == 0.0 {
            Vector3::zeros()
        } else {
            self.vect() / self.e
        }
    }

    /// Applies a Lorentz boost with velocity `b`. A superluminal argument
    /// produces non-finite components, which callers detect explicitly.
    pub fn boost(&self, b: &Vector3<f64>) -> Self {
        let b2 = b.norm_squared();
        if b2 == 0.0 {
            return *self;
        }
        let gamma = 1.0 / (1.0 - b2).sqrt();
        let bp = b.x * self.px + b.y * self.py + b.z * self.pz;
        let gamma2 = (gamma - 1.0) / b2;
        Self {
            px: self.px + gamma2 * bp * b.x + gamma * b.x * self.e,
            py: self.py + gamma2 * bp * b.y + gamma * b.y * self.e,
            pz: self.pz + gamma2 * bp * b.z + gamma * b.z * self.e,
            e: gamma * (self.e + bp),
        }
    }

    /// Replaces the momentum direction while keeping |p| and E unchanged.
    /// `dir` must be a unit vector.
    pub fn with_direction(&self, dir: &Vector3<f64>) -> Self {
        let p = self.p();
        Self {
            px: p * dir.x,
            py: p * dir.y,
            pz: p * dir.z,
            e: self.e,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.px.is_finite() && self.py.is_finite() && self.pz.is_finite() && self.e.is_finite()
    }
}

impl Add for FourVector {
    type Output = FourVector;

    fn add(self, rhs: FourVector) -> FourVector {
        FourVector {
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
            e: self.e + rhs.e,
        }
    }
}

impl Sub for FourVector {
    type Output = FourVector;

    fn sub(self, rhs: FourVector) -> FourVector {
        FourVector {
            px: self.px - rhs.px,
            py: self.py - rhs.py,
            pz: self.pz - rhs.pz,
            e: self.e - rhs.e,
        }
    }
}

impl Mul<f64> for FourVector {
    type Output = FourVector;

    fn mul(self, rhs: f64) -> FourVector {
        FourVector {
            px: self.px * rhs,
            py: self.py * rhs,
            pz: self.pz * rhs,
            e: self.e * rhs,
        }
    }
}

impl Neg for FourVector {
    type Output = FourVector;

    fn neg(self) -> FourVector {
        self * -1.0
    }
}

/// Cosine of the opening angle between two three-vectors; `None` when
/// either vector vanishes.
pub fn cos_angle(a: &Vector3<f64>, b: &Vector3<f64>) -> Option<f64> {
    let na = a.norm();
    let nb = b.norm();
    if na == 0.0 || nb == 0.0 {
        return None;
    }
    Some((a.dot(b) / (na * nb)).clamp(-1.0, 1.0))
}
