//!
//! Log-space probability arithmetic
//!
//! The partial-likelihood buffers stay in linear space (with explicit
//! rescaling); `Prob` is used where summation in log space matters: root
//! reduction, ascertainment correction and sampling weights.
//!
use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};

///
/// Wrapper of `f64` representing a probability `0 <= p <= 1`,
/// stored as `ln p`.
///
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Prob(f64);

///
/// short-hand of `Prob::from_prob`
///
pub fn p(p: f64) -> Prob {
    Prob::from_prob(p)
}

///
/// short-hand of `Prob::from_log_prob`
///
pub fn lp(lp: f64) -> Prob {
    Prob::from_log_prob(lp)
}

impl Prob {
    pub fn from_prob(value: f64) -> Prob {
        Prob(value.ln())
    }
    pub fn from_log_prob(log_value: f64) -> Prob {
        Prob(log_value)
    }
    ///
    /// Probability in `[0, 1]`
    pub fn to_value(self) -> f64 {
        self.0.exp()
    }
    ///
    /// Log probability
    pub fn to_log_value(self) -> f64 {
        self.0
    }
    ///
    /// `p == 0`? (`ln p == -inf`)
    pub fn is_zero(self) -> bool {
        self.0.is_infinite() && self.0.is_sign_negative()
    }
    ///
    /// `p == 1`? (`ln p == 0`)
    pub fn is_one(self) -> bool {
        self.0 == 0.0
    }
    pub fn zero() -> Prob {
        Prob(f64::NEG_INFINITY)
    }
    pub fn one() -> Prob {
        Prob(0.0)
    }
}

/// p=0 as a default value
impl Default for Prob {
    fn default() -> Self {
        Prob::zero()
    }
}

impl num_traits::One for Prob {
    fn one() -> Self {
        Prob::one()
    }
}

impl num_traits::Zero for Prob {
    fn zero() -> Self {
        Prob::zero()
    }
    fn is_zero(&self) -> bool {
        Prob::is_zero(*self)
    }
}

impl std::fmt::Display for Prob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}({:.4})", self.0, self.to_value())
    }
}

/// Addition of two probabilities `px + py` in log space
///
/// With `x >= y`:
///
/// ```text
/// log(exp(x) + exp(y)) = x + log(1 + exp(y - x))
/// ```
impl std::ops::Add for Prob {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        let (x, y) = if self.0 >= other.0 {
            (self.0, other.0)
        } else {
            (other.0, self.0)
        };
        if y == f64::NEG_INFINITY {
            Prob(x)
        } else if x == y {
            Prob(x + 2f64.ln())
        } else {
            Prob(x + (y - x).exp().ln_1p())
        }
    }
}

/// `log(px * py) = log(px) + log(py)`
impl std::ops::Mul for Prob {
    type Output = Self;
    fn mul(self, other: Self) -> Self {
        Prob(self.0 + other.0)
    }
}

/// `log(px / py) = log(px) - log(py)`
impl std::ops::Div for Prob {
    type Output = Self;
    fn div(self, other: Self) -> Self {
        Prob(self.0 - other.0)
    }
}

impl std::ops::AddAssign for Prob {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
impl std::ops::MulAssign for Prob {
    fn mul_assign(&mut self, other: Self) {
        *self = *self * other;
    }
}

impl std::iter::Sum for Prob {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Prob::zero(), |a, b| a + b)
    }
}
impl<'a> std::iter::Sum<&'a Self> for Prob {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Prob::zero(), |a, b| a + *b)
    }
}
impl std::iter::Product for Prob {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Prob::one(), |a, b| a * b)
    }
}
impl<'a> std::iter::Product<&'a Self> for Prob {
    fn product<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Prob::one(), |a, b| a * *b)
    }
}

/// Weighting a probability by an observation count `p^c`
impl std::ops::Mul<usize> for Prob {
    type Output = Self;
    fn mul(self, rhs: usize) -> Self {
        Prob(self.0 * rhs as f64)
    }
}

/// for `assert_abs_diff_eq` in tests
impl AbsDiffEq for Prob {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        f64::abs_diff_eq(&self.0, &other.0, epsilon)
    }
}

impl Eq for Prob {}
impl Ord for Prob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn identities() {
        let x = p(0.3);
        assert_relative_eq!((x + Prob::zero()).0, x.0);
        assert_relative_eq!((x * Prob::one()).0, x.0);
        assert!((x * Prob::zero()).is_zero());
    }
    #[test]
    fn sum_prod() {
        let xs = vec![p(0.1), p(0.1), p(0.1)];
        let s: Prob = xs.iter().sum();
        assert_relative_eq!(s.to_value(), 0.3);
        let pr: Prob = xs.iter().product();
        assert_relative_eq!(pr.to_value(), 0.001);

        // empty iterators give the identities
        let none: Vec<Prob> = vec![];
        let s: Prob = none.iter().sum();
        assert!(s.is_zero());
        let pr: Prob = none.iter().product();
        assert!(pr.is_one());
    }
    #[test]
    fn add_mul() {
        assert_abs_diff_eq!((p(0.3) + p(0.3)).0, p(0.6).0);
        assert_abs_diff_eq!((p(0.3) * p(0.3)).0, p(0.09).0);
        assert_abs_diff_eq!((p(0.5) + p(0.00001)).0, p(0.50001).0);
        assert_abs_diff_eq!((p(0.5) * p(0.00001)).0, p(0.000005).0, epsilon = 1e-12);
    }
    #[test]
    fn assign_ops() {
        let mut x = p(0.4);
        x += p(0.2);
        assert_abs_diff_eq!(x, p(0.6));
        x *= p(0.5);
        assert_abs_diff_eq!(x, p(0.3));
        x *= Prob::zero();
        assert!(x.is_zero());
    }
    #[test]
    fn ordering() {
        let mut ps = vec![p(0.9), p(0.2), p(0.5), p(0.1), p(1.0), p(0.0)];
        ps.sort();
        assert_eq!(ps[0], p(0.0));
        assert_eq!(ps[5], p(1.0));
        assert!(p(0.1) > p(0.09999));
    }
    #[test]
    fn count_weighting() {
        // p^c in log space
        assert_abs_diff_eq!((p(0.5) * 3).to_log_value(), 3.0 * 0.5f64.ln());
        assert_abs_diff_eq!((p(0.7) * 1).to_log_value(), 0.7f64.ln());
        assert_eq!(p(0.7) * 0, Prob::one());
    }
    #[test]
    fn serde_roundtrip() {
        let x = p(0.25);
        let json = serde_json::to_string(&x).unwrap();
        let y: Prob = serde_json::from_str(&json).unwrap();
        assert_eq!(x, y);
    }
}
