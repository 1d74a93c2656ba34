//! Probability values with range validation.
//!
//! Every probability flowing through the engine is validated at the
//! boundary: values must lie in [0.0, 1.0] and NaN is rejected. Once
//! constructed, a `Probability` can be combined with the small closed set of
//! operations the solver needs without leaving the valid range.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A validated probability in [0.0, 1.0].
///
/// # Examples
///
/// ```
/// use temporalog::Probability;
///
/// let p = Probability::new(0.25).unwrap();
/// assert_eq!(p.value(), 0.25);
/// assert_eq!(p.complement().value(), 0.75);
/// assert!(Probability::new(1.5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Probability(f64);

impl Probability {
    /// Impossible event.
    pub const ZERO: Self = Self(0.0);

    /// Certain event.
    pub const ONE: Self = Self(1.0);

    /// Creates a new probability with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ProbabilityOutOfRange` if the value is NaN
    /// or not in [0.0, 1.0].
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if value.is_nan() || !(0.0..=1.0).contains(&value) {
            return Err(ValidationError::ProbabilityOutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Creates a probability, clamping finite out-of-range values into
    /// [0.0, 1.0].
    ///
    /// Used where values arrive from floating-point arithmetic that may
    /// overshoot the range by rounding (e.g. external solver output).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ProbabilityOutOfRange` only for NaN.
    pub fn clamped(value: f64) -> Result<Self, ValidationError> {
        if value.is_nan() {
            return Err(ValidationError::ProbabilityOutOfRange { value });
        }
        Ok(Self(value.clamp(0.0, 1.0)))
    }

    /// Returns the inner value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Returns `1 - p`.
    #[must_use]
    pub fn complement(self) -> Self {
        Self(1.0 - self.0)
    }

    /// Probability of the conjunction of two independent events.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self(self.0 * other.0)
    }

    /// Sum of two probabilities, saturating at 1.
    ///
    /// This is the disjunction of mutually exclusive alternatives; the
    /// saturation keeps malformed inputs from escaping the valid range.
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self((self.0 + other.0).min(1.0))
    }

    /// Returns true if this probability is within `tolerance` of `other`.
    #[must_use]
    pub fn approx_eq(self, other: Self, tolerance: f64) -> bool {
        (self.0 - other.0).abs() <= tolerance
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_values() {
        assert!(Probability::new(0.0).is_ok());
        assert!(Probability::new(0.5).is_ok());
        assert!(Probability::new(1.0).is_ok());
    }

    #[test]
    fn invalid_values() {
        assert!(Probability::new(-0.1).is_err());
        assert!(Probability::new(1.1).is_err());
        assert!(Probability::new(f64::NAN).is_err());
    }

    #[test]
    fn clamped_accepts_rounding_overshoot() {
        assert_eq!(Probability::clamped(1.0000001).unwrap().value(), 1.0);
        assert_eq!(Probability::clamped(-0.0000001).unwrap().value(), 0.0);
        assert!(Probability::clamped(f64::NAN).is_err());
    }

    #[test]
    fn complement() {
        let p = Probability::new(0.25).unwrap();
        assert!((p.complement().value() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn and_is_product() {
        let a = Probability::new(0.5).unwrap();
        let b = Probability::new(0.4).unwrap();
        assert!((a.and(b).value() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn saturating_add_caps_at_one() {
        let a = Probability::new(0.7).unwrap();
        let b = Probability::new(0.6).unwrap();
        assert_eq!(a.saturating_add(b).value(), 1.0);

        let c = Probability::new(0.2).unwrap();
        assert!((a.saturating_add(c).value() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn approx_eq_tolerance() {
        let a = Probability::new(0.5).unwrap();
        let b = Probability::new(0.5 + 5e-7).unwrap();
        assert!(a.approx_eq(b, 1e-6));
        assert!(!a.approx_eq(b, 1e-8));
    }

    #[test]
    fn display_is_plain_float() {
        let p = Probability::new(0.125).unwrap();
        assert_eq!(format!("{p}"), "0.125");
    }

    #[test]
    fn serialization_is_transparent() {
        let p = Probability::new(0.75).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, "0.75");
        let back: Probability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
