//! Signed planar angles, normalized to the interval (−π, π].
//!
//! Trajectory optimization compares and averages headings all the time, so
//! the wrapping rules live here once instead of being repeated at every
//! call site.

use std::f64::consts::PI;

use serde::{Deserialize, Deserializer, Serialize};

/// Wrap `theta` into (−π, π].
#[must_use]
pub fn normalize_theta(theta: f64) -> f64 {
    if (-PI..=PI).contains(&theta) && theta != -PI {
        return theta;
    }
    let two_pi = 2.0 * PI;
    let mut wrapped = theta % two_pi;
    if wrapped <= -PI {
        wrapped += two_pi;
    } else if wrapped > PI {
        wrapped -= two_pi;
    }
    wrapped
}

/// Signed difference `to − from`, taken along the shorter arc.
#[must_use]
pub fn shortest_angular_distance(from: f64, to: f64) -> f64 {
    normalize_theta(to - from)
}

/// Midpoint of two headings along the shorter arc between them.
///
/// Used when a trajectory interval is split in half: the inserted pose
/// takes the bisector heading, never the long way around.
#[must_use]
pub fn average_angles(theta1: f64, theta2: f64) -> f64 {
    normalize_theta(theta1 + 0.5 * shortest_angular_distance(theta1, theta2))
}

#[derive(Debug, PartialEq)]
pub enum AngleError {
    /// The value was NaN or infinite and cannot be wrapped.
    NotFinite(f64),
}

impl std::fmt::Display for AngleError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AngleError::NotFinite(value) => {
                write!(f, "Angle value {value} is not finite")
            }
        }
    }
}

impl std::error::Error for AngleError {}

pub type Result<T> = std::result::Result<T, AngleError>;

/// An angle in radians, always inside (−π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Angle(f64);

impl Angle {
    /// Create a new [`Angle`], wrapping the value into (−π, π].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is NaN or infinite.
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(AngleError::NotFinite(value));
        }
        Ok(Self(normalize_theta(value)))
    }

    /// Create a new [`Angle`] from degrees.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is NaN or infinite.
    pub fn from_degrees(value: f64) -> Result<Self> {
        Self::new(value.to_radians())
    }

    #[must_use]
    pub fn as_radians(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn as_degrees(self) -> f64 {
        self.0.to_degrees()
    }

    /// Signed distance to `other` along the shorter arc.
    #[must_use]
    pub fn distance_to(self, other: Angle) -> f64 {
        shortest_angular_distance(self.0, other.0)
    }
}

impl std::ops::Add for Angle {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(normalize_theta(self.0 + rhs.0))
    }
}

impl std::ops::Sub for Angle {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(normalize_theta(self.0 - rhs.0))
    }
}

impl std::ops::AddAssign for Angle {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Angle {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

/// Convert a floating point number to an [`Angle`], wrapping it.
/// Returns an error if the value is not finite.
impl TryFrom<f64> for Angle {
    type Error = AngleError;

    fn try_from(value: f64) -> Result<Self> {
        Angle::new(value)
    }
}

impl From<Angle> for f64 {
    fn from(value: Angle) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for Angle {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Angle, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Angle::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_normalize_theta() {
        assert_abs_diff_eq!(normalize_theta(0.0), 0.0);
        assert_abs_diff_eq!(normalize_theta(PI), PI);
        assert_abs_diff_eq!(normalize_theta(-PI), PI);
        assert_abs_diff_eq!(normalize_theta(3.0 * PI), PI, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_theta(2.0 * PI + 0.1), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_theta(-2.0 * PI - 0.1), -0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_theta(7.0 * PI + 0.25), PI + 0.25 - 2.0 * PI, epsilon = 1e-12);
    }

    #[test]
    fn test_shortest_angular_distance() {
        assert_abs_diff_eq!(shortest_angular_distance(0.1, -0.1), -0.2, epsilon = 1e-12);
        // Crossing the ±π seam takes the short way.
        assert_abs_diff_eq!(
            shortest_angular_distance(PI - 0.1, -PI + 0.1),
            0.2,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            shortest_angular_distance(-PI + 0.1, PI - 0.1),
            -0.2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_average_angles() {
        assert_abs_diff_eq!(average_angles(0.0, 1.0), 0.5, epsilon = 1e-12);
        // Bisector across the seam stays on the short arc.
        assert_abs_diff_eq!(
            average_angles(PI - 0.2, -PI + 0.2).abs(),
            PI,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(average_angles(-0.5, 0.5), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_new() {
        assert!(Angle::new(f64::NAN).is_err());
        assert!(Angle::new(f64::INFINITY).is_err());
        assert!(Angle::new(100.0).is_ok());
        assert_abs_diff_eq!(
            Angle::new(3.0 * PI).expect("finite").as_radians(),
            PI,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_from_degrees() {
        let angle = Angle::from_degrees(180.0).expect("finite");
        assert_abs_diff_eq!(angle.as_radians(), PI, epsilon = 1e-6);
        let angle = Angle::from_degrees(270.0).expect("finite");
        assert_abs_diff_eq!(angle.as_degrees(), -90.0, epsilon = 1e-6);
    }

    #[test]
    fn test_operators() {
        let a = Angle::new(PI - 0.1).expect("finite");
        let b = Angle::new(0.2).expect("finite");
        assert_abs_diff_eq!((a + b).as_radians(), -PI + 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!((a - b).as_radians(), PI - 0.3, epsilon = 1e-12);

        let mut c = a;
        c += b;
        assert_abs_diff_eq!(c.as_radians(), -PI + 0.1, epsilon = 1e-12);
        c -= b;
        assert_abs_diff_eq!(c.as_radians(), PI - 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_distance_to() {
        let a = Angle::new(PI - 0.05).expect("finite");
        let b = Angle::new(-PI + 0.05).expect("finite");
        assert_abs_diff_eq!(a.distance_to(b), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(b.distance_to(a), -0.1, epsilon = 1e-12);
    }
}
