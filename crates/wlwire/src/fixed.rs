//! # Fixed Point
//!
//! The protocol's signed 24.8 fixed-point number: a raw `i32` scaled by 256.

/// A 24.8 signed fixed-point value as it appears in an `f` slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fixed(pub i32);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(256);

    /// Wraps a raw wire value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Converts a real number, rounding to the nearest 1/256.
    ///
    /// Values outside the representable range saturate; NaN maps to zero.
    pub fn from_f64(value: f64) -> Self {
        // `as` saturates at the i32 bounds and maps NaN to 0.
        Self((value * 256.0).round() as i32)
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 256.0
    }

    /// Converts an integer, saturating at the representable range.
    pub fn from_int(value: i32) -> Self {
        Self(value.saturating_mul(256))
    }

    /// Truncates toward zero.
    pub fn to_int(self) -> i32 {
        self.0 / 256
    }
}

impl From<f64> for Fixed {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl From<Fixed> for f64 {
    fn from(value: Fixed) -> Self {
        value.to_f64()
    }
}

impl std::fmt::Display for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_fixed_three_and_a_half() {
        assert_eq!(Fixed::from_f64(3.5).raw(), 896);
        assert_eq!(Fixed::from_raw(896).to_f64(), 3.5);
    }

    #[test]
    fn test_fixed_negative_and_fractions() {
        assert_eq!(Fixed::from_f64(-1.25).raw(), -320);
        assert_eq!(Fixed::from_raw(1).to_f64(), 1.0 / 256.0);
        assert_eq!(Fixed::from_int(-7).to_int(), -7);
        assert_eq!(Fixed::from_raw(-300).to_int(), -1);
    }

    #[test]
    fn test_fixed_saturates() {
        assert_eq!(Fixed::from_f64(1e12).raw(), i32::MAX);
        assert_eq!(Fixed::from_f64(-1e12).raw(), i32::MIN);
        assert_eq!(Fixed::from_f64(f64::NAN).raw(), 0);
        assert_eq!(Fixed::from_int(i32::MAX).raw(), i32::MAX);
    }

    #[test]
    fn test_fixed_raw_survives_real_conversion() {
        let mut rng = rand::thread_rng();
        for raw in [i32::MIN, -1, 0, 1, i32::MAX] {
            assert_eq!(Fixed::from_f64(Fixed(raw).to_f64()), Fixed(raw));
        }
        for _ in 0..10_000 {
            let raw: i32 = rng.r#gen();
            assert_eq!(Fixed::from_f64(Fixed(raw).to_f64()), Fixed(raw), "raw {}", raw);
        }
    }
}
