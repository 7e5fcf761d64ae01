//! 17.14 fixed-point arithmetic
//!
//! The kernel never saves floating-point state on a context switch, so the
//! fractional quantities of the MLFQS scheduler (`recent_cpu`, `load_avg`)
//! are kept as scaled integers. A [`FixedPoint`] is an `i32` whose low
//! [`FRACTION_BITS`] bits hold the fraction.
//!
//! Multiplying or dividing two fixed-point values widens the intermediate
//! to `i64` before rescaling, as does [`FixedPoint::scaled_round`], whose
//! product can leave the 17.14 range even when the result fits in an `i32`.

use core::{
    fmt,
    ops::{Add, Div, Mul, Neg, Sub},
};

/// Number of fractional bits.
pub const FRACTION_BITS: u32 = 14;

/// Scale factor `f = 2^14`.
const F: i32 = 1 << FRACTION_BITS;

/// Signed 17.14 fixed-point number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct FixedPoint(i32);

impl FixedPoint {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(F);

    /// Convert an integer to fixed point.
    pub const fn from_int(n: i32) -> Self {
        Self(n * F)
    }

    /// Reinterpret a raw scaled value.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw scaled value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert to an integer, truncating toward zero.
    pub const fn to_int_trunc(self) -> i32 {
        self.0 / F
    }

    /// Convert to the nearest integer; halves round away from zero.
    pub const fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// `self * factor`, rounded to the nearest integer.
    ///
    /// Used to report `recent_cpu` and `load_avg` as hundredths.
    pub fn scaled_round(self, factor: i32) -> i32 {
        let scaled = i64::from(self.0) * i64::from(factor);
        let half = i64::from(F / 2);
        let rounded = if scaled >= 0 {
            (scaled + half) / i64::from(F)
        } else {
            (scaled - half) / i64::from(F)
        };
        rounded as i32
    }
}

impl Add for FixedPoint {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Add<i32> for FixedPoint {
    type Output = Self;

    fn add(self, rhs: i32) -> Self {
        Self(self.0 + rhs * F)
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Sub<i32> for FixedPoint {
    type Output = Self;

    fn sub(self, rhs: i32) -> Self {
        Self(self.0 - rhs * F)
    }
}

impl Mul for FixedPoint {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self(((self.0 as i64) * (rhs.0 as i64) / F as i64) as i32)
    }
}

impl Mul<i32> for FixedPoint {
    type Output = Self;

    fn mul(self, rhs: i32) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div for FixedPoint {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self(((self.0 as i64) * F as i64 / rhs.0 as i64) as i32)
    }
}

impl Div<i32> for FixedPoint {
    type Output = Self;

    fn div(self, rhs: i32) -> Self {
        Self(self.0 / rhs)
    }
}

impl Neg for FixedPoint {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hundredths = self.scaled_round(100);
        let sign = if hundredths < 0 { "-" } else { "" };
        let abs = hundredths.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}
