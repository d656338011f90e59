use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

/// Denominator used when a reduced fraction no longer fits in 64 bits.
const FALLBACK_DEN: u128 = 1_000_000;

/// An exact, non-negative number of seconds stored as a reduced fraction.
///
/// Frame durations are summed over hundreds of frames, so they are never
/// held as floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    num: u64,
    den: u64, // always > 0
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Build `num/den`. Returns `None` when `den` is zero.
    pub fn new(num: u64, den: u64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        Some(Self::from_wide(num as u128, den as u128))
    }

    pub fn from_int(secs: u64) -> Self {
        Self { num: secs, den: 1 }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::from_wide(ms as u128, 1000)
    }

    pub fn num(self) -> u64 {
        self.num
    }

    pub fn den(self) -> u64 {
        self.den
    }

    pub fn is_zero(self) -> bool {
        self.num == 0
    }

    /// Multiply by a whole factor, e.g. a frame stride.
    pub fn mul_int(self, factor: u64) -> Self {
        Self::from_wide(self.num as u128 * factor as u128, self.den as u128)
    }

    /// `self / other`, or `None` when `other` is zero.
    pub fn checked_div(self, other: Rational) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        Some(Self::from_wide(
            self.num as u128 * other.den as u128,
            self.den as u128 * other.num as u128,
        ))
    }

    /// Convert to whole `units_per_sec` ticks, rounding half up.
    /// Hundredths of a second use `units_per_sec = 100`.
    pub fn round_to_units(self, units_per_sec: u64) -> u64 {
        let scaled = self.num as u128 * units_per_sec as u128;
        let den = self.den as u128;
        let rounded = (scaled * 2 + den) / (den * 2);
        u64::try_from(rounded).unwrap_or(u64::MAX)
    }

    /// Smallest whole number greater than or equal to this value.
    pub fn ceil(self) -> u64 {
        self.num.div_ceil(self.den)
    }

    /// Lossy conversion for logging only.
    pub fn as_secs_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }

    fn from_wide(num: u128, den: u128) -> Self {
        let g = gcd(num, den).max(1);
        let (num, den) = (num / g, den / g);
        match (u64::try_from(num), u64::try_from(den)) {
            (Ok(num), Ok(den)) => Self { num, den },
            // Out of 64-bit range: snap to microseconds.
            _ => {
                let micros = num.saturating_mul(FALLBACK_DEN * 2).saturating_add(den)
                    / den.saturating_mul(2);
                let g = gcd(micros, FALLBACK_DEN).max(1);
                Self {
                    num: u64::try_from(micros / g).unwrap_or(u64::MAX),
                    den: (FALLBACK_DEN / g) as u64,
                }
            }
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Add for Rational {
    type Output = Rational;

    fn add(self, rhs: Rational) -> Rational {
        if self.den == rhs.den {
            return Self::from_wide(self.num as u128 + rhs.num as u128, self.den as u128);
        }
        Self::from_wide(
            self.num as u128 * rhs.den as u128 + rhs.num as u128 * self.den as u128,
            self.den as u128 * rhs.den as u128,
        )
    }
}

impl std::ops::AddAssign for Rational {
    fn add_assign(&mut self, rhs: Rational) {
        *self = *self + rhs;
    }
}

impl Sum for Rational {
    fn sum<I: Iterator<Item = Rational>>(iter: I) -> Self {
        iter.fold(Rational::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Rational> for Rational {
    fn sum<I: Iterator<Item = &'a Rational>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as u128 * other.den as u128).cmp(&(other.num as u128 * self.den as u128))
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid rational {0:?}")]
pub struct ParseRationalError(String);

/// Parses ffmpeg-style ratios such as `1/90000` or a bare integer.
impl FromStr for Rational {
    type Err = ParseRationalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRationalError(s.to_string());
        let s = s.trim();
        match s.split_once('/') {
            Some((num, den)) => {
                let num = num.trim().parse::<u64>().map_err(|_| err())?;
                let den = den.trim().parse::<u64>().map_err(|_| err())?;
                Rational::new(num, den).ok_or_else(err)
            }
            None => s.parse::<u64>().map(Rational::from_int).map_err(|_| err()),
        }
    }
}
