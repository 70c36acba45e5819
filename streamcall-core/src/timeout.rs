use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the remaining time budget of a call.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// The wire format allows at most eight digits before the unit.
const MAX_DIGITS_VALUE: u128 = 99_999_999;

// Finest unit first; encoding picks the first unit whose value fits.
const UNITS: [(char, u128); 6] = [
    ('n', 1),
    ('u', 1_000),
    ('m', 1_000_000),
    ('S', 1_000_000_000),
    ('M', 60 * 1_000_000_000),
    ('H', 3_600 * 1_000_000_000),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error("timeout value {0:?} is empty or has no unit")]
    Malformed(String),
    #[error("timeout value {0:?} has more than eight digits")]
    TooManyDigits(String),
    #[error("unknown timeout unit {0:?}")]
    UnknownUnit(char),
}

/// A call timeout as carried in `grpc-timeout`, e.g. `"100m"` for 100 milliseconds.
///
/// Encoding rounds up to the coarser unit so the server never sees a shorter budget
/// than the client. Durations beyond `99999999H` are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpcTimeout {
    value: u32,
    unit: char,
}

impl GrpcTimeout {
    pub fn from_duration(duration: Duration) -> Self {
        let nanos = duration.as_nanos();
        for (unit, divisor) in UNITS {
            let value = nanos.div_ceil(divisor);
            if value <= MAX_DIGITS_VALUE {
                return GrpcTimeout {
                    value: value as u32,
                    unit,
                };
            }
        }
        GrpcTimeout {
            value: MAX_DIGITS_VALUE as u32,
            unit: 'H',
        }
    }

    pub fn as_duration(&self) -> Duration {
        let divisor = UNITS
            .iter()
            .find(|(unit, _)| *unit == self.unit)
            .map(|(_, divisor)| *divisor)
            .unwrap_or(1);
        let nanos = self.value as u128 * divisor;
        Duration::from_secs((nanos / 1_000_000_000) as u64)
            + Duration::from_nanos((nanos % 1_000_000_000) as u64)
    }

    pub fn header_value(&self) -> String {
        self.to_string()
    }

    pub fn parse(raw: &str) -> Result<Self, TimeoutError> {
        let mut chars = raw.chars();
        let unit = chars
            .next_back()
            .ok_or_else(|| TimeoutError::Malformed(raw.to_string()))?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeoutError::Malformed(raw.to_string()));
        }
        if digits.len() > 8 {
            return Err(TimeoutError::TooManyDigits(raw.to_string()));
        }
        if !UNITS.iter().any(|(u, _)| *u == unit) {
            return Err(TimeoutError::UnknownUnit(unit));
        }
        let value = digits
            .parse()
            .map_err(|_| TimeoutError::Malformed(raw.to_string()))?;
        Ok(GrpcTimeout { value, unit })
    }
}

impl fmt::Display for GrpcTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit)
    }
}

impl From<Duration> for GrpcTimeout {
    fn from(duration: Duration) -> Self {
        GrpcTimeout::from_duration(duration)
    }
}
