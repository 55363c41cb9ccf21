//! Object version tokens and inventory keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Fractional digits carried on the wire (`1372800001.00000`).
const FRAC_DIGITS: u32 = 5;
const FRAC_UNIT: u64 = 10u64.pow(FRAC_DIGITS);

/// A totally ordered object version token.
///
/// Stored as fixed-point ticks (seconds times 10^5) so comparison is exact
/// and the wire rendering round-trips losslessly. The protocol engine only
/// ever compares timestamps; it never interprets them as wall-clock values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    ticks: u64,
}

impl Timestamp {
    /// From whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self {
            ticks: secs * FRAC_UNIT,
        }
    }

    /// From seconds plus a 5-digit fractional part.
    pub fn from_parts(secs: u64, frac: u32) -> Self {
        Self {
            ticks: secs * FRAC_UNIT + u64::from(frac) % FRAC_UNIT,
        }
    }

    /// A copy offset forward by whole seconds.
    pub fn advanced(self, secs: u64) -> Self {
        Self {
            ticks: self.ticks + secs * FRAC_UNIT,
        }
    }

    /// A copy offset backward by whole seconds, saturating at zero.
    pub fn rewound(self, secs: u64) -> Self {
        Self {
            ticks: self.ticks.saturating_sub(secs * FRAC_UNIT),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:05}",
            self.ticks / FRAC_UNIT,
            self.ticks % FRAC_UNIT
        )
    }
}

impl FromStr for Timestamp {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidTimestamp {
            value: s.to_string(),
        };
        let (secs, frac) = match s.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (s, ""),
        };
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let secs: u64 = secs.parse().map_err(|_| invalid())?;
        // normalize the fraction to 5 digits: pad short, truncate long
        let mut frac_value: u32 = 0;
        for i in 0..FRAC_DIGITS as usize {
            let digit = frac.as_bytes().get(i).map_or(0, |b| u32::from(b - b'0'));
            frac_value = frac_value * 10 + digit;
        }
        Ok(Self::from_parts(secs, frac_value))
    }
}

/// One inventory entry: an opaque object hash and the newest version held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Opaque fixed-length identifier derived from the object name.
    pub hash: String,
    /// Newest version token held for that hash.
    pub timestamp: Timestamp,
}

impl ObjectKey {
    /// Create a key.
    pub fn new(hash: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            hash: hash.into(),
            timestamp,
        }
    }
}
