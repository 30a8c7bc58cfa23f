//! Traffic thresholds in `<digits>K` / `<digits>M` notation

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid threshold '{0}': expected digits followed by K or M, e.g. 6M or 500K")]
pub struct ThresholdError(pub String);

/// Byte rate, in bytes per minute, above which a device counts as in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Threshold(u64);

impl Threshold {
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Round up to a whole KiB so the value survives formatting.
    pub fn from_bytes_rounded_up(bytes: u64) -> Self {
        Self(bytes.div_ceil(KIB).saturating_mul(KIB))
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= MIB && self.0 % MIB == 0 {
            write!(f, "{}M", self.0 / MIB)
        } else {
            write!(f, "{}K", self.0.div_ceil(KIB))
        }
    }
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ThresholdError(s.to_string());

        let (digits, unit) = s.split_at_checked(s.len().saturating_sub(1)).ok_or_else(err)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        let multiplier = match unit {
            "K" | "k" => KIB,
            "M" | "m" => MIB,
            _ => return Err(err()),
        };

        let value: u64 = digits.parse().map_err(|_| err())?;
        value.checked_mul(multiplier).map(Self).ok_or_else(err)
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
