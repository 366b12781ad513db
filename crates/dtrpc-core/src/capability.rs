//! Capability records: the `name -> value` maps published in OFFER bundles
//! and required by job/step filters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved capability key for GPS position.
pub const GPS_COORD: &str = "gps_coord";
/// Reserved capability key for CPU load (candidate must be ≤ required).
pub const CPU_LOAD: &str = "cpu_load";
/// Reserved capability key for available memory (candidate must be ≥ required).
pub const MEMORY: &str = "memory";
/// Reserved capability key for available disk space (candidate must be ≥ required).
pub const DISK_SPACE: &str = "disk_space";
/// Optional numeric extension: remaining energy budget (candidate must be ≥ required).
pub const ENERGY: &str = "energy";
/// Optional extension carried over from the original deployment: CPU core count.
pub const CPU_CORES: &str = "cpu_cores";
/// Optional extension: battery charge state (`charging` / `fully-charged` / other).
pub const POWER_STATE: &str = "power_state";
/// Optional extension: battery charge percentage (candidate must be ≥ required).
pub const POWER_PERCENTAGE: &str = "power_percentage";

/// A single capability value as published by a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CapabilityValue {
    /// A plain scalar (`cpu_load`, `memory`, `disk_space`, `energy`,
    /// `cpu_cores`, `power_percentage`).
    Number(f64),
    /// A GPS coordinate pair, `(x, y)`.
    GpsCoord(f64, f64),
    /// A free-form string value (e.g. `power_state`).
    Text(String),
}

impl CapabilityValue {
    /// View this value as a plain number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CapabilityValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// View this value as a GPS coordinate pair, if it is one.
    pub fn as_gps_coord(&self) -> Option<(f64, f64)> {
        match self {
            CapabilityValue::GpsCoord(x, y) => Some((*x, *y)),
            _ => None,
        }
    }

    /// View this value as text, if it is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CapabilityValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A mapping of capability name to value, as published by a node or
/// required by a job's filter.
pub type CapabilityRecord = BTreeMap<String, CapabilityValue>;

/// Parse a single `key=value` or `key:value` capability entry as it appears
/// in offer payloads (`=`) and job-file filter lines (`:`).
///
/// `gps_coord` values are the form `x,y`; `power_state` is kept as text;
/// everything else parses as a float.
pub fn parse_capability_value(key: &str, raw: &str) -> Option<CapabilityValue> {
    if key == GPS_COORD {
        let mut parts = raw.splitn(2, ',');
        let x: f64 = parts.next()?.trim().parse().ok()?;
        let y: f64 = parts.next()?.trim().parse().ok()?;
        return Some(CapabilityValue::GpsCoord(x, y));
    }
    if key == POWER_STATE {
        return Some(CapabilityValue::Text(raw.trim().to_string()));
    }
    raw.trim().parse::<f64>().ok().map(CapabilityValue::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_capability() {
        let v = parse_capability_value(CPU_LOAD, "0.42").unwrap();
        assert_eq!(v.as_number(), Some(0.42));
    }

    #[test]
    fn parses_gps_coord() {
        let v = parse_capability_value(GPS_COORD, "1.5,-2.25").unwrap();
        assert_eq!(v.as_gps_coord(), Some((1.5, -2.25)));
    }

    #[test]
    fn parses_power_state_as_text() {
        let v = parse_capability_value(POWER_STATE, "charging").unwrap();
        assert_eq!(v.as_text(), Some("charging"));
    }

    #[test]
    fn rejects_malformed_number() {
        assert!(parse_capability_value(MEMORY, "not-a-number").is_none());
    }

    #[test]
    fn rejects_malformed_gps() {
        assert!(parse_capability_value(GPS_COORD, "1.5").is_none());
    }
}
