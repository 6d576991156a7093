//! Reference vocabulary shared across UKCLIM
//!
//! The Met Office areal series are published per (parameter, region) pair.
//! Codes not listed here are still accepted by the ingestion core; the
//! tables below only supply display names, units and validation classes.

use serde::{Deserialize, Serialize};

use crate::error::{ClimError, Result};

/// Unit reported for parameters missing from [`PARAMETERS`]
pub const UNKNOWN_UNIT: &str = "unknown";

/// Parameters fetched by a full ingestion run
pub const INGEST_PARAMETERS: [&str; 5] = ["Tmax", "Tmin", "Tmean", "Rainfall", "Sunshine"];

/// Regions fetched by a full ingestion run
pub const INGEST_REGIONS: [&str; 5] = ["UK", "England", "Wales", "Scotland", "Northern_Ireland"];

/// Region aliases accepted on input, mapped to their canonical code
const REGION_ALIASES: [(&str, &str); 1] = [("NI", "Northern_Ireland")];

/// Physical class of a parameter, used to pick validation bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Air temperature in °C
    Temperature,
    /// Precipitation total in mm
    Rainfall,
    /// Sunshine duration in hours
    Sunshine,
    /// Anything without a physical bound check
    Other,
}

/// Static description of a known weather parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterInfo {
    pub code: &'static str,
    pub display_name: &'static str,
    pub unit: &'static str,
    pub kind: ParameterKind,
}

/// Every parameter the system knows how to describe
pub const PARAMETERS: [ParameterInfo; 8] = [
    ParameterInfo {
        code: "Tmax",
        display_name: "Maximum Temperature",
        unit: "°C",
        kind: ParameterKind::Temperature,
    },
    ParameterInfo {
        code: "Tmin",
        display_name: "Minimum Temperature",
        unit: "°C",
        kind: ParameterKind::Temperature,
    },
    ParameterInfo {
        code: "Tmean",
        display_name: "Mean Temperature",
        unit: "°C",
        kind: ParameterKind::Temperature,
    },
    ParameterInfo {
        code: "Rainfall",
        display_name: "Rainfall",
        unit: "mm",
        kind: ParameterKind::Rainfall,
    },
    ParameterInfo {
        code: "Sunshine",
        display_name: "Sunshine Hours",
        unit: "hours",
        kind: ParameterKind::Sunshine,
    },
    ParameterInfo {
        code: "AirFrost",
        display_name: "Air Frost Days",
        unit: "days",
        kind: ParameterKind::Other,
    },
    ParameterInfo {
        code: "RainDays1mm",
        display_name: "Rain Days ≥1mm",
        unit: "days",
        kind: ParameterKind::Other,
    },
    ParameterInfo {
        code: "RainDays10mm",
        display_name: "Rain Days ≥10mm",
        unit: "days",
        kind: ParameterKind::Other,
    },
];

/// Look up a known parameter by its exact code
pub fn lookup_parameter(code: &str) -> Result<&'static ParameterInfo> {
    PARAMETERS
        .iter()
        .find(|p| p.code == code)
        .ok_or_else(|| ClimError::UnknownParameter(code.to_string()))
}

/// Unit for a parameter code, `"unknown"` when the code is not in the table
pub fn parameter_unit(code: &str) -> &'static str {
    lookup_parameter(code).map(|p| p.unit).unwrap_or(UNKNOWN_UNIT)
}

/// Display name for a parameter code, falling back to the code itself
pub fn parameter_display_name(code: &str) -> String {
    lookup_parameter(code)
        .map(|p| p.display_name.to_string())
        .unwrap_or_else(|_| code.to_string())
}

/// Validation class for a parameter code
pub fn parameter_kind(code: &str) -> ParameterKind {
    lookup_parameter(code)
        .map(|p| p.kind)
        .unwrap_or(ParameterKind::Other)
}

/// Resolve a region alias to its canonical code; unknown codes pass through
pub fn canonical_region_code(code: &str) -> &str {
    REGION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == code)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(code)
}

/// Look up a known region, accepting aliases
pub fn lookup_region(code: &str) -> Result<&'static str> {
    let canonical = canonical_region_code(code);
    INGEST_REGIONS
        .iter()
        .copied()
        .find(|r| *r == canonical)
        .ok_or_else(|| ClimError::UnknownRegion(code.to_string()))
}
