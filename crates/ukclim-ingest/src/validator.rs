//! Physical plausibility checks for parsed records

use bigdecimal::BigDecimal;
use thiserror::Error;
use ukclim_common::types::{parameter_kind, ParameterKind};

use crate::models::WeatherRecord;

const TEMPERATURE_MIN: i32 = -50;
const TEMPERATURE_MAX: i32 = 50;
const SUNSHINE_MAX_HOURS: i32 = 24;

/// Reasons a record is rejected before it reaches the store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Temperature {0} outside [-50, 50]")]
    TemperatureOutOfRange(BigDecimal),

    #[error("Negative rainfall: {0}")]
    NegativeRainfall(BigDecimal),

    #[error("Sunshine hours {0} outside [0, 24]")]
    SunshineOutOfRange(BigDecimal),
}

/// Check required fields and the bounds for the record's parameter class
///
/// Parameter codes match exactly, so `tmax` is not treated as a temperature.
pub fn validate_record(record: &WeatherRecord) -> Result<(), ValidationError> {
    if record.region.trim().is_empty() {
        return Err(ValidationError::MissingField("region"));
    }
    if record.parameter.trim().is_empty() {
        return Err(ValidationError::MissingField("parameter"));
    }

    let value = &record.value;
    match parameter_kind(&record.parameter) {
        ParameterKind::Temperature => {
            if *value < BigDecimal::from(TEMPERATURE_MIN) || *value > BigDecimal::from(TEMPERATURE_MAX)
            {
                return Err(ValidationError::TemperatureOutOfRange(value.clone()));
            }
        },
        ParameterKind::Rainfall => {
            if *value < BigDecimal::from(0) {
                return Err(ValidationError::NegativeRainfall(value.clone()));
            }
        },
        ParameterKind::Sunshine => {
            if *value < BigDecimal::from(0) || *value > BigDecimal::from(SUNSHINE_MAX_HOURS) {
                return Err(ValidationError::SunshineOutOfRange(value.clone()));
            }
        },
        ParameterKind::Other => {},
    }

    Ok(())
}

/// Value outside [-50, 50], whatever the parameter
///
/// Passes validation for rainfall and counts, but is reported as a data
/// quality warning.
pub fn is_unusual_value(record: &WeatherRecord) -> bool {
    record.value < BigDecimal::from(TEMPERATURE_MIN) || record.value > BigDecimal::from(TEMPERATURE_MAX)
}
