//! ==============================================================================
//! validator.rs - turns an untrusted device payload into a Reading
//! ==============================================================================
//!
//! rules:
//!     - temperature, moisture and ph must be present (absent, null or a blank
//!       string all count as missing)
//!     - each value is a json number or a numeric string ("25.5")
//!     - zero is a legitimate reading and is accepted
//!     - values must sit inside their inclusive domain (domain.rs)
//!     - any timestamp in the payload is ignored; the hub stamps the reading
//!
//! ==============================================================================

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::{Domain, Reading, MOISTURE, PH, TEMPERATURE};
use crate::error::ValidationError;

/// validate a payload and stamp it with the current server time
pub fn validate(payload: &Value) -> Result<Reading, ValidationError> {
    validate_at(payload, Utc::now())
}

/// validate a payload, stamping it with `now`
pub fn validate_at(payload: &Value, now: DateTime<Utc>) -> Result<Reading, ValidationError> {
    let fields = payload.as_object().ok_or(ValidationError::NotAnObject)?;

    // presence is checked for all three before any range check so a device
    // missing a probe hears about that first
    let temperature = coerce(fields, "temperature")?;
    let moisture = coerce(fields, "moisture")?;
    let ph = coerce(fields, "ph")?;

    Ok(Reading {
        temperature: within("temperature", temperature, TEMPERATURE)?,
        moisture: within("moisture", moisture, MOISTURE)?,
        ph: within("ph", ph, PH)?,
        timestamp: now,
    })
}

fn coerce(fields: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    let value = match fields.get(field) {
        None | Some(Value::Null) => return Err(ValidationError::MissingField(field)),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(ValidationError::MissingField(field));
            }
            s.parse::<f64>().ok()
        }
        Some(_) => None,
    };

    value
        .filter(|v| v.is_finite())
        .ok_or(ValidationError::NotNumeric(field))
}

fn within(field: &'static str, value: f64, domain: Domain) -> Result<f64, ValidationError> {
    if domain.contains(value) {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min: domain.min,
            max: domain.max,
        })
    }
}
