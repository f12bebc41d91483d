//! Coercion of loosely-typed capture input into a [`ConsumptionRecord`].
//!
//! Each field is handled on its own:
//! - numeric fields accept numbers, numeric strings and booleans; anything
//!   absent, unparseable or zero falls back to its default (0, or 1 for
//!   the month),
//! - the year falls back to the clock's current year,
//! - meter and user fall back to an empty string,
//! - the date is passed through when present, otherwise today's date as
//!   `YYYY-MM-DD`.
//!
//! Keys that are not part of the canonical record (local ids, sync status,
//! anything else the capture form sent) are dropped.

use chrono::Datelike;
use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::error::ValidationError;
use crate::models::ConsumptionRecord;

/// Normalize a captured reading.
///
/// Applying this to the JSON form of an already normalized record returns
/// the same record.
pub fn normalize(input: &Value, clock: &dyn Clock) -> Result<ConsumptionRecord, ValidationError> {
    let fields = match input {
        Value::Object(map) => map,
        other => return Err(ValidationError::NotAnObject(kind(other))),
    };
    let today = clock.today();

    Ok(ConsumptionRecord {
        installation: integer_or(fields, "instalacion", 0),
        reading: number_or(fields, "lectura", 0.0),
        consumption: number_or(fields, "consumo", 0.0),
        month: integer_or(fields, "mes", 1),
        year: integer_or(fields, "year", i64::from(today.year())),
        date: text(fields, "fecha").unwrap_or_else(|| today.format("%Y-%m-%d").to_string()),
        meter: text(fields, "medidor").unwrap_or_default(),
        extra_charges: number_or(fields, "otros_cobros", 0.0),
        reconnection: integer_or(fields, "reconexion", 0),
        user: text(fields, "usuario").unwrap_or_default(),
    })
}

/// Numeric value of a field, or `None` when it should take its default.
fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            s.parse::<f64>().ok()?
        }
        Value::Bool(b) => f64::from(u8::from(*b)),
        _ => return None,
    };
    (n.is_finite() && n != 0.0).then_some(n)
}

fn number_or(fields: &Map<String, Value>, key: &str, default: f64) -> f64 {
    coerce_number(fields.get(key)).unwrap_or(default)
}

fn integer_or(fields: &Map<String, Value>, key: &str, default: i64) -> i64 {
    match coerce_number(fields.get(key)).map(|n| n.trunc() as i64) {
        Some(0) | None => default,
        Some(n) => n,
    }
}

/// Non-empty text of a field; numbers are rendered as text.
fn text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    fn clock() -> FixedClock {
        FixedClock::ymd(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_offline_capture_example() {
        let record = normalize(&json!({ "instalacion": "12", "lectura": "340" }), &clock()).unwrap();

        assert_eq!(record.installation, 12);
        assert_eq!(record.reading, 340.0);
        assert_eq!(record.consumption, 0.0);
        assert_eq!(record.month, 1);
        assert_eq!(record.year, 2024);
        assert_eq!(record.date, "2024-03-15");
        assert_eq!(record.meter, "");
        assert_eq!(record.user, "");
        assert_eq!(record.extra_charges, 0.0);
        assert_eq!(record.reconnection, 0);
    }

    #[test]
    fn test_empty_input_gets_all_defaults() {
        let record = normalize(&json!({}), &clock()).unwrap();
        assert_eq!(
            record,
            ConsumptionRecord {
                installation: 0,
                reading: 0.0,
                consumption: 0.0,
                month: 1,
                year: 2024,
                date: "2024-03-15".to_string(),
                meter: String::new(),
                extra_charges: 0.0,
                reconnection: 0,
                user: String::new(),
            }
        );
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let record = normalize(
            &json!({
                "instalacion": "doce",
                "lectura": null,
                "mes": "0",
                "year": "",
                "otros_cobros": [1, 2],
                "reconexion": "NaN",
                "medidor": null
            }),
            &clock(),
        )
        .unwrap();

        assert_eq!(record.installation, 0);
        assert_eq!(record.reading, 0.0);
        assert_eq!(record.month, 1);
        assert_eq!(record.year, 2024);
        assert_eq!(record.extra_charges, 0.0);
        assert_eq!(record.reconnection, 0);
        assert_eq!(record.meter, "");
    }

    #[test]
    fn test_values_are_kept() {
        let record = normalize(
            &json!({
                "instalacion": 44,
                "lectura": " 1520.5 ",
                "consumo": 12.25,
                "mes": "11",
                "year": 2023,
                "fecha": "2023-11-30",
                "medidor": 88123,
                "otros_cobros": "2500",
                "reconexion": true,
                "usuario": "lector2"
            }),
            &clock(),
        )
        .unwrap();

        assert_eq!(record.installation, 44);
        assert_eq!(record.reading, 1520.5);
        assert_eq!(record.consumption, 12.25);
        assert_eq!(record.month, 11);
        assert_eq!(record.year, 2023);
        assert_eq!(record.date, "2023-11-30");
        assert_eq!(record.meter, "88123");
        assert_eq!(record.extra_charges, 2500.0);
        assert_eq!(record.reconnection, 1);
        assert_eq!(record.user, "lector2");
    }

    #[test]
    fn test_local_fields_are_stripped() {
        let input = json!({ "id": 9, "syncStatus": "pending", "instalacion": 3 });
        let record = normalize(&input, &clock()).unwrap();
        let value = serde_json::to_value(&record).unwrap();

        assert!(value.get("id").is_none());
        assert!(value.get("syncStatus").is_none());
        assert_eq!(value["instalacion"], json!(3));
    }

    #[test]
    fn test_normalize_is_a_fixed_point() {
        let once = normalize(
            &json!({ "instalacion": "7", "lectura": "88.5", "mes": 4, "usuario": "ana" }),
            &clock(),
        )
        .unwrap();
        let twice = normalize(&serde_json::to_value(&once).unwrap(), &clock()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fixed_point_ignores_clock() {
        let once = normalize(&json!({ "instalacion": 7 }), &clock()).unwrap();
        let later = FixedClock::ymd(2025, 1, 2).unwrap();
        let twice = normalize(&serde_json::to_value(&once).unwrap(), &later).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_object_is_rejected() {
        let err = normalize(&json!([1, 2, 3]), &clock()).unwrap_err();
        assert_eq!(err, ValidationError::NotAnObject("an array"));
    }
}
