use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// A metering point tracked for billing.
///
/// Reference data: the sync client never edits installations, it replaces
/// the whole local set with the server's list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    #[serde(rename = "codigo")]
    pub code: i64,
    #[serde(
        rename = "codigo_medidor",
        default,
        deserialize_with = "string_or_number"
    )]
    pub meter_code: String,
    #[serde(rename = "nombre", default)]
    pub name: String,
    #[serde(rename = "direccion", default)]
    pub address: Option<String>,
}

impl Installation {
    pub fn new(code: i64, meter_code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code,
            meter_code: meter_code.into(),
            name: name.into(),
            address: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

impl fmt::Display for Installation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6}  {:<12} {}", self.code, self.meter_code, self.name)?;
        if let Some(address) = &self.address {
            write!(f, " ({})", address)?;
        }
        Ok(())
    }
}

/// Meter codes come back as strings or bare numbers depending on the column.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_wire_names() {
        let installation: Installation = serde_json::from_value(json!({
            "codigo": 12,
            "codigo_medidor": "M-0012",
            "nombre": "Finca La Esperanza",
            "direccion": "Vereda El Salitre"
        }))
        .unwrap();

        assert_eq!(installation.code, 12);
        assert_eq!(installation.meter_code, "M-0012");
        assert_eq!(installation.name, "Finca La Esperanza");
        assert_eq!(installation.address.as_deref(), Some("Vereda El Salitre"));
    }

    #[test]
    fn test_numeric_meter_code_and_missing_fields() {
        let installation: Installation =
            serde_json::from_value(json!({ "codigo": 7, "codigo_medidor": 4410 })).unwrap();

        assert_eq!(installation.meter_code, "4410");
        assert_eq!(installation.name, "");
        assert!(installation.address.is_none());
    }

    #[test]
    fn test_null_meter_code() {
        let installation: Installation =
            serde_json::from_value(json!({ "codigo": 7, "codigo_medidor": null })).unwrap();
        assert_eq!(installation.meter_code, "");
    }
}
