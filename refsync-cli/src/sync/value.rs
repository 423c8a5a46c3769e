//! Attribute value representation, equality and display formatting

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Foreign-key reference to another record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
    /// Logical name of the referenced entity
    pub target_type: String,
    /// Referenced record ID
    pub target_id: String,
    /// Formatted value returned by the service, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl EntityReference {
    pub fn new(target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            target_id: target_id.into(),
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// A typed attribute value on a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    /// Null/empty value
    Null,
    String(String),
    /// Whole number
    Int(i64),
    /// Floating point (double, decimal columns)
    Float(f64),
    /// Boolean (Two Options)
    Bool(bool),
    DateTime(DateTime<Utc>),
    /// Lookup to another record
    Reference(EntityReference),
    /// Option set / state / status code
    Choice(i32),
    /// Currency amount
    Money(Decimal),
    /// Managed property boolean (e.g. iscustomizable)
    ManagedBoolean(bool),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Integer content of Choice and Int values
    pub fn as_code(&self) -> Option<i32> {
        match self {
            AttributeValue::Choice(code) => Some(*code),
            AttributeValue::Int(i) => i32::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&EntityReference> {
        match self {
            AttributeValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Convert a non-reference value to its JSON payload form.
    ///
    /// References need the target entity set and are bound by the client.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
            AttributeValue::Int(i) => serde_json::json!(*i),
            AttributeValue::Float(f) => serde_json::json!(*f),
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::ManagedBoolean(b) => serde_json::json!({ "Value": *b }),
            AttributeValue::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            AttributeValue::Reference(r) => serde_json::Value::String(r.target_id.clone()),
            AttributeValue::Choice(code) => serde_json::json!(*code),
            AttributeValue::Money(amount) => money_json(amount),
        }
    }

    /// Parse an untyped JSON value (no schema information)
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    AttributeValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    AttributeValue::Float(f)
                } else {
                    AttributeValue::Null
                }
            }
            serde_json::Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => AttributeValue::DateTime(dt.with_timezone(&Utc)),
                Err(_) => AttributeValue::String(s.clone()),
            },
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                AttributeValue::String(json.to_string())
            }
        }
    }
}

/// Exact decimal digits as a JSON number
fn money_json(amount: &Decimal) -> serde_json::Value {
    let digits = amount.to_string();
    match digits.parse::<serde_json::Number>() {
        Ok(number) => serde_json::Value::Number(number),
        Err(_) => serde_json::Value::String(digits),
    }
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match format_value(Some(self)) {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "(null)"),
        }
    }
}

/// Whether two attribute values are considered equal.
///
/// A missing attribute counts as null. References compare by target ID only,
/// Choice by code, Money by decimal value. Values of different kinds fall
/// back to comparing their formatted strings.
pub fn values_equal(a: Option<&AttributeValue>, b: Option<&AttributeValue>) -> bool {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());

    match (a, b) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(AttributeValue::Reference(x)), Some(AttributeValue::Reference(y))) => {
            x.target_id.eq_ignore_ascii_case(&y.target_id)
        }
        (Some(AttributeValue::Choice(x)), Some(AttributeValue::Choice(y))) => x == y,
        (Some(AttributeValue::Money(x)), Some(AttributeValue::Money(y))) => x == y,
        (Some(AttributeValue::ManagedBoolean(x)), Some(AttributeValue::ManagedBoolean(y))) => {
            x == y
        }
        (Some(x), Some(y)) if std::mem::discriminant(x) == std::mem::discriminant(y) => x == y,
        (Some(x), Some(y)) => format_value(Some(x)) == format_value(Some(y)),
    }
}

/// Render a value to a human-comparable string, `None` for null
pub fn format_value(value: Option<&AttributeValue>) -> Option<String> {
    let value = value?;
    match value {
        AttributeValue::Null => None,
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Int(i) => Some(i.to_string()),
        AttributeValue::Float(f) => Some(f.to_string()),
        AttributeValue::Bool(b) | AttributeValue::ManagedBoolean(b) => Some(b.to_string()),
        AttributeValue::DateTime(dt) => Some(dt.to_rfc3339()),
        AttributeValue::Reference(r) => Some(
            r.display_name
                .clone()
                .unwrap_or_else(|| r.target_id.clone()),
        ),
        AttributeValue::Choice(code) => Some(code.to_string()),
        AttributeValue::Money(amount) => Some(format!("{:.2}", amount.round_dp(2))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn money(s: &str) -> AttributeValue {
        AttributeValue::Money(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_null_equality() {
        assert!(values_equal(None, None));
        assert!(values_equal(Some(&AttributeValue::Null), None));
        assert!(!values_equal(Some(&AttributeValue::Int(0)), None));
    }

    #[test]
    fn test_reference_ignores_display_name() {
        let a = AttributeValue::Reference(EntityReference::new("account", "ABC").with_name("Contoso"));
        let b = AttributeValue::Reference(EntityReference::new("account", "abc"));
        let c = AttributeValue::Reference(EntityReference::new("account", "def"));
        assert!(values_equal(Some(&a), Some(&b)));
        assert!(!values_equal(Some(&a), Some(&c)));
    }

    #[test]
    fn test_money_compares_decimal_value() {
        assert!(values_equal(Some(&money("10.5")), Some(&money("10.50"))));
        assert!(!values_equal(Some(&money("10.5")), Some(&money("10.51"))));
    }

    #[test]
    fn test_mixed_kinds_compare_as_strings() {
        let a = AttributeValue::String("5".to_string());
        let b = AttributeValue::Int(5);
        assert!(values_equal(Some(&a), Some(&b)));
        assert!(!values_equal(Some(&AttributeValue::Choice(1)), Some(&AttributeValue::Bool(true))));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(None), None);
        assert_eq!(format_value(Some(&AttributeValue::Null)), None);
        assert_eq!(format_value(Some(&AttributeValue::Choice(100000001))), Some("100000001".to_string()));
        assert_eq!(format_value(Some(&money("3"))), Some("3.00".to_string()));
        assert_eq!(format_value(Some(&money("3.456"))), Some("3.46".to_string()));

        let named = AttributeValue::Reference(EntityReference::new("account", "id-1").with_name("Contoso"));
        let unnamed = AttributeValue::Reference(EntityReference::new("account", "id-1"));
        assert_eq!(format_value(Some(&named)), Some("Contoso".to_string()));
        assert_eq!(format_value(Some(&unnamed)), Some("id-1".to_string()));
    }

    #[test]
    fn test_from_json_parses_datetimes() {
        let v = AttributeValue::from_json(&serde_json::json!("2024-01-02T03:04:05Z"));
        assert!(matches!(v, AttributeValue::DateTime(_)));
        let s = AttributeValue::from_json(&serde_json::json!("plain"));
        assert_eq!(s, AttributeValue::String("plain".to_string()));
    }

    #[test]
    fn test_money_payload_keeps_every_digit() {
        let large = money("12345678901234567.89").to_json();
        assert!(large.is_number());
        assert_eq!(large.to_string(), "12345678901234567.89");

        let zero = money("0.00").to_json();
        assert!(!zero.is_null());
        assert_eq!(zero.to_string(), "0.00");
    }
}
