use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The primitive types a value formatter knows how to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveValueType {
    String,
    Boolean,
    Integer,
    Long,
    Double,
    DateTime,
    Id,
    Point2d,
    Point3d,
}

/// A primitive value along with the type information a formatter needs to
/// render it.  The `koq_name` ("kind of quantity") lets unit-aware formatters
/// pick a presentation unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedPrimitiveValue {
    #[serde(rename = "type")]
    pub value_type: PrimitiveValueType,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub koq_name: Option<String>,
}

impl TypedPrimitiveValue {
    pub fn new(value_type: PrimitiveValueType, value: Value) -> Self {
        TypedPrimitiveValue {
            value_type,
            value,
            koq_name: None,
        }
    }

    pub fn string(s: &str) -> Self {
        Self::new(PrimitiveValueType::String, Value::String(s.to_string()))
    }

    pub fn double(v: f64) -> Self {
        Self::new(PrimitiveValueType::Double, Value::from(v))
    }

    /// Infer a typed value from an untyped JSON value as selected by a query.
    /// Nulls (and structured values we have no type for) produce `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(_) => Some(Self::new(PrimitiveValueType::Boolean, value.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => {
                Some(Self::new(PrimitiveValueType::Integer, value.clone()))
            }
            Value::Number(_) => Some(Self::new(PrimitiveValueType::Double, value.clone())),
            Value::String(_) => Some(Self::new(PrimitiveValueType::String, value.clone())),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// Render the value without any locale or unit awareness.
    pub fn to_plain_string(&self) -> String {
        match (&self.value_type, &self.value) {
            (_, Value::String(s)) => s.clone(),
            (PrimitiveValueType::Boolean, Value::Bool(b)) => b.to_string(),
            (PrimitiveValueType::Point2d, Value::Object(o)) => {
                format!("({}, {})", number_str(o.get("x")), number_str(o.get("y")))
            }
            (PrimitiveValueType::Point3d, Value::Object(o)) => format!(
                "({}, {}, {})",
                number_str(o.get("x")),
                number_str(o.get("y")),
                number_str(o.get("z"))
            ),
            (_, Value::Number(n)) => match n.as_f64() {
                Some(f) if !n.is_i64() && !n.is_u64() => f.to_string(),
                _ => n.to_string(),
            },
            (_, Value::Null) => "".to_string(),
            (_, other) => other.to_string(),
        }
    }
}

fn number_str(v: Option<&Value>) -> String {
    match v.and_then(|v| v.as_f64()) {
        Some(f) => f.to_string(),
        None => "".to_string(),
    }
}

/// One piece of a node label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcatenatedValuePart {
    Typed(TypedPrimitiveValue),
    String(String),
}

/// Node labels are a sequence of plain strings and typed values that only get
/// turned into a single string once a formatter is applied.  This lets labels
/// like "Length: 12.5 m" be reformatted when the unit system changes without
/// querying the data source again.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcatenatedValue(pub Vec<ConcatenatedValuePart>);

impl ConcatenatedValue {
    /// Parse a display label column.  Labels selected by queries are either
    /// plain text or a JSON-serialized array of parts.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with('[') {
            if let Ok(parts) = serde_json::from_str::<Vec<ConcatenatedValuePart>>(raw) {
                return ConcatenatedValue(parts);
            }
        }
        ConcatenatedValue(vec![ConcatenatedValuePart::String(raw.to_string())])
    }

    pub fn to_plain_string(&self) -> String {
        self.0
            .iter()
            .map(|part| match part {
                ConcatenatedValuePart::String(s) => s.clone(),
                ConcatenatedValuePart::Typed(v) => v.to_plain_string(),
            })
            .collect()
    }
}

impl From<&str> for ConcatenatedValue {
    fn from(s: &str) -> Self {
        ConcatenatedValue(vec![ConcatenatedValuePart::String(s.to_string())])
    }
}

impl From<String> for ConcatenatedValue {
    fn from(s: String) -> Self {
        ConcatenatedValue(vec![ConcatenatedValuePart::String(s)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_label() {
        let label = ConcatenatedValue::parse("Example element");
        assert_eq!(label, ConcatenatedValue::from("Example element"));
        // Brackets that aren't JSON stay plain text.
        let label = ConcatenatedValue::parse("[not json");
        assert_eq!(label.to_plain_string(), "[not json");
    }

    #[test]
    fn test_parse_concatenated_label() {
        let label = ConcatenatedValue::parse(r#"["Length: ", {"type": "Double", "value": 12.5}]"#);
        assert_eq!(label.0.len(), 2);
        assert_eq!(label.to_plain_string(), "Length: 12.5");
    }

    #[test]
    fn test_plain_rendering() {
        assert_eq!(TypedPrimitiveValue::double(1.0).to_plain_string(), "1");
        assert_eq!(
            TypedPrimitiveValue::new(PrimitiveValueType::Boolean, json!(true)).to_plain_string(),
            "true"
        );
        assert_eq!(
            TypedPrimitiveValue::new(PrimitiveValueType::Point2d, json!({"x": 1, "y": 2.5}))
                .to_plain_string(),
            "(1, 2.5)"
        );
        assert_eq!(TypedPrimitiveValue::from_json(&json!(null)), None);
        assert_eq!(
            TypedPrimitiveValue::from_json(&json!(3)).map(|v| v.value_type),
            Some(PrimitiveValueType::Integer)
        );
    }
}
