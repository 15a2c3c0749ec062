use serde_json::{Map, Value};

/// One row handed back by an executor, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Map<String, Value>);

impl Row {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Missing columns read as null.
    pub fn column(&self, key: &str) -> Value {
        self.0.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Rows from JSON objects; anything else has no row form.
    pub fn from_json(value: Value) -> Option<Row> {
        match value {
            Value::Object(map) => Some(Row(map)),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for Row {
    fn from(map: Map<String, Value>) -> Self {
        Row(map)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_columns_read_as_null() {
        let row = Row::from_json(json!({"Id": 1, "Name": "Alfreds"})).unwrap();
        assert_eq!(row.column("Id"), json!(1));
        assert_eq!(row.column("City"), Value::Null);
        assert!(row.get("City").is_none());
    }

    #[test]
    fn only_objects_become_rows() {
        assert!(Row::from_json(json!([1, 2])).is_none());
        assert_eq!(Row::from_json(json!({})).unwrap().into_value(), json!({}));
    }
}
