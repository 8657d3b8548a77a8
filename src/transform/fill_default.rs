//! Default value transformer
//!
//! Fills a column with a configured value when a row lacks it.

use crate::Row;
use crate::etl::RecordTransformer;
use eyre::Result;
use serde_json::Value;

/// Transformer that sets a column to a default when it is missing or null
///
/// # Example
/// ```
/// use shardflow::transform::FillDefault;
/// use shardflow::etl::RecordTransformer;
/// use serde_json::json;
///
/// let filler = FillDefault::new("details", json!(""));
/// let row = json!({"id": 1, "details": null});
///
/// let output = filler.apply(row.as_object().unwrap().clone()).unwrap();
/// assert_eq!(output["details"], "");
/// ```
pub struct FillDefault {
    column: String,
    value: Value,
}

impl FillDefault {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

impl RecordTransformer for FillDefault {
    type Input = Row;
    type Output = Row;

    fn apply(&self, mut input: Row) -> Result<Row> {
        match input.get(&self.column) {
            None | Some(Value::Null) => {
                input.insert(self.column.clone(), self.value.clone());
            }
            Some(_) => {}
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_fills_missing_and_null() {
        let filler = FillDefault::new("mode", json!(0));

        let output = filler.apply(row(json!({"id": 1}))).unwrap();
        assert_eq!(output["mode"], 0);

        let output = filler.apply(row(json!({"id": 2, "mode": null}))).unwrap();
        assert_eq!(output["mode"], 0);
    }

    #[test]
    fn test_keeps_existing_value() {
        let filler = FillDefault::new("mode", json!(0));
        let output = filler.apply(row(json!({"id": 1, "mode": 3}))).unwrap();
        assert_eq!(output["mode"], 3);
    }
}
