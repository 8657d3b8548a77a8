//! Required column check

use crate::Row;
use crate::etl::RecordTransformer;
use eyre::Result;
use serde_json::Value;

/// Rejects rows where a column is missing or null
///
/// Rejected rows surface as row errors; the rest of the stream is unaffected.
pub struct RequireColumn {
    column: String,
}

impl RequireColumn {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl RecordTransformer for RequireColumn {
    type Input = Row;
    type Output = Row;

    fn apply(&self, input: Row) -> Result<Row> {
        match input.get(&self.column) {
            None | Some(Value::Null) => {
                eyre::bail!("Row is missing required column '{}'", self.column)
            }
            Some(_) => Ok(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_require_column() {
        let check = RequireColumn::new("dealer_id");

        let ok = json!({"dealer_id": "D1"}).as_object().unwrap().clone();
        assert!(check.apply(ok).is_ok());

        let missing = json!({"other": 1}).as_object().unwrap().clone();
        let err = check.apply(missing).unwrap_err();
        assert!(err.to_string().contains("dealer_id"));

        let null = json!({"dealer_id": null}).as_object().unwrap().clone();
        assert!(check.apply(null).is_err());
    }
}
