//! Column dropper transformer
//!
//! Removes a column from every row, typically fields that should not reach
//! the sink.

use crate::Row;
use crate::etl::RecordTransformer;
use eyre::Result;

/// Transformer that drops a column from rows
///
/// # Example
/// ```
/// use shardflow::transform::DropColumn;
/// use shardflow::etl::RecordTransformer;
/// use serde_json::json;
///
/// let dropper = DropColumn::new("session_secret");
/// let row = json!({"id": 1, "session_secret": "hunter2"});
///
/// let output = dropper.apply(row.as_object().unwrap().clone()).unwrap();
/// assert!(!output.contains_key("session_secret"));
/// assert_eq!(output["id"], 1);
/// ```
pub struct DropColumn {
    column: String,
}

impl DropColumn {
    /// Create a dropper for `column`
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl RecordTransformer for DropColumn {
    type Input = Row;
    type Output = Row;

    fn apply(&self, mut input: Row) -> Result<Row> {
        input.remove(&self.column);
        Ok(input)
    }
}
