//! Row transformations configured per pipeline
//!
//! Each `transformations` entry of the configuration maps to one of the
//! transformers below. [`ColumnTransforms`] applies them in order.

mod drop_column;
mod fill_default;
mod require_column;

pub use drop_column::DropColumn;
pub use fill_default::FillDefault;
pub use require_column::RequireColumn;

use crate::Row;
use crate::config::TransformationConfig;
use crate::etl::RecordTransformer;
use eyre::Result;

type RowTransformer = Box<dyn RecordTransformer<Input = Row, Output = Row>>;

/// Ordered chain of row transformers
///
/// An empty chain passes rows through unchanged.
#[derive(Default)]
pub struct ColumnTransforms {
    steps: Vec<RowTransformer>,
}

impl ColumnTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain described by the configuration
    pub fn from_config(configs: &[TransformationConfig]) -> Self {
        configs
            .iter()
            .fold(Self::new(), |chain, config| match config {
                TransformationConfig::FillDefault {
                    column,
                    default_value,
                } => chain.with(FillDefault::new(column, default_value.clone())),
                TransformationConfig::DropColumn { column } => chain.with(DropColumn::new(column)),
                TransformationConfig::RequireColumn { column } => {
                    chain.with(RequireColumn::new(column))
                }
            })
    }

    /// Append a transformer to the chain
    pub fn with<R>(mut self, step: R) -> Self
    where
        R: RecordTransformer<Input = Row, Output = Row>,
    {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl RecordTransformer for ColumnTransforms {
    type Input = Row;
    type Output = Row;

    fn apply(&self, input: Row) -> Result<Row> {
        self.steps.iter().try_fold(input, |row, step| step.apply(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chain_from_config() {
        let configs = vec![
            TransformationConfig::FillDefault {
                column: "details".to_string(),
                default_value: json!("n/a"),
            },
            TransformationConfig::DropColumn {
                column: "secret".to_string(),
            },
            TransformationConfig::RequireColumn {
                column: "id".to_string(),
            },
        ];
        let chain = ColumnTransforms::from_config(&configs);
        assert_eq!(chain.len(), 3);

        let row = json!({"id": 7, "secret": "x"}).as_object().unwrap().clone();
        let output = chain.apply(row).unwrap();
        assert_eq!(output["details"], "n/a");
        assert!(!output.contains_key("secret"));

        let row = json!({"secret": "x"}).as_object().unwrap().clone();
        assert!(chain.apply(row).is_err());
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let chain = ColumnTransforms::new();
        let row = json!({"id": 1}).as_object().unwrap().clone();
        assert_eq!(chain.apply(row.clone()).unwrap(), row);
    }
}
