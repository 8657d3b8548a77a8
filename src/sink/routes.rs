//! Choosing the sink table for a row

use crate::Row;
use crate::config::PipelineConfig;
use std::collections::BTreeMap;

/// Maps a row to its target table by the source table it was read from
///
/// The source table is recovered from the `source_column` stamp
/// (`<table>_shard<N>`). Rows without a stamp, or from a table missing in
/// `table_map`, go to the default sink table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRoutes {
    default: String,
    column: Option<String>,
    map: BTreeMap<String, String>,
}

impl TableRoutes {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            default: config.sink.table.clone(),
            column: config.source.source_column.clone(),
            map: config.sink.table_map.clone(),
        }
    }

    /// Target table for `row`
    pub fn resolve(&self, row: &Row) -> &str {
        if self.map.is_empty() {
            return &self.default;
        }
        let Some(tag) = self
            .column
            .as_ref()
            .and_then(|column| row.get(column))
            .and_then(|value| value.as_str())
        else {
            return &self.default;
        };

        self.map
            .get(tag)
            .or_else(|| self.map.get(source_table(tag)))
            .unwrap_or(&self.default)
    }
}

/// `public.log_shard2` → `public.log`; other values are returned unchanged
fn source_table(tag: &str) -> &str {
    match tag.rsplit_once("_shard") {
        Some((table, shard))
            if !table.is_empty()
                && !shard.is_empty()
                && shard.chars().all(|c| c.is_ascii_digit()) =>
        {
            table
        }
        _ => tag,
    }
}
