//! Per-table extraction queries
//!
//! Every query returns a single `jsonb` column holding the whole row, so rows
//! of any shape decode into a [`Row`](crate::Row).

use crate::config::SourceConfig;
use crate::sql::quote_ident;

/// Build the query one extraction task runs
///
/// - Without a custom query: `SELECT to_jsonb(t) FROM <table> AS t`
/// - With a custom query: `{table}` is substituted and the query is wrapped
///   as `SELECT to_jsonb(q) FROM (<query>) AS q`
///
/// `order_by` is appended to the outer query in both cases.
pub fn build_query(source: &SourceConfig, table: Option<&str>) -> String {
    let mut sql = match (&source.query, table) {
        (Some(query), Some(table)) => format!(
            "SELECT to_jsonb(q) AS record FROM ({}) AS q",
            query.trim().trim_end_matches(';').replace("{table}", &quote_ident(table))
        ),
        (Some(query), None) => format!(
            "SELECT to_jsonb(q) AS record FROM ({}) AS q",
            query.trim().trim_end_matches(';')
        ),
        (None, Some(table)) => format!(
            "SELECT to_jsonb(t) AS record FROM {} AS t",
            quote_ident(table)
        ),
        // Validation guarantees a table or a query
        (None, None) => "SELECT NULL::jsonb AS record WHERE false".to_string(),
    };

    if let Some(order_by) = source.order_by.as_deref().map(str::trim)
        && !order_by.is_empty()
    {
        sql.push_str(" ORDER BY ");
        sql.push_str(order_by);
    }
    sql
}
