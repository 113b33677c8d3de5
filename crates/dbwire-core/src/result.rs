//! Query and catalog results.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::row::{ColumnIndex, ColumnInfo, Row};
use crate::value::Value;

/// Outcome of one `query()` call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    /// Rows returned, or rows affected for statements without a result set
    pub row_count: u64,
    #[serde(serialize_with = "serialize_millis")]
    pub execution_time: Duration,
    /// Command tag (`SELECT 2`, `INSERT 0 1`) or command name (`find`)
    pub command: String,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

impl QueryResult {
    /// Result for a statement that returned no rows.
    pub fn empty(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Assemble a result set from columns and raw row values.
    pub fn from_rows(
        columns: Vec<ColumnInfo>,
        rows: Vec<Vec<Value>>,
        command: impl Into<String>,
    ) -> Self {
        let index = Arc::new(ColumnIndex::from_columns(&columns));
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|values| Row::with_columns(Arc::clone(&index), values))
            .collect();
        Self {
            columns,
            row_count: rows.len() as u64,
            rows,
            execution_time: Duration::ZERO,
            command: command.into(),
        }
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of every row, as text. Used by the catalog wrappers.
    pub fn first_column_strings(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(0))
            .filter(|v| !v.is_null())
            .map(ToString::to_string)
            .collect()
    }
}

/// A table, view or collection returned by `list_tables`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    /// `BASE TABLE`, `VIEW`, `collection`, ...
    pub kind: String,
}

/// One column returned by `describe_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDetail {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

impl TableInfo {
    /// Rows of `(schema, name, kind)` as returned by the SQL catalog queries.
    pub fn from_catalog_rows(result: &QueryResult) -> Vec<Self> {
        result
            .rows
            .iter()
            .map(|row| Self {
                schema: cell_text(row, 0),
                name: cell_text(row, 1),
                kind: cell_text(row, 2),
            })
            .collect()
    }
}

impl ColumnDetail {
    /// Rows of `(name, type, is_nullable, default)` from `information_schema.columns`.
    pub fn from_catalog_rows(result: &QueryResult) -> Vec<Self> {
        result
            .rows
            .iter()
            .map(|row| Self {
                name: cell_text(row, 0),
                type_name: cell_text(row, 1),
                nullable: cell_text(row, 2).eq_ignore_ascii_case("YES"),
                default_value: row.get(3).filter(|v| !v.is_null()).map(ToString::to_string),
            })
            .collect()
    }
}

fn cell_text(row: &Row, index: usize) -> String {
    match row.get(index) {
        Some(value) if !value.is_null() => value.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_counts_rows() {
        let result = QueryResult::from_rows(
            vec![ColumnInfo::new("datname", "name")],
            vec![vec![Value::from("app")], vec![Value::from("postgres")]],
            "SELECT 2",
        );
        assert_eq!(result.row_count, 2);
        assert_eq!(result.column_names(), vec!["datname"]);
        assert_eq!(result.first_column_strings(), vec!["app", "postgres"]);
        assert_eq!(
            result.rows[1].get_by_name("datname"),
            Some(&Value::from("postgres"))
        );
    }

    #[test]
    fn test_catalog_rows() {
        let tables = QueryResult::from_rows(
            vec![
                ColumnInfo::new("table_schema", "name"),
                ColumnInfo::new("table_name", "name"),
                ColumnInfo::new("table_type", "varchar"),
            ],
            vec![vec![
                Value::from("public"),
                Value::from("users"),
                Value::from("BASE TABLE"),
            ]],
            "SELECT 1",
        );
        assert_eq!(
            TableInfo::from_catalog_rows(&tables),
            vec![TableInfo {
                schema: "public".into(),
                name: "users".into(),
                kind: "BASE TABLE".into(),
            }]
        );

        let columns = QueryResult::from_rows(
            vec![
                ColumnInfo::new("column_name", "name"),
                ColumnInfo::new("data_type", "varchar"),
                ColumnInfo::new("is_nullable", "varchar"),
                ColumnInfo::new("column_default", "varchar"),
            ],
            vec![
                vec![
                    Value::from("id"),
                    Value::from("integer"),
                    Value::from("NO"),
                    Value::from("nextval('users_id_seq'::regclass)"),
                ],
                vec![
                    Value::from("email"),
                    Value::from("text"),
                    Value::from("YES"),
                    Value::Null,
                ],
            ],
            "SELECT 2",
        );
        let details = ColumnDetail::from_catalog_rows(&columns);
        assert!(!details[0].nullable);
        assert_eq!(
            details[0].default_value.as_deref(),
            Some("nextval('users_id_seq'::regclass)")
        );
        assert!(details[1].nullable);
        assert_eq!(details[1].default_value, None);
    }

    #[test]
    fn test_serialises_camel_case() {
        let result = QueryResult::empty("CREATE TABLE");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rowCount"], 0);
        assert_eq!(json["command"], "CREATE TABLE");
        assert!(json.get("executionTime").is_some());
    }
}
