//! Multi-row INSERT generation.

use serde_json::Value;

use super::{Dialect, ExistenceFilter};
use crate::destination::Destination;
use crate::models::{is_reserved_field, Record};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOptions {
    pub table: String,
    /// Columns appended with the same value to every row.
    pub static_params: Record,
    /// Skip records whose value for this attribute is already stored.
    pub exists_attr: Option<String>,
}

impl InsertOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// A ready-to-run statement and the number of tuples it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub sql: String,
    pub rows: usize,
}

/// Outcome of generating the insert for one row-group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedInsert {
    /// `None` when every record was skipped or the group was empty.
    pub statement: Option<InsertStatement>,
    pub skipped_existing: usize,
}

/// Union of non-reserved field names in first-appearance order.
///
/// Static parameter names are left out; they are appended after the record
/// columns and their value wins over a record field of the same name.
pub fn resolve_columns<'r>(
    rows: impl IntoIterator<Item = &'r Record>,
    static_params: &Record,
) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if is_reserved_field(key) || static_params.contains_key(key) {
                continue;
            }
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Build the statement for `rows` without consulting the destination.
pub fn build_insert(
    rows: &[Record],
    options: &InsertOptions,
    dialect: Dialect,
) -> Option<InsertStatement> {
    let columns = resolve_columns(rows, &options.static_params);
    let refs: Vec<&Record> = rows.iter().collect();
    render_insert(&refs, &columns, options, dialect)
}

/// Generate the insert for one row-group, dropping records that already exist.
///
/// The column set is resolved over the whole row-group, skipped records
/// included, so it does not depend on what the destination already holds.
pub async fn create_insert(
    rows: &[Record],
    options: &InsertOptions,
    destination: &dyn Destination,
) -> GeneratedInsert {
    let columns = resolve_columns(rows, &options.static_params);
    let mut kept: Vec<&Record> = Vec::with_capacity(rows.len());
    let mut skipped_existing = 0;

    match options.exists_attr.as_deref() {
        Some(attr) => {
            let filter = ExistenceFilter::new(destination, &options.table, attr);
            for row in rows {
                if filter.is_stored(row).await {
                    tracing::warn!(
                        "Skipping record, {} = {} already exists in {}",
                        attr,
                        row.get(attr).unwrap_or(&serde_json::Value::Null),
                        options.table
                    );
                    skipped_existing += 1;
                } else {
                    kept.push(row);
                }
            }
        }
        None => kept.extend(rows),
    }

    GeneratedInsert {
        statement: render_insert(&kept, &columns, options, destination.dialect()),
        skipped_existing,
    }
}

fn render_insert(
    rows: &[&Record],
    columns: &[String],
    options: &InsertOptions,
    dialect: Dialect,
) -> Option<InsertStatement> {
    if rows.is_empty() {
        return None;
    }

    let static_values: Vec<String> = options
        .static_params
        .iter()
        .map(|(column, value)| render_value(dialect, column, value))
        .collect();

    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = columns
                .iter()
                .map(|column| match row.get(column) {
                    Some(value) => render_value(dialect, column, value),
                    None => "NULL".to_string(),
                })
                .chain(static_values.iter().cloned())
                .collect();
            format!("({})", values.join(","))
        })
        .collect();

    let column_list = columns
        .iter()
        .chain(options.static_params.keys())
        .map(|column| dialect.quote_identifier(column))
        .collect::<Vec<_>>()
        .join(",");

    Some(InsertStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {};",
            dialect.quote_table(&options.table),
            column_list,
            tuples.join(",")
        ),
        rows: tuples.len(),
    })
}

fn render_value(dialect: Dialect, column: &str, value: &Value) -> String {
    dialect.literal(value).unwrap_or_else(|| {
        tracing::warn!(
            "Value for column {} cannot be escaped safely, storing NULL",
            column
        );
        "NULL".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::testing::MemoryDestination;
    use serde_json::json;

    fn records(value: Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn with_static(table: &str, params: Value) -> InsertOptions {
        InsertOptions {
            static_params: params.as_object().unwrap().clone(),
            ..InsertOptions::new(table)
        }
    }

    #[test]
    fn test_rows_with_static_params() {
        let rows = records(json!([{"a": 1, "b": "hi"}, {"a": 2}]));
        let options = with_static("t", json!({"src": "x"}));

        let statement = build_insert(&rows, &options, Dialect::Ansi).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"t\" (\"a\",\"b\",\"src\") VALUES (1,'hi','x'),(2,NULL,'x');"
        );
        assert_eq!(statement.rows, 2);
    }

    #[test]
    fn test_column_union_in_first_appearance_order() {
        let rows = records(json!([{"a": 1, "b": 2}, {"c": 3, "a": 4}]));
        assert_eq!(
            resolve_columns(&rows, &Record::new()),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        let statement = build_insert(&rows, &InsertOptions::new("t"), Dialect::Ansi).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"t\" (\"a\",\"b\",\"c\") VALUES (1,2,NULL),(4,NULL,3);"
        );
    }

    #[test]
    fn test_reserved_fields_are_not_columns() {
        let rows = records(json!([{"#debug": {"url": "x"}, "a": 1}]));
        let statement = build_insert(&rows, &InsertOptions::new("t"), Dialect::Ansi).unwrap();
        assert_eq!(statement.sql, "INSERT INTO \"t\" (\"a\") VALUES (1);");
    }

    #[test]
    fn test_quote_in_value_stays_one_literal() {
        let rows = records(json!([{"name": "O'Brien"}]));
        let statement = build_insert(&rows, &InsertOptions::new("t"), Dialect::Ansi).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"t\" (\"name\") VALUES ('O''Brien');"
        );
    }

    #[test]
    fn test_value_kinds() {
        let rows = records(json!([{
            "zero": 0, "empty": "", "no": false, "missing": null,
            "tags": ["a", "b"], "meta": {"k": 1}
        }]));
        let statement = build_insert(&rows, &InsertOptions::new("t"), Dialect::Ansi).unwrap();
        assert!(statement
            .sql
            .ends_with("VALUES (0,'',FALSE,NULL,'[\"a\",\"b\"]','{\"k\":1}');"));
    }

    #[test]
    fn test_unsafe_value_becomes_null_and_keeps_column() {
        let rows = records(json!([{"a": "bad\u{0}", "b": 1}]));
        let statement = build_insert(&rows, &InsertOptions::new("t"), Dialect::Ansi).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"t\" (\"a\",\"b\") VALUES (NULL,1);"
        );
    }

    #[test]
    fn test_static_param_overrides_record_field() {
        let rows = records(json!([{"a": 1, "src": "record"}]));
        let options = with_static("t", json!({"src": "static"}));
        let statement = build_insert(&rows, &options, Dialect::Ansi).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"t\" (\"a\",\"src\") VALUES (1,'static');"
        );
    }

    #[test]
    fn test_mysql_identifiers_and_escaping() {
        let rows = records(json!([{"path": "C:\\dir"}]));
        let statement =
            build_insert(&rows, &InsertOptions::new("db.items"), Dialect::MySql).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO `db`.`items` (`path`) VALUES ('C:\\\\dir');"
        );
    }

    #[test]
    fn test_empty_group_is_nothing() {
        assert!(build_insert(&[], &InsertOptions::new("t"), Dialect::Ansi).is_none());
    }

    #[tokio::test]
    async fn test_dedup_skips_existing() {
        let dest = MemoryDestination::new().with_existing("id", json!(1));
        let rows = records(json!([{"id": 1, "v": "old"}, {"id": 2, "v": "new"}]));
        let options = InsertOptions {
            exists_attr: Some("id".to_string()),
            ..InsertOptions::new("t")
        };

        let generated = create_insert(&rows, &options, &dest).await;
        assert_eq!(generated.skipped_existing, 1);
        let statement = generated.statement.unwrap();
        assert_eq!(
            statement.sql,
            "INSERT INTO \"t\" (\"id\",\"v\") VALUES (2,'new');"
        );
        assert_eq!(statement.rows, 1);
    }

    #[tokio::test]
    async fn test_dedup_all_existing_is_nothing() {
        let dest = MemoryDestination::new()
            .with_existing("id", json!(1))
            .with_existing("id", json!(2));
        let rows = records(json!([{"id": 1}, {"id": 2}]));
        let options = InsertOptions {
            exists_attr: Some("id".to_string()),
            ..InsertOptions::new("t")
        };

        let generated = create_insert(&rows, &options, &dest).await;
        assert_eq!(generated.skipped_existing, 2);
        assert!(generated.statement.is_none());
    }

    #[tokio::test]
    async fn test_columns_include_skipped_records() {
        let dest = MemoryDestination::new().with_existing("id", json!(1));
        let rows = records(json!([{"id": 1, "extra": "x"}, {"id": 2}]));
        let options = InsertOptions {
            exists_attr: Some("id".to_string()),
            ..InsertOptions::new("t")
        };

        let generated = create_insert(&rows, &options, &dest).await;
        assert_eq!(
            generated.statement.unwrap().sql,
            "INSERT INTO \"t\" (\"id\",\"extra\") VALUES (2,NULL);"
        );
    }

    #[tokio::test]
    async fn test_records_without_attr_are_inserted_unchecked() {
        let dest = MemoryDestination::new();
        let rows = records(json!([{"id": null, "v": 1}, {"v": 2}]));
        let options = InsertOptions {
            exists_attr: Some("id".to_string()),
            ..InsertOptions::new("t")
        };

        let generated = create_insert(&rows, &options, &dest).await;
        assert_eq!(generated.statement.unwrap().rows, 2);
        assert!(dest.probes.lock().unwrap().is_empty());
    }
}
