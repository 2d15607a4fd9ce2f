//! Existence checks used to skip records that are already stored.

use serde_json::Value;

use super::Dialect;
use crate::destination::Destination;
use crate::error::ExportError;
use crate::models::Record;

/// Point read for `table.attr = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistenceQuery {
    pub table: String,
    pub attr: String,
    pub value: Value,
}

impl ExistenceQuery {
    pub fn new(table: impl Into<String>, attr: impl Into<String>, value: Value) -> Self {
        Self {
            table: table.into(),
            attr: attr.into(),
            value,
        }
    }

    /// Render the probe. It yields a single `hits` column that is 0 or 1.
    ///
    /// Returns `None` when the value cannot be written as a literal, or is
    /// null (which never compares equal).
    pub fn to_sql(&self, dialect: Dialect) -> Option<String> {
        if self.value.is_null() {
            return None;
        }
        let literal = dialect.literal(&self.value)?;
        Some(format!(
            "SELECT COUNT(*) AS hits FROM (SELECT 1 FROM {} WHERE {} = {} LIMIT 1) AS probe",
            dialect.quote_table(&self.table),
            dialect.quote_identifier(&self.attr),
            literal
        ))
    }
}

/// Per-record duplicate detection against the destination table.
///
/// Every checked record costs one round-trip, so a row-group of N records with
/// the attribute set issues up to N queries before its insert.
pub struct ExistenceFilter<'a> {
    destination: &'a dyn Destination,
    table: &'a str,
    attr: &'a str,
}

impl<'a> ExistenceFilter<'a> {
    pub fn new(destination: &'a dyn Destination, table: &'a str, attr: &'a str) -> Self {
        Self {
            destination,
            table,
            attr,
        }
    }

    /// Whether the record is already stored.
    ///
    /// Records without the attribute (missing key or null) are never checked.
    /// A failed check is logged and answered with `false`, so the record is
    /// inserted rather than lost.
    pub async fn is_stored(&self, record: &Record) -> bool {
        let Some(value) = record.get(self.attr).filter(|v| !v.is_null()) else {
            return false;
        };
        let query = ExistenceQuery::new(self.table, self.attr, value.clone());
        match self.destination.exists(&query).await {
            Ok(found) => found,
            Err(source) => {
                let err = ExportError::DedupCheck {
                    table: self.table.to_string(),
                    attr: self.attr.to_string(),
                    source: source.into_inner(),
                };
                tracing::warn!("{}; inserting {} = {} anyway", err, self.attr, value);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::testing::MemoryDestination;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_probe_sql() {
        let query = ExistenceQuery::new("items", "url", json!("https://x/?q='1'"));
        assert_eq!(
            query.to_sql(Dialect::Ansi).unwrap(),
            "SELECT COUNT(*) AS hits FROM (SELECT 1 FROM \"items\" WHERE \"url\" = 'https://x/?q=''1''' LIMIT 1) AS probe"
        );
        let query = ExistenceQuery::new("shop.items", "id", json!(7));
        assert_eq!(
            query.to_sql(Dialect::MySql).unwrap(),
            "SELECT COUNT(*) AS hits FROM (SELECT 1 FROM `shop`.`items` WHERE `id` = 7 LIMIT 1) AS probe"
        );
        assert!(ExistenceQuery::new("t", "a", Value::Null)
            .to_sql(Dialect::Ansi)
            .is_none());
    }

    #[tokio::test]
    async fn test_is_stored() {
        let dest = MemoryDestination::new().with_existing("id", json!(1));
        let filter = ExistenceFilter::new(&dest, "t", "id");

        assert!(filter.is_stored(&record(json!({"id": 1}))).await);
        assert!(!filter.is_stored(&record(json!({"id": 2}))).await);
        assert!(!filter.is_stored(&record(json!({"other": 1}))).await);
        assert!(!filter.is_stored(&record(json!({"id": null}))).await);
        // Only the two records carrying a value were probed
        assert_eq!(dest.probes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_falsy_values_are_still_checked() {
        let dest = MemoryDestination::new()
            .with_existing("id", json!(0))
            .with_existing("id", json!(""));
        let filter = ExistenceFilter::new(&dest, "t", "id");
        assert!(filter.is_stored(&record(json!({"id": 0}))).await);
        assert!(filter.is_stored(&record(json!({"id": ""}))).await);
        assert!(!filter.is_stored(&record(json!({"id": false}))).await);
    }

    #[tokio::test]
    async fn test_failed_check_counts_as_absent() {
        let dest = MemoryDestination::new()
            .with_existing("id", json!(1))
            .failing_exists();
        let filter = ExistenceFilter::new(&dest, "t", "id");
        // A possible duplicate is inserted rather than the record dropped
        assert!(!filter.is_stored(&record(json!({"id": 1}))).await);

        // Same answer when no connection could be opened for the check
        let dest = MemoryDestination::new().unavailable();
        let filter = ExistenceFilter::new(&dest, "t", "id");
        assert!(!filter.is_stored(&record(json!({"id": 1}))).await);
    }
}
