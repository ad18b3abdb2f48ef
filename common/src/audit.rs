//! Audit trail records and the two ways of querying them: the parameter
//! set sent to the audit sub-resource, and the query text exported for
//! pasting into a query tool.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::job::JobId;
use crate::schema::SortKind;

pub const AUDIT_LOG_TABLE: &str = "pgagent.pga_job_audit_log";
pub const AUDIT_LOG_RESOURCE: &str = "audit_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Create,
    Modify,
    Delete,
    Execute,
}

/// Operations offered by the interactive filter of a job's audit log.
pub const INTERACTIVE_OPERATIONS: [OperationType; 3] = [
    OperationType::Create,
    OperationType::Modify,
    OperationType::Execute,
];

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::Create,
        OperationType::Modify,
        OperationType::Delete,
        OperationType::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Modify => "MODIFY",
            OperationType::Delete => "DELETE",
            OperationType::Execute => "EXECUTE",
        }
    }

    /// Exact, case-sensitive match against the closed set of tokens.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "CREATE" => Ok(OperationType::Create),
            "MODIFY" => Ok(OperationType::Modify),
            "DELETE" => Ok(OperationType::Delete),
            "EXECUTE" => Ok(OperationType::Execute),
            other => Err(Error::QueryConstruction(other.to_string())),
        }
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OperationType::parse(s)
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLogEntry {
    pub audit_id: i64,
    #[serde(default)]
    pub jobid: Option<JobId>,
    pub operation_type: OperationType,
    pub operation_time: String,
    pub operation_user: String,
    #[serde(default)]
    pub old_values: Option<Value>,
    #[serde(default)]
    pub new_values: Option<Value>,
    #[serde(default)]
    pub additional_info: Option<String>,
}

impl AuditLogEntry {
    pub fn old_values_text(&self) -> String {
        pretty_json(self.old_values.as_ref())
    }

    pub fn new_values_text(&self) -> String {
        pretty_json(self.new_values.as_ref())
    }
}

/// Four-space indented JSON; empty text for a missing or empty snapshot.
pub fn pretty_json(value: Option<&Value>) -> String {
    let value = match value {
        None | Some(Value::Null) => return String::new(),
        Some(Value::String(s)) if s.is_empty() => return String::new(),
        Some(Value::Bool(false)) => return String::new(),
        Some(v) => v,
    };

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    if value.serialize(&mut ser).is_err() {
        return value.to_string();
    }
    String::from_utf8(buf).unwrap_or_else(|_| value.to_string())
}

/// Raw filter selection as entered by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditFilter {
    #[serde(default)]
    pub operation_types: Option<String>,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
}

impl AuditFilter {
    pub fn show_all() -> Self {
        Self::default()
    }

    pub fn operation(operation: OperationType) -> Self {
        Self {
            operation_types: Some(operation.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn date_range(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            operation_types: None,
            date_from: from.map(str::to_string),
            date_to: to.map(str::to_string),
        }
    }

    /// Parameters for the audit sub-resource. Keys the user left empty are
    /// absent rather than null.
    pub fn params(&self) -> Result<AuditParams> {
        let operation_types = match supplied(&self.operation_types) {
            Some(raw) => {
                let operation = OperationType::parse(raw).map_err(|_| invalid("operation_types", raw))?;
                if !INTERACTIVE_OPERATIONS.contains(&operation) {
                    return Err(invalid("operation_types", raw));
                }
                Some(operation)
            }
            None => None,
        };

        let date_from = supplied(&self.date_from)
            .map(|raw| parse_date("date_from", raw))
            .transpose()?;
        let date_to = supplied(&self.date_to)
            .map(|raw| parse_date("date_to", raw))
            .transpose()?;

        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(invalid("date_to", &to.to_string()));
            }
        }

        Ok(AuditParams {
            operation_types,
            date_from,
            date_to,
        })
    }
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(key: &'static str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid(key, raw))
}

fn invalid(key: &'static str, value: &str) -> Error {
    Error::InvalidFilter {
        key,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_types: Option<OperationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

impl AuditParams {
    pub fn is_empty(&self) -> bool {
        self.operation_types.is_none() && self.date_from.is_none() && self.date_to.is_none()
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(op) = self.operation_types {
            pairs.push(("operation_types", op.as_str().to_string()));
        }
        if let Some(from) = self.date_from {
            pairs.push(("date_from", from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = self.date_to {
            pairs.push(("date_to", to.format("%Y-%m-%d").to_string()));
        }
        pairs
    }
}

/// Query text listing audit records, most recent first. The only value
/// spliced into the text comes from the closed `OperationType` set.
pub fn export_query(operation: Option<OperationType>) -> String {
    let mut query = format!("SELECT * FROM {}", AUDIT_LOG_TABLE);
    if let Some(operation) = operation {
        query.push_str(" WHERE operation_type = '");
        query.push_str(operation.as_str());
        query.push('\'');
    }
    query.push_str(" ORDER BY operation_time DESC;");
    query
}

/// Like `export_query` for an operation given as text. Anything other than
/// one of the four tokens fails and produces no query.
pub fn export_query_for(operation: Option<&str>) -> Result<String> {
    let operation = operation.map(OperationType::parse).transpose()?;
    Ok(export_query(operation))
}

pub fn operation_label(operation: Option<OperationType>) -> &'static str {
    operation.map(|op| op.as_str()).unwrap_or("All")
}

pub fn copied_message(operation: Option<OperationType>) -> String {
    format!(
        "SQL query for {} operations copied to clipboard. Paste into the query tool and execute.",
        operation_label(operation)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditColumn {
    AuditId,
    OperationType,
    OperationTime,
    OperationUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl AuditColumn {
    pub const ALL: [AuditColumn; 4] = [
        AuditColumn::AuditId,
        AuditColumn::OperationType,
        AuditColumn::OperationTime,
        AuditColumn::OperationUser,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            AuditColumn::AuditId => "audit_id",
            AuditColumn::OperationType => "operation_type",
            AuditColumn::OperationTime => "operation_time",
            AuditColumn::OperationUser => "operation_user",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        AuditColumn::ALL.into_iter().find(|c| c.id() == id)
    }

    pub fn sort_kind(&self) -> SortKind {
        match self {
            AuditColumn::AuditId => SortKind::Numeric,
            _ => SortKind::Lexicographic,
        }
    }

    fn compare(&self, a: &AuditLogEntry, b: &AuditLogEntry) -> Ordering {
        match self {
            AuditColumn::AuditId => a.audit_id.cmp(&b.audit_id),
            AuditColumn::OperationType => a.operation_type.as_str().cmp(b.operation_type.as_str()),
            AuditColumn::OperationTime => a.operation_time.cmp(&b.operation_time),
            AuditColumn::OperationUser => a.operation_user.cmp(&b.operation_user),
        }
    }
}

pub fn sort_entries(entries: &mut [AuditLogEntry], column: AuditColumn, direction: SortDirection) {
    entries.sort_by(|a, b| {
        let ord = column.compare(a, b);
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
}

/// Most recent first.
pub fn sort_default(entries: &mut [AuditLogEntry]) {
    sort_entries(entries, AuditColumn::OperationTime, SortDirection::Descending);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(audit_id: i64, operation_type: OperationType, time: &str, user: &str) -> AuditLogEntry {
        AuditLogEntry {
            audit_id,
            jobid: Some(JobId(1)),
            operation_type,
            operation_time: time.to_string(),
            operation_user: user.to_string(),
            old_values: None,
            new_values: None,
            additional_info: None,
        }
    }

    #[test]
    fn test_export_query_shape() {
        let all = export_query(None);
        assert_eq!(all, "SELECT * FROM pgagent.pga_job_audit_log ORDER BY operation_time DESC;");
        assert!(!all.contains("operation_type ="));

        for op in OperationType::ALL {
            let query = export_query(Some(op));
            assert!(query.ends_with("ORDER BY operation_time DESC;"));
            assert!(query.contains(&format!("operation_type = '{}'", op)));
        }
    }

    #[test]
    fn test_export_delete_query() {
        assert_eq!(
            export_query_for(Some("DELETE")).unwrap(),
            "SELECT * FROM pgagent.pga_job_audit_log WHERE operation_type = 'DELETE' ORDER BY operation_time DESC;"
        );
    }

    #[test]
    fn test_export_rejects_unknown_operation() {
        for raw in ["", "delete", "DROP", "CREATE'; DROP TABLE pgagent.pga_job; --", " CREATE"] {
            match export_query_for(Some(raw)) {
                Err(Error::QueryConstruction(value)) => assert_eq!(value, raw),
                other => panic!("expected failure for {:?}, got {:?}", raw, other),
            }
        }
        assert!(export_query_for(None).is_ok());
    }

    #[test]
    fn test_filter_only_supplied_keys() {
        let cases = [
            (AuditFilter::show_all(), vec![]),
            (AuditFilter::operation(OperationType::Modify), vec!["operation_types"]),
            (AuditFilter::date_range(Some("2025-01-01"), None), vec!["date_from"]),
            (AuditFilter::date_range(Some(""), Some("2025-02-01")), vec!["date_to"]),
            (
                AuditFilter {
                    operation_types: Some("EXECUTE".to_string()),
                    date_from: Some("2025-01-01".to_string()),
                    date_to: Some("2025-01-31".to_string()),
                },
                vec!["operation_types", "date_from", "date_to"],
            ),
            (
                AuditFilter {
                    operation_types: Some("  ".to_string()),
                    date_from: None,
                    date_to: Some(String::new()),
                },
                vec![],
            ),
        ];

        for (filter, expected) in cases {
            let params = filter.params().unwrap();
            let value = serde_json::to_value(params).unwrap();
            let keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
            let mut keys = keys;
            keys.sort_unstable();
            let mut expected = expected;
            expected.sort_unstable();
            assert_eq!(keys, expected, "filter {:?}", filter);
            assert_eq!(params.query_pairs().len(), expected.len());
            assert_eq!(params.is_empty(), expected.is_empty());
        }
    }

    #[test]
    fn test_filter_rejects_bad_values() {
        let bad = [
            AuditFilter::operation(OperationType::Delete),
            AuditFilter {
                operation_types: Some("TRUNCATE".to_string()),
                ..AuditFilter::default()
            },
            AuditFilter::date_range(Some("01/02/2025"), None),
            AuditFilter::date_range(Some("2025-03-01"), Some("2025-02-01")),
        ];
        for filter in bad {
            assert!(
                matches!(filter.params(), Err(Error::InvalidFilter { .. })),
                "accepted {:?}",
                filter
            );
        }
    }

    #[test]
    fn test_params_serialise_iso_dates() {
        let params = AuditFilter::date_range(Some("2025-01-05"), Some("2025-01-09"))
            .params()
            .unwrap();
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            serde_json::json!({"date_from": "2025-01-05", "date_to": "2025-01-09"})
        );
    }

    #[test]
    fn test_sort_audit_id_numerically() {
        let mut entries = vec![
            entry(10, OperationType::Create, "2025-01-01 10:00:00", "bob"),
            entry(2, OperationType::Modify, "2025-01-02 10:00:00", "alice"),
            entry(1, OperationType::Execute, "2025-01-03 10:00:00", "carol"),
        ];

        sort_entries(&mut entries, AuditColumn::AuditId, SortDirection::Ascending);
        let ids: Vec<i64> = entries.iter().map(|e| e.audit_id).collect();
        assert_eq!(ids, vec![1, 2, 10]);

        sort_entries(&mut entries, AuditColumn::OperationUser, SortDirection::Ascending);
        assert_eq!(entries[0].operation_user, "alice");

        sort_default(&mut entries);
        assert_eq!(entries[0].operation_time, "2025-01-03 10:00:00");
        assert_eq!(entries[2].operation_time, "2025-01-01 10:00:00");
    }

    #[test]
    fn test_column_ids() {
        for column in AuditColumn::ALL {
            assert_eq!(AuditColumn::from_id(column.id()), Some(column));
        }
        assert_eq!(AuditColumn::from_id("old_values"), None);
    }

    #[test]
    fn test_copied_message() {
        assert_eq!(
            copied_message(None),
            "SQL query for All operations copied to clipboard. Paste into the query tool and execute."
        );
        assert!(copied_message(Some(OperationType::Delete)).starts_with("SQL query for DELETE operations"));
    }

    #[test]
    fn test_snapshot_text() {
        let mut e = entry(1, OperationType::Modify, "t", "u");
        assert_eq!(e.old_values_text(), "");
        e.new_values = Some(serde_json::json!({"jobenabled": false}));
        assert_eq!(e.new_values_text(), "{\n    \"jobenabled\": false\n}");
    }
}
