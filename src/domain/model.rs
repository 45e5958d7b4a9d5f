use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single cell or bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    /// Exact `DECIMAL`/`NUMERIC` value in plain decimal notation, e.g. `-12.3400`.
    /// Serialized as a string, so it reads back as `Text`.
    Decimal(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(i64::from(value))
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Bytes(value)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(value: NaiveDateTime) -> Self {
        SqlValue::Timestamp(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// A row keyed by column name, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, SqlValue)>,
}

impl Record {
    /// Zips column names with positional values; a repeated column name keeps
    /// its first position and takes the last value.
    pub fn from_columns(columns: &[String], values: Vec<SqlValue>) -> Self {
        let mut fields: Vec<(String, SqlValue)> = Vec::with_capacity(columns.len());
        for (column, value) in columns.iter().zip(values) {
            match fields.iter_mut().find(|(name, _)| name == column) {
                Some(existing) => existing.1 = value,
                None => fields.push((column.clone(), value)),
            }
        }
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// What a backend reports after running one statement, mirroring a DB-API cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutedStatement {
    /// Column names; `None` when the statement produced no result set.
    pub description: Option<Vec<String>>,
    pub rows: Vec<Vec<SqlValue>>,
    pub rows_affected: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows(Vec<Vec<SqlValue>>),
    Records(Vec<Record>),
    RowsAffected(u64),
}

impl QueryResult {
    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            QueryResult::RowsAffected(count) => Some(*count),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<Vec<Vec<SqlValue>>> {
        match self {
            QueryResult::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            QueryResult::Records(records) => Some(records),
            _ => None,
        }
    }
}

/// Per-recipient outcome of a share: the new permission id, or `None` if the grant failed.
pub type ShareResult = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DriveRole {
    Reader,
    #[default]
    Commenter,
    Writer,
    FileOrganizer,
    Organizer,
    Owner,
}

impl DriveRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveRole::Reader => "reader",
            DriveRole::Commenter => "commenter",
            DriveRole::Writer => "writer",
            DriveRole::FileOrganizer => "fileOrganizer",
            DriveRole::Organizer => "organizer",
            DriveRole::Owner => "owner",
        }
    }
}

/// Accepted email send, to be polled at `operation_location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSendOperation {
    pub id: String,
    pub status: String,
    pub operation_location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_column_order_and_last_duplicate_value() {
        let columns = vec!["id".to_string(), "name".to_string(), "id".to_string()];
        let record = Record::from_columns(
            &columns,
            vec![SqlValue::Int(1), SqlValue::from("alice"), SqlValue::Int(9)],
        );

        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(record.get("id"), Some(&SqlValue::Int(9)));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_option_into_sql_value() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".to_string()));
    }

    #[test]
    fn test_drive_role_strings() {
        assert_eq!(DriveRole::default().as_str(), "commenter");
        assert_eq!(
            serde_json::to_string(&DriveRole::FileOrganizer).unwrap(),
            "\"fileOrganizer\""
        );
    }
}
